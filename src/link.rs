//! Linking a new item: a link token starts Plaid Link, the public token it
//! hands out is traded for an access token, and the item's accounts are
//! recorded so later syncs can resolve them.
use anyhow::Result;
use chrono::Utc;
use clap::ArgMatches;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use plaid_client::model::{LinkTokenRequest, LinkUser, SandboxPublicTokenRequest};
use serde_json::{Map, Value};

use crate::core::{Account, Item};
use crate::settings::Settings;
use crate::store::{self, SqliteStore};
use crate::upstream::ItemSource;

/// Institution Plaid's sandbox links by default (First Platypus Bank).
pub const SANDBOX_INSTITUTION: &str = "ins_109508";

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("provider request failed: {0}")]
    Provider(#[from] plaid_client::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
}

impl LinkError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LinkError::Store(e) if e.is_unavailable())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkResult {
    pub item_id: String,
    pub accounts_linked: usize,
    pub institution_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkToken {
    pub user_id: String,
    pub link_token: String,
    pub expiration: Option<String>,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxToken {
    pub public_token: String,
    pub request_id: String,
}

/// What Plaid Link is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    pub client_name: String,
    pub products: Vec<String>,
    pub country_codes: Vec<String>,
    pub language: String,
    pub webhook: Option<String>,
    pub redirect_uri: Option<String>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            client_name: "Cash Snapshot".to_string(),
            products: vec!["transactions".to_string()],
            country_codes: vec!["US".to_string()],
            language: "en".to_string(),
            webhook: None,
            redirect_uri: None,
        }
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.filter(|s| !s.trim().is_empty())
}

pub struct ItemLinker<P> {
    store: SqliteStore,
    source: P,
    options: LinkOptions,
}

impl<P: ItemSource> ItemLinker<P> {
    pub fn new(store: SqliteStore, source: P, options: LinkOptions) -> Self {
        Self {
            store,
            source,
            options,
        }
    }

    /// Issues a link token for the user. A missing user id gets a fresh one,
    /// which the caller must keep to exchange the resulting public token.
    #[tracing::instrument(skip(self))]
    pub async fn link_token(
        &self,
        user_id: Option<&str>,
        client_name: Option<&str>,
    ) -> Result<LinkToken, LinkError> {
        let user_id = match non_blank(user_id) {
            Some(id) => id.to_string(),
            None => ulid::Ulid::new().to_string(),
        };

        let res = self
            .source
            .link_token(&LinkTokenRequest {
                user: LinkUser {
                    client_user_id: &user_id,
                },
                client_name: non_blank(client_name).unwrap_or(&self.options.client_name),
                products: &self.options.products,
                country_codes: &self.options.country_codes,
                language: &self.options.language,
                webhook: self.options.webhook.as_deref(),
                redirect_uri: self.options.redirect_uri.as_deref(),
            })
            .await?;
        info!(%user_id, "issued link token");

        Ok(LinkToken {
            user_id,
            link_token: res.link_token,
            expiration: res.expiration,
            request_id: res.request_id,
        })
    }

    /// Creates a public token in the sandbox without going through Link.
    #[tracing::instrument(skip(self, options))]
    pub async fn sandbox_public_token(
        &self,
        institution_id: Option<&str>,
        products: Option<&[String]>,
        options: Option<&Map<String, Value>>,
    ) -> Result<SandboxToken, LinkError> {
        let products = match products {
            Some(p) if !p.is_empty() => p,
            _ => &self.options.products,
        };

        let res = self
            .source
            .sandbox_public_token(&SandboxPublicTokenRequest {
                institution_id: non_blank(institution_id).unwrap_or(SANDBOX_INSTITUTION),
                initial_products: products,
                options: options.filter(|o| !o.is_empty()),
            })
            .await?;

        Ok(SandboxToken {
            public_token: res.public_token,
            request_id: res.request_id,
        })
    }

    /// Relinking an item the user already has refreshes its credential and
    /// accounts but keeps its sync cursor.
    #[tracing::instrument(skip(self, public_token))]
    pub async fn exchange(&self, user_id: &str, public_token: &str) -> Result<LinkResult, LinkError> {
        let exchanged = self.source.exchange(public_token).await?;
        let accounts = self.source.accounts(&exchanged.access_token).await?;
        let institution_id = self.source.institution_id(&exchanged.access_token).await?;

        let institution_name = match &institution_id {
            Some(id) => match self.source.institution_name(id).await {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(institution_id = %id, error = %e, "institution lookup failed");
                    None
                }
            },
            None => None,
        };

        let now = Utc::now();
        let item = self
            .store
            .items()
            .upsert(&Item {
                id: ulid::Ulid::new().to_string(),
                user_id: user_id.to_string(),
                external_id: exchanged.item_id.clone(),
                access_token: exchanged.access_token,
                institution_id,
                institution_name: institution_name.clone(),
                cursor: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        for account in &accounts {
            self.store
                .accounts()
                .upsert(&Account::from_upstream(user_id, &item.id, account, now))
                .await?;
        }
        info!(item_id = %item.external_id, accounts = accounts.len(), "linked item");

        Ok(LinkResult {
            item_id: item.external_id,
            accounts_linked: accounts.len(),
            institution_name,
        })
    }
}

fn print_json_or<T: Serialize>(json: bool, value: &T, text: String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text);
    }

    Ok(())
}

pub(crate) async fn run(matches: &ArgMatches, settings: Settings) -> Result<()> {
    let store = SqliteStore::new(&settings.database_uri()?).await?;
    let client = plaid_client::Client::new(settings.client_config())?;
    let linker = ItemLinker::new(store, client, settings.link_options());

    match matches.subcommand() {
        Some(("token", sub)) => {
            let token = linker
                .link_token(sub.value_of("user"), sub.value_of("client_name"))
                .await?;
            let text = format!(
                "Link token for user {}: {} (expires {})",
                token.user_id,
                token.link_token,
                token.expiration.as_deref().unwrap_or("-")
            );
            print_json_or(sub.is_present("json"), &token, text)
        }
        Some(("sandbox-token", sub)) => {
            let products: Option<Vec<String>> = sub
                .values_of("products")
                .map(|v| v.map(str::to_string).collect());
            let token = linker
                .sandbox_public_token(sub.value_of("institution"), products.as_deref(), None)
                .await?;
            let text = format!("Public token: {}", token.public_token);
            print_json_or(sub.is_present("json"), &token, text)
        }
        Some(("exchange", sub)) => {
            // SAFETY: both arguments are required, clap refuses to run without them.
            let user_id = sub.value_of("user").unwrap();
            let public_token = sub.value_of("public_token").unwrap();

            let result = linker.exchange(user_id, public_token).await?;
            let text = format!(
                "Linked item {} ({}) with {} accounts.",
                result.item_id,
                result.institution_name.as_deref().unwrap_or("unknown institution"),
                result.accounts_linked
            );
            print_json_or(sub.is_present("json"), &result, text)
        }
        _ => unreachable!("subcommand is required"),
    }
}

//! A small, stateless client for the handful of Plaid endpoints the snapshot
//! service consumes.
//!
//! The [`Client`] only carries configuration (base address, credentials and
//! timeouts) and can be cloned freely across tasks; every call is a single
//! request/response exchange.
pub mod model;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::model::*;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Error)]
pub enum Error {
    #[error("request to plaid failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("plaid responded with {status}: {message}")]
    Api {
        status: u16,
        error_type: Option<String>,
        error_code: Option<String>,
        message: String,
    },
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// HTTP status of the failed exchange, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }

    pub fn is_not_implemented(&self) -> bool {
        self.status() == Some(501)
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Development,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Sandbox
    }
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.plaid.com",
            Environment::Development => "https://development.plaid.com",
            Environment::Production => "https://production.plaid.com",
        }
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: Credentials,
    pub env: Environment,
    /// Overrides the environment's address, e.g. for a proxy or a mock server.
    pub base_url: Option<String>,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(credentials: Credentials, env: Environment) -> Self {
        Self {
            credentials,
            env,
            base_url: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

/// Plaid authenticates every call with the client id and secret in the body.
#[derive(Serialize)]
struct Authenticated<'a, B: Serialize> {
    client_id: &'a str,
    secret: &'a str,
    #[serde(flatten)]
    body: &'a B,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    error_type: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut base = config
            .base_url
            .unwrap_or_else(|| config.env.base_url().to_string());
        // Url::join drops the last path segment unless the base ends with a slash.
        if !base.ends_with('/') {
            base.push('/');
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: Url::parse(&base)?,
            credentials: config.credentials,
        })
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = self.base_url.join(path)?;
        debug!(%url, "plaid request");

        let res = self
            .http
            .post(url)
            .json(&Authenticated {
                client_id: &self.credentials.client_id,
                secret: &self.credentials.secret,
                body,
            })
            .send()
            .await?;

        let status = res.status();
        let bytes = res.bytes().await?;
        if !status.is_success() {
            let body: ApiErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                error_type: body.error_type,
                error_code: body.error_code,
                message: body
                    .error_message
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string()),
            });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Fetches one page of the cursor-based transaction change feed.
    pub async fn transactions_sync(&self, req: &SyncRequest<'_>) -> Result<SyncResponse> {
        self.post("transactions/sync", req).await
    }

    pub async fn recurring_streams(&self, access_token: &str) -> Result<RecurringResponse> {
        self.post("transactions/recurring/get", &AccessTokenRequest { access_token })
            .await
    }

    pub async fn accounts(&self, access_token: &str) -> Result<AccountsResponse> {
        self.post("accounts/get", &AccessTokenRequest { access_token })
            .await
    }

    pub async fn item(&self, access_token: &str) -> Result<ItemResponse> {
        self.post("item/get", &AccessTokenRequest { access_token })
            .await
    }

    pub async fn institution(&self, institution_id: &str) -> Result<InstitutionResponse> {
        self.post(
            "institutions/get_by_id",
            &InstitutionRequest {
                institution_id,
                country_codes: &["US"],
            },
        )
        .await
    }

    pub async fn exchange_public_token(&self, public_token: &str) -> Result<ExchangeResponse> {
        self.post("item/public_token/exchange", &ExchangeRequest { public_token })
            .await
    }

    pub async fn link_token_create(&self, req: &LinkTokenRequest<'_>) -> Result<LinkTokenResponse> {
        self.post("link/token/create", req).await
    }

    pub async fn sandbox_public_token_create(
        &self,
        req: &SandboxPublicTokenRequest<'_>,
    ) -> Result<SandboxPublicTokenResponse> {
        self.post("sandbox/public_token/create", req).await
    }

    /// Real-time balances of every account under the item.
    pub async fn balances(&self, access_token: &str) -> Result<BalancesResponse> {
        self.post("accounts/balance/get", &AccessTokenRequest { access_token })
            .await
    }
}

//! Cash snapshot: refreshes each linked account's balance from the provider,
//! then totals chequing, savings and card debt over the stored balances.
use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::{Account, AccountBalance, Item};
use crate::display;
use crate::settings::Settings;
use crate::store::{self, SqliteStore};
use crate::sync::AccountResolver;
use crate::upstream::BalanceSource;

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("no linked accounts found for user {0}")]
    NoItems(String),
    #[error(transparent)]
    Store(#[from] store::Error),
}

impl BalanceError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BalanceError::Store(e) if e.is_unavailable())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountLine {
    pub account_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Option<String>,
    pub subtype: Option<String>,
    pub current_balance: Option<f64>,
    pub available: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSummary {
    pub user_id: String,
    pub chequing_total: f64,
    pub savings_total: f64,
    pub credit_cards_total_owed: f64,
    pub net_cash: f64,
    /// Most recent refresh among the summarized balances.
    pub as_of: Option<DateTime<Utc>>,
    pub account_breakdown: Vec<AccountLine>,
}

fn cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Totals the stored balances of the given accounts. Accounts without a
/// stored balance are left out; a missing current balance counts as zero.
pub fn summarize(user_id: &str, accounts: &[Account], balances: &[AccountBalance]) -> BalanceSummary {
    let by_account: HashMap<&str, &AccountBalance> = balances
        .iter()
        .map(|b| (b.account_id.as_str(), b))
        .collect();

    let mut chequing = 0.0;
    let mut savings = 0.0;
    let mut owed = 0.0;
    let mut as_of = None;
    let mut lines = Vec::new();

    for account in accounts {
        let balance = match by_account.get(account.id.as_str()) {
            Some(b) => *b,
            None => continue,
        };

        let current = balance.current.unwrap_or(0.0);
        match (account.ty.as_deref(), account.subtype.as_deref()) {
            (Some("depository"), Some("checking")) => chequing += current,
            (Some("depository"), Some("savings")) => savings += current,
            (Some("credit"), _) => owed += current,
            _ => {}
        }
        as_of = as_of.max(Some(balance.as_of));

        lines.push(AccountLine {
            account_id: account.external_id.clone(),
            name: account.name.clone(),
            ty: account.ty.clone(),
            subtype: account.subtype.clone(),
            current_balance: balance.current,
            available: balance.available,
        });
    }

    BalanceSummary {
        user_id: user_id.to_string(),
        chequing_total: cents(chequing),
        savings_total: cents(savings),
        credit_cards_total_owed: cents(owed),
        net_cash: cents(chequing + savings - owed),
        as_of,
        account_breakdown: lines,
    }
}

pub struct BalanceSummarizer<P> {
    store: SqliteStore,
    source: P,
}

impl<P: BalanceSource> BalanceSummarizer<P> {
    pub fn new(store: SqliteStore, source: P) -> Self {
        Self { store, source }
    }

    /// Refreshes every item's balances, then summarizes what is stored. An
    /// item the provider fails on keeps its previously stored balances.
    #[tracing::instrument(skip(self))]
    pub async fn summary(&self, user_id: &str) -> Result<BalanceSummary, BalanceError> {
        let items = self.store.items().by_user(user_id).await?;
        if items.is_empty() {
            return Err(BalanceError::NoItems(user_id.to_string()));
        }

        let now = Utc::now();
        for item in &items {
            let refreshed = self.refresh(item, now).await?;
            debug!(item_id = %item.external_id, refreshed, "refreshed balances");
        }

        self.stored(user_id).await
    }

    /// Summarizes the balances recorded by earlier refreshes.
    pub async fn stored(&self, user_id: &str) -> Result<BalanceSummary, BalanceError> {
        let accounts = self.store.accounts().by_user(user_id).await?;
        let balances = self.store.balances().by_user(user_id).await?;
        let summary = summarize(user_id, &accounts, &balances);
        info!(
            user_id,
            accounts = summary.account_breakdown.len(),
            net_cash = summary.net_cash,
            "summarized balances"
        );

        Ok(summary)
    }

    async fn refresh(&self, item: &Item, now: DateTime<Utc>) -> Result<usize, BalanceError> {
        let accounts = match self.source.balances(&item.access_token).await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(item_id = %item.external_id, error = %e, "balance refresh failed");
                return Ok(0);
            }
        };

        let resolver = AccountResolver::for_item(&self.store, &item.id).await?;
        let mut refreshed = 0;
        for account in &accounts {
            let account_id = match resolver.resolve(&account.account_id) {
                Some(id) => id,
                None => {
                    debug!(account_id = %account.account_id, "skipping unknown account");
                    continue;
                }
            };
            self.store
                .balances()
                .upsert(&AccountBalance::from_upstream(
                    &item.user_id,
                    account_id,
                    &account.balances,
                    now,
                ))
                .await?;
            refreshed += 1;
        }

        Ok(refreshed)
    }
}

pub(crate) async fn run(matches: &ArgMatches, settings: Settings) -> Result<()> {
    // SAFETY: `--user` is required.
    let user_id = matches.value_of("user").unwrap();

    let store = SqliteStore::new(&settings.database_uri()?).await?;
    let client = plaid_client::Client::new(settings.client_config())?;
    let summarizer = BalanceSummarizer::new(store, client);

    let summary = if matches.is_present("saved") {
        summarizer.stored(user_id).await?
    } else {
        summarizer.summary(user_id).await?
    };

    if matches.is_present("json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", display::balances_table(&summary)?);
    }

    Ok(())
}

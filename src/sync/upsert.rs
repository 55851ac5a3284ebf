use chrono::Utc;
use futures_util::future::FutureExt;
use futures_util::stream::{self, StreamExt};
use plaid_client::model::{SyncResponse, Transaction as PlaidTransaction};
use tracing::{debug, warn};

use super::resolver::AccountResolver;
use crate::core::Transaction;
use crate::store::{self, SqliteStore};

/// What happened to one page of upstream records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageOutcome {
    pub upserted: u64,
    pub skipped: u64,
}

/// Merges upstream transactions into the store for one item.
pub struct Upserter<'a> {
    store: &'a SqliteStore,
    user_id: &'a str,
    accounts: &'a AccountResolver,
}

impl<'a> Upserter<'a> {
    pub fn new(store: &'a SqliteStore, user_id: &'a str, accounts: &'a AccountResolver) -> Self {
        Self {
            store,
            user_id,
            accounts,
        }
    }

    /// Stores one record. Returns `Ok(None)` when its account is unknown to
    /// the item, in which case nothing is written.
    pub async fn upsert(&self, tx: &PlaidTransaction) -> store::Result<Option<Transaction>> {
        let account_id = match self.accounts.resolve(&tx.account_id) {
            Some(id) => id,
            None => {
                warn!(
                    transaction_id = %tx.transaction_id,
                    account_id = %tx.account_id,
                    "no stored account for transaction, skipping"
                );
                return Ok(None);
            }
        };

        let row = Transaction::from_upstream(self.user_id, account_id, tx, Utc::now());
        let saved = self.store.txns().upsert(&row, tx).await?;
        debug!(transaction_id = %tx.transaction_id, id = %saved.id, "upserted transaction");

        Ok(Some(saved))
    }

    /// Upserts the added and modified records of a page with at most
    /// `concurrency` writes in flight. Rejected rows are logged and skipped;
    /// only an unreachable store fails the page.
    pub async fn apply_page(
        &self,
        page: &SyncResponse,
        concurrency: usize,
    ) -> store::Result<PageOutcome> {
        let writes: Vec<_> = page
            .added
            .iter()
            .chain(page.modified.iter())
            .map(|tx| async move { (tx, self.upsert(tx).await) }.boxed())
            .collect();
        let results: Vec<_> = stream::iter(writes)
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut outcome = PageOutcome::default();
        for (tx, result) in results {
            match result {
                Ok(Some(_)) => outcome.upserted += 1,
                Ok(None) => outcome.skipped += 1,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    warn!(transaction_id = %tx.transaction_id, error = %e, "failed to store transaction");
                    outcome.skipped += 1;
                }
            }
        }

        Ok(outcome)
    }
}

//! Incremental transaction sync.
//!
//! Each item walks the provider's change feed page by page, starting at its
//! stored cursor. Records are merged through the [`Upserter`] and the cursor
//! is committed only after the last page has been applied, so an interrupted
//! run resumes from the previous cursor and replays pages harmlessly.
mod resolver;
mod upsert;

pub use resolver::AccountResolver;
pub use upsert::Upserter;

use chrono::Utc;
use futures_util::future::FutureExt;
use futures_util::stream::{self, StreamExt};
use plaid_client::model::SyncResponse;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::Item;
use crate::store::{self, SqliteStore};
use crate::upstream::TransactionFeed;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("provider request failed: {0}")]
    Provider(#[from] plaid_client::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error("provider reported more pages without a cursor")]
    MissingCursor,
}

impl SyncError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SyncError::Store(e) if e.is_unavailable())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub max_concurrent_items: usize,
    pub max_concurrent_upserts: usize,
    pub page_size: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent_items: 4,
            max_concurrent_upserts: 8,
            page_size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSyncResult {
    /// The provider's item id.
    pub item_id: String,
    pub transactions_synced: u64,
    pub cursor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSyncResult {
    pub user_id: String,
    pub total_transactions_synced: u64,
    pub items_synced: usize,
    pub sync_results: Vec<ItemSyncResult>,
    pub full_sync: bool,
}

enum PageState {
    Fetching(Option<String>),
    Upserting(SyncResponse),
    Continuing(String),
    Done(String),
}

pub struct SyncEngine<P> {
    store: SqliteStore,
    feed: P,
    options: SyncOptions,
}

impl<P: TransactionFeed> SyncEngine<P> {
    pub fn new(store: SqliteStore, feed: P, options: SyncOptions) -> Self {
        Self {
            store,
            feed,
            options,
        }
    }

    /// Syncs every item of the user. A failing item is logged and left out
    /// of the result; only an unreachable store fails the whole run.
    #[tracing::instrument(skip(self))]
    pub async fn sync_user(&self, user_id: &str) -> Result<UserSyncResult, SyncError> {
        let items = self.store.items().by_user(user_id).await?;
        info!(items = items.len(), "starting sync");

        let syncs: Vec<_> = items
            .iter()
            .map(|item| async move { (item, self.sync_item(item).await) }.boxed())
            .collect();
        let outcomes: Vec<_> = stream::iter(syncs)
            .buffered(self.options.max_concurrent_items.max(1))
            .collect()
            .await;

        let mut full_sync = true;
        let mut sync_results = Vec::with_capacity(outcomes.len());
        for (item, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    full_sync &= !result.cursor.is_empty();
                    sync_results.push(result);
                }
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    warn!(item_id = %item.external_id, error = %e, "item sync failed, cursor left in place");
                    full_sync = false;
                }
            }
        }

        let total: u64 = sync_results.iter().map(|r| r.transactions_synced).sum();
        info!(total, full_sync, "sync finished");

        Ok(UserSyncResult {
            user_id: user_id.to_string(),
            total_transactions_synced: total,
            items_synced: sync_results.len(),
            sync_results,
            full_sync,
        })
    }

    /// Drives one item's change feed to completion and commits the final
    /// cursor. Nothing is committed if any page fails.
    #[tracing::instrument(skip(self, item), fields(item_id = %item.external_id))]
    pub async fn sync_item(&self, item: &Item) -> Result<ItemSyncResult, SyncError> {
        let accounts = AccountResolver::for_item(&self.store, &item.id).await?;
        if accounts.is_empty() {
            warn!("item has no stored accounts, every transaction will be skipped");
        } else {
            debug!(accounts = accounts.len(), "resolved accounts");
        }
        let upserter = Upserter::new(&self.store, &item.user_id, &accounts);

        let mut synced = 0;
        let mut removed = 0;
        let mut latest = item.cursor.clone().filter(|c| !c.is_empty());
        let mut state = PageState::Fetching(latest.clone());

        let final_cursor = loop {
            state = match state {
                PageState::Fetching(cursor) => {
                    let page = self
                        .feed
                        .sync_page(&item.access_token, cursor.as_deref(), self.options.page_size)
                        .await?;
                    PageState::Upserting(page)
                }
                PageState::Upserting(page) => {
                    let outcome = upserter
                        .apply_page(&page, self.options.max_concurrent_upserts)
                        .await?;
                    synced += outcome.upserted;
                    removed += page.removed.len();
                    for gone in &page.removed {
                        debug!(transaction_id = gone.id(), "provider removed transaction");
                    }
                    debug!(
                        upserted = outcome.upserted,
                        skipped = outcome.skipped,
                        has_more = page.has_more,
                        "applied page"
                    );

                    if !page.next_cursor.is_empty() {
                        latest = Some(page.next_cursor.clone());
                    }
                    if page.has_more {
                        PageState::Continuing(page.next_cursor)
                    } else {
                        PageState::Done(page.next_cursor)
                    }
                }
                PageState::Continuing(next) if next.is_empty() => {
                    return Err(SyncError::MissingCursor);
                }
                PageState::Continuing(next) => PageState::Fetching(Some(next)),
                PageState::Done(last) if last.is_empty() => break latest,
                PageState::Done(last) => break Some(last),
            }
        };

        if removed > 0 {
            info!(removed, "provider reported removed transactions, keeping stored rows");
        }

        self.store
            .items()
            .commit_cursor(&item.id, final_cursor.as_deref(), Utc::now())
            .await?;

        Ok(ItemSyncResult {
            item_id: item.external_id.clone(),
            transactions_synced: synced,
            cursor: final_cursor.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use axum::async_trait;
    use plaid_client::model::{RemovedTransaction, SyncResponse};

    use super::*;
    use crate::core::Item;
    use crate::store::tests::{plaid_transaction, TestStore, TEST_USER};

    enum Scripted {
        Page(SyncResponse),
        Fail(u16),
    }

    /// Change feed answering from a script keyed by (access token, cursor).
    #[derive(Default)]
    struct ScriptedFeed {
        script: Mutex<HashMap<(String, String), Scripted>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedFeed {
        fn page(&self, token: &str, cursor: &str, page: SyncResponse) {
            self.script
                .lock()
                .unwrap()
                .insert((token.into(), cursor.into()), Scripted::Page(page));
        }

        fn fail(&self, token: &str, cursor: &str, status: u16) {
            self.script
                .lock()
                .unwrap()
                .insert((token.into(), cursor.into()), Scripted::Fail(status));
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransactionFeed for ScriptedFeed {
        async fn sync_page(
            &self,
            access_token: &str,
            cursor: Option<&str>,
            _count: u32,
        ) -> Result<SyncResponse, plaid_client::Error> {
            let key = (access_token.to_string(), cursor.unwrap_or_default().to_string());
            self.calls.lock().unwrap().push(key.clone());

            match self.script.lock().unwrap().get(&key) {
                Some(Scripted::Page(page)) => Ok(page.clone()),
                Some(Scripted::Fail(status)) => Err(plaid_client::Error::Api {
                    status: *status,
                    error_type: Some("API_ERROR".into()),
                    error_code: Some("INTERNAL_SERVER_ERROR".into()),
                    message: "scripted failure".into(),
                }),
                None => panic!("unscripted request {:?}", key),
            }
        }
    }

    fn page(ids: &[(&str, f64)], next_cursor: &str, has_more: bool) -> SyncResponse {
        SyncResponse {
            added: ids
                .iter()
                .map(|(id, amount)| plaid_transaction(id, "acc-1", *amount))
                .collect(),
            next_cursor: next_cursor.into(),
            has_more,
            ..Default::default()
        }
    }

    async fn linked_item(store: &TestStore, token: &str) -> Item {
        let item = store.new_item().await;
        store.new_account(&item, "acc-1").await;
        let item = Item {
            access_token: token.into(),
            ..item
        };
        store.db().items().upsert(&item).await.unwrap()
    }

    fn engine(store: &TestStore, feed: ScriptedFeed) -> SyncEngine<ScriptedFeed> {
        SyncEngine::new(store.db().clone(), feed, SyncOptions::default())
    }

    async fn stored_amounts(store: &TestStore) -> Vec<(String, f64)> {
        store
            .db()
            .txns()
            .by_user(TEST_USER)
            .await
            .unwrap()
            .into_iter()
            .map(|t| (t.external_id, t.amount))
            .collect()
    }

    #[tokio::test]
    async fn pages_until_exhausted_then_commits_cursor() {
        let store = TestStore::new().await;
        let item = linked_item(&store, "token-a").await;

        let feed = ScriptedFeed::default();
        feed.page("token-a", "", page(&[("tx-1", 1.0), ("tx-2", 2.0)], "c1", true));
        feed.page("token-a", "c1", page(&[("tx-3", 3.0)], "c2", false));
        let engine = engine(&store, feed);

        let result = engine.sync_user(TEST_USER).await.unwrap();

        assert_eq!(result.total_transactions_synced, 3);
        assert_eq!(result.items_synced, 1);
        assert!(result.full_sync);
        assert_eq!(
            result.sync_results,
            vec![ItemSyncResult {
                item_id: item.external_id.clone(),
                transactions_synced: 3,
                cursor: "c2".into(),
            }]
        );
        assert_eq!(
            engine.feed.calls(),
            vec![
                ("token-a".to_string(), "".to_string()),
                ("token-a".to_string(), "c1".to_string())
            ]
        );

        let stored = store.db().items().by_user(TEST_USER).await.unwrap();
        assert_eq!(stored[0].cursor.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn round_amounts_count_as_synced() {
        let store = TestStore::new().await;
        linked_item(&store, "token-a").await;

        let feed = ScriptedFeed::default();
        feed.page("token-a", "", page(&[("rent-1", 1200.0), ("gym-1", 19.99)], "c1", false));
        let engine = engine(&store, feed);

        let result = engine.sync_user(TEST_USER).await.unwrap();

        assert_eq!(result.total_transactions_synced, 2);
        assert_eq!(
            stored_amounts(&store).await,
            vec![("gym-1".to_string(), 19.99), ("rent-1".to_string(), 1200.0)]
        );
    }

    #[tokio::test]
    async fn rerun_with_same_pages_is_idempotent() {
        let store = TestStore::new().await;
        linked_item(&store, "token-a").await;

        let feed = ScriptedFeed::default();
        feed.page("token-a", "", page(&[("tx-1", 1.0), ("tx-2", 2.0)], "c1", false));
        // The second run starts from the committed cursor and sees a replay.
        feed.page("token-a", "c1", page(&[("tx-1", 1.0), ("tx-2", 2.0)], "c1", false));
        let engine = engine(&store, feed);

        engine.sync_user(TEST_USER).await.unwrap();
        let first = stored_amounts(&store).await;
        engine.sync_user(TEST_USER).await.unwrap();

        assert_eq!(stored_amounts(&store).await, first);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn failed_page_leaves_cursor_and_retry_converges() {
        let store = TestStore::new().await;
        linked_item(&store, "token-a").await;

        let feed = ScriptedFeed::default();
        feed.page("token-a", "", page(&[("tx-1", 1.0), ("tx-2", 2.0)], "c1", true));
        feed.fail("token-a", "c1", 500);
        let engine = engine(&store, feed);

        let interrupted = engine.sync_user(TEST_USER).await.unwrap();
        assert!(!interrupted.full_sync);
        assert_eq!(interrupted.items_synced, 0);
        assert!(interrupted.sync_results.is_empty());
        let stored = store.db().items().by_user(TEST_USER).await.unwrap();
        assert_eq!(stored[0].cursor, None);

        engine
            .feed
            .page("token-a", "c1", page(&[("tx-3", 3.0)], "c2", false));
        let resumed = engine.sync_user(TEST_USER).await.unwrap();
        assert!(resumed.full_sync);
        assert_eq!(resumed.sync_results[0].cursor, "c2");

        // Same end state as a run that never failed.
        let clean = TestStore::new().await;
        linked_item(&clean, "token-a").await;
        let feed = ScriptedFeed::default();
        feed.page("token-a", "", page(&[("tx-1", 1.0), ("tx-2", 2.0)], "c1", true));
        feed.page("token-a", "c1", page(&[("tx-3", 3.0)], "c2", false));
        super::SyncEngine::new(clean.db().clone(), feed, SyncOptions::default())
            .sync_user(TEST_USER)
            .await
            .unwrap();

        assert_eq!(stored_amounts(&store).await, stored_amounts(&clean).await);
    }

    #[tokio::test]
    async fn failing_item_does_not_stop_siblings() {
        let store = TestStore::new().await;
        linked_item(&store, "token-a").await;
        let healthy = linked_item(&store, "token-b").await;

        let feed = ScriptedFeed::default();
        feed.fail("token-a", "", 400);
        feed.page("token-b", "", page(&[("tx-9", 9.0)], "b1", false));
        let engine = engine(&store, feed);

        let result = engine.sync_user(TEST_USER).await.unwrap();

        assert!(!result.full_sync);
        assert_eq!(result.items_synced, 1);
        assert_eq!(result.sync_results[0].item_id, healthy.external_id);
        assert_eq!(result.total_transactions_synced, 1);
    }

    #[tokio::test]
    async fn empty_final_cursor_is_not_a_full_sync() {
        let store = TestStore::new().await;
        linked_item(&store, "token-a").await;

        let feed = ScriptedFeed::default();
        feed.page("token-a", "", page(&[("tx-1", 1.0)], "", false));
        let engine = engine(&store, feed);

        let result = engine.sync_user(TEST_USER).await.unwrap();

        assert!(!result.full_sync);
        assert_eq!(result.sync_results[0].cursor, "");
        let stored = store.db().items().by_user(TEST_USER).await.unwrap();
        assert_eq!(stored[0].cursor, None);
    }

    #[tokio::test]
    async fn empty_last_cursor_falls_back_to_latest_seen() {
        let store = TestStore::new().await;
        linked_item(&store, "token-a").await;

        let feed = ScriptedFeed::default();
        feed.page("token-a", "", page(&[("tx-1", 1.0)], "c1", true));
        feed.page("token-a", "c1", page(&[], "", false));
        let engine = engine(&store, feed);

        let result = engine.sync_user(TEST_USER).await.unwrap();

        assert!(result.full_sync);
        assert_eq!(result.sync_results[0].cursor, "c1");
    }

    #[tokio::test]
    async fn more_pages_without_cursor_fails_the_item() {
        let store = TestStore::new().await;
        linked_item(&store, "token-a").await;

        let feed = ScriptedFeed::default();
        feed.page("token-a", "", page(&[("tx-1", 1.0)], "", true));
        let engine = engine(&store, feed);

        let result = engine.sync_user(TEST_USER).await.unwrap();

        assert!(!result.full_sync);
        assert!(result.sync_results.is_empty());
    }

    #[tokio::test]
    async fn unmapped_accounts_and_removals_are_not_counted() {
        let store = TestStore::new().await;
        linked_item(&store, "token-a").await;

        let mut first = page(&[("tx-1", 1.0)], "c1", false);
        first.added.push(plaid_transaction("tx-2", "acc-closed", 2.0));
        first.removed = vec![RemovedTransaction::Id("tx-old".into())];
        let feed = ScriptedFeed::default();
        feed.page("token-a", "", first);
        let engine = engine(&store, feed);

        let result = engine.sync_user(TEST_USER).await.unwrap();

        assert_eq!(result.total_transactions_synced, 1);
        assert_eq!(stored_amounts(&store).await, vec![("tx-1".to_string(), 1.0)]);
    }

    #[tokio::test]
    async fn item_without_accounts_commits_cursor_and_skips_rows() {
        let store = TestStore::new().await;
        let item = store.new_item().await;
        store
            .db()
            .items()
            .upsert(&Item {
                access_token: "token-a".into(),
                ..item
            })
            .await
            .unwrap();

        let feed = ScriptedFeed::default();
        feed.page("token-a", "", page(&[("tx-1", 1.0)], "c1", false));
        let engine = engine(&store, feed);

        let result = engine.sync_user(TEST_USER).await.unwrap();

        assert_eq!(result.total_transactions_synced, 0);
        assert_eq!(result.sync_results[0].cursor, "c1");
        assert!(stored_amounts(&store).await.is_empty());
    }

    #[tokio::test]
    async fn redelivered_transaction_keeps_one_row_with_latest_amount() {
        let store = TestStore::new().await;
        linked_item(&store, "token-a").await;

        let mut second = page(&[], "c2", false);
        second.modified = vec![plaid_transaction("tx-1", "acc-1", 25.0)];
        let feed = ScriptedFeed::default();
        feed.page("token-a", "", page(&[("tx-1", 20.0)], "c1", true));
        feed.page("token-a", "c1", second);
        let engine = engine(&store, feed);

        let result = engine.sync_user(TEST_USER).await.unwrap();

        assert_eq!(result.total_transactions_synced, 2);
        assert_eq!(stored_amounts(&store).await, vec![("tx-1".to_string(), 25.0)]);
    }

    #[tokio::test]
    async fn user_without_items_syncs_nothing() {
        let store = TestStore::new().await;
        let engine = engine(&store, ScriptedFeed::default());

        let result = engine.sync_user("nobody").await.unwrap();

        assert_eq!(result.items_synced, 0);
        assert_eq!(result.total_transactions_synced, 0);
        assert!(result.full_sync);
    }
}

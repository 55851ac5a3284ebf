use std::collections::HashMap;

use crate::store::{self, SqliteStore};

/// Maps the provider's account ids to stored account ids for one item.
/// Built once at the start of a sync run and never refreshed mid-run.
#[derive(Debug, Default, Clone)]
pub struct AccountResolver {
    accounts: HashMap<String, String>,
}

impl AccountResolver {
    pub async fn for_item(store: &SqliteStore, item_id: &str) -> store::Result<Self> {
        let accounts = store
            .accounts()
            .by_item(item_id)
            .await?
            .into_iter()
            .map(|a| (a.external_id, a.id))
            .collect();

        Ok(Self { accounts })
    }

    pub fn resolve(&self, external_id: &str) -> Option<&str> {
        self.accounts.get(external_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

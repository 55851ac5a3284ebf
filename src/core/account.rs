use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub item_id: String,
    pub external_id: String,
    pub name: String,
    pub official_name: Option<String>,
    pub ty: Option<String>,
    pub subtype: Option<String>,
    pub mask: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn from_upstream(
        user_id: &str,
        item_id: &str,
        upstream: &plaid_client::model::Account,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            user_id: user_id.to_string(),
            item_id: item_id.to_string(),
            external_id: upstream.account_id.clone(),
            name: upstream.name.clone(),
            official_name: upstream.official_name.clone(),
            ty: upstream.ty.clone(),
            subtype: upstream.subtype.clone(),
            mask: upstream.mask.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

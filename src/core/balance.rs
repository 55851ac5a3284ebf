use chrono::{DateTime, Utc};
use plaid_client::model::Balances;
use serde::Serialize;

/// Latest known balance of one stored account. Refreshed in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountBalance {
    pub id: String,
    pub user_id: String,
    /// Internal account id.
    pub account_id: String,
    pub available: Option<f64>,
    pub current: Option<f64>,
    pub limit: Option<f64>,
    pub iso_currency_code: Option<String>,
    pub unofficial_currency_code: Option<String>,
    pub as_of: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    pub fn from_upstream(
        user_id: &str,
        account_id: &str,
        balances: &Balances,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            user_id: user_id.to_string(),
            account_id: account_id.to_string(),
            available: balances.available,
            current: balances.current,
            limit: balances.limit,
            iso_currency_code: balances.iso_currency_code.clone(),
            unofficial_currency_code: balances.unofficial_currency_code.clone(),
            as_of: now,
            created_at: now,
            updated_at: now,
        }
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// A stored ledger entry. `external_id` is the provider's transaction id and
/// identifies at most one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub account_id: String,
    pub external_id: String,
    /// Positive amounts are outflows (debits), negative amounts inflows.
    pub amount: f64,
    pub iso_currency_code: Option<String>,
    pub unofficial_currency_code: Option<String>,
    pub date: Option<NaiveDate>,
    pub authorized_date: Option<NaiveDate>,
    pub name: Option<String>,
    pub merchant_name: Option<String>,
    pub category: Option<Vec<String>>,
    pub account_owner: Option<String>,
    pub pending: bool,
    pub transaction_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Builds a fresh row from an upstream record. The store keeps the
    /// existing id and creation time when the external id is already present.
    pub fn from_upstream(
        user_id: &str,
        account_id: &str,
        tx: &plaid_client::model::Transaction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            user_id: user_id.to_string(),
            account_id: account_id.to_string(),
            external_id: tx.transaction_id.clone(),
            amount: tx.amount,
            iso_currency_code: tx.iso_currency_code.clone(),
            unofficial_currency_code: tx.unofficial_currency_code.clone(),
            date: tx.date,
            authorized_date: tx.authorized_date,
            name: tx.name.clone(),
            merchant_name: tx.merchant_name.clone(),
            category: tx.category.clone(),
            account_owner: tx.account_owner.clone(),
            pending: tx.pending.unwrap_or(false),
            transaction_type: tx.transaction_type.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

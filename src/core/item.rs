use chrono::{DateTime, Utc};

/// A linked connection to one institution. Holds the provider access token,
/// which must never appear in an outbound payload.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    pub user_id: String,
    pub external_id: String,
    pub access_token: String,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
    /// Absent until the first completed sync; absent means "from the beginning".
    pub cursor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

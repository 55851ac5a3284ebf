use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Parses a calendar date given either as `YYYY-MM-DD` or as an RFC 3339
/// timestamp. Anything else is treated as absent.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_local().date())
        })
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(Value::as_str).and_then(parse_date))
}

/// A missing, null or non-numeric amount reads as zero so one bad record
/// cannot fail the whole page.
fn lenient_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .unwrap_or_default(),
        _ => 0.0,
    })
}

#[derive(Debug, Serialize)]
pub struct SyncRequest<'a> {
    pub access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub added: Vec<Transaction>,
    #[serde(default)]
    pub modified: Vec<Transaction>,
    #[serde(default)]
    pub removed: Vec<RemovedTransaction>,
    #[serde(default)]
    pub next_cursor: String,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub account_id: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: f64,
    #[serde(default)]
    pub iso_currency_code: Option<String>,
    #[serde(default)]
    pub unofficial_currency_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub authorized_date: Option<NaiveDate>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub category: Option<Vec<String>>,
    #[serde(default)]
    pub account_owner: Option<String>,
    #[serde(default)]
    pub pending: Option<bool>,
    #[serde(default)]
    pub transaction_type: Option<String>,
}

/// Removed entries arrive either as bare ids or as `{"transaction_id": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RemovedTransaction {
    Id(String),
    Object { transaction_id: String },
}

impl RemovedTransaction {
    pub fn id(&self) -> &str {
        match self {
            RemovedTransaction::Id(id) => id,
            RemovedTransaction::Object { transaction_id } => transaction_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AccessTokenRequest<'a> {
    pub(crate) access_token: &'a str,
}

/// Recurring streams are kept as raw JSON: their nested fields vary between
/// API versions and are interpreted leniently by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecurringResponse {
    #[serde(default)]
    pub inflow_streams: Vec<Value>,
    #[serde(default)]
    pub outflow_streams: Vec<Value>,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountsResponse {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub official_name: Option<String>,
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemResponse {
    pub item: ItemMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemMeta {
    pub item_id: String,
    #[serde(default)]
    pub institution_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct InstitutionRequest<'a> {
    pub(crate) institution_id: &'a str,
    pub(crate) country_codes: &'a [&'a str],
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstitutionResponse {
    pub institution: Institution,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Institution {
    pub institution_id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExchangeRequest<'a> {
    pub(crate) public_token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    pub access_token: String,
    pub item_id: String,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct LinkUser<'a> {
    pub client_user_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct LinkTokenRequest<'a> {
    pub user: LinkUser<'a>,
    pub client_name: &'a str,
    pub products: &'a [String],
    pub country_codes: &'a [String],
    pub language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkTokenResponse {
    pub link_token: String,
    #[serde(default)]
    pub expiration: Option<String>,
    #[serde(default)]
    pub request_id: String,
}

/// Sandbox only: creates an item without going through Link.
#[derive(Debug, Serialize)]
pub struct SandboxPublicTokenRequest<'a> {
    pub institution_id: &'a str,
    pub initial_products: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<&'a serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxPublicTokenResponse {
    pub public_token: String,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalancesResponse {
    #[serde(default)]
    pub accounts: Vec<BalanceAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceAccount {
    pub account_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub balances: Balances,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Balances {
    #[serde(default)]
    pub available: Option<f64>,
    #[serde(default)]
    pub current: Option<f64>,
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub iso_currency_code: Option<String>,
    #[serde(default)]
    pub unofficial_currency_code: Option<String>,
}

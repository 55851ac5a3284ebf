mod account;
mod balance;
mod item;
mod recurring;
mod txn;

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Error as SqlxError, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Database(#[from] SqlxError),
}

impl Error {
    /// True when the store itself could not be reached, as opposed to a
    /// single statement being rejected.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Error::Database(e) => matches!(
                e,
                SqlxError::PoolTimedOut
                    | SqlxError::PoolClosed
                    | SqlxError::WorkerCrashed
                    | SqlxError::Io(_)
                    | SqlxError::Tls(_)
                    | SqlxError::Protocol(_)
            ),
            Error::Migration(_) => true,
            Error::Parse(_) => false,
        }
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(uri: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(uri)?
            .create_if_missing(true)
            .foreign_keys(true);

        let mut pool = SqlitePoolOptions::new();
        // Every connection to an in-memory database sees its own empty
        // database, so keep exactly one alive for the life of the pool.
        if uri.contains(":memory:") {
            pool = pool.max_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let pool = pool.connect_with(options).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn items(&self) -> item::Store<'_> {
        item::Store::new(self)
    }

    pub fn accounts(&self) -> account::Store<'_> {
        account::Store::new(self)
    }

    pub fn balances(&self) -> balance::Store<'_> {
        balance::Store::new(self)
    }

    pub fn txns(&self) -> txn::Store<'_> {
        txn::Store::new(self)
    }

    pub fn recurring(&self) -> recurring::Store<'_> {
        recurring::Store::new(self)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn to_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Stored dates that no longer parse are treated as absent.
fn date_column(row: &SqliteRow, col: &str) -> ::std::result::Result<Option<NaiveDate>, SqlxError> {
    let raw: Option<String> = row.try_get(col)?;
    Ok(raw.as_deref().and_then(plaid_client::model::parse_date))
}

fn timestamp_column(row: &SqliteRow, col: &str) -> ::std::result::Result<DateTime<Utc>, SqlxError> {
    let raw: String = row.try_get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SqlxError::ColumnDecode {
            index: col.to_string(),
            source: Box::new(e),
        })
}

/// SQLite may hand a whole-valued REAL back as INTEGER, notably through
/// `RETURNING`.
fn real_column(row: &SqliteRow, col: &str) -> ::std::result::Result<f64, SqlxError> {
    match row.try_get::<f64, _>(col) {
        Ok(v) => Ok(v),
        Err(SqlxError::ColumnDecode { .. }) => row.try_get::<i64, _>(col).map(|v| v as f64),
        Err(e) => Err(e),
    }
}

fn opt_real_column(
    row: &SqliteRow,
    col: &str,
) -> ::std::result::Result<Option<f64>, SqlxError> {
    match row.try_get::<Option<f64>, _>(col) {
        Ok(v) => Ok(v),
        Err(SqlxError::ColumnDecode { .. }) => {
            row.try_get::<Option<i64>, _>(col).map(|v| v.map(|v| v as f64))
        }
        Err(e) => Err(e),
    }
}

fn count_column(row: &SqliteRow, col: &str) -> ::std::result::Result<u32, SqlxError> {
    let raw: i64 = row.try_get(col)?;
    u32::try_from(raw).map_err(|e| SqlxError::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

use sea_query::{Expr, Iden, OnConflict, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{
    count_column, date_column, real_column, timestamp_column, to_date, to_timestamp, Result,
    SqliteStore,
};
use crate::core::{Direction, Frequency, RecurringRecord};

#[derive(Iden, Clone, Copy)]
enum RecurringTransactions {
    Table,
    Id,
    UserId,
    MerchantName,
    Direction,
    Frequency,
    AvgAmount,
    MinAmount,
    MaxAmount,
    Occurrences,
    LastDate,
    NextEstimatedDate,
    Confidence,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

const COLUMNS: [RecurringTransactions; 15] = [
    RecurringTransactions::Id,
    RecurringTransactions::UserId,
    RecurringTransactions::MerchantName,
    RecurringTransactions::Direction,
    RecurringTransactions::Frequency,
    RecurringTransactions::AvgAmount,
    RecurringTransactions::MinAmount,
    RecurringTransactions::MaxAmount,
    RecurringTransactions::Occurrences,
    RecurringTransactions::LastDate,
    RecurringTransactions::NextEstimatedDate,
    RecurringTransactions::Confidence,
    RecurringTransactions::IsActive,
    RecurringTransactions::CreatedAt,
    RecurringTransactions::UpdatedAt,
];

pub struct Store<'a>(&'a SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self(store)
    }

    pub async fn by_user(&self, user_id: &str) -> Result<Vec<RecurringRecord>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(RecurringTransactions::Table)
            .and_where(Expr::col(RecurringTransactions::UserId).eq(user_id))
            .order_by(RecurringTransactions::MerchantName, Order::Asc)
            .order_by(RecurringTransactions::Direction, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&query, values)
            .fetch_all(&self.0.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(RecurringRecord::from_row(&row)?);
        }

        Ok(records)
    }

    /// Later detections of the same (user, direction, merchant, frequency)
    /// overwrite the stored figures in place.
    pub async fn upsert(&self, record: &RecurringRecord) -> Result<RecurringRecord> {
        let (query, values) = Query::insert()
            .into_table(RecurringTransactions::Table)
            .columns(COLUMNS)
            .values_panic([
                record.id.as_str().into(),
                record.user_id.as_str().into(),
                record.merchant_name.as_str().into(),
                record.direction.as_str().into(),
                record.frequency.as_str().into(),
                record.avg_amount.into(),
                record.min_amount.into(),
                record.max_amount.into(),
                i64::from(record.occurrences).into(),
                to_date(record.last_date).into(),
                to_date(record.next_estimated_date).into(),
                record.confidence.into(),
                record.is_active.into(),
                to_timestamp(&record.created_at).into(),
                to_timestamp(&record.updated_at).into(),
            ])
            .on_conflict(
                OnConflict::columns([
                    RecurringTransactions::UserId,
                    RecurringTransactions::Direction,
                    RecurringTransactions::MerchantName,
                    RecurringTransactions::Frequency,
                ])
                .update_columns([
                    RecurringTransactions::AvgAmount,
                    RecurringTransactions::MinAmount,
                    RecurringTransactions::MaxAmount,
                    RecurringTransactions::Occurrences,
                    RecurringTransactions::LastDate,
                    RecurringTransactions::NextEstimatedDate,
                    RecurringTransactions::Confidence,
                    RecurringTransactions::IsActive,
                    RecurringTransactions::UpdatedAt,
                ])
                .to_owned(),
            )
            .returning(Query::returning().columns(COLUMNS))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&query, values)
            .fetch_one(&self.0.pool)
            .await?;

        Ok(RecurringRecord::from_row(&row)?)
    }
}

fn decode_err(col: &str, raw: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: format!("unexpected value {:?}", raw).into(),
    }
}

impl<'r> FromRow<'r, SqliteRow> for RecurringRecord {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        let direction: String = row.try_get("direction")?;
        let frequency: String = row.try_get("frequency")?;

        Ok(RecurringRecord {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            merchant_name: row.try_get("merchant_name")?,
            direction: match Direction::parse(&direction) {
                Some(d) => d,
                None => return Err(decode_err("direction", direction)),
            },
            frequency: match Frequency::parse(&frequency) {
                Some(f) => f,
                None => return Err(decode_err("frequency", frequency)),
            },
            avg_amount: real_column(row, "avg_amount")?,
            min_amount: real_column(row, "min_amount")?,
            max_amount: real_column(row, "max_amount")?,
            occurrences: count_column(row, "occurrences")?,
            last_date: date_column(row, "last_date")?,
            next_estimated_date: date_column(row, "next_estimated_date")?,
            confidence: real_column(row, "confidence")?,
            is_active: row.try_get("is_active")?,
            created_at: timestamp_column(row, "created_at")?,
            updated_at: timestamp_column(row, "updated_at")?,
        })
    }
}

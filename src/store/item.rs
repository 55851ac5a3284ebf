use chrono::{DateTime, Utc};
use sea_query::{Expr, Iden, OnConflict, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{timestamp_column, to_timestamp, Result, SqliteStore};
use crate::core::Item;

#[derive(Iden, Clone, Copy)]
enum Items {
    Table,
    Id,
    UserId,
    ExternalId,
    AccessToken,
    InstitutionId,
    InstitutionName,
    Cursor,
    CreatedAt,
    UpdatedAt,
}

const COLUMNS: [Items; 9] = [
    Items::Id,
    Items::UserId,
    Items::ExternalId,
    Items::AccessToken,
    Items::InstitutionId,
    Items::InstitutionName,
    Items::Cursor,
    Items::CreatedAt,
    Items::UpdatedAt,
];

pub struct Store<'a>(&'a SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self(store)
    }

    /// All items of a user, oldest link first.
    pub async fn by_user(&self, user_id: &str) -> Result<Vec<Item>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(Items::Table)
            .and_where(Expr::col(Items::UserId).eq(user_id))
            .order_by(Items::CreatedAt, Order::Asc)
            .order_by(Items::Id, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&query, values)
            .fetch_all(&self.0.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(Item::from_row(&row)?);
        }

        Ok(items)
    }

    /// Inserts the item or refreshes the credential and institution of an
    /// existing (user, external id) pair. The stored cursor is never touched.
    pub async fn upsert(&self, item: &Item) -> Result<Item> {
        let (query, values) = Query::insert()
            .into_table(Items::Table)
            .columns(COLUMNS)
            .values_panic([
                item.id.as_str().into(),
                item.user_id.as_str().into(),
                item.external_id.as_str().into(),
                item.access_token.as_str().into(),
                item.institution_id.clone().into(),
                item.institution_name.clone().into(),
                item.cursor.clone().into(),
                to_timestamp(&item.created_at).into(),
                to_timestamp(&item.updated_at).into(),
            ])
            .on_conflict(
                OnConflict::columns([Items::UserId, Items::ExternalId])
                    .update_columns([
                        Items::AccessToken,
                        Items::InstitutionId,
                        Items::InstitutionName,
                        Items::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .returning(Query::returning().columns(COLUMNS))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&query, values)
            .fetch_one(&self.0.pool)
            .await?;

        Ok(Item::from_row(&row)?)
    }

    /// Records the end of a completed sync run. An absent cursor leaves the
    /// stored one in place and only refreshes the update time.
    pub async fn commit_cursor(
        &self,
        id: &str,
        cursor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut columns = vec![(Items::UpdatedAt, to_timestamp(&now).into())];
        if let Some(cursor) = cursor {
            columns.push((Items::Cursor, cursor.into()));
        }

        let (query, values) = Query::update()
            .table(Items::Table)
            .values(columns)
            .and_where(Expr::col(Items::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&query, values)
            .execute(&self.0.pool)
            .await?;

        Ok(())
    }
}

impl<'r> FromRow<'r, SqliteRow> for Item {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        Ok(Item {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            external_id: row.try_get("external_id")?,
            access_token: row.try_get("access_token")?,
            institution_id: row.try_get("institution_id")?,
            institution_name: row.try_get("institution_name")?,
            cursor: row.try_get("cursor")?,
            created_at: timestamp_column(row, "created_at")?,
            updated_at: timestamp_column(row, "updated_at")?,
        })
    }
}

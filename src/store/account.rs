use sea_query::{Expr, Iden, OnConflict, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{timestamp_column, to_timestamp, Result, SqliteStore};
use crate::core::Account;

#[derive(Iden, Clone, Copy)]
enum Accounts {
    Table,
    Id,
    UserId,
    ItemId,
    ExternalId,
    Name,
    OfficialName,
    Type,
    Subtype,
    Mask,
    CreatedAt,
    UpdatedAt,
}

const COLUMNS: [Accounts; 11] = [
    Accounts::Id,
    Accounts::UserId,
    Accounts::ItemId,
    Accounts::ExternalId,
    Accounts::Name,
    Accounts::OfficialName,
    Accounts::Type,
    Accounts::Subtype,
    Accounts::Mask,
    Accounts::CreatedAt,
    Accounts::UpdatedAt,
];

pub struct Store<'a>(&'a SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self(store)
    }

    pub async fn by_item(&self, item_id: &str) -> Result<Vec<Account>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(Accounts::Table)
            .and_where(Expr::col(Accounts::ItemId).eq(item_id))
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&query, values)
            .fetch_all(&self.0.pool)
            .await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            accounts.push(Account::from_row(&row)?);
        }

        Ok(accounts)
    }

    pub async fn by_user(&self, user_id: &str) -> Result<Vec<Account>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(Accounts::Table)
            .and_where(Expr::col(Accounts::UserId).eq(user_id))
            .order_by(Accounts::Type, Order::Asc)
            .order_by(Accounts::Subtype, Order::Asc)
            .order_by(Accounts::Name, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&query, values)
            .fetch_all(&self.0.pool)
            .await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            accounts.push(Account::from_row(&row)?);
        }

        Ok(accounts)
    }

    /// Inserts the account or refreshes its descriptive fields, keyed by
    /// (item, external account id).
    pub async fn upsert(&self, account: &Account) -> Result<Account> {
        let (query, values) = Query::insert()
            .into_table(Accounts::Table)
            .columns(COLUMNS)
            .values_panic([
                account.id.as_str().into(),
                account.user_id.as_str().into(),
                account.item_id.as_str().into(),
                account.external_id.as_str().into(),
                account.name.as_str().into(),
                account.official_name.clone().into(),
                account.ty.clone().into(),
                account.subtype.clone().into(),
                account.mask.clone().into(),
                to_timestamp(&account.created_at).into(),
                to_timestamp(&account.updated_at).into(),
            ])
            .on_conflict(
                OnConflict::columns([Accounts::ItemId, Accounts::ExternalId])
                    .update_columns([
                        Accounts::Name,
                        Accounts::OfficialName,
                        Accounts::Type,
                        Accounts::Subtype,
                        Accounts::Mask,
                        Accounts::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .returning(Query::returning().columns(COLUMNS))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&query, values)
            .fetch_one(&self.0.pool)
            .await?;

        Ok(Account::from_row(&row)?)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Account {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        Ok(Account {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            item_id: row.try_get("item_id")?,
            external_id: row.try_get("external_id")?,
            name: row.try_get("name")?,
            official_name: row.try_get("official_name")?,
            ty: row.try_get("type")?,
            subtype: row.try_get("subtype")?,
            mask: row.try_get("mask")?,
            created_at: timestamp_column(row, "created_at")?,
            updated_at: timestamp_column(row, "updated_at")?,
        })
    }
}

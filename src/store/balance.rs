use sea_query::{Expr, Iden, OnConflict, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{opt_real_column, timestamp_column, to_timestamp, Result, SqliteStore};
use crate::core::AccountBalance;

#[derive(Iden, Clone, Copy)]
enum AccountBalances {
    Table,
    Id,
    UserId,
    AccountId,
    Available,
    CurrentBalance,
    LimitAmount,
    IsoCurrencyCode,
    UnofficialCurrencyCode,
    AsOf,
    CreatedAt,
    UpdatedAt,
}

const COLUMNS: [AccountBalances; 11] = [
    AccountBalances::Id,
    AccountBalances::UserId,
    AccountBalances::AccountId,
    AccountBalances::Available,
    AccountBalances::CurrentBalance,
    AccountBalances::LimitAmount,
    AccountBalances::IsoCurrencyCode,
    AccountBalances::UnofficialCurrencyCode,
    AccountBalances::AsOf,
    AccountBalances::CreatedAt,
    AccountBalances::UpdatedAt,
];

pub struct Store<'a>(&'a SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self(store)
    }

    pub async fn by_user(&self, user_id: &str) -> Result<Vec<AccountBalance>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(AccountBalances::Table)
            .and_where(Expr::col(AccountBalances::UserId).eq(user_id))
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&query, values)
            .fetch_all(&self.0.pool)
            .await?;

        let mut balances = Vec::with_capacity(rows.len());
        for row in rows {
            balances.push(AccountBalance::from_row(&row)?);
        }

        Ok(balances)
    }

    /// Keeps one row per (user, account); a refresh overwrites the amounts
    /// and `as_of` but not `created_at`.
    pub async fn upsert(&self, balance: &AccountBalance) -> Result<AccountBalance> {
        let (query, values) = Query::insert()
            .into_table(AccountBalances::Table)
            .columns(COLUMNS)
            .values_panic([
                balance.id.as_str().into(),
                balance.user_id.as_str().into(),
                balance.account_id.as_str().into(),
                balance.available.into(),
                balance.current.into(),
                balance.limit.into(),
                balance.iso_currency_code.clone().into(),
                balance.unofficial_currency_code.clone().into(),
                to_timestamp(&balance.as_of).into(),
                to_timestamp(&balance.created_at).into(),
                to_timestamp(&balance.updated_at).into(),
            ])
            .on_conflict(
                OnConflict::columns([AccountBalances::UserId, AccountBalances::AccountId])
                    .update_columns([
                        AccountBalances::Available,
                        AccountBalances::CurrentBalance,
                        AccountBalances::LimitAmount,
                        AccountBalances::IsoCurrencyCode,
                        AccountBalances::UnofficialCurrencyCode,
                        AccountBalances::AsOf,
                        AccountBalances::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .returning(Query::returning().columns(COLUMNS))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&query, values)
            .fetch_one(&self.0.pool)
            .await?;

        Ok(AccountBalance::from_row(&row)?)
    }
}

impl<'r> FromRow<'r, SqliteRow> for AccountBalance {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        Ok(AccountBalance {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            account_id: row.try_get("account_id")?,
            available: opt_real_column(row, "available")?,
            current: opt_real_column(row, "current_balance")?,
            limit: opt_real_column(row, "limit_amount")?,
            iso_currency_code: row.try_get("iso_currency_code")?,
            unofficial_currency_code: row.try_get("unofficial_currency_code")?,
            as_of: timestamp_column(row, "as_of")?,
            created_at: timestamp_column(row, "created_at")?,
            updated_at: timestamp_column(row, "updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use plaid_client::model::Balances;

    use crate::core::AccountBalance;
    use crate::store::tests::{TestStore, TEST_USER};

    fn balances(current: f64) -> Balances {
        Balances {
            available: Some(current - 25.5),
            current: Some(current),
            iso_currency_code: Some("USD".into()),
            ..Balances::default()
        }
    }

    #[tokio::test]
    async fn refresh_overwrites_single_row() {
        let store = TestStore::new().await;
        let item = store.new_item().await;
        let account = store.new_account(&item, "acc-1").await;

        let earlier = Utc::now() - Duration::hours(1);
        let first = store
            .db()
            .balances()
            .upsert(&AccountBalance::from_upstream(
                TEST_USER,
                &account.id,
                &balances(100.25),
                earlier,
            ))
            .await
            .unwrap();

        let now = Utc::now();
        let second = store
            .db()
            .balances()
            .upsert(&AccountBalance::from_upstream(
                TEST_USER,
                &account.id,
                &balances(80.75),
                now,
            ))
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.current, Some(80.75));
        assert_eq!(second.created_at.timestamp(), earlier.timestamp());
        assert_eq!(second.as_of.timestamp(), now.timestamp());

        let saved = store.db().balances().by_user(TEST_USER).await.unwrap();
        assert_eq!(saved.len(), 1);
    }

    #[tokio::test]
    async fn whole_and_missing_balances_read_back() {
        let store = TestStore::new().await;
        let item = store.new_item().await;
        let account = store.new_account(&item, "acc-1").await;

        let upstream = Balances {
            current: Some(1500.0),
            ..Balances::default()
        };
        let saved = store
            .db()
            .balances()
            .upsert(&AccountBalance::from_upstream(
                TEST_USER,
                &account.id,
                &upstream,
                Utc::now(),
            ))
            .await
            .unwrap();

        assert_eq!(saved.current, Some(1500.0));
        assert_eq!(saved.available, None);
        assert_eq!(saved.limit, None);
    }
}

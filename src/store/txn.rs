use sea_query::{Expr, Iden, OnConflict, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::{
    date_column, real_column, timestamp_column, to_date, to_timestamp, Result, SqliteStore,
};
use crate::core::Transaction;

#[derive(Iden, Clone, Copy)]
enum Transactions {
    Table,
    Id,
    UserId,
    AccountId,
    ExternalId,
    Amount,
    IsoCurrencyCode,
    UnofficialCurrencyCode,
    Date,
    AuthorizedDate,
    Name,
    MerchantName,
    Category,
    AccountOwner,
    Pending,
    TransactionType,
    Source,
    CreatedAt,
    UpdatedAt,
}

/// `source` keeps the raw upstream record and is not mapped back.
const COLUMNS: [Transactions; 18] = [
    Transactions::Id,
    Transactions::UserId,
    Transactions::AccountId,
    Transactions::ExternalId,
    Transactions::Amount,
    Transactions::IsoCurrencyCode,
    Transactions::UnofficialCurrencyCode,
    Transactions::Date,
    Transactions::AuthorizedDate,
    Transactions::Name,
    Transactions::MerchantName,
    Transactions::Category,
    Transactions::AccountOwner,
    Transactions::Pending,
    Transactions::TransactionType,
    Transactions::CreatedAt,
    Transactions::UpdatedAt,
    Transactions::Source,
];

/// Fields the provider may change between deliveries of the same id.
const MUTABLE: [Transactions; 13] = [
    Transactions::Amount,
    Transactions::IsoCurrencyCode,
    Transactions::UnofficialCurrencyCode,
    Transactions::Date,
    Transactions::AuthorizedDate,
    Transactions::Name,
    Transactions::MerchantName,
    Transactions::Category,
    Transactions::AccountOwner,
    Transactions::Pending,
    Transactions::TransactionType,
    Transactions::Source,
    Transactions::UpdatedAt,
];

pub struct Store<'a>(&'a SqliteStore);

impl<'a> Store<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self(store)
    }

    pub async fn by_external_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(Transactions::Table)
            .and_where(Expr::col(Transactions::ExternalId).eq(external_id))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&query, values)
            .fetch_optional(&self.0.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(Transaction::from_row(&row)?),
            None => None,
        })
    }

    /// Every stored transaction of a user ordered by posted date.
    pub async fn by_user(&self, user_id: &str) -> Result<Vec<Transaction>> {
        let (query, values) = Query::select()
            .columns(COLUMNS)
            .from(Transactions::Table)
            .and_where(Expr::col(Transactions::UserId).eq(user_id))
            .order_by(Transactions::Date, Order::Asc)
            .order_by(Transactions::ExternalId, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&query, values)
            .fetch_all(&self.0.pool)
            .await?;

        let mut txns = Vec::with_capacity(rows.len());
        for row in rows {
            txns.push(Transaction::from_row(&row)?);
        }

        Ok(txns)
    }

    /// Insert-or-update keyed by the external transaction id in a single
    /// statement, so concurrent deliveries of one id settle on the unique
    /// index. An existing row keeps its id, owner and creation time.
    pub async fn upsert<S: Serialize>(&self, tx: &Transaction, source: &S) -> Result<Transaction> {
        let category = match &tx.category {
            Some(c) => Some(serde_json::to_string(c)?),
            None => None,
        };

        let (query, values) = Query::insert()
            .into_table(Transactions::Table)
            .columns(COLUMNS)
            .values_panic([
                tx.id.as_str().into(),
                tx.user_id.as_str().into(),
                tx.account_id.as_str().into(),
                tx.external_id.as_str().into(),
                tx.amount.into(),
                tx.iso_currency_code.clone().into(),
                tx.unofficial_currency_code.clone().into(),
                to_date(tx.date).into(),
                to_date(tx.authorized_date).into(),
                tx.name.clone().into(),
                tx.merchant_name.clone().into(),
                category.into(),
                tx.account_owner.clone().into(),
                tx.pending.into(),
                tx.transaction_type.clone().into(),
                to_timestamp(&tx.created_at).into(),
                to_timestamp(&tx.updated_at).into(),
                serde_json::to_string(source)?.into(),
            ])
            .on_conflict(
                OnConflict::column(Transactions::ExternalId)
                    .update_columns(MUTABLE)
                    .to_owned(),
            )
            .returning(Query::returning().columns(COLUMNS))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&query, values)
            .fetch_one(&self.0.pool)
            .await?;

        Ok(Transaction::from_row(&row)?)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Transaction {
    fn from_row(row: &'r SqliteRow) -> ::std::result::Result<Self, sqlx::Error> {
        let category: Option<String> = row.try_get("category")?;

        Ok(Transaction {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            account_id: row.try_get("account_id")?,
            external_id: row.try_get("external_id")?,
            amount: real_column(row, "amount")?,
            iso_currency_code: row.try_get("iso_currency_code")?,
            unofficial_currency_code: row.try_get("unofficial_currency_code")?,
            date: date_column(row, "date")?,
            authorized_date: date_column(row, "authorized_date")?,
            name: row.try_get("name")?,
            merchant_name: row.try_get("merchant_name")?,
            category: category.and_then(|c| serde_json::from_str(&c).ok()),
            account_owner: row.try_get("account_owner")?,
            pending: row.try_get("pending")?,
            transaction_type: row.try_get("transaction_type")?,
            created_at: timestamp_column(row, "created_at")?,
            updated_at: timestamp_column(row, "updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use plaid_client::model::Transaction as PlaidTransaction;

    use crate::core::Transaction;
    use crate::store::tests::{plaid_transaction, TestStore, TEST_USER};

    #[tokio::test]
    async fn save_and_read_transaction() {
        let store = TestStore::new().await;
        let item = store.new_item().await;
        let account = store.new_account(&item, "acc-1").await;

        let upstream = plaid_transaction("tx-1", "acc-1", 19.99);
        let tx = Transaction::from_upstream(TEST_USER, &account.id, &upstream, Utc::now());
        store.db().txns().upsert(&tx, &upstream).await.unwrap();

        let stored = store
            .db()
            .txns()
            .by_external_id("tx-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.amount, 19.99);
        assert_eq!(stored.date, NaiveDate::from_ymd_opt(2022, 5, 1));
        assert_eq!(
            stored.category,
            Some(vec!["Recreation".to_string(), "Gyms".to_string()])
        );
        assert!(!stored.pending);
    }

    #[tokio::test]
    async fn whole_dollar_amounts_decode() {
        let store = TestStore::new().await;
        let item = store.new_item().await;
        let account = store.new_account(&item, "acc-1").await;

        let rent = plaid_transaction("rent-1", "acc-1", 1200.0);
        let saved = store
            .db()
            .txns()
            .upsert(
                &Transaction::from_upstream(TEST_USER, &account.id, &rent, Utc::now()),
                &rent,
            )
            .await
            .unwrap();

        assert_eq!(saved.amount, 1200.0);
        let all = store.db().txns().by_user(TEST_USER).await.unwrap();
        assert_eq!(all[0].amount, 1200.0);
    }

    #[tokio::test]
    async fn redelivery_updates_single_row() {
        let store = TestStore::new().await;
        let item = store.new_item().await;
        let account = store.new_account(&item, "acc-1").await;

        let first = plaid_transaction("tx-1", "acc-1", 10.0);
        let created = store
            .db()
            .txns()
            .upsert(
                &Transaction::from_upstream(TEST_USER, &account.id, &first, Utc::now()),
                &first,
            )
            .await
            .unwrap();

        let second = PlaidTransaction {
            pending: Some(true),
            ..plaid_transaction("tx-1", "acc-1", 42.5)
        };
        let updated = store
            .db()
            .txns()
            .upsert(
                &Transaction::from_upstream(TEST_USER, &account.id, &second, Utc::now()),
                &second,
            )
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.amount, 42.5);
        assert!(updated.pending);

        let all = store.db().txns().by_user(TEST_USER).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].amount, 42.5);
    }
}

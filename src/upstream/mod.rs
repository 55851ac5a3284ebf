//! Seams between the engines and the aggregation provider. Production code
//! plugs in [`plaid_client::Client`]; tests script their own responses.
pub mod plaid;

use axum::async_trait;
use plaid_client::model::{
    Account, BalanceAccount, ExchangeResponse, LinkTokenRequest, LinkTokenResponse,
    RecurringResponse, SandboxPublicTokenRequest, SandboxPublicTokenResponse, SyncResponse,
};
use plaid_client::Error;

#[async_trait]
pub trait TransactionFeed: Send + Sync {
    /// Fetches one page of the change feed. An absent cursor starts from the
    /// beginning of the item's history.
    async fn sync_page(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        count: u32,
    ) -> Result<SyncResponse, Error>;
}

#[async_trait]
pub trait RecurringSource: Send + Sync {
    async fn recurring_streams(&self, access_token: &str) -> Result<RecurringResponse, Error>;
}

#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn exchange(&self, public_token: &str) -> Result<ExchangeResponse, Error>;

    async fn accounts(&self, access_token: &str) -> Result<Vec<Account>, Error>;

    async fn institution_id(&self, access_token: &str) -> Result<Option<String>, Error>;

    async fn institution_name(&self, institution_id: &str) -> Result<String, Error>;

    async fn link_token(&self, req: &LinkTokenRequest<'_>) -> Result<LinkTokenResponse, Error>;

    async fn sandbox_public_token(
        &self,
        req: &SandboxPublicTokenRequest<'_>,
    ) -> Result<SandboxPublicTokenResponse, Error>;
}

#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balances(&self, access_token: &str) -> Result<Vec<BalanceAccount>, Error>;
}

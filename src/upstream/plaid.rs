use axum::async_trait;
use plaid_client::model::{
    Account, BalanceAccount, ExchangeResponse, LinkTokenRequest, LinkTokenResponse,
    RecurringResponse, SandboxPublicTokenRequest, SandboxPublicTokenResponse, SyncRequest,
    SyncResponse,
};
use plaid_client::{Client, Error};

use crate::upstream::{BalanceSource, ItemSource, RecurringSource, TransactionFeed};

#[async_trait]
impl TransactionFeed for Client {
    async fn sync_page(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        count: u32,
    ) -> Result<SyncResponse, Error> {
        self.transactions_sync(&SyncRequest {
            access_token,
            cursor,
            count: Some(count),
        })
        .await
    }
}

#[async_trait]
impl RecurringSource for Client {
    async fn recurring_streams(&self, access_token: &str) -> Result<RecurringResponse, Error> {
        Client::recurring_streams(self, access_token).await
    }
}

#[async_trait]
impl ItemSource for Client {
    async fn exchange(&self, public_token: &str) -> Result<ExchangeResponse, Error> {
        self.exchange_public_token(public_token).await
    }

    async fn accounts(&self, access_token: &str) -> Result<Vec<Account>, Error> {
        Ok(Client::accounts(self, access_token).await?.accounts)
    }

    async fn institution_id(&self, access_token: &str) -> Result<Option<String>, Error> {
        Ok(self.item(access_token).await?.item.institution_id)
    }

    async fn institution_name(&self, institution_id: &str) -> Result<String, Error> {
        Ok(self.institution(institution_id).await?.institution.name)
    }

    async fn link_token(&self, req: &LinkTokenRequest<'_>) -> Result<LinkTokenResponse, Error> {
        self.link_token_create(req).await
    }

    async fn sandbox_public_token(
        &self,
        req: &SandboxPublicTokenRequest<'_>,
    ) -> Result<SandboxPublicTokenResponse, Error> {
        self.sandbox_public_token_create(req).await
    }
}

#[async_trait]
impl BalanceSource for Client {
    async fn balances(&self, access_token: &str) -> Result<Vec<BalanceAccount>, Error> {
        Ok(Client::balances(self, access_token).await?.accounts)
    }
}

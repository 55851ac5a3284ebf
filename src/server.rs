//! JSON service over the sync, detection, link and balance operations.
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::signal;
use tracing::{error, info};

use crate::balance::{BalanceError, BalanceSummarizer, BalanceSummary};
use crate::detect::{DetectError, Detector, RecurringResult};
use crate::link::{ItemLinker, LinkError, LinkOptions, LinkResult, LinkToken, SandboxToken};
use crate::settings::Settings;
use crate::store::SqliteStore;
use crate::sync::{SyncEngine, SyncError, SyncOptions, UserSyncResult};
use crate::upstream::{BalanceSource, ItemSource, RecurringSource, TransactionFeed};

/// Everything a provider must answer for the service to run.
pub trait Provider:
    TransactionFeed + RecurringSource + ItemSource + BalanceSource + Clone + 'static
{
}

impl<P> Provider for P where
    P: TransactionFeed + RecurringSource + ItemSource + BalanceSource + Clone + 'static
{
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

macro_rules! classify {
    ($($err:ty),*) => {
        $(impl From<$err> for ApiError {
            fn from(e: $err) -> Self {
                if e.is_unavailable() {
                    ApiError::Unavailable(e.to_string())
                } else {
                    ApiError::Internal(e.to_string())
                }
            }
        })*
    };
}

classify!(SyncError, DetectError, LinkError);

impl From<BalanceError> for ApiError {
    fn from(e: BalanceError) -> Self {
        match e {
            BalanceError::NoItems(_) => ApiError::NotFound(e.to_string()),
            e if e.is_unavailable() => ApiError::Unavailable(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

pub struct AppState<P> {
    sync: SyncEngine<P>,
    detector: Detector<P>,
    linker: ItemLinker<P>,
    balances: BalanceSummarizer<P>,
}

impl<P: Provider> AppState<P> {
    pub fn new(store: SqliteStore, provider: P, sync: SyncOptions, link: LinkOptions) -> Self {
        Self {
            sync: SyncEngine::new(store.clone(), provider.clone(), sync),
            detector: Detector::new(store.clone(), provider.clone()),
            linker: ItemLinker::new(store.clone(), provider.clone(), link),
            balances: BalanceSummarizer::new(store, provider),
        }
    }
}

pub fn router<P: Provider>(state: Arc<AppState<P>>) -> Router {
    Router::new()
        .route("/api/v1/sync", post(sync::<P>))
        .route("/api/v1/recurring", get(recurring::<P>))
        .route("/api/v1/exchange", post(exchange::<P>))
        .route("/api/v1/link-token", post(link_token::<P>))
        .route("/api/v1/public-token", post(public_token::<P>))
        .route("/api/v1/summary", get(summary::<P>))
        .layer(Extension(state))
}

fn user_id(raw: Option<String>) -> Result<String, ApiError> {
    match raw {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(ApiError::BadRequest("user_id is required".into())),
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Like [`body`], but a request sent without a JSON body takes the defaults.
fn optional_body<T: Default>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        payload => body(payload),
    }
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(params)| params)
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct SyncBody {
    user_id: Option<String>,
}

async fn sync<P: Provider>(
    Extension(state): Extension<Arc<AppState<P>>>,
    payload: Result<Json<SyncBody>, JsonRejection>,
) -> Result<Json<ApiResponse<UserSyncResult>>, ApiError> {
    let user_id = user_id(body(payload)?.user_id)?;

    Ok(ok(state.sync.sync_user(&user_id).await?))
}

#[derive(Debug, Deserialize)]
struct RecurringParams {
    user_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn recurring<P: Provider>(
    Extension(state): Extension<Arc<AppState<P>>>,
    params: Result<Query<RecurringParams>, QueryRejection>,
) -> Result<Json<ApiResponse<RecurringResult>>, ApiError> {
    let params = query(params)?;
    let user_id = user_id(params.user_id)?;
    let kind = params.kind.unwrap_or_else(|| "outflow".to_string());

    Ok(ok(state.detector.detect(&user_id, &kind).await?))
}

#[derive(Debug, Deserialize)]
struct ExchangeBody {
    user_id: Option<String>,
    public_token: Option<String>,
}

async fn exchange<P: Provider>(
    Extension(state): Extension<Arc<AppState<P>>>,
    payload: Result<Json<ExchangeBody>, JsonRejection>,
) -> Result<Json<ApiResponse<LinkResult>>, ApiError> {
    let body = body(payload)?;
    let user_id = user_id(body.user_id)?;
    let public_token = match body.public_token {
        Some(t) if !t.trim().is_empty() => t,
        _ => return Err(ApiError::BadRequest("public_token is required".into())),
    };

    Ok(ok(state.linker.exchange(&user_id, &public_token).await?))
}

#[derive(Debug, Default, Deserialize)]
struct LinkTokenBody {
    user_id: Option<String>,
    client_name: Option<String>,
}

async fn link_token<P: Provider>(
    Extension(state): Extension<Arc<AppState<P>>>,
    payload: Result<Json<LinkTokenBody>, JsonRejection>,
) -> Result<Json<ApiResponse<LinkToken>>, ApiError> {
    let body = optional_body(payload)?;

    Ok(ok(state
        .linker
        .link_token(body.user_id.as_deref(), body.client_name.as_deref())
        .await?))
}

#[derive(Debug, Default, Deserialize)]
struct PublicTokenBody {
    institution_id: Option<String>,
    initial_products: Option<Vec<String>>,
    options: Option<Map<String, Value>>,
}

async fn public_token<P: Provider>(
    Extension(state): Extension<Arc<AppState<P>>>,
    payload: Result<Json<PublicTokenBody>, JsonRejection>,
) -> Result<Json<ApiResponse<SandboxToken>>, ApiError> {
    let body = optional_body(payload)?;

    Ok(ok(state
        .linker
        .sandbox_public_token(
            body.institution_id.as_deref(),
            body.initial_products.as_deref(),
            body.options.as_ref(),
        )
        .await?))
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    user_id: Option<String>,
}

async fn summary<P: Provider>(
    Extension(state): Extension<Arc<AppState<P>>>,
    params: Result<Query<SummaryParams>, QueryRejection>,
) -> Result<Json<ApiResponse<BalanceSummary>>, ApiError> {
    let user_id = user_id(query(params)?.user_id)?;

    Ok(ok(state.balances.summary(&user_id).await?))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}

pub(crate) async fn run(addr: Option<&str>, settings: Settings) -> Result<()> {
    let addr: SocketAddr = addr.unwrap_or(&settings.server.addr).parse()?;
    let store = SqliteStore::new(&settings.database_uri()?).await?;
    let client = plaid_client::Client::new(settings.client_config())?;
    let state = Arc::new(AppState::new(
        store.clone(),
        client,
        settings.sync_options(),
        settings.link_options(),
    ));

    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;

    Ok(())
}

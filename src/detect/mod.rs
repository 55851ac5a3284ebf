//! Recurring payment detection.
//!
//! The provider's own stream analysis is preferred. When it has nothing to
//! say for the user, or cannot be reached, streams are inferred from the
//! stored transaction history instead. Only provider streams are persisted.
mod custom;
mod provider;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::{Direction, Item, RecurringRecord, RecurringStream};
use crate::store::{self, SqliteStore};
use crate::upstream::RecurringSource;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Store(#[from] store::Error),
}

impl DetectError {
    pub fn is_unavailable(&self) -> bool {
        match self {
            DetectError::Store(e) => e.is_unavailable(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionMethods {
    pub plaid_api: usize,
    pub custom_detector: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringResult {
    pub user_id: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub recurring_transactions: Vec<RecurringStream>,
    pub total_streams: usize,
    pub detection_methods: DetectionMethods,
}

/// Result of asking the provider for streams.
enum ProviderTier {
    Found(Vec<RecurringStream>),
    Empty,
    Failed(plaid_client::Error),
}

pub struct Detector<P> {
    store: SqliteStore,
    source: P,
}

impl<P: RecurringSource> Detector<P> {
    pub fn new(store: SqliteStore, source: P) -> Self {
        Self { store, source }
    }

    /// Detects the user's recurring streams in the direction named by
    /// `kind`. Anything other than `inflow` is read as `outflow`.
    #[tracing::instrument(skip(self))]
    pub async fn detect(&self, user_id: &str, kind: &str) -> Result<RecurringResult, DetectError> {
        let direction = Direction::normalize(kind);
        let items = self.store.items().by_user(user_id).await?;

        let tier = match items.first() {
            Some(item) => self.provider_tier(item, direction).await,
            None => ProviderTier::Empty,
        };

        match tier {
            ProviderTier::Found(streams) => {
                self.persist(user_id, &streams).await?;
                info!(streams = streams.len(), "using provider streams");
                return Ok(RecurringResult::new(user_id, direction, streams, true));
            }
            ProviderTier::Failed(e) => {
                warn!(error = %e, "provider streams unavailable, detecting from history");
            }
            ProviderTier::Empty => {}
        }

        let txns = self.store.txns().by_user(user_id).await?;
        let streams = custom::streams(&txns, direction);
        info!(
            transactions = txns.len(),
            streams = streams.len(),
            "detected streams from history"
        );

        Ok(RecurringResult::new(user_id, direction, streams, false))
    }

    async fn provider_tier(&self, item: &Item, direction: Direction) -> ProviderTier {
        match self.source.recurring_streams(&item.access_token).await {
            Ok(response) => {
                let streams = provider::streams(&response, direction);
                if streams.is_empty() {
                    ProviderTier::Empty
                } else {
                    ProviderTier::Found(streams)
                }
            }
            Err(e) if e.is_client_error() || e.is_not_implemented() => {
                debug!(error = %e, "provider has no recurring data");
                ProviderTier::Empty
            }
            Err(e) => ProviderTier::Failed(e),
        }
    }

    async fn persist(&self, user_id: &str, streams: &[RecurringStream]) -> Result<(), DetectError> {
        let now = Utc::now();
        for stream in streams {
            let record = RecurringRecord::from_provider_stream(user_id, stream, now);
            match self.store.recurring().upsert(&record).await {
                Ok(_) => {}
                Err(e) if e.is_unavailable() => return Err(e.into()),
                Err(e) => {
                    warn!(merchant = %record.merchant_name, error = %e, "failed to store recurring stream")
                }
            }
        }

        Ok(())
    }
}

impl RecurringResult {
    fn new(user_id: &str, direction: Direction, streams: Vec<RecurringStream>, provider: bool) -> Self {
        let detection_methods = if provider {
            DetectionMethods {
                plaid_api: streams.len(),
                custom_detector: 0,
            }
        } else {
            DetectionMethods {
                plaid_api: 0,
                custom_detector: streams.len(),
            }
        };

        Self {
            user_id: user_id.to_string(),
            direction,
            total_streams: streams.len(),
            recurring_transactions: streams,
            detection_methods,
        }
    }
}

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Confidence recorded for streams reported by the provider itself.
pub const PROVIDER_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inflow,
    Outflow,
}

impl Direction {
    /// Anything other than `inflow` (any casing) means outflow.
    pub fn normalize(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("inflow") {
            Direction::Inflow
        } else {
            Direction::Outflow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inflow => "inflow",
            Direction::Outflow => "outflow",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "inflow" => Some(Direction::Inflow),
            "outflow" => Some(Direction::Outflow),
            _ => None,
        }
    }

    /// Outflows are positive provider amounts, inflows negative ones.
    pub fn matches_amount(&self, amount: f64) -> bool {
        match self {
            Direction::Outflow => amount > 0.0,
            Direction::Inflow => amount < 0.0,
        }
    }

    /// Applies the sign convention used in reports: outflows negative.
    pub fn signed(&self, magnitude: f64) -> f64 {
        match self {
            Direction::Outflow => -magnitude.abs(),
            Direction::Inflow => magnitude.abs(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
}

impl Frequency {
    pub fn from_days(days: Option<i64>) -> Self {
        match days {
            None => Frequency::Monthly,
            Some(d) if d <= 10 => Frequency::Weekly,
            Some(d) if d <= 20 => Frequency::Biweekly,
            Some(d) if d <= 45 => Frequency::Monthly,
            Some(_) => Frequency::Quarterly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "weekly" => Some(Frequency::Weekly),
            "biweekly" => Some(Frequency::Biweekly),
            "monthly" => Some(Frequency::Monthly),
            "quarterly" => Some(Frequency::Quarterly),
            _ => None,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    Provider,
    Custom,
}

/// One detected recurring pattern as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringStream {
    pub stream_id: Option<String>,
    pub description: Option<String>,
    pub merchant_name: Option<String>,
    pub avg_amount: f64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub next_estimated_date: Option<NaiveDate>,
    pub occurrences: u32,
    pub frequency_days: Option<i64>,
    pub direction: Direction,
    pub source: StreamSource,
}

/// The persisted form of a provider-sourced stream, unique per
/// (user, direction, merchant, frequency).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringRecord {
    pub id: String,
    pub user_id: String,
    pub merchant_name: String,
    pub direction: Direction,
    pub frequency: Frequency,
    pub avg_amount: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    pub occurrences: u32,
    pub last_date: Option<NaiveDate>,
    pub next_estimated_date: Option<NaiveDate>,
    pub confidence: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringRecord {
    pub fn from_provider_stream(user_id: &str, stream: &RecurringStream, now: DateTime<Utc>) -> Self {
        let merchant = [stream.merchant_name.as_deref(), stream.description.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
            .unwrap_or("Unknown");

        Self {
            id: ulid::Ulid::new().to_string(),
            user_id: user_id.to_string(),
            merchant_name: merchant.to_string(),
            direction: stream.direction,
            frequency: Frequency::from_days(stream.frequency_days),
            avg_amount: stream.avg_amount,
            min_amount: stream.avg_amount,
            max_amount: stream.avg_amount,
            occurrences: stream.occurrences,
            last_date: stream.last_date,
            next_estimated_date: stream.next_estimated_date,
            confidence: PROVIDER_CONFIDENCE,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

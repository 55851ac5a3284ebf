//! Lenient reading of the provider's recurring streams. Fields that are
//! missing or do not parse are treated as absent; a stream is never rejected.
use chrono::{Days, NaiveDate};
use plaid_client::model::{parse_date, RecurringResponse};
use serde_json::Value;

use crate::core::{Direction, RecurringStream, StreamSource};

/// Longest cadence a provider stream may report before it is read as absent.
const MAX_FREQUENCY_DAYS: f64 = 3660.0;

pub fn streams(response: &RecurringResponse, direction: Direction) -> Vec<RecurringStream> {
    let raw = match direction {
        Direction::Inflow => &response.inflow_streams,
        Direction::Outflow => &response.outflow_streams,
    };

    raw.iter()
        .filter(|s| s.is_object())
        .map(|s| stream(s, direction))
        .collect()
}

fn stream(raw: &Value, direction: Direction) -> RecurringStream {
    let merchant = merchant_name(raw).or_else(|| text(raw.get("description")));
    let description = text(raw.get("description")).or_else(|| merchant.clone());

    let mut avg_amount = raw
        .get("average_amount")
        .and_then(|a| number(a.get("value")).or_else(|| number(a.get("amount"))))
        .or_else(|| number(raw.get("amount")))
        .unwrap_or(0.0);
    if direction == Direction::Outflow && avg_amount > 0.0 {
        avg_amount = -avg_amount;
    }

    let last_date = date(raw.get("last_date"));
    let frequency_days = frequency_days(raw.get("frequency"));

    RecurringStream {
        stream_id: text(raw.get("stream_id")),
        description,
        merchant_name: merchant,
        avg_amount,
        first_date: date(raw.get("first_date")),
        last_date,
        next_estimated_date: next_date(last_date, frequency_days),
        occurrences: number(raw.get("occurrences"))
            .filter(|n| *n >= 0.0)
            .map(|n| n as u32)
            .unwrap_or(0),
        frequency_days,
        direction,
        source: StreamSource::Provider,
    }
}

/// `None` when either side is missing or the sum leaves the calendar.
pub(super) fn next_date(last: Option<NaiveDate>, days: Option<i64>) -> Option<NaiveDate> {
    last?.checked_add_days(Days::new(u64::try_from(days?).ok()?))
}

/// `merchant_name` arrives either as a plain string or as `{"name": ...}`.
fn merchant_name(raw: &Value) -> Option<String> {
    match raw.get("merchant_name")? {
        Value::Object(m) => text(m.get("name")),
        other => text(Some(other)),
    }
}

fn frequency_days(raw: Option<&Value>) -> Option<i64> {
    match raw? {
        Value::Object(f) => number(f.get("days"))
            .filter(|d| (1.0..=MAX_FREQUENCY_DAYS).contains(d))
            .map(|d| d.round() as i64),
        Value::String(label) => match label.as_str() {
            "WEEKLY" => Some(7),
            "BIWEEKLY" => Some(14),
            "SEMI_MONTHLY" => Some(15),
            "MONTHLY" => Some(30),
            "ANNUALLY" => Some(365),
            _ => None,
        },
        _ => None,
    }
}

fn text(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(raw: Option<&Value>) -> Option<f64> {
    match raw? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn date(raw: Option<&Value>) -> Option<NaiveDate> {
    raw?.as_str().and_then(parse_date)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(outflow: Value) -> RecurringResponse {
        serde_json::from_value(json!({ "outflow_streams": outflow, "inflow_streams": [] })).unwrap()
    }

    #[test]
    fn reads_nested_fields() {
        let res = response(json!([{
            "stream_id": "s-1",
            "merchant_name": { "name": "Netflix" },
            "description": "NETFLIX.COM",
            "average_amount": { "value": 12.50 },
            "first_date": "2022-01-15",
            "last_date": "2022-04-15T00:00:00Z",
            "frequency": { "days": 30 },
            "occurrences": 4
        }]));

        let streams = streams(&res, Direction::Outflow);

        assert_eq!(
            streams,
            vec![RecurringStream {
                stream_id: Some("s-1".into()),
                description: Some("NETFLIX.COM".into()),
                merchant_name: Some("Netflix".into()),
                avg_amount: -12.5,
                first_date: NaiveDate::from_ymd_opt(2022, 1, 15),
                last_date: NaiveDate::from_ymd_opt(2022, 4, 15),
                next_estimated_date: NaiveDate::from_ymd_opt(2022, 5, 15),
                occurrences: 4,
                frequency_days: Some(30),
                direction: Direction::Outflow,
                source: StreamSource::Provider,
            }]
        );
    }

    #[test]
    fn falls_back_to_flat_fields() {
        let res = response(json!([{
            "merchant_name": "Spotify",
            "amount": "9.99",
            "last_date": "2022-04-01",
            "frequency": "WEEKLY"
        }]));

        let stream = &streams(&res, Direction::Outflow)[0];

        assert_eq!(stream.merchant_name.as_deref(), Some("Spotify"));
        assert_eq!(stream.description.as_deref(), Some("Spotify"));
        assert_eq!(stream.avg_amount, -9.99);
        assert_eq!(stream.frequency_days, Some(7));
        assert_eq!(stream.next_estimated_date, NaiveDate::from_ymd_opt(2022, 4, 8));
        assert_eq!(stream.occurrences, 0);
    }

    #[test]
    fn malformed_fields_are_absent() {
        let res = response(json!([
            {
                "description": "GYM",
                "average_amount": { "value": "n/a" },
                "first_date": "yesterday",
                "last_date": 20220401,
                "frequency": { "days": "often" },
                "occurrences": "many"
            },
            "not a stream"
        ]));

        let streams = streams(&res, Direction::Outflow);

        assert_eq!(streams.len(), 1);
        let stream = &streams[0];
        assert_eq!(stream.merchant_name.as_deref(), Some("GYM"));
        assert_eq!(stream.avg_amount, 0.0);
        assert_eq!(stream.first_date, None);
        assert_eq!(stream.last_date, None);
        assert_eq!(stream.frequency_days, None);
        assert_eq!(stream.next_estimated_date, None);
        assert_eq!(stream.occurrences, 0);
    }

    #[test]
    fn implausible_frequency_is_absent() {
        let res = response(json!([
            { "amount": 10, "last_date": "2022-04-01", "frequency": { "days": 1e17 } },
            { "amount": 10, "last_date": "2022-04-01", "frequency": { "days": -7 } },
            { "amount": 10, "last_date": "2022-04-01", "frequency": { "days": 0 } }
        ]));

        let streams = streams(&res, Direction::Outflow);

        assert_eq!(streams.len(), 3);
        for stream in streams {
            assert_eq!(stream.frequency_days, None);
            assert_eq!(stream.next_estimated_date, None);
            assert_eq!(stream.last_date, NaiveDate::from_ymd_opt(2022, 4, 1));
        }
    }

    #[test]
    fn next_date_past_the_calendar_is_absent() {
        let last = NaiveDate::from_ymd_opt(2022, 4, 1);

        assert_eq!(next_date(last, Some(i64::MAX)), None);
        assert_eq!(next_date(last, Some(-1)), None);
        assert_eq!(next_date(last, Some(0)), last);
    }

    #[test]
    fn inflow_amounts_keep_their_sign() {
        let res: RecurringResponse = serde_json::from_value(json!({
            "inflow_streams": [{ "description": "PAYROLL", "average_amount": { "amount": -2500 } }]
        }))
        .unwrap();

        let streams = streams(&res, Direction::Inflow);

        assert_eq!(streams[0].avg_amount, -2500.0);
        assert_eq!(streams[0].direction, Direction::Inflow);
    }
}

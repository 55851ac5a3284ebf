//! Recurrence inferred from stored history: transactions are grouped by
//! merchant and a coarse amount bucket, and groups with a steady cadence
//! become streams.
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use super::provider::next_date;
use crate::core::{Direction, RecurringStream, StreamSource, Transaction};

const MIN_OCCURRENCES: usize = 3;
const BUCKET_WIDTH: f64 = 5.0;

pub fn streams(txns: &[Transaction], direction: Direction) -> Vec<RecurringStream> {
    let mut groups: BTreeMap<(String, i64), Vec<(&Transaction, NaiveDate)>> = BTreeMap::new();

    for tx in txns {
        if !direction.matches_amount(tx.amount) {
            continue;
        }
        let merchant = match tx.merchant_name.as_deref() {
            Some(m) if !m.trim().is_empty() => m,
            _ => continue,
        };
        let date = match tx.date {
            Some(d) => d,
            None => continue,
        };

        groups
            .entry((normalize_merchant(merchant), bucket(tx.amount)))
            .or_default()
            .push((tx, date));
    }

    let mut streams: Vec<_> = groups
        .into_values()
        .filter_map(|group| group_stream(group, direction))
        .collect();
    streams.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));

    streams
}

fn group_stream(
    mut group: Vec<(&Transaction, NaiveDate)>,
    direction: Direction,
) -> Option<RecurringStream> {
    if group.len() < MIN_OCCURRENCES {
        return None;
    }
    let distinct: BTreeSet<_> = group.iter().map(|(_, d)| *d).collect();
    if distinct.len() < MIN_OCCURRENCES {
        return None;
    }

    group.sort_by(|(a, da), (b, db)| da.cmp(db).then_with(|| a.external_id.cmp(&b.external_id)));

    let deltas: Vec<i64> = group
        .windows(2)
        .map(|w| (w[1].1 - w[0].1).num_days())
        .collect();
    let frequency_days = median_days(&deltas);

    let first_date = group.first().map(|(_, d)| *d);
    let last_date = group.last().map(|(_, d)| *d);
    let merchant = group[0].0.merchant_name.clone();

    let total: f64 = group.iter().map(|(tx, _)| tx.amount.abs()).sum();
    let avg = round_cents(total / group.len() as f64);

    Some(RecurringStream {
        stream_id: None,
        description: merchant.clone(),
        merchant_name: merchant,
        avg_amount: direction.signed(avg),
        first_date,
        last_date,
        next_estimated_date: next_date(last_date, Some(frequency_days)),
        occurrences: group.len() as u32,
        frequency_days: Some(frequency_days),
        direction,
        source: StreamSource::Custom,
    })
}

/// Lowercased, trimmed, whitespace collapsed, then everything but ASCII
/// letters, digits and spaces removed.
pub fn normalize_merchant(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect()
}

/// Absolute amount rounded half-up to the nearest multiple of five.
fn bucket(amount: f64) -> i64 {
    (amount.abs() / BUCKET_WIDTH + 0.5).floor() as i64 * BUCKET_WIDTH as i64
}

fn median_days(deltas: &[i64]) -> i64 {
    let mut sorted = deltas.to_vec();
    sorted.sort_unstable();

    let n = sorted.len();
    let median = if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
    };

    (median + 0.5).floor() as i64
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, Utc};

    use super::*;

    fn tx(id: &str, merchant: &str, amount: f64, date: NaiveDate) -> Transaction {
        Transaction {
            id: ulid::Ulid::new().to_string(),
            user_id: "user-1".into(),
            account_id: "acc-1".into(),
            external_id: id.into(),
            amount,
            iso_currency_code: Some("USD".into()),
            unofficial_currency_code: None,
            date: Some(date),
            authorized_date: None,
            name: None,
            merchant_name: Some(merchant.into()),
            category: None,
            account_owner: None,
            pending: false,
            transaction_type: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, 3).unwrap() + Duration::days(n)
    }

    #[test]
    fn weekly_gym_membership() {
        let txns: Vec<_> = (0..4)
            .map(|i| tx(&format!("tx-{}", i), "Acme Gym", 19.99, day(i * 7)))
            .collect();

        let streams = streams(&txns, Direction::Outflow);

        assert_eq!(
            streams,
            vec![RecurringStream {
                stream_id: None,
                description: Some("Acme Gym".into()),
                merchant_name: Some("Acme Gym".into()),
                avg_amount: -19.99,
                first_date: Some(day(0)),
                last_date: Some(day(21)),
                next_estimated_date: Some(day(28)),
                occurrences: 4,
                frequency_days: Some(7),
                direction: Direction::Outflow,
                source: StreamSource::Custom,
            }]
        );
    }

    #[test]
    fn two_occurrences_are_not_a_stream() {
        let txns = vec![
            tx("tx-1", "Acme Gym", 19.99, day(0)),
            tx("tx-2", "Acme Gym", 19.99, day(7)),
        ];

        assert!(streams(&txns, Direction::Outflow).is_empty());
    }

    #[test]
    fn same_day_repeats_need_three_distinct_dates() {
        let txns = vec![
            tx("tx-1", "Coffee", 4.50, day(0)),
            tx("tx-2", "Coffee", 4.50, day(0)),
            tx("tx-3", "Coffee", 4.50, day(1)),
        ];

        assert!(streams(&txns, Direction::Outflow).is_empty());
    }

    #[test]
    fn grouping_ignores_input_order() {
        let mut txns = vec![
            tx("a-1", "Netflix", 15.49, day(0)),
            tx("a-2", "NETFLIX!", 15.49, day(30)),
            tx("a-3", "  netflix ", 14.99, day(61)),
            tx("b-1", "Rent Co", 1200.0, day(0)),
            tx("b-2", "Rent Co", 1200.0, day(31)),
            tx("b-3", "Rent Co", 1200.0, day(59)),
            tx("b-4", "Rent Co", 1200.0, day(90)),
            tx("c-1", "Netflix", 30.0, day(5)),
        ];

        let forward = streams(&txns, Direction::Outflow);
        txns.reverse();
        let backward = streams(&txns, Direction::Outflow);

        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 2);
        assert_eq!(forward[0].merchant_name.as_deref(), Some("Rent Co"));
        assert_eq!(forward[1].merchant_name.as_deref(), Some("Netflix"));
        assert_eq!(forward[1].occurrences, 3);
    }

    #[test]
    fn even_count_median_rounds_half_up() {
        // Deltas 7, 8, 9, 10 give a median of 8.5.
        let txns = vec![
            tx("tx-1", "Cleaner", 50.0, day(0)),
            tx("tx-2", "Cleaner", 50.0, day(7)),
            tx("tx-3", "Cleaner", 50.0, day(15)),
            tx("tx-4", "Cleaner", 50.0, day(24)),
            tx("tx-5", "Cleaner", 50.0, day(34)),
        ];

        let streams = streams(&txns, Direction::Outflow);

        assert_eq!(streams[0].frequency_days, Some(9));
        assert_eq!(streams[0].next_estimated_date, Some(day(43)));
    }

    #[test]
    fn inflows_use_negative_amounts() {
        let txns: Vec<_> = (0..3)
            .map(|i| tx(&format!("pay-{}", i), "Employer Inc", -2500.0, day(i * 14)))
            .chain((0..3).map(|i| tx(&format!("gym-{}", i), "Acme Gym", 19.99, day(i * 7))))
            .collect();

        let streams = streams(&txns, Direction::Inflow);

        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].avg_amount, 2500.0);
        assert_eq!(streams[0].frequency_days, Some(14));
        assert_eq!(streams[0].direction, Direction::Inflow);
    }

    #[test]
    fn average_is_rounded_to_cents() {
        let txns = vec![
            tx("tx-1", "Utility", 40.00, day(0)),
            tx("tx-2", "Utility", 41.00, day(30)),
            tx("tx-3", "Utility", 41.01, day(60)),
        ];

        let streams = streams(&txns, Direction::Outflow);

        assert_eq!(streams[0].avg_amount, -40.67);
    }

    #[test]
    fn normalizes_merchant_names() {
        assert_eq!(normalize_merchant("  Acme   GYM #12 "), "acme gym 12");
        assert_eq!(normalize_merchant("Café\tCorner"), "caf corner");
    }
}

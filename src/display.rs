use std::io::Write;

use anyhow::Result;
use chrono::NaiveDate;
use tabwriter::TabWriter;

use crate::balance::BalanceSummary;
use crate::core::{RecurringRecord, RecurringStream, Transaction};
use crate::sync::UserSyncResult;

fn date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

fn finish(tw: TabWriter<Vec<u8>>) -> Result<String> {
    Ok(String::from_utf8(tw.into_inner()?)?)
}

pub fn sync_table(result: &UserSyncResult) -> Result<String> {
    let mut tw = TabWriter::new(vec![]);
    writeln!(tw, "Item\tSynced\tCursor")?;
    for item in &result.sync_results {
        let cursor = if item.cursor.is_empty() { "-" } else { &item.cursor };
        writeln!(tw, "{}\t{}\t{}", item.item_id, item.transactions_synced, cursor)?;
    }
    writeln!(
        tw,
        "\n{} transactions across {} items, full sync: {}",
        result.total_transactions_synced, result.items_synced, result.full_sync
    )?;

    finish(tw)
}

pub fn transactions_table(txns: &[Transaction]) -> Result<String> {
    let mut tw = TabWriter::new(vec![]);
    writeln!(tw, "Date\tStatus\tPayee\tAmount\tTXID")?;
    for tx in txns {
        let status = if tx.pending { "!" } else { "*" };
        let payee = tx
            .merchant_name
            .as_deref()
            .or(tx.name.as_deref())
            .unwrap_or("-");
        writeln!(
            tw,
            "{}\t{}\t{}\t{:.2} {}\t{}",
            date(tx.date),
            status,
            payee,
            tx.amount,
            tx.iso_currency_code.as_deref().unwrap_or(""),
            tx.external_id
        )?;
    }

    finish(tw)
}

pub fn streams_table(streams: &[RecurringStream]) -> Result<String> {
    let mut tw = TabWriter::new(vec![]);
    writeln!(tw, "Merchant\tAverage\tEvery\tSeen\tLast\tNext\tSource")?;
    for s in streams {
        writeln!(
            tw,
            "{}\t{:.2}\t{}\t{}\t{}\t{}\t{:?}",
            s.merchant_name.as_deref().unwrap_or("-"),
            s.avg_amount,
            s.frequency_days
                .map(|d| format!("{}d", d))
                .unwrap_or_else(|| "-".to_string()),
            s.occurrences,
            date(s.last_date),
            date(s.next_estimated_date),
            s.source,
        )?;
    }

    finish(tw)
}

pub fn records_table(records: &[RecurringRecord]) -> Result<String> {
    let mut tw = TabWriter::new(vec![]);
    writeln!(tw, "Merchant\tDirection\tFrequency\tAverage\tSeen\tNext\tConfidence")?;
    for r in records {
        writeln!(
            tw,
            "{}\t{}\t{}\t{:.2}\t{}\t{}\t{:.1}",
            r.merchant_name,
            r.direction,
            r.frequency,
            r.avg_amount,
            r.occurrences,
            date(r.next_estimated_date),
            r.confidence,
        )?;
    }

    finish(tw)
}

fn amount(v: Option<f64>) -> String {
    v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

pub fn balances_table(summary: &BalanceSummary) -> Result<String> {
    let mut tw = TabWriter::new(vec![]);
    writeln!(tw, "Account\tType\tCurrent\tAvailable")?;
    for line in &summary.account_breakdown {
        writeln!(
            tw,
            "{}\t{}/{}\t{}\t{}",
            line.name,
            line.ty.as_deref().unwrap_or("-"),
            line.subtype.as_deref().unwrap_or("-"),
            amount(line.current_balance),
            amount(line.available),
        )?;
    }
    writeln!(
        tw,
        "\nChequing {:.2}, savings {:.2}, cards owed {:.2}, net cash {:.2}",
        summary.chequing_total,
        summary.savings_total,
        summary.credit_cards_total_owed,
        summary.net_cash
    )?;
    match summary.as_of {
        Some(ts) => writeln!(tw, "As of {}", ts.format("%Y-%m-%d %H:%M UTC"))?,
        None => writeln!(tw, "No balances recorded yet.")?,
    }

    finish(tw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::AccountLine;
    use crate::sync::ItemSyncResult;

    #[test]
    fn sync_table_marks_missing_cursor() {
        let result = UserSyncResult {
            user_id: "user-1".into(),
            total_transactions_synced: 3,
            items_synced: 2,
            sync_results: vec![
                ItemSyncResult {
                    item_id: "item-a".into(),
                    transactions_synced: 3,
                    cursor: "c1".into(),
                },
                ItemSyncResult {
                    item_id: "item-b".into(),
                    transactions_synced: 0,
                    cursor: String::new(),
                },
            ],
            full_sync: false,
        };

        let table = sync_table(&result).unwrap();
        let lines: Vec<_> = table.lines().collect();

        assert!(lines[0].starts_with("Item"));
        assert!(lines[1].starts_with("item-a") && lines[1].ends_with("c1"));
        assert!(lines[2].starts_with("item-b") && lines[2].ends_with('-'));
        assert!(table.contains("3 transactions across 2 items, full sync: false"));
    }

    #[test]
    fn balances_table_marks_missing_amounts() {
        let summary = BalanceSummary {
            user_id: "user-1".into(),
            chequing_total: 0.0,
            savings_total: 0.0,
            credit_cards_total_owed: 0.0,
            net_cash: 0.0,
            as_of: None,
            account_breakdown: vec![AccountLine {
                account_id: "acc-1".into(),
                name: "Plaid Checking".into(),
                ty: Some("depository".into()),
                subtype: None,
                current_balance: None,
                available: Some(12.5),
            }],
        };

        let table = balances_table(&summary).unwrap();
        let lines: Vec<_> = table.lines().collect();

        assert!(lines[0].starts_with("Account"));
        assert!(lines[1].contains("depository/-"));
        assert!(lines[1].ends_with("12.50"));
        assert!(table.contains("net cash 0.00"));
        assert!(table.contains("No balances recorded yet."));
    }
}

use crate::commands::open_database;
use crate::error::Result;
use crate::models::trading_day_of;
use crate::services::{get_database_stats, SnapshotDatabase, SnapshotStore};
use chrono::DateTime;
use std::path::PathBuf;

pub async fn run(db_path: PathBuf) {
    println!("📊 Snapshot Store Status\n");

    let db = open_database(db_path).await;
    let result = show_status(&db).await;
    db.close().await;

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn show_status(db: &SnapshotDatabase) -> Result<()> {
    let stats = get_database_stats(db.pool()).await?;

    if stats.records == 0 {
        println!("⚠️  No snapshots stored yet. Run 'poll --track symbol:segment:expiry' first.");
        return Ok(());
    }

    println!("📈 Expiries: {}", stats.records);
    println!("📅 Days:     {}", stats.days);
    println!("⏱️  Samples:  {}", format_number(stats.samples));
    println!("💾 Blobs:    {} ({} orphaned)\n", format_number(stats.blobs), stats.orphan_blobs);

    println!("═══════════════════════════════════════════════════════════\n");

    let store = SnapshotStore::new(db);
    for summary in store.expiry_summaries().await? {
        println!("🔹 Expiry {}", summary.expiry);
        println!(
            "   {:>4} day(s)  {:>8} samples  last: {}",
            summary.days,
            format_number(summary.samples),
            summary.last_sample.map(format_timestamp).unwrap_or_else(|| "-".to_string())
        );

        let days = store.date_list(summary.expiry).await?;
        let listed: Vec<String> = days.iter().map(|day| format_day(*day)).collect();
        println!("   dateList: {}\n", listed.join(", "));
    }

    Ok(())
}

fn format_timestamp(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn format_day(day: i64) -> String {
    DateTime::from_timestamp(trading_day_of(day), 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| day.to_string())
}

fn format_number(n: i64) -> String {
    let s = n.abs().to_string();
    let mut out = String::new();
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_day(1_731_024_000), "2024-11-08");
        assert_eq!(format_timestamp(1_731_060_000), "2024-11-08 10:00:00 UTC");
    }
}

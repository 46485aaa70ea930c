use crate::commands::open_database;
use crate::services::SnapshotStore;
use std::path::PathBuf;

pub async fn run(db_path: PathBuf) {
    println!("🔧 Rebuilding date lists from stored samples\n");

    let db = open_database(db_path).await;
    let store = SnapshotStore::new(&db);

    match store.rebuild_date_lists().await {
        Ok(report) => {
            if report.days_added == 0 {
                println!("✅ Date lists already consistent");
            } else {
                println!("✅ Re-added {} missing day(s)", report.days_added);
            }
            if report.empty_days > 0 {
                println!("ℹ️  {} listed day(s) have no samples (kept, date lists never shrink)", report.empty_days);
            }
        }
        Err(e) => {
            eprintln!("❌ Repair failed: {}", e);
            db.close().await;
            std::process::exit(1);
        }
    }

    db.close().await;
}

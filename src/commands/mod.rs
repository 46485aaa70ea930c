pub mod history;
pub mod poll;
pub mod repair;
pub mod serve;
pub mod status;

use crate::services::SnapshotDatabase;
use std::path::PathBuf;

/// Open the snapshot database or exit, the way every command starts
pub(crate) async fn open_database(db_path: PathBuf) -> SnapshotDatabase {
    match SnapshotDatabase::new(db_path.clone()).await {
        Ok(db) => {
            println!("📁 Database: {}", db.path().display());
            db
        }
        Err(e) => {
            eprintln!("❌ Failed to open database {}: {}", db_path.display(), e);
            std::process::exit(1);
        }
    }
}

use crate::commands::open_database;
use crate::error::Result;
use crate::models::Expiry;
use crate::services::{LookupParams, SnapshotStore};
use std::path::PathBuf;

pub async fn run(
    db_path: PathBuf,
    expiry: Expiry,
    date: String,
    strike: Option<String>,
    side: Option<String>,
    output: Option<PathBuf>,
) {
    let db = open_database(db_path).await;
    let store = SnapshotStore::new(&db);

    let params = LookupParams {
        expiry: Some(expiry.to_string()),
        date: Some(date),
        strike,
        option_type: side,
        ..LookupParams::default()
    };

    let result = dump(&store, &params).await;
    db.close().await;

    let json = match result {
        Ok(json) => json,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => match tokio::fs::write(&path, json).await {
            Ok(()) => println!("✅ Wrote {}", path.display()),
            Err(e) => {
                eprintln!("❌ Failed to write {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => println!("{}", json),
    }
}

/// Pretty JSON of a full day, or of one strike when `params.strike` is set
async fn dump(store: &SnapshotStore, params: &LookupParams) -> Result<String> {
    let expiry = params.expiry()?;
    let day = params.trading_day()?;

    let json = if params.strike.is_some() {
        let history = store
            .strike_history(expiry, day, params.strike()?, params.side()?)
            .await?;
        serde_json::to_string_pretty(&history)?
    } else {
        serde_json::to_string_pretty(&store.read(expiry, day).await?)?
    };

    Ok(json)
}

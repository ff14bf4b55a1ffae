//! Commands against the on-disk local store.

use std::sync::Arc;
use std::time::Duration;

use reading_store::{LocalStore, SqliteReadingStore};
use sync_config_and_utils::{Config, Paths};
use sync_engine::{ReachabilitySource, TcpProbe};
use tracing::info;

pub async fn stats(paths: &Paths, owner: Option<&str>) -> anyhow::Result<()> {
    let store = SqliteReadingStore::open(&paths.database_file()).await?;
    match owner {
        Some(owner) => {
            let count = store.count_for_owner(owner).await?;
            let latest = store.max_timestamp_for(owner).await?;
            println!("{}: {} readings, latest timestamp {}", owner, count, latest);
        }
        None => println!("{} readings", store.count_all().await?),
    }
    Ok(())
}

pub async fn reset(paths: &Paths) -> anyhow::Result<()> {
    let store = SqliteReadingStore::open(&paths.database_file()).await?;
    let cleared = store.clear_all().await?;
    info!(cleared, "Local readings cleared");
    println!("Cleared {} readings", cleared);
    Ok(())
}

pub async fn probe(config: &Config) -> anyhow::Result<()> {
    let target = config.probe_target()?;
    let source: Arc<dyn ReachabilitySource> = Arc::new(TcpProbe::new(
        target.clone(),
        Duration::from_millis(config.sync.probe_timeout_ms),
    ));
    let reachable = source.currently_reachable().await;
    println!("{}: {}", target, if reachable { "online" } else { "offline" });
    Ok(())
}

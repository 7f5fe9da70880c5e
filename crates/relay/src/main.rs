use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relay_core::config::{BotConfig, DatabaseConfig};
use relay_platform::{MockPlatform, PlatformClient};
use relay_registry::{PlatformFactory, Registry};
use relay_store::{SqliteStore, Store};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=info".into()),
        )
        .init();

    let bot_config_dir: PathBuf = std::env::var("RELAY_BOT_CONFIG_DIR")
        .unwrap_or_else(|_| "bot_config".to_string())
        .into();
    let database_config_path: PathBuf = std::env::var("RELAY_DATABASE_CONFIG")
        .unwrap_or_else(|_| "database.json".to_string())
        .into();

    let db_config = DatabaseConfig::load_file(&database_config_path)?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_config.data_source)?);

    // No real vendor SDK integration ships in this build (spec.md §1's
    // external collaborator boundary) — every bot runs against its own
    // in-process MockPlatform, identified by its config filename.
    let platform_factory: PlatformFactory = Arc::new(|name, _config: &BotConfig| {
        Arc::new(MockPlatform::new("default-workspace", format!("UBOT_{name}")))
            as Arc<dyn PlatformClient>
    });

    let registry = Registry::new(store, bot_config_dir.clone(), platform_factory);

    let names = discover_bot_names(&bot_config_dir)?;
    if names.is_empty() {
        warn!(dir = %bot_config_dir.display(), "no bot config files found");
    }
    for name in names {
        if let Err(e) = registry.load(&name).await {
            warn!(bot = name, error = %e, "failed to load bot, skipping");
        }
    }

    info!(bots = registry.bot_count(), "relay running");

    loop {
        if registry.is_empty() {
            info!("no bots remain online, exiting");
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("shutdown signal received, unloading bots");
                for name in registry.names() {
                    let _ = registry.unload(&name).await;
                }
            }
        }
    }

    Ok(())
}

fn discover_bot_names(dir: &std::path::Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not read bot config directory");
            return Ok(names);
        }
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(name) = BotConfig::name_from_path(&path) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

//! unified_tx - Transaction Status Engine
//!
//! Loads configuration, checks the status mapping tables, connects the
//! store and runs the dual-write consistency worker.
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌──────────┐    ┌─────────────┐
//! │  Config  │───▶│ Mapping self │───▶│  Store   │───▶│ Consistency │
//! │  (YAML)  │    │    check     │    │ (PG/mem) │    │   worker    │
//! └──────────┘    └──────────────┘    └──────────┘    └─────────────┘
//! ```
//!
//! Usage: `unified_tx [--env <env>] [--self-check]`

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{error, info, warn};

use unified_tx::config::AppConfig;
use unified_tx::dual_write::DualWriteAdapter;
use unified_tx::logging::init_logging;
use unified_tx::status::LegacyStatusMapper;
use unified_tx::store::{MemoryStore, PgStore, TransactionStore};
use unified_tx::worker::ConsistencyWorker;

const PG_MAX_CONNECTIONS: u32 = 10;

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn self_check_only() -> bool {
    std::env::args().any(|a| a == "--self-check")
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config);

    info!(
        target: "CONFIG",
        env = %env,
        mode = %app_config.dual_write.mode,
        strategy = %app_config.dual_write.strategy,
        "Starting unified_tx"
    );

    // Step 1: mapping tables must cover every legacy value
    let mapper = Arc::new(LegacyStatusMapper::new());
    let report = mapper.validate_mapping_completeness();
    if !report.is_complete() {
        for legacy in &report.missing_forward {
            error!(
                system = %legacy.system(),
                status = %legacy,
                "Legacy status has no unified mapping"
            );
        }
        bail!(
            "status mapping incomplete: {} legacy value(s) unmapped",
            report.missing_forward.len()
        );
    }
    for (system, status) in report.missing_reverse() {
        warn!(system = %system, status = %status, "No legacy equivalent for unified status");
    }
    info!(forward = ?report.forward_counts, "Status mapping complete");

    if self_check_only() {
        return Ok(());
    }

    // Step 2: store
    let store: Arc<dyn TransactionStore> = match &app_config.postgres_url {
        Some(url) => {
            let pg = PgStore::connect(url, PG_MAX_CONNECTIONS)
                .await
                .context("Failed to connect to PostgreSQL")?;
            pg.ensure_schema().await.context("Failed to apply schema")?;
            info!("PostgreSQL store ready");
            Arc::new(pg)
        }
        None => {
            warn!("postgres_url not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Step 3: consistency worker until Ctrl-C
    if !app_config.consistency_worker.enabled {
        info!("Consistency worker disabled, nothing to run");
        return Ok(());
    }
    let adapter = Arc::new(DualWriteAdapter::new(
        store.clone(),
        mapper,
        app_config.dual_write,
    ));
    let worker = ConsistencyWorker::new(store, adapter, app_config.consistency_worker.clone());

    worker
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            }
        })
        .await;
    Ok(())
}

//! Persisted counter demo.
//!
//! Each run restores the `counter` store from the database under
//! `--data-dir`, bumps it, waits for the write to land, and prints the
//! plugin status as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use statekeep_core::{Field, Observable, Value};
use statekeep_persist::{PersistConfig, PersistPlugin, PersistPluginConfig, StoreHub};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser, Clone)]
#[command(name = "persist-demo")]
#[command(about = "Persisted counter backed by a storage worker pool")]
struct Args {
    /// Directory holding the durable database.
    #[arg(long, env = "STATEKEEP_DATA_DIR", default_value = ".statekeep")]
    data_dir: PathBuf,

    /// Number of storage workers.
    #[arg(long, env = "STATEKEEP_WORKERS", default_value_t = 1)]
    workers: i64,

    /// Amount added to the counter on this run.
    #[arg(long, default_value_t = 1)]
    increment: i64,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn count_of(state: &Observable) -> i64 {
    state
        .get("count")
        .map(Field::get)
        .and_then(|v| v.as_i64())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let plugin = PersistPlugin::build(PersistPluginConfig {
        worker_num: args.workers,
        data_dir: Some(args.data_dir.clone()),
        ..PersistPluginConfig::default()
    })
    .with_context(|| format!("open storage under {}", args.data_dir.display()))?;

    let hub = StoreHub::new();
    hub.use_interceptor(Arc::new(plugin.clone()));

    let counter = hub.create_store(
        "counter",
        Observable::reactive(&Value::map([("count", Value::Int(0))])),
        Some(PersistConfig::new("indexedDB")),
    )?;
    let outcome = counter.restored().await;
    let before = counter.read(count_of);
    tracing::info!(?outcome, count = before, "counter restored");

    counter.patch(|state| {
        state.set("count", Value::Int(before + args.increment));
    });

    let status = serde_json::to_string_pretty(&plugin.status())?;
    println!("{status}");

    // drains the WRITE before the process exits
    plugin.shutdown().await;
    println!("count: {} -> {}", before, counter.read(count_of));
    Ok(())
}

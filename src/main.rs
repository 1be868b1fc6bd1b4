// src/main.rs

//! Entry point for the pgsentinel daemon (spec.md §4.3 Supervisor).

use std::env;
use std::sync::Arc;

use tracing::error;

use pgsentinel::config::DaemonConfig;
use pgsentinel::dbprobe::SqlxDbProbe;
use pgsentinel::error::SentinelError;
use pgsentinel::kv::HttpKvStore;
use pgsentinel::supervisor;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("pgsentinel {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("pgsentinel.toml");

    let log_level =
        env::var("RUST_LOG").unwrap_or_else(|_| "info,pgsentinel::elector=debug".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();

    let exit_code = run(config_path).await;
    std::process::exit(exit_code);
}

async fn run(config_path: &str) -> i32 {
    let daemon_config = match DaemonConfig::from_file(config_path).await {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration from \"{config_path}\": {e}");
            return SentinelError::Config(e.to_string()).exit_code();
        }
    };

    let kv = Arc::new(HttpKvStore::new(daemon_config.kv_base_url.clone()));
    let bus = Arc::new(pgsentinel::bus::TcpLineBus::new(daemon_config.bus_addr));
    let db_probe = Arc::new(SqlxDbProbe::new());

    if let Err(e) = supervisor::run(&daemon_config, kv, bus, db_probe).await {
        error!("supervisor exited: {e}");
        return exit_code_for(&e);
    }
    0
}

/// Maps the supervisor's aggregated `anyhow::Error` back to the daemon's
/// documented exit codes (spec.md §6), falling back to the generic
/// "child task exited prematurely" code when the underlying cause isn't a
/// `SentinelError` (e.g. a panic or a `JoinError`).
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<SentinelError>()
        .map(SentinelError::exit_code)
        .unwrap_or(3)
}

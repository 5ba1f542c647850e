// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use guichet::config::RealtimeConfig;
use guichet::events::EventKind;
use guichet::manager::ConnectionManager;
use guichet::token::{FileTokenStore, StaticTokenStore, TokenStore};

/// Realtime client for the guichet clinic queue service.
#[derive(Debug, Parser)]
#[command(name = "guichet", version, about)]
struct Config {
    /// Realtime endpoint URL.
    #[arg(long, env = "GUICHET_URL", default_value = "ws://127.0.0.1:8600/ws")]
    url: String,

    /// Bearer token (takes precedence over --token-file).
    #[arg(long, env = "GUICHET_TOKEN")]
    token: Option<String>,

    /// Path to the persisted credential file.
    #[arg(long, env = "GUICHET_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Heartbeat interval in seconds.
    #[arg(long, env = "GUICHET_HEARTBEAT_SECS", default_value = "30")]
    heartbeat_secs: u64,

    /// Delay between reconnection attempts in milliseconds.
    #[arg(long, env = "GUICHET_RECONNECT_DELAY_MS", default_value = "5000")]
    reconnect_delay_ms: u64,

    /// Reconnection attempts before giving up.
    #[arg(long, env = "GUICHET_MAX_RECONNECT_ATTEMPTS", default_value = "10")]
    max_reconnect_attempts: u32,

    /// Probe connectivity once and exit (0 = reachable).
    #[arg(long)]
    probe: bool,

    /// How long --probe waits for the connection, in milliseconds.
    #[arg(long, env = "GUICHET_PROBE_TIMEOUT_MS", default_value = "3000")]
    probe_timeout_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "GUICHET_LOG_FORMAT", default_value = "text")]
    log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "GUICHET_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.token.is_none() && self.token_file.is_none() {
            anyhow::bail!("either --token or --token-file must be specified");
        }
        self.realtime().validate()
    }

    fn realtime(&self) -> RealtimeConfig {
        RealtimeConfig {
            url: self.url.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            ..RealtimeConfig::default()
        }
    }

    fn token_store(&self) -> Arc<dyn TokenStore> {
        match (&self.token, &self.token_file) {
            (Some(token), _) => Arc::new(StaticTokenStore::new(Some(token.clone()))),
            (None, Some(path)) => Arc::new(FileTokenStore::new(path.clone())),
            (None, None) => Arc::new(StaticTokenStore::new(None)),
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    match run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}

async fn run(config: Config) -> anyhow::Result<i32> {
    let manager = ConnectionManager::new(config.realtime(), config.token_store());

    if config.probe {
        let reachable = manager.test_connection().await;
        info!(reachable, "probe finished");
        manager.disconnect();
        return Ok(if reachable { 0 } else { 1 });
    }

    // Tail every event kind to the log.
    for kind in EventKind::ALL {
        manager.on(kind, move |event| info!(kind = %kind, ?event, "realtime event"));
    }

    manager.connect().await;
    wait_for_shutdown().await;
    manager.disconnect();

    Ok(0)
}

/// Block until SIGTERM or SIGINT.
async fn wait_for_shutdown() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

    tokio::select! {
        _ = async {
            if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
        } => {
            info!("received SIGTERM");
        }
        _ = async {
            if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
        } => {
            info!("received SIGINT");
        }
    }
}

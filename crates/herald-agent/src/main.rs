//! # herald-agent
//!
//! Herald service binary: loads settings, opens the delivery ledger, wires the
//! pipeline and digest scheduler, and serves the HTTP API until ctrl-c.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use herald_core::logging::{LogFormat, init_subscriber};
use herald_ledger::{ConnectionConfig, DeliveryLedger};
use herald_pipeline::{Pipeline, digest};
use herald_server::{HeraldServer, ServerConfig};
use herald_settings::{HeraldSettings, LedgerSettings};

/// Herald policy-change notification service.
#[derive(Parser, Debug)]
#[command(name = "herald-agent", about = "Herald policy-change notification service")]
struct Cli {
    /// Settings file (default `~/.herald/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` ledger (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Settings file to load.
    fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(herald_settings::loader::settings_path)
    }

    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut HeraldSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.ledger.db_path = path.to_string_lossy().into_owned();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn connection_config(settings: &LedgerSettings) -> ConnectionConfig {
    ConnectionConfig {
        pool_size: settings.pool_size,
        busy_timeout_ms: settings.busy_timeout_ms,
        ..ConnectionConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = herald_settings::loader::load_settings_from_path(&args.settings_path())
        .context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    init_subscriber(
        &settings.logging.level,
        LogFormat::from_json_flag(settings.logging.json),
    );

    let metrics = herald_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    // Ledger
    let db_path = herald_settings::loader::resolve_path(&settings.ledger.db_path);
    ensure_parent_dir(&db_path)?;
    let ledger = DeliveryLedger::open(&db_path, &connection_config(&settings.ledger))
        .with_context(|| format!("Failed to open ledger at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "delivery ledger opened");

    // Pipeline (adapters built from settings)
    let pipeline = Pipeline::builder(ledger).settings(&settings).build();

    // Events accepted before the last exit but never settled
    let recovery = pipeline
        .recover()
        .await
        .context("Failed to recover unfinished deliveries")?;
    tracing::info!(
        scanned = recovery.scanned,
        resumed_events = recovery.resumed_events,
        resumed_tasks = recovery.resumed_tasks,
        "startup recovery complete"
    );

    let mut background = Vec::new();
    if settings.digest.enabled {
        let period = Duration::from_secs(settings.digest.period_secs);
        let scheduler = Arc::new(pipeline.digest_scheduler(period));
        background.push(digest::spawn(scheduler, pipeline.shutdown_token()));
        tracing::info!(period_secs = settings.digest.period_secs, "digest scheduler started");
    } else {
        tracing::info!("digest scheduler disabled in settings");
    }

    let config = ServerConfig::from_settings(&settings.server);
    let timeout = config.shutdown_timeout();
    let server = Arc::new(HeraldServer::new(config, pipeline.clone()).with_metrics(metrics));
    let coordinator = server.shutdown().clone();

    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                tracing::error!(error = %e, "server stopped");
            }
        })
    };
    background.push(serving);

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutting down...");
        }
        () = pipeline.halt().halted() => {
            tracing::error!(
                reason = %pipeline.halt().reason().unwrap_or_default(),
                "pipeline halted on ledger fault, shutting down"
            );
        }
    }

    let drained = pipeline.shutdown(timeout).await;
    if !drained {
        tracing::warn!(pending = pipeline.pending_tasks(), "in-flight deliveries did not finish");
    }
    let _ = coordinator.graceful_shutdown(background, Some(timeout)).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["herald-agent"]);
        let mut settings = HeraldSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 8470);
        assert_eq!(settings.ledger.db_path, "ledger.db");
        assert!(!settings.logging.json);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "herald-agent",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--db-path",
            "/tmp/herald.db",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = HeraldSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.ledger.db_path, "/tmp/herald.db");
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["herald-agent", "--config", "/etc/herald.json"]);
        assert_eq!(cli.settings_path(), PathBuf::from("/etc/herald.json"));
    }

    #[test]
    fn default_settings_path_under_herald_dir() {
        let cli = Cli::parse_from(["herald-agent"]);
        let path = cli.settings_path();
        assert!(path.to_string_lossy().contains(".herald"));
        assert!(path.to_string_lossy().ends_with("settings.json"));
    }

    #[test]
    fn connection_config_from_settings() {
        let cfg = connection_config(&LedgerSettings {
            db_path: "x.db".into(),
            pool_size: 3,
            busy_timeout_ms: 500,
        });
        assert_eq!(cfg.pool_size, 3);
        assert_eq!(cfg.busy_timeout_ms, 500);
        assert_eq!(cfg.cache_size_kib, ConnectionConfig::default().cache_size_kib);
    }

    #[test]
    fn ensure_parent_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("ledger.db");
        ensure_parent_dir(&path).unwrap();
        assert!(path.parent().unwrap().exists());
    }
}

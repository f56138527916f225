//! # tracker-gateway
//!
//! Gateway binary: loads settings, starts the HTTP/WebSocket server and
//! tears down terminals and supervised services on exit.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracker_server::GatewayServer;
use tracker_settings::GatewaySettings;

/// Desktop capture gateway.
#[derive(Parser, Debug)]
#[command(name = "tracker-gateway", about = "Desktop capture event-log gateway")]
struct Cli {
    /// JSON settings file, deep-merged over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding one subdirectory per session.
    #[arg(long)]
    sessions_dir: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Flags win over file and environment.
    fn apply(self, settings: &mut GatewaySettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = self.sessions_dir {
            settings.sessions.root = dir;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = tracker_settings::load_settings(args.config.as_deref())
        .context("Failed to load settings")?;
    args.apply(&mut settings);
    tracker_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);

    tokio::fs::create_dir_all(&settings.sessions.root).await.with_context(|| {
        format!(
            "Failed to create sessions directory: {}",
            settings.sessions.root.display()
        )
    })?;
    let sessions_root = settings.sessions.root.clone();

    let server = GatewayServer::new(settings);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        sessions = %sessions_root.display(),
        "tracker gateway listening on http://{addr}"
    );

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    server.close().await;
    server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(Duration::from_secs(5)))
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["tracker-gateway"]);
        assert!(cli.config.is_none());
        let mut settings = GatewaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 6060);
        assert_eq!(settings.sessions.root, PathBuf::from("sessions"));
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "tracker-gateway",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--sessions-dir",
            "/tmp/sessions",
            "--log-level",
            "debug",
        ]);
        let mut settings = GatewaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.sessions.root, PathBuf::from("/tmp/sessions"));
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["tracker-gateway", "--config", "/etc/tracker.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tracker.json")));
    }

    #[test]
    fn cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["tracker-gateway", "--port", "70000"]).is_err());
    }

    #[tokio::test]
    async fn server_graceful_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = GatewaySettings::default();
        settings.server.port = 0;
        settings.sessions.root = dir.path().to_path_buf();

        let server = GatewayServer::new(settings);
        let (addr, handle) = server.listen().await.unwrap();

        let status: serde_json::Value = reqwest::get(format!("http://{addr}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["backend"], true);

        server.close().await;
        let started = std::time::Instant::now();
        server
            .shutdown()
            .graceful_shutdown(vec![handle], Some(Duration::from_secs(5)))
            .await;
        assert!(started.elapsed() < Duration::from_secs(5), "server did not drain");
        assert!(server.shutdown().is_shutting_down());
        assert!(reqwest::get(format!("http://{addr}/status")).await.is_err());
    }
}

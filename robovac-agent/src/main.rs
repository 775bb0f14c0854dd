//! Robovac Agent - command line entry point
//!
//! - `robovac-agent discover`: one discovery window, records printed as JSON
//! - `robovac-agent inspect <file.json>`: classify a captured data-point dump
//! - `robovac-agent init`: write the current (or default) config to its file
//! - `robovac-agent [run]`: discovery, device sessions and the MQTT bridge

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use robovac_agent::cloud::{self, StaticDirectory};
use robovac_agent::transport::TuyaConnector;
use robovac_agent::{
    bridge, AgentConfig, DataPointSnapshot, DeviceRegistry, DeviceView, DiscoveryListener,
};

const DEFAULT_LOG_FILTER: &str = "robovac_agent=info";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("run") => run().await,
        Some("discover") => discover().await,
        Some("init") => init().await,
        Some("inspect") => match args.get(1) {
            Some(path) => inspect(Path::new(path)).await,
            None => bail!("usage: robovac-agent inspect <file.json>"),
        },
        Some(other) => bail!("unknown command '{other}', expected run, discover, inspect or init"),
    }
}

async fn discover() -> Result<()> {
    let config = AgentConfig::load().await.context("Failed to load configuration")?;
    let found = DiscoveryListener::new(config.discovery).discover().await;

    let records: Vec<_> = found.values().collect();
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn init() -> Result<()> {
    let config = AgentConfig::load().await.context("Failed to load configuration")?;
    let path = config.save().await.context("Failed to write configuration")?;
    println!("{}", path.display());
    Ok(())
}

async fn inspect(path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    // Accept either a bare data-point map or a full status reply with "dps".
    let raw: serde_json::Value = serde_json::from_str(&content).context("Invalid JSON")?;
    let dps = raw.get("dps").cloned().unwrap_or(raw);
    let snapshot: DataPointSnapshot =
        serde_json::from_value(dps).context("Not a data-point map")?;

    let (rule, activity) = robovac_agent::activity::explain(&snapshot);
    info!("Classified as {} by rule {}", activity, rule);

    let device_id = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let view = DeviceView::new(device_id, Some(&snapshot));
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn run() -> Result<()> {
    info!("Robovac Agent v{} starting", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load().await.context("Failed to load configuration")?;

    let directory = StaticDirectory::new(config.devices.clone());
    let credentials = cloud::resolve_credentials(&directory)
        .await
        .context("Failed to resolve device keys")?;
    if credentials.is_empty() {
        warn!("No devices configured; add [[devices]] entries to the config file");
    }

    let discovered = DiscoveryListener::new(config.discovery.clone()).discover().await;

    let connector = TuyaConnector {
        port: config.session.device_port,
        timeout: config.session.transport_timeout(),
    };
    let registry = Arc::new(
        DeviceRegistry::setup(&connector, &credentials, &discovered, &config.session).await,
    );

    if config.mqtt.enabled {
        tokio::select! {
            result = bridge::run(&config.mqtt, registry.clone()) => {
                result.context("MQTT bridge failed")?;
            }
            _ = tokio::signal::ctrl_c() => info!("Shutting down"),
        }
    } else {
        for handle in registry.handles() {
            tokio::spawn(log_state_changes(handle.clone()));
        }
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutting down");
    }

    Ok(())
}

/// Without a broker, activity changes are only logged.
async fn log_state_changes(handle: robovac_agent::SessionHandle) {
    let mut updates = handle.subscribe();
    let mut last = None;
    loop {
        let view = handle.view();
        if last != Some(view.activity) {
            info!(
                "{}: {} (battery {:?})",
                handle.device_id(),
                view.activity,
                view.battery
            );
            last = Some(view.activity);
        }
        if updates.changed().await.is_err() {
            break;
        }
    }
}

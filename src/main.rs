//! IoT Device Discovery - one-shot discovery run
//!
//! Runs the configured discovery once and prints the ranked device
//! snapshot as JSON. An optional first argument overrides `DISCOVERY_SCOPE`.

use iot_discovery::{EngineConfig, EngineState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iot_discovery=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting IoT discovery v{}", env!("CARGO_PKG_VERSION"));

    let mut config = EngineConfig::default();
    if let Some(scope) = std::env::args().nth(1) {
        config.scope = scope;
    }

    let state = EngineState::from_config(config)?;
    tracing::info!(
        scope = %state.config.scope,
        probes = ?state.discovery.catalog().names(),
        per_probe_timeout_ms = state.config.per_probe_timeout_ms,
        overall_timeout_ms = state.config.overall_timeout_ms,
        "Configuration loaded"
    );

    let restored = state.restore().await?;
    if restored > 0 {
        tracing::info!(devices = restored, "Stored evidence replayed");
    }

    let report = state.discovery.discover(state.config.default_request()).await?;

    let saved = state.persist().await?;
    if saved > 0 {
        tracing::info!(devices = saved, "Registry persisted");
    }

    let devices: Vec<serde_json::Value> = state
        .registry
        .list(state.config.min_confidence)
        .await
        .into_iter()
        .map(|profile| {
            serde_json::json!({
                "likely_iot": profile.is_likely_iot(),
                "profile": profile,
            })
        })
        .collect();

    let output = serde_json::json!({
        "run_id": report.run_id,
        "status": report.status,
        "summary": report.summary,
        "failures": report.failures,
        "devices": devices,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

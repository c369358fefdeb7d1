//! Scenario preview client.
//!
//! Connects to a running `preview_server`, asks for the scenario titles,
//! then requests a preview of the first one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use simbus::{Gateway, CH_CORE_SCENARIO_TITLES, CH_SCENARIO_PREVIEW, DEFAULT_PORT};

async fn request_and_wait(gateway: &Gateway, channel: &str, payload: Value) -> simbus::Result<Value> {
    let slot: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let slot_clone = slot.clone();
    gateway
        .request(channel, payload, move |_conn, envelope| {
            *slot_clone.lock().unwrap() = Some(envelope.payload.clone());
        })
        .await?;

    for _ in 0..100 {
        if let Some(value) = slot.lock().unwrap().take() {
            return Ok(value);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Err(simbus::SimbusError::Protocol(format!(
        "no reply on {channel} within 5s"
    )))
}

#[tokio::main]
async fn main() -> simbus::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let gateway = Gateway::connect("127.0.0.1", DEFAULT_PORT).await?;
    tracing::info!("connected");

    let titles = request_and_wait(&gateway, CH_CORE_SCENARIO_TITLES, json!(null)).await?;
    tracing::info!(%titles, "scenario titles");

    let first = titles["titles"][0][1].as_str().unwrap_or("europe-1814");
    let preview = request_and_wait(&gateway, CH_SCENARIO_PREVIEW, json!(first)).await?;
    tracing::info!(%preview, "scenario preview");

    gateway.disconnect();
    Ok(())
}

//! Scenario preview server.
//!
//! Listens on the default port and answers two request channels:
//!
//! - `general.core.scenarios.titles`: the list of available scenarios
//! - `general.scenario.preview`: a small preview of one scenario
//!
//! Run with `cargo run --example preview_server`, then start
//! `preview_client` in another terminal.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing_subscriber::EnvFilter;

use simbus::{
    ChannelRouter, Connection, ConnectionEvent, Envelope, Listener, Scope,
    CH_CORE_SCENARIO_TITLES, CH_SCENARIO_PREVIEW, DEFAULT_PORT,
};

fn reply(conn: &Connection, envelope: &Envelope, payload: serde_json::Value) {
    let Some(reply_to) = envelope.reply_to.as_deref() else {
        tracing::warn!(channel = %envelope.channel, "request without reply_to, dropping");
        return;
    };
    if let Err(e) = conn.try_send(&Envelope::new(reply_to, payload)) {
        tracing::warn!(connection = %conn.id(), error = %e, "failed to queue reply");
    }
}

fn build_router() -> ChannelRouter {
    let mut router = ChannelRouter::new();

    router
        .subscribe(CH_CORE_SCENARIO_TITLES, |conn, envelope| {
            reply(
                conn,
                envelope,
                json!({
                    "titles": [
                        ["Europe 1814", "europe-1814"],
                        ["Colonies 1600", "colonies-1600"],
                    ]
                }),
            );
        })
        .unwrap();

    router
        .subscribe(CH_SCENARIO_PREVIEW, |conn, envelope| {
            let scenario = envelope.payload.as_str().unwrap_or("unknown");
            tracing::info!(%scenario, "preview requested");
            reply(
                conn,
                envelope,
                json!({
                    "scenario": scenario,
                    "map_size": [100, 60],
                    "nations": ["France", "Prussia", "Austria"],
                }),
            );
        })
        .unwrap();

    router
}

#[tokio::main]
async fn main() -> simbus::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let (listener, mut incoming) = Listener::start(DEFAULT_PORT, Scope::Local).await?;
    tracing::info!(addr = %listener.local_addr(), "preview server ready");

    while let Some(mut accepted) = incoming.recv().await {
        tokio::spawn(async move {
            let router = Arc::new(Mutex::new(build_router()));
            while let Some(event) = accepted.events.recv().await {
                match event {
                    ConnectionEvent::Message(envelope) => {
                        router
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .dispatch(&accepted.connection, &envelope);
                    }
                    ConnectionEvent::Disconnected => {
                        tracing::info!(connection = %accepted.connection.id(), "client left");
                        return;
                    }
                    _ => {}
                }
            }
        });
    }
    Ok(())
}

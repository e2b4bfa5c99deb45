//! obs-websocket connection and stream state forwarding

use anyhow::{Context, Result};
use futures::StreamExt;
use obws::events::{Event, OutputState};
use obws::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ObsConfig;
use crate::sync::SessionSignal;

/// Connect to the obs-websocket server
pub async fn connect(config: &ObsConfig) -> Result<Client> {
    let client = Client::connect(&config.host, config.port, config.password.as_deref())
        .await
        .with_context(|| {
            format!(
                "Failed to connect to OBS WebSocket at {}:{}",
                config.host, config.port
            )
        })?;
    info!("Connected to OBS WebSocket at {}:{}", config.host, config.port);
    Ok(client)
}

/// Whether OBS is streaming right now
pub async fn streaming_active(client: &Client) -> Result<bool> {
    let status = client
        .streaming()
        .status()
        .await
        .context("Failed to query OBS stream status")?;
    Ok(status.active)
}

/// Subscribe to OBS events and forward stream start/stop as session signals.
///
/// OBS shutting down counts as a stop. The channel closes when the
/// websocket connection ends.
pub fn subscribe_session_signals(client: &Client) -> Result<mpsc::UnboundedReceiver<SessionSignal>> {
    let raw_events = client
        .events()
        .context("Failed to subscribe to OBS events")?;

    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        tokio::pin!(raw_events);

        while let Some(event) = raw_events.next().await {
            let signal = match event {
                Event::StreamStateChanged { active, state } => match state {
                    OutputState::Started if active => Some(SessionSignal::Started),
                    OutputState::Stopped if !active => Some(SessionSignal::Stopped),
                    _ => None,
                },
                Event::ExitStarted => Some(SessionSignal::Stopped),
                _ => None,
            };

            if let Some(signal) = signal {
                debug!("OBS event forwarded as {:?}", signal);
                if tx.send(signal).is_err() {
                    break;
                }
            }
        }

        warn!("OBS event stream ended");
    });

    Ok(rx)
}

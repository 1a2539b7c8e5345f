use anyhow::{Context, Result};
use tokio::signal;

use trade_notify_client::config::Settings;
use trade_notify_client::telemetry::init_telemetry;
use trade_notify_client::{Event, NotificationClient};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("Failed to load configuration")?;
    init_telemetry(&settings.telemetry)?;
    tracing::info!(endpoint = %settings.client.endpoint, "Configuration loaded");

    let token = settings
        .tail
        .token
        .clone()
        .context("No credential configured; set NOTIFY_TAIL__TOKEN")?;

    let client = NotificationClient::new(settings.client.clone())?;

    for event_type in &settings.tail.event_types {
        client.subscribe(event_type.as_str(), |event: &Event| {
            match serde_json::to_string(&event.payload) {
                Ok(payload) => tracing::info!(
                    event_type = %event.event_type,
                    payload = %payload,
                    "Event received"
                ),
                Err(e) => tracing::warn!(error = %e, "Failed to render event payload"),
            }
        });
    }
    tracing::info!(event_types = ?settings.tail.event_types, "Subscriptions registered");

    // Log every state transition until the client goes away
    let mut states = client.watch_state();
    let state_logger = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!(state = %state, "Connection state changed");
        }
    });

    client.connect(token);

    shutdown_signal().await;

    client.disconnect();
    drop(client);
    state_logger.abort();

    tracing::info!("Tail shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down");
        }
    }
}

//! Developer preview: log the rolling code for a ticket until Ctrl-C.
//!
//! ```text
//! QR_API_BASE=https://tickets.example.com cargo run --bin qr-preview -- TICKET-42
//! ```

use anyhow::Context;
use std::time::Duration;
use ticket_qr::{QrConfig, QrDisplay, RollingQr};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticket_qr=info,rolling_qr_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let ticket_id = std::env::args()
        .nth(1)
        .context("usage: qr-preview <ticket-id>")?;

    let config = QrConfig::from_env();
    config.validate().context("invalid QR configuration")?;
    info!(api_base = %config.api_base, "Starting QR preview");

    let qr = RollingQr::from_config(&config)?;
    qr.start(ticket_id.as_str()).await?;

    let mut interval = tokio::time::interval(config.tick_interval);
    let mut last_shown: Option<QrDisplay> = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let display = qr.current_state().await;
                if last_shown.as_ref() != Some(&display) {
                    match &display {
                        QrDisplay::Generating => info!("Generating..."),
                        QrDisplay::Live { token } => info!(%token, "Live"),
                        QrDisplay::Unavailable { kind, diagnostic } => {
                            info!(?kind, %diagnostic, "Unavailable");
                        }
                    }
                    last_shown = Some(display);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    qr.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use presence_rpc::prelude::*;
use tracing::{info, warn};

/// Used when neither an argument nor `PRESENCE_APP_ID` is given.
const DEFAULT_APP_ID: &str = "424087019149328395";

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn log_message(message: &Message) {
    match message {
        Message::Ready(ready) => info!(
            user = %ready.user.display_name(),
            environment = %ready.config.environment,
            "connected to desktop application"
        ),
        Message::Close(close) => warn!(code = close.code, reason = %close.reason, "connection closed"),
        Message::Error(error) => warn!(code = error.code, message = %error.message, "peer error"),
        Message::ConnectionFailed { pipe } => info!(?pipe, "desktop application not found, retrying"),
        Message::PresenceUpdate(update) => info!(name = %update.name, "presence accepted"),
        Message::Fatal(fatal) => warn!(reason = %fatal.reason, "client stopped"),
        other => info!(kind = ?other.kind(), "message"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=debug shows the worker's state transitions.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let app_id = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PRESENCE_APP_ID").ok())
        .unwrap_or_else(|| DEFAULT_APP_ID.to_owned());

    let client = RpcClient::builder(app_id).build();
    client.on_any(log_message);
    client.connect()?;

    client.set_presence(
        &RichPresence::new()
            .with_details("Watching the console")
            .with_state("Round 1")
            .with_timestamps(Timestamps {
                start: Some(unix_now()),
                end: None,
            }),
    )?;

    let mut ticker = tokio::time::interval(Duration::from_secs(15));
    ticker.tick().await;
    let mut round = 1;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                round += 1;
                client.update_presence(|p| p.state = Some(format!("Round {round}")))?;
            }
        }
    }

    info!("shutting down");
    client.close().await;
    Ok(())
}

//! Plaza presence client binary.
//!
//! Connects one identity to the realtime channel, optionally joins an event
//! room, replays a recorded position track as the device sensor, and logs
//! connection, presence and tracking changes until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Watch presence without publishing a position
//! plaza --user-id alice
//!
//! # Publish a replayed track into an event room
//! plaza --user-id alice --event-id evt-1 --track walk.csv --sample-interval-ms 2000
//! ```

mod replay;

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use plaza_client::{Runtime, SessionConfig, SystemEnv, transport::WsDriver};
use plaza_core::{ChannelConfig, PresenceConfig, UserId, channel::DEFAULT_ENDPOINT};
use plaza_proto::BroadcastKind;
use tokio::sync::{broadcast, watch};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::replay::ReplaySource;

/// Plaza realtime presence client
#[derive(Parser, Debug)]
#[command(name = "plaza")]
#[command(about = "Share and follow live locations over the Plaza realtime channel")]
#[command(version)]
struct Args {
    /// Realtime endpoint base URL
    #[arg(long, env = "PLAZA_WS_URL", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Identity to connect as
    #[arg(short, long, env = "PLAZA_USER_ID")]
    user_id: String,

    /// Event room to join once connected
    #[arg(short, long)]
    event_id: Option<String>,

    /// Track file to replay as device positions (`lat,lng[,accuracy]` per line)
    #[arg(short, long)]
    track: Option<PathBuf>,

    /// Pause between replayed positions
    #[arg(long, default_value = "5000")]
    sample_interval_ms: u64,

    /// Fixed delay before each reconnect attempt
    #[arg(long, default_value = "3000")]
    reconnect_delay_ms: u64,

    /// Reconnect attempts before giving up
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Drop other users' positions not refreshed within this window
    #[arg(long)]
    stale_after_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            channel: ChannelConfig {
                endpoint: self.endpoint.clone(),
                reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
                max_retries: self.max_retries,
            },
            presence: PresenceConfig { stale_after: self.stale_after_secs.map(Duration::from_secs) },
            ..SessionConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let fixes = match &args.track {
        Some(path) => replay::load_track(path)?,
        None => Vec::new(),
    };
    tracing::info!(endpoint = %args.endpoint, user_id = %args.user_id, fixes = fixes.len(), "Plaza client starting");

    let source =
        ReplaySource::new(SystemEnv::new(), fixes, Duration::from_millis(args.sample_interval_ms));
    let mut runtime = Runtime::new(WsDriver::new(source), SystemEnv::new(), args.session_config());

    for kind in BroadcastKind::ALL {
        runtime.session_mut().subscribe(kind, move |payload| {
            tracing::info!(%kind, %payload, "broadcast");
        });
    }

    spawn_view_loggers(&runtime);

    runtime.connect(UserId::new(args.user_id.clone())).await?;

    if let Some(event_id) = &args.event_id {
        runtime.join_event(event_id).await?;
    }

    if let Err(error) = runtime.start_tracking().await {
        tracing::warn!(%error, "not publishing a position");
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            let _ = stop_tx.send(true);
        }
    });

    runtime.run(stop_rx).await?;

    Ok(())
}

/// Log every change of the runtime's reactive views, and every tracking
/// failure as it happens.
fn spawn_view_loggers(runtime: &Runtime<WsDriver<ReplaySource<SystemEnv>>, SystemEnv>) {
    let mut state = runtime.connection_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            tracing::info!(state = %current, "connection");
        }
    });

    let mut presence = runtime.presence();
    tokio::spawn(async move {
        while presence.changed().await.is_ok() {
            let total = presence.borrow_and_update().len();
            tracing::debug!(total, "presence");
        }
    });

    let mut others = runtime.others();
    tokio::spawn(async move {
        while others.changed().await.is_ok() {
            let records = others.borrow_and_update().clone();
            tracing::info!(others = records.len(), "nearby");
            for record in &records {
                tracing::debug!(
                    user_id = %record.user_id,
                    lng = record.coordinates[0],
                    lat = record.coordinates[1],
                    timestamp = %record.timestamp,
                    "position"
                );
            }
        }
    });

    let mut tracking = runtime.tracking();
    tokio::spawn(async move {
        while tracking.changed().await.is_ok() {
            let status = tracking.borrow_and_update().clone();
            match &status.last_fix {
                Some(fix) => tracing::info!(
                    tracking = status.tracking,
                    lng = fix.coordinates[0],
                    lat = fix.coordinates[1],
                    "tracking"
                ),
                None => tracing::info!(tracking = status.tracking, "tracking"),
            }
        }
    });

    let mut errors = runtime.tracking_errors();
    tokio::spawn(async move {
        loop {
            match errors.recv().await {
                Ok(error) => tracing::warn!(%error, "tracking failed"),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "tracking failures dropped");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

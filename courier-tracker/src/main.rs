use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{OptionExt, eyre};
use courier_core::wire::ParcelStatusUpdate;
use courier_core::{ParcelId, PositionSample};
use courier_tracker::api::{self, ApiState};
use courier_tracker::{
    AuthContext, BackendClient, BatteryConfig, Config, FeedSource, PositionSource,
    SimulatedSource, SourceConfig, SysfsBattery, Tracker, TrackingAgent,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "courier-tracker")]
#[command(about = "Courier driver location tracker")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "courier-tracker.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the tracker and its local HTTP API (default)
    Run,
    /// Print the running tracker's state
    Status,
    /// List parcels assigned to the driver
    Parcels,
    /// Update a parcel's status, tagged with the driver's position
    UpdateParcel {
        id: u64,
        status: String,
        /// Latitude; defaults to the running tracker's last position
        #[arg(long, requires = "lng", allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lng: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tracing=info,courier_tracker=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Status => print_status(config.server.http_addr).await,
        Command::Parcels => list_parcels(&config).await,
        Command::UpdateParcel {
            id,
            status,
            lat,
            lng,
        } => update_parcel(&config, ParcelId(id), status, lat.zip(lng)).await,
    }
}

fn backend_client(config: &Config) -> color_eyre::Result<(BackendClient, AuthContext)> {
    let auth = AuthContext::new(config.backend.resolve_token());
    if !auth.is_authenticated() {
        warn!("No bearer token configured, backend calls will be refused until one is set");
    }
    let client = BackendClient::new(
        &config.backend.base_url,
        auth.clone(),
        config.backend.timeout(),
    )?;
    Ok((client, auth))
}

async fn run(config: Config) -> color_eyre::Result<()> {
    let (client, auth) = backend_client(&config)?;

    info!(
        backend = %config.backend.base_url,
        http_addr = %config.server.http_addr,
        interval_secs = config.tracking.interval.as_secs(),
        auto_resume = config.tracking.auto_resume,
        "Starting courier-tracker"
    );

    match config.source.clone() {
        SourceConfig::Simulated {
            start_lat,
            start_lng,
            interval_ms,
            speed_mps,
        } => {
            info!(start_lat, start_lng, interval_ms, speed_mps, "Using simulated position source");
            let source = SimulatedSource::new(
                start_lat,
                start_lng,
                speed_mps,
                Duration::from_millis(interval_ms),
            );
            run_tracker(config, source, None, client, auth).await
        }
        SourceConfig::Feed => {
            info!("Using pushed position feed");
            let feed = FeedSource::new();
            run_tracker(config, feed.clone(), Some(feed), client, auth).await
        }
    }
}

async fn run_tracker<P: PositionSource>(
    config: Config,
    source: P,
    feed: Option<FeedSource>,
    client: BackendClient,
    auth: AuthContext,
) -> color_eyre::Result<()> {
    let agent = TrackingAgent::new(source, Arc::new(client), config.tracking.clone());
    let agent = match &config.battery {
        BatteryConfig::None => agent,
        BatteryConfig::Sysfs { path, poll_secs } => {
            info!(path = ?path, poll_secs, "Using sysfs battery");
            agent.with_battery(SysfsBattery::new(path, Duration::from_secs(*poll_secs)))
        }
    };

    let cancel = CancellationToken::new();
    let (tracker, tracker_handle) = Tracker::spawn(agent, &auth, cancel.clone());

    // HTTP server
    let http_addr = config.server.http_addr;
    let axum_app = api::router(ApiState {
        tracker,
        auth,
        feed,
    });
    let axum_listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(axum_listener, axum_app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    cancel.cancel();
    let _ = tracker_handle.await;

    info!("courier-tracker shut down complete");
    Ok(())
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct LastPosition {
    last_position: Option<PositionSample>,
}

async fn print_status(http_addr: SocketAddr) -> color_eyre::Result<()> {
    let snapshot: serde_json::Value = reqwest::get(format!("http://{http_addr}/tracking"))
        .await?
        .error_for_status()?
        .json()
        .await?;
    println!("{}", serde_json::to_string_pretty(&snapshot["data"])?);
    Ok(())
}

async fn list_parcels(config: &Config) -> color_eyre::Result<()> {
    let (client, _auth) = backend_client(config)?;
    let parcels = client.assigned_parcels().await?;

    if parcels.is_empty() {
        println!("No parcels assigned");
        return Ok(());
    }

    for parcel in parcels {
        let pickup = match (parcel.pickup_location_lat, parcel.pickup_location_lng) {
            (Some(lat), Some(lng)) => format!("{lat:.5},{lng:.5}"),
            _ => "-".to_string(),
        };
        println!(
            "{:>8}  {:<16} {:<14} {:<22} {}",
            parcel.id,
            parcel.tracking_number,
            parcel.status,
            pickup,
            parcel.recipient_name.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn update_parcel(
    config: &Config,
    parcel: ParcelId,
    status: String,
    coordinates: Option<(f64, f64)>,
) -> color_eyre::Result<()> {
    let (lat, lng) = match coordinates {
        Some(coordinates) => coordinates,
        None => last_known_position(config.server.http_addr).await?,
    };

    let (client, _auth) = backend_client(config)?;
    let update = ParcelStatusUpdate {
        status: status.into(),
        location_lat: Some(lat),
        location_lng: Some(lng),
    };
    let ack = client.update_parcel_status(parcel, &update).await?;

    info!(parcel_id = %parcel, lat, lng, "Parcel status updated");
    println!(
        "{}",
        ack.message
            .as_deref()
            .or(ack.status.as_deref())
            .unwrap_or("updated")
    );
    Ok(())
}

/// Position from a running tracker's snapshot.
async fn last_known_position(http_addr: SocketAddr) -> color_eyre::Result<(f64, f64)> {
    let envelope: Envelope<LastPosition> = reqwest::get(format!("http://{http_addr}/tracking"))
        .await
        .map_err(|e| eyre!("tracker at {http_addr} is not reachable ({e}), pass --lat and --lng"))?
        .error_for_status()?
        .json()
        .await?;

    let position = envelope
        .data
        .and_then(|d| d.last_position)
        .ok_or_eyre("tracker has no position yet, pass --lat and --lng")?;
    Ok((position.latitude, position.longitude))
}

//! Main Entrypoint for the Pepper Host Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Building the tool registry and the simulated robot.
//! 3. Starting the audio player and the realtime session supervisor.
//! 4. Constructing the Axum control surface and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use pepper_core::{
    AudioQueue, CoordinatorSnapshot, InMemoryLocations, SimulatedActuator, ToolRegistry,
    tools::dispatcher::DEFAULT_WORKERS,
};
use pepper_host::{
    audio::{AudioHub, HubDevice, MIC_BUFFER},
    config::{Config, load_instructions},
    router::create_router,
    session::{Host, HostChannels, supervise},
    state::AppState,
    touch::TouchDebouncer,
};
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    name = "host",
    about = "Voice interaction host for a Pepper robot",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Address for the control surface; overrides BIND_ADDRESS
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Directory holding system_prompt.md; overrides PROMPTS_PATH
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Concurrent tool executions
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Speed-up for simulated robot actions (2.0 runs twice as fast)
    #[arg(long, default_value_t = 1.0)]
    time_scale: f64,
}

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to install Ctrl+C handler");
            }
        }
        _ = shutdown.wait_for(|stop| *stop) => {}
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(prompts) = cli.prompts {
        config.prompts_path = prompts;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing host...");

    // --- 3. Initialize Tools and Robot ---
    let instructions = load_instructions(&config.prompts_path);
    let registry = Arc::new(ToolRegistry::with_builtins());
    let actuator = Arc::new(SimulatedActuator::new(cli.time_scale));
    let locations = Arc::new(InMemoryLocations::default());
    info!(tools = ?registry.names(), "Tool registry ready");

    // --- 4. Start Audio and the Session Supervisor ---
    let (mic_tx, mic_rx) = mpsc::channel::<Bytes>(MIC_BUFFER);
    let hub = AudioHub::new(mic_tx);
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();
    let audio = Arc::new(
        AudioQueue::new(Box::new(HubDevice::new(hub.clone())), Some(playback_tx))
            .context("Failed to start audio player")?,
    );

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let snapshot = Arc::new(watch::channel(CoordinatorSnapshot::default()).0);

    let host = Host {
        endpoint: config.endpoint(),
        settings: config.session_settings(instructions),
        registry,
        actuator,
        locations,
        audio,
        hub: hub.clone(),
        snapshot: snapshot.clone(),
        workers: cli.workers,
    };
    let channels = HostChannels {
        commands: commands_rx,
        playback: playback_rx,
        mic: mic_rx,
        shutdown: shutdown_rx.clone(),
    };
    let supervisor = tokio::spawn(supervise(host, channels));

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        commands: commands_tx,
        snapshot,
        touch: Arc::new(TouchDebouncer::default()),
        audio: hub,
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.model,
        bind_address = %config.bind_address,
        "Host configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_rx))
    .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = supervisor.await {
        error!(error = %e, "Session supervisor panicked");
    }
    served?;

    info!("Host has shut down.");
    Ok(())
}

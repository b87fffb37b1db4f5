mod commands;
mod error;
mod events;
mod logging;
mod router;
mod state;

use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mdbconv::{CleanupSweeper, JobProgressBroadcaster, Orchestrator, Settings};

use state::AppState;

/// Progress events buffered per subscriber before it lags.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    mdbconv::load_dotenv();
    // Logging is configured from the settings, so fallback warnings wait for it.
    let (settings, warnings) = Settings::from_env_with_warnings();

    if let Err(e) = logging::init(&settings) {
        eprintln!("Failed to initialize logging: {}", e);
        for warning in &warnings {
            eprintln!("{}", warning);
        }
        std::process::exit(1);
    }

    info!("Starting mdbconv server v{}", env!("CARGO_PKG_VERSION"));
    for warning in &warnings {
        warn!("{}", warning);
    }
    settings.log_summary();

    if let Err(e) = serve(settings).await {
        error!("Server stopped with error: {}", e);
        std::process::exit(1);
    }
}

async fn serve(settings: Settings) -> Result<(), BoxError> {
    let addr = settings.bind_address();
    let broadcaster = JobProgressBroadcaster::new(EVENT_CHANNEL_CAPACITY);
    let orchestrator = Arc::new(Orchestrator::from_settings(settings, broadcaster.clone()));

    let sweeper = CleanupSweeper::new(Arc::clone(&orchestrator));
    sweeper.start()?;

    let state = Arc::new(AppState::new(Arc::clone(&orchestrator), broadcaster));
    let shutdown = state.shutdown.clone();
    let app = router::build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await;

    info!("Waiting for queued conversions to finish");
    tokio::task::spawn_blocking(move || {
        sweeper.stop();
        orchestrator.shutdown();
    })
    .await?;
    info!("Shutdown complete");

    served.map_err(Into::into)
}

async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        // Without a signal handler the server can only be killed.
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    token.cancel();
}

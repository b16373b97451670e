//! gateway-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Load the backend/category descriptor file.
//! 4. Wire gateway-core's components (drivers, scheduler, orchestrator,
//!    router, registry, status bus, pipeline) and bootstrap the classifier.
//! 5. Spawn the stale-upload sweep.
//! 6. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use gateway_core::driver::speech::SpeechDriver;
use gateway_core::driver::text::TextDriver;
use gateway_core::driver::BackendDriver;
use gateway_core::orchestrator::Orchestrator;
use gateway_core::pipeline::Pipeline;
use gateway_core::registry::ModelRegistry;
use gateway_core::router::Router as ClassifierRouter;
use gateway_core::scheduler::GpuScheduler;
use gateway_core::status::StatusBus;
use gateway_core::GatewayDescriptors;

use crate::config::Config;
use crate::state::AppState;

/// How often the stale-upload sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Age beyond which a leftover transcription temp file is considered stale.
const STALE_UPLOAD_AGE: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ──────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: GATEWAY_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "gateway-server starting");

    // ── 3. Descriptor file ──────────────────────────────────────────────────
    let descriptors = GatewayDescriptors::load(&cfg.descriptors_path)?;
    info!(
        path = %cfg.descriptors_path,
        models = descriptors.models.len(),
        categories = descriptors.categories.len(),
        "descriptors loaded"
    );

    // ── 4. gateway-core components ──────────────────────────────────────────
    let status = StatusBus::new();
    let text_driver: Arc<dyn BackendDriver> = Arc::new(TextDriver::new(cfg.text_backend_path.clone()));
    let speech_driver: Arc<dyn BackendDriver> = Arc::new(SpeechDriver::new(cfg.speech_backend_path.clone()));
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&text_driver), Arc::clone(&speech_driver), status.clone()));
    let router = Arc::new(ClassifierRouter::new());
    let registry = Arc::new(ModelRegistry::new());

    let pipeline = Arc::new(Pipeline::new(descriptors, GpuScheduler::new(), orchestrator, router, registry, status));

    // The classifier is itself a local_text backend (§4.7).
    pipeline.bootstrap(text_driver.as_ref()).await;

    // ── 5. Shared application state ──────────────────────────────────────────
    let state = Arc::new(AppState { config: Arc::new(cfg.clone()), pipeline });

    // ── 6. Stale-upload sweep ─────────────────────────────────────────────────
    let sweep_dir = cfg.audio_temp_dir.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            sweep_stale_uploads(&sweep_dir).await;
        }
    });

    // ── 7. HTTP server with graceful shutdown ─────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("gateway-server stopped");
    Ok(())
}

/// Remove transcription temp files older than [`STALE_UPLOAD_AGE`] left
/// behind by a crashed or killed request (the per-request cleanup path is
/// always-run, but this sweep tolerates the process itself being killed
/// mid-request).
async fn sweep_stale_uploads(dir: &str) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir, error = %e, "failed to read audio temp dir for stale-upload sweep");
            }
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(e)) => e,
            Ok(None) => break,
            Err(e) => {
                warn!(dir, error = %e, "error iterating audio temp dir during sweep");
                break;
            }
        };

        let Ok(metadata) = entry.metadata().await else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let Ok(age) = modified.elapsed() else { continue };

        if age > STALE_UPLOAD_AGE {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!(path = %entry.path().display(), error = %e, "failed to remove stale upload");
            } else {
                info!(path = %entry.path().display(), "removed stale upload");
            }
        }
    }
}

/// Waits for whichever arrives first, Ctrl-C or (on unix) SIGTERM, so
/// `axum::serve`'s graceful-shutdown hook can start draining connections.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler failed to install");
        }
    };

    #[cfg(unix)]
    let terminated = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "sigterm handler failed to install");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminated = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("received ctrl-c; starting graceful shutdown"),
        _ = terminated => info!("received sigterm; starting graceful shutdown"),
    }
}

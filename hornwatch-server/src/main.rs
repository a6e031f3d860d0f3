//! `hornwatch`: live horn detection service.
//!
//! Opens the microphone, classifies every recorded 2 s chunk and prints one
//! report line per chunk. Recording is toggled over HTTP.

mod routes;
mod settings;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hornwatch_core::{HornEngine, ModelHandle};
use tracing::{error, info};

use crate::settings::{default_settings_path, load_settings, save_settings};
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "hornwatch", about = "Live vehicle horn detector")]
struct Args {
    /// Settings file (JSON). Defaults to the user config directory.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Trained model file; overrides the settings file.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Listen address, e.g. `127.0.0.1:5000`; overrides the settings file.
    #[arg(long)]
    bind: Option<String>,

    /// Input device name; overrides the settings file.
    #[arg(long)]
    device: Option<String>,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_settings: bool,
}

#[tokio::main]
async fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "hornwatch=info,hornwatch_core=info,hornwatch_server=info",
                )
            }),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    if let Some(model) = args.model {
        settings.model_path = model;
    }
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    if args.device.is_some() {
        settings.preferred_input_device = args.device;
    }
    settings.normalize();
    info!(
        settings_path = %settings_path.display(),
        model_path = %settings.model_path.display(),
        bind_addr = %settings.bind_addr,
        max_queue_depth = settings.max_queue_depth,
        overflow_policy = ?settings.overflow_policy,
        "settings loaded"
    );
    if args.save_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
    }

    // ── Model (fatal if missing) ──────────────────────────────────────────
    let model = ModelHandle::load(&settings.model_path)
        .with_context(|| format!("loading model {}", settings.model_path.display()))?;
    info!(model = model.classifier().describe().as_str(), "model loaded");

    // ── Engine ────────────────────────────────────────────────────────────
    let engine = Arc::new(HornEngine::new(settings.engine_config(), model));
    let starting = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || starting.start())
        .await
        .context("engine start task failed")?
        .context("opening audio input")?;

    // ── HTTP ──────────────────────────────────────────────────────────────
    let app = routes::router(AppState::new(Arc::clone(&engine)));
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let stopping = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || stopping.shutdown())
        .await
        .context("engine shutdown task failed")?;
    served.context("http server failed")?;
    info!("hornwatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

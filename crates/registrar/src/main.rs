use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use registrar::config::RegistrarConfig;
use registrar::server::create_router;
use registrar::types::RegistrarState;
use registrar::Registrar;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "REGISTRAR_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(PathBuf::from);

    let config = match &config_path {
        Some(path) => RegistrarConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RegistrarConfig::default(),
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config_path.is_none() {
        warn!("No configuration given (argument or {CONFIG_ENV}); using defaults");
    }

    let registrar = tokio::task::spawn_blocking({
        let config = config.clone();
        move || -> anyhow::Result<Registrar> {
            let registrar = Registrar::open(&config).context("opening catalog")?;
            // Startup pass to correct counters edited outside the service.
            let report = registrar.reconcile_all();
            if !report.failed.is_empty() {
                warn!(failed = report.failed.len(), "Startup reconciliation incomplete");
            }
            Ok(registrar)
        }
    })
    .await??;

    let address = format!("{}:{}", config.server.address, config.server.port);
    let state = Arc::new(RegistrarState::new(registrar, config));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!("Registrar listening on http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Registrar stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

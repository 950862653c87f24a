//! Service entry point.
//!
//! Exit codes: 0 after a clean shutdown, 1 when startup fails, 2 when the
//! saga store is unreachable.

use std::process::ExitCode;
use std::sync::Arc;

use api::{Config, LogFormat, Service, StartupError};
use common::Tenant;
use message_bus::InMemoryBroker;
use saga_store::{InMemorySagaStore, PostgresSagaStore, SagaStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve<S: SagaStore + 'static>(config: &Config, store: S) -> Result<(), StartupError> {
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StartupError::Io(std::io::Error::other(e)))?;

    let broker = Arc::new(InMemoryBroker::with_partitions(config.bus_partitions));
    let service = Service::start(config, store, broker).await?;
    let app = service.router(metrics_handle);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "saga orchestrator listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    service.stop().await;
    served?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn run(config: Config) -> Result<(), StartupError> {
    if let Some(tenant) = config.tenant.clone() {
        tracing::info!(%tenant, "serving process tenant");
        if Tenant::install_process(tenant).is_err() {
            tracing::warn!("process tenant already installed");
        }
    }

    match &config.database_url {
        Some(url) => {
            let store = PostgresSagaStore::connect(url).await?;
            store.run_migrations().await?;
            tracing::info!("saga store: postgres");
            serve(&config, store).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set; sagas are kept in memory");
            serve(&config, InMemorySagaStore::new()).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(LogFormat::Pretty);
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(1);
        }
    };
    init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "saga orchestrator stopped");
            ExitCode::from(e.exit_code())
        }
    }
}

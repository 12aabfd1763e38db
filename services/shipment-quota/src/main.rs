use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::serve;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use shipment_quota::{
    create_router, ApiState, QuotaGuard, QuotaServiceConfig, ResetScheduler, SubscriptionDatabase,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = QuotaServiceConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config);

    let schedule = config.reset_schedule()?;
    info!(
        host = %config.server_host,
        port = config.server_port,
        data_dir = %config.data_dir.display(),
        commit_mode = ?config.commit_mode,
        reset_enabled = schedule.enabled(),
        reset_day = schedule.reset_day(),
        reset_hour = schedule.reset_hour(),
        "starting shipment-quota service"
    );

    let database = Arc::new(
        SubscriptionDatabase::open(&config.data_dir, config.db_busy_timeout())
            .context("failed to open subscription database")?,
    );
    let guard = QuotaGuard::from_config(database.clone(), &config);
    let scheduler = ResetScheduler::new(database.clone(), schedule);

    if !scheduler.start() {
        warn!("monthly usage reset is not scheduled; counters reset only via fire");
    }

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("invalid server bind address")?;
    let state = Arc::new(ApiState::new(guard, scheduler.clone(), database));
    let router = create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind TCP listener")?;
    info!(%addr, "shipment-quota listening");

    serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server encountered an unrecoverable error")?;

    scheduler.stop().await;
    info!("shipment-quota service shutting down");
    Ok(())
}

fn init_tracing(config: &QuotaServiceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

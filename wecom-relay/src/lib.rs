pub mod callback;
pub mod config;
pub mod dispatcher;
pub mod env;
pub mod errors;
mod intake;
pub mod message;
mod metrics_defs;
pub mod relay;
pub mod retry;
pub mod token;
pub mod uploader;
pub mod vendor;

#[cfg(test)]
mod testutils;

use crate::config::Config;
use crate::errors::RelayError;
use crate::relay::Relay;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use shared::metrics_defs::describe_metrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

/// Serves the relay until ctrl-c, or until a listener fails.
pub async fn run(config: Config) -> Result<(), RelayError> {
    config.validate()?;
    describe_metrics(metrics_defs::ALL_METRICS);

    let relay = Relay::from_config(&config).await?;
    let app = intake::router(relay, config.max_body_bytes);

    let host = config.listener.host.as_str();
    let port = config.listener.port;
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(
        host,
        port,
        token_cache = config.token_cache.is_enabled(),
        "relay listening"
    );

    let ready = Arc::new(AtomicBool::new(true));
    let serve_ready = ready.clone();
    let relay_task = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
                serve_ready.store(false, Ordering::Relaxed);
                tracing::info!("shutting down, draining in-flight requests");
            })
            .await?;
        Ok::<(), RelayError>(())
    };

    match &config.admin_listener {
        Some(admin) => {
            let admin_ready = ready.clone();
            let admin_service = AdminService::new(move || admin_ready.load(Ordering::Relaxed));
            let admin_task = run_http_service::<_, RelayError>(&admin.host, admin.port, admin_service);

            tokio::select! {
                result = relay_task => result,
                result = admin_task => result,
            }
        }
        None => relay_task.await,
    }
}

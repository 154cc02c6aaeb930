use std::sync::Arc;

use amp_provisioner::config::AppConfig;
use amp_provisioner::memory::{InMemoryOrderRepository, LogNotifier};
use amp_provisioner::provisioner::Provisioner;
use amp_provisioner::routes;
use amp_provisioner::state::AppState;
use amp_provisioner::telemetry::init_tracing;
use amp_sdk::ApiClient;
use anyhow::Context;
use axum::Router;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env().context("invalid configuration")?;
    init_tracing(&cfg.log_filter);

    let credentials = cfg.credentials().context("invalid AMP panel settings")?;
    let client = ApiClient::builder(credentials)
        .session_ttl(cfg.session_ttl())
        .request_timeout(cfg.request_timeout())
        .build();

    let orders = InMemoryOrderRepository::new();
    let provisioner = Provisioner::new(client, orders.clone(), Arc::new(LogNotifier));

    if let Err(err) = provisioner.test_connection().await {
        warn!(error = %err, "starting without a verified panel connection");
    }

    let app: Router = routes::router(AppState::new(provisioner, orders));

    info!(
        addr = %cfg.bind_addr,
        panel = cfg.amp_hostname.as_deref().unwrap_or("unset"),
        session_ttl_secs = cfg.amp_session_ttl_secs,
        request_timeout_secs = cfg.amp_request_timeout_secs,
        "starting amp-provisioner"
    );
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("bind {}", cfg.bind_addr))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

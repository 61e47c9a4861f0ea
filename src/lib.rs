//! GitLab MR coverage - merge request coverage delta reporter.
//!
//! Listens for GitLab merge request and job webhooks, joins them into a
//! base/head coverage comparison, and keeps a single note per merge request
//! up to date with the result.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

use config::Config;
use db::store::Store;
use error::AppError;
use services::dispatcher::Dispatcher;
use services::gitlab_client::{GitLabClient, GitLabClientConfig};
use services::webhook_server::{self, WebhookState};
use services::CorrelationEngine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run the service until Ctrl-C.
pub async fn run(config: Config) -> Result<(), AppError> {
    let pool = db::initialize(&config.database_path).await?;
    let store = Store::new(pool);

    let client = GitLabClient::new(GitLabClientConfig::from(&config))?;
    let engine = Arc::new(CorrelationEngine::new(store.clone(), Arc::new(client)));
    let dispatcher = Dispatcher::new(engine);

    let router = webhook_server::build_router(WebhookState {
        store,
        dispatcher,
        webhook_secret: config.webhook_secret.as_deref().map(Arc::from),
    });

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::config_field(format!("Failed to bind to {}: {}", addr, e), "port"))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("[startup] Failed to listen for shutdown signal: {}", e);
            return;
        }
        log::info!("[startup] Shutdown requested");
        signal.cancel();
    });

    webhook_server::serve(listener, router, shutdown).await
}

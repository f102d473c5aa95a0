mod config;
mod error;
mod http;
mod repository;
mod services;
mod validators;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use http::AppState;
use repository::SnapshotStore;
use services::{
    DocumentAnalyzer, GeminiAnalyzer, ReconciliationEngine, RemoteWriteTransport, SessionManager,
};
use sheet_store::{RemoteStore, SheetStoreClient, SheetStoreConfig, UnconfiguredRemote};
use write_outbox::{Outbox, OutboxProcessor, OutboxProcessorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matrix_service=info,sheet_store=info,write_outbox=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Matrix Service");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        "Configuration loaded: HTTP port = {}, data dir = {}, remote = {}",
        config.server.http_port,
        config.storage.data_dir.display(),
        if config.sheet.endpoint_url.is_empty() { "disabled" } else { "configured" },
    );

    // Open the local snapshot store and restore the session
    let store = SnapshotStore::open(&config.storage.data_dir)
        .await
        .context("Failed to open snapshot store")?;
    let session = Arc::new(
        SessionManager::restore(store.clone())
            .await
            .context("Failed to restore session")?,
    );

    // Remote store adapter; without an endpoint the service runs
    // local-only and stays degraded.
    let remote: Arc<dyn RemoteStore> = {
        let mut sheet_config = SheetStoreConfig::new(config.sheet.endpoint_url.clone());
        sheet_config.timeout = config.sheet.timeout;
        match SheetStoreClient::new(sheet_config) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!(error = %e, "Remote store disabled - serving from local snapshot only");
                Arc::new(UnconfiguredRemote)
            }
        }
    };

    // Outbox for fire-and-forget remote writes
    let outbox = Outbox::new();
    OutboxProcessor::new(
        outbox.clone(),
        Arc::new(RemoteWriteTransport::new(remote.clone())),
        OutboxProcessorConfig {
            max_retries: config.outbox.max_retries,
            ..Default::default()
        },
    )
    .spawn();

    let engine = Arc::new(ReconciliationEngine::new(
        remote,
        store,
        session,
        outbox,
    ));

    // Warm the cache (and seed an empty remote store) in the background;
    // a slow or dead remote must not delay startup.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            match engine.fetch_members().await {
                Ok(members) => info!(count = members.len(), "Initial member fetch complete"),
                Err(e) => warn!(error = %e, "Initial member fetch failed"),
            }
        });
    }

    let analyzer: Option<Arc<dyn DocumentAnalyzer>> = match &config.insights.api_key {
        Some(api_key) => {
            info!(model = %config.insights.model, "Document analyzer enabled");
            Some(Arc::new(GeminiAnalyzer::new(
                api_key.clone(),
                config.insights.model.clone(),
            )))
        }
        None => {
            info!("Document analyzer disabled (no API key)");
            None
        }
    };

    http::start_http_server(AppState { engine, analyzer }, config.server.http_port).await
}

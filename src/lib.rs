pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use api::handlers;
pub use api::routes;

pub use error::{ExportError, GenerationError, RegistrationError};
pub use logic::{apply, BatchRegistrar, DesignEvent, DesignState, SampleCounter, TsvSerializer};
pub use model::*;
pub use store::{MemoryPersonStore, MemoryRegistry, PersonStore, PostgresPersonStore, RegistryStore};

use log::{info, warn};
use std::sync::Arc;

use crate::api::handlers::{AppState, SharedState};
use crate::config::AppConfig;

/// Wire stores and shared state from configuration.
///
/// The person store falls back to memory when no database is configured or reachable.
pub async fn build_state(config: AppConfig) -> anyhow::Result<SharedState> {
    let registry = Arc::new(MemoryRegistry::new());
    if std::env::var("WIZARD_LOAD_SEED_DATA").unwrap_or_default() == "true" {
        seed::load_seed_data(
            &registry,
            &config.registry.default_space,
            &config.registry.mcc_space,
        )
        .await?;
        info!("Seed data loaded");
    }

    let people: Arc<dyn PersonStore> = match config.database_url() {
        Some(url) => {
            let max_connections = config.database.max_connections.unwrap_or(5);
            match PostgresPersonStore::new(&url, max_connections).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!("Person store unavailable, keeping people in memory: {:#}", e);
                    Arc::new(MemoryPersonStore::new(seed::default_people()))
                }
            }
        }
        None => Arc::new(MemoryPersonStore::new(seed::default_people())),
    };

    let state = Arc::new(AppState::new(
        config,
        registry,
        Some(people),
        seed::default_vocabularies(),
    ));
    spawn_sweeper(&state);
    Ok(state)
}

/// Periodically evict idle sessions and finished jobs; stops once the state is dropped
pub fn spawn_sweeper(state: &SharedState) -> tokio::task::JoinHandle<()> {
    let period = state.config.cache.sweep_interval();
    let state = Arc::downgrade(state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(state) = state.upgrade() else {
                break;
            };
            state.sweep().await;
        }
    })
}

// Function for integration testing
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    dotenvy::dotenv().ok();

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let config = AppConfig::load()?;
    let bind_address = config.server_address();
    let state = build_state(config).await?;

    let app = crate::api::routes::create_router().with_state(state);
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}

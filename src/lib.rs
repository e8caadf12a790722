pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use api::{create_router, AppState};
pub use error::SyncError;
pub use logic::{
    AllowAllPolicy, CommitCoordinator, CommitListener, CommitOutcome, EntitySerializer,
    GraphParser, ListenerRegistry, LoggingListener, NamedQuery, NamedQueryRegistry,
    PermissionValidator, PolicyEvaluator, QueryResolver,
};
pub use model::*;
pub use store::{EntityStore, EntityTransaction, MemoryStore, StoreError};

use std::sync::Arc;

/// Build the default application state: demo schema, allow-all policy, the
/// logging listener and the demo named queries, wired explicitly.
pub fn default_app_state() -> AppState<MemoryStore> {
    AppState::new(
        Arc::new(MemoryStore::new(seed::demo_definitions())),
        Arc::new(AllowAllPolicy),
        Arc::new(ListenerRegistry::new(vec![Arc::new(LoggingListener)])),
        Arc::new(NamedQueryRegistry::new(seed::demo_named_queries())),
    )
}

// Function for integration testing
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with INFO level only (suppress DEBUG logs)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    // Load configuration
    let config = crate::config::AppConfig::load()?;

    let state = default_app_state();
    if config.seed.demo_data {
        seed::load_demo_data(&*state.store).await?;
    }

    let app = create_router().with_state(state);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}

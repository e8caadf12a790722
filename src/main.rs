use axum::serve;
use graphsync::api::routes::create_router;
use graphsync::config::AppConfig;
use graphsync::{default_app_state, seed};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new().filter_level(LevelFilter::Info).init();

    // Load configuration
    let config = AppConfig::load()?;
    log::info!(
        "configuration loaded: server={}:{}",
        config.server.host,
        config.server.port
    );

    // Explicit wiring: repository, policy evaluator, listener registry and
    // named queries are constructed once and injected by reference.
    let state = default_app_state();

    if config.seed.demo_data {
        log::info!("loading demo data");
        seed::load_demo_data(&*state.store).await?;
    }

    let app = create_router().with_state(state);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("graphsync server running on http://{bind_address}");

    serve(listener, app).await?;

    Ok(())
}

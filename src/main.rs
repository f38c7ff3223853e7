use axum::serve;
use design_wizard_rust::api::routes::create_router;
use design_wizard_rust::build_state;
use design_wizard_rust::config::AppConfig;
use log::info;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    let config = AppConfig::load()?;
    info!(
        "Configuration loaded: server={}:{}, space={}",
        config.server.host, config.server.port, config.registry.default_space
    );

    let bind_address = config.server_address();
    let state = build_state(config).await?;

    let listener = TcpListener::bind(&bind_address).await?;
    info!("Design wizard running on http://{}", bind_address);

    serve(listener, create_router().with_state(state)).await?;

    Ok(())
}

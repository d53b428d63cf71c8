use std::sync::Arc;
use vlm_serve::{
    AppState, ServiceConfig, config::ServeArgs, paligemma::PaligemmaLoader, server,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: ServeArgs = argh::from_env();
    let config = ServiceConfig::from_args(args);

    // bind first so health checks answer while the model loads
    let listener = tokio::net::TcpListener::bind(config.addr()).await?;

    log::info!("🚀 Starting the server");
    log::info!("🔥 Listening on: {}", config.addr());
    log::info!("🔧 Press Ctrl+C to stop the server");

    let loader = PaligemmaLoader::new(config.sampling.clone());
    let state = Arc::new(AppState::new(config));
    server::spawn_model_load(state.clone(), loader);

    server::serve(listener, state).await?;

    Ok(())
}

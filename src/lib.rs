pub mod api;
pub mod config;
pub mod core_state;
pub mod pipeline;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Core(#[from] core_state::CoreError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process entry point: load config, build state, serve until Ctrl-C.
pub fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("gemhos starting v{}", config::APP_VERSION);

    let app_config = config::AppConfig::load()?;
    let addr = app_config.bind_addr()?;

    // Built outside the runtime: the Ollama backend owns a blocking HTTP client.
    let core = Arc::new(core_state::CoreState::from_config(app_config)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(core.clone(), addr))?;
    drop(runtime);

    tracing::info!("gemhos stopped");
    drop(core);
    Ok(())
}

async fn serve(core: Arc<core_state::CoreState>, addr: std::net::SocketAddr) -> Result<(), StartupError> {
    let mut server = api::start_server_on(core, addr).await?;
    tracing::info!(addr = %server.session.server_addr, "Listening");

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl-C received"),
        Err(e) => tracing::error!("Cannot listen for Ctrl-C: {e}"),
    }

    server.shutdown();
    server.stopped().await;
    Ok(())
}

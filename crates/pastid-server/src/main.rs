#![doc = include_str!("../README.md")]

use clap::Parser;
use pastid_server::server::{
    app::App,
    backends::Backends,
    config::{CliArgs, ServerConfig},
    shutdown::shutdown_signal,
    telemetry::init_telemetry,
};
use tokio::net::TcpListener;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry("pastid-server")?;

    let backends = Backends::connect(&config).await?;
    let app = App::build(&config, backends);

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config.server_addr, &config);

    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.shutdown().await;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");

    providers.shutdown();
    Ok(())
}

fn log_startup_info(_addr: &str, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting paste service on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting paste service on {} (pool {}..{})",
            _addr,
            _config.refill.low_water,
            _config.refill.batch_size
        );
    }
}

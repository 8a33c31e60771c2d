use anyhow::Context;
use clap::Parser;
use pastid::{AmqpExpiryConsumer, ExpiryWorker, PgContentStore};
use pastid_server::server::{
    backends::connect_postgres,
    config::{WorkerArgs, WorkerConfig},
    shutdown::shutdown_signal,
    telemetry::{init_telemetry, record_deletion},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = WorkerArgs::parse();
    let config = WorkerConfig::try_from(args)?;

    let providers = init_telemetry("pastid-worker")?;
    let retry = config.startup_retry;

    let pool = connect_postgres(&retry, &config.database_url_text)
        .await
        .context("content database unreachable")?;
    let store = PgContentStore::new(pool);
    retry
        .run("create posts table", || store.ensure_schema())
        .await?;

    let worker = ExpiryWorker::new(Arc::new(store), config.redelivery)
        .with_observer(|disposition| record_deletion(disposition.as_str()));

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    #[cfg(feature = "tracing")]
    tracing::info!(
        "Deletion worker started (max {} attempts, retry after {:?})",
        config.redelivery.max_attempts,
        config.redelivery.retry_delay
    );

    let result = loop {
        let consumer = match retry
            .run("connect to rabbitmq", || {
                AmqpExpiryConsumer::connect(&config.rabbitmq_url, config.topology.clone())
            })
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => break Err(e),
        };
        match consumer.run(&worker, token.clone()).await {
            Err(_e) if !token.is_cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Lost the broker session, reconnecting: {_e}");
            }
            done => break done,
        }
    };

    #[cfg(feature = "tracing")]
    match &result {
        Ok(()) => tracing::info!("Worker shut down successfully"),
        Err(e) => tracing::error!("Worker stopped: {e}"),
    }

    providers.shutdown();
    result.context("deletion consumer failed")?;
    Ok(())
}

use crate::server::{
    backends::Backends,
    config::ServerConfig,
    service::handler::{AppState, router},
    telemetry::{record_deletion, record_refill_outcome},
};
use axum::Router;
use pastid::{
    AllocationService, ExpiryWorker, PeriodicTask, PostService, RefillCoordinator, TaskHealth,
};
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// A fully wired server: the HTTP router plus its background tasks.
pub struct App {
    router: Router,
    refill: PeriodicTask,
    local_consumer: Option<JoinHandle<()>>,
    token: CancellationToken,
}

impl App {
    /// Builds the services on top of `backends` and spawns the background
    /// refill task. Must be called inside a tokio runtime.
    pub fn build(config: &ServerConfig, backends: Backends) -> Self {
        let token = CancellationToken::new();

        let coordinator = Arc::new(RefillCoordinator::new(
            backends.source.clone(),
            backends.pool.clone(),
            backends.lock,
            config.refill,
            config.remote_retry,
        ));
        let allocator = Arc::new(AllocationService::new(
            coordinator.clone(),
            backends.pool,
            backends.source,
            config.remote_retry,
        ));
        let posts = Arc::new(PostService::new(
            allocator,
            backends.store.clone(),
            backends.cache,
            backends.scheduler,
            config.posts,
        ));

        let refill = PeriodicTask::spawn(
            "refill",
            config.supervisor,
            token.child_token(),
            move || {
                let coordinator = coordinator.clone();
                async move {
                    let outcome = coordinator.check().await?;
                    record_refill_outcome(outcome.as_str());
                    Ok(())
                }
            },
        );

        let local_consumer = backends.local_expiry.map(|local| {
            #[cfg(feature = "tracing")]
            tracing::info!("Deletion jobs are consumed in process");
            let worker = ExpiryWorker::new(backends.store, config.redelivery)
                .with_observer(|disposition| record_deletion(disposition.as_str()));
            tokio::spawn(
                local
                    .deliveries
                    .consume(worker, local.queue, token.child_token()),
            )
        });

        let state = AppState::new(posts, &config.public_base_url, refill.subscribe());
        Self {
            router: router(state),
            refill,
            local_consumer,
            token,
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn refill_health(&self) -> watch::Receiver<TaskHealth> {
        self.refill.subscribe()
    }

    /// Stops the background tasks and waits for them to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        self.refill.shutdown().await;
        if let Some(consumer) = self.local_consumer {
            if let Err(_e) = consumer.await {
                #[cfg(feature = "tracing")]
                tracing::error!("Deletion consumer exited abnormally: {_e}");
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Background tasks stopped");
    }
}

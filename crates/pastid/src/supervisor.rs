//! Supervised periodic background work.
//!
//! [`PeriodicTask`] runs a fallible job at a fixed interval until its
//! [`CancellationToken`] fires. Every cycle runs in its own tokio task with a
//! timeout, so a job that hangs or panics never takes the loop down with it.
//! The outcome of the last cycle is published as a [`TaskHealth`] on a
//! [`watch`] channel.

use crate::Result;
use core::{future::Future, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval, sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// Timing and restart policy for a [`PeriodicTask`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Time between cycle starts.
    pub interval: Duration,
    /// Upper bound on one cycle. A cycle exceeding it is abandoned.
    pub cycle_timeout: Duration,
    /// Extra pause after a failed, timed-out or panicked cycle, multiplied by
    /// the number of consecutive failures and capped at `max_backoff`.
    pub restart_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            cycle_timeout: Duration::from_secs(10),
            restart_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Observable state of a [`PeriodicTask`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskHealth {
    /// No cycle has completed yet.
    Starting,
    /// The last cycle succeeded.
    Healthy,
    /// The last `consecutive_failures` cycles failed; `last_error` describes
    /// the most recent one.
    Degraded {
        consecutive_failures: u32,
        last_error: String,
    },
    /// The task has been cancelled and exited.
    Stopped,
}

impl TaskHealth {
    pub const fn is_serving(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

/// A handle to a running supervised task.
pub struct PeriodicTask {
    name: &'static str,
    token: CancellationToken,
    health: watch::Receiver<TaskHealth>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawns `job` on the current tokio runtime.
    ///
    /// `job` is invoked once per interval tick. The first cycle starts
    /// immediately.
    pub fn spawn<F, Fut>(
        name: &'static str,
        config: SupervisorConfig,
        token: CancellationToken,
        job: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, health) = watch::channel(TaskHealth::Starting);
        let handle = tokio::spawn(supervise(name, config, token.clone(), tx, job));
        Self {
            name,
            token,
            health,
            handle,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Current health.
    pub fn health(&self) -> TaskHealth {
        self.health.borrow().clone()
    }

    /// A receiver that observes every health transition.
    pub fn subscribe(&self) -> watch::Receiver<TaskHealth> {
        self.health.clone()
    }

    /// Cancels the task and waits for the loop to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(_e) = self.handle.await {
            #[cfg(feature = "tracing")]
            tracing::error!("Supervisor for '{}' exited abnormally: {_e}", self.name);
        }
    }
}

async fn supervise<F, Fut>(
    _name: &'static str,
    config: SupervisorConfig,
    token: CancellationToken,
    health: watch::Sender<TaskHealth>,
    job: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    #[cfg(feature = "tracing")]
    tracing::debug!("Periodic task '{_name}' started");

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let cycle = tokio::spawn(job());
        let abort = cycle.abort_handle();
        let result = tokio::select! {
            () = token.cancelled() => {
                abort.abort();
                break;
            }
            res = timeout(config.cycle_timeout, cycle) => res,
        };

        let failure = match result {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(e.to_string()),
            Ok(Err(join_err)) if join_err.is_panic() => Some("cycle panicked".to_string()),
            Ok(Err(join_err)) => Some(join_err.to_string()),
            Err(_elapsed) => {
                abort.abort();
                Some(format!("cycle exceeded {:?}", config.cycle_timeout))
            }
        };

        match failure {
            None => {
                failures = 0;
                health.send_replace(TaskHealth::Healthy);
            }
            Some(last_error) => {
                failures = failures.saturating_add(1);
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Periodic task '{_name}' failed ({failures} in a row): {last_error}"
                );
                health.send_replace(TaskHealth::Degraded {
                    consecutive_failures: failures,
                    last_error,
                });

                let backoff = config
                    .restart_backoff
                    .saturating_mul(failures)
                    .min(config.max_backoff);
                tokio::select! {
                    () = token.cancelled() => break,
                    () = sleep(backoff) => {}
                }
            }
        }
    }

    health.send_replace(TaskHealth::Stopped);
    #[cfg(feature = "tracing")]
    tracing::debug!("Periodic task '{_name}' stopped");
}

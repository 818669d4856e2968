// Periodic sweep loops and the bounded sweep pool

pub mod constants;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::error::Result;
use constants::ERROR_RECOVERY_SLEEP_DURATION;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Run `tick` every `period` until shutdown.
///
/// A failed tick is logged and followed by a short pause; the loop keeps going.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: ShutdownToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    info!(loop_name = name, period_ms = period.as_millis() as u64, "Sweep loop started");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if shutdown.is_shutdown() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {},
            _ = shutdown.wait() => break,
        }
        if let Err(e) = tick().await {
            error!(loop_name = name, error = %e, "Sweep failed");
            if shutdown.sleep(ERROR_RECOVERY_SLEEP_DURATION).await {
                break;
            }
        }
    }
    info!(loop_name = name, "Sweep loop stopped");
}

/// Bounded pool for background sweeps; at most `size` run at once
#[derive(Clone)]
pub struct SweepPool {
    permits: Arc<Semaphore>,
}

impl SweepPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Spawn a sweep that waits for a free slot before running
    pub fn submit<F, T>(&self, sweep: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            // The semaphore is never closed, so acquire only fails after drop.
            let _permit = permits.acquire_owned().await.ok();
            sweep.await
        })
    }
}

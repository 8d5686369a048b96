//! Conversion timeout guard.
//!
//! A hung conversion leaves the engine in an unknown state, so the
//! policy is deliberately blunt: kill the engine subtree, fail the
//! pending request with `ConversionTimeout`, and signal the whole
//! service to shut down. A conversion that finishes in time wins the
//! race and the timer is dropped without firing.

use crate::engine::{EngineHandle, EngineSupervisor};
use crate::error::{Result, ScribaError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::error;

/// Guards engine operations with a per-conversion deadline.
///
/// With no timeout configured the guard is inert and operations run
/// unbounded.
pub struct TimeoutGuard {
    supervisor: Arc<EngineSupervisor>,
    handle: Arc<EngineHandle>,
    timeout: Option<Duration>,
    shutdown_tx: watch::Sender<bool>,
}

impl TimeoutGuard {
    pub fn new(
        supervisor: Arc<EngineSupervisor>,
        handle: Arc<EngineHandle>,
        timeout: Option<Duration>,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            supervisor,
            handle,
            timeout,
            shutdown_tx,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run an engine operation under the configured deadline.
    ///
    /// On expiry the engine process group is terminated, the service
    /// shutdown flag is raised, and `ConversionTimeout` is returned for
    /// the pending request.
    pub async fn run<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        let Some(limit) = self.timeout else {
            return op.await;
        };

        match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Conversion exceeded {:?}; terminating engine {} and shutting down",
                    limit,
                    self.handle.pid()
                );
                self.supervisor.terminate(&self.handle).await;
                let _ = self.shutdown_tx.send(true);
                Err(ScribaError::ConversionTimeout(limit))
            }
        }
    }
}

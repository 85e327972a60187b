//! Executor task: runs the command on exactly one target
//!
//! Whatever happens inside the session client, a task publishes exactly one
//! [`ExecutionResult`]. Failures, including a panic in the client, are turned
//! into a failure outcome instead of ending the run.

use crate::credential::Credential;
use crate::error::{CredentialError, ExecError};
use crate::executors::SessionClient;
use crate::models::{ExecutionResult, Outcome, Target};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Immutable state shared by every executor task of a run
#[derive(Clone)]
pub struct TaskContext {
    pub client: Arc<dyn SessionClient>,
    /// The run's credential, or the reason none could be produced
    pub credential: Result<Arc<Credential>, CredentialError>,
    pub command: Arc<str>,
    pub results: mpsc::Sender<ExecutionResult>,
    pub cancel: CancellationToken,
    /// Worker-pool permits; `None` means unbounded fan-out
    pub limiter: Option<Arc<Semaphore>>,
}

/// Unit of concurrent work for one target entry
pub struct ExecutorTask {
    target: Target,
    ctx: TaskContext,
}

impl ExecutorTask {
    pub fn new(target: Target, ctx: TaskContext) -> Self {
        Self { target, ctx }
    }

    /// Execute and publish the single result for this target
    pub async fn run(self) {
        let result = self.execute().await;

        match &result.outcome {
            Outcome::Success => info!(
                host = %result.target,
                elapsed_ms = result.duration.as_millis() as u64,
                "Host finished"
            ),
            Outcome::Failure(ExecError::Cancelled) => {
                debug!(host = %result.target, "Host cancelled at deadline")
            }
            Outcome::Failure(err) => warn!(host = %result.target, "Host failed: {}", err),
        }

        self.publish(result).await;
    }

    async fn execute(&self) -> ExecutionResult {
        let start = Instant::now();
        let target = self.target.clone();

        let credential = match &self.ctx.credential {
            Ok(credential) => credential.clone(),
            Err(err) => return ExecutionResult::failed(target, err.clone().into(), start.elapsed()),
        };

        let _permit = match self.acquire_permit().await {
            Ok(permit) => permit,
            Err(err) => return ExecutionResult::failed(target, err, start.elapsed()),
        };

        debug!(host = %target, "Starting session");
        let session = AssertUnwindSafe(async {
            self.ctx
                .client
                .execute(&self.ctx.command, &target, credential, &self.ctx.cancel)
                .await
        })
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(ExecError::Worker("session client panicked".to_string())));

        ExecutionResult::from_session(target, session, start.elapsed())
    }

    /// Wait for a worker-pool slot unless the run is cancelled first
    async fn acquire_permit(&self) -> Result<Option<OwnedSemaphorePermit>, ExecError> {
        let Some(limiter) = &self.ctx.limiter else {
            return Ok(None);
        };

        tokio::select! {
            permit = limiter.clone().acquire_owned() => permit
                .map(Some)
                .map_err(|_| ExecError::Worker("worker pool closed".to_string())),
            _ = self.ctx.cancel.cancelled() => Err(ExecError::Cancelled),
        }
    }

    /// Push onto the result queue; waits while the queue is full
    async fn publish(&self, result: ExecutionResult) {
        if let Err(mpsc::error::SendError(result)) = self.ctx.results.send(result).await {
            debug!(host = %result.target, "Collection finished, result discarded");
        }
    }
}

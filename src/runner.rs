//! One fan-out run: queue, deadline, dispatch, collection, cancellation

use crate::aggregator::Aggregator;
use crate::credential::Credential;
use crate::dispatcher::Dispatcher;
use crate::error::CredentialError;
use crate::executors::SessionClient;
use crate::models::{
    RunSummary, Target, DEFAULT_DEADLINE_SECS, DEFAULT_MAX_PARALLEL, DEFAULT_QUEUE_CAPACITY,
};
use crate::task::TaskContext;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Immutable knobs of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// Offset of the single run deadline from run start
    pub deadline: Duration,
    pub queue_capacity: usize,
    /// Worker-pool size; 0 means unbounded
    pub max_parallel: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }
}

/// Runs one command across many targets
pub struct Runner {
    client: Arc<dyn SessionClient>,
    credential: Result<Arc<Credential>, CredentialError>,
    command: Arc<str>,
    config: RunConfig,
}

impl Runner {
    pub fn new(
        client: Arc<dyn SessionClient>,
        credential: Result<Arc<Credential>, CredentialError>,
        command: impl Into<Arc<str>>,
        config: RunConfig,
    ) -> Self {
        Self {
            client,
            credential,
            command: command.into(),
            config,
        }
    }

    /// Fan out, print results as they arrive, stop at the deadline
    ///
    /// Returns as soon as collection is done. Hosts still in flight are
    /// cancelled, not awaited.
    pub async fn run<W: Write>(&self, targets: &[Target], out: &mut W) -> io::Result<RunSummary> {
        let deadline = Instant::now() + self.config.deadline;
        let cancel = CancellationToken::new();
        let _cancel_on_exit = cancel.clone().drop_guard();

        let (results_tx, results_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let limiter = match self.config.max_parallel {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        let ctx = TaskContext {
            client: self.client.clone(),
            credential: self.credential.clone(),
            command: self.command.clone(),
            results: results_tx,
            cancel: cancel.clone(),
            limiter,
        };
        Dispatcher::new(ctx).dispatch(targets);

        let summary = Aggregator::new(targets.len(), deadline)
            .collect(results_rx, out)
            .await?;

        info!(
            expected = summary.expected,
            received = summary.received,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "Run finished"
        );

        Ok(summary)
    }
}

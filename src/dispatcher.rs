//! Fan-out: one executor task per target

use crate::models::Target;
use crate::task::{ExecutorTask, TaskContext};
use tokio::task::JoinHandle;
use tracing::info;

/// Starts every executor task of a run without waiting for any of them
pub struct Dispatcher {
    ctx: TaskContext,
}

impl Dispatcher {
    pub fn new(ctx: TaskContext) -> Self {
        Self { ctx }
    }

    /// Spawn one task per target entry, in input order
    ///
    /// Duplicates are dispatched as independent runs. Consumes the dispatcher
    /// so the only remaining result senders belong to the spawned tasks.
    pub fn dispatch(self, targets: &[Target]) -> Vec<JoinHandle<()>> {
        info!(
            hosts = targets.len(),
            bounded = self.ctx.limiter.is_some(),
            "Dispatching"
        );

        targets
            .iter()
            .map(|target| {
                let task = ExecutorTask::new(target.clone(), self.ctx.clone());
                tokio::spawn(task.run())
            })
            .collect()
    }
}

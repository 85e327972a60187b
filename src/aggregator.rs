//! Fan-in: collect results against the run deadline
//!
//! The aggregator is the sole consumer of the result queue. It has two
//! states:
//! - **collecting** while fewer than N results arrived: each step either
//!   prints the next result or sees the deadline fire
//! - **done** once N results arrived (no notice), the deadline fired (one
//!   timeout notice) or every producer vanished
//!
//! Tasks that have not reported when it is done are abandoned; the runner
//! cancels them.

use crate::banner::{write_block, TIMEOUT_NOTICE};
use crate::models::{ExecutionResult, RunSummary};
use std::io::{self, Write};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

enum State {
    Collecting,
    Done,
}

/// Drains the result queue until every host reported or the deadline fired
pub struct Aggregator {
    expected: usize,
    deadline: Instant,
}

impl Aggregator {
    pub fn new(expected: usize, deadline: Instant) -> Self {
        Self { expected, deadline }
    }

    /// Print each result as it arrives and return the run summary
    pub async fn collect<W: Write>(
        self,
        mut results: mpsc::Receiver<ExecutionResult>,
        out: &mut W,
    ) -> io::Result<RunSummary> {
        let mut summary = RunSummary {
            expected: self.expected,
            ..Default::default()
        };

        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);

        let mut state = self.step_state(&summary);
        while let State::Collecting = state {
            tokio::select! {
                biased;

                next = results.recv() => match next {
                    Some(result) => {
                        if !result.outcome.is_success() {
                            summary.failed += 1;
                        }
                        summary.received += 1;
                        debug!(
                            host = %result.target,
                            received = summary.received,
                            expected = summary.expected,
                            "Result received"
                        );
                        write_block(out, &result)?;
                        state = self.step_state(&summary);
                    }
                    None => {
                        error!(
                            received = summary.received,
                            expected = summary.expected,
                            "Result queue closed before every host reported"
                        );
                        state = State::Done;
                    }
                },
                _ = &mut deadline => {
                    warn!(
                        outstanding = summary.expected - summary.received,
                        "Deadline reached, abandoning outstanding hosts"
                    );
                    writeln!(out, "{}", TIMEOUT_NOTICE)?;
                    out.flush()?;
                    summary.timed_out = true;
                    state = State::Done;
                }
            }
        }

        Ok(summary)
    }

    fn step_state(&self, summary: &RunSummary) -> State {
        if summary.received < self.expected {
            State::Collecting
        } else {
            State::Done
        }
    }
}

//! Convergence polling: one job per record, re-fetching it until it reaches
//! its expected steady status.

use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use engine_logging::{engine_debug, engine_trace};
use listsync_core::SteadyStatus;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::transport::TransportError;

/// What a job should do after an observation was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollStep {
    Continue,
    Done,
}

/// The capabilities a polling job needs from the list that owns it.
///
/// Every callback carries the job generation; results from a superseded job
/// are ignored by the implementor.
#[async_trait::async_trait]
pub(crate) trait PollTarget: Send + Sync {
    async fn fetch_one(&self, id: &str) -> Result<Value, TransportError>;

    fn settle(&self, id: &str, generation: u64, data: Value, expected: &SteadyStatus) -> PollStep;

    fn fail(&self, id: &str, generation: u64, error: TransportError);

    /// The record vanished on the server.
    async fn resource_gone(&self, id: &str, generation: u64);
}

#[derive(Debug)]
struct PollHandle {
    generation: u64,
    cancel: CancellationToken,
}

/// Live polling jobs keyed by record identity; at most one per id.
#[derive(Debug, Default)]
pub(crate) struct PollRegistry {
    handles: HashMap<String, PollHandle>,
    next_generation: u64,
}

impl PollRegistry {
    /// Cancels any job for `id` and reserves a slot for its replacement.
    pub(crate) fn arm(&mut self, id: &str, parent: &CancellationToken) -> (u64, CancellationToken) {
        self.cancel(id);
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = parent.child_token();
        self.handles.insert(
            id.to_string(),
            PollHandle {
                generation,
                cancel: cancel.clone(),
            },
        );
        (generation, cancel)
    }

    pub(crate) fn is_current(&self, id: &str, generation: u64) -> bool {
        self.handles
            .get(id)
            .is_some_and(|handle| handle.generation == generation)
    }

    /// Drops the slot of a job that finished on its own.
    pub(crate) fn release(&mut self, id: &str, generation: u64) -> bool {
        if !self.is_current(id, generation) {
            return false;
        }
        self.handles.remove(id);
        true
    }

    pub(crate) fn cancel(&mut self, id: &str) -> bool {
        match self.handles.remove(id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.cancel.cancel();
        }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }
}

pub(crate) struct PollingJob {
    pub(crate) id: String,
    pub(crate) expected: SteadyStatus,
    pub(crate) interval: Duration,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
}

impl PollingJob {
    pub(crate) fn spawn(self, runtime: &Handle, target: Weak<dyn PollTarget>) {
        runtime.spawn(self.run(target));
    }

    async fn run(self, target: Weak<dyn PollTarget>) {
        engine_trace!("Poll {} armed (generation {})", self.id, self.generation);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    engine_trace!("Poll {} cancelled while waiting", self.id);
                    return;
                }
                _ = wait(self.interval) => {}
            }

            let Some(target) = target.upgrade() else {
                return;
            };
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                result = target.fetch_one(&self.id) => result,
            };

            match result {
                Ok(data) => {
                    if target.settle(&self.id, self.generation, data, &self.expected)
                        == PollStep::Done
                    {
                        return;
                    }
                }
                Err(err) if err.is_not_found() => {
                    engine_debug!("Poll {}: resource gone, refreshing list", self.id);
                    target.resource_gone(&self.id, self.generation).await;
                    return;
                }
                Err(err) => {
                    engine_debug!("Poll {} stopped: {}", self.id, err);
                    target.fail(&self.id, self.generation, err);
                    return;
                }
            }
        }
    }
}

async fn wait(interval: Duration) {
    if interval.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(interval).await;
    }
}

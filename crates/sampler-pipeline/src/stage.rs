//! Shared plumbing for the fetch and transcode stages: termination counters, the
//! downstream hand-off seam and the worker thread handle.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use sampler_types::PlayerEvent;

use crate::error::{PipelineError, Result};
use crate::queue::WorkQueue;

/// Per-stage termination counters.
///
/// The worker loop ends exactly when `completed == expected`. `expected` is fixed at start and
/// only ever shrinks through [`StageCounters::drop_one`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageCounters {
    expected: usize,
    completed: usize,
}

impl StageCounters {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            completed: 0,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.expected
    }

    /// Record one item forwarded downstream.
    pub fn complete_one(&mut self) {
        if self.completed < self.expected {
            self.completed += 1;
        }
    }

    /// Give up on one item: it will never be forwarded.
    pub fn drop_one(&mut self) {
        if self.expected > self.completed {
            self.expected -= 1;
        }
    }

    pub fn report(&self) -> StageReport {
        StageReport {
            expected: self.expected,
            completed: self.completed,
        }
    }
}

/// Final counters of a stage worker, returned by `join()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageReport {
    pub expected: usize,
    pub completed: usize,
}

impl StageReport {
    /// `true` when the worker forwarded every item it expected (it was not stopped early).
    pub fn is_complete(&self) -> bool {
        self.completed == self.expected
    }
}

/// Downstream side of a stage: where finished items go.
pub trait Handoff<T>: Send + Sync {
    fn hand_off(&self, item: T) -> Result<()>;
}

impl<T: Send> Handoff<T> for WorkQueue<T> {
    fn hand_off(&self, item: T) -> Result<()> {
        self.push(item);
        Ok(())
    }
}

/// A fatal stage error as seen by the session while the pipeline is still running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageFault {
    pub stage: &'static str,
    pub message: String,
}

/// Collects the first fatal error of any stage in a session and announces every one as
/// [`PlayerEvent::StageFailed`].
#[derive(Clone, Default)]
pub struct FaultMonitor {
    first: Arc<Mutex<Option<StageFault>>>,
    events: Option<Sender<PlayerEvent>>,
}

impl FaultMonitor {
    pub fn new(events: Sender<PlayerEvent>) -> Self {
        Self {
            first: Arc::default(),
            events: Some(events),
        }
    }

    pub fn report(&self, stage: &'static str, err: &PipelineError) {
        let message = err.to_string();
        tracing::error!(stage, error = %message, "stage worker failed");
        self.first
            .lock()
            .unwrap()
            .get_or_insert_with(|| StageFault {
                stage,
                message: message.clone(),
            });
        if let Some(events) = &self.events {
            let _ = events.send(PlayerEvent::StageFailed {
                stage: stage.to_string(),
                error: message,
            });
        }
    }

    /// First fault reported, if any.
    pub fn first(&self) -> Option<StageFault> {
        self.first.lock().unwrap().clone()
    }
}

/// Join handle of a named stage worker thread.
pub(crate) struct StageWorker {
    stage: &'static str,
    handle: JoinHandle<Result<StageReport>>,
}

impl StageWorker {
    /// Run `run` on a `sampler-<stage>` thread; an `Err` outcome goes to `faults` as soon as
    /// the loop returns.
    pub(crate) fn spawn<F>(stage: &'static str, faults: &FaultMonitor, run: F) -> Result<Self>
    where
        F: FnOnce() -> Result<StageReport> + Send + 'static,
    {
        let faults = faults.clone();
        let handle = thread::Builder::new()
            .name(format!("sampler-{stage}"))
            .spawn(move || {
                let outcome = run();
                if let Err(e) = &outcome {
                    faults.report(stage, e);
                }
                outcome
            })
            .map_err(|e| PipelineError::io(format!("spawn {stage} worker"), e))?;
        Ok(Self { stage, handle })
    }

    pub(crate) fn join(self) -> Result<StageReport> {
        let stage = self.stage;
        self.handle
            .join()
            .map_err(|_| PipelineError::WorkerPanicked { stage })?
    }
}

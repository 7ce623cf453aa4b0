//! Fetch stage: download preview clips into the local cache and forward them to transcode.
//!
//! Transient network failures put the track back at the tail of the queue without counting
//! it; anything else ends the worker with an error.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sampler_types::TrackDescriptor;

use crate::error::{FetchError, PipelineError, Result};
use crate::queue::WorkQueue;
use crate::stage::{FaultMonitor, Handoff, StageCounters, StageReport, StageWorker};

const CACHE_EXT: &str = "audio";

/// Remote retrieval of preview bytes for one track.
pub trait PreviewSource: Send + Sync {
    fn fetch(&self, track: &TrackDescriptor) -> std::result::Result<Vec<u8>, FetchError>;
}

/// A preview clip sitting in the cache, on its way to transcode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedItem {
    pub path: PathBuf,
    pub track: TrackDescriptor,
}

/// Preview store: one `<id>.audio` file per track id.
#[derive(Clone, Debug)]
pub struct FetchCache {
    dir: PathBuf,
}

impl FetchCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, track_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{CACHE_EXT}", sanitize_track_id(track_id)))
    }

    /// Write `bytes` for `track_id`, replacing any previous file atomically.
    pub fn store(&self, track_id: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(track_id);
        let mut tmp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    /// Best-effort removal of every cached clip. Returns the number of files removed.
    pub fn clear(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(dir = ?self.dir, error = %e, "preview cache listing failed");
                return 0;
            }
        };

        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CACHE_EXT) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = ?path, error = %e, "preview cache cleanup failed"),
            }
        }
        removed
    }
}

/// File stem for a track id. Ids that needed rewriting get a hash of the raw id appended so
/// that `a:b` and `a_b` stay distinct.
fn sanitize_track_id(id: &str) -> String {
    let mut rewritten = id.is_empty();
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                rewritten = true;
                '_'
            }
        })
        .collect();
    if rewritten {
        format!("{cleaned}_{:016x}", hash_id(id))
    } else {
        cleaned
    }
}

fn hash_id(id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

/// Downloads previews in FIFO order on its own worker thread.
pub struct FetchStage {
    queue: Arc<WorkQueue<TrackDescriptor>>,
    source: Arc<dyn PreviewSource>,
    cache: FetchCache,
    downstream: Arc<dyn Handoff<FetchedItem>>,
    faults: FaultMonitor,
    worker: Option<StageWorker>,
    started: bool,
}

impl FetchStage {
    pub fn new(
        source: Arc<dyn PreviewSource>,
        cache: FetchCache,
        downstream: Arc<dyn Handoff<FetchedItem>>,
    ) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new()),
            source,
            cache,
            downstream,
            faults: FaultMonitor::default(),
            worker: None,
            started: false,
        }
    }

    /// Report a fatal worker error to `faults` as soon as it happens.
    pub fn with_faults(mut self, faults: FaultMonitor) -> Self {
        self.faults = faults;
        self
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    /// Queue a track for download. Never blocks.
    pub fn enqueue(&self, track: TrackDescriptor) {
        self.queue.push(track);
    }

    /// Launch the worker; it exits after forwarding `expected` items or on `stop()`.
    pub fn start(&mut self, expected: usize) -> Result<()> {
        if self.started {
            return Err(PipelineError::AlreadyStarted { stage: "fetch" });
        }
        fs::create_dir_all(self.cache.dir())
            .map_err(|e| PipelineError::io(format!("create cache dir {:?}", self.cache.dir()), e))?;

        let queue = self.queue.clone();
        let source = self.source.clone();
        let cache = self.cache.clone();
        let downstream = self.downstream.clone();
        self.worker = Some(StageWorker::spawn("fetch", &self.faults, move || {
            run_fetch_loop(&queue, source.as_ref(), &cache, downstream.as_ref(), expected)
        })?);
        self.started = true;
        tracing::info!(expected, "fetch stage started");
        Ok(())
    }

    /// Request termination; a worker blocked on an empty queue wakes up and exits.
    pub fn stop(&self) {
        self.queue.stop();
    }

    /// Wait for the worker. A stage that was never started reports zero counters.
    pub fn join(&mut self) -> Result<StageReport> {
        match self.worker.take() {
            Some(worker) => worker.join(),
            None => Ok(StageReport::default()),
        }
    }

    /// Remove every cached clip. Never fails.
    pub fn unload(&self) {
        let removed = self.cache.clear();
        tracing::info!(removed, dir = ?self.cache.dir(), "preview cache cleared");
    }
}

impl Drop for FetchStage {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.join() {
            tracing::warn!(error = %e, "fetch worker ended with an error");
        }
    }
}

fn run_fetch_loop(
    queue: &WorkQueue<TrackDescriptor>,
    source: &dyn PreviewSource,
    cache: &FetchCache,
    downstream: &dyn Handoff<FetchedItem>,
    expected: usize,
) -> Result<StageReport> {
    let mut counters = StageCounters::new(expected);

    while !counters.is_done() {
        let Some(track) = queue.pop() else {
            tracing::info!(completed = counters.completed(), expected, "fetch stage stopped");
            return Ok(counters.report());
        };

        let path = cache.path_for(&track.id);
        if path.exists() {
            tracing::debug!(track_id = %track.id, "preview cache hit");
        } else {
            match source.fetch(&track) {
                Ok(bytes) => {
                    cache.store(&track.id, &bytes).map_err(|e| {
                        PipelineError::io(format!("store preview for track {}", track.id), e)
                    })?;
                    tracing::debug!(track_id = %track.id, bytes = bytes.len(), "preview stored");
                }
                Err(FetchError::Transient(reason)) => {
                    tracing::warn!(track_id = %track.id, %reason, "transient fetch failure, requeueing");
                    queue.push(track);
                    continue;
                }
                Err(FetchError::Fatal(err)) => {
                    tracing::error!(track_id = %track.id, "fetch failed: {err:#}");
                    return Err(PipelineError::Fetch {
                        track_id: track.id,
                        source: err,
                    });
                }
            }
        }

        downstream.hand_off(FetchedItem { path, track })?;
        counters.complete_one();
    }

    tracing::info!(completed = counters.completed(), "fetch stage finished");
    Ok(counters.report())
}

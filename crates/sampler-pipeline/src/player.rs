//! Playback engine: the queue of ready PCM items and the play/pause/stop state machine.
//!
//! One worker thread plays items back to back through an [`AudioSink`]. Pause and stop only
//! take effect between items; the sink call itself is never interrupted.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use sampler_types::{PlaybackState, PlayerEvent, TrackDescriptor};

use crate::error::{PipelineError, Result};
use crate::stage::Handoff;
use crate::timer::{ElapsedClock, ProgressTimer};

/// Platform output: plays one PCM file and returns when it has finished.
pub trait AudioSink: Send + 'static {
    fn play_to_end(&mut self, path: &Path) -> anyhow::Result<()>;
}

/// A transcoded clip ready for playback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcmItem {
    pub path: PathBuf,
    pub track: TrackDescriptor,
}

type FinishCallback = Box<dyn FnOnce() + Send + 'static>;

struct EngineState {
    state: PlaybackState,
    queue: VecDeque<PcmItem>,
    exited: bool,
    finish_registered: bool,
    finish: Option<FinishCallback>,
}

struct EngineShared {
    inner: Mutex<EngineState>,
    cv: Condvar,
}

impl EngineShared {
    fn submit(&self, item: PcmItem) -> Result<()> {
        if !is_wav_path(&item.path) {
            return Err(PipelineError::InvalidSubmission { path: item.path });
        }
        let mut g = self.inner.lock().unwrap();
        g.queue.push_back(item);
        drop(g);
        self.cv.notify_all();
        Ok(())
    }
}

fn is_wav_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// Cloneable submit handle given to the transcode stage.
#[derive(Clone)]
pub struct PlayerInbox {
    shared: Arc<EngineShared>,
}

impl PlayerInbox {
    pub fn submit(&self, path: PathBuf, track: TrackDescriptor) -> Result<()> {
        self.shared.submit(PcmItem { path, track })
    }
}

impl Handoff<PcmItem> for PlayerInbox {
    fn hand_off(&self, item: PcmItem) -> Result<()> {
        self.shared.submit(item)
    }
}

/// Owns the playback worker and its progress timer.
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
    clock: ElapsedClock,
    join: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Spawn the worker in the `Paused` state.
    pub fn start(
        sink: Box<dyn AudioSink>,
        tick_interval: Duration,
        events: Sender<PlayerEvent>,
    ) -> Result<Self> {
        let shared = Arc::new(EngineShared {
            inner: Mutex::new(EngineState {
                state: PlaybackState::Paused,
                queue: VecDeque::new(),
                exited: false,
                finish_registered: false,
                finish: None,
            }),
            cv: Condvar::new(),
        });

        let timer = ProgressTimer::start(tick_interval, events.clone());
        let clock = timer.clock();
        let shared_thread = shared.clone();
        let join = thread::Builder::new()
            .name("sampler-playback".to_string())
            .spawn(move || run_engine(&shared_thread, sink, timer, &events))
            .map_err(|e| PipelineError::io("spawn playback worker", e))?;

        Ok(Self {
            shared,
            clock,
            join: Some(join),
        })
    }

    pub fn inbox(&self) -> PlayerInbox {
        PlayerInbox {
            shared: self.shared.clone(),
        }
    }

    /// Queue a PCM file. Rejects anything that is not a `.wav` path.
    pub fn submit(&self, path: PathBuf, track: TrackDescriptor) -> Result<()> {
        self.shared.submit(PcmItem { path, track })
    }

    pub fn play(&self) {
        self.transition(PlaybackState::Paused, PlaybackState::Playing);
    }

    /// Takes effect once the current item finishes.
    pub fn pause(&self) {
        self.transition(PlaybackState::Playing, PlaybackState::Paused);
    }

    /// Terminal. No further item starts; the item currently playing runs to its end.
    pub fn stop(&self) {
        let mut g = self.shared.inner.lock().unwrap();
        if g.state != PlaybackState::Stopped {
            tracing::info!(queued = g.queue.len(), "playback stopping");
            g.state = PlaybackState::Stopped;
        }
        drop(g);
        self.shared.cv.notify_all();
    }

    fn transition(&self, from: PlaybackState, to: PlaybackState) {
        let mut g = self.shared.inner.lock().unwrap();
        if g.state == from {
            g.state = to;
            tracing::debug!(state = ?to, "playback state changed");
        }
        drop(g);
        self.shared.cv.notify_all();
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.inner.lock().unwrap().state
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlaybackState::Paused
    }

    pub fn queued(&self) -> usize {
        self.shared.inner.lock().unwrap().queue.len()
    }

    pub fn current_elapsed_seconds(&self) -> u64 {
        self.clock.get()
    }

    /// Register the callback run once the worker loop exits.
    ///
    /// Runs on the worker thread, or right here if the loop has already exited.
    pub fn on_finished<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut g = self.shared.inner.lock().unwrap();
        if g.finish_registered {
            return Err(PipelineError::FinishCallbackAlreadySet);
        }
        g.finish_registered = true;
        if g.exited {
            drop(g);
            callback();
        } else {
            g.finish = Some(Box::new(callback));
        }
        Ok(())
    }

    /// Wait for the worker thread to exit. Call after `stop()`.
    pub fn join(&mut self) -> Result<()> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| PipelineError::WorkerPanicked { stage: "playback" }),
            None => Ok(()),
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_engine(
    shared: &EngineShared,
    mut sink: Box<dyn AudioSink>,
    mut timer: ProgressTimer,
    events: &Sender<PlayerEvent>,
) {
    loop {
        let next = {
            let mut g = shared.inner.lock().unwrap();
            loop {
                if g.state == PlaybackState::Stopped {
                    break None;
                }
                if g.state == PlaybackState::Playing {
                    if let Some(item) = g.queue.pop_front() {
                        break Some(item);
                    }
                }
                g = shared.cv.wait(g).unwrap();
            }
        };
        let Some(item) = next else { break };

        timer.reset();
        tracing::info!(track_id = %item.track.id, name = %item.track.display_name(), "now playing");
        let _ = events.send(PlayerEvent::TrackStarted {
            track: item.track.clone(),
        });
        if let Err(e) = sink.play_to_end(&item.path) {
            tracing::warn!(track_id = %item.track.id, path = ?item.path, "playback failed: {e:#}");
        }
    }

    timer.stop();
    let _ = events.send(PlayerEvent::Finished);

    let callback = {
        let mut g = shared.inner.lock().unwrap();
        g.exited = true;
        g.finish.take()
    };
    tracing::info!("playback finished");
    if let Some(callback) = callback {
        callback();
    }
}

//! One playlist run: owns the fetch, transcode and playback workers from setup to teardown.

use std::sync::Arc;

use crossbeam_channel::Sender;
use sampler_types::{PlaybackState, PlayerEvent, TrackDescriptor};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::fetch::{FetchCache, FetchStage, PreviewSource};
use crate::http::HttpPreviewSource;
use crate::output::CpalSink;
use crate::player::{AudioSink, PlaybackEngine};
use crate::stage::{FaultMonitor, StageFault, StageReport};
use crate::transcode::{SymphoniaTranscoder, TranscodeStage, Transcoder};

/// External seams of the pipeline.
pub struct Collaborators {
    pub source: Arc<dyn PreviewSource>,
    pub transcoder: Arc<dyn Transcoder>,
    pub sink: Box<dyn AudioSink>,
}

impl Collaborators {
    /// HTTP downloads, Symphonia transcoding and CPAL output, configured from `config`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            source: Arc::new(HttpPreviewSource::new(config.fetch_timeout)),
            transcoder: Arc::new(SymphoniaTranscoder::new(config.chunk_frames)),
            sink: Box::new(CpalSink::new(
                config.device.clone(),
                config.chunk_frames,
                config.max_buffer_frames,
            )),
        }
    }
}

/// Whether unload should let the current clip finish before reporting completion.
///
/// A paused session has nothing to wait for, and a clip already past `threshold_secs` is
/// not worth waiting out.
pub fn should_wait_for_current(
    requested: bool,
    paused: bool,
    elapsed_secs: u64,
    threshold_secs: u64,
) -> bool {
    requested && !paused && elapsed_secs <= threshold_secs
}

/// Dropping a session without [`SamplerSession::unload`] still stops its workers and deletes
/// its files, but runs no callback.
pub struct SamplerSession {
    config: PipelineConfig,
    engine: PlaybackEngine,
    transcode: TranscodeStage,
    fetch: FetchStage,
    faults: FaultMonitor,
    expected: usize,
    torn_down: bool,
}

impl SamplerSession {
    /// Start every worker for `tracks` and queue the previewable ones for download.
    ///
    /// Playback starts paused.
    pub fn start(
        config: PipelineConfig,
        tracks: Vec<TrackDescriptor>,
        collaborators: Collaborators,
        events: Sender<PlayerEvent>,
    ) -> Result<Self> {
        let total = tracks.len();
        let tracks: Vec<TrackDescriptor> =
            tracks.into_iter().filter(|t| t.is_previewable()).collect();
        let expected = tracks.len();

        let faults = FaultMonitor::new(events.clone());
        let engine = PlaybackEngine::start(collaborators.sink, config.tick_interval, events)?;

        let mut transcode = TranscodeStage::new(
            collaborators.transcoder,
            config.temp_dir.clone(),
            Arc::new(engine.inbox()),
        )
        .with_faults(faults.clone());
        transcode.start(expected)?;

        let mut fetch = FetchStage::new(
            collaborators.source,
            FetchCache::new(config.cache_dir.clone()),
            Arc::new(transcode.inbox()),
        )
        .with_faults(faults.clone());
        fetch.start(expected)?;

        for track in tracks {
            fetch.enqueue(track);
        }

        tracing::info!(
            expected,
            skipped = total - expected,
            cache_dir = ?config.cache_dir,
            temp_dir = ?config.temp_dir,
            "session started"
        );

        Ok(Self {
            config,
            engine,
            transcode,
            fetch,
            faults,
            expected,
            torn_down: false,
        })
    }

    pub fn play(&self) {
        self.engine.play();
    }

    pub fn pause(&self) {
        self.engine.pause();
    }

    pub fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    pub fn state(&self) -> PlaybackState {
        self.engine.state()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.engine.current_elapsed_seconds()
    }

    /// Number of previewable tracks this session was started with.
    pub fn expected_tracks(&self) -> usize {
        self.expected
    }

    /// First fatal stage error so far. Also announced as `PlayerEvent::StageFailed`.
    pub fn fault(&self) -> Option<StageFault> {
        self.faults.first()
    }

    /// Tear the session down.
    ///
    /// `on_unloaded` runs once the clip currently playing has ended when waiting applies
    /// (see [`should_wait_for_current`]), otherwise immediately. Cleanup always runs; the first
    /// stage fault, if any, is returned afterwards.
    pub fn unload<F>(mut self, wait: bool, on_unloaded: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let paused = self.engine.is_paused();
        let elapsed = self.engine.current_elapsed_seconds();
        let wait = should_wait_for_current(wait, paused, elapsed, self.config.wait_threshold_secs);
        tracing::info!(wait, paused, elapsed, "unloading session");

        let (fetched, transcoded) = self.teardown();

        if wait {
            self.engine.on_finished(on_unloaded)?;
        } else {
            on_unloaded();
        }

        match (&fetched, &transcoded) {
            (Ok(f), Ok(t)) => tracing::info!(
                fetched = f.completed,
                transcoded = t.completed,
                expected = self.expected,
                "session unloaded"
            ),
            _ => {
                if let Err(e) = &fetched {
                    tracing::error!(error = %e, "fetch stage failed");
                }
                if let Err(e) = &transcoded {
                    tracing::error!(error = %e, "transcode stage failed");
                }
            }
        }

        fetched?;
        transcoded?;
        Ok(())
    }

    /// Stop every worker, wait for both stages and delete their files.
    fn teardown(&mut self) -> (Result<StageReport>, Result<StageReport>) {
        self.torn_down = true;
        self.engine.stop();
        self.fetch.stop();
        self.transcode.stop();

        let fetched = self.fetch.join();
        let transcoded = self.transcode.join();

        self.transcode.unload();
        self.fetch.unload();
        (fetched, transcoded)
    }
}

impl Drop for SamplerSession {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        tracing::warn!("session dropped without unload, tearing down");
        let (fetched, transcoded) = self.teardown();
        if let Err(e) = fetched.and(transcoded) {
            tracing::error!(error = %e, "stage failed before the session was dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::error::{FetchError, PipelineError, TranscodeError};

    const WAIT: Duration = Duration::from_secs(5);

    struct EchoSource {
        fatal_id: Option<&'static str>,
    }

    impl PreviewSource for EchoSource {
        fn fetch(&self, track: &TrackDescriptor) -> std::result::Result<Vec<u8>, FetchError> {
            if self.fatal_id == Some(track.id.as_str()) {
                return Err(FetchError::Fatal(anyhow::anyhow!("HTTP 403")));
            }
            Ok(track.id.clone().into_bytes())
        }
    }

    struct CopyTranscoder;

    impl Transcoder for CopyTranscoder {
        fn transcode(
            &self,
            input: &Path,
            output: &Path,
        ) -> std::result::Result<(), TranscodeError> {
            fs::copy(input, output).map_err(|e| TranscodeError {
                input: input.to_path_buf(),
                source: e.into(),
            })?;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        played: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl AudioSink for RecordingSink {
        fn play_to_end(&mut self, path: &Path) -> anyhow::Result<()> {
            self.played.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    fn track(id: &str, previewable: bool) -> TrackDescriptor {
        TrackDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            preview_url: if previewable {
                format!("https://previews.invalid/{id}")
            } else {
                String::new()
            },
            artists: Vec::new(),
            album: None,
        }
    }

    fn config(root: &Path) -> PipelineConfig {
        PipelineConfig {
            cache_dir: root.join("cache"),
            temp_dir: root.join("pcm"),
            tick_interval: Duration::from_secs(3600),
            ..PipelineConfig::default()
        }
    }

    fn collaborators(fatal_id: Option<&'static str>, sink: RecordingSink) -> Collaborators {
        Collaborators {
            source: Arc::new(EchoSource { fatal_id }),
            transcoder: Arc::new(CopyTranscoder),
            sink: Box::new(sink),
        }
    }

    #[test]
    fn wait_decision_follows_pause_and_threshold() {
        assert!(should_wait_for_current(true, false, 10, 30));
        assert!(should_wait_for_current(true, false, 30, 30));
        assert!(!should_wait_for_current(true, false, 31, 30));
        assert!(!should_wait_for_current(true, true, 0, 30));
        assert!(!should_wait_for_current(false, false, 0, 30));
    }

    #[test]
    fn plays_every_previewable_track_then_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path());
        let sink = RecordingSink::default();
        let played = sink.played.clone();
        let (tx, rx) = crossbeam_channel::unbounded();

        let tracks = vec![track("a", true), track("skip", false), track("b", true), track("c", true)];
        let session = SamplerSession::start(cfg.clone(), tracks, collaborators(None, sink), tx).unwrap();
        assert_eq!(session.expected_tracks(), 3);
        assert!(session.is_paused());

        session.play();
        let mut started = Vec::new();
        while started.len() < 3 {
            if let PlayerEvent::TrackStarted { track } = rx.recv_timeout(WAIT).unwrap() {
                started.push(track.id);
            }
        }
        assert_eq!(started, vec!["a", "b", "c"]);

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        session
            .unload(true, move || {
                let _ = done_tx.send(());
            })
            .unwrap();
        done_rx.recv_timeout(WAIT).unwrap();

        assert_eq!(played.lock().unwrap().len(), 3);
        assert_eq!(fs::read_dir(&cfg.cache_dir).unwrap().count(), 0);
        assert_eq!(fs::read_dir(&cfg.temp_dir).unwrap().count(), 0);
    }

    #[test]
    fn unload_while_paused_does_not_wait() {
        let root = tempfile::tempdir().unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let session = SamplerSession::start(
            config(root.path()),
            vec![track("a", true)],
            collaborators(None, RecordingSink::default()),
            tx,
        )
        .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        session
            .unload(true, move || {
                calls_cb.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fetch_fault_surfaces_after_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path());
        let (tx, rx) = crossbeam_channel::unbounded();
        let session = SamplerSession::start(
            cfg.clone(),
            vec![track("ok", true), track("denied", true)],
            collaborators(Some("denied"), RecordingSink::default()),
            tx,
        )
        .unwrap();

        loop {
            if let PlayerEvent::StageFailed { stage, error } = rx.recv_timeout(WAIT).unwrap() {
                assert_eq!(stage, "fetch");
                assert!(error.contains("denied"));
                break;
            }
        }
        assert_eq!(session.fault().unwrap().stage, "fetch");

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let err = session
            .unload(false, move || {
                calls_cb.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_err();

        assert!(matches!(err, PipelineError::Fetch { ref track_id, .. } if track_id == "denied"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read_dir(&cfg.cache_dir).unwrap().count(), 0);
    }

    /// Plays nothing until released; reports each clip it receives.
    struct GatedSink {
        started: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl AudioSink for GatedSink {
        fn play_to_end(&mut self, _path: &Path) -> anyhow::Result<()> {
            let _ = self.started.send(());
            let _ = self.release.recv_timeout(WAIT);
            Ok(())
        }
    }

    #[test]
    fn waiting_unload_fires_after_the_current_clip_ends() {
        let root = tempfile::tempdir().unwrap();
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let session = SamplerSession::start(
            config(root.path()),
            vec![track("a", true), track("b", true)],
            Collaborators {
                source: Arc::new(EchoSource { fatal_id: None }),
                transcoder: Arc::new(CopyTranscoder),
                sink: Box::new(GatedSink {
                    started: started_tx,
                    release: release_rx,
                }),
            },
            tx,
        )
        .unwrap();
        session.play();
        started_rx.recv_timeout(WAIT).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        session
            .unload(true, move || {
                calls_cb.fetch_add(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            })
            .unwrap();

        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        done_rx.recv_timeout(WAIT).unwrap();
        // The queued second clip never starts after the unload.
        assert!(started_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Takes a while per download and counts calls.
    #[derive(Default)]
    struct SlowSource {
        calls: AtomicUsize,
    }

    impl PreviewSource for SlowSource {
        fn fetch(&self, track: &TrackDescriptor) -> std::result::Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            Ok(track.id.clone().into_bytes())
        }
    }

    #[test]
    fn dropped_session_stops_workers_and_removes_files() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path());
        let source = Arc::new(SlowSource::default());
        let (tx, _rx) = crossbeam_channel::unbounded();
        let session = SamplerSession::start(
            cfg.clone(),
            vec![track("a", true), track("b", true), track("c", true)],
            Collaborators {
                source: source.clone(),
                transcoder: Arc::new(CopyTranscoder),
                sink: Box::new(RecordingSink::default()),
            },
            tx,
        )
        .unwrap();

        drop(session);

        assert!(source.calls.load(Ordering::SeqCst) <= 1);
        assert_eq!(Arc::strong_count(&source), 1);
        assert_eq!(fs::read_dir(&cfg.cache_dir).unwrap().count(), 0);
        assert_eq!(fs::read_dir(&cfg.temp_dir).unwrap().count(), 0);
    }
}

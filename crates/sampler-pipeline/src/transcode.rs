//! Transcode stage: turn cached preview clips into fixed-format PCM WAV files for playback.
//!
//! A clip that cannot be converted is dropped and shrinks the stage's expected count; it is
//! never retried.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use sampler_types::TrackDescriptor;

use crate::config::{PCM_CHANNELS, PCM_SAMPLE_RATE};
use crate::decode::decode_file;
use crate::error::{PipelineError, Result, TranscodeError};
use crate::fetch::FetchedItem;
use crate::player::PcmItem;
use crate::queue::WorkQueue;
use crate::resample::resample_interleaved;
use crate::stage::{FaultMonitor, Handoff, StageCounters, StageReport, StageWorker};

/// Compressed clip -> stereo 44.1 kHz 16-bit PCM WAV.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, input: &Path, output: &Path) -> std::result::Result<(), TranscodeError>;
}

/// Default codec: Symphonia decode, Rubato resample, Hound WAV writer.
#[derive(Clone, Debug)]
pub struct SymphoniaTranscoder {
    chunk_frames: usize,
}

impl SymphoniaTranscoder {
    pub fn new(chunk_frames: usize) -> Self {
        Self {
            chunk_frames: chunk_frames.max(1),
        }
    }
}

impl Default for SymphoniaTranscoder {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Transcoder for SymphoniaTranscoder {
    fn transcode(&self, input: &Path, output: &Path) -> std::result::Result<(), TranscodeError> {
        convert_to_wav(input, output, self.chunk_frames).map_err(|source| TranscodeError {
            input: input.to_path_buf(),
            source,
        })
    }
}

fn convert_to_wav(input: &Path, output: &Path, chunk_frames: usize) -> anyhow::Result<()> {
    let decoded = decode_file(input)?.into_stereo();
    let channels = decoded.channels;
    let samples = resample_interleaved(
        &decoded.samples,
        channels,
        decoded.rate,
        PCM_SAMPLE_RATE,
        chunk_frames,
    )?;

    let spec = hound::WavSpec {
        channels: PCM_CHANNELS,
        sample_rate: PCM_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(output, spec).with_context(|| format!("create {:?}", output))?;
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(v).context("write sample")?;
    }
    writer.finalize().context("finalize wav")?;
    Ok(())
}

/// PCM files produced during one session, removed on unload.
#[derive(Clone, Debug, Default)]
pub struct TempFileRegistry {
    files: Arc<Mutex<Vec<PathBuf>>>,
}

impl TempFileRegistry {
    pub fn register(&self, path: PathBuf) {
        self.files.lock().unwrap().push(path);
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every registered file and forget it. Returns the number actually removed.
    pub fn remove_all(&self) -> usize {
        let files: Vec<PathBuf> = self.files.lock().unwrap().drain(..).collect();
        let mut removed = 0usize;
        for path in files {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = ?path, error = %e, "temp pcm cleanup failed"),
            }
        }
        removed
    }
}

/// Cloneable producer handle for the transcode queue.
#[derive(Clone)]
pub struct TranscodeInbox {
    queue: Arc<WorkQueue<FetchedItem>>,
}

impl TranscodeInbox {
    pub fn queue(&self, path: PathBuf, track: TrackDescriptor) {
        self.queue.push(FetchedItem { path, track });
    }
}

impl Handoff<FetchedItem> for TranscodeInbox {
    fn hand_off(&self, item: FetchedItem) -> Result<()> {
        self.queue.push(item);
        Ok(())
    }
}

/// Converts fetched clips on its own worker thread.
pub struct TranscodeStage {
    queue: Arc<WorkQueue<FetchedItem>>,
    transcoder: Arc<dyn Transcoder>,
    temp_dir: PathBuf,
    registry: TempFileRegistry,
    downstream: Arc<dyn Handoff<PcmItem>>,
    faults: FaultMonitor,
    worker: Option<StageWorker>,
    started: bool,
}

impl TranscodeStage {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        temp_dir: impl Into<PathBuf>,
        downstream: Arc<dyn Handoff<PcmItem>>,
    ) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new()),
            transcoder,
            temp_dir: temp_dir.into(),
            registry: TempFileRegistry::default(),
            downstream,
            faults: FaultMonitor::default(),
            worker: None,
            started: false,
        }
    }

    pub fn with_faults(mut self, faults: FaultMonitor) -> Self {
        self.faults = faults;
        self
    }

    pub fn inbox(&self) -> TranscodeInbox {
        TranscodeInbox {
            queue: self.queue.clone(),
        }
    }

    /// Append a fetched item.
    pub fn queue(&self, path: PathBuf, track: TrackDescriptor) {
        self.queue.push(FetchedItem { path, track });
    }

    pub fn registry(&self) -> &TempFileRegistry {
        &self.registry
    }

    pub fn start(&mut self, expected: usize) -> Result<()> {
        if self.started {
            return Err(PipelineError::AlreadyStarted { stage: "transcode" });
        }
        fs::create_dir_all(&self.temp_dir)
            .map_err(|e| PipelineError::io(format!("create temp dir {:?}", self.temp_dir), e))?;

        let queue = self.queue.clone();
        let transcoder = self.transcoder.clone();
        let temp_dir = self.temp_dir.clone();
        let registry = self.registry.clone();
        let downstream = self.downstream.clone();
        self.worker = Some(StageWorker::spawn("transcode", &self.faults, move || {
            run_transcode_loop(
                &queue,
                transcoder.as_ref(),
                &temp_dir,
                &registry,
                downstream.as_ref(),
                expected,
            )
        })?);
        self.started = true;
        tracing::info!(expected, "transcode stage started");
        Ok(())
    }

    pub fn stop(&self) {
        self.queue.stop();
    }

    pub fn join(&mut self) -> Result<StageReport> {
        match self.worker.take() {
            Some(worker) => worker.join(),
            None => Ok(StageReport::default()),
        }
    }

    /// Delete every PCM file produced so far. Never fails; a second call is a no-op.
    pub fn unload(&self) {
        let removed = self.registry.remove_all();
        tracing::info!(removed, "temp pcm files removed");
    }
}

impl Drop for TranscodeStage {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.join() {
            tracing::warn!(error = %e, "transcode worker ended with an error");
        }
        let removed = self.registry.remove_all();
        if removed > 0 {
            tracing::debug!(removed, "temp pcm files removed on drop");
        }
    }
}

fn run_transcode_loop(
    queue: &WorkQueue<FetchedItem>,
    transcoder: &dyn Transcoder,
    temp_dir: &Path,
    registry: &TempFileRegistry,
    downstream: &dyn Handoff<PcmItem>,
    expected: usize,
) -> Result<StageReport> {
    let mut counters = StageCounters::new(expected);

    while !counters.is_done() {
        let Some(FetchedItem { path, track }) = queue.pop() else {
            tracing::info!(
                completed = counters.completed(),
                expected = counters.expected(),
                "transcode stage stopped"
            );
            return Ok(counters.report());
        };

        let out_path = make_temp_path(temp_dir)?;
        if let Err(e) = transcoder.transcode(&path, &out_path) {
            tracing::warn!(track_id = %track.id, error = %e, "transcode failed, dropping track");
            if let Err(rm) = fs::remove_file(&out_path) {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = ?out_path, error = %rm, "partial pcm cleanup failed");
                }
            }
            counters.drop_one();
            continue;
        }

        registry.register(out_path.clone());
        tracing::debug!(track_id = %track.id, path = ?out_path, "transcoded");
        downstream.hand_off(PcmItem {
            path: out_path,
            track,
        })?;
        counters.complete_one();
    }

    tracing::info!(
        completed = counters.completed(),
        expected = counters.expected(),
        "transcode stage finished"
    );
    Ok(counters.report())
}

const PCM_PREFIX: &str = "sampler-";

/// Remove `sampler-*.wav` files left behind by an earlier run.
pub fn cleanup_stale_pcm(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0usize;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if !file_name.starts_with(PCM_PREFIX) || !file_name.ends_with(".wav") {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = ?path, error = %e, "stale pcm cleanup failed"),
        }
    }
    Ok(removed)
}

/// Reserve a unique `sampler-*.wav` path inside `dir`.
fn make_temp_path(dir: &Path) -> Result<PathBuf> {
    tempfile::Builder::new()
        .prefix(PCM_PREFIX)
        .suffix(".wav")
        .tempfile_in(dir)
        .and_then(|f| f.into_temp_path().keep().map_err(|e| e.error))
        .map_err(|e| PipelineError::io(format!("create temp pcm in {:?}", dir), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn track(id: &str) -> TrackDescriptor {
        TrackDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            preview_url: format!("https://previews.invalid/{id}"),
            artists: Vec::new(),
            album: None,
        }
    }

    /// Writes the input file name into the output, failing for ids listed in `fail`.
    struct StubTranscoder {
        fail: HashSet<String>,
    }

    impl Transcoder for StubTranscoder {
        fn transcode(
            &self,
            input: &Path,
            output: &Path,
        ) -> std::result::Result<(), TranscodeError> {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            if self.fail.contains(&stem) {
                fs::write(output, b"partial").unwrap();
                return Err(TranscodeError {
                    input: input.to_path_buf(),
                    source: anyhow::anyhow!("unsupported codec"),
                });
            }
            fs::write(output, stem.as_bytes()).unwrap();
            Ok(())
        }
    }

    fn stage(
        fail: &[&str],
        temp_dir: &Path,
    ) -> (TranscodeStage, Arc<WorkQueue<PcmItem>>) {
        let out = Arc::new(WorkQueue::new());
        let transcoder = Arc::new(StubTranscoder {
            fail: fail.iter().map(|s| s.to_string()).collect(),
        });
        (TranscodeStage::new(transcoder, temp_dir, out.clone()), out)
    }

    fn feed(stage: &TranscodeStage, ids: &[&str]) {
        let inbox = stage.inbox();
        for id in ids {
            inbox.queue(PathBuf::from(format!("/cache/{id}.audio")), track(id));
        }
    }

    #[test]
    fn permanent_failures_shrink_expected_and_drop_items() {
        let dir = tempfile::tempdir().unwrap();
        let (mut stage, out) = stage(&["b", "d"], dir.path());
        feed(&stage, &["a", "b", "c", "d", "e"]);

        stage.start(5).unwrap();
        let report = stage.join().unwrap();

        assert_eq!(report, StageReport { expected: 3, completed: 3 });
        let ids: Vec<String> = out.drain().into_iter().map(|i| i.track.id).collect();
        assert_eq!(ids, vec!["a", "c", "e"]);
        // Only successful conversions remain on disk.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn produced_files_are_unique_wavs() {
        let dir = tempfile::tempdir().unwrap();
        let (mut stage, out) = stage(&[], dir.path());
        feed(&stage, &["x", "x"]);

        stage.start(2).unwrap();
        stage.join().unwrap();

        let items = out.drain();
        assert_ne!(items[0].path, items[1].path);
        for item in &items {
            let name = item.path.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("sampler-") && name.ends_with(".wav"));
            assert_eq!(fs::read(&item.path).unwrap(), b"x");
        }
    }

    #[test]
    fn unload_removes_every_conversion_once() {
        let dir = tempfile::tempdir().unwrap();
        let (mut stage, _out) = stage(&[], dir.path());
        feed(&stage, &["a", "b", "c"]);

        stage.start(3).unwrap();
        stage.join().unwrap();
        assert_eq!(stage.registry().len(), 3);

        assert_eq!(stage.registry().remove_all(), 3);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(stage.registry().is_empty());
        assert_eq!(stage.registry().remove_all(), 0);
        stage.unload();
    }

    #[test]
    fn stop_ends_a_waiting_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (mut stage, _out) = stage(&[], dir.path());
        stage.start(4).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        stage.stop();
        assert_eq!(stage.join().unwrap().completed, 0);
    }

    #[test]
    fn stale_cleanup_only_touches_pcm_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sampler-old.wav"), b"x").unwrap();
        fs::write(dir.path().join("sampler-notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("other.wav"), b"x").unwrap();
        assert_eq!(cleanup_stale_pcm(dir.path()).unwrap(), 1);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn stale_cleanup_skips_entries_it_cannot_remove() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sampler-busy.wav")).unwrap();
        fs::write(dir.path().join("sampler-old.wav"), b"x").unwrap();
        assert_eq!(cleanup_stale_pcm(dir.path()).unwrap(), 1);
        assert!(dir.path().join("sampler-busy.wav").is_dir());
    }

    #[test]
    fn dropping_the_stage_removes_its_conversions() {
        let dir = tempfile::tempdir().unwrap();
        let (mut stage, out) = stage(&[], dir.path());
        feed(&stage, &["a", "b"]);
        stage.start(4).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while out.len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(out.len(), 2);

        drop(stage);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn symphonia_transcoder_writes_stereo_cd_quality_wav() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.audio");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&input, spec).unwrap();
        for i in 0..11_025 {
            writer
                .write_sample(((i as f32 / 10.0).sin() * 10_000.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();

        let output = dir.path().join("out.wav");
        SymphoniaTranscoder::default()
            .transcode(&input, &output)
            .unwrap();

        let reader = hound::WavReader::open(&output).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, PCM_CHANNELS);
        assert_eq!(spec.sample_rate, PCM_SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration(), 22_050);
    }

    #[test]
    fn symphonia_transcoder_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("junk.audio");
        fs::write(&input, b"nope").unwrap();
        let err = SymphoniaTranscoder::default()
            .transcode(&input, &dir.path().join("out.wav"))
            .unwrap_err();
        assert_eq!(err.input, input);
    }
}

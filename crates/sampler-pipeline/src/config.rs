use std::path::PathBuf;
use std::time::Duration;

/// Sample rate of every PCM file produced by the transcode stage.
pub const PCM_SAMPLE_RATE: u32 = 44_100;
/// Channel count of every PCM file produced by the transcode stage.
pub const PCM_CHANNELS: u16 = 2;

/// Settings shared by the fetch, transcode and playback stages of one session.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Directory holding `<track-id>.audio` preview files.
    pub cache_dir: PathBuf,
    /// Directory receiving transcoded PCM files.
    pub temp_dir: PathBuf,
    /// Interval between elapsed-time reports.
    pub tick_interval: Duration,
    /// Per-request timeout for preview downloads.
    pub fetch_timeout: Duration,
    /// Past this many elapsed seconds, unload does not wait for the current clip.
    pub wait_threshold_secs: u64,
    /// Output device substring; `None` selects the host default.
    pub device: Option<String>,
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Upper bound on the fixed output stream buffer, in frames.
    pub max_buffer_frames: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("playlist-sampler");
        Self {
            cache_dir: base.join("cache"),
            temp_dir: base.join("pcm"),
            tick_interval: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(15),
            wait_threshold_secs: 30,
            device: None,
            chunk_frames: 1024,
            max_buffer_frames: 16_384,
        }
    }
}

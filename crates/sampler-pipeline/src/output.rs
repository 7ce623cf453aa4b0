//! CPAL-backed [`AudioSink`]: plays one PCM WAV file to its end on an output device.
//!
//! The clip is read with Hound, resampled to the device rate if needed, and handed to a CPAL
//! output stream whose callback applies basic channel mapping and signals completion.

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::decode::DecodedAudio;
use crate::device::{pick_buffer_size, pick_device, pick_output_config};
use crate::player::AudioSink;
use crate::resample::resample_interleaved;

/// Extra time granted beyond the clip length before giving up on the stream.
const COMPLETION_GRACE: Duration = Duration::from_secs(2);

/// Plays PCM files on the selected (or default) output device.
#[derive(Clone, Debug)]
pub struct CpalSink {
    device: Option<String>,
    chunk_frames: usize,
    max_buffer_frames: u32,
}

impl CpalSink {
    pub fn new(device: Option<String>, chunk_frames: usize, max_buffer_frames: u32) -> Self {
        Self {
            device,
            chunk_frames,
            max_buffer_frames,
        }
    }
}

impl AudioSink for CpalSink {
    fn play_to_end(&mut self, path: &Path) -> Result<()> {
        let clip = read_wav(path)?;

        let host = cpal::default_host();
        let device = pick_device(&host, self.device.as_deref())?;
        let config = pick_output_config(&device, Some(clip.rate))?;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buffer_size) = pick_buffer_size(&config, self.max_buffer_frames) {
            stream_config.buffer_size = buffer_size;
        }

        let dst_rate = stream_config.sample_rate;
        let samples = resample_interleaved(
            &clip.samples,
            clip.channels,
            clip.rate,
            dst_rate,
            self.chunk_frames,
        )?;
        let frames = samples.len() / clip.channels.max(1);
        tracing::debug!(
            path = ?path,
            src_rate = clip.rate,
            dst_rate,
            frames,
            "clip ready for output"
        );

        let playback = Arc::new(ClipPlayback::new(samples, clip.channels));
        let stream = build_output_stream(
            &device,
            &stream_config,
            config.sample_format(),
            playback.clone(),
        )?;
        stream.play().context("start output stream")?;

        let clip_len = Duration::from_secs_f64(frames as f64 / dst_rate.max(1) as f64);
        let finished = playback.wait_done(clip_len + COMPLETION_GRACE);

        // Let the device drain its last buffer before the stream is dropped.
        thread::sleep(Duration::from_millis(100));
        drop(stream);

        if let Some(err) = playback.take_error() {
            bail!("output stream error: {err}");
        }
        if !finished {
            tracing::warn!(path = ?path, "output did not finish in time");
        }
        Ok(())
    }
}

/// Read a PCM WAV file into interleaved `f32`.
pub fn read_wav(path: &Path) -> Result<DecodedAudio> {
    let reader = hound::WavReader::open(path).with_context(|| format!("open {:?}", path))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("read {:?}", path))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("read {:?}", path))?
        }
    };
    if spec.channels == 0 {
        return Err(anyhow!("{:?} has no channels", path));
    }
    Ok(DecodedAudio {
        rate: spec.sample_rate,
        channels: spec.channels as usize,
        samples,
    })
}

/// Shared state between the output callback and the thread waiting for the clip to end.
struct ClipPlayback {
    cursor: Mutex<ClipCursor>,
    done: Mutex<bool>,
    cv: Condvar,
    error: Mutex<Option<String>>,
}

struct ClipCursor {
    samples: Vec<f32>,
    src_channels: usize,
    pos: usize,
}

impl ClipPlayback {
    fn new(samples: Vec<f32>, src_channels: usize) -> Self {
        Self {
            cursor: Mutex::new(ClipCursor {
                samples,
                src_channels,
                pos: 0,
            }),
            done: Mutex::new(false),
            cv: Condvar::new(),
            error: Mutex::new(None),
        }
    }

    fn mark_done(&self) {
        let mut done = self.done.lock().unwrap();
        if !*done {
            *done = true;
            self.cv.notify_all();
        }
    }

    fn fail(&self, err: String) {
        self.error.lock().unwrap().get_or_insert(err);
        self.mark_done();
    }

    fn take_error(&self) -> Option<String> {
        self.error.lock().unwrap().take()
    }

    /// Returns `false` on timeout.
    fn wait_done(&self, timeout: Duration) -> bool {
        let done = self.done.lock().unwrap();
        let (done, _) = self
            .cv
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap();
        *done
    }

    /// Fill `out` with interleaved frames for `dst_channels`; returns `true` once exhausted.
    fn fill(&self, out: &mut [f32], dst_channels: usize) -> bool {
        let mut cursor = self.cursor.lock().unwrap();
        for frame in out.chunks_mut(dst_channels) {
            if cursor.pos >= cursor.samples.len() {
                frame.fill(0.0);
                continue;
            }
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = mapped_sample(&cursor, dst_channels, ch);
            }
            cursor.pos += cursor.src_channels;
        }
        cursor.pos >= cursor.samples.len()
    }
}

/// Channel mapping for one destination sample at the cursor position.
///
/// - mono -> stereo: duplicate channel 0
/// - stereo -> mono: average L/R
/// - otherwise: clamp to the available source channels
fn mapped_sample(cursor: &ClipCursor, dst_channels: usize, dst_ch: usize) -> f32 {
    let get = |ch: usize| -> f32 {
        cursor
            .samples
            .get(cursor.pos + ch)
            .copied()
            .filter(|_| ch < cursor.src_channels)
            .unwrap_or(0.0)
    };
    match (cursor.src_channels, dst_channels) {
        (2, 1) => 0.5 * (get(0) + get(1)),
        (1, _) => get(0),
        (src, _) => get(dst_ch.min(src.saturating_sub(1))),
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    playback: Arc<ClipPlayback>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, playback),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, playback),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, playback),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, playback),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    playback: Arc<ClipPlayback>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels.max(1) as usize;
    let mut scratch: Vec<f32> = Vec::new();

    let playback_cb = playback.clone();
    let playback_err = playback;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            scratch.resize(data.len(), 0.0);
            let exhausted = playback_cb.fill(&mut scratch, channels_out);
            for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
            }
            if exhausted {
                playback_cb.mark_done();
            }
        },
        move |err| {
            tracing::warn!("stream error: {err}");
            playback_err.fail(err.to_string());
        },
        None,
    )?;
    Ok(stream)
}

//! Offline sample-rate conversion for whole clips.
//!
//! Uses Rubato's sinc resampler in fixed-input chunks, pads the tail, then trims the
//! resampler delay so the output lines up with the input.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Convert interleaved `samples` from `from_rate` to `to_rate`.
///
/// Returns the input unchanged when the rates already match.
pub fn resample_interleaved(
    samples: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
    chunk_frames: usize,
) -> Result<Vec<f32>> {
    if channels == 0 {
        return Err(anyhow!("cannot resample zero channels"));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(anyhow!("invalid sample rates {from_rate} -> {to_rate}"));
    }

    let f_ratio = to_rate as f64 / from_rate as f64;

    let sinc_len = 128;
    let oversampling_factor = 256;
    let interpolation = SincInterpolationType::Cubic;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);

    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation,
        oversampling_factor,
        window,
    };

    let chunk_in_frames = chunk_frames.max(1);
    let mut resampler: Box<dyn Resampler<f32>> = Box::new(
        Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_in_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init error: {e}"))?,
    );

    let total_frames = samples.len() / channels;
    let expected_frames = (total_frames as f64 * f_ratio).round() as usize;
    let delay_frames = resampler.output_delay();

    let mut out_interleaved = vec![0.0f32; channels * resampler.output_frames_max()];
    let mut output = Vec::with_capacity((expected_frames + delay_frames) * channels);

    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    let chunk_samples = chunk_in_frames * channels;
    let mut full_chunks = samples[..total_frames * channels].chunks_exact(chunk_samples);
    for chunk in full_chunks.by_ref() {
        indexing.partial_len = None;
        let produced = process_chunk(
            resampler.as_mut(),
            chunk,
            channels,
            chunk_in_frames,
            &mut out_interleaved,
            &indexing,
        )?;
        output.extend_from_slice(&out_interleaved[..produced * channels]);
    }

    let tail = full_chunks.remainder();
    let tail_frames = tail.len() / channels;
    if tail_frames > 0 {
        indexing.partial_len = Some(tail_frames);
        let produced = process_chunk(
            resampler.as_mut(),
            tail,
            channels,
            tail_frames,
            &mut out_interleaved,
            &indexing,
        )?;
        output.extend_from_slice(&out_interleaved[..produced * channels]);
    }

    // Push silence through until the delayed tail has come out.
    let silence = vec![0.0f32; chunk_samples];
    let mut flushes = 0usize;
    while output.len() / channels < expected_frames + delay_frames && flushes < 64 {
        indexing.partial_len = None;
        let produced = process_chunk(
            resampler.as_mut(),
            &silence,
            channels,
            chunk_in_frames,
            &mut out_interleaved,
            &indexing,
        )?;
        if produced == 0 {
            break;
        }
        output.extend_from_slice(&out_interleaved[..produced * channels]);
        flushes += 1;
    }

    let skip = (delay_frames * channels).min(output.len());
    output.drain(..skip);
    output.truncate(expected_frames * channels);
    Ok(output)
}

fn process_chunk(
    resampler: &mut dyn Resampler<f32>,
    input: &[f32],
    channels: usize,
    frames: usize,
    out_interleaved: &mut [f32],
    indexing: &Indexing,
) -> Result<usize> {
    let input_adapter = InterleavedSlice::new(input, channels, frames)
        .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;

    let out_capacity_frames = out_interleaved.len() / channels;
    let mut output_adapter = InterleavedSlice::new_mut(out_interleaved, channels, out_capacity_frames)
        .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(indexing))
        .map_err(|e| anyhow!("resampler process error: {e}"))?;
    Ok(nbr_out)
}

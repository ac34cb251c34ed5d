use anyhow::{bail, Context, Result};
use std::f32::consts::PI;

use super::{ceil_div, hop_samples_for, pos_ms_for};
use crate::audio::decode::DecodedAudio;
use crate::request::SpectrumParams;

const MIN_FREQ_HZ: f32 = 40.0;
const MAX_FREQ_HZ: f32 = 5_000.0;
const WINDOW_MIN: usize = 256;
const WINDOW_MAX: usize = 2_048;

pub struct SpectrumFrame {
    pub pos_ms: i32,
    pub bands: Vec<u8>,
}

pub struct SpectrumResult {
    pub duration_ms: u32,
    pub frames: Vec<SpectrumFrame>,
}

/// Per-frame log-magnitude bands over a geometric frequency grid, one
/// Goertzel resonator per band on a Hann-windowed frame.
pub fn compute(audio: &DecodedAudio, params: &SpectrumParams) -> Result<SpectrumResult> {
    if audio.mono_rate == 0 || audio.mono.is_empty() {
        bail!("no mono samples");
    }
    let rate = audio.mono_rate;
    let band_count = params.band_count;
    let hop_samples = hop_samples_for(rate, params.hop_ms);
    let window_size = window_size_for(hop_samples);
    let hann = hann_window(window_size);
    let coeffs = goertzel_coefficients(rate, window_size, band_count)?;

    let frame_count = ceil_div(audio.mono.len(), hop_samples).min(params.max_frames);
    if frame_count == 0 {
        bail!("zero analysis frames");
    }
    log::debug!(
        "spectrum: {frame_count} frames, hop {hop_samples}, window {window_size}, {band_count} bands"
    );

    // The matrix scales with the request's band_count, so its allocation is
    // checked like the decode buffers.
    let cell_count = frame_count
        .checked_mul(band_count)
        .context("magnitude matrix size overflow")?;
    let mut magnitudes = Vec::new();
    magnitudes
        .try_reserve_exact(cell_count)
        .context("magnitude matrix allocation")?;
    magnitudes.resize(cell_count, 0.0f32);
    let mut positions = Vec::with_capacity(frame_count);
    let mut windowed = vec![0.0f32; window_size];
    let mut max_magnitude = 0.0f32;

    for frame_idx in 0..frame_count {
        let start = frame_idx * hop_samples;
        positions.push(pos_ms_for(start, rate));
        for (i, slot) in windowed.iter_mut().enumerate() {
            let sample = audio.mono.get(start + i).copied().unwrap_or(0.0);
            *slot = sample * hann[i];
        }
        for (band, &coeff) in coeffs.iter().enumerate() {
            let power = goertzel_power(&windowed, coeff);
            let magnitude = if power > 0.0 { power.ln_1p() } else { 0.0 };
            magnitudes[frame_idx * band_count + band] = magnitude;
            max_magnitude = max_magnitude.max(magnitude);
        }
    }

    // Silence leaves max_magnitude at zero; normalize against 1.0 so the
    // output is all-zero bytes instead of NaN.
    let scale = if max_magnitude > 0.0 { max_magnitude } else { 1.0 };
    let frames = positions
        .into_iter()
        .enumerate()
        .map(|(frame_idx, pos_ms)| {
            let row = &magnitudes[frame_idx * band_count..(frame_idx + 1) * band_count];
            let bands = row.iter().map(|&mag| quantize_level(mag / scale)).collect();
            SpectrumFrame { pos_ms, bands }
        })
        .collect();

    Ok(SpectrumResult {
        duration_ms: audio.duration_ms,
        frames,
    })
}

/// Smallest power of two covering two hops, clamped to the analysis range.
fn window_size_for(hop_samples: usize) -> usize {
    let target = hop_samples.saturating_mul(2);
    let mut size = 1usize;
    while size < target && size < WINDOW_MAX {
        size <<= 1;
    }
    size.clamp(WINDOW_MIN, WINDOW_MAX)
}

fn hann_window(size: usize) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / (size - 1) as f32).cos())
        .collect()
}

/// One resonator coefficient per band, geometrically spaced from 40 Hz up to
/// 5 kHz (or just under Nyquist, whichever is lower), each snapped to the
/// nearest DFT bin of the window.
fn goertzel_coefficients(rate: u32, window_size: usize, band_count: usize) -> Result<Vec<f32>> {
    if band_count <= 1 {
        return Ok(vec![2.0]);
    }
    let nyquist = (rate as f32 * 0.5 - 1.0).max(100.0);
    let min_freq = MIN_FREQ_HZ;
    let mut max_freq = nyquist.min(MAX_FREQ_HZ);
    if max_freq <= min_freq {
        max_freq = min_freq + 1.0;
    }
    let ratio = (max_freq / min_freq).powf(1.0 / (band_count - 1) as f32);
    let mut coeffs = Vec::new();
    coeffs
        .try_reserve_exact(band_count)
        .context("coefficient bank allocation")?;
    coeffs.extend((0..band_count).map(|band| {
        let freq = min_freq * ratio.powi(band as i32);
        let bin = (window_size as f32 * freq / rate as f32).round();
        let omega = 2.0 * PI * bin / window_size as f32;
        2.0 * omega.cos()
    }));
    Ok(coeffs)
}

fn goertzel_power(windowed: &[f32], coeff: f32) -> f32 {
    let mut s_prev = 0.0f32;
    let mut s_prev2 = 0.0f32;
    for &x in windowed {
        let s = x + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }
    s_prev2 * s_prev2 + s_prev * s_prev - coeff * s_prev * s_prev2
}

/// Display curve: sqrt shaping of the normalized magnitude, quantized to a
/// byte. Callers rely on this exact curve.
fn quantize_level(normalized: f32) -> u8 {
    let curved = normalized.clamp(0.0, 1.0).sqrt();
    (curved * 255.0).round().clamp(0.0, 255.0) as u8
}

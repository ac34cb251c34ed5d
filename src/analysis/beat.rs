use anyhow::{bail, Result};

use super::hop_samples_for;
use crate::audio::decode::DecodedAudio;
use crate::request::BeatParams;

const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 180.0;
const STRENGTH_THRESHOLD_RATIO: f64 = 1.35;
const STRENGTH_THRESHOLD_FLOOR: f64 = 0.12;
const MIN_ENVELOPE_FOR_TEMPO: usize = 8;

pub struct BeatFrame {
    pub pos_ms: i32,
    pub strength_u8: u8,
    pub is_beat: bool,
}

pub struct BeatResult {
    pub duration_ms: u32,
    /// 0.0 when no tempo could be estimated.
    pub bpm: f64,
    pub frames: Vec<BeatFrame>,
}

/// Onset/beat timeline from the mono buffer: RMS energy per hop, a
/// positive-difference onset envelope, autocorrelation tempo search, and
/// phase-aligned beat flags.
pub fn compute(audio: &DecodedAudio, params: &BeatParams) -> Result<BeatResult> {
    if audio.mono_rate == 0 || audio.mono.is_empty() {
        bail!("no mono samples");
    }
    let hop_samples = hop_samples_for(audio.mono_rate, params.hop_ms);
    let window_samples = hop_samples * 2;

    let mut energies: Vec<f64> = Vec::new();
    let mut start = 0usize;
    while start < audio.mono.len() && energies.len() < params.max_frames {
        let end = (start + window_samples).min(audio.mono.len());
        energies.push(rms_energy(&audio.mono[start..end]));
        start += hop_samples;
    }
    if energies.is_empty() {
        bail!("zero envelope frames");
    }
    let envelope_len = energies.len();

    let mut onsets = vec![0.0f64; envelope_len];
    for i in 1..envelope_len {
        onsets[i] = (energies[i] - energies[i - 1]).max(0.0);
    }

    let max_onset = onsets.iter().copied().fold(0.0f64, f64::max);
    let strengths: Vec<f64> = if max_onset > 0.0 {
        onsets
            .iter()
            .map(|&o| (o / max_onset).clamp(0.0, 1.0))
            .collect()
    } else {
        vec![0.0; envelope_len]
    };

    let fps = 1000.0 / f64::from(params.hop_ms);
    let (bpm, best_lag) = estimate_tempo(&onsets, fps);
    log::debug!("beat: {envelope_len} envelope frames, bpm {bpm:.1}, lag {best_lag:?}");

    let mut beat_flags = vec![false; envelope_len];
    if let Some(lag) = best_lag {
        mark_beats(&strengths, lag, &mut beat_flags);
    }

    let hop_ms = i64::from(params.hop_ms);
    let frames = strengths
        .iter()
        .zip(beat_flags.iter())
        .enumerate()
        .map(|(i, (&strength, &is_beat))| BeatFrame {
            pos_ms: (i as i64 * hop_ms) as i32,
            strength_u8: (strength * 255.0).round().clamp(0.0, 255.0) as u8,
            is_beat,
        })
        .collect();

    Ok(BeatResult {
        duration_ms: audio.duration_ms,
        bpm: bpm.max(0.0),
        frames,
    })
}

fn rms_energy(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (total / samples.len() as f64).sqrt()
}

/// Autocorrelation of the onset envelope over the 60-180 BPM lag range.
/// Ties go to the smallest lag; short envelopes yield no estimate at all.
fn estimate_tempo(onsets: &[f64], fps: f64) -> (f64, Option<usize>) {
    if onsets.len() < MIN_ENVELOPE_FOR_TEMPO || fps <= 0.0 {
        return (0.0, None);
    }
    let lag_min = ((60.0 * fps / MAX_BPM).round() as i64).max(1);
    let mut lag_max = ((60.0 * fps / MIN_BPM).round() as i64).max(lag_min + 1);
    lag_max = lag_max.min(onsets.len() as i64 - 1);
    if lag_max <= lag_min {
        return (0.0, None);
    }

    let mut best_lag = None;
    let mut best_score = 0.0f64;
    for lag in lag_min as usize..=lag_max as usize {
        let score: f64 = (lag..onsets.len()).map(|i| onsets[i] * onsets[i - lag]).sum();
        if score > best_score {
            best_score = score;
            best_lag = Some(lag);
        }
    }
    match best_lag {
        Some(lag) => (60.0 * fps / lag as f64, Some(lag)),
        None => (0.0, None),
    }
}

/// Bin strengths by phase modulo the winning lag; flag frames that sit on
/// the winning phase and clear the strength threshold. Strict phase match
/// plus the threshold avoids double-triggering on onsets that drift near
/// the periodic grid.
fn mark_beats(strengths: &[f64], lag: usize, beat_flags: &mut [bool]) {
    let mut phase_scores = vec![0.0f64; lag];
    let mut mean_strength = 0.0f64;
    for (i, &strength) in strengths.iter().enumerate() {
        phase_scores[i % lag] += strength;
        mean_strength += strength;
    }
    mean_strength /= strengths.len() as f64;

    let mut winning_phase = 0usize;
    for phase in 1..lag {
        if phase_scores[phase] > phase_scores[winning_phase] {
            winning_phase = phase;
        }
    }

    let threshold = (STRENGTH_THRESHOLD_RATIO * mean_strength).max(STRENGTH_THRESHOLD_FLOOR);
    for (i, flag) in beat_flags.iter_mut().enumerate() {
        *flag = i % lag == winning_phase && strengths[i] >= threshold;
    }
}

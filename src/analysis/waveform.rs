use anyhow::{bail, Result};

use super::{ceil_div, hop_samples_for, pos_ms_for};
use crate::audio::decode::DecodedAudio;
use crate::request::WaveformParams;

pub struct WaveformProxyFrame {
    pub pos_ms: i32,
    pub lmin: i8,
    pub lmax: i8,
    pub rmin: i8,
    pub rmax: i8,
}

pub struct WaveformProxyResult {
    pub duration_ms: u32,
    pub frames: Vec<WaveformProxyFrame>,
}

/// Per-hop stereo min/max envelope quantized to int8, enough to draw a
/// waveform glyph without shipping raw PCM.
pub fn compute(audio: &DecodedAudio, params: &WaveformParams) -> Result<WaveformProxyResult> {
    if audio.stereo_rate == 0 || audio.left.is_empty() || audio.right.is_empty() {
        bail!("no stereo samples");
    }
    let hop_frames = hop_samples_for(audio.stereo_rate, params.hop_ms);
    let frame_count = ceil_div(audio.left.len(), hop_frames).min(params.max_frames);
    if frame_count == 0 {
        bail!("zero analysis frames");
    }

    let mut frames = Vec::with_capacity(frame_count);
    let mut start = 0usize;
    while frames.len() < frame_count && start < audio.left.len() {
        let end = (start + hop_frames).min(audio.left.len());
        // Seeded so a single-sample window degenerates to min == max.
        let mut lmin = 1.0f32;
        let mut lmax = -1.0f32;
        let mut rmin = 1.0f32;
        let mut rmax = -1.0f32;
        for i in start..end {
            let l = audio.left[i];
            let r = audio.right[i];
            lmin = lmin.min(l);
            lmax = lmax.max(l);
            rmin = rmin.min(r);
            rmax = rmax.max(r);
        }
        frames.push(WaveformProxyFrame {
            pos_ms: pos_ms_for(start, audio.stereo_rate),
            lmin: to_i8(lmin),
            lmax: to_i8(lmax),
            rmin: to_i8(rmin),
            rmax: to_i8(rmax),
        });
        start = end;
    }

    Ok(WaveformProxyResult {
        duration_ms: audio.duration_ms,
        frames,
    })
}

fn to_i8(value: f32) -> i8 {
    (value.clamp(-1.0, 1.0) * 127.0).round().clamp(-127.0, 127.0) as i8
}

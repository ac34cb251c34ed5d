use anyhow::{Context, Result};

use super::decode::{duration_ms_for, DecodedAudio};

/// Downsample the mono analysis buffer to `target_rate_hz` by nearest-sample
/// decimation. Upsampling is deliberately a no-op: the spectrogram bands top
/// out well under the post-decimation Nyquist, so a low-pass stage would buy
/// nothing here.
///
/// The stereo buffers are untouched; duration is recomputed from the new
/// mono length.
pub fn downsample_mono(audio: &mut DecodedAudio, target_rate_hz: i64) -> Result<()> {
    if target_rate_hz <= 0 || audio.mono_rate == 0 || audio.mono.is_empty() {
        return Ok(());
    }
    if i64::from(audio.mono_rate) <= target_rate_hz {
        return Ok(());
    }

    let step = f64::from(audio.mono_rate) / target_rate_hz as f64;
    let capacity = (audio.mono.len() as f64 / step) as usize + 2;
    let mut picked = Vec::new();
    picked
        .try_reserve_exact(capacity)
        .context("resample buffer allocation")?;

    let mut idx = 0.0f64;
    while (idx as usize) < audio.mono.len() && picked.len() < capacity {
        picked.push(audio.mono[idx as usize]);
        idx += step;
    }

    log::debug!(
        "mono downsample: {} -> {} samples ({} -> {} Hz)",
        audio.mono.len(),
        picked.len(),
        audio.mono_rate,
        target_rate_hz
    );
    audio.mono = picked;
    audio.mono_rate = target_rate_hz as u32;
    audio.duration_ms = duration_ms_for(audio.mono.len(), audio.mono_rate);
    Ok(())
}

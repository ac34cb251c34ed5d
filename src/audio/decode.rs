use anyhow::{bail, Context, Result};
use hound::SampleFormat;
use std::path::Path;

/// Decoded PCM held in memory for the analysis passes.
///
/// The stereo buffers always stay at the decode rate; only the mono buffer
/// (and its derived duration) changes when the downsample step runs.
#[derive(Debug)]
pub struct DecodedAudio {
    pub mono_rate: u32,
    pub mono: Vec<f32>,
    pub stereo_rate: u32,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub duration_ms: u32,
}

impl DecodedAudio {
    /// Build the three analysis buffers from decoded stereo channels.
    pub fn from_channels(left: Vec<f32>, right: Vec<f32>, rate: u32) -> Result<Self> {
        debug_assert_eq!(left.len(), right.len());
        let mut mono = Vec::new();
        mono.try_reserve_exact(left.len())
            .context("mono buffer allocation")?;
        mono.extend(left.iter().zip(right.iter()).map(|(&l, &r)| 0.5 * (l + r)));
        let duration_ms = duration_ms_for(left.len(), rate);
        Ok(Self {
            mono_rate: rate,
            mono,
            stereo_rate: rate,
            left,
            right,
            duration_ms,
        })
    }
}

/// Track duration in milliseconds, truncated, never reported as zero.
pub fn duration_ms_for(sample_count: usize, rate: u32) -> u32 {
    if rate == 0 {
        return 1;
    }
    let ms = (sample_count as u64).saturating_mul(1000) / u64::from(rate);
    (ms as u32).max(1)
}

/// Decode `path` into PCM buffers.
///
/// The native WAV path runs first, unconditionally. A file that carries a
/// `.wav`/`.wave` extension but fails the WAV profile is a hard failure so
/// that malformed WAV files never silently escalate to ffmpeg; everything
/// else gets exactly one ffmpeg attempt.
pub fn decode_track(path: &str) -> Result<DecodedAudio> {
    match decode_wav(path) {
        Ok(audio) => {
            log::info!(
                "wav decode: {} frames at {} Hz ({} ms)",
                audio.left.len(),
                audio.stereo_rate,
                audio.duration_ms
            );
            Ok(audio)
        }
        Err(err) if has_wav_extension(path) => Err(err.context("wav decode")),
        Err(err) => {
            log::debug!("wav fast path rejected ({err:#}); delegating to ffmpeg");
            super::ffmpeg::decode(path)
        }
    }
}

fn has_wav_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav") || ext.eq_ignore_ascii_case("wave"))
}

/// Native WAV fast path. Accepts integer PCM, 16-bit, one or two channels;
/// anything else is left for the dispatch policy to route.
fn decode_wav(path: &str) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::open(path).context("open wav")?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int
        || spec.bits_per_sample != 16
        || !(1..=2).contains(&spec.channels)
    {
        bail!(
            "unsupported wav profile: format={:?} bits={} channels={}",
            spec.sample_format,
            spec.bits_per_sample,
            spec.channels
        );
    }
    let channels = usize::from(spec.channels);
    let frame_count = reader.len() as usize / channels;
    if frame_count == 0 {
        bail!("wav has no sample frames");
    }

    let mut left = Vec::new();
    let mut right = Vec::new();
    left.try_reserve_exact(frame_count)
        .context("left channel allocation")?;
    right
        .try_reserve_exact(frame_count)
        .context("right channel allocation")?;

    let mut samples = reader.samples::<i16>();
    for _ in 0..frame_count {
        let first = match samples.next() {
            Some(sample) => sample.context("read wav samples")?,
            None => bail!("wav data chunk truncated"),
        };
        let second = if channels == 2 {
            match samples.next() {
                Some(sample) => sample.context("read wav samples")?,
                None => bail!("wav data chunk truncated"),
            }
        } else {
            first
        };
        left.push(f32::from(first) / 32_768.0);
        right.push(f32::from(second) / 32_768.0);
    }

    DecodedAudio::from_channels(left, right, spec.sample_rate)
}

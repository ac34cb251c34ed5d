use anyhow::{bail, Result};
use serde::Deserialize;

pub const REQUEST_SCHEMA: &str = "tz_player.native_spectrum_helper_request.v1";

const DEFAULT_MONO_TARGET_RATE_HZ: i64 = 11_025;
const DEFAULT_SPECTRUM_HOP_MS: i64 = 40;
const DEFAULT_BAND_COUNT: i64 = 48;
const DEFAULT_SPECTRUM_MAX_FRAMES: i64 = 12_000;
const DEFAULT_BEAT_HOP_MS: i64 = 40;
const DEFAULT_BEAT_MAX_FRAMES: i64 = 12_000;
const DEFAULT_WAVEFORM_HOP_MS: i64 = 20;
const DEFAULT_WAVEFORM_MAX_FRAMES: i64 = 30_000;

const MIN_HOP_MS: i64 = 10;
const MIN_BAND_COUNT: i64 = 8;

/// Validated analysis request with all defaults and floors applied.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub track_path: String,
    pub spectrum: SpectrumParams,
    pub beat: Option<BeatParams>,
    pub waveform_proxy: Option<WaveformParams>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumParams {
    /// Target rate for the mono analysis buffer; values <= 0 disable the
    /// downsample step.
    pub mono_target_rate_hz: i64,
    pub hop_ms: u32,
    pub band_count: usize,
    pub max_frames: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BeatParams {
    pub hop_ms: u32,
    pub max_frames: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaveformParams {
    pub hop_ms: u32,
    pub max_frames: usize,
}

/// Wire shape of the request. Every field is optional here; `resolve`
/// enforces the contract and fills in defaults. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
struct WireRequest {
    schema: Option<String>,
    track_path: Option<String>,
    spectrum: Option<WireSpectrum>,
    beat: Option<WireBeat>,
    waveform_proxy: Option<WireWaveform>,
    // Legacy top-level aliases, kept for callers that predate the nested
    // config objects.
    mono_target_rate_hz: Option<i64>,
    hop_ms: Option<i64>,
    band_count: Option<i64>,
    max_frames: Option<i64>,
    beat_timeline_hop_ms: Option<i64>,
    beat_timeline_max_frames: Option<i64>,
    waveform_proxy_hop_ms: Option<i64>,
    waveform_proxy_max_frames: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireSpectrum {
    mono_target_rate_hz: Option<i64>,
    hop_ms: Option<i64>,
    band_count: Option<i64>,
    max_frames: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireBeat {
    hop_ms: Option<i64>,
    max_frames: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireWaveform {
    hop_ms: Option<i64>,
    max_frames: Option<i64>,
}

/// Parse the raw stdin payload into a validated [`Request`].
///
/// The two error messages here are part of the operational contract: the
/// caller greps for them and both map to exit code 2.
pub fn parse(raw: &str) -> Result<Request> {
    if raw.trim().is_empty() {
        bail!("invalid json request");
    }
    let wire: WireRequest = match serde_json::from_str(raw) {
        Ok(wire) => wire,
        Err(err) => {
            log::debug!("request parse error: {err}");
            bail!("invalid json request");
        }
    };
    wire.resolve()
}

impl WireRequest {
    fn resolve(self) -> Result<Request> {
        if self.schema.as_deref() != Some(REQUEST_SCHEMA) {
            bail!("invalid request schema or fields");
        }
        let track_path = match self.track_path {
            Some(path) if !path.is_empty() => path,
            _ => bail!("invalid request schema or fields"),
        };

        let spectrum_obj = self.spectrum.unwrap_or_default();
        let spectrum = SpectrumParams {
            mono_target_rate_hz: pick(
                spectrum_obj.mono_target_rate_hz,
                self.mono_target_rate_hz,
                DEFAULT_MONO_TARGET_RATE_HZ,
            ),
            hop_ms: clamp_hop(pick(spectrum_obj.hop_ms, self.hop_ms, DEFAULT_SPECTRUM_HOP_MS)),
            band_count: pick(spectrum_obj.band_count, self.band_count, DEFAULT_BAND_COUNT)
                .max(MIN_BAND_COUNT) as usize,
            max_frames: clamp_frames(pick(
                spectrum_obj.max_frames,
                self.max_frames,
                DEFAULT_SPECTRUM_MAX_FRAMES,
            )),
        };

        // Beat analysis is opt-in: any recognized field in the nested object
        // enables it, as does the legacy flat hop alias.
        let beat_obj = self.beat.unwrap_or_default();
        let beat_enabled = beat_obj.hop_ms.is_some()
            || beat_obj.max_frames.is_some()
            || self.beat_timeline_hop_ms.is_some();
        let beat = beat_enabled.then(|| BeatParams {
            hop_ms: clamp_hop(pick(
                beat_obj.hop_ms,
                self.beat_timeline_hop_ms,
                DEFAULT_BEAT_HOP_MS,
            )),
            max_frames: clamp_frames(pick(
                beat_obj.max_frames,
                self.beat_timeline_max_frames,
                DEFAULT_BEAT_MAX_FRAMES,
            )),
        });

        let waveform_obj = self.waveform_proxy.unwrap_or_default();
        let waveform_enabled = waveform_obj.hop_ms.is_some()
            || waveform_obj.max_frames.is_some()
            || self.waveform_proxy_hop_ms.is_some();
        let waveform_proxy = waveform_enabled.then(|| WaveformParams {
            hop_ms: clamp_hop(pick(
                waveform_obj.hop_ms,
                self.waveform_proxy_hop_ms,
                DEFAULT_WAVEFORM_HOP_MS,
            )),
            max_frames: clamp_frames(pick(
                waveform_obj.max_frames,
                self.waveform_proxy_max_frames,
                DEFAULT_WAVEFORM_MAX_FRAMES,
            )),
        });

        Ok(Request {
            track_path,
            spectrum,
            beat,
            waveform_proxy,
        })
    }
}

/// Nested object field wins, then the legacy flat alias, then the default.
fn pick(nested: Option<i64>, legacy: Option<i64>, default: i64) -> i64 {
    nested.or(legacy).unwrap_or(default)
}

fn clamp_hop(value: i64) -> u32 {
    value.clamp(MIN_HOP_MS, i64::from(u32::MAX)) as u32
}

fn clamp_frames(value: i64) -> usize {
    value.max(1) as usize
}

use anyhow::{Context, Result};
use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};
use std::io::Write;

use crate::analysis::beat::{BeatFrame, BeatResult};
use crate::analysis::spectrum::{SpectrumFrame, SpectrumResult};
use crate::analysis::waveform::{WaveformProxyFrame, WaveformProxyResult};

pub const RESPONSE_SCHEMA: &str = "tz_player.native_spectrum_helper_response.v1";
pub const HELPER_VERSION: &str = concat!("tz-spectrum-helper/", env!("CARGO_PKG_VERSION"));

/// The single response object written to stdout. Field declaration order is
/// the wire order; callers parse this with simple tooling and pin on it.
#[derive(Serialize)]
pub struct Response {
    schema: &'static str,
    helper_version: &'static str,
    duration_ms: u32,
    frames: Vec<SpectrumFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    beat: Option<BeatBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    waveform_proxy: Option<WaveformBlock>,
    timings: Timings,
}

#[derive(Serialize)]
struct BeatBlock {
    duration_ms: u32,
    bpm: f64,
    frames: Vec<BeatFrame>,
}

#[derive(Serialize)]
struct WaveformBlock {
    duration_ms: u32,
    frames: Vec<WaveformProxyFrame>,
}

#[derive(Serialize)]
pub struct Timings {
    decode_ms: f64,
    spectrum_ms: f64,
    beat_ms: f64,
    waveform_proxy_ms: f64,
    total_ms: f64,
}

impl Timings {
    pub fn new(
        decode_ms: f64,
        spectrum_ms: f64,
        beat_ms: f64,
        waveform_proxy_ms: f64,
        total_ms: f64,
    ) -> Self {
        Self {
            decode_ms: round3(decode_ms),
            spectrum_ms: round3(spectrum_ms),
            beat_ms: round3(beat_ms),
            waveform_proxy_ms: round3(waveform_proxy_ms),
            total_ms: round3(total_ms),
        }
    }
}

impl Response {
    pub fn assemble(
        spectrum: SpectrumResult,
        beat: Option<BeatResult>,
        waveform_proxy: Option<WaveformProxyResult>,
        timings: Timings,
    ) -> Self {
        let beat = beat
            .filter(|result| !result.frames.is_empty())
            .map(|result| BeatBlock {
                duration_ms: result.duration_ms,
                bpm: round3(result.bpm.max(0.0)),
                frames: result.frames,
            });
        let waveform_proxy = waveform_proxy
            .filter(|result| !result.frames.is_empty())
            .map(|result| WaveformBlock {
                duration_ms: result.duration_ms,
                frames: result.frames,
            });
        Self {
            schema: RESPONSE_SCHEMA,
            helper_version: HELPER_VERSION,
            duration_ms: spectrum.duration_ms,
            frames: spectrum.frames,
            beat,
            waveform_proxy,
            timings,
        }
    }
}

/// Write the response as one JSON object with no trailing newline.
pub fn write_to(mut out: impl Write, response: &Response) -> Result<()> {
    serde_json::to_writer(&mut out, response).context("serialize response")?;
    out.flush().context("flush response")?;
    Ok(())
}

/// `%.3f`-equivalent rounding for timing and bpm values.
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// The frame types serialize as compact tuples, not objects; the cache layer
// stores millions of them.

impl Serialize for SpectrumFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.pos_ms)?;
        tuple.serialize_element(&self.bands)?;
        tuple.end()
    }
}

impl Serialize for BeatFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.pos_ms)?;
        tuple.serialize_element(&self.strength_u8)?;
        tuple.serialize_element(&self.is_beat)?;
        tuple.end()
    }
}

impl Serialize for WaveformProxyFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(5)?;
        tuple.serialize_element(&self.pos_ms)?;
        tuple.serialize_element(&self.lmin)?;
        tuple.serialize_element(&self.lmax)?;
        tuple.serialize_element(&self.rmin)?;
        tuple.serialize_element(&self.rmax)?;
        tuple.end()
    }
}

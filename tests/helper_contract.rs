//! End-to-end tests for the stdio contract: spawn the built helper, feed a
//! request on stdin, and check the response object, exit code, and stderr
//! diagnostics.

use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

const REQUEST_SCHEMA: &str = "tz_player.native_spectrum_helper_request.v1";
const RESPONSE_SCHEMA: &str = "tz_player.native_spectrum_helper_response.v1";

fn run_helper(stdin_payload: &str) -> Output {
    run_helper_with(stdin_payload, |_| {})
}

fn run_helper_with(stdin_payload: &str, configure: impl FnOnce(&mut Command)) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tz-spectrum-helper"));
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    configure(&mut cmd);
    let mut child = cmd.spawn().expect("spawn helper");
    child
        .stdin
        .as_mut()
        .expect("helper stdin")
        .write_all(stdin_payload.as_bytes())
        .expect("write request");
    drop(child.stdin.take());
    child.wait_with_output().expect("helper output")
}

fn response_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "helper failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("response json")
}

fn wav_spec(channels: u16) -> hound::WavSpec {
    hound::WavSpec {
        channels,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn write_sine_wav(path: &Path, seconds: f32, freq_hz: f32) {
    let mut writer = hound::WavWriter::create(path, wav_spec(1)).unwrap();
    let total = (44_100.0 * seconds) as usize;
    for i in 0..total {
        let value = (2.0 * std::f32::consts::PI * freq_hz * i as f32 / 44_100.0).sin();
        writer.write_sample((value * 0.8 * 32_767.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn write_silent_stereo_wav(path: &Path, seconds: f32) {
    let mut writer = hound::WavWriter::create(path, wav_spec(2)).unwrap();
    for _ in 0..(44_100.0 * seconds) as usize {
        writer.write_sample(0i16).unwrap();
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn write_constant_stereo_wav(path: &Path, seconds: f32, left: f32, right: f32) {
    let mut writer = hound::WavWriter::create(path, wav_spec(2)).unwrap();
    for _ in 0..(44_100.0 * seconds) as usize {
        writer.write_sample((left * 32_768.0) as i16).unwrap();
        writer.write_sample((right * 32_768.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Clicks of `click_ms` at a fixed period, for the beat pass.
fn write_click_wav(path: &Path, seconds: f32, period_ms: u32, click_ms: u32) {
    let mut writer = hound::WavWriter::create(path, wav_spec(1)).unwrap();
    let total = (44_100.0 * seconds) as usize;
    let period = (44_100 * period_ms as usize) / 1000;
    let click = (44_100 * click_ms as usize) / 1000;
    for i in 0..total {
        let in_click = i % period < click;
        writer
            .write_sample(if in_click { (0.9 * 32_767.0) as i16 } else { 0 })
            .unwrap();
    }
    writer.finalize().unwrap();
}

/// WAV header that claims a 1000-byte data chunk but truncates after 8 bytes.
fn write_truncated_wav(path: &Path) {
    let mut bytes: Vec<u8> = Vec::new();
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&1044u32.to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&44_100u32.to_le_bytes());
    bytes.extend_from_slice(&88_200u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&1000u32.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 8]);
    std::fs::write(path, bytes).unwrap();
}

fn request_for(track_path: &Path, extra: Value) -> String {
    let mut payload = json!({
        "schema": REQUEST_SCHEMA,
        "track_path": track_path.to_str().unwrap(),
    });
    payload
        .as_object_mut()
        .unwrap()
        .extend(extra.as_object().unwrap().clone());
    payload.to_string()
}

#[test]
fn sine_wav_happy_path() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("sine.wav");
    write_sine_wav(&wav, 1.0, 440.0);

    let request = request_for(&wav, json!({"spectrum": {"band_count": 8, "max_frames": 64}}));
    let output = run_helper(&request);
    let response = response_json(&output);

    assert_eq!(response["schema"], RESPONSE_SCHEMA);
    assert!(!response["helper_version"].as_str().unwrap().is_empty());
    assert_eq!(response["duration_ms"], 1_000);

    let frames = response["frames"].as_array().unwrap();
    assert_eq!(frames.len(), 25);
    for frame in frames {
        let bands = frame[1].as_array().unwrap();
        assert_eq!(bands.len(), 8);
        for band in bands {
            let value = band.as_u64().unwrap();
            assert!(value <= 255);
        }
    }
    // Positions advance by one 40 ms hop.
    for pair in frames.windows(2) {
        let delta = pair[1][0].as_i64().unwrap() - pair[0][0].as_i64().unwrap();
        assert_eq!(delta, 40);
    }
    // Normalization puts full scale somewhere in the matrix.
    let max_byte = frames
        .iter()
        .flat_map(|f| f[1].as_array().unwrap().iter())
        .map(|b| b.as_u64().unwrap())
        .max()
        .unwrap();
    assert_eq!(max_byte, 255);

    // Optional blocks stay out of the response when not requested.
    assert!(response.get("beat").is_none());
    assert!(response.get("waveform_proxy").is_none());

    let timings = response["timings"].as_object().unwrap();
    for key in [
        "decode_ms",
        "spectrum_ms",
        "beat_ms",
        "waveform_proxy_ms",
        "total_ms",
    ] {
        assert!(timings[key].as_f64().unwrap() >= 0.0);
    }
}

#[test]
fn legacy_flat_fields_match_nested_request() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("sine.wav");
    write_sine_wav(&wav, 1.0, 440.0);

    let nested = request_for(
        &wav,
        json!({"spectrum": {"mono_target_rate_hz": 11_025, "hop_ms": 40, "band_count": 8, "max_frames": 64}}),
    );
    let legacy = request_for(
        &wav,
        json!({"mono_target_rate_hz": 11_025, "hop_ms": 40, "band_count": 8, "max_frames": 64}),
    );

    let mut nested_response = response_json(&run_helper(&nested));
    let mut legacy_response = response_json(&run_helper(&legacy));
    // Timings are wall-clock and differ run to run.
    nested_response.as_object_mut().unwrap().remove("timings");
    legacy_response.as_object_mut().unwrap().remove("timings");
    assert_eq!(nested_response, legacy_response);
}

#[test]
fn silent_wav_is_stable_all_zero() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("silence.wav");
    write_silent_stereo_wav(&wav, 1.0);

    let request = request_for(
        &wav,
        json!({
            "spectrum": {"band_count": 8, "max_frames": 100},
            "beat": {"hop_ms": 40, "max_frames": 1000},
            "waveform_proxy": {"hop_ms": 20, "max_frames": 200},
        }),
    );
    let response = response_json(&run_helper(&request));

    for frame in response["frames"].as_array().unwrap() {
        assert!(frame[1]
            .as_array()
            .unwrap()
            .iter()
            .all(|b| b.as_u64().unwrap() == 0));
    }

    let beat = &response["beat"];
    assert_eq!(beat["bpm"], 0.0);
    assert_eq!(beat["duration_ms"], response["duration_ms"]);
    for frame in beat["frames"].as_array().unwrap() {
        assert_eq!(frame[1], 0);
        assert_eq!(frame[2], false);
    }

    let waveform = &response["waveform_proxy"];
    assert_eq!(waveform["duration_ms"], response["duration_ms"]);
    for frame in waveform["frames"].as_array().unwrap() {
        for channel_extreme in &frame.as_array().unwrap()[1..] {
            assert_eq!(channel_extreme.as_i64().unwrap(), 0);
        }
    }
}

#[test]
fn waveform_proxy_tracks_constant_channels() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("constant.wav");
    write_constant_stereo_wav(&wav, 2.0, 0.5, -0.5);

    let request = request_for(
        &wav,
        json!({"waveform_proxy": {"hop_ms": 20, "max_frames": 200}}),
    );
    let response = response_json(&run_helper(&request));

    let frames = response["waveform_proxy"]["frames"].as_array().unwrap();
    assert_eq!(frames.len(), 100);
    let mut last_pos = -1i64;
    for frame in frames {
        let pos = frame[0].as_i64().unwrap();
        assert!(pos > last_pos);
        last_pos = pos;
        assert_eq!(frame[1].as_i64().unwrap(), 64);
        assert_eq!(frame[2].as_i64().unwrap(), 64);
        assert_eq!(frame[3].as_i64().unwrap(), -64);
        assert_eq!(frame[4].as_i64().unwrap(), -64);
    }
}

#[test]
fn beat_pass_locks_onto_click_track() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("clicks.wav");
    // 480 ms period = 125 BPM, 12 hops at the 40 ms analysis hop.
    write_click_wav(&wav, 10.0, 480, 20);

    let request = request_for(&wav, json!({"beat": {"hop_ms": 40, "max_frames": 1000}}));
    let response = response_json(&run_helper(&request));

    let beat = &response["beat"];
    let bpm = beat["bpm"].as_f64().unwrap();
    assert!((115.0..=135.0).contains(&bpm), "bpm {bpm}");

    let frames = beat["frames"].as_array().unwrap();
    let flagged: Vec<usize> = frames
        .iter()
        .enumerate()
        .filter(|(_, f)| f[2].as_bool().unwrap())
        .map(|(i, _)| i)
        .collect();
    assert!(
        (15..=25).contains(&flagged.len()),
        "flagged {} of {} frames",
        flagged.len(),
        frames.len()
    );
    let phase = flagged[0] % 12;
    assert!(flagged.iter().all(|&i| i % 12 == phase), "{flagged:?}");
}

#[test]
fn bad_schema_is_a_contract_failure() {
    let output = run_helper("{\"schema\":\"wrong.v1\",\"track_path\":\"/tmp/x.wav\"}");
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid request schema or fields"), "{stderr}");
    assert_eq!(stderr.trim_end().lines().count(), 1);
}

#[test]
fn empty_stdin_is_a_contract_failure() {
    let output = run_helper("");
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid json request"));
}

#[test]
fn truncated_wav_fails_without_ffmpeg_fallback() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("truncated.wav");
    write_truncated_wav(&wav);

    let output = run_helper(&request_for(&wav, json!({})));
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("analysis failed (decode)"), "{stderr}");
    assert!(!stderr.contains("ffmpeg"), "{stderr}");
}

#[test]
fn missing_ffmpeg_is_a_decode_failure() {
    let dir = TempDir::new().unwrap();
    let track = dir.path().join("track.mp3");
    std::fs::write(&track, b"not really an mp3").unwrap();

    let request = request_for(&track, json!({}));
    let output = run_helper_with(&request, |cmd| {
        cmd.env("PATH", "");
    });
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("analysis failed (decode)"), "{stderr}");
    assert!(stderr.contains("ffmpeg"), "{stderr}");
}

#[test]
fn response_blocks_keep_wire_order() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("sine.wav");
    write_sine_wav(&wav, 1.0, 440.0);

    let request = request_for(
        &wav,
        json!({
            "beat": {"hop_ms": 40, "max_frames": 100},
            "waveform_proxy": {"hop_ms": 20, "max_frames": 100},
        }),
    );
    let output = run_helper(&request);
    assert!(output.status.success());
    let raw = String::from_utf8(output.stdout).unwrap();

    assert!(raw.starts_with("{\"schema\":"));
    let frames_at = raw.find("\"frames\"").unwrap();
    let beat_at = raw.find("\"beat\"").unwrap();
    let waveform_at = raw.find("\"waveform_proxy\"").unwrap();
    let timings_at = raw.find("\"timings\"").unwrap();
    assert!(frames_at < beat_at);
    assert!(beat_at < waveform_at);
    assert!(waveform_at < timings_at);
    // Booleans are bare JSON literals, never strings.
    assert!(!raw.contains("\"true\"") && !raw.contains("\"false\""));
}

#[test]
fn duration_is_consistent_across_blocks() {
    let dir = TempDir::new().unwrap();
    let wav = dir.path().join("sine.wav");
    write_sine_wav(&wav, 2.0, 220.0);

    let request = request_for(
        &wav,
        json!({
            "beat": {"hop_ms": 40, "max_frames": 1000},
            "waveform_proxy": {"hop_ms": 20, "max_frames": 1000},
        }),
    );
    let response = response_json(&run_helper(&request));
    let duration = response["duration_ms"].as_i64().unwrap();
    assert!((1_999..=2_001).contains(&duration));
    assert_eq!(response["beat"]["duration_ms"].as_i64().unwrap(), duration);
    assert_eq!(
        response["waveform_proxy"]["duration_ms"].as_i64().unwrap(),
        duration
    );
}

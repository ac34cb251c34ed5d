mod analysis;
mod audio;
mod request;
mod response;

use anyhow::{Context, Result};
use std::io::Read;
use std::time::Instant;

use request::Request;
use response::{Response, Timings};

fn main() {
    // Tracing is opt-in via RUST_LOG; by default stderr carries nothing but
    // the single contract diagnostic emitted below on failure.
    env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_millis()
        .init();

    let request = match read_request() {
        Ok(request) => request,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(2);
        }
    };
    if let Err(err) = run(&request) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

/// Read stdin to EOF and parse the analysis request.
fn read_request() -> Result<Request> {
    let mut raw = String::new();
    if std::io::stdin().lock().read_to_string(&mut raw).is_err() {
        anyhow::bail!("invalid json request");
    }
    request::parse(&raw)
}

/// The whole pipeline: decode, resample, the enabled analysis passes, then
/// one response object on stdout. Nothing is written to stdout until every
/// stage has succeeded.
fn run(request: &Request) -> Result<()> {
    log::info!("analyzing {}", request.track_path);

    let total_start = Instant::now();
    let mut decoded = audio::decode::decode_track(&request.track_path)
        .context("analysis failed (decode)")?;
    audio::resample::downsample_mono(&mut decoded, request.spectrum.mono_target_rate_hz)
        .context("analysis failed (resample)")?;
    let decode_ms = elapsed_ms(total_start);

    let spectrum_start = Instant::now();
    let spectrum = analysis::spectrum::compute(&decoded, &request.spectrum)
        .context("analysis failed (spectrum)")?;
    let spectrum_ms = elapsed_ms(spectrum_start);

    let mut beat_ms = 0.0;
    let beat = match &request.beat {
        Some(params) => {
            let beat_start = Instant::now();
            let result =
                analysis::beat::compute(&decoded, params).context("analysis failed (beat)")?;
            beat_ms = elapsed_ms(beat_start);
            Some(result)
        }
        None => None,
    };

    let mut waveform_ms = 0.0;
    let waveform = match &request.waveform_proxy {
        Some(params) => {
            let waveform_start = Instant::now();
            let result = analysis::waveform::compute(&decoded, params)
                .context("analysis failed (waveform_proxy)")?;
            waveform_ms = elapsed_ms(waveform_start);
            Some(result)
        }
        None => None,
    };
    let total_ms = elapsed_ms(total_start);

    log::info!(
        "analysis done: {} spectrum frames in {total_ms:.1} ms",
        spectrum.frames.len()
    );

    let response = Response::assemble(
        spectrum,
        beat,
        waveform,
        Timings::new(decode_ms, spectrum_ms, beat_ms, waveform_ms, total_ms),
    );
    response::write_to(std::io::stdout().lock(), &response).context("analysis failed (emit)")?;
    Ok(())
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

use anyhow::{bail, Context, Result};
use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};

use super::decode::DecodedAudio;

/// Everything ffmpeg hands back is s16le stereo at this rate.
pub const DECODE_RATE_HZ: u32 = 44_100;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Decode an arbitrary container by delegating to an ffmpeg child process.
///
/// The child writes raw interleaved s16le stereo PCM to its stdout pipe;
/// its own stdin and stderr are bound to the null device. The helper never
/// writes to the child and reads the pipe to EOF before collecting the
/// exit status.
pub fn decode(path: &str) -> Result<DecodedAudio> {
    decode_child(path).context("ffmpeg decode")
}

fn decode_child(path: &str) -> Result<DecodedAudio> {
    let mut child = Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(path)
        .args([
            "-vn", "-sn", "-dn", "-f", "s16le", "-acodec", "pcm_s16le", "-ac", "2", "-ar",
            "44100", "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn ffmpeg (is it on PATH?)")?;

    let mut stdout = child
        .stdout
        .take()
        .context("ffmpeg stdout pipe unavailable")?;
    let raw = match read_pcm_stream(&mut stdout) {
        Ok(raw) => raw,
        Err(err) => {
            // Abandoning the read: reap the child instead of leaking it.
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }
    };
    drop(stdout);

    let status = child.wait().context("wait for ffmpeg")?;
    if !status.success() {
        bail!("ffmpeg exit_code={}", status.code().unwrap_or(-1));
    }
    if raw.len() < 4 {
        bail!("insufficient PCM bytes len={}", raw.len());
    }

    let frame_count = raw.len() / 4;
    log::info!("ffmpeg decode: {frame_count} frames at {DECODE_RATE_HZ} Hz");

    let mut left = Vec::new();
    let mut right = Vec::new();
    left.try_reserve_exact(frame_count)
        .context("left channel allocation")?;
    right
        .try_reserve_exact(frame_count)
        .context("right channel allocation")?;
    for frame in raw.chunks_exact(4) {
        let l = i16::from_le_bytes([frame[0], frame[1]]);
        let r = i16::from_le_bytes([frame[2], frame[3]]);
        left.push(f32::from(l) / 32_768.0);
        right.push(f32::from(r) / 32_768.0);
    }

    DecodedAudio::from_channels(left, right, DECODE_RATE_HZ)
}

/// Blocking read to EOF with interrupted reads retried and every buffer
/// growth checked, so a huge track surfaces as a decode error rather than
/// an abort.
fn read_pcm_stream(stream: &mut impl Read) -> Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("read pcm stream"),
        };
        buf.try_reserve(n).context("pcm buffer allocation")?;
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf)
}

//! # Transcoding Pipeline
//!
//! Converts a compressed source file into raw linear PCM by driving an
//! external encoder process (ffmpeg by default). The output is always
//! single-channel, 16-bit signed little-endian samples at the requested
//! target rate, written to a uniquely named temporary file.
//!
//! ## Process Lifetime:
//! The encoder runs under a hard wall-clock timeout. On expiry the process
//! is killed and the session sees `TranscodeError::Timeout`; a nonzero exit
//! carries the captured diagnostic output; a zero exit with a missing or
//! empty output file is still a failure (`EmptyOutput`).
//!
//! ## Artifact Ownership:
//! A successful transcode hands the `TranscodeArtifact` to the caller, which
//! becomes exclusively responsible for deleting it. The pipeline only cleans
//! up its own debris on failure paths.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cap on captured encoder diagnostics carried inside an error.
const MAX_STDERR_LEN: usize = 2048;

/// Encoder invocation settings, sourced from the application configuration.
#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    /// Encoder binary, e.g. "ffmpeg" or an absolute path to it.
    pub encoder_path: String,

    /// Hard wall-clock limit for one encoder run.
    pub timeout: Duration,
}

/// The temporary raw-PCM file produced by one encoder run.
///
/// Owned exclusively by the playback session that requested it; never shared
/// across sessions, never cached.
#[derive(Debug)]
pub struct TranscodeArtifact {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub target_sample_rate: u32,
    pub created_at: DateTime<Utc>,
}

/// Failure modes of one encoder invocation. None of these are retried.
#[derive(Debug)]
pub enum TranscodeError {
    /// The encoder binary could not be spawned or waited on.
    Spawn(std::io::Error),

    /// The encoder exceeded the wall-clock limit and was killed.
    Timeout(u64),

    /// The encoder exited with a nonzero status.
    EncoderFailed {
        status: Option<i32>,
        stderr: String,
    },

    /// The encoder reported success but produced no usable output.
    EmptyOutput(PathBuf),
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeError::Spawn(err) => write!(f, "failed to run encoder: {}", err),
            TranscodeError::Timeout(secs) => {
                write!(f, "encoder exceeded the {}s time limit", secs)
            }
            TranscodeError::EncoderFailed { status, stderr } => match status {
                Some(code) => write!(f, "encoder exited with status {}: {}", code, stderr),
                None => write!(f, "encoder was terminated by a signal: {}", stderr),
            },
            TranscodeError::EmptyOutput(path) => {
                write!(f, "encoder produced no output at {}", path.display())
            }
        }
    }
}

/// Transcode `source` to raw 16-bit mono PCM at `target_sample_rate`.
///
/// ## Returns:
/// - **Ok(artifact)**: output file exists and is non-empty; the caller owns it
/// - **Err(TranscodeError)**: nothing usable was produced and any partial
///   output has already been removed
pub async fn transcode(
    settings: &TranscodeSettings,
    source: &Path,
    target_sample_rate: u32,
) -> Result<TranscodeArtifact, TranscodeError> {
    let output_path = artifact_path(source, target_sample_rate);

    debug!(
        source = %source.display(),
        output = %output_path.display(),
        rate = target_sample_rate,
        "Starting transcode"
    );

    let mut command = Command::new(&settings.encoder_path);
    command
        .arg("-y") // overwrite-if-exists
        .arg("-i")
        .arg(source)
        .args(["-f", "s16le", "-acodec", "pcm_s16le", "-ac", "1", "-ar"])
        .arg(target_sample_rate.to_string())
        .arg(&output_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(TranscodeError::Spawn)?;

    let output = match timeout(settings.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            remove_debris(&output_path);
            return Err(TranscodeError::Spawn(err));
        }
        Err(_elapsed) => {
            // kill_on_drop has already reaped the encoder at this point.
            warn!(source = %source.display(), "Encoder timed out and was killed");
            remove_debris(&output_path);
            return Err(TranscodeError::Timeout(settings.timeout.as_secs()));
        }
    };

    if !output.status.success() {
        // The encoder prints its banner first and the actual error last;
        // keep the tail when the output is oversized.
        let start = output.stderr.len().saturating_sub(MAX_STDERR_LEN);
        let stderr = String::from_utf8_lossy(&output.stderr[start..]).trim().to_string();
        remove_debris(&output_path);
        return Err(TranscodeError::EncoderFailed {
            status: output.status.code(),
            stderr,
        });
    }

    // A zero exit status is not enough; the output must actually hold samples.
    match std::fs::metadata(&output_path) {
        Ok(meta) if meta.len() > 0 => {}
        _ => {
            remove_debris(&output_path);
            return Err(TranscodeError::EmptyOutput(output_path));
        }
    }

    info!(
        source = %source.display(),
        output = %output_path.display(),
        rate = target_sample_rate,
        "Transcode complete"
    );

    Ok(TranscodeArtifact {
        source_path: source.to_path_buf(),
        output_path,
        target_sample_rate,
        created_at: Utc::now(),
    })
}

/// Build a collision-free output path for one transcode.
///
/// The name embeds the source identity and target rate so concurrent
/// sessions transcoding the same source at different rates never share a
/// file, plus a UUID so identical requests do not either.
fn artifact_path(source: &Path, target_sample_rate: u32) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("source");

    std::env::temp_dir().join(format!(
        "{}-{}hz-{}.raw",
        stem,
        target_sample_rate,
        Uuid::new_v4()
    ))
}

fn remove_debris(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "Could not remove partial encoder output");
        }
    }
}

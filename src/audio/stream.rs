//! # Playback Session State Machine
//!
//! Orchestrates one file-playback session end to end:
//!
//! ```text
//! Validating -> (Transcoding ->)? Streaming -> Draining -> Closed
//! ```
//!
//! with a direct transition to Closed from any state on an irrecoverable
//! error or peer disconnect. The session validates the requested resource
//! against the audio root, transcodes compressed sources to raw PCM, computes
//! a pacing plan, and drives the timed send loop while polling a disconnect
//! flag once per chunk.
//!
//! ## Send Loop Ordering:
//! Each iteration checks for disconnect, then reads, then sends, then sleeps.
//! At most one chunk is ever in flight past a disconnect signal, which bounds
//! wasted work after the peer leaves.
//!
//! ## Cleanup Invariant:
//! A transcoding artifact created for this session is deleted on every exit
//! path - normal exhaustion, mid-stream error, disconnect, even an unwind -
//! via an RAII guard held for the whole Streaming lifetime.

use crate::audio::format;
use crate::audio::pacing::{self, PacingPlan};
use crate::audio::transcode::{self, TranscodeArtifact, TranscodeError, TranscodeSettings};
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Resource extensions the playback endpoint will serve. Anything else is
/// rejected before any file is opened.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg", "flac", "m4a"];

/// One incoming playback request, immutable once created.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Resource name as given by the client, relative to the audio root.
    pub resource_name: String,

    /// Sample rate parsed from the resource name by convention: a name
    /// containing "16000" selects wideband, "8000" narrowband.
    pub sample_rate_hint: Option<u32>,
}

impl StreamRequest {
    pub fn new(resource_name: &str) -> Self {
        let sample_rate_hint = if resource_name.contains("16000") {
            Some(16000)
        } else if resource_name.contains("8000") {
            Some(8000)
        } else {
            None
        };

        Self {
            resource_name: resource_name.to_string(),
            sample_rate_hint,
        }
    }
}

/// Where a session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Validating,
    Transcoding,
    Streaming,
    Draining,
    Closed,
}

/// The two normal ways a send loop ends.
///
/// A peer disconnect is a termination path, not an error: the session still
/// drains and reports success to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The byte source was exhausted; every chunk was delivered.
    Completed,
    /// The peer went away mid-stream; sending stopped within one chunk.
    Disconnected,
}

/// Terminal session failures, each mapped to a distinct non-1000 close code.
///
/// The playback wire contract is binary-only-or-closed: these are signaled
/// exclusively through the close frame, never as a text payload.
#[derive(Debug)]
pub enum StreamError {
    /// The resource name escapes the audio root. Rejected before any I/O.
    PathViolation(String),
    ResourceNotFound(String),
    UnsupportedFormat(String),
    Transcode(TranscodeError),
    /// Read failure mid-stream. Logged, never retried - a retried chunk
    /// would arrive late and be worthless to a real-time consumer.
    Io(std::io::Error),
}

impl StreamError {
    /// WebSocket close code for this failure.
    pub fn close_code(&self) -> u16 {
        match self {
            StreamError::PathViolation(_) => 4001,
            StreamError::ResourceNotFound(_) => 4004,
            StreamError::UnsupportedFormat(_) => 4005,
            StreamError::Transcode(_) => 4006,
            StreamError::Io(_) => 4500,
        }
    }

    /// Short close reason accompanying the code.
    pub fn reason(&self) -> &'static str {
        match self {
            StreamError::PathViolation(_) => "invalid path",
            StreamError::ResourceNotFound(_) => "resource not found",
            StreamError::UnsupportedFormat(_) => "unsupported format",
            StreamError::Transcode(_) => "transcode failed",
            StreamError::Io(_) => "stream error",
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::PathViolation(name) => {
                write!(f, "resource name escapes the audio root: {}", name)
            }
            StreamError::ResourceNotFound(name) => write!(f, "no such resource: {}", name),
            StreamError::UnsupportedFormat(name) => {
                write!(f, "unsupported resource extension: {}", name)
            }
            StreamError::Transcode(err) => write!(f, "transcoding failed: {}", err),
            StreamError::Io(err) => write!(f, "stream I/O error: {}", err),
        }
    }
}

impl From<TranscodeError> for StreamError {
    fn from(err: TranscodeError) -> Self {
        StreamError::Transcode(err)
    }
}

/// The outbound half of an established connection, as seen by a session.
///
/// The WebSocket layer hands a session exclusive ownership of one of these
/// for its whole lifetime. Implementations must preserve `send_chunk` call
/// order on the wire.
pub trait StreamSink {
    /// Queue one binary chunk for transmission.
    fn send_chunk(&mut self, chunk: Vec<u8>);

    /// True once the peer has disconnected. Polled once per chunk; must not
    /// block.
    fn is_disconnected(&self) -> bool;
}

/// Everything a session needs from the application configuration.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Confinement boundary for every servable resource.
    pub audio_root: PathBuf,

    /// Target duration of one chunk in milliseconds.
    pub chunk_duration_ms: u64,

    /// Transcode target rate when the resource name carries no hint.
    pub default_sample_rate: u32,

    pub transcode: TranscodeSettings,
}

impl StreamSettings {
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self {
            audio_root: PathBuf::from(&config.audio.root_dir),
            chunk_duration_ms: config.audio.chunk_duration_ms,
            default_sample_rate: config.audio.default_sample_rate,
            transcode: TranscodeSettings {
                encoder_path: config.transcode.encoder_path.clone(),
                timeout: std::time::Duration::from_secs(config.transcode.timeout_secs),
            },
        }
    }
}

/// One playback session. Created per connection, destroyed on close.
#[derive(Debug)]
pub struct StreamSession {
    id: Uuid,
    request: StreamRequest,
    state: SessionState,
    bytes_sent: u64,
    chunks_sent: u64,
}

impl StreamSession {
    pub fn new(resource_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            request: StreamRequest::new(resource_name),
            state: SessionState::Validating,
            bytes_sent: 0,
            chunks_sent: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Run the session to completion.
    ///
    /// Whatever happens inside - clean exhaustion, validation failure,
    /// transcode failure, disconnect, read error - the session ends in
    /// `Closed` with any transcoding artifact deleted. The caller maps the
    /// result onto a close frame.
    pub async fn run<S: StreamSink>(
        &mut self,
        settings: &StreamSettings,
        sink: &mut S,
    ) -> Result<StreamOutcome, StreamError> {
        let result = self.drive(settings, sink).await;
        self.state = SessionState::Closed;

        match &result {
            Ok(outcome) => info!(
                session_id = %self.id,
                resource = %self.request.resource_name,
                bytes_sent = self.bytes_sent,
                chunks_sent = self.chunks_sent,
                outcome = ?outcome,
                "Playback session closed"
            ),
            Err(err) => warn!(
                session_id = %self.id,
                resource = %self.request.resource_name,
                error = %err,
                "Playback session failed"
            ),
        }

        result
    }

    async fn drive<S: StreamSink>(
        &mut self,
        settings: &StreamSettings,
        sink: &mut S,
    ) -> Result<StreamOutcome, StreamError> {
        let source = resolve_resource(&settings.audio_root, &self.request.resource_name)?;
        let is_raw_container = source
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));

        // Compressed sources are decoded to raw PCM up front; the artifact
        // guard holds the temp file for the rest of the session.
        let (data_path, properties, effective_hint, _artifact_guard) = if is_raw_container {
            let properties = format::inspect_wav(&source);
            match &properties {
                Some(props) => debug!(
                    session_id = %self.id,
                    sample_rate = props.sample_rate,
                    channels = props.channels,
                    bit_depth = props.bit_depth,
                    duration_seconds = props.duration_seconds,
                    "Container header inspected"
                ),
                None => debug!(
                    session_id = %self.id,
                    "No parseable container header; pacing from hints"
                ),
            }
            (source, properties, self.request.sample_rate_hint, ArtifactGuard::none())
        } else {
            self.state = SessionState::Transcoding;
            let target_rate = self
                .request
                .sample_rate_hint
                .unwrap_or(settings.default_sample_rate);
            let artifact = transcode::transcode(&settings.transcode, &source, target_rate).await?;
            let data_path = artifact.output_path.clone();

            // Raw encoder output has no container header; pace it at the
            // rate it was actually produced with.
            (data_path, None, Some(target_rate), ArtifactGuard::new(artifact))
        };

        let plan = pacing::compute_pacing(
            effective_hint,
            properties.as_ref(),
            settings.chunk_duration_ms,
        );

        debug!(
            session_id = %self.id,
            chunk_size = plan.chunk_size_bytes,
            delay_ms = plan.inter_chunk_delay.as_millis() as u64,
            header_skip = plan.header_skip_bytes,
            "Pacing plan computed"
        );

        self.state = SessionState::Streaming;
        let outcome = self.pump(&data_path, &plan, sink).await;
        self.state = SessionState::Draining;

        // _artifact_guard drops at the end of this scope, removing the
        // transcode temp file no matter how pump() exited.
        outcome
    }

    /// The timed send loop: check disconnect, read, send, sleep.
    async fn pump<S: StreamSink>(
        &mut self,
        path: &Path,
        plan: &PacingPlan,
        sink: &mut S,
    ) -> Result<StreamOutcome, StreamError> {
        let mut file = File::open(path).await.map_err(StreamError::Io)?;
        if plan.header_skip_bytes > 0 {
            file.seek(SeekFrom::Start(plan.header_skip_bytes))
                .await
                .map_err(StreamError::Io)?;
        }

        let mut buf = vec![0u8; plan.chunk_size_bytes];

        loop {
            if sink.is_disconnected() {
                debug!(session_id = %self.id, "Peer disconnected; stopping send loop");
                return Ok(StreamOutcome::Disconnected);
            }

            let n = read_chunk(&mut file, &mut buf).await.map_err(StreamError::Io)?;
            if n == 0 {
                return Ok(StreamOutcome::Completed);
            }

            sink.send_chunk(buf[..n].to_vec());
            self.bytes_sent += n as u64;
            self.chunks_sent += 1;

            tokio::time::sleep(plan.inter_chunk_delay).await;
        }
    }
}

/// Fill `buf` as far as the source allows; a short count is the final chunk,
/// zero means the source is exhausted.
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Resolve a resource name to a path confined to the audio root.
///
/// This is a security gate, not a convenience: traversal sequences and
/// separators are rejected before any filesystem access, the extension must
/// be on the allow-list, and the final canonicalized path must still live
/// under the canonicalized root (which also defeats symlink escapes).
fn resolve_resource(audio_root: &Path, name: &str) -> Result<PathBuf, StreamError> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(StreamError::PathViolation(name.to_string()));
    }

    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension {
        Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) => {}
        _ => return Err(StreamError::UnsupportedFormat(name.to_string())),
    }

    let candidate = audio_root.join(name);
    if !candidate.is_file() {
        return Err(StreamError::ResourceNotFound(name.to_string()));
    }

    let canonical_root = audio_root.canonicalize().map_err(StreamError::Io)?;
    let canonical = candidate
        .canonicalize()
        .map_err(|_| StreamError::ResourceNotFound(name.to_string()))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(StreamError::PathViolation(name.to_string()));
    }

    Ok(canonical)
}

/// RAII holder for a session's transcoding artifact.
///
/// Dropping the guard deletes the temp file; a file already gone is fine,
/// which makes the cleanup idempotent.
struct ArtifactGuard(Option<TranscodeArtifact>);

impl ArtifactGuard {
    fn none() -> Self {
        Self(None)
    }

    fn new(artifact: TranscodeArtifact) -> Self {
        Self(Some(artifact))
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if let Some(artifact) = self.0.take() {
            let age_ms = (chrono::Utc::now() - artifact.created_at).num_milliseconds();
            match std::fs::remove_file(&artifact.output_path) {
                Ok(()) => debug!(
                    path = %artifact.output_path.display(),
                    source = %artifact.source_path.display(),
                    age_ms,
                    "Removed transcode artifact"
                ),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(
                    path = %artifact.output_path.display(),
                    error = %err,
                    "Could not remove transcode artifact"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Collects sent chunks, optionally reporting a disconnect after a
    /// fixed number of sends.
    struct MockSink {
        chunks: Vec<Vec<u8>>,
        disconnect_after: Option<usize>,
    }

    impl MockSink {
        fn new() -> Self {
            Self {
                chunks: Vec::new(),
                disconnect_after: None,
            }
        }

        fn disconnecting_after(chunks: usize) -> Self {
            Self {
                chunks: Vec::new(),
                disconnect_after: Some(chunks),
            }
        }

        fn received_bytes(&self) -> Vec<u8> {
            self.chunks.concat()
        }
    }

    impl StreamSink for MockSink {
        fn send_chunk(&mut self, chunk: Vec<u8>) {
            self.chunks.push(chunk);
        }

        fn is_disconnected(&self) -> bool {
            match self.disconnect_after {
                Some(limit) => self.chunks.len() >= limit,
                None => false,
            }
        }
    }

    fn audio_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stream-root-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn settings(root: &Path) -> StreamSettings {
        StreamSettings {
            audio_root: root.to_path_buf(),
            chunk_duration_ms: 20,
            default_sample_rate: 8000,
            transcode: TranscodeSettings {
                encoder_path: "ffmpeg".to_string(),
                timeout: Duration::from_secs(60),
            },
        }
    }

    fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
        let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, sample_rate, 16);
        let mut file = std::fs::File::create(path).unwrap();
        wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut file).unwrap();
    }

    #[test]
    fn test_request_parses_rate_hints() {
        assert_eq!(StreamRequest::new("tone-16000.mp3").sample_rate_hint, Some(16000));
        assert_eq!(StreamRequest::new("tone-8000.mp3").sample_rate_hint, Some(8000));
        assert_eq!(StreamRequest::new("tone.mp3").sample_rate_hint, None);
    }

    #[test]
    fn test_close_codes_are_distinct_and_non_normal() {
        let errors = [
            StreamError::PathViolation(String::new()),
            StreamError::ResourceNotFound(String::new()),
            StreamError::UnsupportedFormat(String::new()),
            StreamError::Transcode(TranscodeError::Timeout(60)),
            StreamError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom")),
        ];

        let mut codes: Vec<u16> = errors.iter().map(|e| e.close_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|&code| code != 1000));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected_before_io() {
        let root = audio_root();
        let mut sink = MockSink::new();
        let mut session = StreamSession::new("../../etc/passwd.wav");

        let err = session.run(&settings(&root), &mut sink).await.unwrap_err();
        assert!(matches!(err, StreamError::PathViolation(_)));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(sink.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_extension_is_rejected() {
        let root = audio_root();
        std::fs::write(root.join("notes.txt"), b"hello").unwrap();
        let mut sink = MockSink::new();
        let mut session = StreamSession::new("notes.txt");

        let err = session.run(&settings(&root), &mut sink).await.unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedFormat(_)));
        assert!(sink.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_missing_resource_is_rejected() {
        let root = audio_root();
        let mut sink = MockSink::new();
        let mut session = StreamSession::new("ghost.wav");

        let err = session.run(&settings(&root), &mut sink).await.unwrap_err();
        assert!(matches!(err, StreamError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_wav_streams_payload_minus_header_in_order() {
        let root = audio_root();
        // ~0.2s of 44.1kHz mono 16-bit: 17840 payload bytes behind the
        // 44-byte header, deliberately not a multiple of the chunk size.
        let samples: Vec<i16> = (0..8920).map(|i| (i % 251) as i16).collect();
        write_wav(&root.join("tone.wav"), 44100, &samples);
        let file_len = std::fs::metadata(root.join("tone.wav")).unwrap().len();

        let mut sink = MockSink::new();
        let mut session = StreamSession::new("tone.wav");
        let outcome = session.run(&settings(&root), &mut sink).await.unwrap();

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(session.bytes_sent(), file_len - 44);

        // Header-backed 44.1kHz mono 16-bit pacing: 1764-byte chunks with a
        // shorter final chunk permitted.
        let (last, full) = sink.chunks.split_last().unwrap();
        assert!(full.iter().all(|chunk| chunk.len() == 1764));
        assert!(last.len() <= 1764 && !last.is_empty());

        // Byte-for-byte the original payload, in order.
        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(sink.received_bytes(), expected);
    }

    #[tokio::test]
    async fn test_disconnect_stops_within_one_chunk() {
        let root = audio_root();
        let samples: Vec<i16> = vec![7; 8000]; // 1s at 8kHz
        write_wav(&root.join("long-call.wav"), 8000, &samples);

        let mut sink = MockSink::disconnecting_after(3);
        let mut session = StreamSession::new("long-call.wav");
        let outcome = session.run(&settings(&root), &mut sink).await.unwrap();

        assert_eq!(outcome, StreamOutcome::Disconnected);
        assert_eq!(sink.chunks.len(), 3);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[cfg(unix)]
    mod with_fake_encoder {
        use super::*;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        fn fake_encoder(body: &str) -> PathBuf {
            let dir = std::env::temp_dir().join(format!("stream-encoder-{}", Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join("encoder.sh");
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "#!/bin/sh\n{}", body).unwrap();
            drop(file);
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        /// Emits 1600 bytes of raw PCM to the output path, whatever the
        /// input was.
        const EMIT_RAW_PCM: &str = r#"
out=""
for arg in "$@"; do out="$arg"; done
dd if=/dev/zero of="$out" bs=160 count=10 2>/dev/null
"#;

        fn encoder_settings(root: &Path, encoder: &Path) -> StreamSettings {
            let mut settings = settings(root);
            settings.transcode.encoder_path = encoder.to_str().unwrap().to_string();
            settings
        }

        #[tokio::test]
        async fn test_compressed_source_is_transcoded_and_artifact_removed() {
            let root = audio_root();
            std::fs::write(root.join("prompt-16000.mp3"), b"compressed").unwrap();
            let encoder = fake_encoder(EMIT_RAW_PCM);

            let mut sink = MockSink::new();
            let mut session = StreamSession::new("prompt-16000.mp3");
            let outcome = session
                .run(&encoder_settings(&root, &encoder), &mut sink)
                .await
                .unwrap();

            assert_eq!(outcome, StreamOutcome::Completed);
            // 1600 raw bytes paced at the hinted 16kHz: 640-byte chunks.
            assert_eq!(session.bytes_sent(), 1600);
            assert!(sink.chunks.iter().take(2).all(|chunk| chunk.len() == 640));

            // The artifact is gone once the session has drained.
            let leftovers: Vec<_> = std::fs::read_dir(std::env::temp_dir())
                .unwrap()
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    entry
                        .file_name()
                        .to_string_lossy()
                        .starts_with("prompt-16000-16000hz-")
                })
                .collect();
            assert!(leftovers.is_empty());
        }

        #[tokio::test]
        async fn test_encoder_failure_streams_nothing() {
            let root = audio_root();
            std::fs::write(root.join("prompt-16000.mp3"), b"compressed").unwrap();
            let encoder = fake_encoder("exit 1");

            let mut sink = MockSink::new();
            let mut session = StreamSession::new("prompt-16000.mp3");
            let err = session
                .run(&encoder_settings(&root, &encoder), &mut sink)
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                StreamError::Transcode(TranscodeError::EncoderFailed { .. })
            ));
            assert_eq!(err.close_code(), 4006);
            assert!(sink.chunks.is_empty());
            assert_eq!(session.bytes_sent(), 0);
        }

        #[tokio::test]
        async fn test_concurrent_sessions_same_source_distinct_artifacts() {
            let root = audio_root();
            std::fs::write(root.join("greeting-8000.mp3"), b"compressed").unwrap();
            std::fs::write(root.join("greeting-16000.mp3"), b"compressed").unwrap();
            let encoder = fake_encoder(EMIT_RAW_PCM);
            let settings = encoder_settings(&root, &encoder);

            let (a, b) = tokio::join!(
                async {
                    let mut sink = MockSink::new();
                    let mut session = StreamSession::new("greeting-8000.mp3");
                    session.run(&settings, &mut sink).await
                },
                async {
                    let mut sink = MockSink::new();
                    let mut session = StreamSession::new("greeting-16000.mp3");
                    session.run(&settings, &mut sink).await
                },
            );

            assert_eq!(a.unwrap(), StreamOutcome::Completed);
            assert_eq!(b.unwrap(), StreamOutcome::Completed);

            // Both artifacts were uniquely named and both are gone.
            let leftovers: Vec<_> = std::fs::read_dir(std::env::temp_dir())
                .unwrap()
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    entry
                        .file_name()
                        .to_string_lossy()
                        .starts_with("greeting-")
                })
                .collect();
            assert!(leftovers.is_empty());
        }
    }
}

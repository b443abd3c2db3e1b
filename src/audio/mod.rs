//! # Audio Streaming Module
//!
//! This module implements the real-time playback core: serving audio files
//! over a WebSocket connection at wall-clock speed, transcoding compressed
//! sources to raw PCM first when needed.
//!
//! ## Key Components:
//! - **Format Inspector**: read-only WAV header probe (channels, sample rate,
//!   sample width, duration)
//! - **Pacing Calculator**: chunk size and inter-chunk delay derivation
//! - **Transcoding Pipeline**: external encoder invocation with timeout and
//!   artifact management
//! - **Streaming Session**: the per-connection playback state machine
//!
//! ## Wire Contract:
//! During playback the connection carries binary frames only. Every failure
//! mode closes the connection with a distinct non-1000 close code; no error
//! is ever sent as a text frame on the playback path.

// WebSocket handlers are in src/websocket.rs at the root level
pub mod format;       // Container header inspection
pub mod pacing;       // Chunk size / delay computation
pub mod stream;       // Playback session state machine
pub mod transcode;    // External encoder pipeline

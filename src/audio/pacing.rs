//! # Pacing Calculation
//!
//! Derives how a playback session slices a byte source into chunks and how
//! long it waits between sends. The goal is that the peer receives bytes at
//! the nominal rate of the encoded audio (sample_rate * bit_depth / 8 *
//! channels), so a telephony endpoint hears a steady stream instead of a
//! file-transfer burst.
//!
//! ## Input Resolution:
//! 1. A header-backed sample rate from the Format Inspector always wins.
//! 2. Otherwise the filename convention hint ("8000"/"16000") is used.
//! 3. Otherwise everything falls back to 8kHz 16-bit mono, the telephony
//!    default.
//!
//! This is a pure function: identical inputs always produce an identical plan.

use crate::audio::format::AudioProperties;
use std::time::Duration;
use tracing::warn;

/// Sample rate assumed when neither a header nor a filename hint is present.
pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

/// Bit depth assumed for raw streams without an authoritative header.
pub const DEFAULT_BIT_DEPTH: u16 = 16;

/// Channel count assumed for raw streams without an authoritative header.
pub const DEFAULT_CHANNELS: u16 = 1;

/// Lower bound on the inter-chunk delay. Guards against a zero or
/// near-zero delay from rounding or an aggressively tuned chunk duration,
/// which would turn the pacer into an unthrottled sender.
pub const MIN_CHUNK_DELAY_MS: u64 = 5;

/// Size of the canonical fixed-length WAV header that is skipped before
/// raw sample data is streamed.
pub const WAV_HEADER_LEN: u64 = 44;

/// The computed pacing parameters for one playback session.
///
/// ## Invariant:
/// `chunk_size_bytes / inter_chunk_delay` approximates the nominal byte rate
/// of the audio, so sending one chunk per delay interval matches wall-clock
/// playback speed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingPlan {
    /// Bytes read and transmitted per iteration of the send loop.
    pub chunk_size_bytes: usize,

    /// Sleep between consecutive chunk sends.
    pub inter_chunk_delay: Duration,

    /// Container header bytes skipped before the first chunk is read.
    pub header_skip_bytes: u64,
}

/// Compute the pacing plan for a session.
///
/// ## Parameters:
/// - **sample_rate_hint**: rate parsed from the resource name, if any
/// - **properties**: header-backed properties from the Format Inspector, if
///   the source container was parseable
/// - **chunk_duration_ms**: target duration of one chunk (configured,
///   nominally 20ms)
///
/// A header-backed rate that disagrees with the filename hint is logged as a
/// warning; the header still wins for the plan.
pub fn compute_pacing(
    sample_rate_hint: Option<u32>,
    properties: Option<&AudioProperties>,
    chunk_duration_ms: u64,
) -> PacingPlan {
    let header_backed = properties.filter(|p| p.has_container_header);

    let (sample_rate, bit_depth, channels, header_skip) = match header_backed {
        Some(props) => {
            if let Some(hint) = sample_rate_hint {
                if hint != props.sample_rate {
                    warn!(
                        header_rate = props.sample_rate,
                        hinted_rate = hint,
                        "Container header sample rate disagrees with filename hint; trusting the header"
                    );
                }
            }
            (
                props.sample_rate,
                props.bit_depth,
                props.channels,
                WAV_HEADER_LEN,
            )
        }
        None => (
            sample_rate_hint.unwrap_or(DEFAULT_SAMPLE_RATE),
            DEFAULT_BIT_DEPTH,
            DEFAULT_CHANNELS,
            0,
        ),
    };

    // bytes per chunk = rate * depth/8 * channels * duration
    let chunk_size_bytes = (sample_rate as u64
        * bit_depth as u64
        * channels as u64
        * chunk_duration_ms
        / (8 * 1000)) as usize;

    let delay_ms = chunk_duration_ms.max(MIN_CHUNK_DELAY_MS);

    PacingPlan {
        chunk_size_bytes: chunk_size_bytes.max(1),
        inter_chunk_delay: Duration::from_millis(delay_ms),
        header_skip_bytes: header_skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_props(sample_rate: u32, channels: u16, bit_depth: u16) -> AudioProperties {
        AudioProperties {
            sample_rate,
            channels,
            bit_depth,
            duration_seconds: 1.0,
            has_container_header: true,
        }
    }

    #[test]
    fn test_default_pacing_is_telephony_raw() {
        let plan = compute_pacing(None, None, 20);

        // 8000 Hz * 16 bit * 1 ch * 20 ms = 320 bytes
        assert_eq!(plan.chunk_size_bytes, 320);
        assert_eq!(plan.inter_chunk_delay, Duration::from_millis(20));
        assert_eq!(plan.header_skip_bytes, 0);
    }

    #[test]
    fn test_hint_selects_wideband_rate() {
        let plan = compute_pacing(Some(16000), None, 20);
        assert_eq!(plan.chunk_size_bytes, 640);
        assert_eq!(plan.header_skip_bytes, 0);
    }

    #[test]
    fn test_header_wins_over_hint() {
        let props = header_props(44100, 1, 16);
        let plan = compute_pacing(Some(8000), Some(&props), 20);

        // 44100 Hz * 16 bit * 1 ch * 20 ms = 1764 bytes, and the fixed
        // WAV header is skipped.
        assert_eq!(plan.chunk_size_bytes, 1764);
        assert_eq!(plan.header_skip_bytes, WAV_HEADER_LEN);
    }

    #[test]
    fn test_stereo_header_doubles_chunk_size() {
        let props = header_props(8000, 2, 16);
        let plan = compute_pacing(None, Some(&props), 20);
        assert_eq!(plan.chunk_size_bytes, 640);
    }

    #[test]
    fn test_delay_floor_applies_to_aggressive_tuning() {
        let plan = compute_pacing(None, None, 1);
        assert_eq!(
            plan.inter_chunk_delay,
            Duration::from_millis(MIN_CHUNK_DELAY_MS)
        );
    }

    #[test]
    fn test_properties_without_header_fall_back_to_hint() {
        let props = AudioProperties {
            sample_rate: 44100,
            channels: 2,
            bit_depth: 16,
            duration_seconds: 0.0,
            has_container_header: false,
        };
        let plan = compute_pacing(Some(16000), Some(&props), 20);
        assert_eq!(plan.chunk_size_bytes, 640);
        assert_eq!(plan.header_skip_bytes, 0);
    }

    #[test]
    fn test_pacing_is_deterministic() {
        let props = header_props(44100, 1, 16);
        let a = compute_pacing(Some(16000), Some(&props), 20);
        let b = compute_pacing(Some(16000), Some(&props), 20);
        assert_eq!(a, b);
    }
}

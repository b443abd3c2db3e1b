//! # Container Format Inspection
//!
//! Read-only probe of a WAV (RIFF) container header. Used to validate and
//! inform pacing: when a file carries a parseable header, the header values
//! are authoritative and filename hints are only consulted for a mismatch
//! warning.
//!
//! An unrecognized or corrupt container is not an error here. The caller gets
//! `None` and pacing falls back to convention defaults.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Properties read from a container header, or filled from defaults.
///
/// ## Invariant:
/// `sample_rate` and `bit_depth` are always positive. When
/// `has_container_header` is true the values reflect the actual file,
/// never a filename hint.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioProperties {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub duration_seconds: f64,
    pub has_container_header: bool,
}

/// Attempt to read audio properties from a WAV file header.
///
/// Walks the RIFF chunk list for the `fmt ` and `data` chunks. Returns
/// `None` for anything that is not a well-formed PCM WAV container; the
/// file handle is closed either way and nothing is mutated.
pub fn inspect_wav(path: &Path) -> Option<AudioProperties> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "Could not open file for header inspection");
            return None;
        }
    };

    match parse_riff_header(BufReader::new(file)) {
        Ok(props) => Some(props),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "No parseable WAV header");
            None
        }
    }
}

fn parse_riff_header<R: Read + Seek>(mut reader: R) -> io::Result<AudioProperties> {
    let mut tag = [0u8; 4];

    reader.read_exact(&mut tag)?;
    if &tag != b"RIFF" {
        return Err(malformed("missing RIFF tag"));
    }
    let _riff_size = reader.read_u32::<LittleEndian>()?;
    reader.read_exact(&mut tag)?;
    if &tag != b"WAVE" {
        return Err(malformed("missing WAVE tag"));
    }

    let mut format: Option<(u16, u16, u32, u32)> = None; // channels, bits, rate, byte_rate
    let mut data_len: Option<u32> = None;

    // Chunks are walked in order; anything other than fmt/data is skipped.
    while format.is_none() || data_len.is_none() {
        if reader.read_exact(&mut tag).is_err() {
            return Err(malformed("header ended before fmt and data chunks"));
        }
        let chunk_size = reader.read_u32::<LittleEndian>()?;

        match &tag {
            b"fmt " => {
                if chunk_size < 16 {
                    return Err(malformed("fmt chunk too short"));
                }
                let audio_format = reader.read_u16::<LittleEndian>()?;
                let channels = reader.read_u16::<LittleEndian>()?;
                let sample_rate = reader.read_u32::<LittleEndian>()?;
                let byte_rate = reader.read_u32::<LittleEndian>()?;
                let _block_align = reader.read_u16::<LittleEndian>()?;
                let bit_depth = reader.read_u16::<LittleEndian>()?;

                // Only plain PCM is recognized as header-backed.
                if audio_format != 1 {
                    return Err(malformed("non-PCM wav format"));
                }
                if channels == 0 || sample_rate == 0 || byte_rate == 0 {
                    return Err(malformed("zeroed fmt fields"));
                }
                if !matches!(bit_depth, 8 | 16 | 24 | 32) {
                    return Err(malformed("unexpected bit depth"));
                }

                // Skip any fmt extension bytes.
                let remainder = chunk_size as i64 - 16;
                if remainder > 0 {
                    reader.seek(SeekFrom::Current(remainder))?;
                }
                format = Some((channels, bit_depth, sample_rate, byte_rate));
            }
            b"data" => {
                data_len = Some(chunk_size);
                // The sample payload itself is not read.
                reader.seek(SeekFrom::Current(chunk_size as i64))?;
            }
            _ => {
                reader.seek(SeekFrom::Current(chunk_size as i64))?;
            }
        }
    }

    let ((channels, bit_depth, sample_rate, byte_rate), data_len) = match (format, data_len) {
        (Some(format), Some(data_len)) => (format, data_len),
        _ => return Err(malformed("incomplete header")),
    };

    Ok(AudioProperties {
        sample_rate,
        channels,
        bit_depth,
        duration_seconds: data_len as f64 / byte_rate as f64,
        has_container_header: true,
    })
}

fn malformed(detail: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, detail.to_string())
}

//! Entry payload compression
//!
//! Serialized entries are stored as strings. When compression is enabled the
//! codec deflates the payload and base64-encodes it for string transport,
//! tagging the result so reads can tell compressed and legacy plaintext
//! payloads apart.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{CacheError, Result};

/// Sentinel prefix marking a compressed payload.
pub const COMPRESSION_TAG: &str = "lz:";

/// String-level compression codec
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    enabled: bool,
}

impl Codec {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Compress a serialized payload for storage.
    ///
    /// The tagged form is used only when it is strictly shorter than the
    /// plaintext; small or incompressible payloads are stored untagged as-is.
    pub fn compress(&self, plaintext: &str) -> String {
        if !self.enabled {
            return plaintext.to_string();
        }
        match deflate(plaintext) {
            Ok(encoded) => {
                if COMPRESSION_TAG.len() + encoded.len() < plaintext.len() {
                    format!("{COMPRESSION_TAG}{encoded}")
                } else {
                    plaintext.to_string()
                }
            }
            Err(err) => {
                tracing::warn!("compression failed, storing plaintext: {}", err);
                plaintext.to_string()
            }
        }
    }

    /// Reverse [`Codec::compress`].
    ///
    /// Untagged payloads (legacy entries, or entries that did not benefit
    /// from compression) pass through unchanged. A tagged payload that fails
    /// to decompress is returned tag-stripped as a best-effort degraded
    /// result; the subsequent deserialization treats it as a miss.
    pub fn decompress(&self, stored: &str) -> String {
        let Some(encoded) = stored.strip_prefix(COMPRESSION_TAG) else {
            return stored.to_string();
        };
        match inflate(encoded) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                tracing::warn!("decompression failed, returning raw payload: {}", err);
                encoded.to_string()
            }
        }
    }
}

fn deflate(input: &str) -> Result<String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input.as_bytes())?;
    let bytes = encoder.finish()?;
    Ok(STANDARD.encode(bytes))
}

fn inflate(encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| CacheError::Compression {
            message: err.to_string(),
        })?;
    let mut decoder = ZlibDecoder::new(bytes.as_slice());
    let mut plaintext = String::new();
    decoder.read_to_string(&mut plaintext)?;
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_round_trip_compressible_payload() {
        let codec = Codec::new(true);
        let payload = "x".repeat(4096);

        let stored = codec.compress(&payload);
        assert!(stored.starts_with(COMPRESSION_TAG));
        assert!(stored.len() < payload.len());
        assert_eq!(codec.decompress(&stored), payload);
    }

    #[test]
    fn test_small_payload_stays_plaintext() {
        let codec = Codec::new(true);
        let stored = codec.compress("tiny");
        assert_eq!(stored, "tiny");
        assert_eq!(codec.decompress(&stored), "tiny");
    }

    #[test]
    fn test_disabled_codec_passes_through() {
        let codec = Codec::new(false);
        let payload = "y".repeat(4096);
        assert_eq!(codec.compress(&payload), payload);
    }

    #[test]
    fn test_untagged_payload_passes_through_decompress() {
        let codec = Codec::new(true);
        assert_eq!(codec.decompress("legacy plaintext entry"), "legacy plaintext entry");
    }

    #[test]
    fn test_corrupted_tagged_payload_degrades() {
        let codec = Codec::new(true);
        // not valid base64/deflate; the tag is stripped, the rest returned
        assert_eq!(codec.decompress("lz:!!not-compressed!!"), "!!not-compressed!!");
    }

    proptest! {
        #[test]
        fn prop_compress_round_trips(input in ".*") {
            // a plaintext that itself starts with the tag is stored untagged
            // and cannot be told apart from a compressed payload on read
            prop_assume!(!input.starts_with(COMPRESSION_TAG));
            let codec = Codec::new(true);
            prop_assert_eq!(codec.decompress(&codec.compress(&input)), input);
        }

        #[test]
        fn prop_untagged_input_unchanged(input in ".*") {
            prop_assume!(!input.starts_with(COMPRESSION_TAG));
            let codec = Codec::new(true);
            prop_assert_eq!(codec.decompress(&input), input);
        }
    }
}

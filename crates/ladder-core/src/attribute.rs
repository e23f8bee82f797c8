//! # Debuggable Attribute Decoder
//!
//! Decodes the one fixed-layout custom attribute blob the loader reads from
//! image metadata: the debuggable attribute that controls JIT tracking and
//! optimization for a unit.
//!
//! ## Layout
//!
//! | Byte | Meaning |
//! |------|---------|
//! | 0 | Prolog, must be `1` |
//! | 1 | Prolog, must be `0` |
//! | 2 | bit 0: track JIT info, bit 1: ignore symbols |
//! | 3 | Disable optimizations (non-zero) |
//! | 4.. | Named-argument count, ignored |
//!
//! Only 6- and 8-byte blobs are decoded. An absent attribute, or a blob of
//! any other length, leaves the configuration at its default.

use crate::LoaderError;
use serde::{Deserialize, Serialize};

/// Accepted blob lengths.
pub const DEBUGGABLE_BLOB_LENGTHS: [usize; 2] = [6, 8];

/// Name of the attribute the blob is read from.
pub const DEBUGGABLE_ATTRIBUTE_NAME: &str = "System.Diagnostics.DebuggableAttribute";

const PROLOG: [u8; 2] = [1, 0];
const TRACK_JIT_INFO_BIT: u8 = 0x1;
const IGNORE_SYMBOLS_BIT: u8 = 0x2;

/// Debugging configuration for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebuggingConfig {
    pub track_jit_info: bool,
    pub ignore_symbols: bool,
    pub allow_optimizations: bool,
}

impl Default for DebuggingConfig {
    fn default() -> Self {
        Self {
            track_jit_info: false,
            ignore_symbols: false,
            allow_optimizations: true,
        }
    }
}

impl DebuggingConfig {
    /// Decode `blob` on top of `self`.
    ///
    /// `None` (attribute absent) and unsupported lengths return `self`
    /// unchanged. A supported length with a bad prolog is an error.
    pub fn apply_blob(self, blob: Option<&[u8]>) -> Result<Self, LoaderError> {
        let Some(blob) = blob else {
            return Ok(self);
        };

        if !DEBUGGABLE_BLOB_LENGTHS.contains(&blob.len()) {
            return Ok(self);
        }

        if blob[..2] != PROLOG {
            return Err(LoaderError::MalformedAttribute {
                len: blob.len(),
                reason: format!(
                    "expected prolog 01 00, found {:02X} {:02X}",
                    blob[0], blob[1]
                ),
            });
        }

        let tracking = blob[2] & TRACK_JIT_INFO_BIT != 0;
        let config = Self {
            track_jit_info: tracking,
            ignore_symbols: blob[2] & IGNORE_SYMBOLS_BIT != 0,
            // Without tracking, optimizations stay on whatever byte 3 says.
            allow_optimizations: !tracking || blob[3] == 0,
        };

        tracing::debug!(
            attribute = DEBUGGABLE_ATTRIBUTE_NAME,
            tracking = blob[2],
            disable_opts = blob[3],
            ?config,
            "decoded debuggable attribute"
        );

        Ok(config)
    }
}

/// Decode a debuggable attribute blob starting from the default configuration.
pub fn parse_debuggable_blob(blob: Option<&[u8]>) -> Result<DebuggingConfig, LoaderError> {
    DebuggingConfig::default().apply_blob(blob)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn six(b2: u8, b3: u8) -> [u8; 6] {
        [1, 0, b2, b3, 0, 0]
    }

    #[test]
    fn absent_attribute_is_default() {
        let config = parse_debuggable_blob(None).expect("absent");
        assert_eq!(config, DebuggingConfig::default());
        assert!(config.allow_optimizations);
    }

    #[test]
    fn no_flags_keeps_optimizations() {
        let config = parse_debuggable_blob(Some(&six(0, 0))).expect("parse");
        assert_eq!(config, DebuggingConfig::default());
    }

    #[test]
    fn tracking_with_zero_disable_byte() {
        let config = parse_debuggable_blob(Some(&six(1, 0))).expect("parse");
        assert!(config.track_jit_info);
        assert!(config.allow_optimizations);
    }

    #[test]
    fn tracking_with_disable_byte_turns_optimizations_off() {
        let config = parse_debuggable_blob(Some(&six(1, 1))).expect("parse");
        assert!(config.track_jit_info);
        assert!(!config.allow_optimizations);
    }

    #[test]
    fn disable_byte_without_tracking_is_ignored() {
        let config = parse_debuggable_blob(Some(&six(0, 1))).expect("parse");
        assert!(!config.track_jit_info);
        assert!(config.allow_optimizations);
    }

    #[test]
    fn ignore_symbols_bit() {
        let config = parse_debuggable_blob(Some(&six(2, 0))).expect("parse");
        assert!(config.ignore_symbols);
        assert!(!config.track_jit_info);
    }

    #[test]
    fn eight_byte_blob_decoded() {
        let config = parse_debuggable_blob(Some(&[1, 0, 3, 1, 0, 0, 0, 0])).expect("parse");
        assert!(config.track_jit_info);
        assert!(config.ignore_symbols);
        assert!(!config.allow_optimizations);
    }

    #[test]
    fn bad_prolog_is_malformed() {
        let result = parse_debuggable_blob(Some(&[2, 0, 1, 0, 0, 0]));
        assert!(matches!(
            result,
            Err(LoaderError::MalformedAttribute { len: 6, .. })
        ));

        let result = parse_debuggable_blob(Some(&[1, 1, 1, 0, 0, 0, 0, 0]));
        assert!(matches!(
            result,
            Err(LoaderError::MalformedAttribute { len: 8, .. })
        ));
    }

    #[test]
    fn unsupported_length_keeps_previous_flags() {
        let previous = DebuggingConfig {
            track_jit_info: true,
            ignore_symbols: true,
            allow_optimizations: false,
        };
        assert_eq!(previous.apply_blob(Some(&[1, 0, 0, 0])).expect("len 4"), previous);
        assert_eq!(previous.apply_blob(Some(&[])).expect("len 0"), previous);
        // Prolog is only checked for supported lengths.
        assert_eq!(previous.apply_blob(Some(&[9, 9, 9])).expect("len 3"), previous);
    }
}

//! Error types.
//!
//! This module contains the error taxonomy shared by the whole crate. The
//! split follows where an error can be detected: configuration and range
//! errors are caught before any register or pipe access, transport errors
//! carry the byte count the device actually moved, and version mismatches
//! are raised when appending to a dataset produced by different FPGA
//! bitstream.
//!
//! Stream integrity conditions (constant-field mismatches, timestamp skips)
//! are deliberately *not* errors: decoding is total and records them as
//! flags on the decoded block. See [`crate::decode`].

use thiserror::Error;

/// Error type for all fallible operations in this crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid discrete parameter or malformed frame, detected before
    /// touching the hardware.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Waveform amplitude, frequency, or digital code outside the
    /// representable range, detected before touching the hardware.
    #[error("out of range: {0}")]
    Range(String),

    /// A bulk transfer moved fewer bytes than requested or returned a
    /// negative device status.
    ///
    /// A short count is a data-integrity signal, not a transient fault:
    /// FIFO and address-pointer state may be inconsistent afterwards, so
    /// the caller must re-run `write_setup` or `repeat_setup` before
    /// retrying.
    #[error("bulk transfer moved {actual} of {expected} bytes")]
    Transport {
        /// Bytes requested.
        expected: usize,
        /// Bytes actually transferred, or the negative device status code.
        actual: i64,
    },

    /// A dataset append was attempted with a producer version different
    /// from the one the dataset was created with.
    #[error("dataset was produced by version {dataset}, current producer is version {producer}")]
    VersionMismatch {
        /// Version tag stored in the dataset.
        dataset: u32,
        /// Version of the producer attempting the append.
        producer: u32,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

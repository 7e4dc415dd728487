//! Error types for the conversion engine.
//!
//! Every failure of the color transform, the stream codec or the image codec
//! collaborators surfaces as one [`Error`] variant. None of them are retried:
//! the conversion is deterministic, so the calling shell decides how to report.

use thiserror::Error;

/// Main error type for `lineara`.
#[derive(Error, Debug)]
pub enum Error {
    /// The source image has fewer than three color channels (grey or grey-alpha).
    #[error("Unsupported channel count: {channels} (only RGB and RGBA sources are supported)")]
    UnsupportedChannelCount { channels: u8 },

    /// The stream ended before all declared pixel records were read.
    #[error("Truncated stream: need {expected} bytes, have {available}")]
    TruncatedStream { expected: u64, available: u64 },

    /// Width or height is not positive, or the stream size overflows.
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },

    /// The declared pixel count exceeds the configured limit.
    #[error("Image too large: {pixels} pixels exceeds the limit of {limit}")]
    LimitExceeded { pixels: u64, limit: u64 },

    /// A pixel buffer does not match its declared dimensions.
    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// The image codec failed to read the source file.
    #[error("Decode failure: {0}")]
    DecodeFailure(#[source] image::ImageError),

    /// The image codec failed to write the destination file.
    #[error("Encode failure: {0}")]
    EncodeFailure(#[source] image::ImageError),

    /// I/O errors on the stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker task went away before delivering its band.
    #[error("Worker pool error: {0}")]
    WorkerPool(&'static str),
}

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = Error::UnsupportedChannelCount { channels: 1 };
        assert!(err.to_string().contains("channel count: 1"));

        let err = Error::InvalidDimensions { width: 0, height: 5 };
        assert_eq!(err.to_string(), "Invalid dimensions: 0x5");

        let err = Error::TruncatedStream {
            expected: 40,
            available: 12,
        };
        assert_eq!(err.to_string(), "Truncated stream: need 40 bytes, have 12");
    }
}

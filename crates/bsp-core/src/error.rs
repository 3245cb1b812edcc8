//! Error handling for the BSP Framework
//!
//! One error type covers filter design, offline filtering, frame decoding and
//! pipeline configuration. Numeric problems in the sample stream (NaN, Inf) are
//! not errors: they flow through the filters unchanged.

use thiserror::Error;

/// Result type alias for BSP Framework operations
pub type BspResult<T> = Result<T, BspError>;

/// Error type for all BSP Framework operations
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum BspError {
    /// Cutoff, order, sampling rate or Q outside the valid design range
    #[error("Invalid filter parameter `{parameter}`: {reason}")]
    InvalidFilterParameter {
        /// Name of the offending parameter
        parameter: &'static str,
        /// Description of the violated constraint
        reason: String,
    },

    /// Input too short for the edge padding used by zero-phase filtering
    #[error("Signal too short: {len} samples, need more than {required}")]
    SignalTooShort {
        /// Provided sample count
        len: usize,
        /// Pad length the input must exceed
        required: usize,
    },

    /// Bytes that do not form a valid acquisition frame
    #[error("Invalid frame: {reason}")]
    InvalidFrame {
        /// Description of the framing issue
        reason: &'static str,
    },

    /// Number of channel samples does not match the number of filters
    #[error("Channel count mismatch: expected {expected}, got {actual}")]
    ChannelCountMismatch {
        /// Channels the receiver was built for
        expected: usize,
        /// Channels actually supplied
        actual: usize,
    },

    /// Invalid pipeline or file configuration
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem
        message: String,
    },

    /// Failure reading from an acquisition source
    #[error("I/O error: {message}")]
    Io {
        /// Underlying error description
        message: String,
    },
}

impl BspError {
    /// Shorthand for an [`BspError::InvalidFilterParameter`]
    pub fn invalid_parameter(parameter: &'static str, reason: impl Into<String>) -> Self {
        BspError::InvalidFilterParameter {
            parameter,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for BspError {
    fn from(err: std::io::Error) -> Self {
        BspError::Io {
            message: err.to_string(),
        }
    }
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::error::BspError::ConfigurationError {
            message: format!($($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = BspError::invalid_parameter("high_hz", "must be below Nyquist (256 Hz)");
        let display = format!("{}", error);
        assert!(display.contains("high_hz"));
        assert!(display.contains("Nyquist"));

        let error = BspError::SignalTooShort { len: 10, required: 27 };
        let display = error.to_string();
        assert!(display.contains("10"));
        assert!(display.contains("27"));
    }

    #[test]
    fn test_config_error_macro() {
        let error = config_error!("chunk size must be positive, got {}", 0);
        assert_eq!(
            error,
            BspError::ConfigurationError {
                message: "chunk size must be positive, got 0".to_string()
            }
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "port closed");
        let error: BspError = io.into();
        assert!(matches!(error, BspError::Io { .. }));
        assert!(error.to_string().contains("port closed"));
    }
}

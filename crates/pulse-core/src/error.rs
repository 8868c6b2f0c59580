use thiserror::Error;

/// Top-level error type for the Pulse system.
///
/// Storage, provider and configuration failures from every crate funnel
/// through this type so that `?` works across crate boundaries. The
/// engine-level taxonomy lives in `pulse-insight` and converts from here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PulseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Duplicate publication: channel {channel_id}, message {message_id}")]
    Duplicate { channel_id: i64, message_id: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for PulseError {
    fn from(err: toml::de::Error) -> Self {
        PulseError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PulseError {
    fn from(err: toml::ser::Error) -> Self {
        PulseError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PulseError {
    fn from(err: serde_json::Error) -> Self {
        PulseError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Pulse operations.
pub type Result<T> = std::result::Result<T, PulseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PulseError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(PulseError, &str)> = vec![
            (
                PulseError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                PulseError::Duplicate {
                    channel_id: 3,
                    message_id: 41,
                },
                "Duplicate publication: channel 3, message 41",
            ),
            (
                PulseError::NotFound("publication 9".to_string()),
                "Not found: publication 9",
            ),
            (
                PulseError::Embedding("timeout".to_string()),
                "Embedding error: timeout",
            ),
            (
                PulseError::Metadata("bad json".to_string()),
                "Metadata error: bad json",
            ),
            (
                PulseError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PulseError = io_err.into();
        assert!(matches!(err, PulseError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let pulse_err: PulseError = err.unwrap_err().into();
        assert!(matches!(pulse_err, PulseError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let pulse_err: PulseError = err.unwrap_err().into();
        assert!(matches!(pulse_err, PulseError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}

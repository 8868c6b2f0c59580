use pulse_core::error::PulseError;
use thiserror::Error;

/// Errors surfaced by the clustering, ingestion and digest engines.
#[derive(Error, Debug)]
pub enum InsightError {
    #[error("publication {0} has no text")]
    EmptyContent(i64),
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("metadata unavailable: {0}")]
    MetadataUnavailable(String),
    #[error("narrative unavailable: {0}")]
    NarrativeUnavailable(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("duplicate publication: channel {channel_id}, message {message_id}")]
    Duplicate { channel_id: i64, message_id: i64 },
    #[error("user {0} has no subscriptions")]
    NoSubscriptions(i64),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("clustering queue is closed")]
    QueueClosed,
    #[error("config error: {0}")]
    Config(String),
}

impl InsightError {
    /// Failures a scheduler may retry later without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InsightError::EmbeddingUnavailable(_) | InsightError::StoreUnavailable(_)
        )
    }

    /// Expected outcomes that should be rendered to the user, not logged as failures.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, InsightError::NoSubscriptions(_))
    }
}

impl From<PulseError> for InsightError {
    fn from(err: PulseError) -> Self {
        match err {
            PulseError::Duplicate {
                channel_id,
                message_id,
            } => InsightError::Duplicate {
                channel_id,
                message_id,
            },
            PulseError::NotFound(what) => InsightError::NotFound(what),
            PulseError::Embedding(msg) => InsightError::EmbeddingUnavailable(msg),
            PulseError::Metadata(msg) => InsightError::MetadataUnavailable(msg),
            PulseError::Config(msg) => InsightError::Config(msg),
            other => InsightError::StoreUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            InsightError::EmptyContent(12).to_string(),
            "publication 12 has no text"
        );
        assert_eq!(
            InsightError::NoSubscriptions(5).to_string(),
            "user 5 has no subscriptions"
        );
        assert_eq!(
            InsightError::QueueClosed.to_string(),
            "clustering queue is closed"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(InsightError::EmbeddingUnavailable("x".into()).is_retryable());
        assert!(InsightError::StoreUnavailable("x".into()).is_retryable());
        assert!(!InsightError::EmptyContent(1).is_retryable());
        assert!(!InsightError::NoSubscriptions(1).is_retryable());
    }

    #[test]
    fn test_user_facing_classification() {
        assert!(InsightError::NoSubscriptions(1).is_user_facing());
        assert!(!InsightError::StoreUnavailable("db".into()).is_user_facing());
    }

    #[test]
    fn test_from_pulse_error() {
        let dup: InsightError = PulseError::Duplicate {
            channel_id: 1,
            message_id: 2,
        }
        .into();
        assert!(matches!(
            dup,
            InsightError::Duplicate {
                channel_id: 1,
                message_id: 2
            }
        ));

        let storage: InsightError = PulseError::Storage("locked".into()).into();
        assert!(matches!(storage, InsightError::StoreUnavailable(_)));
        assert!(storage.to_string().contains("locked"));

        let missing: InsightError = PulseError::NotFound("publication 3".into()).into();
        assert!(matches!(missing, InsightError::NotFound(_)));

        let embed: InsightError = PulseError::Embedding("down".into()).into();
        assert!(embed.is_retryable());
    }
}

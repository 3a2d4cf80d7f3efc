use std::{error::Error as StdError, time::Duration};

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for calls into a [`crate::source::MessageSource`].
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Failures reported by the remote message source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Bulk delete refused because at least one message is older than the
    /// platform's bulk-delete age limit.
    #[error("message too old for bulk deletion")]
    BulkDeleteTooOld,

    /// The platform asked us to slow down.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Channel or message does not exist (anymore).
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// Missing permissions on the channel.
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// Network or server-side failure.
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl SourceError {
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transport(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether retrying the same request later can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport { .. })
    }
}

/// Typed errors for managed channel operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A remote call failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The channel could not be looked up while initialising it.
    #[error("channel {channel_id} lookup failed: {source}")]
    ChannelLookup {
        channel_id: String,
        #[source]
        source: SourceError,
    },

    /// A reap pass stopped part-way; `deleted` messages were removed first.
    #[error("reap aborted after {deleted} deletions: {source}")]
    PartialReap {
        deleted: usize,
        #[source]
        source: SourceError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn channel_lookup(channel_id: impl Into<String>, source: SourceError) -> Self {
        Self::ChannelLookup {
            channel_id: channel_id.into(),
            source,
        }
    }

    /// Whether the scheduler should retry the failed operation with backoff.
    ///
    /// Configuration errors (missing channel, missing permissions) are
    /// permanent and are not retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(source) | Self::PartialReap { source, .. } => source.is_retryable(),
            Self::ChannelLookup { .. } | Self::Io(_) | Self::Json(_) | Self::Message { .. } => {
                false
            },
        }
    }
}

impl autodelete_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

autodelete_common::impl_context!();

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(SourceError::BulkDeleteTooOld, false)]
    #[case(SourceError::RateLimited { retry_after: None }, true)]
    #[case(SourceError::not_found("channel 1"), false)]
    #[case(SourceError::forbidden("missing MANAGE_MESSAGES"), false)]
    #[case(SourceError::transport("fetch", std::io::Error::other("reset")), true)]
    fn retryable_classification(#[case] err: SourceError, #[case] retryable: bool) {
        assert_eq!(err.is_retryable(), retryable);
        assert_eq!(Error::from(err).is_retryable(), retryable);
    }

    #[test]
    fn lookup_errors_are_permanent() {
        let err = Error::channel_lookup("42", SourceError::RateLimited { retry_after: None });
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn partial_reap_reports_count() {
        let err = Error::PartialReap {
            deleted: 50,
            source: SourceError::forbidden("nope"),
        };
        assert_eq!(
            err.to_string(),
            "reap aborted after 50 deletions: forbidden: nope"
        );
    }
}

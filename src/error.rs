//! Error kinds shared across the core (spec §7). One enum, matching the
//! documented propagation policy rather than per-module exception types.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already running: {0}")]
    AlreadyRunning(String),

    #[error("queue full")]
    QueueFull,

    #[error("canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("remote error (fatal, code {code}): {description}")]
    RemoteFatal { code: u16, description: String },

    #[error("remote error (transient, code {code}): {description}")]
    RemoteTransient { code: u16, description: String },

    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// Classifies a transport failure into this enum's remote-error variants
/// (§7): 429 and 5xx are the retryable class, everything else 4xx is fatal.
/// A network error carries no HTTP status at all; it's treated as transient
/// (the retry/fallback state machine already retries it), with `code: 0`
/// standing in for "none".
impl From<crate::bot_client::SendError> for Error {
    fn from(e: crate::bot_client::SendError) -> Self {
        use crate::bot_client::SendError;
        match e {
            SendError::Api {
                code, description, ..
            } if code == 429 || (500..600).contains(&code) => {
                Error::RemoteTransient { code, description }
            }
            SendError::Api {
                code, description, ..
            } => Error::RemoteFatal { code, description },
            SendError::Network(description) => Error::RemoteTransient {
                code: 0,
                description,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot_client::SendError;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        for code in [429, 500, 503, 599] {
            let err = Error::from(SendError::Api {
                code,
                retry_after: None,
                description: "x".to_string(),
            });
            assert!(matches!(err, Error::RemoteTransient { code: c, .. } if c == code));
        }
    }

    #[test]
    fn other_4xx_errors_are_fatal() {
        let err = Error::from(SendError::Api {
            code: 403,
            retry_after: None,
            description: "forbidden".to_string(),
        });
        assert!(matches!(err, Error::RemoteFatal { code: 403, .. }));
    }

    #[test]
    fn network_errors_are_transient_with_no_code() {
        let err = Error::from(SendError::Network("timed out".to_string()));
        assert!(matches!(err, Error::RemoteTransient { code: 0, .. }));
    }
}

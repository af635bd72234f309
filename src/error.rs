use std::time::Duration;

/// Failure classes surfaced by the backend collaborators and the mutation path.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{context} timed out after {}ms", .after.as_millis())]
    Timeout { context: String, after: Duration },

    #[error("{context}: transport error: {message}")]
    Transport { context: String, message: String },

    #[error("{context}: rejected with HTTP {status}: {body}")]
    Rejected {
        context: String,
        status: u16,
        body: String,
    },

    #[error("{context}: could not decode response: {message}")]
    Decode { context: String, message: String },

    #[error("not allowed: {0}")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    /// Timeouts and dropped connections are worth another read attempt.
    /// Rejections and local validation failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Timeout { .. } | SyncError::Transport { .. })
    }

    pub fn from_reqwest(context: &str, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            SyncError::Timeout {
                context: context.to_string(),
                after: timeout,
            }
        } else if err.is_decode() {
            SyncError::Decode {
                context: context.to_string(),
                message: err.to_string(),
            }
        } else {
            SyncError::Transport {
                context: context.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = SyncError::Timeout {
            context: "fetchTasks".to_string(),
            after: Duration::from_secs(10),
        };
        assert!(timeout.is_transient());
        assert_eq!(timeout.to_string(), "fetchTasks timed out after 10000ms");

        let rejected = SyncError::Rejected {
            context: "patchTask".to_string(),
            status: 403,
            body: "permission denied".to_string(),
        };
        assert!(!rejected.is_transient());
        assert!(!SyncError::Forbidden("x".to_string()).is_transient());
    }
}

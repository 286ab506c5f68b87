use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Credential exchange refused, or the source rejected the credentials
    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Source API error during {operation}: {message}")]
    SourceApi {
        operation: String,
        message: String,
        transient: bool,
    },

    #[error("Ancestor chain of {id} did not reach the root within {max_depth} levels")]
    UnresolvedHierarchy { id: String, max_depth: usize },

    #[error("Entry not found: {0}")]
    NotFound(String),
}

impl SourceError {
    pub fn transient(operation: &str, message: impl Into<String>) -> Self {
        SourceError::SourceApi {
            operation: operation.to_string(),
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(operation: &str, message: impl Into<String>) -> Self {
        SourceError::SourceApi {
            operation: operation.to_string(),
            message: message.into(),
            transient: false,
        }
    }

    /// Whether another attempt of the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::SourceApi { transient: true, .. })
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, SourceError::Authorization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_api_errors_are_retryable() {
        assert!(SourceError::transient("list_entries", "throttled").is_retryable());
        assert!(!SourceError::permanent("list_entries", "bad request").is_retryable());
        assert!(!SourceError::Authorization("denied".into()).is_retryable());
        assert!(!SourceError::NotFound("123".into()).is_retryable());
        assert!(!SourceError::UnresolvedHierarchy {
            id: "123".into(),
            max_depth: 5
        }
        .is_retryable());
    }
}

use async_trait::async_trait;
use oc_common::Credentials;

use crate::{Result, SourceError};

/// Exchanges the service's own identity for short-lived credentials scoped to the
/// directory's management account.
///
/// Every crawl and every writer invocation calls [`CredentialBroker::assume`] afresh;
/// implementations do not cache or persist what they return.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn assume(&self) -> Result<Credentials>;
}

/// Hands out a fixed credential set (local development, LocalStack)
pub struct StaticCredentialBroker {
    credentials: Credentials,
}

impl StaticCredentialBroker {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Ambient `AWS_*` credentials as `lookup` reports them; unset keys read as `test`, which is
    /// what LocalStack accepts.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).unwrap_or_else(|| "test".to_string());
        Self::new(Credentials::new(
            var("AWS_ACCESS_KEY_ID"),
            var("AWS_SECRET_ACCESS_KEY"),
            var("AWS_SESSION_TOKEN"),
            None,
        ))
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

#[async_trait]
impl CredentialBroker for StaticCredentialBroker {
    async fn assume(&self) -> Result<Credentials> {
        if self.credentials.is_expired() {
            return Err(SourceError::Authorization(
                "static credentials have expired".to_string(),
            ));
        }
        Ok(self.credentials.clone())
    }
}

use async_trait::async_trait;
use aws_sdk_sts::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use oc_common::Credentials;
use oc_config::SourceConfig;

use super::{classify_sdk_error, load_sdk_config};
use crate::broker::CredentialBroker;
use crate::{Result, SourceError};

/// Assumes the directory role through STS on every call
pub struct StsCredentialBroker {
    client: Client,
    role_arn: String,
    external_id: String,
    session_name: String,
    duration_seconds: i32,
}

impl StsCredentialBroker {
    pub fn new(client: Client, config: &SourceConfig) -> Self {
        Self {
            client,
            role_arn: config.role_arn.clone(),
            external_id: config.external_id.clone(),
            session_name: config.session_name.clone(),
            duration_seconds: config.session_duration_seconds,
        }
    }

    pub async fn from_config(config: &SourceConfig) -> Self {
        let sdk_config = load_sdk_config(&config.region, config.endpoint_url.as_deref()).await;
        info!(role_arn = %config.role_arn, "STS credential broker configured");
        Self::new(Client::new(&sdk_config), config)
    }
}

#[async_trait]
impl CredentialBroker for StsCredentialBroker {
    async fn assume(&self) -> Result<Credentials> {
        let output = self
            .client
            .assume_role()
            .role_arn(&self.role_arn)
            .role_session_name(&self.session_name)
            .external_id(&self.external_id)
            .duration_seconds(self.duration_seconds)
            .send()
            .await
            .map_err(|e| classify_sdk_error("assume_role", &self.role_arn, e))?;

        let creds = output.credentials().ok_or_else(|| {
            SourceError::Authorization("AssumeRole returned no credentials".to_string())
        })?;

        let expiration = creds.expiration();
        let expires_at = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos());

        debug!(role_arn = %self.role_arn, expires_at = ?expires_at, "Assumed directory role");

        Ok(Credentials::new(
            creds.access_key_id(),
            creds.secret_access_key(),
            creds.session_token(),
            expires_at,
        ))
    }
}

//! AWS-backed broker and directory: STS `AssumeRole` and the Organizations API.

mod organizations;
mod sts;

pub use organizations::{OrganizationsConnector, OrganizationsDirectoryClient};
pub use sts::StsCredentialBroker;

use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use oc_config::SourceConfig;
use tracing::warn;

use crate::{CredentialBroker, DirectoryConnector, SourceError, StaticCredentialBroker};

const AUTHORIZATION_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "AWSOrganizationsNotInUseException",
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
];

const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "ServiceException",
    "ServiceUnavailable",
    "InternalFailure",
    "ConcurrentModificationException",
];

const NOT_FOUND_CODES: &[&str] = &[
    "AccountNotFoundException",
    "ChildNotFoundException",
    "TargetNotFoundException",
];

/// Shared SDK configuration for the caller's own identity
pub async fn load_sdk_config(region: &str, endpoint_url: Option<&str>) -> SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    loader.load().await
}

/// STS role assumption, or the ambient `AWS_*` credentials when `dev_mode` is set
pub async fn create_credential_broker(config: &SourceConfig, dev_mode: bool) -> Arc<dyn CredentialBroker> {
    if dev_mode {
        warn!("Dev mode: using ambient credentials instead of assuming the directory role");
        return Arc::new(StaticCredentialBroker::from_env());
    }
    Arc::new(StsCredentialBroker::from_config(config).await)
}

/// Organizations connector for the configured region and endpoint
pub async fn create_connector(config: &SourceConfig) -> Arc<dyn DirectoryConnector> {
    let sdk_config = load_sdk_config(&config.region, config.endpoint_url.as_deref()).await;
    Arc::new(OrganizationsConnector::new(sdk_config))
}

/// Map an SDK failure onto the source error taxonomy.
///
/// `subject` is the id the call was about, used for not-found errors.
pub(crate) fn classify_sdk_error<E, R>(operation: &str, subject: &str, err: SdkError<E, R>) -> SourceError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();

    match &err {
        SdkError::ServiceError(_) => {
            let code = err.code().unwrap_or("Unknown");
            if AUTHORIZATION_CODES.contains(&code) {
                SourceError::Authorization(message)
            } else if NOT_FOUND_CODES.contains(&code) {
                SourceError::NotFound(subject.to_string())
            } else if TRANSIENT_CODES.contains(&code) {
                SourceError::transient(operation, message)
            } else {
                SourceError::permanent(operation, message)
            }
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            SourceError::transient(operation, message)
        }
        _ => SourceError::permanent(operation, message),
    }
}

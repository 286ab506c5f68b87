use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_organizations::types::{Account, ParentType};
use aws_sdk_organizations::{config, Client};

use oc_common::{Credentials, EntryDetail, TagSet};

use super::classify_sdk_error;
use crate::client::{DirectoryClient, DirectoryConnector, EntryPage, ParentRef};
use crate::{Result, SourceError};

/// Directory backed by AWS Organizations: accounts are entries, OUs and the root are ancestors
pub struct OrganizationsDirectoryClient {
    client: Client,
}

impl OrganizationsDirectoryClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[allow(deprecated)]
fn entry_detail(id: &str, account: &Account) -> EntryDetail {
    EntryDetail {
        id: account.id().unwrap_or(id).to_string(),
        name: account.name().unwrap_or_default().to_string(),
        status: account
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        email_address: account.email().unwrap_or_default().to_string(),
    }
}

#[async_trait]
impl DirectoryClient for OrganizationsDirectoryClient {
    async fn list_entries(&self, cursor: Option<&str>) -> Result<EntryPage> {
        let output = self
            .client
            .list_accounts()
            .set_next_token(cursor.map(str::to_string))
            .send()
            .await
            .map_err(|e| classify_sdk_error("list_accounts", "", e))?;

        Ok(EntryPage {
            ids: output
                .accounts()
                .iter()
                .filter_map(|a| a.id().map(str::to_string))
                .collect(),
            next_cursor: output.next_token().map(str::to_string),
        })
    }

    async fn describe_entry(&self, id: &str) -> Result<EntryDetail> {
        let output = self
            .client
            .describe_account()
            .account_id(id)
            .send()
            .await
            .map_err(|e| classify_sdk_error("describe_account", id, e))?;

        output
            .account()
            .map(|account| entry_detail(id, account))
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    async fn list_tags(&self, id: &str) -> Result<TagSet> {
        let mut tags = TagSet::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_tags_for_resource()
                .resource_id(id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error("list_tags_for_resource", id, e))?;

            for tag in output.tags() {
                tags.insert(tag.key().to_string(), tag.value().to_string());
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(tags),
            }
        }
    }

    async fn parent_of(&self, id: &str) -> Result<Option<ParentRef>> {
        let output = self
            .client
            .list_parents()
            .child_id(id)
            .send()
            .await
            .map_err(|e| classify_sdk_error("list_parents", id, e))?;

        // Organizations reports exactly one parent per child
        let Some(parent) = output.parents().first() else {
            return Ok(None);
        };
        let parent_id = parent
            .id()
            .ok_or_else(|| SourceError::permanent("list_parents", "parent without id"))?;

        Ok(Some(match parent.r#type() {
            Some(ParentType::Root) => ParentRef::root(parent_id),
            _ => ParentRef::unit(parent_id),
        }))
    }
}

/// Builds Organizations clients bound to assumed-role credentials
pub struct OrganizationsConnector {
    sdk_config: SdkConfig,
}

impl OrganizationsConnector {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }
}

#[async_trait]
impl DirectoryConnector for OrganizationsConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn DirectoryClient>> {
        if credentials.is_expired() {
            return Err(SourceError::Authorization(
                "assumed-role credentials have expired".to_string(),
            ));
        }

        let provider = config::Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            credentials.expires_at.map(SystemTime::from),
            "orgcache-assumed-role",
        );
        let conf = config::Builder::from(&self.sdk_config)
            .credentials_provider(provider)
            .build();

        let client: Arc<dyn DirectoryClient> =
            Arc::new(OrganizationsDirectoryClient::new(Client::from_conf(conf)));
        Ok(client)
    }
}

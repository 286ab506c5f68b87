use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod logging;
pub mod tags;

pub use tags::{CodecError, TagCodec};

/// Deepest ancestor chain the cache stores, counting the root as level 1.
///
/// The cache has exactly five `ouLevel` columns and the root occupies `ouLevel1`, so an entry may
/// sit under the root plus at most four units. An entry under the root plus five units (the
/// deepest AWS Organizations nesting) exceeds the bound and is reported as unresolved rather than
/// stored with a truncated path.
pub const MAX_OU_DEPTH: usize = 5;

/// Tag mapping attached to a directory entry. Ordered so encodings are deterministic.
pub type TagSet = BTreeMap<String, String>;

// ============================================================================
// Directory Types
// ============================================================================

/// One synchronized directory record (an account in the remote organization).
///
/// `ou_path` lists ancestor unit ids from the root down to the immediate parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: String,
    pub name: String,
    pub status: String,
    pub email_address: String,
    #[serde(default)]
    pub ou_path: Vec<String>,
    #[serde(default)]
    pub tags: TagSet,
}

impl DirectoryEntry {
    /// Ancestor at the given 1-based depth, if the path reaches that deep.
    pub fn ou_level(&self, depth: usize) -> Option<&str> {
        if depth == 0 {
            return None;
        }
        self.ou_path.get(depth - 1).map(String::as_str)
    }
}

/// Descriptive fields of an entry as returned by the source directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDetail {
    pub id: String,
    pub name: String,
    pub status: String,
    pub email_address: String,
}

// ============================================================================
// Queue Envelope
// ============================================================================

/// Reference to one entry pending detail-fetch and cache upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkUnit {
    pub id: String,
    /// Opaque token the queue may use to drop duplicate enqueues within a cycle
    pub dedup_token: String,
    #[serde(default)]
    pub cycle_id: Option<String>,
}

impl WorkUnit {
    pub fn new(cycle_id: &str, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            dedup_token: format!("{}-{}", cycle_id, id),
            cycle_id: Some(cycle_id.to_string()),
            id,
        }
    }
}

/// A work unit that has been received from a queue with tracking metadata
#[derive(Debug, Clone)]
pub struct QueuedWorkUnit {
    pub unit: WorkUnit,
    pub receipt_handle: String,
    pub broker_message_id: Option<String>,
    pub queue_identifier: String,
}

// ============================================================================
// Credentials
// ============================================================================

/// Short-lived credential triple scoped to a single crawl or write invocation.
///
/// Deliberately not serializable; `Debug` redacts the secret parts.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: session_token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ou_level_is_one_based() {
        let entry = DirectoryEntry {
            id: "111111111111".to_string(),
            name: "prod".to_string(),
            status: "ACTIVE".to_string(),
            email_address: "prod@example.com".to_string(),
            ou_path: vec!["r-root".to_string(), "ou-a".to_string()],
            tags: TagSet::new(),
        };

        assert_eq!(entry.ou_level(0), None);
        assert_eq!(entry.ou_level(1), Some("r-root"));
        assert_eq!(entry.ou_level(2), Some("ou-a"));
        assert_eq!(entry.ou_level(3), None);
    }

    #[test]
    fn test_work_unit_serializes_camel_case() {
        let unit = WorkUnit::new("cycle-1", "222222222222");
        let json = serde_json::to_string(&unit).unwrap();
        assert!(json.contains("\"dedupToken\":\"cycle-1-222222222222\""));
        assert!(json.contains("\"cycleId\":\"cycle-1\""));

        let parsed: WorkUnit = serde_json::from_str(r#"{"id":"x","dedupToken":"t"}"#).unwrap();
        assert_eq!(parsed.cycle_id, None);
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials::new("AKIAEXAMPLE", "super-secret", "session-token", None);
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("session-token"));
        assert!(!creds.is_expired());
    }
}

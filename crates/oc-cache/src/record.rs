use chrono::{DateTime, Utc};
use oc_common::{CodecError, DirectoryEntry, TagCodec, MAX_OU_DEPTH};

use crate::{CacheError, Result};

/// Store-side shape of a [`DirectoryEntry`]: one column per ancestor depth and the tag set
/// flattened into a single indexable string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRecord {
    pub id: String,
    pub name: String,
    pub status: String,
    pub email_address: String,
    /// `ou_levels[d - 1]` holds the ancestor at depth `d`
    pub ou_levels: [Option<String>; MAX_OU_DEPTH],
    /// Absent when the entry has no tags
    pub flattened_tags: Option<String>,
    pub synced_at: DateTime<Utc>,
}

impl CachedRecord {
    pub fn from_entry(entry: &DirectoryEntry, synced_at: DateTime<Utc>) -> Result<Self> {
        if entry.ou_path.len() > MAX_OU_DEPTH {
            return Err(CacheError::InvalidRecord(format!(
                "{} has {} ancestors, at most {} are stored",
                entry.id,
                entry.ou_path.len(),
                MAX_OU_DEPTH
            )));
        }

        let mut ou_levels: [Option<String>; MAX_OU_DEPTH] = Default::default();
        for (slot, ou) in ou_levels.iter_mut().zip(&entry.ou_path) {
            *slot = Some(ou.clone());
        }

        Ok(Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            status: entry.status.clone(),
            email_address: entry.email_address.clone(),
            ou_levels,
            flattened_tags: TagCodec::flatten(&entry.tags),
            synced_at,
        })
    }

    /// Ancestor at a 1-based depth
    pub fn ou_level(&self, depth: usize) -> Option<&str> {
        if depth == 0 || depth > MAX_OU_DEPTH {
            return None;
        }
        self.ou_levels[depth - 1].as_deref()
    }

    /// Rebuild the entry, decoding the flattened tags
    pub fn to_entry(&self) -> std::result::Result<DirectoryEntry, CodecError> {
        Ok(DirectoryEntry {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status.clone(),
            email_address: self.email_address.clone(),
            ou_path: self.ou_levels.iter().map_while(|level| level.clone()).collect(),
            tags: TagCodec::unflatten_opt(self.flattened_tags.as_deref())?,
        })
    }

    /// Equal in everything except the write timestamp
    pub fn same_payload(&self, other: &CachedRecord) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.status == other.status
            && self.email_address == other.email_address
            && self.ou_levels == other.ou_levels
            && self.flattened_tags == other.flattened_tags
    }

    /// Whether every needle appears as a whole pair in the flattened tags
    pub fn has_tags(&self, needles: &[String]) -> bool {
        match self.flattened_tags.as_deref() {
            Some(flat) => needles.iter().all(|needle| contains_pair(flat, needle)),
            None => needles.is_empty(),
        }
    }
}

/// Delimiter-bounded containment: `needle` must be a complete `name:value` pair of `flat`.
pub fn contains_pair(flat: &str, needle: &str) -> bool {
    bounded(flat).contains(&bounded(needle))
}

pub(crate) fn bounded(value: &str) -> String {
    format!(",{},", value)
}

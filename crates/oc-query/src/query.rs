//! Read requests and the index plans they resolve to.

use oc_cache::IndexKey;
use oc_common::{TagCodec, TagSet};

use crate::{QueryError, Result};

/// Largest id list accepted in one lookup
pub const MAX_IDS_PER_REQUEST: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    ByIds(Vec<String>),
    ByEmails(Vec<String>),
    ByStatus(String),
    ByOus(Vec<String>),
    ByTag { name: String, value: String },
    /// Every pair must be present
    ByTags(TagSet),
}

/// Where a plan looks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    PrimaryKey,
    Index(IndexKey),
    /// The five depth indexes together
    OuLevels,
    FlattenedTags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Each value matched on its own, results concatenated
    Exact,
    /// All values must appear as whole pairs in one scan
    Containment,
    /// Each value is a unit whose whole subtree is collected
    Subtree,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub lookup: Lookup,
    pub mode: MatchMode,
    pub values: Vec<String>,
}

impl Query {
    /// Short name for logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Query::ByIds(_) => "ids",
            Query::ByEmails(_) => "emails",
            Query::ByStatus(_) => "status",
            Query::ByOus(_) => "ous",
            Query::ByTag { .. } => "tag",
            Query::ByTags(_) => "tags",
        }
    }

    /// Validate the request and pick its index plan
    pub fn plan(&self) -> Result<QueryPlan> {
        let plan = match self {
            Query::ByIds(ids) => {
                let ids = non_blank_list("ids", ids)?;
                if ids.len() > MAX_IDS_PER_REQUEST {
                    return Err(QueryError::input(format!(
                        "at most {} ids per request, got {}",
                        MAX_IDS_PER_REQUEST,
                        ids.len()
                    )));
                }
                QueryPlan { lookup: Lookup::PrimaryKey, mode: MatchMode::Exact, values: ids }
            }
            Query::ByEmails(emails) => QueryPlan {
                lookup: Lookup::Index(IndexKey::Email),
                mode: MatchMode::Exact,
                values: non_blank_list("emails", emails)?,
            },
            Query::ByStatus(status) => QueryPlan {
                lookup: Lookup::Index(IndexKey::Status),
                mode: MatchMode::Exact,
                values: vec![non_blank("status", status)?],
            },
            Query::ByOus(ous) => QueryPlan {
                lookup: Lookup::OuLevels,
                mode: MatchMode::Subtree,
                values: non_blank_list("ous", ous)?,
            },
            Query::ByTag { name, value } => QueryPlan {
                lookup: Lookup::FlattenedTags,
                mode: MatchMode::Containment,
                values: vec![tag_needle(name, value)?],
            },
            Query::ByTags(tags) => {
                if tags.is_empty() {
                    return Err(QueryError::input("at least one tag is required"));
                }
                let mut needles = Vec::with_capacity(tags.len());
                for (name, value) in tags {
                    needles.push(tag_needle(name, value)?);
                }
                QueryPlan {
                    lookup: Lookup::FlattenedTags,
                    mode: MatchMode::Containment,
                    values: needles,
                }
            }
        };
        Ok(plan)
    }
}

fn non_blank(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(QueryError::input(format!("{} must not be blank", field)));
    }
    Ok(trimmed.to_string())
}

/// Tag text is matched verbatim, so it is checked but not trimmed. An empty value is a real
/// value and only matches tags stored with an empty value.
fn tag_needle(name: &str, value: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(QueryError::input("tag name must not be blank"));
    }
    Ok(TagCodec::needle(name, value))
}

/// Trimmed, de-duplicated, order kept
fn non_blank_list(field: &str, values: &[String]) -> Result<Vec<String>> {
    if values.is_empty() {
        return Err(QueryError::input(format!("{} must not be empty", field)));
    }
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = non_blank(field, value)?;
        if !out.contains(&value) {
            out.push(value);
        }
    }
    Ok(out)
}

/// Split a comma-separated request parameter
pub fn split_list(raw: Option<&str>) -> Vec<String> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => raw.split(',').map(|s| s.trim().to_string()).collect(),
        _ => Vec::new(),
    }
}

//! Tag flattening
//!
//! Encodes a [`TagSet`] as one indexable string of the form `k1:v1,k2:v2`.
//! Keys and values are escaped so the delimiters can never appear inside them:
//!
//! | char | escape |
//! |------|--------|
//! | `%`  | `%25`  |
//! | `:`  | `%3A`  |
//! | `,`  | `%2C`  |
//!
//! Pairs are written in key order, so equal tag sets always flatten to the same string.

use thiserror::Error;

use crate::TagSet;

pub const PAIR_DELIMITER: char = ',';
pub const KEY_VALUE_DELIMITER: char = ':';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Tag pair is missing the ':' separator: {0}")]
    MissingSeparator(String),

    #[error("Invalid escape sequence in tag text: {0}")]
    InvalidEscape(String),

    #[error("Duplicate tag key: {0}")]
    DuplicateKey(String),
}

pub struct TagCodec;

impl TagCodec {
    /// Flatten a tag set. An empty set has no flattened form.
    pub fn flatten(tags: &TagSet) -> Option<String> {
        if tags.is_empty() {
            return None;
        }

        let pairs: Vec<String> = tags
            .iter()
            .map(|(key, value)| Self::needle(key, value))
            .collect();

        Some(pairs.join(&PAIR_DELIMITER.to_string()))
    }

    /// Rebuild a tag set from its flattened form.
    pub fn unflatten(flattened: &str) -> Result<TagSet, CodecError> {
        let mut tags = TagSet::new();
        if flattened.is_empty() {
            return Ok(tags);
        }

        for pair in flattened.split(PAIR_DELIMITER) {
            let (raw_key, raw_value) = pair
                .split_once(KEY_VALUE_DELIMITER)
                .ok_or_else(|| CodecError::MissingSeparator(pair.to_string()))?;

            let key = unescape(raw_key)?;
            let value = unescape(raw_value)?;

            if tags.contains_key(&key) {
                return Err(CodecError::DuplicateKey(key));
            }
            tags.insert(key, value);
        }

        Ok(tags)
    }

    /// Optional-attribute variant: a missing attribute means no tags.
    pub fn unflatten_opt(flattened: Option<&str>) -> Result<TagSet, CodecError> {
        match flattened {
            Some(s) => Self::unflatten(s),
            None => Ok(TagSet::new()),
        }
    }

    /// The encoded `name:value` fragment a flattened string contains when it carries this tag.
    pub fn needle(name: &str, value: &str) -> String {
        format!("{}{}{}", escape(name), KEY_VALUE_DELIMITER, escape(value))
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            ',' => out.push_str("%2C"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(text: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let code: String = chars.by_ref().take(2).collect();
        match code.to_ascii_uppercase().as_str() {
            "25" => out.push('%'),
            "3A" => out.push(':'),
            "2C" => out.push(','),
            _ => return Err(CodecError::InvalidEscape(text.to_string())),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_tags_have_no_flattened_form() {
        assert_eq!(TagCodec::flatten(&TagSet::new()), None);
        assert_eq!(TagCodec::unflatten_opt(None).unwrap(), TagSet::new());
    }

    #[test]
    fn test_flatten_is_key_ordered() {
        let flattened = TagCodec::flatten(&tags(&[("team", "core"), ("env", "prod")])).unwrap();
        assert_eq!(flattened, "env:prod,team:core");
    }

    #[test]
    fn test_round_trip() {
        let original = tags(&[("env", "prod"), ("team", "core"), ("cost-center", "42")]);
        let flattened = TagCodec::flatten(&original).unwrap();
        assert_eq!(TagCodec::unflatten(&flattened).unwrap(), original);
    }

    #[test]
    fn test_round_trip_with_delimiters_in_text() {
        let original = tags(&[("url", "https://a.example,b"), ("ratio", "50%"), ("a:b", "")]);
        let flattened = TagCodec::flatten(&original).unwrap();

        assert_eq!(flattened.matches(',').count(), 2);
        assert_eq!(TagCodec::unflatten(&flattened).unwrap(), original);
    }

    #[test]
    fn test_needle_matches_flattened_pair() {
        let flattened = TagCodec::flatten(&tags(&[("owner", "a,b")])).unwrap();
        assert!(flattened.contains(&TagCodec::needle("owner", "a,b")));
        assert!(!flattened.contains(&TagCodec::needle("owner", "a")));
    }

    #[test]
    fn test_unflatten_rejects_malformed_input() {
        assert_eq!(
            TagCodec::unflatten("env:prod,broken"),
            Err(CodecError::MissingSeparator("broken".to_string()))
        );
        assert!(matches!(
            TagCodec::unflatten("env:100%"),
            Err(CodecError::InvalidEscape(_))
        ));
        assert!(matches!(
            TagCodec::unflatten("env:%zz"),
            Err(CodecError::InvalidEscape(_))
        ));
        assert_eq!(
            TagCodec::unflatten("env:prod,env:dev"),
            Err(CodecError::DuplicateKey("env".to_string()))
        );
    }

    #[test]
    fn test_lowercase_escapes_are_accepted() {
        let parsed = TagCodec::unflatten("a%3ab:c%2cd").unwrap();
        assert_eq!(parsed, tags(&[("a:b", "c,d")]));
    }
}

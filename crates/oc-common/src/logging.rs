//! Logging setup shared by the crawler, writer and query server
//!
//! `LOG_FORMAT=json` selects one JSON object per line with the active spans attached; anything else
//! gives human-readable text. `RUST_LOG` replaces [`DEFAULT_DIRECTIVES`] wholesale, e.g.
//! `RUST_LOG=oc_sync=debug,oc_source=trace`.
//!
//! Crawl cycles and work units run inside [`cycle_span`] and [`unit_span`], so every line logged
//! beneath them carries `cycle_id` and `entry_id`.

use tracing::Span;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Our crates at `info`; the chatty AWS, SQL and HTTP internals only when they warn
pub const DEFAULT_DIRECTIVES: &str = "info,aws_config=warn,aws_smithy_runtime=warn,\
aws_smithy_runtime_api=warn,hyper=warn,hyper_util=warn,sqlx=warn,tower_http=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// What [`init_logging`] decided from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    pub directives: String,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `lookup` stands in for the environment so the selection can be checked without touching it
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = match lookup("LOG_FORMAT") {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let directives = lookup("RUST_LOG")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string());

        Self { format, directives }
    }

    /// The configured filter, or the defaults when `RUST_LOG` does not parse
    pub fn filter(&self) -> (EnvFilter, Option<String>) {
        match EnvFilter::try_new(&self.directives) {
            Ok(filter) => (filter, None),
            Err(e) => (
                EnvFilter::new(DEFAULT_DIRECTIVES),
                Some(format!("ignoring RUST_LOG {:?}: {}", self.directives, e)),
            ),
        }
    }
}

/// Install the global subscriber for `service_name`.
pub fn init_logging(service_name: &str) {
    let settings = LogSettings::from_env();
    let (filter, rejected) = settings.filter();

    let installed = match settings.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .flatten_event(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_ansi(true))
            .try_init(),
    };

    if let Err(e) = installed {
        tracing::warn!(service = %service_name, error = %e, "Logging was already initialized");
        return;
    }
    if let Some(reason) = rejected {
        tracing::warn!(service = %service_name, "{}", reason);
    }
    tracing::info!(service = %service_name, format = ?settings.format, "Logging initialized");
}

/// Span wrapping one crawl-and-dispatch cycle
pub fn cycle_span(cycle_id: &str) -> Span {
    tracing::info_span!("crawl_cycle", cycle_id = %cycle_id)
}

/// Span wrapping the write of one work unit; units enqueued outside a cycle log `-`
pub fn unit_span(entry_id: &str, cycle_id: Option<&str>) -> Span {
    tracing::info_span!(
        "write_unit",
        entry_id = %entry_id,
        cycle_id = cycle_id.unwrap_or("-"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let settings = LogSettings::from_lookup(lookup_from(&[]));
        assert_eq!(settings.format, LogFormat::Text);
        assert_eq!(settings.directives, DEFAULT_DIRECTIVES);
        assert!(settings.filter().1.is_none());
    }

    #[test]
    fn test_log_format_selects_json_case_insensitively() {
        for value in ["json", "JSON", " Json "] {
            let settings = LogSettings::from_lookup(lookup_from(&[("LOG_FORMAT", value)]));
            assert_eq!(settings.format, LogFormat::Json, "LOG_FORMAT={:?}", value);
        }
        let settings = LogSettings::from_lookup(lookup_from(&[("LOG_FORMAT", "pretty")]));
        assert_eq!(settings.format, LogFormat::Text);
    }

    #[test]
    fn test_rust_log_replaces_defaults() {
        let settings = LogSettings::from_lookup(lookup_from(&[("RUST_LOG", "oc_sync=debug")]));
        assert_eq!(settings.directives, "oc_sync=debug");
        assert!(settings.filter().1.is_none());

        // Blank means unset
        let settings = LogSettings::from_lookup(lookup_from(&[("RUST_LOG", "  ")]));
        assert_eq!(settings.directives, DEFAULT_DIRECTIVES);
    }

    #[test]
    fn test_unparseable_rust_log_falls_back() {
        let settings = LogSettings::from_lookup(lookup_from(&[("RUST_LOG", "oc_sync=loudest")]));
        let (_, rejected) = settings.filter();
        assert!(rejected.unwrap().contains("oc_sync=loudest"));
    }

    #[test]
    fn test_spans_carry_pipeline_ids() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let cycle = cycle_span("c-1");
            let meta = cycle.metadata().unwrap();
            assert_eq!(meta.name(), "crawl_cycle");
            assert!(meta.fields().field("cycle_id").is_some());

            let unit = unit_span("111", None);
            let meta = unit.metadata().unwrap();
            assert_eq!(meta.name(), "write_unit");
            assert!(meta.fields().field("entry_id").is_some());
            assert!(meta.fields().field("cycle_id").is_some());
        });
    }
}

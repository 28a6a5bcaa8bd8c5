use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENABLED_ENV: &str = "ANTHROPIC_STREAM_TRACING";
const LEVEL_ENV: &str = "ANTHROPIC_STREAM_LOG_LEVEL";
const JSON_PATH_ENV: &str = "ANTHROPIC_STREAM_JSON_LOG_PATH";
const DEFAULT_LOG_FILE: &str = "anthropic-stream.logs.jsonl";

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq)]
struct TracingSettings {
    enabled: bool,
    level: Option<String>,
    json_path: Option<PathBuf>,
}

impl TracingSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            enabled: non_empty(ENABLED_ENV)
                .map(|v| parse_flag(&v).unwrap_or(true))
                .unwrap_or(true),
            level: non_empty(LEVEL_ENV),
            json_path: non_empty(JSON_PATH_ENV).map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

/// Installs a global tracing subscriber once per process.
///
/// Applications that already configure `tracing` should skip this; a second
/// global subscriber is silently ignored.
///
/// Environment variables:
/// - `ANTHROPIC_STREAM_TRACING`: set to `0`/`false`/`off` to skip setup.
/// - `ANTHROPIC_STREAM_LOG_LEVEL`: filter directive, e.g. `anthropic_stream=debug`.
///   Falls back to `RUST_LOG`, then `info`.
/// - `ANTHROPIC_STREAM_JSON_LOG_PATH`: write JSON lines to this file instead
///   of a compact stderr format.
pub fn init_tracing() {
    INIT.get_or_init(|| {
        let settings = TracingSettings::from_lookup(|key| std::env::var(key).ok());
        if !settings.enabled {
            return;
        }
        let filter = settings.env_filter();

        match &settings.json_path {
            Some(path) => {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let _ = std::fs::create_dir_all(dir);
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_LOG_FILE);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
            None => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> TracingSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TracingSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_enabled_console_output() {
        assert_eq!(
            settings(&[]),
            TracingSettings {
                enabled: true,
                level: None,
                json_path: None,
            }
        );
    }

    #[test]
    fn reads_flag_level_and_path() {
        let s = settings(&[
            (ENABLED_ENV, "off"),
            (LEVEL_ENV, "anthropic_stream=debug"),
            (JSON_PATH_ENV, "/tmp/logs/stream.jsonl"),
        ]);
        assert!(!s.enabled);
        assert_eq!(s.level.as_deref(), Some("anthropic_stream=debug"));
        assert_eq!(s.json_path, Some(PathBuf::from("/tmp/logs/stream.jsonl")));

        // Unrecognised flags and blank values keep the defaults.
        let s = settings(&[(ENABLED_ENV, "maybe"), (LEVEL_ENV, "  ")]);
        assert!(s.enabled);
        assert_eq!(s.level, None);
    }

    #[test]
    fn parse_flag_accepts_common_spellings() {
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("later"), None);
    }
}

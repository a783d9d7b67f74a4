use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "haiven-stream.logs.jsonl";
const DEFAULT_FILTER: &str = "info";

/// Where log records go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact human-readable lines on stderr. Stdout is left to the stream.
    Stderr,
    /// One JSON object per line, appended to this file.
    JsonFile(PathBuf),
}

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// `EnvFilter` directive, e.g. `info` or `haiven_stream=debug`.
    pub filter: Option<String>,
    pub output: LogOutput,
}

impl ObservabilityConfig {
    /// Reads `HAIVEN_OBSERVABILITY`, `HAIVEN_LOG_LEVEL`, `RUST_LOG` and
    /// `HAIVEN_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let enabled = non_empty("HAIVEN_OBSERVABILITY")
            .map(|v| parse_bool_env(&v).unwrap_or(true))
            .unwrap_or(true);
        let filter = non_empty("HAIVEN_LOG_LEVEL").or_else(|| non_empty("RUST_LOG"));
        let output = match non_empty("HAIVEN_JSON_LOG_PATH") {
            Some(path) => LogOutput::JsonFile(PathBuf::from(path)),
            None => LogOutput::Stderr,
        };
        Self {
            enabled,
            filter,
            output,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.filter
            .as_deref()
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Splits a log path into the directory and file name the appender expects.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs the global tracing subscriber from the environment, once per
/// process. Later calls do nothing.
pub fn init_observability() {
    init_with(ObservabilityConfig::from_env());
}

/// Installs the global tracing subscriber from `config`, once per process.
/// A subscriber installed elsewhere is left in place.
pub fn init_with(config: ObservabilityConfig) {
    INIT.get_or_init(|| {
        if !config.enabled {
            return;
        }
        let env_filter = config.env_filter();
        match &config.output {
            LogOutput::JsonFile(path) => {
                let (dir, file_name) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            LogOutput::Stderr => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ObservabilityConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ObservabilityConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_enabled_stderr_logging() {
        let cfg = config(&[]);
        assert!(cfg.enabled);
        assert_eq!(cfg.filter, None);
        assert_eq!(cfg.output, LogOutput::Stderr);
    }

    #[test]
    fn haiven_level_wins_over_rust_log() {
        let cfg = config(&[("HAIVEN_LOG_LEVEL", "debug"), ("RUST_LOG", "warn")]);
        assert_eq!(cfg.filter.as_deref(), Some("debug"));
        let cfg = config(&[("RUST_LOG", "warn")]);
        assert_eq!(cfg.filter.as_deref(), Some("warn"));
    }

    #[test]
    fn disable_flag_and_json_path() {
        let cfg = config(&[
            ("HAIVEN_OBSERVABILITY", " Off "),
            ("HAIVEN_JSON_LOG_PATH", "logs/run.jsonl"),
        ]);
        assert!(!cfg.enabled);
        assert_eq!(cfg.output, LogOutput::JsonFile(PathBuf::from("logs/run.jsonl")));
        assert!(config(&[("HAIVEN_OBSERVABILITY", "maybe")]).enabled);
    }

    #[test]
    fn log_path_splits_into_dir_and_file() {
        assert_eq!(
            split_log_path(Path::new("logs/run.jsonl")),
            (PathBuf::from("logs"), "run.jsonl".to_string())
        );
        assert_eq!(
            split_log_path(Path::new("run.jsonl")),
            (PathBuf::from("."), "run.jsonl".to_string())
        );
    }

    #[test]
    fn init_is_idempotent() {
        init_with(ObservabilityConfig {
            enabled: false,
            filter: None,
            output: LogOutput::Stderr,
        });
        init_observability();
    }
}

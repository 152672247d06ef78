use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_JSON_LOG_FILE: &str = "answer-stream.logs.jsonl";

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(default)
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("ANSWER_STREAM_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Every answer runs inside an `answer` span; closing it records how long
/// the session took.
fn span_events(session_timing: bool) -> FmtSpan {
    if session_timing {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Splits the JSON log path into the directory and file name the appender expects.
fn json_log_target(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_JSON_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs the process-wide tracing subscriber once.
///
/// Environment variables:
/// - `ANSWER_STREAM_OBSERVABILITY`: set to `0`/`false`/`off` to install nothing.
/// - `ANSWER_STREAM_LOG_LEVEL`: level/filter override (`info`, `answer_stream=debug`, ...).
/// - `ANSWER_STREAM_JSON_LOG_PATH`: write JSON lines to this file instead of the console.
/// - `ANSWER_STREAM_LOG_SESSION_TIMING`: log an event with the duration of each `answer`
///   span when it closes (default on).
/// - `RUST_LOG`: fallback filter.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !env_flag("ANSWER_STREAM_OBSERVABILITY", true) {
            return;
        }

        let env_filter = resolve_env_filter();
        let spans = span_events(env_flag("ANSWER_STREAM_LOG_SESSION_TIMING", true));
        if let Ok(path_raw) = std::env::var("ANSWER_STREAM_JSON_LOG_PATH") {
            let (dir, file_name) = json_log_target(Path::new(&path_raw));
            let _ = std::fs::create_dir_all(&dir);
            let writer = tracing_appender::rolling::never(dir, file_name);
            // session_id/conversation_id live on the `answer` span.
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_span_events(spans)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            // stderr keeps stdout free for the streamed answer.
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_span_events(spans)
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_boolean_switches() {
        assert_eq!(parse_bool(" On "), Some(true));
        assert_eq!(parse_bool("disabled"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn session_timing_closes_spans() {
        assert_eq!(span_events(true), FmtSpan::CLOSE);
        assert_eq!(span_events(false), FmtSpan::NONE);
    }

    #[test]
    fn json_log_target_defaults_to_current_dir() {
        assert_eq!(
            json_log_target(Path::new("answers.jsonl")),
            (PathBuf::from("."), "answers.jsonl".to_string())
        );
        assert_eq!(
            json_log_target(Path::new("logs/run/answers.jsonl")),
            (PathBuf::from("logs/run"), "answers.jsonl".to_string())
        );
        assert_eq!(
            json_log_target(Path::new("/")),
            (PathBuf::from("."), DEFAULT_JSON_LOG_FILE.to_string())
        );
    }

    #[test]
    fn init_is_idempotent() {
        init_observability();
        init_observability();
    }
}

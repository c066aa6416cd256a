//! Process-wide tracing setup and the trace id carried by each provider run.
//!
//! Runs triggered by the scheduler or by `POST /refresh` execute inside
//! [`with_trace_context`], so errors rendered by the ops API carry the id of the
//! run that produced them.

use std::str::FromStr;

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter,
    filter::ParseError,
    fmt,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

/// HTTP stack crates whose per-request chatter is capped at `warn` unless
/// `RUST_LOG` says otherwise.
const QUIET_DEPENDENCIES: [&str; 4] = ["hyper", "hyper_util", "reqwest", "rustls"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = TelemetryInitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(TelemetryInitError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("unknown log format '{0}', expected 'json' or 'pretty'")]
    UnknownFormat(String),
    #[error("invalid log level directive: {0}")]
    Filter(#[from] ParseError),
    #[error("failed to bridge `log` records into tracing: {0}")]
    LogBridge(#[from] log::SetLoggerError),
    #[error("tracing subscriber already installed: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Filter directives for `level`, with the HTTP stack held at `warn`.
pub fn filter_directives(level: &str) -> String {
    let mut directives = vec![level.trim().to_string()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|krate| format!("{}=warn", krate)));
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG`, when set, replaces the
/// configured level entirely. Call once per process.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<(), TelemetryInitError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(level))?,
    };

    LogTracer::builder()
        .with_max_level(LevelFilter::Info)
        .ignore_all(QUIET_DEPENDENCIES)
        .init()?;

    let layer = match format {
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()?;
    Ok(())
}

/// Identifies one provider run or ops request.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

task_local! {
    static RUN_TRACE: TraceContext;
}

pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    RUN_TRACE.scope(context, future).await
}

pub fn current_trace_id() -> Option<String> {
    RUN_TRACE.try_with(|ctx| ctx.trace_id.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trace_id_is_scoped_to_future() {
        assert_eq!(current_trace_id(), None);
        let inside = with_trace_context(
            TraceContext {
                trace_id: "run-1".to_string(),
            },
            async { current_trace_id() },
        )
        .await;
        assert_eq!(inside.as_deref(), Some("run-1"));
        assert_eq!(current_trace_id(), None);
    }

    #[test]
    fn log_format_parses_known_values() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!(matches!(
            "compact".parse::<LogFormat>(),
            Err(TelemetryInitError::UnknownFormat(value)) if value == "compact"
        ));
    }

    #[test]
    fn directives_quiet_http_stack() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("hyper=warn"));
        assert!(directives.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}

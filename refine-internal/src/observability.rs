//! Logging and metrics setup for the gateway binary.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};

use crate::error::{Error, ErrorDetails};

const DEFAULT_LOG_FILTER: &str = "gateway=info,refine_internal=info,warn";
const DEBUG_LOG_FILTER: &str = "gateway=debug,refine_internal=debug,warn";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Lets `main` raise the log level once the config file (which may set
/// `gateway.debug`) has been read, after logging is already running.
pub struct DelayedDebugLogs {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl DelayedDebugLogs {
    /// Has no effect when `RUST_LOG` is set.
    pub fn enable_debug(&self) -> Result<(), Error> {
        if std::env::var("RUST_LOG").is_ok() {
            return Ok(());
        }
        self.handle
            .modify(|filter| *filter = EnvFilter::new(DEBUG_LOG_FILTER))
            .map_err(|e| {
                Error::new(ErrorDetails::Observability {
                    message: format!("Failed to enable debug logs: {e}"),
                })
            })
    }
}

pub fn setup_observability(log_format: LogFormat) -> Result<DelayedDebugLogs, Error> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter, handle) = reload::Layer::new(env_filter);

    let fmt_layer = match log_format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| {
            Error::new(ErrorDetails::Observability {
                message: format!("Failed to initialize tracing subscriber: {e}"),
            })
        })?;

    Ok(DelayedDebugLogs { handle })
}

/// Installs the global Prometheus recorder. Call once per process.
pub fn setup_metrics() -> Result<PrometheusHandle, Error> {
    let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        Error::new(ErrorDetails::Observability {
            message: format!("Failed to install Prometheus exporter: {e}"),
        })
    })?;

    metrics::describe_counter!(
        "refine_requests_total",
        "Refinement requests by outcome"
    );
    metrics::describe_counter!(
        "refine_retries_total",
        "Corrective model calls after a schema violation"
    );
    metrics::describe_gauge!(
        "refine_llm_cost_usd_total",
        "Estimated model spend in USD"
    );

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn test_log_format_values() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("json", true), Ok(LogFormat::Json));
        assert_eq!(LogFormat::from_str("pretty", true), Ok(LogFormat::Pretty));
        assert!(LogFormat::from_str("xml", true).is_err());
    }
}

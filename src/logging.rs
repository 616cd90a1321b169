use crate::config::AppConfig;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Target carrying consistency faults and their repairs
pub const RECONCILIATION_TARGET: &str = "reconciliation";

/// Keeps both non-blocking writers flushing; hold for the process lifetime
pub struct LogGuards {
    _main: WorkerGuard,
    _alerts: WorkerGuard,
}

fn appender(config: &AppConfig, file: &str) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, file),
        _ => tracing_appender::rolling::never(&config.log_dir, file),
    }
}

/// File name of the alert log, next to the main log
pub fn alert_file_name(log_file: &str) -> String {
    match log_file.rsplit_once('.') {
        Some((stem, ext)) => format!("{}.{}.{}", stem, RECONCILIATION_TARGET, ext),
        None => format!("{}.{}", log_file, RECONCILIATION_TARGET),
    }
}

/// Subscriber with every layer attached, not yet installed
pub type BoxedSubscriber = Box<dyn Subscriber + Send + Sync>;

/// Build the subscriber and its writer guards.
///
/// Besides the main log, every event on the `reconciliation` target is
/// written to its own alert file regardless of the configured level, so an
/// alerting pipeline can tail one file for consistency faults.
pub fn build_subscriber(config: &AppConfig) -> (BoxedSubscriber, LogGuards) {
    let (main_writer, main_guard) = tracing_appender::non_blocking(appender(config, &config.log_file));
    let (alert_writer, alert_guard) =
        tracing_appender::non_blocking(appender(config, &alert_file_name(&config.log_file)));

    let filter_str = format!("{},{}=info", config.log_level, RECONCILIATION_TARGET);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    // Registered first so both branches stack on a plain Registry
    let alert_layer = fmt::layer()
        .json()
        .with_writer(alert_writer)
        .with_ansi(false)
        .with_filter(Targets::new().with_target(RECONCILIATION_TARGET, Level::INFO))
        .boxed();
    let registry = tracing_subscriber::registry().with(alert_layer);

    let subscriber: BoxedSubscriber = if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(main_writer)
            .with_ansi(false)
            .with_filter(filter);
        Box::new(registry.with(file_layer))
    } else {
        let file_layer = fmt::layer()
            .with_target(true)
            .with_writer(main_writer)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        Box::new(registry.with(file_layer.and_then(stdout_layer).with_filter(filter)))
    };

    let guards = LogGuards {
        _main: main_guard,
        _alerts: alert_guard,
    };
    (subscriber, guards)
}

/// Install the global subscriber; keep the guards alive for the process lifetime
pub fn init_logging(config: &AppConfig) -> LogGuards {
    let (subscriber, guards) = build_subscriber(config);
    subscriber.init();
    guards
}

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Stdout is JSON or pretty per
/// `logging.json`; when `logging.file_dir` is set a daily rolling JSON file is
/// written as well. Keep the returned guard alive until shutdown or buffered
/// file lines are lost.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let stdout_json = config.json.then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
    });
    let stdout_pretty = (!config.json).then(|| {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
    });

    let (file_layer, guard) = match &config.file_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("rag-agent")
                .filename_suffix("log")
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_json)
        .with(stdout_pretty)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

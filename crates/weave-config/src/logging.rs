//! Tracing subscriber setup driven by [`LoggingConfig`].

use crate::error::{ConfigError, FileOp};
use crate::{LogFormat, LoggingConfig};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level` when set. Output goes to
/// stderr unless `config.file` names a log file, which is opened in append
/// mode. Fails if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?,
    };

    match config.file {
        Some(ref path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::file(FileOp::CreateDir, parent, e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ConfigError::file(FileOp::Write, path, e))?;
            install(filter, &config.format, Mutex::new(file), false)
        }
        None => install(filter, &config.format, std::io::stderr, true),
    }
}

fn install<W>(filter: EnvFilter, format: &LogFormat, writer: W, ansi: bool) -> Result<(), ConfigError>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| ConfigError::Logging(e.to_string()))
}

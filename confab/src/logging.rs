use std::{fs::OpenOptions, sync::Arc};

use tracing::Level;
use tracing_subscriber::{
    filter::Directive,
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Crates whose chatter is capped unless `RUST_LOG` says otherwise
const QUIET_TARGETS: &[&str] = &["hyper=warn", "tower_http=info"];

/// Install the global subscriber
///
/// `RUST_LOG` wins over `logging.level`. Output goes to stdout, or is
/// appended to `logging.file_path` without ANSI colors.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let (writer, ansi) = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let (json, pretty) = if config.format == "json" {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_line_number(true)
            .with_writer(writer);
        (Some(layer), None)
    } else {
        let layer = fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_file(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(writer);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()?;
    Ok(())
}

fn default_filter(level: Level) -> EnvFilter {
    QUIET_TARGETS
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(EnvFilter::new(level.to_string()), EnvFilter::add_directive)
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_default_filter_caps_noisy_crates() {
        let filter = default_filter(Level::DEBUG).to_string();
        assert!(filter.to_lowercase().contains("debug"));
        assert!(filter.contains("hyper=warn"));
    }
}

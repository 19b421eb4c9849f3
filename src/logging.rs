//! Tracing subscriber setup shared by every subcommand.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;

/// Build the filter: `RUST_LOG` wins, then the configured level.
pub fn env_filter(section: &LoggingSection, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if verbose { "debug" } else { section.level.as_str() };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Output goes to stderr so command output
/// on stdout stays parseable. Calling this twice is a no-op.
pub fn init(section: &LoggingSection, verbose: bool) {
    let filter = env_filter(section, verbose);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let result = if section.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back() {
        let section = LoggingSection {
            level: "not a [valid directive".into(),
            json: false,
        };
        // Only meaningful when RUST_LOG is unset; either way it must not panic.
        let _ = env_filter(&section, false);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let section = LoggingSection::default();
        init(&section, false);
        init(&section, true);
    }
}

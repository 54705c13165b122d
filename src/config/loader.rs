/// Configuration loading from TOML file
use std::path::Path;

use crate::error::{FeedError, Result};
use crate::types::Config;
use crate::utils::time::{parse_timezone, DateWindow};

/// Environment overrides use this prefix, e.g. `BARSYNC__FEED__START=2024-01-01`
const ENV_PREFIX: &str = "BARSYNC";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(FeedError::ConfigError(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Toml))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .map_err(|e| FeedError::ConfigError(format!("Failed to read config file: {}", e)))?;

    let config: Config = settings
        .try_deserialize()
        .map_err(|e| FeedError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

/// Parse a config from TOML text, without environment overrides
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| FeedError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    let feed = &config.feed;

    if feed.sources.is_empty() {
        return Err(FeedError::ConfigError("feed.sources is empty".to_string()));
    }

    for source in &feed.sources {
        if source.path.as_os_str().is_empty() {
            return Err(FeedError::ConfigError("source path is empty".to_string()));
        }
        if let Some(column) = &source.symbol_column {
            if column.trim().is_empty() {
                return Err(FeedError::ConfigError(format!(
                    "symbol_column is empty for {}",
                    source.path.display()
                )));
            }
        }
        if source.stream && source.symbol_column.is_some() {
            return Err(FeedError::ConfigError(format!(
                "streamed source {} cannot have a symbol_column",
                source.path.display()
            )));
        }
    }

    if feed.timestamp_column.trim().is_empty() {
        return Err(FeedError::ConfigError("timestamp_column is empty".to_string()));
    }

    // Timezone and window must both resolve
    parse_timezone(&feed.naive_timezone)?;
    DateWindow::parse(feed.start.as_deref(), feed.end.as_deref())?;

    if config.logging.level.trim().is_empty() {
        return Err(FeedError::ConfigError("logging.level is empty".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogFormat;
    use std::io::Write;

    const SAMPLE: &str = r#"
[feed]
start = "2024-01-01"
end = "2024-06-30 23:59:59"
naive_timezone = "America/New_York"

[feed.columns]
volume = "vol"

[[feed.sources]]
path = "data/aapl.csv"
symbols = ["aapl"]

[[feed.sources]]
path = "data/mixed.csv.gz"
symbols = ["MSFT", "GOOG"]
symbol_column = "ticker"

[logging]
level = "debug"
format = "json"

[output]
events_path = "data/events.jsonl"
"#;

    #[test]
    fn test_parse_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.feed.sources.len(), 2);
        assert_eq!(config.feed.timestamp_column, "datetime");
        assert_eq!(config.feed.columns.volume, "vol");
        assert_eq!(config.feed.columns.close, "close");
        assert_eq!(config.feed.sources[1].symbol_column.as_deref(), Some("ticker"));
        assert!(!config.feed.sources[0].stream);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.output.events_path.is_some());
        assert!(!config.output.print_events);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(parse_config("[feed]\n").is_err());

        let inverted = r#"
[feed]
start = "2024-02-01"
end = "2024-01-01"
[[feed.sources]]
path = "a.csv"
symbols = ["A"]
"#;
        assert!(matches!(parse_config(inverted), Err(FeedError::ConfigError(_))));

        let bad_tz = r#"
[feed]
naive_timezone = "Nowhere/Special"
[[feed.sources]]
path = "a.csv"
symbols = ["A"]
"#;
        assert!(matches!(parse_config(bad_tz), Err(FeedError::InvalidTimezone(_))));

        let streamed_mixed = r#"
[feed]
[[feed.sources]]
path = "mixed.csv"
symbols = ["A"]
symbol_column = "ticker"
stream = true
"#;
        assert!(matches!(parse_config(streamed_mixed), Err(FeedError::ConfigError(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.feed.naive_timezone, "America/New_York");
        assert_eq!(config.logging.level, "debug");

        assert!(load_config("does/not/exist.toml").is_err());
    }
}

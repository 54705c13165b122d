/// Print a historical slice of the configured sources as JSON
/// Usage: cargo run --bin history_slice -- SYMBOLS START END [TIMEFRAME]
///   SYMBOLS is comma-separated, e.g. AAPL,MSFT
use anyhow::{bail, Context};
use tracing::info;

use barsync::config::load_config;
use barsync::data::CsvDataFeed;
use barsync::utils::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 || args.len() > 4 {
        bail!("usage: history_slice SYMBOLS START END [TIMEFRAME]");
    }

    let symbols: Vec<&str> = args[0]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        bail!("no symbols given");
    }
    let timeframe = args.get(3).map(String::as_str).unwrap_or("1m");

    let config_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path))?;
    init_logging(&config.logging)?;

    let feed = CsvDataFeed::from_config_concurrent(&config.feed).await?;
    let slices = feed
        .historical()
        .get_historical_data(symbols.as_slice(), args[1].as_str(), args[2].as_str(), timeframe)?;

    for (symbol, bars) in &slices {
        info!("📊 {}: {} bar(s)", symbol, bars.len());
    }

    println!("{}", serde_json::to_string_pretty(&slices)?);
    Ok(())
}

/// Main entry point for the bar replay engine
use std::collections::BTreeMap;

use anyhow::Context;
use tracing::{error, info, warn};

use barsync::{
    config::load_config,
    data::{CsvDataFeed, MarketDataSource, StopHandle},
    events::{JsonlFileSink, SinkSet, StdoutSink},
    utils::{init_logging, StreamDigest},
    Config,
};

/// Replay state: one feed draining into zero or more sinks
pub struct ReplayApp {
    feed: CsvDataFeed,
    sinks: SinkSet,
    digest: StreamDigest,
    per_symbol: BTreeMap<String, u64>,
}

/// What a finished replay reports
#[derive(Debug)]
pub struct ReplaySummary {
    pub events: u64,
    pub per_symbol: BTreeMap<String, u64>,
    pub digest: String,
    pub stopped_early: bool,
}

impl ReplayApp {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        info!("📋 Loading {} source(s)...", config.feed.sources.len());
        let feed = CsvDataFeed::from_config_concurrent(&config.feed)
            .await
            .context("failed to build data feed")?;

        let mut sinks = SinkSet::new();
        if let Some(path) = &config.output.events_path {
            let sink = JsonlFileSink::open(path)
                .with_context(|| format!("failed to open event log {}", path.display()))?;
            info!("📝 Writing events to {}", sink.path().display());
            sinks.push(Box::new(sink));
        }
        if config.output.print_events {
            sinks.push(Box::new(StdoutSink::new()));
        }
        if sinks.is_empty() {
            info!("No sinks configured; events are counted and digested only");
        }

        Ok(ReplayApp {
            feed,
            sinks,
            digest: StreamDigest::new(),
            per_symbol: BTreeMap::new(),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.feed.stop_handle()
    }

    /// Drain the feed until it is exhausted or stopped
    pub fn run(mut self) -> anyhow::Result<ReplaySummary> {
        info!("▶️  Replay starting for {:?}", self.feed.symbols());

        while let Some(event) = self.feed.next_event() {
            self.digest.update(&event.idempotency_key);
            *self.per_symbol.entry(event.symbol().to_string()).or_insert(0) += 1;

            // A failed sink leaves the output incomplete
            if self.sinks.publish(&event).is_err() {
                error!("Stopping replay after sink failure at {}", event);
                self.feed.stop();
            }
        }

        if let Err(e) = self.sinks.flush() {
            warn!("Sink flush failed: {} ({})", e, e.error_code());
        }

        let stopped_early = self.feed.symbols().iter().any(|s| {
            self.feed
                .table(s)
                .map(|t| (self.feed.symbol_count(s) as usize) < t.stream_limit())
                .unwrap_or(false)
        });

        Ok(ReplaySummary {
            events: self.digest.count(),
            per_symbol: self.per_symbol,
            digest: self.digest.finalize(),
            stopped_early,
        })
    }
}

/// Ctrl+C clears the run flag; the replay loop ends at its next request
fn setup_shutdown_handler(handle: StopHandle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received - stopping replay");
                handle.stop();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "config.toml".to_string());

    let config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path))?;
    init_logging(&config.logging)?;

    info!("🚀 Bar replay engine");
    info!("Configuration loaded from {}", config_path);

    let app = ReplayApp::new(&config).await?;
    setup_shutdown_handler(app.stop_handle());

    let summary = tokio::task::spawn_blocking(move || app.run())
        .await
        .context("replay task panicked")??;

    info!("✅ Replay finished: {} event(s)", summary.events);
    for (symbol, count) in &summary.per_symbol {
        info!("   {}: {}", symbol, count);
    }
    info!("Stream digest: {}", summary.digest);
    if summary.stopped_early {
        warn!("Replay ended before every symbol was drained");
    }

    Ok(())
}

/// Market data source capability and its CSV-backed implementation
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::cursor::{BarCursor, CsvStreamCursor, TableCursor};
use super::historical::{HistoricalAccessor, HistoricalData};
use super::loader::{load_sources, load_sources_concurrently, resolve_sources, LoadedSource};
use super::synchronizer::{StopHandle, Synchronizer};
use super::table::SymbolTable;
use super::cache::LatestValueCache;
use crate::error::{FeedError, Result};
use crate::events::Event;
use crate::types::{FeedConfig, FieldMap, FieldValue};

/// Anything that can replay synchronized bars: CSV files, a database, a network feed.
pub trait MarketDataSource {
    /// Next event in global time order; `None` once exhausted or stopped
    fn next_event(&mut self) -> Option<Event>;

    fn get_latest_value(&self, symbol: &str, field: &str, default: FieldValue) -> FieldValue;

    fn get_latest_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>>;

    fn get_latest_all(&self, symbol: &str) -> Option<&FieldMap>;

    fn get_snapshot(&self, symbols: &[&str]) -> BTreeMap<String, FieldMap>;

    fn get_historical_data(
        &self,
        symbols: &[&str],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: &str,
    ) -> Result<HistoricalData<'_>>;

    fn stop(&self);

    fn is_running(&self) -> bool;
}

/// Replays CSV sources through the synchronizer: loaded tables, plus any
/// sources configured to stream lazily from disk.
pub struct CsvDataFeed {
    tables: BTreeMap<String, Arc<SymbolTable>>,
    streamed: BTreeSet<String>,
    sync: Synchronizer,
}

impl CsvDataFeed {
    /// Load every configured source sequentially and build the feed
    pub fn from_config(feed: &FeedConfig) -> Result<Self> {
        let streams = open_streams(feed)?;
        Self::assemble(load_sources(feed)?, streams)
    }

    /// Same as `from_config`, loading sources in parallel on the blocking pool
    pub async fn from_config_concurrent(feed: &FeedConfig) -> Result<Self> {
        let streams = open_streams(feed)?;
        Self::assemble(load_sources_concurrently(feed).await?, streams)
    }

    /// Fails if two sources produce the same symbol
    pub fn from_loaded(sources: Vec<LoadedSource>) -> Result<Self> {
        Self::assemble(sources, Vec::new())
    }

    /// Tables without a source file; duplicates are reported by position
    pub fn from_tables(tables: Vec<SymbolTable>) -> Result<Self> {
        let labelled = tables
            .into_iter()
            .enumerate()
            .map(|(i, table)| (format!("table #{}", i), table))
            .collect();
        Self::build(labelled, Vec::new())
    }

    fn assemble(sources: Vec<LoadedSource>, streams: Vec<CsvStreamCursor>) -> Result<Self> {
        let mut tables = Vec::new();
        for source in sources {
            for table in source.tables {
                tables.push((source.path.clone(), table));
            }
        }
        Self::build(tables, streams)
    }

    fn build(tables: Vec<(String, SymbolTable)>, streams: Vec<CsvStreamCursor>) -> Result<Self> {
        let mut origins: BTreeMap<String, String> = BTreeMap::new();
        let mut claim = |symbol: &str, origin: String| -> Result<()> {
            if let Some(first) = origins.get(symbol) {
                return Err(FeedError::DuplicateSymbol {
                    symbol: symbol.to_string(),
                    first: first.clone(),
                    second: origin,
                });
            }
            origins.insert(symbol.to_string(), origin);
            Ok(())
        };

        let mut by_symbol: BTreeMap<String, Arc<SymbolTable>> = BTreeMap::new();
        for (origin, table) in tables {
            claim(table.symbol(), origin)?;
            by_symbol.insert(table.symbol().to_string(), Arc::new(table));
        }

        let mut streamed = BTreeSet::new();
        let mut cursors: Vec<Box<dyn BarCursor>> = Vec::with_capacity(by_symbol.len() + streams.len());
        for stream in streams {
            claim(stream.symbol(), stream.display_path())?;
            streamed.insert(stream.symbol().to_string());
            cursors.push(Box::new(stream));
        }

        for (symbol, table) in &by_symbol {
            match TableCursor::open(Arc::clone(table)) {
                Ok(cursor) => cursors.push(Box::new(cursor)),
                Err(e) => warn!("Error getting first bar for {}: {} ({})", symbol, e, e.error_code()),
            }
        }

        if by_symbol.is_empty() && streamed.is_empty() {
            info!("No symbol tables loaded; stream will be empty");
        } else {
            info!(
                "📈 Feed ready: {} table(s) with {} bar(s), {} streamed symbol(s)",
                by_symbol.len(),
                by_symbol.values().map(|t| t.len()).sum::<usize>(),
                streamed.len()
            );
        }

        Ok(CsvDataFeed {
            tables: by_symbol,
            streamed,
            sync: Synchronizer::new(cursors),
        })
    }

    /// Every symbol in the feed, table-backed or streamed, ascending
    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self
            .tables
            .keys()
            .chain(self.streamed.iter())
            .map(String::as_str)
            .collect();
        symbols.sort_unstable();
        symbols
    }

    /// Symbols read lazily; these have no table for historical queries
    pub fn streamed_symbols(&self) -> Vec<&str> {
        self.streamed.iter().map(String::as_str).collect()
    }

    pub fn table(&self, symbol: &str) -> Option<&SymbolTable> {
        self.tables.get(&symbol.to_uppercase()).map(|t| t.as_ref())
    }

    pub fn historical(&self) -> HistoricalAccessor<'_> {
        HistoricalAccessor::new(&self.tables)
    }

    pub fn cache(&self) -> &LatestValueCache {
        self.sync.cache()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.sync.stop_handle()
    }

    pub fn events_emitted(&self) -> u64 {
        self.sync.events_emitted()
    }

    pub fn symbol_count(&self, symbol: &str) -> u64 {
        self.sync.symbol_count(symbol)
    }
}

/// Open a cursor for every source marked `stream`. A source whose first
/// row is malformed is skipped with a warning, like a table would be.
fn open_streams(feed: &FeedConfig) -> Result<Vec<CsvStreamCursor>> {
    let mut streams = Vec::new();
    for resolved in resolve_sources(feed)?.into_iter().filter(|r| r.stream) {
        let path = resolved.display_path();
        match CsvStreamCursor::open(resolved) {
            Ok(cursor) => streams.push(cursor),
            Err(e) if e.is_recoverable() => {
                warn!("Skipping streamed source {}: {} ({})", path, e, e.error_code())
            }
            Err(e) => return Err(e),
        }
    }
    Ok(streams)
}

impl MarketDataSource for CsvDataFeed {
    fn next_event(&mut self) -> Option<Event> {
        self.sync.next_event()
    }

    fn get_latest_value(&self, symbol: &str, field: &str, default: FieldValue) -> FieldValue {
        self.sync.cache().get_value_or(symbol, field, default)
    }

    fn get_latest_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.sync.cache().get_timestamp(symbol)
    }

    fn get_latest_all(&self, symbol: &str) -> Option<&FieldMap> {
        self.sync.cache().get_all(symbol)
    }

    fn get_snapshot(&self, symbols: &[&str]) -> BTreeMap<String, FieldMap> {
        self.sync.cache().snapshot(symbols)
    }

    fn get_historical_data(
        &self,
        symbols: &[&str],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: &str,
    ) -> Result<HistoricalData<'_>> {
        self.historical().get_historical_data(symbols, start, end, timeframe)
    }

    fn stop(&self) {
        self.sync.stop();
    }

    fn is_running(&self) -> bool {
        self.sync.is_running()
    }
}

impl Iterator for CsvDataFeed {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.sync.next_event()
    }
}

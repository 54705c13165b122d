/// CSV ingestion: parse, normalize, sort, window and partition bar sources
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use csv::StringRecord;
use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use super::table::{MalformedMark, SymbolTable};
use crate::error::{FeedError, Result};
use crate::types::{Bar, ColumnMap, FeedConfig, FieldValue, SourceConfig};
use crate::utils::time::{coerce_timestamp, parse_timezone, DateWindow};

/// Cells read as a missing value rather than a number
const NULL_TOKENS: &[&str] = &["na", "n/a", "nan", "null", "none"];

/// Keys a bar always carries; source columns with these names are kept under `src_<name>`
const RESERVED_FIELDS: &[&str] = &["symbol", "datetime", "open", "high", "low", "close", "volume"];

pub(crate) type SourceReader = csv::Reader<Box<dyn Read + Send>>;

/// A source with feed defaults applied and every name normalized
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub path: PathBuf,
    pub symbols: Vec<String>,
    pub symbol_column: Option<String>,
    pub timestamp_column: String,
    pub columns: ColumnMap,
    pub window: DateWindow,
    pub naive_tz: Tz,
    pub stream: bool,
}

impl ResolvedSource {
    pub fn resolve(source: &SourceConfig, feed: &FeedConfig) -> Result<Self> {
        let naive_tz = parse_timezone(&feed.naive_timezone)?;
        let window = DateWindow::parse(feed.start.as_deref(), feed.end.as_deref())?;

        let mut symbols: Vec<String> = Vec::with_capacity(source.symbols.len());
        for symbol in &source.symbols {
            let upper = symbol.trim().to_uppercase();
            if !upper.is_empty() && !symbols.contains(&upper) {
                symbols.push(upper);
            }
        }

        Ok(ResolvedSource {
            path: source.path.clone(),
            symbols,
            symbol_column: source.symbol_column.clone(),
            timestamp_column: source
                .timestamp_column
                .clone()
                .unwrap_or_else(|| feed.timestamp_column.clone()),
            columns: source.columns.clone().unwrap_or_else(|| feed.columns.clone()),
            window,
            naive_tz,
            stream: source.stream,
        })
    }

    pub fn display_path(&self) -> String {
        self.path.display().to_string()
    }
}

/// Row counters for one source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows_read: usize,
    pub invalid_timestamps: usize,
    pub outside_window: usize,
    pub unrequested: usize,
    pub malformed: usize,
}

/// Tables produced from one source
#[derive(Debug)]
pub struct LoadedSource {
    pub path: String,
    pub tables: Vec<SymbolTable>,
    pub stats: LoadStats,
}

/// Column positions resolved from the header row
#[derive(Debug, Clone)]
pub(crate) struct RowLayout {
    timestamp_idx: usize,
    symbol_idx: Option<usize>,
    // open, high, low, close, volume
    ohlcv_idx: [Option<usize>; 5],
    extras: Vec<(usize, String)>,
}

/// Outcome of reading one CSV record
pub(crate) enum ParsedRow {
    /// Timestamp could not be coerced; the row is dropped
    BadTimestamp(String),
    Row {
        timestamp: DateTime<Utc>,
        symbol: Option<String>,
        bar: std::result::Result<Bar, String>,
    },
}

impl RowLayout {
    pub(crate) fn from_headers(headers: &StringRecord, resolved: &ResolvedSource) -> Result<Self> {
        let position = |name: &str| headers.iter().position(|h| h == name);

        let timestamp_idx = position(&resolved.timestamp_column).ok_or_else(|| FeedError::MissingColumn {
            column: resolved.timestamp_column.clone(),
            path: resolved.display_path(),
        })?;

        let symbol_idx = match &resolved.symbol_column {
            Some(column) => Some(position(column).ok_or_else(|| FeedError::MissingColumn {
                column: column.clone(),
                path: resolved.display_path(),
            })?),
            None => None,
        };

        let cols = &resolved.columns;
        let ohlcv_idx = [
            position(&cols.open),
            position(&cols.high),
            position(&cols.low),
            position(&cols.close),
            position(&cols.volume),
        ];

        let extras = headers
            .iter()
            .enumerate()
            .filter(|(idx, name)| {
                *idx != timestamp_idx && Some(*idx) != symbol_idx && !cols.is_ohlcv(name)
            })
            .map(|(idx, name)| {
                if RESERVED_FIELDS.contains(&name) {
                    (idx, format!("src_{}", name))
                } else {
                    (idx, name.to_string())
                }
            })
            .collect();

        Ok(RowLayout {
            timestamp_idx,
            symbol_idx,
            ohlcv_idx,
            extras,
        })
    }

    /// Parse one record; `fixed_symbol` names the bar for single-symbol sources
    pub(crate) fn parse(&self, record: &StringRecord, fixed_symbol: Option<&str>, tz: Tz) -> ParsedRow {
        let raw_ts = record.get(self.timestamp_idx).unwrap_or("");
        let timestamp = match coerce_timestamp(raw_ts, tz) {
            Ok(ts) => ts,
            Err(_) => return ParsedRow::BadTimestamp(raw_ts.to_string()),
        };

        let symbol = match self.symbol_idx {
            // A blank grouping cell names no symbol
            Some(idx) => record
                .get(idx)
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty()),
            None => fixed_symbol.map(str::to_string),
        };

        let bar = match &symbol {
            Some(sym) => self.build_bar(record, sym, timestamp),
            None => Err("row has no symbol".to_string()),
        };

        ParsedRow::Row {
            timestamp,
            symbol,
            bar,
        }
    }

    fn build_bar(
        &self,
        record: &StringRecord,
        symbol: &str,
        timestamp: DateTime<Utc>,
    ) -> std::result::Result<Bar, String> {
        const NAMES: [&str; 5] = ["open", "high", "low", "close", "volume"];

        let mut values = [None; 5];
        for (slot, idx) in self.ohlcv_idx.iter().enumerate() {
            if let Some(idx) = idx {
                let cell = record.get(*idx).unwrap_or("");
                values[slot] = parse_numeric(cell)
                    .map_err(|_| format!("{} value '{}' is not numeric", NAMES[slot], cell))?;
            }
        }

        let mut bar = Bar::new(symbol, timestamp);
        bar.open = values[0];
        bar.high = values[1];
        bar.low = values[2];
        bar.close = values[3];
        bar.volume = values[4];
        for (idx, name) in &self.extras {
            let cell = record.get(*idx).unwrap_or("");
            bar.extra.insert(name.clone(), FieldValue::infer(cell));
        }
        Ok(bar)
    }
}

fn parse_numeric(cell: &str) -> std::result::Result<Option<f64>, std::num::ParseFloatError> {
    let trimmed = cell.trim();
    if trimmed.is_empty() || NULL_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        return Ok(None);
    }
    trimmed.parse::<f64>().map(Some)
}

/// Open a CSV source, decompressing `.gz` files on the fly
pub(crate) fn open_reader(path: &Path) -> Result<SourceReader> {
    if !path.exists() {
        return Err(FeedError::SourceNotFound(path.to_path_buf()));
    }

    let file = File::open(path)?;
    let inner: Box<dyn Read + Send> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(inner))
}

/// Load one source into per-symbol tables
pub fn load_source(resolved: &ResolvedSource) -> Result<LoadedSource> {
    let path = resolved.display_path();
    let mut reader = open_reader(&resolved.path)?;
    let headers = reader.headers()?.clone();
    let layout = RowLayout::from_headers(&headers, resolved)?;

    // Single-symbol sources take the first listed symbol
    let fixed_symbol = match &resolved.symbol_column {
        Some(_) => None,
        None => {
            let first = resolved
                .symbols
                .first()
                .ok_or_else(|| FeedError::EmptySymbolList(path.clone()))?;
            if resolved.symbols.len() > 1 {
                warn!(
                    "Source '{}' treated as single-symbol data for '{}'. Other symbols ignored for this file.",
                    path, first
                );
            }
            Some(first.clone())
        }
    };

    let load_all = resolved.symbol_column.is_some() && resolved.symbols.is_empty();
    let mut stats = LoadStats::default();
    let mut rows: HashMap<String, Vec<(DateTime<Utc>, std::result::Result<Bar, String>)>> = HashMap::new();
    let mut record = StringRecord::new();

    while reader.read_record(&mut record)? {
        stats.rows_read += 1;
        match layout.parse(&record, fixed_symbol.as_deref(), resolved.naive_tz) {
            ParsedRow::BadTimestamp(raw) => {
                stats.invalid_timestamps += 1;
                debug!("Dropping row with invalid timestamp '{}' in {}", raw, path);
            }
            ParsedRow::Row { timestamp, symbol, bar } => {
                let Some(symbol) = symbol else {
                    debug!("Dropping row with blank symbol at {} in {}", timestamp, path);
                    stats.unrequested += 1;
                    continue;
                };
                if !load_all && !resolved.symbols.contains(&symbol) {
                    stats.unrequested += 1;
                    continue;
                }
                if !resolved.window.contains(timestamp) {
                    stats.outside_window += 1;
                    continue;
                }
                rows.entry(symbol).or_default().push((timestamp, bar));
            }
        }
    }

    let symbol_order: Vec<String> = if load_all {
        let mut found: Vec<String> = rows.keys().cloned().collect();
        found.sort();
        found
    } else if let Some(symbol) = &fixed_symbol {
        vec![symbol.clone()]
    } else {
        resolved.symbols.clone()
    };

    let mut tables = Vec::with_capacity(symbol_order.len());
    for symbol in symbol_order {
        let Some(mut symbol_rows) = rows.remove(&symbol) else {
            warn!("No data found for symbol '{}' in {}", symbol, path);
            continue;
        };
        if symbol_rows.is_empty() {
            warn!("No data found for symbol '{}' in {}", symbol, path);
            continue;
        }

        symbol_rows.sort_by_key(|(ts, _)| *ts);
        let (table, malformed) = build_table(&symbol, symbol_rows);
        stats.malformed += malformed;
        if let Some(mark) = table.malformed() {
            warn!(
                "{} malformed row(s) for {} in {}; stream stops at {} ({})",
                malformed, symbol, path, mark.timestamp, mark.reason
            );
        }
        tables.push(table);
    }

    info!(
        "Loaded {}: {} rows read, {} symbol table(s), {} invalid timestamps, {} outside window",
        path,
        stats.rows_read,
        tables.len(),
        stats.invalid_timestamps,
        stats.outside_window
    );

    Ok(LoadedSource { path, tables, stats })
}

/// Split sorted rows into well-formed bars and the first malformed mark
fn build_table(
    symbol: &str,
    rows: Vec<(DateTime<Utc>, std::result::Result<Bar, String>)>,
) -> (SymbolTable, usize) {
    let mut bars = Vec::with_capacity(rows.len());
    let mut mark = None;
    let mut malformed = 0;

    for (timestamp, bar) in rows {
        match bar {
            Ok(bar) => bars.push(bar),
            Err(reason) => {
                malformed += 1;
                if mark.is_none() {
                    mark = Some(MalformedMark {
                        position: bars.len(),
                        timestamp,
                        reason,
                    });
                }
            }
        }
    }

    (SymbolTable::with_malformed(symbol, bars, mark), malformed)
}

/// Resolve every configured source against feed defaults
pub fn resolve_sources(feed: &FeedConfig) -> Result<Vec<ResolvedSource>> {
    feed.sources
        .iter()
        .map(|source| ResolvedSource::resolve(source, feed))
        .collect()
}

/// Load all table-backed sources sequentially, in config order.
/// Streamed sources are skipped; they are opened as cursors instead.
pub fn load_sources(feed: &FeedConfig) -> Result<Vec<LoadedSource>> {
    resolve_sources(feed)?
        .iter()
        .filter(|resolved| !resolved.stream)
        .map(load_source)
        .collect()
}

/// Load all table-backed sources on the blocking pool, one task per source.
/// Results keep config order; the first failure is returned.
pub async fn load_sources_concurrently(feed: &FeedConfig) -> Result<Vec<LoadedSource>> {
    let resolved_sources = resolve_sources(feed)?;

    let handles = resolved_sources
        .into_iter()
        .filter(|resolved| !resolved.stream)
        .map(|resolved| tokio::task::spawn_blocking(move || load_source(&resolved)));

    let joined = futures_util::future::join_all(handles).await;

    let mut loaded = Vec::with_capacity(joined.len());
    for result in joined {
        let source = result.map_err(|e| FeedError::TaskFailed(e.to_string()))??;
        loaded.push(source);
    }
    Ok(loaded)
}

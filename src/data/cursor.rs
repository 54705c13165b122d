/// Forward-only bar cursors feeding the synchronizer
use std::sync::Arc;

use chrono::{DateTime, Utc};
use csv::StringRecord;
use tracing::{debug, warn};

use super::loader::{open_reader, ParsedRow, RowLayout, SourceReader, ResolvedSource};
use super::table::SymbolTable;
use crate::error::{FeedError, Result};
use crate::types::Bar;

/// A forward-only, exhaustible producer of bars for one symbol.
///
/// `peek` returns the pending bar without consuming it. `advance` consumes it
/// and loads the next one; an `Err` means the next record could not be
/// produced and the cursor must be treated as exhausted.
pub trait BarCursor: Send {
    fn symbol(&self) -> &str;

    fn peek(&self) -> Option<&Bar>;

    fn advance(&mut self) -> Result<()>;

    fn is_exhausted(&self) -> bool {
        self.peek().is_none()
    }
}

/// Cursor over a pre-loaded table, stopping at its malformed row if any
pub struct TableCursor {
    table: Arc<SymbolTable>,
    position: usize,
    limit: usize,
}

impl TableCursor {
    /// Fails if the table's very first row is malformed
    pub fn open(table: Arc<SymbolTable>) -> Result<Self> {
        let limit = table.stream_limit();
        let cursor = TableCursor {
            table,
            position: 0,
            limit,
        };
        if cursor.limit == 0 {
            cursor.check_malformed()?;
        }
        Ok(cursor)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn check_malformed(&self) -> Result<()> {
        match self.table.malformed() {
            Some(mark) if self.position >= self.limit => Err(FeedError::MalformedRow {
                symbol: self.table.symbol().to_string(),
                reason: format!("row at {}: {}", mark.timestamp, mark.reason),
            }),
            _ => Ok(()),
        }
    }
}

impl BarCursor for TableCursor {
    fn symbol(&self) -> &str {
        self.table.symbol()
    }

    fn peek(&self) -> Option<&Bar> {
        if self.position < self.limit {
            self.table.bars().get(self.position)
        } else {
            None
        }
    }

    fn advance(&mut self) -> Result<()> {
        if self.position < self.limit {
            self.position += 1;
        }
        self.check_malformed()
    }
}

/// Cursor reading a single-symbol CSV lazily, one lookahead bar at a time
pub struct CsvStreamCursor {
    symbol: String,
    resolved: ResolvedSource,
    reader: SourceReader,
    layout: RowLayout,
    record: StringRecord,
    pending: Option<Bar>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl CsvStreamCursor {
    /// Open the source and buffer its first bar
    pub fn open(resolved: ResolvedSource) -> Result<Self> {
        if resolved.symbol_column.is_some() {
            return Err(FeedError::ConfigError(format!(
                "streaming cursor needs a single-symbol source: {}",
                resolved.display_path()
            )));
        }
        let symbol = resolved
            .symbols
            .first()
            .cloned()
            .ok_or_else(|| FeedError::EmptySymbolList(resolved.display_path()))?;

        let mut reader = open_reader(&resolved.path)?;
        let headers = reader.headers()?.clone();
        let layout = RowLayout::from_headers(&headers, &resolved)?;

        let mut cursor = CsvStreamCursor {
            symbol,
            resolved,
            reader,
            layout,
            record: StringRecord::new(),
            pending: None,
            last_timestamp: None,
        };
        cursor.load_next()?;
        Ok(cursor)
    }

    pub fn display_path(&self) -> String {
        self.resolved.display_path()
    }

    /// Read records until one yields an in-window, in-order bar or the file ends
    fn load_next(&mut self) -> Result<()> {
        self.pending = None;
        loop {
            if !self.reader.read_record(&mut self.record)? {
                debug!("Stream source exhausted for {}", self.symbol);
                return Ok(());
            }

            match self
                .layout
                .parse(&self.record, Some(self.symbol.as_str()), self.resolved.naive_tz)
            {
                ParsedRow::BadTimestamp(raw) => {
                    debug!("Dropping row with invalid timestamp '{}' for {}", raw, self.symbol);
                }
                ParsedRow::Row { timestamp, bar, .. } => {
                    if !self.resolved.window.contains(timestamp) {
                        continue;
                    }
                    if self.last_timestamp.map_or(false, |last| timestamp < last) {
                        warn!(
                            "Dropping out-of-order row for {} at {} (previous {})",
                            self.symbol,
                            timestamp,
                            self.last_timestamp.map(|t| t.to_rfc3339()).unwrap_or_default()
                        );
                        continue;
                    }
                    let bar = bar.map_err(|reason| FeedError::MalformedRow {
                        symbol: self.symbol.clone(),
                        reason: format!("row at {}: {}", timestamp, reason),
                    })?;
                    self.last_timestamp = Some(timestamp);
                    self.pending = Some(bar);
                    return Ok(());
                }
            }
        }
    }
}

impl BarCursor for CsvStreamCursor {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn peek(&self) -> Option<&Bar> {
        self.pending.as_ref()
    }

    fn advance(&mut self) -> Result<()> {
        if self.pending.is_none() {
            return Ok(());
        }
        self.load_next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::load_source;
    use crate::types::{FeedConfig, SourceConfig};
    use tempfile::TempDir;

    fn resolve_csv(dir: &TempDir, content: &str) -> ResolvedSource {
        let path = dir.path().join("x.csv");
        std::fs::write(&path, content).unwrap();
        ResolvedSource::resolve(&SourceConfig::new(path, &["x"]), &FeedConfig::default()).unwrap()
    }

    fn drain(cursor: &mut dyn BarCursor) -> (Vec<f64>, Option<FeedError>) {
        let mut closes = Vec::new();
        while let Some(bar) = cursor.peek() {
            closes.push(bar.close.unwrap_or(f64::NAN));
            if let Err(e) = cursor.advance() {
                return (closes, Some(e));
            }
        }
        (closes, None)
    }

    #[test]
    fn test_table_cursor_walks_in_order() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_csv(&dir, "datetime,close\n2024-01-02 09:01,2\n2024-01-02 09:00,1\n");
        let table = Arc::new(load_source(&resolved).unwrap().tables.remove(0));

        let mut cursor = TableCursor::open(table).unwrap();
        assert_eq!(cursor.symbol(), "X");
        let (closes, err) = drain(&mut cursor);
        assert_eq!(closes, vec![1.0, 2.0]);
        assert!(err.is_none());
        assert!(cursor.is_exhausted());
        // Exhaustion is terminal
        assert!(cursor.advance().is_ok());
        assert!(cursor.peek().is_none());
    }

    #[test]
    fn test_table_cursor_stops_at_malformed_row() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_csv(
            &dir,
            "datetime,close\n2024-01-02 09:00,1\n2024-01-02 09:01,bad\n2024-01-02 09:02,3\n",
        );
        let table = Arc::new(load_source(&resolved).unwrap().tables.remove(0));

        let mut cursor = TableCursor::open(table).unwrap();
        let (closes, err) = drain(&mut cursor);
        assert_eq!(closes, vec![1.0]);
        assert!(matches!(err, Some(FeedError::MalformedRow { .. })));
    }

    #[test]
    fn test_table_cursor_malformed_first_row() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_csv(&dir, "datetime,close\n2024-01-02 09:00,bad\n2024-01-02 09:01,2\n");
        let table = Arc::new(load_source(&resolved).unwrap().tables.remove(0));

        assert!(TableCursor::open(table).is_err());
    }

    #[test]
    fn test_stream_cursor_skips_out_of_order_and_stops_on_malformed() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_csv(
            &dir,
            "datetime,close\n\
             2024-01-02 09:00,1\n\
             junk,9\n\
             2024-01-02 09:02,2\n\
             2024-01-02 09:01,8\n\
             2024-01-02 09:03,x\n\
             2024-01-02 09:04,4\n",
        );

        let mut cursor = CsvStreamCursor::open(resolved).unwrap();
        let (closes, err) = drain(&mut cursor);
        assert_eq!(closes, vec![1.0, 2.0]);
        assert!(matches!(err, Some(FeedError::MalformedRow { .. })));
    }

    #[test]
    fn test_stream_cursor_honours_window() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.csv");
        std::fs::write(
            &path,
            "datetime,close\n2024-01-01 10:00,1\n2024-01-02 10:00,2\n2024-01-03 10:00,3\n",
        )
        .unwrap();
        let feed = FeedConfig::default().with_window(Some("2024-01-02"), Some("2024-01-02 23:59:59"));
        let resolved = ResolvedSource::resolve(&SourceConfig::new(path, &["X"]), &feed).unwrap();

        let mut cursor = CsvStreamCursor::open(resolved).unwrap();
        let (closes, err) = drain(&mut cursor);
        assert_eq!(closes, vec![2.0]);
        assert!(err.is_none());
    }
}

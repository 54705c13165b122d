/// Core type definitions for the bar synchronization engine
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field-keyed view of one bar, as carried by market events and the latest-value cache
pub type FieldMap = BTreeMap<String, FieldValue>;

/// OHLCV bar for one symbol at one instant, plus any extra source columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    #[serde(rename = "datetime")]
    pub timestamp: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, FieldValue>,
}

impl Bar {
    pub fn new(symbol: &str, timestamp: DateTime<Utc>) -> Self {
        Bar {
            symbol: symbol.to_uppercase(),
            timestamp,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_ohlcv(mut self, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        self.open = Some(open);
        self.high = Some(high);
        self.low = Some(low);
        self.close = Some(close);
        self.volume = Some(volume);
        self
    }

    pub fn with_extra(mut self, name: &str, value: FieldValue) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    /// Event data mapping: symbol, datetime, the five OHLCV keys, then extras
    pub fn to_field_map(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        // Extras first so the standard keys always win on a name clash
        for (name, value) in &self.extra {
            fields.insert(name.clone(), value.clone());
        }
        fields.insert("symbol".to_string(), FieldValue::Text(self.symbol.clone()));
        fields.insert("datetime".to_string(), FieldValue::Timestamp(self.timestamp));
        fields.insert("open".to_string(), self.open.into());
        fields.insert("high".to_string(), self.high.into());
        fields.insert("low".to_string(), self.low.into());
        fields.insert("close".to_string(), self.close.into());
        fields.insert("volume".to_string(), self.volume.into());
        fields
    }
}

/// A single cell value carried verbatim from a source row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    /// Infer the narrowest value for a raw CSV cell. Cells a number would
    /// not reproduce (leading zeros, `+1`, `nan`, `inf`) stay text.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return FieldValue::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            if i.to_string() == trimmed {
                return FieldValue::Int(i);
            }
            return FieldValue::Text(raw.to_string());
        }
        if is_plain_decimal(trimmed) {
            if let Ok(f) = trimmed.parse::<f64>() {
                if f.is_finite() {
                    return FieldValue::Float(f);
                }
            }
        }
        FieldValue::Text(raw.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// `[-]digits[.digits][e[+-]digits]` with no redundant leading zero
fn is_plain_decimal(cell: &str) -> bool {
    let unsigned = cell.strip_prefix('-').unwrap_or(cell);
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => (&unsigned[..pos], Some(&unsigned[pos + 1..])),
        None => (unsigned, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (mantissa, None),
    };

    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(int_part) || (int_part.len() > 1 && int_part.starts_with('0')) {
        return false;
    }
    if frac_part.map_or(false, |f| !digits(f)) {
        return false;
    }
    exponent.map_or(true, |e| {
        let e = e.strip_prefix(['+', '-']).unwrap_or(e);
        digits(e)
    })
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(value: Option<f64>) -> Self {
        value.map(FieldValue::Float).unwrap_or(FieldValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Logical OHLCV field → source column name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        ColumnMap {
            open: "open".to_string(),
            high: "high".to_string(),
            low: "low".to_string(),
            close: "close".to_string(),
            volume: "volume".to_string(),
        }
    }
}

impl ColumnMap {
    /// True if the source column is consumed as one of the OHLCV fields
    pub fn is_ohlcv(&self, column: &str) -> bool {
        [&self.open, &self.high, &self.low, &self.close, &self.volume]
            .iter()
            .any(|c| c.as_str() == column)
    }
}

/// Configuration for the bar synchronization engine
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    // Inclusive date window, either bound optional
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,

    // Source defaults
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default = "default_naive_timezone")]
    pub naive_timezone: String,
    #[serde(default)]
    pub columns: ColumnMap,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            start: None,
            end: None,
            timestamp_column: default_timestamp_column(),
            naive_timezone: default_naive_timezone(),
            columns: ColumnMap::default(),
            sources: Vec::new(),
        }
    }
}

impl FeedConfig {
    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_window(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.start = start.map(str::to_string);
        self.end = end.map(str::to_string);
        self
    }
}

/// One tabular source file
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Grouping column when the file mixes several symbols
    #[serde(default)]
    pub symbol_column: Option<String>,
    #[serde(default)]
    pub timestamp_column: Option<String>,
    #[serde(default)]
    pub columns: Option<ColumnMap>,
    /// Read lazily row by row instead of loading a table; single-symbol sources only.
    /// Streamed symbols are not served by historical queries.
    #[serde(default)]
    pub stream: bool,
}

impl SourceConfig {
    pub fn new<P: Into<PathBuf>>(path: P, symbols: &[&str]) -> Self {
        SourceConfig {
            path: path.into(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            symbol_column: None,
            timestamp_column: None,
            columns: None,
            stream: false,
        }
    }

    pub fn with_symbol_column(mut self, column: &str) -> Self {
        self.symbol_column = Some(column.to_string());
        self
    }

    pub fn with_timestamp_column(mut self, column: &str) -> Self {
        self.timestamp_column = Some(column.to_string());
        self
    }

    pub fn with_columns(mut self, columns: ColumnMap) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn streamed(mut self) -> Self {
        self.stream = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Append every emitted event to this JSONL file
    #[serde(default)]
    pub events_path: Option<PathBuf>,
    #[serde(default)]
    pub print_events: bool,
}

fn default_timestamp_column() -> String {
    "datetime".to_string()
}

fn default_naive_timezone() -> String {
    "UTC".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_field_value_inference() {
        assert_eq!(FieldValue::infer(""), FieldValue::Null);
        assert_eq!(FieldValue::infer("42"), FieldValue::Int(42));
        assert_eq!(FieldValue::infer("1.5"), FieldValue::Float(1.5));
        assert_eq!(FieldValue::infer("NYSE"), FieldValue::Text("NYSE".to_string()));
    }

    #[test]
    fn test_field_value_keeps_non_numeric_spellings_verbatim() {
        for cell in ["007", "+5", "nan", "NaN", "inf", "-Infinity", ".5", "1.", "0x1F"] {
            assert_eq!(FieldValue::infer(cell), FieldValue::Text(cell.to_string()), "{}", cell);
        }
        assert_eq!(FieldValue::infer("-3"), FieldValue::Int(-3));
        assert_eq!(FieldValue::infer("0"), FieldValue::Int(0));
        assert_eq!(FieldValue::infer("0.25"), FieldValue::Float(0.25));
        assert_eq!(FieldValue::infer("1.50"), FieldValue::Float(1.5));
        assert_eq!(FieldValue::infer("2.5e3"), FieldValue::Float(2500.0));
    }

    #[test]
    fn test_bar_field_map() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        let bar = Bar::new("aapl", ts)
            .with_ohlcv(10.0, 11.0, 9.5, 10.5, 1200.0)
            .with_extra("vwap", FieldValue::Float(10.2));

        let fields = bar.to_field_map();
        assert_eq!(fields["symbol"], FieldValue::Text("AAPL".to_string()));
        assert_eq!(fields["datetime"].as_timestamp(), Some(ts));
        assert_eq!(fields["close"].as_f64(), Some(10.5));
        assert_eq!(fields["vwap"].as_f64(), Some(10.2));
        assert_eq!(fields.len(), 8);
    }

    #[test]
    fn test_bar_json_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        let mut bar = Bar::new("MSFT", ts).with_extra("exchange", "XNAS".into());
        bar.close = Some(400.0);

        let json = serde_json::to_value(&bar).unwrap();
        assert_eq!(json["symbol"], "MSFT");
        assert_eq!(json["datetime"], "2024-03-01T14:30:00Z");
        assert_eq!(json["close"], 400.0);
        assert!(json["open"].is_null());
        assert_eq!(json["exchange"], "XNAS");
    }
}

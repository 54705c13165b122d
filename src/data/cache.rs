/// Latest-value cache: the most recently emitted bar per symbol
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::types::{Bar, FieldMap, FieldValue};

#[derive(Debug, Clone)]
struct CachedBar {
    fields: FieldMap,
    timestamp: DateTime<Utc>,
}

/// Single writer (the synchronizer), unrestricted readers.
/// Unknown symbols and fields read as absent, never as errors.
#[derive(Debug, Default)]
pub struct LatestValueCache {
    entries: HashMap<String, CachedBar>,
}

impl LatestValueCache {
    pub fn new() -> Self {
        LatestValueCache {
            entries: HashMap::new(),
        }
    }

    /// Replace the entry for the bar's symbol
    pub fn update(&mut self, bar: &Bar) {
        self.entries.insert(
            bar.symbol.clone(),
            CachedBar {
                fields: bar.to_field_map(),
                timestamp: bar.timestamp,
            },
        );
    }

    pub fn get_value(&self, symbol: &str, field: &str) -> Option<&FieldValue> {
        self.entries
            .get(&symbol.to_uppercase())
            .and_then(|entry| entry.fields.get(field))
    }

    /// Field value, or `default` when the symbol or field is unknown
    pub fn get_value_or(&self, symbol: &str, field: &str, default: FieldValue) -> FieldValue {
        self.get_value(symbol, field).cloned().unwrap_or(default)
    }

    pub fn get_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.entries.get(&symbol.to_uppercase()).map(|entry| entry.timestamp)
    }

    pub fn get_all(&self, symbol: &str) -> Option<&FieldMap> {
        self.entries.get(&symbol.to_uppercase()).map(|entry| &entry.fields)
    }

    /// Field maps for the requested symbols that have been emitted at least once
    pub fn snapshot<S: AsRef<str>>(&self, symbols: &[S]) -> BTreeMap<String, FieldMap> {
        symbols
            .iter()
            .filter_map(|symbol| {
                let key = symbol.as_ref().to_uppercase();
                self.entries
                    .get(&key)
                    .map(|entry| (key, entry.fields.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(symbol: &str, minute: u32, close: f64) -> Bar {
        let mut bar = Bar::new(symbol, Utc.with_ymd_and_hms(2024, 1, 2, 9, minute, 0).unwrap());
        bar.close = Some(close);
        bar
    }

    #[test]
    fn test_unknown_symbol_is_absent() {
        let cache = LatestValueCache::new();
        assert!(cache.get_value("AAPL", "close").is_none());
        assert!(cache.get_timestamp("AAPL").is_none());
        assert!(cache.get_all("AAPL").is_none());
        assert_eq!(
            cache.get_value_or("AAPL", "close", FieldValue::Float(-1.0)),
            FieldValue::Float(-1.0)
        );
        assert!(cache.snapshot(&["AAPL"]).is_empty());
    }

    #[test]
    fn test_update_replaces_entry() {
        let mut cache = LatestValueCache::new();
        cache.update(&bar("AAPL", 0, 1.0));
        cache.update(&bar("AAPL", 5, 2.0));

        assert_eq!(cache.get_value("aapl", "close"), Some(&FieldValue::Float(2.0)));
        assert_eq!(
            cache.get_timestamp("AAPL"),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 9, 5, 0).unwrap())
        );
        assert!(cache.get_value("AAPL", "no_such_field").is_none());
        assert_eq!(cache.get_value("AAPL", "open"), Some(&FieldValue::Null));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_snapshot_only_includes_known_symbols() {
        let mut cache = LatestValueCache::new();
        cache.update(&bar("AAPL", 0, 1.0));
        cache.update(&bar("MSFT", 1, 2.0));

        let snapshot = cache.snapshot(&["msft", "TSLA"]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["MSFT"]["close"], FieldValue::Float(2.0));
    }
}

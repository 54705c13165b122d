/// Read-only historical slices over the loaded tables
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::table::SymbolTable;
use crate::error::Result;
use crate::types::Bar;
use crate::utils::time::IntoUtc;

/// Per-symbol contiguous, ascending slices borrowed from the tables
pub type HistoricalData<'a> = BTreeMap<String, &'a [Bar]>;

/// Never touches cursor or cache state; usable at any point in a run,
/// including after the stream is exhausted.
pub struct HistoricalAccessor<'a> {
    tables: &'a BTreeMap<String, Arc<SymbolTable>>,
}

impl<'a> HistoricalAccessor<'a> {
    pub fn new(tables: &'a BTreeMap<String, Arc<SymbolTable>>) -> Self {
        HistoricalAccessor { tables }
    }

    /// Bars with `start <= timestamp <= end` for every loaded symbol requested.
    /// Unknown symbols are logged and omitted.
    pub fn slice<S: AsRef<str>>(
        &self,
        symbols: &[S],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> HistoricalData<'a> {
        let mut results = HistoricalData::new();
        let tables: &'a BTreeMap<String, Arc<SymbolTable>> = self.tables;

        for symbol in symbols {
            let key = symbol.as_ref().trim().to_uppercase();
            match tables.get(&key) {
                Some(table) => {
                    let bars = table.range(start, end);
                    if bars.is_empty() {
                        info!("No bars for {} between {} and {}", key, start, end);
                    }
                    results.insert(key, bars);
                }
                None => warn!(
                    "No historical data loaded for symbol '{}' to fulfill get_historical_data request.",
                    key
                ),
            }
        }

        results
    }

    /// `slice` with bounds given as strings or typed timestamps (naive = UTC).
    /// `timeframe` is accepted for interface symmetry; no resampling is done.
    pub fn get_historical_data<S, T0, T1>(
        &self,
        symbols: &[S],
        start: T0,
        end: T1,
        timeframe: &str,
    ) -> Result<HistoricalData<'a>>
    where
        S: AsRef<str>,
        T0: IntoUtc,
        T1: IntoUtc,
    {
        let start = start.into_utc()?;
        let end = end.into_utc()?;
        debug!(
            "Historical request: {} symbol(s), {} to {}, timeframe '{}' (not resampled)",
            symbols.len(),
            start,
            end,
            timeframe
        );
        Ok(self.slice(symbols, start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tables() -> BTreeMap<String, Arc<SymbolTable>> {
        let bars = (0..10)
            .map(|m| {
                let mut bar = Bar::new("X", Utc.with_ymd_and_hms(2024, 1, 2, 9, m, 0).unwrap());
                bar.close = Some(m as f64);
                bar
            })
            .collect();
        let mut map = BTreeMap::new();
        map.insert("X".to_string(), Arc::new(SymbolTable::new("X", bars)));
        map
    }

    #[test]
    fn test_slice_inclusive_and_ordered() {
        let tables = tables();
        let accessor = HistoricalAccessor::new(&tables);

        let data = accessor
            .get_historical_data(&["x"], "2024-01-02 09:03:00", "2024-01-02 09:06", "1m")
            .unwrap();
        let closes: Vec<f64> = data["X"].iter().filter_map(|b| b.close).collect();
        assert_eq!(closes, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_unknown_symbols_omitted_and_empty_window_ok() {
        let tables = tables();
        let accessor = HistoricalAccessor::new(&tables);

        let data = accessor
            .get_historical_data(&["X", "NOPE"], "2024-02-01", "2024-02-02", "1d")
            .unwrap();
        assert_eq!(data.len(), 1);
        assert!(data["X"].is_empty());

        assert!(accessor
            .get_historical_data(&["X"], "yesterday", "2024-02-02", "1d")
            .is_err());
    }
}

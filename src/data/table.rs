/// Per-symbol bar table: sorted, immutable once loaded
use chrono::{DateTime, Utc};

use crate::types::Bar;

/// First malformed row found while loading, in sorted order
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedMark {
    /// Number of well-formed bars that precede it
    pub position: usize,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Ascending-by-timestamp bars for one symbol
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbol: String,
    bars: Vec<Bar>,
    malformed: Option<MalformedMark>,
}

impl SymbolTable {
    /// Build from bars that may be unsorted; the sort is stable so duplicate
    /// timestamps keep their source order.
    pub fn new(symbol: &str, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        SymbolTable {
            symbol: symbol.to_uppercase(),
            bars,
            malformed: None,
        }
    }

    /// Table whose stream stops at a malformed row (bars must already be sorted)
    pub(crate) fn with_malformed(symbol: &str, bars: Vec<Bar>, malformed: Option<MalformedMark>) -> Self {
        debug_assert!(bars.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        SymbolTable {
            symbol: symbol.to_uppercase(),
            bars,
            malformed,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.first().map(|b| b.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }

    pub fn malformed(&self) -> Option<&MalformedMark> {
        self.malformed.as_ref()
    }

    /// Number of bars a forward stream may emit before hitting the malformed row
    pub fn stream_limit(&self) -> usize {
        self.malformed
            .as_ref()
            .map_or(self.bars.len(), |m| m.position.min(self.bars.len()))
    }

    /// Contiguous bars with `start <= timestamp <= end` (O(log n))
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[Bar] {
        if start > end {
            return &[];
        }
        let lo = self.bars.partition_point(|b| b.timestamp < start);
        let hi = self.bars.partition_point(|b| b.timestamp <= end);
        &self.bars[lo..hi]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar_at(hour: u32, minute: u32, close: f64) -> Bar {
        let mut bar = Bar::new("X", Utc.with_ymd_and_hms(2024, 1, 2, hour, minute, 0).unwrap());
        bar.close = Some(close);
        bar
    }

    #[test]
    fn test_table_sorts_stably() {
        let table = SymbolTable::new(
            "x",
            vec![bar_at(9, 5, 3.0), bar_at(9, 0, 1.0), bar_at(9, 5, 4.0), bar_at(9, 2, 2.0)],
        );
        let closes: Vec<f64> = table.bars().iter().filter_map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(table.symbol(), "X");
        assert_eq!(table.stream_limit(), 4);
    }

    #[test]
    fn test_range_is_inclusive() {
        let table = SymbolTable::new(
            "X",
            vec![bar_at(9, 0, 1.0), bar_at(9, 5, 2.0), bar_at(9, 10, 3.0), bar_at(9, 15, 4.0)],
        );
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 5, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 9, 10, 0).unwrap();

        let slice = table.range(start, end);
        assert_eq!(slice.len(), 2);
        assert_eq!(slice[0].close, Some(2.0));
        assert_eq!(slice[1].close, Some(3.0));

        assert!(table.range(end, start).is_empty());
        let late = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        assert!(table.range(late, late).is_empty());
    }
}

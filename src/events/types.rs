/// Event envelope emitted by the synchronizer
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Bar, FieldMap};
use crate::utils::generate_idempotency_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Market,
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Market => "MARKET",
        }
    }
}

/// `{ "type": "MARKET", "data": { symbol, datetime, open, ..., extras } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Bar,
    /// Position in the merged stream, starting at 0
    pub sequence: u64,
    pub idempotency_key: String,
}

impl Event {
    /// `symbol_sequence` counts prior events for the same symbol, so that
    /// duplicate timestamps within one series still get distinct keys.
    pub fn market(data: Bar, sequence: u64, symbol_sequence: u64) -> Self {
        let idempotency_key = generate_idempotency_key(&[
            &data.symbol,
            &data.timestamp.to_rfc3339(),
            &symbol_sequence.to_string(),
        ]);
        Event {
            event_type: EventType::Market,
            data,
            sequence,
            idempotency_key,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.data.symbol
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.data.timestamp
    }

    pub fn fields(&self) -> FieldMap {
        self.data.to_field_map()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event(type={}, symbol={}, datetime={}, close={})",
            self.event_type.as_str(),
            self.data.symbol,
            self.data.timestamp.to_rfc3339(),
            self.data
                .close
                .map(|c| c.to_string())
                .unwrap_or_else(|| "null".to_string())
        )
    }
}

/// K-way merge of per-symbol cursors into one time-ordered event stream
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::cache::LatestValueCache;
use super::cursor::BarCursor;
use crate::events::Event;

/// Shared run flag; clearing it stops the merge at the next request.
/// Cloneable so a signal handler or another task can stop the feed.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    fn new() -> Self {
        StopHandle {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Idempotent; the flag never resets
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Pulls one event per request from whichever active cursor holds the
/// earliest pending bar. Equal timestamps are broken by symbol, ascending,
/// so the order is stable across runs. Each tied symbol still emits its
/// own event.
pub struct Synchronizer {
    cursors: BTreeMap<String, Box<dyn BarCursor>>,
    /// Min-heap over (pending timestamp, symbol); one entry per active cursor
    queue: BinaryHeap<Reverse<(DateTime<Utc>, String)>>,
    pending: HashMap<String, DateTime<Utc>>,
    cache: LatestValueCache,
    run: StopHandle,
    emitted: u64,
    per_symbol: HashMap<String, u64>,
}

impl Synchronizer {
    pub fn new(cursors: Vec<Box<dyn BarCursor>>) -> Self {
        let mut sync = Synchronizer {
            cursors: BTreeMap::new(),
            queue: BinaryHeap::with_capacity(cursors.len()),
            pending: HashMap::new(),
            cache: LatestValueCache::new(),
            run: StopHandle::new(),
            emitted: 0,
            per_symbol: HashMap::new(),
        };

        for cursor in cursors {
            let symbol = cursor.symbol().to_uppercase();
            if sync.cursors.contains_key(&symbol) {
                warn!("Duplicate cursor for {}; keeping the first", symbol);
                continue;
            }
            match cursor.peek().map(|bar| bar.timestamp) {
                Some(ts) => {
                    sync.queue.push(Reverse((ts, symbol.clone())));
                    sync.pending.insert(symbol.clone(), ts);
                    sync.cursors.insert(symbol, cursor);
                }
                None => info!("Data stream ended for symbol {}.", symbol),
            }
        }

        debug!("Synchronizer ready with {} active symbol(s)", sync.cursors.len());
        sync
    }

    /// Next event in global time order, or `None` once stopped or exhausted
    pub fn next_event(&mut self) -> Option<Event> {
        if !self.run.is_running() {
            return None;
        }

        let Some(Reverse((_, symbol))) = self.queue.pop() else {
            self.finish();
            return None;
        };

        let Some(cursor) = self.cursors.get_mut(&symbol) else {
            // Queue entries are only pushed for live cursors
            warn!("No active cursor for queued symbol {}", symbol);
            self.pending.remove(&symbol);
            return self.next_event();
        };
        let Some(bar) = cursor.peek().cloned() else {
            self.drop_cursor(&symbol);
            return self.next_event();
        };

        let symbol_seq = self.per_symbol.entry(symbol.clone()).or_insert(0);
        let event = Event::market(bar, self.emitted, *symbol_seq);
        *symbol_seq += 1;
        self.emitted += 1;

        self.cache.update(&event.data);

        match cursor.advance() {
            Ok(()) => match cursor.peek().map(|next| next.timestamp) {
                Some(ts) => {
                    self.queue.push(Reverse((ts, symbol.clone())));
                    self.pending.insert(symbol, ts);
                }
                None => {
                    info!("Data stream completed for symbol {}.", symbol);
                    self.drop_cursor(&symbol);
                }
            },
            Err(e) => {
                warn!(
                    "Error advancing cursor for {}: {} ({}); dropping symbol",
                    symbol,
                    e,
                    e.error_code()
                );
                self.drop_cursor(&symbol);
            }
        }

        if self.cursors.is_empty() {
            self.finish();
        }

        Some(event)
    }

    fn drop_cursor(&mut self, symbol: &str) {
        self.cursors.remove(symbol);
        self.pending.remove(symbol);
    }

    fn finish(&mut self) {
        if self.run.is_running() {
            self.run.stop();
            info!(
                "Market data stream finished for all symbols ({} events).",
                self.emitted
            );
        }
    }

    pub fn stop(&self) {
        self.run.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.run.clone()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }

    pub fn cache(&self) -> &LatestValueCache {
        &self.cache
    }

    /// Symbols whose cursors are still active, ascending
    pub fn active_symbols(&self) -> Vec<&str> {
        self.cursors.keys().map(String::as_str).collect()
    }

    pub fn pending_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.pending.get(&symbol.to_uppercase()).copied()
    }

    pub fn events_emitted(&self) -> u64 {
        self.emitted
    }

    /// Events emitted so far for one symbol
    pub fn symbol_count(&self, symbol: &str) -> u64 {
        self.per_symbol.get(&symbol.to_uppercase()).copied().unwrap_or(0)
    }
}

impl Iterator for Synchronizer {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.next_event()
    }
}

/// Event sinks: where the replay CLI writes the merged stream
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Stdout, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use super::types::Event;
use crate::error::Result;

pub trait EventSink: Send {
    fn publish(&mut self, event: &Event) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Append-only JSONL event log, one event per line
pub struct JsonlFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl JsonlFileSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened event log {}", path.display());
        Ok(JsonlFileSink {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl EventSink for JsonlFileSink {
    fn publish(&mut self, event: &Event) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// JSON lines on standard output
pub struct StdoutSink {
    out: BufWriter<Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        StdoutSink {
            out: BufWriter::new(std::io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for StdoutSink {
    fn publish(&mut self, event: &Event) -> Result<()> {
        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Fans every event out to a set of sinks. A sink whose publish fails is
/// removed, so one broken sink is reported once rather than per event.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn EventSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        SinkSet { sinks: Vec::new() }
    }

    pub fn push(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Publish to every remaining sink; returns the first failure after dropping the failed sinks
    pub fn publish(&mut self, event: &Event) -> Result<()> {
        let mut failure = None;
        self.sinks.retain_mut(|sink| match sink.publish(event) {
            Ok(()) => true,
            Err(e) => {
                error!("Dropping sink after failed publish of {}: {} ({})", event, e, e.error_code());
                if failure.is_none() {
                    failure = Some(e);
                }
                false
            }
        });
        failure.map_or(Ok(()), Err)
    }

    pub fn flush(&mut self) -> Result<()> {
        let mut failure = None;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.flush() {
                warn!("Failed to flush sink: {}", e);
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

/// Read events back from a JSONL log, keeping those at or after `from`.
/// Unparseable lines are skipped with a warning.
pub fn read_event_log<P: AsRef<Path>>(path: P, from: Option<DateTime<Utc>>) -> Result<Vec<Event>> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);

    let mut events = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => {
                if from.map_or(true, |from| event.timestamp() >= from) {
                    events.push(event);
                }
            }
            Err(e) => warn!("Skipping unreadable event at line {}: {}", line_no + 1, e),
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use crate::types::Bar;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn event(minute: u32, sequence: u64) -> Event {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 9, minute, 0).unwrap();
        Event::market(Bar::new("AAPL", ts).with_ohlcv(1.0, 1.0, 1.0, 1.0, 10.0), sequence, sequence)
    }

    #[test]
    fn test_jsonl_sink_round_trip_with_filter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");

        let mut sink = JsonlFileSink::open(&path).unwrap();
        for (i, minute) in [0, 5, 10].iter().enumerate() {
            sink.publish(&event(*minute, i as u64)).unwrap();
        }
        sink.flush().unwrap();
        assert_eq!(sink.written(), 3);

        let all = read_event_log(&path, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], event(0, 0));

        let from = Utc.with_ymd_and_hms(2024, 1, 2, 9, 5, 0).unwrap();
        let later = read_event_log(&path, Some(from)).unwrap();
        assert_eq!(later.len(), 2);
        assert_eq!(later[0].sequence, 1);
    }

    #[test]
    fn test_reader_skips_garbage_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let good = serde_json::to_string(&event(0, 0)).unwrap();
        std::fs::write(&path, format!("{}\nnot json\n\n{}\n", good, good)).unwrap();

        assert_eq!(read_event_log(&path, None).unwrap().len(), 2);
    }

    struct BrokenSink {
        attempts: Arc<AtomicUsize>,
    }

    impl EventSink for BrokenSink {
        fn publish(&mut self, _event: &Event) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(FeedError::FileError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pipe closed",
            )))
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_sink_is_dropped_after_first_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut sinks = SinkSet::new();
        sinks.push(Box::new(BrokenSink { attempts: Arc::clone(&attempts) }));
        sinks.push(Box::new(JsonlFileSink::open(&path).unwrap()));
        assert_eq!(sinks.len(), 2);

        assert!(sinks.publish(&event(0, 0)).is_err());
        assert_eq!(sinks.len(), 1);
        for i in 1..4 {
            sinks.publish(&event(i, i as u64)).unwrap();
        }
        sinks.flush().unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(read_event_log(&path, None).unwrap().len(), 4);
    }
}

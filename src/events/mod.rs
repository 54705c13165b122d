pub mod sink;
pub mod types;

pub use sink::{read_event_log, EventSink, JsonlFileSink, SinkSet, StdoutSink};
pub use types::{Event, EventType};

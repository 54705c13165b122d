pub mod cache;
pub mod cursor;
pub mod feed;
pub mod historical;
pub mod loader;
pub mod synchronizer;
pub mod table;

pub use cache::LatestValueCache;
pub use cursor::{BarCursor, CsvStreamCursor, TableCursor};
pub use feed::{CsvDataFeed, MarketDataSource};
pub use historical::{HistoricalAccessor, HistoricalData};
pub use loader::{load_source, load_sources, load_sources_concurrently, LoadStats, LoadedSource, ResolvedSource};
pub use synchronizer::{StopHandle, Synchronizer};
pub use table::{MalformedMark, SymbolTable};

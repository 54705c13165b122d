pub mod digest;
pub mod logging;
pub mod time;

pub use digest::{generate_idempotency_key, StreamDigest};
pub use logging::init_logging;
pub use time::*;

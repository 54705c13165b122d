pub mod types;
pub mod error;
pub mod events;
pub mod data;
pub mod config;
pub mod utils;

pub use types::*;
pub use error::{Result, FeedError};

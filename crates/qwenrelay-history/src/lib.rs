//! Chat history — one JSON record per chat, bounded length, legacy migration.

pub mod store;
pub mod types;

pub use store::HistoryStore;
pub use types::*;

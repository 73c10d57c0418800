//! QwenRelay Core — configuration, data paths, error types.

pub mod config;
pub mod error;

pub use config::{Config, DataPaths, SiteConfig};
pub use error::{Error, Result};

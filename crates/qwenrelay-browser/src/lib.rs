//! Browser session — Chromium lifecycle over CDP, pooled pages, and the
//! login/verification state machine for the target chat site.

pub mod auth;
pub mod launch;
pub mod manager;
pub mod pool;

pub use auth::{AuthState, ConfirmGate, ConsoleGate};
pub use manager::BrowserSession;
pub use pool::{CdpPagePool, PagePool, PooledPage, POOL_CAPACITY};

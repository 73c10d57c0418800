//! Session persistence — the bearer token file and the cookie/storage
//! snapshot that lets a restart skip interactive login.

pub mod snapshot;
pub mod token;

pub use snapshot::{SessionSnapshot, SnapshotStore, StoredCookie};
pub use token::TokenStore;

//! Model catalog and the message dispatcher that drives completion calls
//! through a live browser page.

pub mod dispatcher;
pub mod models;
pub mod types;

pub use dispatcher::Dispatcher;
pub use models::{ModelCatalog, DEFAULT_MODEL};
pub use types::{Completion, FetchOutcome, SendFailure, SendOutcome};

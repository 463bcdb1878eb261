// Application layer - use cases and orchestration over the ledger store

pub mod error;
pub mod notifier;
pub mod service;

pub use error::*;
pub use notifier::*;
pub use service::*;

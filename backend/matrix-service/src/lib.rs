pub mod config;
pub mod error;
pub mod http;
pub mod repository;
pub mod services;
pub mod validators;

pub use config::Config;
pub use error::{MatrixError, Result};
pub use repository::SnapshotStore;
pub use services::{ReconciliationEngine, SessionManager, SyncStatus};

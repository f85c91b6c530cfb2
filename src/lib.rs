pub mod classifier;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod projector;
pub mod selection;
pub mod session;

pub use error::{Result, SyncError};
pub use session::{SessionOptions, SyncSession};

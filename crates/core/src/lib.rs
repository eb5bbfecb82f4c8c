pub mod config;
pub mod error;
pub mod paths;

pub use config::{BrowserConfig, Config, SnapshotDefaults};
pub use error::{Error, Result};
pub use paths::Paths;

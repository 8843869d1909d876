//! Configuration loading and management

mod loader;

pub use loader::{SiteportConfig, CONFIG_FILE_NAMES};

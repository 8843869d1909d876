//! # siteport-core
//!
//! Core library for Siteport providing:
//! - Configuration file parsing (siteport.yaml)
//! - Type definitions for the site, store, storage and job sections
//! - Logging initialisation shared by every front-end
//! - Small filesystem and formatting helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod types;
pub mod utils;

pub use config::SiteportConfig;
pub use error::{Error, Result};
pub use logging::init_tracing;
pub use utils::{get_home_dir, human_bytes, sanitize_file_name, slugify};

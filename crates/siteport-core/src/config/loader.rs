//! Configuration file loading and parsing

use crate::error::{Error, Result};
use crate::types::{JobsConfig, SiteConfig, SiteportConfigFile, StorageConfig};
use crate::utils::get_home_dir;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::time::Duration;

/// Configuration file names to search for
pub const CONFIG_FILE_NAMES: &[&str] = &["siteport.yaml", "siteport.yml"];

/// Loaded Siteport configuration
#[derive(Debug, Clone)]
pub struct SiteportConfig {
    /// The parsed configuration
    pub config: SiteportConfigFile,

    /// Path to the configuration file, if it came from disk
    pub config_path: Option<Utf8PathBuf>,

    /// Directory relative paths are resolved against
    pub working_dir: Utf8PathBuf,
}

impl SiteportConfig {
    /// Load configuration from the specified path or search for it
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let (config_path, content) = if let Some(p) = path {
            let content = fs::read_to_string(p).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::config_not_found(p.as_str())
                } else {
                    Error::Io(e)
                }
            })?;
            (p.to_owned(), content)
        } else {
            Self::find_config()?
        };

        let working_dir = config_path
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .map(|p| p.to_owned())
            .unwrap_or_else(|| Utf8PathBuf::from("."));

        let mut loaded = Self::from_yaml_str(&content, working_dir)?;
        loaded.config_path = Some(config_path);
        Ok(loaded)
    }

    /// Parse configuration text, resolving relative paths against `working_dir`
    pub fn from_yaml_str(content: &str, working_dir: impl Into<Utf8PathBuf>) -> Result<Self> {
        // An empty document deserializes to unit; treat it as all defaults
        let config: SiteportConfigFile = if content.trim().is_empty() {
            SiteportConfigFile::default()
        } else {
            serde_yaml_ng::from_str(content)?
        };

        let loaded = Self::new(config, working_dir);
        loaded.validate()?;
        Ok(loaded)
    }

    /// Wrap an in-memory configuration
    pub fn new(config: SiteportConfigFile, working_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            config,
            config_path: None,
            working_dir: working_dir.into(),
        }
    }

    /// Find configuration file in current directory or parent directories
    fn find_config() -> Result<(Utf8PathBuf, String)> {
        let cwd = std::env::current_dir().map_err(Error::Io)?;
        let cwd = Utf8PathBuf::try_from(cwd)
            .map_err(|_| Error::invalid_config("Current directory path is not valid UTF-8"))?;

        let mut current = cwd.as_path();

        loop {
            for name in CONFIG_FILE_NAMES {
                let path = current.join(name);
                if path.exists() {
                    let content = fs::read_to_string(&path)?;
                    return Ok((path, content));
                }
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        Err(Error::config_not_found(
            "siteport.yaml (searched current and parent directories)",
        ))
    }

    /// Check values serde cannot check on its own
    pub fn validate(&self) -> Result<()> {
        let site = &self.config.site;
        if site.name.trim().is_empty() {
            return Err(Error::invalid_config("site.name must not be empty"));
        }

        let parsed = url::Url::parse(&site.base_url).map_err(|e| {
            Error::invalid_config(format!("site.base_url '{}': {}", site.base_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::invalid_config(format!(
                "site.base_url must use http or https, got '{}'",
                parsed.scheme()
            )));
        }

        if self.config.storage.max_archive_bytes == 0 {
            return Err(Error::invalid_config(
                "storage.max_archive_bytes must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Resolve a configured path against the working directory
    ///
    /// A leading `~/` expands to the home directory when it is known.
    pub fn resolve(&self, path: &str) -> Utf8PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = get_home_dir()
                .ok()
                .and_then(|h| Utf8PathBuf::try_from(h).ok())
            {
                return home.join(rest);
            }
        }

        let path = Utf8Path::new(path);
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.working_dir.join(path)
        }
    }

    /// Site section
    pub fn site(&self) -> &SiteConfig {
        &self.config.site
    }

    /// Storage section
    pub fn storage(&self) -> &StorageConfig {
        &self.config.storage
    }

    /// Jobs section
    pub fn jobs(&self) -> &JobsConfig {
        &self.config.jobs
    }

    /// Base URL with any trailing slash removed
    pub fn base_url(&self) -> &str {
        self.config.site.base_url.trim_end_matches('/')
    }

    /// Directory holding the content trees
    pub fn content_dir(&self) -> Utf8PathBuf {
        self.resolve(&self.config.site.content_dir)
    }

    /// SQLite database file
    pub fn store_path(&self) -> Utf8PathBuf {
        self.resolve(&self.config.store.path)
    }

    /// Directory holding finished archives
    pub fn archive_dir(&self) -> Utf8PathBuf {
        self.resolve(&self.config.storage.archive_dir)
    }

    /// Retention window for job status records
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.config.jobs.status_ttl_secs)
    }
}

//! Export and import options accepted by the job engine.

use crate::category::ContentCategory;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What an export puts into the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub include_database: bool,
    pub include_uploads: bool,
    pub include_themes: bool,
    pub include_plugins: bool,

    /// Tables left out of the dump
    pub exclude_tables: BTreeSet<String>,

    /// Path prefixes (relative to the plugins directory) left out
    pub exclude_plugins: BTreeSet<String>,

    /// Path prefixes (relative to the themes directory) left out
    pub exclude_themes: BTreeSet<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_database: true,
            include_uploads: true,
            include_themes: true,
            include_plugins: true,
            exclude_tables: BTreeSet::new(),
            exclude_plugins: BTreeSet::new(),
            exclude_themes: BTreeSet::new(),
        }
    }
}

impl ExportOptions {
    /// Export only the structured store
    pub fn database_only() -> Self {
        Self {
            include_uploads: false,
            include_themes: false,
            include_plugins: false,
            ..Self::default()
        }
    }

    pub fn with_excluded_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_tables.extend(tables.into_iter().map(Into::into));
        self
    }

    pub fn with_excluded_plugins<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_plugins
            .extend(prefixes.into_iter().map(Into::into));
        self
    }

    pub fn with_excluded_themes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_themes.extend(prefixes.into_iter().map(Into::into));
        self
    }

    /// Whether a file-tree category is exported
    pub fn includes(&self, category: ContentCategory) -> bool {
        match category {
            ContentCategory::Uploads => self.include_uploads,
            ContentCategory::Themes => self.include_themes,
            ContentCategory::Plugins => self.include_plugins,
        }
    }

    /// Exclusion prefixes for a category
    pub fn exclusions(&self, category: ContentCategory) -> Vec<String> {
        match category {
            ContentCategory::Uploads => Vec::new(),
            ContentCategory::Themes => self.exclude_themes.iter().cloned().collect(),
            ContentCategory::Plugins => self.exclude_plugins.iter().cloned().collect(),
        }
    }

    /// Rejects an export that would produce an empty archive or carries
    /// exclusion rules that walk out of their directory.
    pub fn validate(&self) -> Result<()> {
        let anything = self.include_database
            || ContentCategory::all()
                .into_iter()
                .any(|c| self.includes(c));
        if !anything {
            return Err(Error::validation(
                "export must include the database or at least one content category",
            ));
        }

        for rule in self.exclude_plugins.iter().chain(self.exclude_themes.iter()) {
            if rule.split(['/', '\\']).any(|part| part == "..") {
                return Err(Error::validation(format!(
                    "exclusion rule '{}' must not contain '..'",
                    rule
                )));
            }
        }

        for table in &self.exclude_tables {
            if table.trim().is_empty() {
                return Err(Error::validation("excluded table names must not be empty"));
            }
        }

        Ok(())
    }
}

/// How an import treats the destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Export the current state to a rollback archive before touching it
    pub create_backup: bool,

    /// Origin URL to replace; defaults to the manifest's origin
    pub old_url: Option<String>,

    /// Destination URL; defaults to the configured site base URL
    pub new_url: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            old_url: None,
            new_url: None,
        }
    }
}

impl ImportOptions {
    pub fn with_create_backup(mut self, create_backup: bool) -> Self {
        self.create_backup = create_backup;
        self
    }

    pub fn with_old_url(mut self, url: impl Into<String>) -> Self {
        self.old_url = Some(url.into());
        self
    }

    pub fn with_new_url(mut self, url: impl Into<String>) -> Self {
        self.new_url = Some(url.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("old_url", &self.old_url), ("new_url", &self.new_url)] {
            if let Some(value) = value {
                validate_url(field, value)?;
            }
        }
        Ok(())
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| Error::validation(format!("{} '{}' is not a valid URL: {}", field, value, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::validation(format!(
            "{} must use http or https, got '{}'",
            field,
            parsed.scheme()
        )));
    }
    Ok(())
}

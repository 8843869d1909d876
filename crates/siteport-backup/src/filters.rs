//! File-tree filtering for packaging.
//!
//! Two kinds of rules decide whether a path under a content directory is
//! packed:
//! - Prefix rules: plain string prefixes of the `/`-separated relative
//!   path, taken from the export options of each category
//! - Always excluded patterns: VCS metadata and OS litter that never
//!   belongs in an archive

use crate::category::ContentCategory;
use crate::error::{Error, Result};
use crate::options::ExportOptions;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Patterns that are ALWAYS excluded from archives.
pub const ALWAYS_EXCLUDE: &[&str] = &[
    "**/.git",
    "**/.git/**",
    "**/.svn",
    "**/.svn/**",
    "**/.hg",
    "**/.hg/**",
    "**/.DS_Store",
    "**/Thumbs.db",
];

/// Exclusion rules for one content category.
#[derive(Debug, Clone)]
pub struct FileTreeFilter {
    /// Normalized prefix rules
    prefixes: Vec<String>,

    /// Compiled always-excluded and extra glob patterns
    globset: GlobSet,
}

impl FileTreeFilter {
    /// Creates a filter from prefix rules plus the always-excluded patterns.
    ///
    /// Leading `./` and `/` are dropped from each rule. Empty rules are
    /// ignored since they would exclude everything.
    pub fn new<I, S>(prefixes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .filter_map(|p| {
                let p = p.as_ref().trim();
                let p = p.trim_start_matches("./").trim_start_matches('/');
                (!p.is_empty()).then(|| p.to_string())
            })
            .collect();

        Ok(Self {
            prefixes,
            globset: build_globset(&[])?,
        })
    }

    /// Filter for a category using the export options' exclusion sets.
    pub fn for_category(category: ContentCategory, options: &ExportOptions) -> Result<Self> {
        Self::new(options.exclusions(category))
    }

    /// Adds glob patterns on top of the always-excluded set.
    pub fn with_patterns(mut self, patterns: &[String]) -> Result<Self> {
        self.globset = build_globset(patterns)?;
        Ok(self)
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Checks a relative path (`/`-separated) against every rule.
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        self.prefixes.iter().any(|p| rel_path.starts_with(p.as_str()))
            || self.globset.is_match(rel_path)
    }
}

fn build_globset(extra: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in ALWAYS_EXCLUDE
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
    {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::validation(format!("Invalid exclusion pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::validation(format!("Failed to build exclusion globset: {}", e)))
}

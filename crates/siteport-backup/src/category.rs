//! Content categories carried in an archive.
//!
//! Each category is a directory under the site's content directory and a
//! top-level prefix inside the archive with the same name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A file-tree hierarchy of the site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    /// Media uploaded through the site
    Uploads,

    /// Installed themes
    Themes,

    /// Installed plugins
    Plugins,
}

impl ContentCategory {
    /// Archive prefix and content sub-directory name
    pub fn prefix(&self) -> &'static str {
        match self {
            ContentCategory::Uploads => "uploads",
            ContentCategory::Themes => "themes",
            ContentCategory::Plugins => "plugins",
        }
    }

    /// Every category, in the order they are packed
    pub fn all() -> [ContentCategory; 3] {
        [
            ContentCategory::Uploads,
            ContentCategory::Themes,
            ContentCategory::Plugins,
        ]
    }

    pub fn from_prefix(s: &str) -> Option<ContentCategory> {
        Self::all().into_iter().find(|c| c.prefix() == s)
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

//! Version compatibility checks between an archive and the destination site

use crate::manifest::Manifest;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A version mismatch found while importing. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompatibilityWarning {
    EngineMajorMismatch { archive: u64, current: u64 },
    NewerEngine { archive: String, current: String },
    NewerSitePlatform { archive: String, current: String },
    NewerStorePlatform { archive: String, current: String },
    UnparsableVersion { field: String, value: String },
}

impl fmt::Display for CompatibilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EngineMajorMismatch { archive, current } => write!(
                f,
                "Archive was written by engine major version {} (running {})",
                archive, current
            ),
            Self::NewerEngine { archive, current } => write!(
                f,
                "Archive was written by a newer engine ({} > {})",
                archive, current
            ),
            Self::NewerSitePlatform { archive, current } => write!(
                f,
                "Archive comes from a newer site platform ({} > {})",
                archive, current
            ),
            Self::NewerStorePlatform { archive, current } => write!(
                f,
                "Archive comes from a newer store platform ({} > {})",
                archive, current
            ),
            Self::UnparsableVersion { field, value } => {
                write!(f, "Cannot compare {} version '{}'", field, value)
            }
        }
    }
}

/// Parses loosely formatted versions such as `6.4` or `3.45.1-beta`.
///
/// Missing minor and patch components are treated as zero.
pub fn parse_lenient(value: &str) -> Option<Version> {
    let trimmed = value.trim().trim_start_matches('v');
    if let Ok(v) = Version::parse(trimmed) {
        return Some(v);
    }

    let (core, rest) = match trimmed.find(|c: char| c == '-' || c == '+') {
        Some(pos) => trimmed.split_at(pos),
        None => (trimmed, ""),
    };
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    Version::parse(&format!("{}{}", parts.join("."), rest)).ok()
}

/// Compares the archive's recorded versions against the destination.
pub fn check(
    manifest: &Manifest,
    engine_version: &str,
    store_version: &str,
    site_version: Option<&str>,
) -> Vec<CompatibilityWarning> {
    let mut warnings = Vec::new();

    if let (Some(archive), Some(current)) = (
        parse_or_warn("engine", &manifest.engine_version, &mut warnings),
        parse_or_warn("running engine", engine_version, &mut warnings),
    ) {
        if archive.major != current.major {
            warnings.push(CompatibilityWarning::EngineMajorMismatch {
                archive: archive.major,
                current: current.major,
            });
        } else if archive > current {
            warnings.push(CompatibilityWarning::NewerEngine {
                archive: archive.to_string(),
                current: current.to_string(),
            });
        }
    }

    if let (Some(archive), Some(current)) = (
        parse_or_warn(
            "store platform",
            &manifest.store_platform_version,
            &mut warnings,
        ),
        parse_or_warn("destination store platform", store_version, &mut warnings),
    ) {
        if archive > current {
            warnings.push(CompatibilityWarning::NewerStorePlatform {
                archive: manifest.store_platform_version.clone(),
                current: store_version.to_string(),
            });
        }
    }

    // Site platform versions are optional on both sides
    if let (Some(archive_raw), Some(current_raw)) =
        (manifest.site_platform_version.as_deref(), site_version)
    {
        if let (Some(archive), Some(current)) = (
            parse_or_warn("site platform", archive_raw, &mut warnings),
            parse_or_warn("destination site platform", current_raw, &mut warnings),
        ) {
            if archive > current {
                warnings.push(CompatibilityWarning::NewerSitePlatform {
                    archive: archive_raw.to_string(),
                    current: current_raw.to_string(),
                });
            }
        }
    }

    warnings
}

fn parse_or_warn(
    field: &str,
    value: &str,
    warnings: &mut Vec<CompatibilityWarning>,
) -> Option<Version> {
    let parsed = parse_lenient(value);
    if parsed.is_none() {
        warnings.push(CompatibilityWarning::UnparsableVersion {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ExportOptions;

    fn manifest(engine: &str, store: &str, site: Option<&str>) -> Manifest {
        let mut m = Manifest::new("test", store, "http://old.example", ExportOptions::default())
            .with_site_platform_version(site.map(str::to_string));
        m.engine_version = engine.to_string();
        m
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(parse_lenient("6.4"), Some(Version::new(6, 4, 0)));
        assert_eq!(parse_lenient("v3"), Some(Version::new(3, 0, 0)));
        assert_eq!(parse_lenient("3.45.1"), Some(Version::new(3, 45, 1)));
        assert!(parse_lenient("6.4-beta").is_some());
        assert!(parse_lenient("not-a-version").is_none());
        assert!(parse_lenient("").is_none());
        assert!(parse_lenient("1.2.3.4").is_none());
    }

    #[test]
    fn test_matching_versions_produce_no_warnings() {
        let m = manifest("0.1.0", "3.45.0", Some("6.4"));
        assert!(check(&m, "0.1.0", "3.45.0", Some("6.4.2")).is_empty());
    }

    #[test]
    fn test_engine_major_mismatch() {
        let m = manifest("2.0.0", "3.45.0", None);
        let warnings = check(&m, "1.4.0", "3.45.0", None);
        assert_eq!(
            warnings,
            vec![CompatibilityWarning::EngineMajorMismatch {
                archive: 2,
                current: 1
            }]
        );
    }

    #[test]
    fn test_newer_engine_and_platforms() {
        let m = manifest("1.5.0", "3.46.0", Some("6.5"));
        let warnings = check(&m, "1.4.0", "3.45.0", Some("6.4.2"));
        assert_eq!(warnings.len(), 3);
        assert!(matches!(warnings[0], CompatibilityWarning::NewerEngine { .. }));
        assert!(matches!(
            warnings[1],
            CompatibilityWarning::NewerStorePlatform { .. }
        ));
        assert!(matches!(
            warnings[2],
            CompatibilityWarning::NewerSitePlatform { .. }
        ));
    }

    #[test]
    fn test_unparsable_version_is_a_warning() {
        let m = manifest("0.1.0", "unknown", None);
        let warnings = check(&m, "0.1.0", "3.45.0", None);
        assert_eq!(
            warnings,
            vec![CompatibilityWarning::UnparsableVersion {
                field: "store platform".to_string(),
                value: "unknown".to_string()
            }]
        );
        assert!(warnings[0].to_string().contains("unknown"));
    }

    #[test]
    fn test_missing_site_version_is_skipped() {
        let m = manifest("0.1.0", "3.45.0", Some("9.0"));
        assert!(check(&m, "0.1.0", "3.45.0", None).is_empty());
    }

    #[test]
    fn test_warning_serializes_with_kind_tag() {
        let json = serde_json::to_string(&CompatibilityWarning::NewerEngine {
            archive: "2.0.0".to_string(),
            current: "1.0.0".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"newer_engine\""));
    }
}

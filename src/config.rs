use std::env;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::options::PaginateOptions;

/// Host-level pager configuration.
///
/// Becomes the schema-level default options of a [`Paginator`](crate::Paginator)
/// plus the minimum server version required by paginated aggregations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PagerConfig {
    pub default_limit: Option<u64>,
    pub max_limit: Option<u64>,
    pub lean: Option<bool>,
    /// `major.minor`; the first release with a `$count` stage by default.
    pub min_server_version: String,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            default_limit: None,
            max_limit: None,
            lean: None,
            min_server_version: "3.4".to_string(),
        }
    }
}

impl PagerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Read `DOCPAGER_DEFAULT_LIMIT`, `DOCPAGER_MAX_LIMIT`, `DOCPAGER_LEAN`
    /// and `DOCPAGER_MIN_SERVER_VERSION`, keeping defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map_err(|e| Error::Config(format!("{key}: {e}")))
                })
                .transpose()
        };
        let mut config = Self {
            default_limit: number("DOCPAGER_DEFAULT_LIMIT")?,
            max_limit: number("DOCPAGER_MAX_LIMIT")?,
            lean: lookup("DOCPAGER_LEAN")
                .map(|v| match v.trim() {
                    "1" | "true" => Ok(true),
                    "0" | "false" => Ok(false),
                    other => Err(Error::Config(format!("DOCPAGER_LEAN: invalid bool '{other}'"))),
                })
                .transpose()?,
            ..Self::default()
        };
        if let Some(version) = lookup("DOCPAGER_MIN_SERVER_VERSION") {
            config.min_server_version = version.trim().to_string();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        parse_major_minor(&self.min_server_version).ok_or_else(|| {
            Error::Config(format!(
                "min_server_version must look like 'major.minor', got '{}'",
                self.min_server_version
            ))
        })?;
        Ok(())
    }

    pub fn default_options(&self) -> PaginateOptions {
        PaginateOptions {
            limit: self.default_limit.map(crate::options::Limit::Fixed),
            max_limit: self.max_limit,
            lean: self.lean,
            ..PaginateOptions::default()
        }
    }

    /// Whether a server reporting `version` can run paginated aggregations.
    pub fn supports_server(&self, version: &str) -> bool {
        match (
            parse_major_minor(version),
            parse_major_minor(&self.min_server_version),
        ) {
            (Some(actual), Some(required)) => actual >= required,
            _ => false,
        }
    }
}

static MAJOR_MINOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*v?(\d+)\.(\d+)").expect("valid version pattern"));

/// Leading `major.minor` of a version string such as `"3.4.10-rc0"`.
fn parse_major_minor(version: &str) -> Option<(u64, u64)> {
    let caps = MAJOR_MINOR.captures(version)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let config = PagerConfig::default();
        assert_eq!(config.min_server_version, "3.4");
        assert!(config.default_options().limit.is_none());
    }

    #[test]
    fn version_support() {
        let config = PagerConfig::default();
        assert!(config.supports_server("3.4.0"));
        assert!(config.supports_server("3.6.2"));
        assert!(config.supports_server("4.0.1"));
        assert!(!config.supports_server("3.2.11"));
        assert!(!config.supports_server("2.6"));
        assert!(!config.supports_server("unknown"));
    }

    #[test]
    fn version_prefixes_and_suffixes() {
        assert_eq!(parse_major_minor("v3.6.0-rc1"), Some((3, 6)));
        assert_eq!(parse_major_minor(" 10.2"), Some((10, 2)));
        assert_eq!(parse_major_minor("3"), None);
        let config = PagerConfig::default();
        assert!((0..3).all(|_| config.supports_server("3.4.1")));
    }

    #[test]
    fn from_json_camel_case() {
        let config =
            PagerConfig::from_json(r#"{"defaultLimit": 10, "maxLimit": 50, "minServerVersion": "3.6"}"#)
                .unwrap();
        assert_eq!(config.default_limit, Some(10));
        assert_eq!(config.max_limit, Some(50));
        assert!(!config.supports_server("3.4.1"));
        let options = config.default_options();
        assert_eq!(options.max_limit, Some(50));
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"lean": false}}"#).unwrap();
        let config = PagerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.lean, Some(false));
    }

    #[test]
    fn bad_version_rejected() {
        let err = PagerConfig::from_json(r#"{"minServerVersion": "latest"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn from_lookup_reads_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DOCPAGER_DEFAULT_LIMIT", "25"),
            ("DOCPAGER_LEAN", "false"),
            ("DOCPAGER_MIN_SERVER_VERSION", "4.0"),
        ]);
        let config = PagerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.default_limit, Some(25));
        assert_eq!(config.max_limit, None);
        assert_eq!(config.lean, Some(false));
        assert_eq!(config.min_server_version, "4.0");
    }

    #[test]
    fn from_lookup_rejects_garbage() {
        let err = PagerConfig::from_lookup(|k| (k == "DOCPAGER_MAX_LIMIT").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

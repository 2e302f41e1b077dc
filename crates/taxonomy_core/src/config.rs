//! Environment-driven runtime configuration.
//!
//! | variable                        | default          |
//! |---------------------------------|------------------|
//! | `TAXONOMY_DB_PATH`              | in-memory        |
//! | `TAXONOMY_LOG_LEVEL`            | build default    |
//! | `TAXONOMY_LOG_DIR`              | file logging off |
//! | `TAXONOMY_SEARCH_DEFAULT_LIMIT` | 20               |
//! | `TAXONOMY_SEARCH_MAX_LIMIT`     | 100              |
//! | `TAXONOMY_DEFAULT_MAX_DEPTH`    | 5                |

use crate::logging::{default_log_level, normalize_level};
use crate::search::{DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};
use crate::service::namespace_service::DEFAULT_MAX_DEPTH;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_DB_PATH: &str = "TAXONOMY_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "TAXONOMY_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "TAXONOMY_LOG_DIR";
pub const ENV_SEARCH_DEFAULT_LIMIT: &str = "TAXONOMY_SEARCH_DEFAULT_LIMIT";
pub const ENV_SEARCH_MAX_LIMIT: &str = "TAXONOMY_SEARCH_MAX_LIMIT";
pub const ENV_DEFAULT_MAX_DEPTH: &str = "TAXONOMY_DEFAULT_MAX_DEPTH";

/// Upper bound accepted for `TAXONOMY_DEFAULT_MAX_DEPTH`.
const MAX_CONFIGURABLE_DEPTH: u32 = 64;

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// `None` opens an in-memory database.
    pub db_path: Option<PathBuf>,
    pub log_level: String,
    /// `None` disables file logging.
    pub log_dir: Option<PathBuf>,
    pub search_default_limit: u32,
    pub search_max_limit: u32,
    pub default_max_depth: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
            search_default_limit: DEFAULT_SEARCH_LIMIT,
            search_max_limit: MAX_SEARCH_LIMIT,
            default_max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidNumber { key: &'static str, value: String },
    OutOfRange {
        key: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    InvalidLogLevel(String),
    /// Default search limit is larger than the max limit.
    LimitOrder { default_limit: u32, max_limit: u32 },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNumber { key, value } => {
                write!(f, "{key} must be an unsigned integer, got `{value}`")
            }
            Self::OutOfRange {
                key,
                value,
                min,
                max,
            } => write!(f, "{key}={value} is outside {min}..={max}"),
            Self::InvalidLogLevel(level) => write!(f, "unsupported log level `{level}`"),
            Self::LimitOrder {
                default_limit,
                max_limit,
            } => write!(
                f,
                "default search limit {default_limit} exceeds max search limit {max_limit}"
            ),
        }
    }
}

impl Error for ConfigError {}

impl CoreConfig {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let log_level = match read(ENV_LOG_LEVEL) {
            Some(level) => normalize_level(&level)
                .map_err(|_| ConfigError::InvalidLogLevel(level.clone()))?
                .to_string(),
            None => defaults.log_level,
        };

        let search_max_limit = parse_bounded(
            ENV_SEARCH_MAX_LIMIT,
            read(ENV_SEARCH_MAX_LIMIT),
            defaults.search_max_limit,
            1,
            MAX_SEARCH_LIMIT,
        )?;
        let search_default_limit = parse_bounded(
            ENV_SEARCH_DEFAULT_LIMIT,
            read(ENV_SEARCH_DEFAULT_LIMIT),
            defaults.search_default_limit.min(search_max_limit),
            1,
            MAX_SEARCH_LIMIT,
        )?;
        if search_default_limit > search_max_limit {
            return Err(ConfigError::LimitOrder {
                default_limit: search_default_limit,
                max_limit: search_max_limit,
            });
        }

        Ok(Self {
            db_path: read(ENV_DB_PATH).map(PathBuf::from),
            log_level,
            log_dir: read(ENV_LOG_DIR).map(PathBuf::from),
            search_default_limit,
            search_max_limit,
            default_max_depth: parse_bounded(
                ENV_DEFAULT_MAX_DEPTH,
                read(ENV_DEFAULT_MAX_DEPTH),
                defaults.default_max_depth,
                0,
                MAX_CONFIGURABLE_DEPTH,
            )?,
        })
    }
}

fn parse_bounded(
    key: &'static str,
    raw: Option<String>,
    default: u32,
    min: u32,
    max: u32,
) -> Result<u32, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value = raw
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidNumber { key, value: raw })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::OutOfRange {
            key,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn config_from(pairs: &[(&str, &str)]) -> Result<CoreConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        CoreConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.search_default_limit, 20);
        assert_eq!(config.search_max_limit, 100);
        assert_eq!(config.default_max_depth, 5);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = config_from(&[
            ("TAXONOMY_DB_PATH", "/var/lib/taxonomy.db"),
            ("TAXONOMY_LOG_LEVEL", "WARNING"),
            ("TAXONOMY_LOG_DIR", "/var/log/taxonomy"),
            ("TAXONOMY_SEARCH_DEFAULT_LIMIT", "10"),
            ("TAXONOMY_SEARCH_MAX_LIMIT", "50"),
            ("TAXONOMY_DEFAULT_MAX_DEPTH", "3"),
        ])
        .unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("/var/lib/taxonomy.db")));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/taxonomy")));
        assert_eq!(config.search_default_limit, 10);
        assert_eq!(config.search_max_limit, 50);
        assert_eq!(config.default_max_depth, 3);
    }

    #[test]
    fn lowering_max_limit_pulls_default_down() {
        let config = config_from(&[("TAXONOMY_SEARCH_MAX_LIMIT", "5")]).unwrap();
        assert_eq!(config.search_default_limit, 5);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config_from(&[("TAXONOMY_SEARCH_MAX_LIMIT", "many")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            config_from(&[("TAXONOMY_SEARCH_MAX_LIMIT", "500")]),
            Err(ConfigError::OutOfRange { value: 500, .. })
        ));
        assert_eq!(
            config_from(&[
                ("TAXONOMY_SEARCH_DEFAULT_LIMIT", "30"),
                ("TAXONOMY_SEARCH_MAX_LIMIT", "10"),
            ]),
            Err(ConfigError::LimitOrder {
                default_limit: 30,
                max_limit: 10,
            })
        );
        assert_eq!(
            config_from(&[("TAXONOMY_LOG_LEVEL", "loud")]),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
    }
}

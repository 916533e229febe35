//! Configuration for the telemetry store.
//!
//! [`MetadataConfig`] holds the typed settings; [`MetadataConfig::from_properties`]
//! builds one from the flat `metadata.*` option surface:
//!
//! | key | value |
//! |---|---|
//! | `metadata.ttl` | global TTL, seconds |
//! | `metadata.<Type>.enabled` | bool |
//! | `metadata.<Type>.ttl` | per-type TTL, seconds |
//! | `metadata.<Type>.export.enabled` | bool, selects the streaming mode |
//! | `metadata.export.path` | export directory |
//! | `metadata.export.postfix` | export file-name postfix |
//! | `metadata.export.chunk.size` | bulk export page size |
//! | `metadata.export.cache.size` | streaming cache size |
//! | `metadata.poll.millis` | writer poll interval |
//! | `metadata.sweep.seconds` | registry sweep interval |

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::error::{StoreError, StoreResult};

const PREFIX: &str = "metadata.";

/// Store settings for one record type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeConfig {
    /// Whether records of this type are stored at all.
    pub enabled: bool,
    /// Inactivity TTL. `None` falls back to [`MetadataConfig::default_ttl`].
    pub ttl: Option<Duration>,
    /// Stream records to a compressed export file instead of indexing them.
    pub export_enabled: bool,
}

impl TypeConfig {
    /// An enabled, indexed store with the global TTL.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// An enabled store in streaming mode.
    #[must_use]
    pub fn streaming() -> Self {
        Self {
            enabled: true,
            export_enabled: true,
            ..Self::default()
        }
    }

    /// Overrides the TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Export settings shared by bulk export and the streaming mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    /// Directory export files are written to. Created on demand.
    pub path: PathBuf,
    /// Optional postfix appended to export file names.
    pub postfix: Option<String>,
    /// Page size used while draining a store during bulk export.
    pub chunk_size: u32,
    /// Number of recent records a streaming store keeps for reads.
    pub cache_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("metadata"),
            postfix: None,
            chunk_size: 1000,
            cache_size: 1000,
        }
    }
}

/// Top-level telemetry store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataConfig {
    /// TTL applied to types that do not set their own.
    pub default_ttl: Duration,
    /// How long a writer blocks on its queue before re-checking TTL and stop.
    pub poll_interval: Duration,
    /// Interval of the registry's idle-session sweep.
    pub sweep_interval: Duration,
    /// Per-type settings keyed by `TYPE_NAME`. Missing types are disabled.
    pub types: HashMap<String, TypeConfig>,
    /// Export settings.
    pub export: ExportConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(600),
            poll_interval: Duration::from_millis(250),
            sweep_interval: Duration::from_secs(60),
            types: HashMap::new(),
            export: ExportConfig::default(),
        }
    }
}

impl MetadataConfig {
    /// Adds or replaces the settings for one record type.
    #[must_use]
    pub fn with_type(mut self, record_type: impl Into<String>, config: TypeConfig) -> Self {
        self.types.insert(record_type.into(), config);
        self
    }

    /// Settings for `record_type`, disabled if it was never configured.
    #[must_use]
    pub fn type_config(&self, record_type: &str) -> TypeConfig {
        self.types.get(record_type).cloned().unwrap_or_default()
    }

    /// Effective TTL for `record_type`.
    #[must_use]
    pub fn ttl_for(&self, record_type: &str) -> Duration {
        self.types
            .get(record_type)
            .and_then(|t| t.ttl)
            .unwrap_or(self.default_ttl)
    }

    /// Builds a configuration from `metadata.*` key/value pairs.
    ///
    /// Keys without the `metadata.` prefix are ignored so the caller can pass
    /// its whole property set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for malformed values, unknown per-type
    /// options, or settings that fail [`validate()`](Self::validate).
    pub fn from_properties<I, K, V>(properties: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in properties {
            let key = key.as_ref();
            let value = value.as_ref().trim();
            let Some(option) = key.strip_prefix(PREFIX) else {
                continue;
            };

            match option {
                "ttl" => config.default_ttl = Duration::from_secs(parse(key, value)?),
                "poll.millis" => config.poll_interval = Duration::from_millis(parse(key, value)?),
                "sweep.seconds" => {
                    config.sweep_interval = Duration::from_secs(parse(key, value)?);
                }
                "export.path" => config.export.path = PathBuf::from(value),
                "export.postfix" => {
                    config.export.postfix = (!value.is_empty()).then(|| value.to_string());
                }
                "export.chunk.size" => config.export.chunk_size = parse(key, value)?,
                "export.cache.size" => config.export.cache_size = parse(key, value)?,
                other if other.starts_with("export.") => {
                    debug!(key, "ignoring unknown export option");
                }
                other => {
                    let Some((record_type, setting)) = other.split_once('.') else {
                        debug!(key, "ignoring unknown metadata option");
                        continue;
                    };
                    let entry = config.types.entry(record_type.to_string()).or_default();
                    match setting {
                        "enabled" => entry.enabled = parse(key, value)?,
                        "ttl" => entry.ttl = Some(Duration::from_secs(parse(key, value)?)),
                        "export.enabled" => entry.export_enabled = parse(key, value)?,
                        _ => {
                            return Err(StoreError::config(key, "unknown per-type option"));
                        }
                    }
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks settings that would make the store unusable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] naming the offending option.
    pub fn validate(&self) -> StoreResult<()> {
        if self.poll_interval.is_zero() {
            return Err(StoreError::config("metadata.poll.millis", "must be > 0"));
        }
        if self.sweep_interval.is_zero() {
            return Err(StoreError::config("metadata.sweep.seconds", "must be > 0"));
        }
        if self.export.chunk_size == 0 {
            return Err(StoreError::config("metadata.export.chunk.size", "must be > 0"));
        }
        if self.export.cache_size == 0 {
            return Err(StoreError::config("metadata.export.cache.size", "must be > 0"));
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::config(key, format!("cannot parse {value:?}: {e}")))
}

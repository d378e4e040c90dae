//! Serializable run configuration (TOML).
//!
//! ```toml
//! [universe]
//! limit_up_table = "data/limit_up.csv"
//! lookback_days = 7
//!
//! [[sources]]
//! name = "otc"
//! path = "data/OTCQuote.{date}"
//! encoding = "delimited"
//!
//! [output]
//! root = "output"
//!
//! [run]
//! max_decode_errors = 100
//! concurrent = true
//! ```

use chrono::NaiveDate;
use quotelab_core::decode::WireEncoding;
use quotelab_core::store::date_key;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Placeholder expanded to `YYYYMMDD` in source path templates.
pub const DATE_PLACEHOLDER: &str = "{date}";

pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("failed to serialize config: {0}")]
    Serialize(String),

    #[error("no sources configured")]
    NoSources,

    #[error("source '{0}' is declared more than once")]
    DuplicateSource(String),

    #[error("source '{name}' path template '{template}' has no {{date}} placeholder")]
    MissingPlaceholder { name: String, template: String },

    #[error("thread count must be at least 1")]
    ZeroThreads,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub universe: UniverseConfig,
    pub sources: Vec<SourceSpec>,
    pub output: OutputConfig,
    #[serde(default)]
    pub run: RunOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// CSV or Parquet limit-up reference table.
    pub limit_up_table: PathBuf,
    /// How far back to look for the previous listed date when none is given.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

fn default_lookback_days() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

/// One raw feed source, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    /// Path template containing `{date}`.
    pub path: String,
    #[serde(default)]
    pub encoding: WireEncoding,
}

impl SourceSpec {
    pub fn new(name: &str, path: &str, encoding: WireEncoding) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            encoding,
        }
    }

    /// Concrete source path for `date`.
    pub fn expand(&self, date: NaiveDate) -> PathBuf {
        PathBuf::from(self.path.replace(DATE_PLACEHOLDER, &date_key(date)))
    }

    /// Inverse of [`expand`](Self::expand) on a file name: the date a file
    /// named like this template belongs to, if any.
    pub fn match_file_name(&self, file_name: &str) -> Option<NaiveDate> {
        let template = Path::new(&self.path).file_name()?.to_str()?;
        let (prefix, suffix) = template.split_once(DATE_PLACEHOLDER)?;
        let key = file_name.strip_prefix(prefix)?.strip_suffix(suffix)?;
        quotelab_core::store::parse_date_key(key)
    }

    /// Directory the template's files live in.
    pub fn directory(&self) -> PathBuf {
        match Path::new(&self.path).parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Total decode errors tolerated before the run fails. `None` = unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_decode_errors: Option<u64>,
    /// Scan sources in parallel.
    #[serde(default = "default_concurrent")]
    pub concurrent: bool,
    /// Scan thread count; rayon's global pool when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
}

fn default_concurrent() -> bool {
    true
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_decode_errors: None,
            concurrent: true,
            threads: None,
        }
    }
}

impl RunConfig {
    /// OTC and TSE delimited dumps under `./data`, output to `./output`.
    pub fn default_layout() -> Self {
        Self {
            universe: UniverseConfig {
                limit_up_table: PathBuf::from("data/limit_up.csv"),
                lookback_days: DEFAULT_LOOKBACK_DAYS,
            },
            sources: vec![
                SourceSpec::new("otc", "data/OTCQuote.{date}", WireEncoding::Delimited),
                SourceSpec::new("tse", "data/TSEQuote.{date}", WireEncoding::Delimited),
            ],
            output: OutputConfig {
                root: PathBuf::from("output"),
            },
            run: RunOptions::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        for (i, source) in self.sources.iter().enumerate() {
            if self.sources[..i].iter().any(|s| s.name == source.name) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
            if !source.path.contains(DATE_PLACEHOLDER) {
                return Err(ConfigError::MissingPlaceholder {
                    name: source.name.clone(),
                    template: source.path.clone(),
                });
            }
        }
        if self.run.threads == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 19).unwrap()
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
            [universe]
            limit_up_table = "ref/limit_up.parquet"

            [[sources]]
            name = "otc"
            path = "raw/OTCQuote.{date}"

            [[sources]]
            name = "tse"
            path = "raw/TSEQuote.{date}.jsonl"
            encoding = "structured"

            [output]
            root = "out"

            [run]
            max_decode_errors = 10
            concurrent = false
        "#;
        let config = RunConfig::from_toml(toml).unwrap();
        assert_eq!(config.universe.lookback_days, 7);
        assert_eq!(config.sources[0].encoding, WireEncoding::Delimited);
        assert_eq!(config.sources[1].encoding, WireEncoding::Structured);
        assert_eq!(config.run.max_decode_errors, Some(10));
        assert!(!config.run.concurrent);
        assert_eq!(
            config.sources[1].expand(date()),
            PathBuf::from("raw/TSEQuote.20251119.jsonl")
        );
    }

    #[test]
    fn run_section_is_optional() {
        let toml = r#"
            [universe]
            limit_up_table = "a.csv"
            [[sources]]
            name = "otc"
            path = "OTCQuote.{date}"
            [output]
            root = "out"
        "#;
        let config = RunConfig::from_toml(toml).unwrap();
        assert_eq!(config.run, RunOptions::default());
        assert_eq!(config.run.max_decode_errors, None);
    }

    #[test]
    fn default_layout_roundtrips() {
        let config = RunConfig::default_layout();
        let parsed = RunConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(
            config.sources[0].expand(date()),
            PathBuf::from("data/OTCQuote.20251119")
        );
    }

    #[test]
    fn validation_errors() {
        let mut config = RunConfig::default_layout();
        config.sources[1].name = "otc".into();
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateSource(_))));

        let mut config = RunConfig::default_layout();
        config.sources[0].path = "data/OTCQuote".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingPlaceholder { .. })
        ));

        let mut config = RunConfig::default_layout();
        config.sources.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoSources)));

        let mut config = RunConfig::default_layout();
        config.run.threads = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroThreads)));
    }

    #[test]
    fn file_names_match_templates() {
        let spec = SourceSpec::new("tse", "data/TSEQuote.{date}", WireEncoding::Delimited);
        assert_eq!(spec.match_file_name("TSEQuote.20251119"), Some(date()));
        assert_eq!(spec.match_file_name("OTCQuote.20251119"), None);
        assert_eq!(spec.match_file_name("TSEQuote.2025111"), None);
        assert_eq!(spec.directory(), PathBuf::from("data"));

        let bare = SourceSpec::new("x", "{date}.jsonl", WireEncoding::Structured);
        assert_eq!(bare.match_file_name("20251119.jsonl"), Some(date()));
        assert_eq!(bare.directory(), PathBuf::from("."));
    }
}

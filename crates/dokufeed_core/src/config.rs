use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILENAME: &str = "dokufeed.toml";
pub const DEFAULT_OUTPUT_DIR: &str = "out";
pub const DEFAULT_PAGES_PER_FILE: usize = 20;
pub const DEFAULT_CATEGORY_DELIMITER: &str = ":";

pub const OUTPUT_DIR_ENV: &str = "DOKUFEED_OUTPUT_DIR";
pub const PAGES_PER_FILE_ENV: &str = "DOKUFEED_PAGES_PER_FILE";
pub const URL_PREFIX_ENV: &str = "DOKUFEED_URL_PREFIX";
pub const SALT_ENV: &str = "DOKUFEED_SALT";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    #[serde(default)]
    pub export: ExportSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExportSection {
    pub output_dir: Option<String>,
    pub pages_per_file: Option<usize>,
    pub page_url_prefix: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub category_delimiter: Option<String>,
    pub category_prefix: Option<String>,
    pub usergroup_salt: Option<String>,
}

/// CLI-provided values. Anything set here beats both the environment and
/// the config file.
#[derive(Debug, Clone, Default)]
pub struct ExportOverrides {
    pub output_dir: Option<PathBuf>,
    pub pages_per_file: Option<usize>,
    pub page_url_prefix: Option<String>,
    pub exclude: Vec<String>,
    pub category_delimiter: Option<String>,
    pub category_prefix: Option<String>,
    pub usergroup_salt: Option<String>,
}

/// Fully resolved export settings, ready for the batch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub pages_per_file: usize,
    pub page_url_prefix: String,
    pub exclude: Vec<String>,
    pub category_delimiter: String,
    pub category_prefix: String,
    pub usergroup_salt: String,
}

impl FeedConfig {
    /// Reads the config file; a missing file is an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Resolves the final export settings: flag > env > config file >
    /// built-in default.
    pub fn resolve(&self, overrides: &ExportOverrides) -> Result<ExportConfig> {
        let output_dir = overrides
            .output_dir
            .clone()
            .or_else(|| env_value(OUTPUT_DIR_ENV).map(PathBuf::from))
            .or_else(|| self.export.output_dir.clone().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let pages_per_file = match overrides.pages_per_file {
            Some(value) => value,
            None => match env_value(PAGES_PER_FILE_ENV) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid {PAGES_PER_FILE_ENV} value `{raw}`"))?,
                None => self
                    .export
                    .pages_per_file
                    .unwrap_or(DEFAULT_PAGES_PER_FILE),
            },
        };
        if pages_per_file == 0 {
            bail!("pages_per_file must be at least 1");
        }

        let page_url_prefix = overrides
            .page_url_prefix
            .clone()
            .or_else(|| env_value(URL_PREFIX_ENV))
            .or_else(|| self.export.page_url_prefix.clone())
            .unwrap_or_default();

        let exclude = if overrides.exclude.is_empty() {
            self.export.exclude.clone()
        } else {
            overrides.exclude.clone()
        };

        let category_delimiter = overrides
            .category_delimiter
            .clone()
            .or_else(|| self.export.category_delimiter.clone())
            .unwrap_or_else(|| DEFAULT_CATEGORY_DELIMITER.to_string());

        let category_prefix = overrides
            .category_prefix
            .clone()
            .or_else(|| self.export.category_prefix.clone())
            .unwrap_or_default();

        let usergroup_salt = overrides
            .usergroup_salt
            .clone()
            .or_else(|| env_value(SALT_ENV))
            .or_else(|| self.export.usergroup_salt.clone())
            .unwrap_or_default();

        Ok(ExportConfig {
            output_dir,
            pages_per_file,
            page_url_prefix,
            exclude,
            category_delimiter,
            category_prefix,
            usergroup_salt,
        })
    }
}

fn env_value(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

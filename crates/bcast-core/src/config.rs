use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("config validation failed: {0:?}")]
    Validation(Vec<crate::validation::ValidationIssue>),
}

/// The top-level broadcast configuration: an ordered list of groups sharing
/// a run identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    pub name: String,
    pub id: String,
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    /// Unset (`None`) defaults to enabled.
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    pub source: SourceConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub defaults: GroupDefaults,
}

impl Group {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub repo: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GroupDefaults {
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_branch_prefix() -> String {
    "sync".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub files: Vec<FileMapping>,
    #[serde(default)]
    pub directories: Vec<DirectoryMapping>,
    #[serde(default)]
    pub transform: Transform,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMapping {
    pub src: String,
    pub dest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectoryMapping {
    pub src: String,
    pub dest: String,
    #[serde(default)]
    pub preserve_structure: Option<bool>,
    #[serde(default)]
    pub include_hidden: Option<bool>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub include_only: Vec<String>,
    #[serde(default)]
    pub transform: Option<Transform>,
}

impl DirectoryMapping {
    pub fn preserve_structure(&self) -> bool {
        self.preserve_structure.unwrap_or(true)
    }

    pub fn include_hidden(&self) -> bool {
        self.include_hidden.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Transform {
    #[serde(default)]
    pub repo_name: bool,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// Parse a `Config` from TOML text without touching the filesystem.
pub fn parse_config(text: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(text)
}

/// Load and parse a `Config` from disk.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load, then validate, a `Config` from disk.
pub fn load_and_validate_config(path: &Path) -> Result<Config, ConfigError> {
    use crate::validation::{Validate, ValidationLevel};

    let config = load_config(path)?;
    let issues: Vec<_> = config
        .validate()
        .into_iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .collect();
    if !issues.is_empty() {
        return Err(ConfigError::Validation(issues));
    }
    Ok(config)
}

pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize { source })?;
    std::fs::write(path, text).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

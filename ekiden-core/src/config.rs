//! Runner host configuration
//!
//! Defines the parameters of one runner host: the GitHub coordinator
//! connection, guest credentials, the VM image to run and loop options.
//!
//! Configuration is read from YAML, secrets may be overridden from the
//! environment, and `validate` reports every problem at once so a broken
//! file can be fixed in one pass.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Annotated example configuration
const SAMPLE_CONFIG: &str = include_str!("../ekiden.example.yaml");

/// File name looked up in the default search locations
const CONFIG_FILE_NAME: &str = "ekiden.yaml";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for this schema
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// One or more required settings are missing or malformed
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// A credential that never shows up in `Debug` output
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw secret value
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("\"***\"")
        }
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Full runner host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github: GitHubConfig,
    pub vm: VmConfig,
    pub registry: RegistryConfig,
    pub options: OptionsConfig,
}

/// GitHub API and runner registration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Token used to request registration tokens
    pub api_token: Secret,

    /// Registration token endpoint (organization or repository scoped)
    pub registration_endpoint: String,

    /// URL the runner inside the VM registers against
    pub runner_url: String,

    /// Base name for runner registrations and VM instances
    pub runner_name: String,

    /// Labels attached to every registered runner
    pub runner_labels: Vec<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_token: Secret::default(),
            registration_endpoint: String::new(),
            runner_url: String::new(),
            runner_name: "runner".to_string(),
            runner_labels: vec!["self-hosted".to_string(), "arm64".to_string()],
        }
    }
}

/// Guest login used for remote sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub username: String,
    pub password: Secret,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: Secret::new("admin"),
        }
    }
}

/// OCI registry holding the base image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry host and namespace (e.g. "ghcr.io/org"); empty for local-only images
    pub url: String,

    /// Image name, with or without the registry prefix
    pub image_name: String,

    pub username: String,
    pub password: Secret,
}

impl RegistryConfig {
    /// Whether a registry login should be performed before pulling
    pub fn has_credentials(&self) -> bool {
        !self.url.is_empty() && !self.username.is_empty()
    }
}

/// Runtime options of the runner loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    /// Size the cached disk is grown to after a pull (e.g. "100G"); empty disables
    pub truncate_size: String,

    /// Presence of this file drains the loop; empty disables the check
    pub shutdown_flag_file: PathBuf,

    /// Maximum number of VMs alive at the same time
    pub max_concurrent_runners: usize,

    /// Remove previously cached images before pulling
    pub prune_cache_before_pull: bool,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            truncate_size: String::new(),
            shutdown_flag_file: PathBuf::from(".shutdown"),
            max_concurrent_runners: 1,
            prune_cache_before_pull: false,
        }
    }
}

impl OptionsConfig {
    /// Disk resize target, if one is configured
    pub fn truncate_size(&self) -> Option<&str> {
        let size = self.truncate_size.trim();
        (!size.is_empty()).then_some(size)
    }

    /// Shutdown flag path, if the check is enabled
    pub fn shutdown_flag(&self) -> Option<&Path> {
        (!self.shutdown_flag_file.as_os_str().is_empty()).then_some(&self.shutdown_flag_file)
    }
}

impl Config {
    /// Loads configuration from a file
    ///
    /// With an explicit `path` that file must exist. Without one, the default
    /// locations are searched in order and built-in defaults are used when no
    /// file is found. Secret overrides from the environment are applied last.
    ///
    /// # Arguments
    /// * `path` - Optional explicit config file path
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::search_paths().into_iter().find(|p| p.is_file()) {
                Some(found) => Self::from_file(&found)?,
                None => Self::default(),
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads and parses a single YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses configuration from a YAML document
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, not to an empty mapping
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// The annotated example configuration
    pub fn sample() -> &'static str {
        SAMPLE_CONFIG
    }

    /// Default search locations, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".ekiden").join(CONFIG_FILE_NAME));
        }
        paths.push(PathBuf::from("/etc/ekiden").join(CONFIG_FILE_NAME));
        paths
    }

    /// Applies secret overrides
    ///
    /// Recognised keys:
    /// - EKIDEN_GITHUB_API_TOKEN
    /// - EKIDEN_VM_PASSWORD
    /// - EKIDEN_REGISTRY_PASSWORD
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("EKIDEN_GITHUB_API_TOKEN") {
            self.github.api_token = Secret::new(token);
        }
        if let Some(password) = lookup("EKIDEN_VM_PASSWORD") {
            self.vm.password = Secret::new(password);
        }
        if let Some(password) = lookup("EKIDEN_REGISTRY_PASSWORD") {
            self.registry.password = Secret::new(password);
        }
    }

    /// Validates the configuration
    ///
    /// Every problem is reported, not just the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.github.api_token.is_empty() {
            errors.push("github.api_token is required".to_string());
        }

        let endpoint = &self.github.registration_endpoint;
        if endpoint.is_empty() {
            errors.push("github.registration_endpoint is required".to_string());
        } else if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            errors.push("github.registration_endpoint must be a valid URL".to_string());
        }

        if self.github.runner_url.is_empty() {
            errors.push("github.runner_url is required".to_string());
        }

        if self.registry.image_name.is_empty() {
            errors.push("registry.image_name is required".to_string());
        }

        if self.vm.username.is_empty() {
            errors.push("vm.username is required".to_string());
        }
        if self.vm.password.is_empty() {
            errors.push("vm.password is required".to_string());
        }

        if self.options.max_concurrent_runners == 0 {
            errors.push("options.max_concurrent_runners must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

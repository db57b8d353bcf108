use crate::error::{DirectiveError, Result};
use crate::paths;
use crate::types::ValidationWarning;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// File names of the four stores, relative to `.directive/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_rule_store")]
    pub rules: String,
    #[serde(default = "default_project_store")]
    pub project: String,
    #[serde(default = "default_preference_store")]
    pub preferences: String,
    #[serde(default = "default_extension_store")]
    pub extensions: String,
}

fn default_rule_store() -> String {
    paths::DEFAULT_RULE_STORE.to_string()
}

fn default_project_store() -> String {
    paths::DEFAULT_PROJECT_STORE.to_string()
}

fn default_preference_store() -> String {
    paths::DEFAULT_PREFERENCE_STORE.to_string()
}

fn default_extension_store() -> String {
    paths::DEFAULT_EXTENSION_STORE.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            rules: default_rule_store(),
            project: default_project_store(),
            preferences: default_preference_store(),
            extensions: default_extension_store(),
        }
    }
}

// ---------------------------------------------------------------------------
// PreferenceConfig
// ---------------------------------------------------------------------------

/// The preference store is opt-in. While `enabled` is false the store file is
/// never opened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Record an instrumentation event per rule run and tool call.
    #[serde(default)]
    pub tracking: bool,
}

// ---------------------------------------------------------------------------
// InvokerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Optional-action failures tolerated within one rule run before the run
    /// is aborted like a required failure.
    #[serde(default = "default_max_optional_failures")]
    pub max_optional_failures: usize,
}

fn default_max_optional_failures() -> usize {
    1
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            max_optional_failures: default_max_optional_failures(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub stores: StoreConfig,
    #[serde(default)]
    pub preferences: PreferenceConfig,
    #[serde(default)]
    pub invoker: InvokerConfig,
}

fn default_version() -> u32 {
    1
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            branch: default_branch(),
            stores: StoreConfig::default(),
            preferences: PreferenceConfig::default(),
            invoker: InvokerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Self::default()
        }
    }

    // ---------------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------------

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(DirectiveError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let config: EngineConfig = serde_yaml::from_str(&data)?;
        paths::validate_branch(&config.branch)?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // ---------------------------------------------------------------------------
    // Store locations
    // ---------------------------------------------------------------------------

    pub fn rule_store_path(&self, root: &Path) -> PathBuf {
        paths::store_path(root, &self.stores.rules)
    }

    pub fn project_store_path(&self, root: &Path) -> PathBuf {
        paths::store_path(root, &self.stores.project)
    }

    pub fn preference_store_path(&self, root: &Path) -> PathBuf {
        paths::store_path(root, &self.stores.preferences)
    }

    pub fn extension_store_path(&self, root: &Path) -> PathBuf {
        paths::store_path(root, &self.stores.extensions)
    }

    // ---------------------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if paths::validate_branch(&self.branch).is_err() {
            warnings.push(ValidationWarning::error(format!(
                "branch '{}' is not a valid branch name",
                self.branch
            )));
        }

        let files = [
            &self.stores.rules,
            &self.stores.project,
            &self.stores.preferences,
            &self.stores.extensions,
        ];
        let unique: HashSet<&String> = files.iter().copied().collect();
        if unique.len() != files.len() {
            warnings.push(ValidationWarning::error(
                "stores must live in four separate files",
            ));
        }

        if self.preferences.tracking && !self.preferences.enabled {
            warnings.push(ValidationWarning::warning(
                "preferences.tracking has no effect while preferences.enabled is false",
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

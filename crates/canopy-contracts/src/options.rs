//! Compiler options and their TOML representation.
//!
//! Example:
//! ```toml
//! keep_duplicates = false
//! ignore = ["/providers/Microsoft.Authorization/policyDefinitions/34c877ad-507e-4c82-993e-3452a6e0ad3c"]
//! secure_parameters = ["adminPassword"]
//!
//! [settings]
//! AZURE_POLICY_WAIVER_MAX_EXPIRY = 90
//! ```

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, CanopyResult};

/// Module prefix of the `With` selector references.
pub const DEFAULT_SELECTOR_MODULE: &str = "PSRule.Rules.Azure";

fn default_selector_module() -> String {
    DEFAULT_SELECTOR_MODULE.to_string()
}

/// Options consumed by the orchestrator for one compilation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerOptions {
    /// Definition ids to skip. Exact string match.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Retain every assignment-driven variant instead of first-wins.
    #[serde(default)]
    pub keep_duplicates: bool,

    /// Parameter names whose values must never appear in output.
    #[serde(default)]
    pub secure_parameters: Vec<String>,

    /// Module prefix for `With` references.
    #[serde(default = "default_selector_module")]
    pub selector_module: String,

    /// Opaque values passed through to consumers of the context.
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            keep_duplicates: false,
            secure_parameters: Vec::new(),
            selector_module: default_selector_module(),
            settings: BTreeMap::new(),
        }
    }
}

impl CompilerOptions {
    /// Parse `s` as TOML.
    ///
    /// Returns `CanopyError::ConfigError` if the TOML is malformed or does not
    /// match the expected schema.
    pub fn from_toml_str(s: &str) -> CanopyResult<Self> {
        toml::from_str(s).map_err(|e| CanopyError::ConfigError {
            reason: format!("failed to parse options TOML: {}", e),
        })
    }

    /// Read the file at `path` and parse it as TOML options.
    pub fn from_file(path: &Path) -> CanopyResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CanopyError::ConfigError {
            reason: format!("failed to read options file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// True if `definition_id` is on the ignore list.
    pub fn is_ignored(&self, definition_id: &str) -> bool {
        self.ignore.iter().any(|id| id == definition_id)
    }
}

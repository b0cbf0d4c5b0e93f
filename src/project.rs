//! Project description.
//!
//! The project ships a static `runner.json` next to its sources describing
//! the target binary, the extra tools tests may call, where the test corpus
//! lives, and the environment/patches shared by every test.

use crate::commands::{builtin_handlers, target_handler, tool_handler, HandlerMap};
use crate::schema::patch_list;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

pub const PROJECT_FILE: &str = "runner.json";

/// Regex/replacement pairs, written either as a map or as a pair list.
#[derive(Debug, Default, Clone)]
pub struct Patches(pub Vec<(String, String)>);

impl<'de> Deserialize<'de> for Patches {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Patches(patch_list(Some(&value))))
    }
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("failed to read {PROJECT_FILE}: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid {PROJECT_FILE}: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the runner needs to know about the project under test.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectInfo {
    /// Basename of the executable under test.
    pub target: String,

    /// External tools test documents may call as commands.
    #[serde(default)]
    pub allowed: Vec<String>,

    /// Install components staged before the run; empty means a plain
    /// `cmake --install`.
    #[serde(default)]
    pub install_components: Vec<String>,

    /// Root of the test corpus, relative to the project root.
    pub datasets_dir: String,

    /// Subdirectory tried when `--tests` does not resolve directly.
    #[serde(default)]
    pub default_dataset: Option<String>,

    /// Variables injected into every test and canonicalised back into
    /// `$NAME` tokens in captured output.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Patches applied to every test's output before the per-test ones.
    #[serde(default)]
    pub common_patches: Patches,

    /// Runner-environment variables echoed in failure repro lines.
    #[serde(default)]
    pub reportable_vars: Vec<String>,

    /// Command lines run after target staging; each receives the staging
    /// directory as its final argument.
    #[serde(default)]
    pub installer: Vec<Vec<String>>,
}

impl ProjectInfo {
    pub fn load(path: &Path) -> Result<ProjectInfo, ProjectError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The full command registry: built-ins, the allowed tools, and the
    /// target itself.
    pub fn handlers(&self) -> HandlerMap {
        let mut result = builtin_handlers();
        for tool in &self.allowed {
            result.insert(tool.clone(), tool_handler(tool.clone()));
        }
        result.insert(self.target.clone(), target_handler());
        result
    }
}

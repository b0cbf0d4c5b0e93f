//! CMake preset discovery.
//!
//! Reads `CMakePresets.json` (following `include`s) to find the chosen
//! preset's `binaryDir` and `CMAKE_BUILD_TYPE`, resolving both through the
//! `inherits` chains. Also digs the project version out of the top-level
//! `CMakeLists.txt`.

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("invalid presets file {0}: {1}")]
    Json(PathBuf, serde_json::Error),
}

/// One `configurePresets` entry, reduced to the bits the runner needs.
#[derive(Debug, Default, Clone)]
pub struct Preset {
    pub binary_dir: Option<PathBuf>,
    pub build_type: Option<String>,
    pub inherits: Vec<String>,
}

impl Preset {
    fn from(entry: &Value, source_root: &Path) -> Preset {
        let mut result = Preset::default();

        if let Some(binary_dir) = entry.get("binaryDir").and_then(Value::as_str) {
            const SOURCE_DIR: &str = "${sourceDir}/";
            result.binary_dir = Some(match binary_dir.strip_prefix(SOURCE_DIR) {
                Some(relative) => source_root.join(relative),
                None => PathBuf::from(binary_dir),
            });
        }

        match entry.get("inherits") {
            Some(Value::String(single)) => result.inherits.push(single.clone()),
            Some(Value::Array(names)) => {
                for name in names {
                    if let Some(name) = name.as_str() {
                        result.inherits.push(name.to_string());
                    }
                }
            }
            _ => {}
        }

        if let Some(build_type) = entry
            .get("cacheVariables")
            .and_then(|cache| cache.get("CMAKE_BUILD_TYPE"))
            .and_then(Value::as_str)
        {
            result.build_type = Some(build_type.to_string());
        }

        result
    }

    /// Walk the `inherits` chain for a binary dir.
    pub fn get_binary_dir(&self, presets: &BTreeMap<String, Preset>) -> Option<PathBuf> {
        if let Some(dir) = &self.binary_dir {
            return Some(dir.clone());
        }
        self.inherits
            .iter()
            .filter_map(|name| presets.get(name))
            .find_map(|parent| parent.get_binary_dir(presets))
    }

    /// Walk the `inherits` chain for a build type.
    pub fn get_build_type(&self, presets: &BTreeMap<String, Preset>) -> Option<String> {
        if let Some(build_type) = &self.build_type {
            return Some(build_type.clone());
        }
        self.inherits
            .iter()
            .filter_map(|name| presets.get(name))
            .find_map(|parent| parent.get_build_type(presets))
    }
}

fn load_into(
    filename: &Path,
    source_root: &Path,
    out: &mut BTreeMap<String, Preset>,
    seen: &mut HashSet<PathBuf>,
) -> Result<(), PresetError> {
    if !seen.insert(filename.to_path_buf()) {
        return Ok(());
    }

    let text = std::fs::read_to_string(filename)
        .map_err(|err| PresetError::Io(filename.to_path_buf(), err))?;
    let root: Value = serde_json::from_str(&text)
        .map_err(|err| PresetError::Json(filename.to_path_buf(), err))?;

    if let Some(Value::Array(includes)) = root.get("include") {
        for include in includes {
            if let Some(include) = include.as_str() {
                let path = filename.parent().unwrap_or(source_root).join(include);
                load_into(&path, source_root, out, seen)?;
            }
        }
    }

    if let Some(Value::Array(entries)) = root.get("configurePresets") {
        for entry in entries {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            out.insert(name.to_string(), Preset::from(entry, source_root));
        }
    }

    Ok(())
}

/// Load every configure preset reachable from `filename`.
pub fn load_file(filename: &Path) -> Result<BTreeMap<String, Preset>, PresetError> {
    let mut out = BTreeMap::new();
    let mut seen = HashSet::new();
    let source_root = filename.parent().unwrap_or(Path::new(".")).to_path_buf();
    load_into(filename, &source_root, &mut out, &mut seen)?;
    Ok(out)
}

/// Project version from the `project(… VERSION x.y.z …)` clause of a
/// CMakeLists.txt; empty when absent.
pub fn project_version(cmakelists: &Path) -> String {
    let Ok(text) = std::fs::read_to_string(cmakelists) else {
        return String::new();
    };
    let re = Regex::new(r"(?s)project\s*\([^)]*\bVERSION\s+([0-9][0-9.]*)").unwrap();
    re.captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

//! Process-environment block facade.
//!
//! The runner reads the process environment once at startup into an owned
//! map; every child receives an explicitly assembled copy of that map. On
//! Windows the variable names are case-insensitive, which is modelled here by
//! folding keys to upper case.

use std::collections::BTreeMap;
use std::path::Path;

#[cfg(windows)]
pub const PATHSEP: char = ';';
#[cfg(not(windows))]
pub const PATHSEP: char = ':';

/// Snapshot the process environment.
pub fn get_env() -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for (key, value) in std::env::vars() {
        #[cfg(windows)]
        let key = key.to_uppercase();
        result.insert(key, value);
    }
    result
}

fn displayed(dir: &Path) -> String {
    dir.display().to_string()
}

/// Append `dir` to a list-style variable such as `PATH`, creating it when
/// absent.
pub fn append(env: &mut BTreeMap<String, String>, var: &str, dir: &Path) {
    match env.get_mut(var) {
        Some(value) => {
            value.push(PATHSEP);
            value.push_str(&displayed(dir));
        }
        None => {
            env.insert(var.to_string(), displayed(dir));
        }
    }
}

/// Prepend `dir` to a list-style variable such as `PATH`, creating it when
/// absent.
pub fn prepend(env: &mut BTreeMap<String, String>, var: &str, dir: &Path) {
    match env.get_mut(var) {
        Some(value) => {
            let prefix = displayed(dir);
            let mut new_value = String::with_capacity(prefix.len() + 1 + value.len());
            new_value.push_str(&prefix);
            new_value.push(PATHSEP);
            new_value.push_str(value);
            *value = new_value;
        }
        None => {
            env.insert(var.to_string(), displayed(dir));
        }
    }
}

/// Current value of a variable in the runner's own environment.
pub fn getenv(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

//! Test discovery.
//!
//! Walks the chosen dataset directory for `*.json` documents, assigns
//! 1-based ordinals in walk order, and loads each into a [`TestData`].
//! Documents that fail to load are noted and skipped; documents disabled on
//! this platform are dropped without a note.

use crate::schema::TestData;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of walking a test-set directory.
#[derive(Debug, Default)]
pub struct Discovery {
    pub tests: Vec<TestData>,
    /// Every `*.json` seen, whether or not it loaded or matched a filter.
    pub unfiltered_count: usize,
}

/// All `*.json` files under `dir`, sorted for stable ordinals.
fn json_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect()
}

/// Discover and load the test set.
///
/// `run_filter` keeps only the listed ordinals (empty means all). `note` is
/// called once per kept test and once per load failure.
pub fn discover(
    dir: &Path,
    run_filter: &[usize],
    schema: Option<&str>,
    mut note: impl FnMut(usize, &Path, Option<&crate::schema::LoadError>),
) -> Discovery {
    let mut result = Discovery::default();

    for path in json_files(dir) {
        result.unfiltered_count += 1;
        let ordinal = result.unfiltered_count;
        if !run_filter.is_empty() && !run_filter.contains(&ordinal) {
            continue;
        }
        match TestData::load(&path, ordinal, schema) {
            Ok(test) => {
                if !test.not_disabled() {
                    continue;
                }
                note(ordinal, &path, None);
                result.tests.push(test);
            }
            Err(err) => note(ordinal, &path, Some(&err)),
        }
    }

    result
}

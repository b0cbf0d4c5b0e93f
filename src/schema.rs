//! Test-case data model.
//!
//! Every test is one JSON document. The parsed map is retained verbatim so
//! that writing the document back (`--nullify`, `--schema` renovation,
//! save-on-first-run) preserves keys this runner knows nothing about.

use crate::proc::{Capture, StreamDecl};
use crate::shell;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub type CommandLine = Vec<String>;

/// One entry of the per-test `env` map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestVariable {
    /// Erase the variable from the child environment.
    Unset,
    /// Assign after expansion.
    Value(String),
    /// Append each expanded part to a list-style variable.
    PathParts(Vec<String>),
}

/// How much of a captured stream takes part in the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    #[default]
    All,
    Begin,
    End,
}

impl CheckMode {
    pub fn name(self) -> &'static str {
        match self {
            CheckMode::All => "all",
            CheckMode::Begin => "begin",
            CheckMode::End => "end",
        }
    }
}

/// Per-stream check modes; `stdin` is accepted as a historical alias for the
/// stdout entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checks {
    pub output: CheckMode,
    pub error: CheckMode,
}

/// Capture dispositions for the target invocation, from the `output` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutCapture {
    pub output: StreamDecl,
    pub error: StreamDecl,
}

impl Default for OutCapture {
    fn default() -> Self {
        Self {
            output: StreamDecl::Piped,
            error: StreamDecl::Piped,
        }
    }
}

/// The `disabled` key: a plain flag or a platform tag to skip on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disabled {
    Flag(bool),
    Platform(String),
}

impl Default for Disabled {
    fn default() -> Self {
        Disabled::Flag(false)
    }
}

pub fn platform_tag() -> &'static str {
    if cfg!(windows) {
        "win32"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        std::env::consts::OS
    }
}

/// Error type for test-document loading.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed `{0}` key")]
    Malformed(&'static str),
}

/// One loaded test document.
#[derive(Debug, Clone, Default)]
pub struct TestData {
    pub filename: PathBuf,
    pub index: usize,
    /// The parsed document, kept for store-back.
    pub doc: Map<String, Value>,
    pub lang: String,
    pub prepare: Vec<CommandLine>,
    pub call_args: CommandLine,
    pub post: Vec<CommandLine>,
    pub cleanup: Vec<CommandLine>,
    pub expected: Option<Capture>,
    pub linear: bool,
    pub disabled: Disabled,
    pub env: BTreeMap<String, TestVariable>,
    pub patches: Vec<(String, String)>,
    pub check: Checks,
    pub out_capture: OutCapture,
    pub name: String,
}

fn strlist(node: &Value, split_words: bool) -> Option<Vec<String>> {
    match node {
        Value::String(s) => Some(if split_words {
            shell::split(s)
        } else {
            vec![s.clone()]
        }),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

fn text_block(node: &Value) -> Option<String> {
    strlist(node, false).map(|lines| lines.join("\n"))
}

fn expected_capture(node: &Value) -> Result<Option<Capture>, LoadError> {
    if node.is_null() {
        return Ok(None);
    }
    let Value::Array(items) = node else {
        return Err(LoadError::Malformed("expected"));
    };
    if items.len() < 3 {
        return Err(LoadError::Malformed("expected"));
    }
    let return_code = items[0].as_i64().ok_or(LoadError::Malformed("expected"))? as i32;
    let output = text_block(&items[1]).ok_or(LoadError::Malformed("expected"))?;
    let error = text_block(&items[2]).ok_or(LoadError::Malformed("expected"))?;
    Ok(Some(Capture {
        return_code,
        output,
        error,
    }))
}

fn command_set(doc: &Map<String, Value>, key: &'static str) -> Result<Vec<CommandLine>, LoadError> {
    let Some(node) = doc.get(key) else {
        return Ok(Vec::new());
    };
    match node {
        Value::String(line) => Ok(vec![shell::split(line)]),
        Value::Array(lines) => lines
            .iter()
            .map(|line| strlist(line, true).ok_or(LoadError::Malformed(key)))
            .collect(),
        _ => Err(LoadError::Malformed(key)),
    }
}

fn env_variables(doc: &Map<String, Value>) -> BTreeMap<String, TestVariable> {
    let mut result = BTreeMap::new();
    let Some(Value::Object(map)) = doc.get("env") else {
        return result;
    };
    for (key, value) in map {
        let var = match value {
            Value::Null => TestVariable::Unset,
            Value::String(s) => TestVariable::Value(s.clone()),
            Value::Array(items) => TestVariable::PathParts(
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => continue,
        };
        result.insert(key.clone(), var);
    }
    result
}

/// Parse a patch collection: either `{regex: replacement}` or
/// `[[regex, replacement], …]`. Entries of any other shape are skipped.
pub fn patch_list(node: Option<&Value>) -> Vec<(String, String)> {
    let mut result = Vec::new();
    match node {
        Some(Value::Object(map)) => {
            for (key, value) in map {
                if let Some(repl) = value.as_str() {
                    result.push((key.clone(), repl.to_string()));
                }
            }
        }
        Some(Value::Array(rows)) => {
            for row in rows {
                let Value::Array(pair) = row else { continue };
                if pair.len() < 2 {
                    continue;
                }
                if let (Some(expr), Some(repl)) = (pair[0].as_str(), pair[1].as_str()) {
                    result.push((expr.to_string(), repl.to_string()));
                }
            }
        }
        _ => {}
    }
    result
}

fn check_mode(value: &Value) -> Result<CheckMode, LoadError> {
    match value.as_str() {
        Some("all") => Ok(CheckMode::All),
        Some("begin") => Ok(CheckMode::Begin),
        Some("end") => Ok(CheckMode::End),
        _ => Err(LoadError::Malformed("check")),
    }
}

fn checks(doc: &Map<String, Value>) -> Result<Checks, LoadError> {
    let mut result = Checks::default();
    let Some(Value::Object(map)) = doc.get("check") else {
        return Ok(result);
    };
    if let Some(value) = map.get("stdin") {
        result.output = check_mode(value)?;
    }
    if let Some(value) = map.get("stdout") {
        result.output = check_mode(value)?;
    }
    if let Some(value) = map.get("stderr") {
        result.error = check_mode(value)?;
    }
    Ok(result)
}

fn out_capture(doc: &Map<String, Value>) -> Result<OutCapture, LoadError> {
    let mut result = OutCapture::default();
    let Some(node) = doc.get("output") else {
        return Ok(result);
    };
    match node {
        Value::String(token) => match token.as_str() {
            "pty" => {
                result.output = StreamDecl::Terminal;
                result.error = StreamDecl::RedirToOutput;
            }
            "stderr" => {
                result.output = StreamDecl::RedirToError;
            }
            "stdout" => {
                result.error = StreamDecl::RedirToOutput;
            }
            "pipe" => {}
            _ => return Err(LoadError::Malformed("output")),
        },
        Value::Object(map) => {
            if let Some(out) = map.get("stdout") {
                result.output = match out.as_str() {
                    Some("pty") => StreamDecl::Terminal,
                    Some("stderr") => StreamDecl::RedirToError,
                    Some("pipe") => StreamDecl::Piped,
                    _ => return Err(LoadError::Malformed("output")),
                };
            }
            if let Some(err) = map.get("stderr") {
                result.error = match err.as_str() {
                    Some("pty") => StreamDecl::Terminal,
                    Some("stdout") => StreamDecl::RedirToOutput,
                    Some("pipe") => StreamDecl::Piped,
                    _ => return Err(LoadError::Malformed("output")),
                };
            }
        }
        _ => return Err(LoadError::Malformed("output")),
    }
    Ok(result)
}

fn name_for(part: &str) -> String {
    let mut items = part.split('-');
    let first = items.next().unwrap_or_default();
    let mut result = format!("({first})");
    for item in items {
        result.push(' ');
        result.push_str(item);
    }
    result
}

fn test_name(filename: &Path) -> String {
    let basename = filename
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dirname = filename
        .parent()
        .and_then(Path::file_name)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{} :: {}", name_for(&dirname), name_for(&basename))
}

/// Rebuild `map` with `(key, value)` placed right after `after` (or at the
/// front when `after` is `None`); serde_json's map has no positional insert.
fn insert_near_front(map: &mut Map<String, Value>, after: Option<&str>, key: &str, value: Value) {
    let mut rebuilt = Map::new();
    let mut inserted = false;
    if after.is_none() {
        rebuilt.insert(key.to_string(), value.clone());
        inserted = true;
    }
    for (existing_key, existing_value) in map.iter() {
        rebuilt.insert(existing_key.clone(), existing_value.clone());
        if !inserted && Some(existing_key.as_str()) == after {
            rebuilt.insert(key.to_string(), value.clone());
            inserted = true;
        }
    }
    if !inserted {
        rebuilt.insert(key.to_string(), value);
    }
    *map = rebuilt;
}

/// Split captured text into the JSON shape used by the `expected` key: a
/// plain string for one line, otherwise an array of lines where a trailing
/// newline survives as `\n` on the final entry.
pub fn to_lines(text: &str) -> Value {
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if lines.len() > 1 && lines.last().is_some_and(String::is_empty) {
        lines.pop();
        if let Some(last) = lines.last_mut() {
            last.push('\n');
        }
    }
    if lines.len() == 1 {
        return Value::String(lines.pop().unwrap_or_default());
    }
    Value::Array(lines.into_iter().map(Value::String).collect())
}

// Document writes are serialised: concurrently saved tests may share a file.
static STORE_LOCK: Mutex<()> = Mutex::new(());

impl TestData {
    /// Load one test document. A `schema` URL is inserted or refreshed as
    /// the `$schema` key, writing the file back when it changed.
    pub fn load(filename: &Path, index: usize, schema: Option<&str>) -> Result<TestData, LoadError> {
        let text = std::fs::read_to_string(filename)?;
        let root: Value = serde_json::from_str(&text)?;
        let Value::Object(mut doc) = root else {
            return Err(LoadError::Malformed("document"));
        };

        let mut renovate = false;
        if let Some(schema) = schema {
            if !doc.contains_key("$schema") {
                insert_near_front(&mut doc, None, "$schema", Value::String(schema.into()));
                renovate = true;
            } else if let Some(existing) = doc.get_mut("$schema") {
                if existing.as_str() != Some(schema) {
                    *existing = Value::String(schema.to_string());
                    renovate = true;
                }
            }
        }

        let call_args = doc
            .get("args")
            .and_then(|node| strlist(node, true))
            .ok_or(LoadError::Malformed("args"))?;
        let expected =
            expected_capture(doc.get("expected").ok_or(LoadError::Malformed("expected"))?)?;

        let lang = doc
            .get("lang")
            .and_then(Value::as_str)
            .unwrap_or("en")
            .to_string();
        let linear = doc.get("linear").and_then(Value::as_bool).unwrap_or(false);
        let disabled = match doc.get("disabled") {
            Some(Value::String(os)) => Disabled::Platform(os.clone()),
            Some(Value::Bool(flag)) => Disabled::Flag(*flag),
            _ => Disabled::default(),
        };

        let result = TestData {
            filename: filename.to_path_buf(),
            index,
            lang,
            prepare: command_set(&doc, "prepare")?,
            call_args,
            post: command_set(&doc, "post")?,
            cleanup: command_set(&doc, "cleanup")?,
            expected,
            linear,
            disabled,
            env: env_variables(&doc),
            patches: patch_list(doc.get("patches")),
            check: checks(&doc)?,
            out_capture: out_capture(&doc)?,
            name: test_name(filename),
            doc,
        };

        if renovate {
            result.store();
        }
        Ok(result)
    }

    pub fn not_disabled(&self) -> bool {
        match &self.disabled {
            Disabled::Flag(flag) => !flag,
            Disabled::Platform(os) => os != platform_tag(),
        }
    }

    /// Record a freshly captured result as the document's `expected` value.
    pub fn set_expected(&mut self, actual: &Capture) {
        self.doc.insert(
            "expected".to_string(),
            Value::Array(vec![
                Value::from(actual.return_code),
                to_lines(&actual.output),
                to_lines(&actual.error),
            ]),
        );
    }

    /// Reset `expected` to null (and optionally pin `lang`), then persist.
    pub fn nullify(&mut self, lang: Option<&str>) {
        if let Some(lang) = lang {
            if self.doc.contains_key("lang") {
                self.doc
                    .insert("lang".to_string(), Value::String(lang.to_string()));
            } else {
                let after = self.doc.contains_key("$schema").then_some("$schema");
                insert_near_front(&mut self.doc, after, "lang", Value::String(lang.to_string()));
            }
        }
        self.doc.insert("expected".to_string(), Value::Null);
        self.store();
    }

    /// Write the document back, pretty-printed with four-space indentation.
    /// Write failures are quiet; a missed save shows up on the next run as
    /// an absent `expected`.
    pub fn store(&self) {
        let _guard = STORE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut text = Vec::with_capacity(256);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut text, formatter);
        if serde::Serialize::serialize(&self.doc, &mut serializer).is_err() {
            return;
        }
        if text.last() != Some(&b'\n') {
            text.push(b'\n');
        }
        let _ = std::fs::write(&self.filename, text);
    }
}

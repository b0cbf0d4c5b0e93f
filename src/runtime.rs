//! Runtime context: variable expansion and output canonicalisation.
//!
//! A single [`Runtime`] is built per process and cloned per test with a
//! private `temp_dir`. Expansion turns `$VAR` tokens in command lines into
//! concrete paths; canonicalisation (`fix`) is the inverse direction, turning
//! volatile fragments of captured output back into `$TMP`/`$INST`/`$VERSION`
//! tokens before comparison.

use crate::commands::{CommandHost, HandlerMap};
use crate::shell;
use crate::strings::repr;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Path rendering mode for expanded variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exp {
    /// Forward slashes.
    Generic,
    /// The platform's preferred separator.
    Preferred,
    /// As stored.
    NotChanged,
}

/// Render a path with forward slashes regardless of platform.
pub fn generic_path(path: &Path) -> String {
    let text = path.display().to_string();
    if std::path::MAIN_SEPARATOR == '/' {
        text
    } else {
        text.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Render a path with the platform's preferred separator.
pub fn preferred_path(path: &Path) -> String {
    let text = path.display().to_string();
    if std::path::MAIN_SEPARATOR == '/' {
        text
    } else {
        text.replace('/', std::path::MAIN_SEPARATOR_STR)
    }
}

fn rendered(path: &Path, modifier: Exp) -> String {
    match modifier {
        Exp::Generic => generic_path(path),
        Exp::Preferred => preferred_path(path),
        Exp::NotChanged => path.display().to_string(),
    }
}

/// Process-wide execution context, cloned per test.
#[derive(Clone, Default)]
pub struct Runtime {
    /// The target as built.
    pub target: PathBuf,
    /// The staged copy actually invoked.
    pub rt_target: PathBuf,
    pub build_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub version: String,
    pub counter_total: usize,
    pub counter_digits: usize,
    pub handlers: Arc<HandlerMap>,
    /// Snapshot of the runner's own environment.
    pub variables: Arc<BTreeMap<String, String>>,
    /// ProjectInfo environment, injected into every test and reported as
    /// `$NAME` in canonicalised output.
    pub project_env: Arc<BTreeMap<String, String>>,
    pub common_patches: Arc<Vec<(String, String)>>,
    pub reportable_vars: Arc<Vec<String>>,
    pub debug: bool,
}

impl Runtime {
    pub fn mocks_dir(&self) -> PathBuf {
        self.temp_dir.join("mocks")
    }

    fn inst_dir(&self) -> PathBuf {
        self.rt_target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    fn version_short(&self) -> &str {
        match self.version.rfind('.') {
            Some(pos) => &self.version[..pos],
            None => &self.version,
        }
    }

    /// Expand `$VAR` tokens. Resolution order: built-ins (`TMP`, `INST`,
    /// `VERSION`, `VERSION_SHORT`), then the project environment, then
    /// `stored_env`. An unknown key is re-emitted as the literal `$KEY`; a
    /// `$` with no identifier after it is preserved verbatim.
    pub fn expand(
        &self,
        arg: &str,
        stored_env: &BTreeMap<String, String>,
        modifier: Exp,
    ) -> String {
        let mut result = String::with_capacity(arg.len());
        let mut rest = arg;

        while let Some(pos) = rest.find('$') {
            result.push_str(&rest[..pos]);
            rest = &rest[pos + 1..];

            let key_len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            if key_len == 0 {
                result.push('$');
                continue;
            }
            let key = &rest[..key_len];
            rest = &rest[key_len..];

            match key {
                "TMP" => result.push_str(&rendered(&self.temp_dir, modifier)),
                "INST" => result.push_str(&rendered(&self.inst_dir(), modifier)),
                "VERSION" => result.push_str(&self.version),
                "VERSION_SHORT" => result.push_str(self.version_short()),
                _ => {
                    if let Some(value) = self.project_env.get(key) {
                        result.push_str(value);
                    } else if let Some(value) = stored_env.get(key) {
                        result.push_str(value);
                    } else {
                        result.push('$');
                        result.push_str(key);
                    }
                }
            }
        }
        result.push_str(rest);
        result
    }

    /// Expand every word of a command line.
    pub fn expand_cmd(
        &self,
        cmd: &[String],
        stored_env: &BTreeMap<String, String>,
        modifier: Exp,
    ) -> Vec<String> {
        cmd.iter()
            .map(|arg| self.expand(arg, stored_env, modifier))
            .collect()
    }

    /// Dispatch one prepared command line to its handler. `safe-` prefixed
    /// names tolerate failure; `safe-rm` alone also keeps quiet about it.
    pub fn run(&self, host: &mut dyn CommandHost, args: &[String], listing: &mut String) -> bool {
        let Some(orig) = args.first() else {
            listing.push_str("\x1b[1;31merror: command not provided\x1b[m\n");
            return false;
        };

        let can_fail = orig.starts_with("safe-");
        let command = if can_fail {
            &orig["safe-".len()..]
        } else {
            orig.as_str()
        };

        if self.debug {
            listing.push_str(&format!("\x1b[1;36m> {}\x1b[m\n", shell::join(args)));
        }

        let Some(info) = self.handlers.get(command) else {
            listing.push_str(&format!(
                "\x1b[1;31merror: command `{}` not found \x1b[1;37m[{}]\x1b[m\n",
                orig,
                shell::join(args)
            ));
            return false;
        };

        let rest = &args[1..];
        if rest.len() < info.min_args {
            listing.push_str(&format!(
                "\x1b[1;31merror: command `{}` expects {}, got {} argument{}\x1b[m\n",
                command,
                info.min_args,
                rest.len(),
                if rest.len() == 1 { "" } else { "s" }
            ));
            return false;
        }

        if (info.run)(self, host, rest, listing) {
            return true;
        }
        if !can_fail || command != "rm" {
            listing.push_str(&format!(
                "\x1b[1;31merror: problem while handling `{} {}`\x1b[m\n",
                orig,
                shell::join(rest)
            ));
        }
        can_fail
    }

    /// Canonicalise captured output: volatile paths and the version become
    /// placeholder tokens, then each line is run through the project patches
    /// followed by the per-test patches, first anchored match wins.
    pub fn fix(&self, text: &str, patches: &[(String, String)]) -> String {
        let inst_dir = self.inst_dir();
        let mut text = replace_var(text, &preferred_path(&self.temp_dir), "$TMP");
        text = replace_var(&text, &preferred_path(&inst_dir), "$INST");
        for (var, path) in self.project_env.iter() {
            text = replace_var(&text, path, &format!("${var}"));
        }

        if std::path::MAIN_SEPARATOR != '/' {
            text = replace_var(&text, &generic_path(&self.temp_dir), "$TMP");
            text = replace_var(&text, &generic_path(&inst_dir), "$INST");
            for (var, path) in self.project_env.iter() {
                text = replace_var(&text, &generic_path(Path::new(path)), &format!("${var}"));
            }
        }

        if !self.version.is_empty() {
            text = replace_var(&text, &self.version, "$VERSION");
            if self.version.contains('.') {
                text = replace_var(&text, self.version_short(), "$VERSION_SHORT");
            }
        }

        let mut compiled = Vec::with_capacity(self.common_patches.len() + patches.len());
        for (source, set) in [
            (self.common_patches.as_slice(), "common patches"),
            (patches, "json patches"),
        ] {
            for (expr, replacement) in source {
                match Regex::new(&format!("^(?:{expr})$")) {
                    Ok(re) => compiled.push((re, replacement.as_str())),
                    Err(err) => {
                        eprintln!("{set}: exception: {err}\n  {}", repr(expr));
                    }
                }
            }
        }

        let lines: Vec<String> = text
            .split('\n')
            .map(|line| {
                for (re, replacement) in &compiled {
                    if let Some(caps) = re.captures(line) {
                        return expand_refs(replacement, &caps);
                    }
                }
                line.to_string()
            })
            .collect();

        lines.join("\n")
    }
}

/// Expand `\N` back-references in a patch replacement. A backslash not
/// followed by digits is dropped, matching the original replacement grammar.
fn expand_refs(input: &str, caps: &Captures<'_>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('\\') {
        result.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            continue;
        }
        let group: usize = rest[..digits].parse().unwrap_or_default();
        if let Some(m) = caps.get(group) {
            result.push_str(m.as_str());
        }
        rest = &rest[digits..];
    }
    result.push_str(rest);
    result
}

/// Replace every occurrence of `replaced` with `var_name`. From the second
/// replacement onward, backslashes in the trailing chunk are rewritten to
/// forward slashes up to the next whitespace, so path-style tokens come out
/// platform-independent.
fn replace_var(full_input: &str, replaced: &str, var_name: &str) -> String {
    if replaced.is_empty() {
        return full_input.to_string();
    }

    let mut result = String::with_capacity(full_input.len());
    let mut rest = full_input;
    let mut first = true;

    loop {
        match rest.find(replaced) {
            None => {
                let prev = result.len();
                result.push_str(rest);
                if !first {
                    alt_path(&mut result, prev);
                }
                break;
            }
            Some(pos) => {
                let prev = result.len();
                result.push_str(&rest[..pos]);
                if !first {
                    alt_path(&mut result, prev);
                }
                result.push_str(var_name);
                rest = &rest[pos + replaced.len()..];
                first = false;
            }
        }
    }
    result
}

#[cfg(windows)]
fn alt_path(result: &mut String, prev_size: usize) {
    let mut done = false;
    let tail: String = result[prev_size..]
        .chars()
        .map(|c| {
            if done {
                c
            } else if c.is_whitespace() {
                done = true;
                c
            } else if c == '\\' {
                '/'
            } else {
                c
            }
        })
        .collect();
    result.truncate(prev_size);
    result.push_str(&tail);
}

#[cfg(not(windows))]
fn alt_path(_result: &mut String, _prev_size: usize) {}

//! Test execution engine.
//!
//! Drives one test through its lifecycle: temp setup, prepare commands,
//! environment assembly, target invocation plus post calls, cleanup,
//! canonicalisation, clipping and comparison, and the failure report.

use crate::commands::{self, CommandHost};
use crate::diff::diff;
use crate::env;
use crate::proc::{self, Capture, RunOpts};
use crate::report::{color, painted, Outcome};
use crate::runtime::{generic_path, Exp, Runtime};
use crate::schema::{CheckMode, TestData, TestVariable};
use crate::shell;
use crate::strings::{random_letters, repr};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A test in flight: the loaded document plus per-run state.
pub struct Test {
    pub data: TestData,
    cwd: PathBuf,
    stored_env: BTreeMap<String, String>,
    needs_mocks_in_path: bool,
}

/// What one executed test hands back to the scheduler.
pub struct TestResults {
    pub outcome: Outcome,
    pub ident: String,
    pub temp_dir: PathBuf,
    pub prepare_log: String,
    pub report: Option<String>,
}

impl Test {
    pub fn new(data: TestData) -> Self {
        Self {
            data,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            stored_env: BTreeMap::new(),
            needs_mocks_in_path: false,
        }
    }

    fn run_cmds(
        &mut self,
        rt: &Runtime,
        commands: &[Vec<String>],
        listing: &mut String,
    ) -> bool {
        let empty = BTreeMap::new();
        for cmd in commands {
            let expanded = rt.expand_cmd(cmd, &empty, Exp::Generic);
            if !rt.run(self, &expanded, listing) {
                return false;
            }
        }
        true
    }

    fn expand_test_calls(&self, rt: &Runtime) -> (Vec<String>, Vec<Vec<String>>) {
        let call = rt.expand_cmd(&self.data.call_args, &self.stored_env, Exp::Preferred);
        let post = self
            .data
            .post
            .iter()
            .map(|cmd| rt.expand_cmd(cmd, &self.stored_env, Exp::Preferred))
            .collect();
        (call, post)
    }

    /// Assemble the child environment: runner environment, `LANGUAGE`, then
    /// the per-test `env` entries, then the mocks `PATH` prefix.
    fn copy_environment_block(
        &self,
        variables: &BTreeMap<String, String>,
        rt: &Runtime,
    ) -> BTreeMap<String, String> {
        let empty = BTreeMap::new();
        let mut result = variables.clone();
        result.insert("LANGUAGE".to_string(), self.data.lang.clone());
        for (key, value) in &self.data.env {
            match value {
                TestVariable::Unset => {
                    result.remove(key);
                }
                TestVariable::Value(text) => {
                    result.insert(key.clone(), rt.expand(text, &empty, Exp::Preferred));
                }
                TestVariable::PathParts(parts) => {
                    for part in parts {
                        let expanded = rt.expand(part, &empty, Exp::Preferred);
                        env::append(&mut result, key, Path::new(&expanded));
                    }
                }
            }
        }
        if self.needs_mocks_in_path {
            env::prepend(&mut result, "PATH", &rt.mocks_dir());
        }
        result
    }

    /// Invoke the target, then each post command line while the exit code
    /// stays zero. Outputs are concatenated with an LF between non-empty
    /// chunks; the reported exit code is the last one observed.
    fn observe(
        &self,
        calls: &(Vec<String>, Vec<Vec<String>>),
        variables: &BTreeMap<String, String>,
        rt: &Runtime,
        listing: &mut String,
    ) -> Capture {
        let run_cwd = (!self.data.linear).then_some(self.cwd.as_path());

        if rt.debug {
            listing.push_str(&format!(
                "\x1b[1;33m> {} {}\x1b[m\n",
                generic_path(&rt.rt_target),
                shell::join(&calls.0)
            ));
        }

        let mut result = proc::run(RunOpts {
            args: &calls.0,
            cwd: run_cwd,
            env: Some(variables),
            output: self.data.out_capture.output,
            error: self.data.out_capture.error,
            debug: Some(&mut *listing),
            ..RunOpts::new(&rt.rt_target)
        });

        for cmd in &calls.1 {
            if result.return_code != 0 {
                break;
            }

            if rt.debug {
                listing.push_str(&format!(
                    "\x1b[1;33m> {} {}\x1b[m\n",
                    generic_path(&rt.rt_target),
                    shell::join(cmd)
                ));
            }

            let local = proc::run(RunOpts {
                args: cmd,
                cwd: run_cwd,
                env: Some(variables),
                output: self.data.out_capture.output,
                error: self.data.out_capture.error,
                debug: Some(&mut *listing),
                ..RunOpts::new(&rt.rt_target)
            });

            result.return_code = local.return_code;
            if !result.output.is_empty() && !local.output.is_empty() {
                result.output.push('\n');
            }
            result.output.push_str(&local.output);
            if !result.error.is_empty() && !local.error.is_empty() {
                result.error.push('\n');
            }
            result.error.push_str(&local.error);
        }

        result
    }

    /// Run the whole lifecycle. `None` capture means a stage before the
    /// comparison failed and the test is skipped.
    pub fn run(
        &mut self,
        variables: &BTreeMap<String, String>,
        rt: &Runtime,
    ) -> (String, Option<Capture>) {
        let mut listing = String::new();
        if !commands::mkdirs(&rt.temp_dir) {
            return (listing, None);
        }
        if !commands::rmtree(&rt.mocks_dir()) {
            return (listing, None);
        }

        let prepare = self.data.prepare.clone();
        if !self.run_cmds(rt, &prepare, &mut listing) {
            return (listing, None);
        }

        let calls = self.expand_test_calls(rt);
        let local_env = self.copy_environment_block(variables, rt);
        let mut result = self.observe(&calls, &local_env, rt, &mut listing);

        let cleanup = self.data.cleanup.clone();
        if !self.run_cmds(rt, &cleanup, &mut listing) {
            return (listing, None);
        }

        result.output = rt.fix(&result.output, &self.data.patches);
        result.error = rt.fix(&result.error, &self.data.patches);

        (listing, Some(result))
    }

    /// Truncate the captured streams according to the per-stream check
    /// modes. Fails with the mode name when the actual output is too short.
    pub fn clip(&self, actual: &Capture) -> Result<Capture, String> {
        let expected = self.data.expected.as_ref().expect("clip needs an expectation");
        let mut result = actual.clone();

        for (mode, actual_stream, expected_stream) in [
            (self.data.check.output, &mut result.output, &expected.output),
            (self.data.check.error, &mut result.error, &expected.error),
        ] {
            let keep = expected_stream.len();
            match mode {
                CheckMode::All => {}
                CheckMode::Begin => {
                    if actual_stream.len() < keep {
                        return Err(mode.name().to_string());
                    }
                    *actual_stream =
                        String::from_utf8_lossy(&actual_stream.as_bytes()[..keep]).into_owned();
                }
                CheckMode::End => {
                    if actual_stream.len() < keep {
                        return Err(mode.name().to_string());
                    }
                    let start = actual_stream.len() - keep;
                    *actual_stream =
                        String::from_utf8_lossy(&actual_stream.as_bytes()[start..]).into_owned();
                }
            }
        }

        Ok(result)
    }

    /// Build the failure report: per-stream expectation/actual pairs with a
    /// line diff, then the exact reproduction command.
    pub fn report(&self, clipped: &Capture, rt: &Runtime) -> String {
        let expected = self.data.expected.as_ref().expect("report needs an expectation");
        let mut result = String::new();

        if clipped.return_code != expected.return_code {
            result.push_str(&format!(
                "Return code\n  Expected:\n    {}\n  Actual:\n    {}\n\n",
                expected.return_code, clipped.return_code
            ));
        }

        for (mode, label, actual_stream, expected_stream) in [
            (
                self.data.check.output,
                "Standard out",
                clipped.output.as_str(),
                expected.output.as_str(),
            ),
            (
                self.data.check.error,
                "Standard err",
                clipped.error.as_str(),
                expected.error.as_str(),
            ),
        ] {
            if actual_stream == expected_stream {
                continue;
            }
            let pre_mark = if mode == CheckMode::End { "..." } else { "" };
            let post_mark = if mode == CheckMode::Begin { "..." } else { "" };
            result.push_str(&format!(
                "{label}\n  Expected:\n    {pre_mark}{expected}{post_mark}\n  Actual:\n    \
                 {pre_mark}{actual}{post_mark}\n\nDiff:\n{diff}\n\n",
                expected = repr(expected_stream),
                actual = repr(actual_stream),
                diff = diff(expected_stream, actual_stream),
            ));
        }

        let child_env = self.copy_environment_block(&BTreeMap::new(), rt);
        let expanded = rt.expand_cmd(&self.data.call_args, &self.stored_env, Exp::Preferred);
        let mut ran_cmd = Vec::with_capacity(child_env.len() + 1 + expanded.len());
        for (var, value) in &child_env {
            ran_cmd.push(format!("{var}={value}"));
        }
        for var in rt.reportable_vars.iter() {
            ran_cmd.push(format!("{var}={}", env::getenv(var)));
        }
        ran_cmd.push(generic_path(&rt.rt_target));
        ran_cmd.extend(expanded);
        result.push_str(&format!(
            "{}\ncwd: {}\ntest: {}",
            shell::join(&ran_cmd),
            self.cwd.display(),
            self.data.filename.display()
        ));

        result
    }
}

impl CommandHost for Test {
    fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn cd(&mut self, _rt: &Runtime, dir: &Path) -> bool {
        self.cwd = self.cwd.join(dir);
        if self.data.linear {
            return std::env::set_current_dir(&self.cwd).is_ok();
        }
        true
    }

    fn store_variable(
        &mut self,
        rt: &Runtime,
        var: &str,
        call: &[String],
        listing: &mut String,
    ) -> bool {
        let Some(exec_str) = call.first() else {
            return false;
        };
        let target_name = rt.target.file_stem().unwrap_or_default();
        let exec = if target_name.to_str() == Some(exec_str.as_str()) {
            rt.rt_target.clone()
        } else {
            PathBuf::from(exec_str)
        };

        let capture = proc::run(RunOpts {
            args: &call[1..],
            cwd: Some(&self.cwd),
            output: crate::proc::StreamDecl::Piped,
            debug: Some(&mut *listing),
            ..RunOpts::new(&exec)
        });
        if capture.return_code != 0 {
            return false;
        }
        let output = capture.output.trim().to_string();
        if rt.debug {
            listing.push_str(&format!("  {var} {}\n", repr(&output)));
        }
        self.stored_env.insert(var.to_string(), output);
        true
    }

    fn mock(&mut self, rt: &Runtime, exe: &str, link: &str) -> bool {
        #[cfg(windows)]
        let (prog_name, link_name) = {
            let mut prog_name = exe.to_string();
            let mut link_name = link.to_string();
            if !prog_name.ends_with(".exe") {
                prog_name.push_str(".exe");
                link_name.push_str(".exe");
            }
            (prog_name, link_name)
        };
        #[cfg(not(windows))]
        let (prog_name, link_name) = (exe.to_string(), link.to_string());

        let src = rt.build_dir.join("mocks").join(prog_name);
        let dst = rt.mocks_dir().join(link_name);
        if let Some(parent) = dst.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        let _ = std::fs::remove_file(&dst);

        #[cfg(unix)]
        let linked = std::os::unix::fs::symlink(&src, &dst).is_ok();
        #[cfg(windows)]
        let linked = std::os::windows::fs::symlink_file(&src, &dst).is_ok();
        if !linked {
            return false;
        }
        self.needs_mocks_in_path = true;
        true
    }

    fn generate(
        &mut self,
        rt: &Runtime,
        tmplt: &str,
        dst: &str,
        args: &[String],
        listing: &mut String,
    ) -> bool {
        let template_path = self.path(Path::new(tmplt));
        let result_path = self.path(Path::new(dst));
        if rt.debug {
            listing.push_str(&format!(
                "  template: {}\n  output:   {}\n",
                template_path.display(),
                result_path.display()
            ));
        }

        let Ok(template) = std::fs::read_to_string(&template_path) else {
            return false;
        };

        let mut vars = BTreeMap::new();
        for arg in args {
            match arg.split_once('=') {
                Some((var, value)) => vars.insert(var.to_string(), value.to_string()),
                None => vars.insert(arg.clone(), String::new()),
            };
        }

        let text = rt.expand(&template, &vars, Exp::Preferred);
        if let Some(parent) = result_path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        std::fs::write(&result_path, text).is_ok()
    }
}

/// Run one test on a private clone of the runtime and classify the result.
pub fn execute(test: &mut Test, variables: &BTreeMap<String, String>, rt: &Runtime) -> TestResults {
    let mut local_rt = rt.clone();
    local_rt.temp_dir = rt.temp_dir.join(random_letters(16));

    let ident = format!(
        "{} {}",
        painted(
            color::COUNTER,
            &format!(
                "[{:>width$}/{}]",
                test.data.index,
                local_rt.counter_total,
                width = local_rt.counter_digits
            )
        ),
        painted(color::NAME, &test.data.name)
    );
    println!("{ident}");

    let (prepare_log, actual) = test.run(variables, &local_rt);

    let Some(actual) = actual else {
        return TestResults {
            outcome: Outcome::Skipped,
            ident,
            temp_dir: local_rt.temp_dir,
            prepare_log,
            report: None,
        };
    };

    if test.data.expected.is_none() {
        test.data.set_expected(&actual);
        test.data.store();
        return TestResults {
            outcome: Outcome::Saved,
            ident,
            temp_dir: local_rt.temp_dir,
            prepare_log,
            report: None,
        };
    }

    let clipped = match test.clip(&actual) {
        Ok(clipped) => clipped,
        Err(check_name) => {
            return TestResults {
                outcome: Outcome::ClipFailed(check_name),
                ident,
                temp_dir: local_rt.temp_dir,
                prepare_log,
                report: None,
            };
        }
    };

    let expected = test.data.expected.as_ref().expect("checked above");
    if actual == *expected || clipped == *expected {
        return TestResults {
            outcome: Outcome::Ok,
            ident,
            temp_dir: local_rt.temp_dir,
            prepare_log,
            report: None,
        };
    }

    let report = test.report(&clipped, &local_rt);
    TestResults {
        outcome: Outcome::Failed,
        ident,
        temp_dir: local_rt.temp_dir,
        prepare_log,
        report: Some(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::builtin_handlers;
    use crate::schema::Checks;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn echo_runtime(temp_dir: &Path) -> Runtime {
        Runtime {
            target: PathBuf::from("/bin/echo"),
            rt_target: PathBuf::from("/bin/echo"),
            temp_dir: temp_dir.to_path_buf(),
            counter_total: 1,
            counter_digits: 1,
            handlers: Arc::new(builtin_handlers()),
            ..Runtime::default()
        }
    }

    fn test_env() -> BTreeMap<String, String> {
        crate::env::get_env()
    }

    fn loaded(dir: &Path, body: &str) -> Test {
        let path = dir.join("suite-dir").join("001-case.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        Test::new(TestData::load(&path, 1, None).unwrap())
    }

    #[test]
    #[cfg(unix)]
    fn happy_path_passes() {
        let dir = tempdir().unwrap();
        let mut test = loaded(
            dir.path(),
            r#"{"args":"hello","expected":[0,"hello\n",""]}"#,
        );
        let rt = echo_runtime(&dir.path().join("tmp"));
        let results = execute(&mut test, &test_env(), &rt);
        assert!(matches!(results.outcome, Outcome::Ok));
    }

    #[test]
    #[cfg(unix)]
    fn mismatch_fails_with_report() {
        let dir = tempdir().unwrap();
        let mut test = loaded(
            dir.path(),
            r#"{"args":"actual","expected":[0,"expected\n",""]}"#,
        );
        let rt = echo_runtime(&dir.path().join("tmp"));
        let results = execute(&mut test, &test_env(), &rt);
        assert!(matches!(results.outcome, Outcome::Failed));
        let report = results.report.unwrap();
        assert!(report.contains("Standard out"));
        assert!(report.contains("-expected"));
        assert!(report.contains("+actual"));
        assert!(report.contains("cwd:"));
        assert!(report.contains("001-case.json"));
    }

    #[test]
    #[cfg(unix)]
    fn return_code_mismatch_fails() {
        let dir = tempdir().unwrap();
        let mut test = loaded(
            dir.path(),
            r#"{"args":"hello","expected":[1,"hello\n",""]}"#,
        );
        let rt = echo_runtime(&dir.path().join("tmp"));
        let results = execute(&mut test, &test_env(), &rt);
        assert!(matches!(results.outcome, Outcome::Failed));
        assert!(results.report.unwrap().contains("Return code"));
    }

    #[test]
    #[cfg(unix)]
    fn save_on_first_run_rewrites_document() {
        let dir = tempdir().unwrap();
        let mut test = loaded(dir.path(), r#"{"args":"world","expected":null}"#);
        let filename = test.data.filename.clone();
        let rt = echo_runtime(&dir.path().join("tmp"));
        let results = execute(&mut test, &test_env(), &rt);
        assert!(matches!(results.outcome, Outcome::Saved));

        let reloaded = TestData::load(&filename, 1, None).unwrap();
        let expected = reloaded.expected.unwrap();
        assert_eq!(expected.return_code, 0);
        assert_eq!(expected.output, "world\n");
    }

    #[test]
    #[cfg(unix)]
    fn failed_prepare_skips() {
        let dir = tempdir().unwrap();
        let mut test = loaded(
            dir.path(),
            r#"{"args":"hello","prepare":[["no-such-command"]],"expected":[0,"hello\n",""]}"#,
        );
        let rt = echo_runtime(&dir.path().join("tmp"));
        let results = execute(&mut test, &test_env(), &rt);
        assert!(matches!(results.outcome, Outcome::Skipped));
        assert!(results.prepare_log.contains("not found"));
    }

    #[test]
    #[cfg(unix)]
    fn temp_dir_is_canonicalised_in_output() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("tmp");
        let mut test = loaded(dir.path(), r#"{"args":"$TMP/foo","expected":[0,"$TMP/foo\n",""]}"#);
        let rt = echo_runtime(&tmp);
        let results = execute(&mut test, &test_env(), &rt);
        assert!(
            matches!(results.outcome, Outcome::Ok),
            "report: {:?}",
            results.report
        );
    }

    #[test]
    #[cfg(unix)]
    fn patches_apply_before_comparison() {
        let dir = tempdir().unwrap();
        let mut test = loaded(
            dir.path(),
            r#"{"args":"took 137ms",
                "patches":{"^took [0-9]+ms$":"took Nms"},
                "expected":[0,"took Nms\n",""]}"#,
        );
        // A trailing newline line stays untouched by the anchored patch.
        let rt = echo_runtime(&dir.path().join("tmp"));
        let results = execute(&mut test, &test_env(), &rt);
        assert!(matches!(results.outcome, Outcome::Ok));
    }

    #[test]
    #[cfg(unix)]
    fn post_calls_concatenate_output() {
        let dir = tempdir().unwrap();
        let mut test = loaded(
            dir.path(),
            r#"{"args":"first","post":[["second"]],"expected":[0,["first","","second\n"],""]}"#,
        );
        let rt = echo_runtime(&dir.path().join("tmp"));
        let results = execute(&mut test, &test_env(), &rt);
        assert!(
            matches!(results.outcome, Outcome::Ok),
            "report: {:?}",
            results.report
        );
    }

    #[test]
    fn clip_begin_keeps_prefix() {
        let dir = tempdir().unwrap();
        let mut test = loaded(
            dir.path(),
            r#"{"args":"x","check":{"stdout":"begin"},"expected":[0,"ab",""]}"#,
        );
        test.data.check = Checks {
            output: CheckMode::Begin,
            error: CheckMode::All,
        };
        let clipped = test
            .clip(&Capture {
                return_code: 0,
                output: "abcdef".into(),
                error: String::new(),
            })
            .unwrap();
        assert_eq!(clipped.output, "ab");
    }

    #[test]
    fn clip_end_keeps_suffix() {
        let dir = tempdir().unwrap();
        let test = loaded(
            dir.path(),
            r#"{"args":"x","check":{"stderr":"end"},"expected":[0,"","ef"]}"#,
        );
        let clipped = test
            .clip(&Capture {
                return_code: 0,
                output: String::new(),
                error: "abcdef".into(),
            })
            .unwrap();
        assert_eq!(clipped.error, "ef");
    }

    #[test]
    fn clip_end_equal_lengths_reduces_to_all() {
        let dir = tempdir().unwrap();
        let test = loaded(
            dir.path(),
            r#"{"args":"x","check":{"stdout":"end"},"expected":[0,"abc",""]}"#,
        );
        let clipped = test
            .clip(&Capture {
                return_code: 0,
                output: "abc".into(),
                error: String::new(),
            })
            .unwrap();
        assert_eq!(clipped.output, "abc");
    }

    #[test]
    fn clip_begin_empty_expected_always_succeeds() {
        let dir = tempdir().unwrap();
        let test = loaded(
            dir.path(),
            r#"{"args":"x","check":{"stdout":"begin"},"expected":[0,"",""]}"#,
        );
        let clipped = test
            .clip(&Capture {
                return_code: 0,
                output: "anything".into(),
                error: String::new(),
            })
            .unwrap();
        assert_eq!(clipped.output, "");
    }

    #[test]
    fn clip_too_short_fails_with_check_name() {
        let dir = tempdir().unwrap();
        let test = loaded(
            dir.path(),
            r#"{"args":"x","check":{"stdout":"begin"},"expected":[0,"longer than actual",""]}"#,
        );
        let err = test
            .clip(&Capture {
                return_code: 0,
                output: "short".into(),
                error: String::new(),
            })
            .unwrap_err();
        assert_eq!(err, "begin");
    }

    #[test]
    #[cfg(unix)]
    fn env_block_assembly() {
        let dir = tempdir().unwrap();
        let test = loaded(
            dir.path(),
            r#"{"args":"x",
                "lang":"pl",
                "env":{"DROPPED":null,"ADDED":"$TMP/value","LISTED":["/a","/b"]},
                "expected":[0,"",""]}"#,
        );
        let rt = echo_runtime(Path::new("/tmp/base"));
        let mut variables = BTreeMap::new();
        variables.insert("DROPPED".to_string(), "old".to_string());
        variables.insert("KEPT".to_string(), "still here".to_string());

        let block = test.copy_environment_block(&variables, &rt);
        assert_eq!(block.get("LANGUAGE").unwrap(), "pl");
        assert!(!block.contains_key("DROPPED"));
        assert_eq!(block.get("KEPT").unwrap(), "still here");
        assert_eq!(block.get("ADDED").unwrap(), "/tmp/base/value");
        assert_eq!(
            block.get("LISTED").unwrap(),
            &format!("/a{}/b", crate::env::PATHSEP)
        );
    }

    #[test]
    #[cfg(unix)]
    fn store_command_trims_and_records() {
        let dir = tempdir().unwrap();
        let mut test = loaded(dir.path(), r#"{"args":"x","expected":[0,"",""]}"#);
        let rt = echo_runtime(&dir.path().join("tmp"));
        let mut listing = String::new();
        let call = vec!["echo".to_string(), "  padded  ".to_string()];
        assert!(test.store_variable(&rt, "SAVED", &call, &mut listing));
        assert_eq!(test.stored_env.get("SAVED").unwrap(), "padded");
    }

    #[test]
    #[cfg(unix)]
    fn store_failure_keeps_env_untouched() {
        let dir = tempdir().unwrap();
        let mut test = loaded(dir.path(), r#"{"args":"x","expected":[0,"",""]}"#);
        let rt = echo_runtime(&dir.path().join("tmp"));
        let mut listing = String::new();
        let call = vec!["false".to_string()];
        assert!(!test.store_variable(&rt, "SAVED", &call, &mut listing));
        assert!(test.stored_env.is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn generate_expands_template_variables() {
        let dir = tempdir().unwrap();
        let mut test = loaded(dir.path(), r#"{"args":"x","expected":[0,"",""]}"#);
        test.cwd = dir.path().to_path_buf();
        let rt = echo_runtime(Path::new("/tmp/base"));

        std::fs::write(dir.path().join("in.tmpl"), "key=$NAME tmp=$TMP").unwrap();
        let mut listing = String::new();
        let kv = vec!["NAME=value".to_string()];
        assert!(test.generate(&rt, "in.tmpl", "out/conf.txt", &kv, &mut listing));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/conf.txt")).unwrap(),
            "key=value tmp=/tmp/base"
        );
    }

    #[test]
    #[cfg(unix)]
    fn mock_creates_symlink_and_flags_path() {
        let dir = tempdir().unwrap();
        let build_dir = dir.path().join("build");
        std::fs::create_dir_all(build_dir.join("mocks")).unwrap();
        std::fs::write(build_dir.join("mocks/fake-git"), "#!/bin/sh\n").unwrap();

        let mut rt = echo_runtime(&dir.path().join("tmp"));
        rt.build_dir = build_dir;

        let mut test = loaded(dir.path(), r#"{"args":"x","expected":[0,"",""]}"#);
        assert!(test.mock(&rt, "fake-git", "git"));
        assert!(test.needs_mocks_in_path);
        assert!(rt.mocks_dir().join("git").is_symlink());

        let block = test.copy_environment_block(&BTreeMap::new(), &rt);
        assert!(block.get("PATH").unwrap().starts_with(rt.mocks_dir().to_str().unwrap()));
    }
}

//! Subprocess facade.
//!
//! One operation, [`run`], spawns a program with explicit stream
//! dispositions, drains stdout/stderr on copy threads and folds the exit
//! status into a single `i32`. Program lookup walks `PATH` (plus `PATHEXT`
//! on Windows) and falls back to re-invoking `python` for scripts with a
//! python shebang.

use std::collections::BTreeMap;
use std::io::{PipeWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

/// Exit-status sentinel for a program that could not be found.
const ENOENT: i32 = 2;

/// Exit-status sentinel for pipe/spawn/wait failures.
const SPAWN_FAILURE: i32 = 128;

/// Record of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    pub return_code: i32,
    pub output: String,
    pub error: String,
}

/// Where a child's output stream goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamDecl {
    /// Share the runner's own handle.
    #[default]
    Inherit,
    /// Capture through a pipe.
    Piped,
    /// Discard.
    Devnull,
    /// Reserved for pseudo-terminal capture; currently behaves like `Piped`.
    Terminal,
    /// Write into the sibling stdout pipe.
    RedirToOutput,
    /// Write into the sibling stderr pipe.
    RedirToError,
}

impl StreamDecl {
    fn wants_pipe(self) -> bool {
        matches!(self, StreamDecl::Piped | StreamDecl::Terminal)
    }
}

/// Options for [`run`].
pub struct RunOpts<'a> {
    pub exec: &'a Path,
    pub args: &'a [String],
    pub cwd: Option<&'a Path>,
    pub env: Option<&'a BTreeMap<String, String>>,
    pub input: Option<&'a str>,
    pub output: StreamDecl,
    pub error: StreamDecl,
    pub debug: Option<&'a mut String>,
}

impl<'a> RunOpts<'a> {
    pub fn new(exec: &'a Path) -> Self {
        Self {
            exec,
            args: &[],
            cwd: None,
            env: None,
            input: None,
            output: StreamDecl::Inherit,
            error: StreamDecl::Inherit,
            debug: None,
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => !meta.is_dir() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(windows)]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(windows)]
fn pathext() -> Vec<String> {
    std::env::var("PATHEXT")
        .unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string())
        .split(';')
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_lowercase())
        .collect()
}

#[cfg(windows)]
fn candidates(dir: &Path, program: &Path) -> Vec<PathBuf> {
    let plain = dir.join(program);
    let mut result = vec![plain.clone()];
    if plain.extension().is_none() {
        for ext in pathext() {
            let mut with_ext = plain.as_os_str().to_owned();
            with_ext.push(&ext);
            result.push(PathBuf::from(with_ext));
        }
    }
    result
}

#[cfg(not(windows))]
fn candidates(dir: &Path, program: &Path) -> Vec<PathBuf> {
    vec![dir.join(program)]
}

/// Locate `program` the way the OS would: pass through anything with a path
/// separator, otherwise search `PATH`.
fn locate(program: &Path, want_executable: bool) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return Some(program.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for candidate in candidates(&dir, program) {
            if is_executable(&candidate) || (!want_executable && candidate.is_file()) {
                return Some(candidate);
            }
        }
    }
    None
}

/// First of `names` that resolves to an executable on `PATH`.
pub fn find_program<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<PathBuf> {
    names
        .into_iter()
        .find_map(|name| locate(Path::new(name), true))
}

struct Resolved {
    exec: PathBuf,
    script: Option<PathBuf>,
}

/// Resolve the program to spawn, with the python-shebang fallback for
/// scripts that are on `PATH` but not directly executable here.
fn resolve(program: &Path) -> Option<Resolved> {
    if let Some(exec) = locate(program, true) {
        if is_executable(&exec) || program.components().count() > 1 {
            return Some(Resolved { exec, script: None });
        }
    }

    let file = locate(program, false)?;
    let mut head = [0u8; 64];
    let n = std::fs::File::open(&file).ok().and_then(|mut f| {
        let n = f.read(&mut head).ok()?;
        Some(n)
    })?;
    let first_line = String::from_utf8_lossy(&head[..n]);
    let first_line = first_line.lines().next().unwrap_or_default();
    if first_line.starts_with("#!") && first_line.contains("python") {
        let python = find_program(["python3", "python"])?;
        return Some(Resolved {
            exec: python,
            script: Some(file),
        });
    }
    None
}

fn reader_thread(mut src: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = src.read_to_end(&mut bytes);
        bytes
    })
}

fn writer_thread(mut dst: PipeWriter, bytes: Vec<u8>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let _ = dst.write_all(&bytes);
        // dst drops here, closing the child's stdin
    })
}

fn capture_text(bytes: Vec<u8>) -> String {
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if cfg!(windows) {
        text.replace('\r', "")
    } else {
        text
    }
}

fn note(debug: &mut Option<&mut String>, message: &str) {
    if let Some(sink) = debug {
        sink.push_str(message);
        sink.push('\n');
    }
}

fn fold_status(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        // Exit codes travel as bytes; 0xFE means -2 to the caller.
        #[cfg(unix)]
        return (code as u8) as i8 as i32;
        #[cfg(not(unix))]
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return signal;
        }
    }
    SPAWN_FAILURE
}

fn spawn_wired(
    resolved: &Resolved,
    opts: &RunOpts<'_>,
    debug: &mut Option<&mut String>,
) -> std::io::Result<(
    Child,
    Option<JoinHandle<()>>,
    Option<JoinHandle<Vec<u8>>>,
    Option<JoinHandle<Vec<u8>>>,
)> {
    let mut cmd = Command::new(&resolved.exec);
    if let Some(script) = &resolved.script {
        cmd.arg(script);
    }
    cmd.args(opts.args);
    if let Some(cwd) = opts.cwd {
        cmd.current_dir(cwd);
    }
    if let Some(env) = opts.env {
        cmd.env_clear();
        cmd.envs(env);
    }
    // Children get their own process group so signals aimed at the runner do
    // not cascade into them.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    let mut input_writer = None;
    if opts.input.is_some() {
        let (reader, writer) = std::io::pipe()?;
        note(debug, "input: piped");
        cmd.stdin(reader);
        input_writer = Some(writer);
    }

    let need_out_pipe = opts.output.wants_pipe()
        || opts.output == StreamDecl::RedirToOutput
        || opts.error == StreamDecl::RedirToOutput;
    let need_err_pipe = opts.error.wants_pipe()
        || opts.error == StreamDecl::RedirToError
        || opts.output == StreamDecl::RedirToError;

    let out_pipe = if need_out_pipe {
        Some(std::io::pipe()?)
    } else {
        None
    };
    let err_pipe = if need_err_pipe {
        Some(std::io::pipe()?)
    } else {
        None
    };

    match opts.output {
        StreamDecl::Inherit => {}
        StreamDecl::Devnull => {
            cmd.stdout(Stdio::null());
        }
        StreamDecl::Piped | StreamDecl::Terminal => {
            cmd.stdout(out_pipe.as_ref().unwrap().1.try_clone()?);
        }
        StreamDecl::RedirToError => {
            cmd.stdout(err_pipe.as_ref().unwrap().1.try_clone()?);
        }
        StreamDecl::RedirToOutput => {
            cmd.stdout(out_pipe.as_ref().unwrap().1.try_clone()?);
        }
    }
    match opts.error {
        StreamDecl::Inherit => {}
        StreamDecl::Devnull => {
            cmd.stderr(Stdio::null());
        }
        StreamDecl::Piped | StreamDecl::Terminal => {
            cmd.stderr(err_pipe.as_ref().unwrap().1.try_clone()?);
        }
        StreamDecl::RedirToOutput => {
            cmd.stderr(out_pipe.as_ref().unwrap().1.try_clone()?);
        }
        StreamDecl::RedirToError => {
            cmd.stderr(err_pipe.as_ref().unwrap().1.try_clone()?);
        }
    }

    let child = cmd.spawn()?;
    // Drop the command and the original pipe ends so the copy threads see
    // EOF once the child exits.
    drop(cmd);

    let writer = match (input_writer, opts.input) {
        (Some(writer), Some(input)) => Some(writer_thread(writer, input.as_bytes().to_vec())),
        _ => None,
    };
    let out_reader = out_pipe.map(|(reader, writer)| {
        drop(writer);
        reader_thread(reader)
    });
    let err_reader = err_pipe.map(|(reader, writer)| {
        drop(writer);
        reader_thread(reader)
    });

    Ok((child, writer, out_reader, err_reader))
}

/// Run a program to completion, capturing whatever the dispositions pipe.
pub fn run(mut opts: RunOpts<'_>) -> Capture {
    let mut result = Capture::default();
    let mut debug = opts.debug.take();

    let Some(resolved) = resolve(opts.exec) else {
        result.return_code = -ENOENT;
        return result;
    };

    let (mut child, writer, out_reader, err_reader) = match spawn_wired(&resolved, &opts, &mut debug)
    {
        Ok(wired) => wired,
        Err(err) => {
            note(&mut debug, &format!("spawn: {err}"));
            result.return_code = SPAWN_FAILURE;
            return result;
        }
    };

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    if let Some(reader) = out_reader {
        result.output = capture_text(reader.join().unwrap_or_default());
    }
    if let Some(reader) = err_reader {
        result.error = capture_text(reader.join().unwrap_or_default());
    }

    result.return_code = match child.wait() {
        Ok(status) => fold_status(status),
        Err(err) => {
            note(&mut debug, &format!("wait: {err}"));
            SPAWN_FAILURE
        }
    };
    result
}

/// Run with stdout piped and discarded, returning only the exit code.
pub fn call(opts: RunOpts<'_>) -> i32 {
    run(RunOpts {
        output: StreamDecl::Piped,
        ..opts
    })
    .return_code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn captures_stdout() {
        let argv = args(&["hello"]);
        let capture = run(RunOpts {
            args: &argv,
            output: StreamDecl::Piped,
            error: StreamDecl::Piped,
            ..RunOpts::new(Path::new("echo"))
        });
        assert_eq!(capture.return_code, 0);
        assert_eq!(capture.output, "hello\n");
        assert_eq!(capture.error, "");
    }

    #[test]
    #[cfg(unix)]
    fn captures_stderr_separately() {
        let argv = args(&["-c", "echo out; echo err >&2"]);
        let capture = run(RunOpts {
            args: &argv,
            output: StreamDecl::Piped,
            error: StreamDecl::Piped,
            ..RunOpts::new(Path::new("sh"))
        });
        assert_eq!(capture.return_code, 0);
        assert_eq!(capture.output, "out\n");
        assert_eq!(capture.error, "err\n");
    }

    #[test]
    #[cfg(unix)]
    fn redirects_stderr_into_stdout() {
        let argv = args(&["-c", "echo err >&2"]);
        let capture = run(RunOpts {
            args: &argv,
            output: StreamDecl::Piped,
            error: StreamDecl::RedirToOutput,
            ..RunOpts::new(Path::new("sh"))
        });
        assert_eq!(capture.return_code, 0);
        assert_eq!(capture.output, "err\n");
        assert_eq!(capture.error, "");
    }

    #[test]
    fn missing_program_yields_enoent() {
        let capture = run(RunOpts::new(Path::new("no-such-program-470337")));
        assert_eq!(capture.return_code, -ENOENT);
        assert!(capture.output.is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn exit_code_is_sign_extended() {
        let argv = args(&["-c", "exit 254"]);
        let capture = run(RunOpts {
            args: &argv,
            output: StreamDecl::Piped,
            ..RunOpts::new(Path::new("sh"))
        });
        assert_eq!(capture.return_code, -2);
    }

    #[test]
    #[cfg(unix)]
    fn signal_death_reports_signal_number() {
        let argv = args(&["-c", "kill -9 $$"]);
        let capture = run(RunOpts {
            args: &argv,
            output: StreamDecl::Piped,
            ..RunOpts::new(Path::new("sh"))
        });
        assert_eq!(capture.return_code, 9);
    }

    #[test]
    fn feeds_input() {
        let capture = run(RunOpts {
            input: Some("pass-through"),
            output: StreamDecl::Piped,
            ..RunOpts::new(Path::new("cat"))
        });
        assert_eq!(capture.return_code, 0);
        assert_eq!(capture.output, "pass-through");
    }

    #[test]
    #[cfg(unix)]
    fn call_discards_output() {
        let argv = args(&["-c", "echo noise; exit 3"]);
        let code = call(RunOpts {
            args: &argv,
            ..RunOpts::new(Path::new("sh"))
        });
        assert_eq!(code, 3);
    }

    #[test]
    fn respects_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = std::collections::BTreeMap::new();
        env.insert("MARKER".to_string(), "present".to_string());
        env.insert("PATH".to_string(), crate::env::getenv("PATH"));
        let argv = args(&["-c", "pwd; echo $MARKER"]);
        let capture = run(RunOpts {
            args: &argv,
            cwd: Some(dir.path()),
            env: Some(&env),
            output: StreamDecl::Piped,
            ..RunOpts::new(Path::new("sh"))
        });
        assert_eq!(capture.return_code, 0);
        assert!(capture.output.contains("present"));
    }

    #[test]
    fn find_program_prefers_first_match() {
        assert!(find_program(["sh", "echo"]).is_some());
        assert!(find_program(["definitely-not-here-470337"]).is_none());
    }
}

//! Built-in command vocabulary.
//!
//! Prepare/post/cleanup lines are dispatched through a registry mapping a
//! command name to its minimum argument count and handler. Filesystem
//! commands are plain helpers; the four commands that touch per-test state
//! (`cd`, `store`, `mock`, `generate`) go through the [`CommandHost`] trait,
//! which the executor's test type implements.

use crate::proc::{self, RunOpts};
use crate::runtime::Runtime;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

/// Per-test capabilities needed by stateful commands.
pub trait CommandHost: Send {
    fn cwd(&self) -> &Path;
    /// Resolve a command argument against the per-test cwd.
    fn path(&self, p: &Path) -> PathBuf {
        self.cwd().join(p)
    }
    fn cd(&mut self, rt: &Runtime, dir: &Path) -> bool;
    fn store_variable(
        &mut self,
        rt: &Runtime,
        var: &str,
        call: &[String],
        listing: &mut String,
    ) -> bool;
    fn mock(&mut self, rt: &Runtime, exe: &str, link: &str) -> bool;
    fn generate(
        &mut self,
        rt: &Runtime,
        tmplt: &str,
        dst: &str,
        args: &[String],
        listing: &mut String,
    ) -> bool;
}

pub type Handler =
    Box<dyn Fn(&Runtime, &mut dyn CommandHost, &[String], &mut String) -> bool + Send + Sync>;

pub struct HandlerInfo {
    pub min_args: usize,
    pub run: Handler,
}

pub type HandlerMap = BTreeMap<String, HandlerInfo>;

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> bool {
    let Ok(target) = std::fs::read_link(src) else {
        return false;
    };
    std::os::unix::fs::symlink(target, dst).is_ok()
}

#[cfg(windows)]
fn copy_symlink(src: &Path, dst: &Path) -> bool {
    let Ok(target) = std::fs::read_link(src) else {
        return false;
    };
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(target, dst).is_ok()
    } else {
        std::os::windows::fs::symlink_file(target, dst).is_ok()
    }
}

/// Recursive copy preserving symlinks; regular files are hard-linked when
/// the filesystem allows it, otherwise copied.
pub fn copy_tree(src: &Path, dst: &Path) -> bool {
    if src.is_symlink() {
        return copy_symlink(src, dst);
    }
    if src.is_dir() {
        if std::fs::create_dir_all(dst).is_err() {
            return false;
        }
        let Ok(entries) = std::fs::read_dir(src) else {
            return false;
        };
        for entry in entries.flatten() {
            if !copy_tree(&entry.path(), &dst.join(entry.file_name())) {
                return false;
            }
        }
        return true;
    }
    if std::fs::hard_link(src, dst).is_ok() {
        return true;
    }
    std::fs::copy(src, dst).is_ok()
}

/// Clear every write-permission bit.
pub fn make_ro(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let mut perms = meta.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(perms.mode() & !0o222);
    }
    #[cfg(not(unix))]
    perms.set_readonly(true);
    std::fs::set_permissions(path, perms).is_ok()
}

pub fn mkdirs(path: &Path) -> bool {
    std::fs::create_dir_all(path).is_ok()
}

/// Remove a tree, a file, or nothing at all; a missing path is a success.
pub fn rmtree(path: &Path) -> bool {
    match std::fs::symlink_metadata(path) {
        Err(_) => true,
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path).is_ok(),
        Ok(_) => std::fs::remove_file(path).is_ok(),
    }
}

pub fn touch(path: &Path, content: Option<&str>) -> bool {
    if let Some(parent) = path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return false;
        }
    }
    std::fs::write(path, content.unwrap_or_default()).is_ok()
}

fn unpack_error(filename: &Path, msg: &str) -> bool {
    eprintln!("unpack: {}: {msg}", filename.display());
    false
}

fn sanitized(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for part in path.components() {
        match part {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => return None,
            Component::CurDir => {}
            Component::Normal(p) => out.push(p),
        }
    }
    Some(out)
}

fn unpack_tar(archive: impl Read, dst: &Path, filename: &Path) -> bool {
    let mut ar = tar::Archive::new(archive);
    let Ok(entries) = ar.entries() else {
        return unpack_error(filename, "archive damaged");
    };
    for entry in entries {
        let Ok(mut entry) = entry else {
            return unpack_error(filename, "archive damaged");
        };
        let Ok(entry_path) = entry.path() else {
            return unpack_error(filename, "archive damaged");
        };
        let Some(rel) = sanitized(&entry_path) else {
            return unpack_error(filename, "archive contains an unsafe path");
        };
        let out_path = dst.join(rel);
        if let Some(parent) = out_path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        if entry.unpack(&out_path).is_err() {
            return unpack_error(filename, "file compression damaged");
        }
    }
    true
}

fn unpack_zip(file: File, dst: &Path, filename: &Path) -> bool {
    let Ok(mut archive) = zip::ZipArchive::new(file) else {
        return unpack_error(filename, "archive damaged");
    };
    for index in 0..archive.len() {
        let Ok(mut entry) = archive.by_index(index) else {
            return unpack_error(filename, "archive damaged");
        };
        let name = entry.name().to_string();
        let Some(rel) = sanitized(Path::new(&name)) else {
            return unpack_error(filename, "archive contains an unsafe path");
        };
        let out_path = dst.join(rel);
        if entry.is_dir() {
            if std::fs::create_dir_all(&out_path).is_err() {
                return false;
            }
            continue;
        }
        if let Some(parent) = out_path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        let Ok(mut out) = File::create(&out_path) else {
            return false;
        };
        if std::io::copy(&mut entry, &mut out).is_err() {
            return unpack_error(filename, "file compression damaged");
        }
    }
    true
}

/// Extract an archive into `dst`, recognising zip, tar and gzipped tar by
/// their leading magic bytes.
pub fn unpack(filename: &Path, dst: &Path) -> bool {
    let Ok(mut file) = File::open(filename) else {
        return unpack_error(filename, "file not found");
    };
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic).unwrap_or(0);
    let Ok(file) = File::open(filename) else {
        return unpack_error(filename, "file not found");
    };

    if read >= 2 && magic[..2] == [0x1f, 0x8b] {
        return unpack_tar(flate2::read::GzDecoder::new(file), dst, filename);
    }
    if read >= 4 && magic == [b'P', b'K', 0x03, 0x04] {
        return unpack_zip(file, dst, filename);
    }
    if filename.extension().is_some_and(|ext| ext == "tar") {
        return unpack_tar(file, dst, filename);
    }
    unpack_error(filename, "unrecognized archive")
}

/// Drop into an interactive shell in the per-test cwd.
pub fn shell_out(host: &dyn CommandHost) -> bool {
    #[cfg(windows)]
    let shell_name = proc::find_program(["pwsh", "cmd"]);
    #[cfg(not(windows))]
    let shell_name = proc::find_program(["bash", "sh"]);

    let Some(shell_name) = shell_name else {
        return false;
    };
    let name = shell_name
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    println!("\n\x1b[0;32m> starting shell: \x1b[1;32m{name}\x1b[m\n");

    proc::run(RunOpts {
        cwd: Some(host.cwd()),
        ..RunOpts::new(&shell_name)
    });
    true
}

fn entry(min_args: usize, run: Handler) -> HandlerInfo {
    HandlerInfo { min_args, run }
}

/// The built-in registry. ProjectInfo adds the allowed tools and the target
/// itself on top of this.
pub fn builtin_handlers() -> HandlerMap {
    let mut map = HandlerMap::new();
    map.insert(
        "cd".to_string(),
        entry(1, Box::new(|rt, host, args, _| host.cd(rt, Path::new(&args[0])))),
    );
    map.insert(
        "cp".to_string(),
        entry(
            2,
            Box::new(|_, host, args, _| {
                copy_tree(&host.path(Path::new(&args[0])), &host.path(Path::new(&args[1])))
            }),
        ),
    );
    map.insert(
        "ro".to_string(),
        entry(1, Box::new(|_, host, args, _| make_ro(&host.path(Path::new(&args[0]))))),
    );
    map.insert(
        "mkdirs".to_string(),
        entry(1, Box::new(|_, host, args, _| mkdirs(&host.path(Path::new(&args[0]))))),
    );
    map.insert(
        "rm".to_string(),
        entry(1, Box::new(|_, host, args, _| rmtree(&host.path(Path::new(&args[0]))))),
    );
    map.insert(
        "touch".to_string(),
        entry(
            1,
            Box::new(|_, host, args, _| {
                touch(&host.path(Path::new(&args[0])), args.get(1).map(String::as_str))
            }),
        ),
    );
    map.insert(
        "unpack".to_string(),
        entry(
            2,
            Box::new(|_, host, args, _| {
                unpack(&host.path(Path::new(&args[0])), &host.path(Path::new(&args[1])))
            }),
        ),
    );
    map.insert(
        "store".to_string(),
        entry(
            2,
            Box::new(|rt, host, args, listing| {
                host.store_variable(rt, &args[0], &args[1..], listing)
            }),
        ),
    );
    map.insert(
        "mock".to_string(),
        entry(2, Box::new(|rt, host, args, _| host.mock(rt, &args[0], &args[1]))),
    );
    map.insert(
        "generate".to_string(),
        entry(
            2,
            Box::new(|rt, host, args, listing| {
                host.generate(rt, &args[0], &args[1], &args[2..], listing)
            }),
        ),
    );
    map.insert(
        "shell".to_string(),
        entry(0, Box::new(|_, host, _, _| shell_out(&*host))),
    );
    map
}

/// Handler for a ProjectInfo-allowed external tool: run it in the per-test
/// cwd, success meaning exit code zero.
pub fn tool_handler(name: String) -> HandlerInfo {
    entry(
        0,
        Box::new(move |_, host, args, listing| {
            let code = proc::call(RunOpts {
                args,
                cwd: Some(host.cwd()),
                debug: Some(listing),
                ..RunOpts::new(Path::new(&name))
            });
            code == 0
        }),
    )
}

/// Handler for the project target: run the staged binary in the per-test
/// cwd.
pub fn target_handler() -> HandlerInfo {
    entry(
        0,
        Box::new(move |rt, host, args, listing| {
            let code = proc::call(RunOpts {
                args,
                cwd: Some(host.cwd()),
                debug: Some(listing),
                ..RunOpts::new(&rt.rt_target)
            });
            code == 0
        }),
    )
}

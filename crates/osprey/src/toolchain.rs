//! External tools: writing artifacts and linking with the system C compiler.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use osprey_codegen::runtime::RuntimeLibrary;
use osprey_diag::{Category, Diagnostic};

/// Compiler drivers tried in order when `OSPREY_CC` is unset.
const LINKERS: &[&str] = &["cc", "clang", "gcc"];

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ToolchainError {
    #[error("failed to write IR to `{}`: {detail}", .path.display())]
    WriteIr { path: PathBuf, detail: String },

    #[error("failed to write object file `{}`: {detail}", .path.display())]
    WriteObject { path: PathBuf, detail: String },

    #[error("the backend produced no object code (was IR-only mode requested?)")]
    NoObject,

    #[error("linking `{}` with `{tool}` failed ({status})\n{log}", .output.display())]
    LinkFailed {
        tool: String,
        output: PathBuf,
        status: String,
        log: String,
    },

    #[error("external tool `{tool}` was not found")]
    MissingTool { tool: String },

    #[error("no suitable C compiler found (tried {})", .tried.join(", "))]
    NoCompiler { tried: Vec<String> },
}

impl ToolchainError {
    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic::error(Category::Toolchain, self.to_string())
            .with_help(Category::Toolchain.example_fix())
    }
}

pub fn write_ir(path: &Path, text: &str) -> Result<(), ToolchainError> {
    create_parent(path).and_then(|()| fs::write(path, text)).map_err(|err| {
        ToolchainError::WriteIr {
            path: path.to_path_buf(),
            detail: err.to_string(),
        }
    })
}

pub fn write_object(path: &Path, object: &[u8]) -> Result<(), ToolchainError> {
    create_parent(path)
        .and_then(|()| fs::write(path, object))
        .map_err(|err| ToolchainError::WriteObject {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Link `object` into an executable at `output`, adding the runtime archives
/// the module imports from.
pub fn link_executable(
    object: &[u8],
    output: &Path,
    libraries: &BTreeSet<RuntimeLibrary>,
) -> Result<(), ToolchainError> {
    let temp_object = std::env::temp_dir().join(format!("osprey-build-{}.o", std::process::id()));
    write_object(&temp_object, object)?;
    create_parent(output).map_err(|err| ToolchainError::WriteObject {
        path: output.to_path_buf(),
        detail: err.to_string(),
    })?;

    let args = link_arguments(&temp_object, output, libraries);
    let result = run_linkers(&args, output);
    let _ = fs::remove_file(&temp_object);
    result
}

fn run_linkers(args: &[OsString], output: &Path) -> Result<(), ToolchainError> {
    let candidates: Vec<String> = match std::env::var("OSPREY_CC") {
        Ok(tool) if !tool.is_empty() => vec![tool],
        _ => LINKERS.iter().map(|tool| tool.to_string()).collect(),
    };
    let explicit = candidates.len() == 1;

    let mut last_failure = None;
    for tool in &candidates {
        tracing::debug!(%tool, ?args, "linking");
        let run = match Command::new(tool).args(args).output() {
            Ok(run) => run,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if explicit {
                    return Err(ToolchainError::MissingTool { tool: tool.clone() });
                }
                continue;
            }
            Err(err) => {
                last_failure = Some(ToolchainError::LinkFailed {
                    tool: tool.clone(),
                    output: output.to_path_buf(),
                    status: "could not start".to_string(),
                    log: err.to_string(),
                });
                continue;
            }
        };
        if run.status.success() {
            return Ok(());
        }
        let mut log = String::from_utf8_lossy(&run.stderr).into_owned();
        log.push_str(&String::from_utf8_lossy(&run.stdout));
        last_failure = Some(ToolchainError::LinkFailed {
            tool: tool.clone(),
            output: output.to_path_buf(),
            status: run.status.to_string(),
            log,
        });
    }
    Err(last_failure.unwrap_or(ToolchainError::NoCompiler { tried: candidates }))
}

/// `<object> -o <output> [archives] -lpthread [-lssl -lcrypto]`. Dependents
/// come before their dependencies.
pub fn link_arguments(
    object: &Path,
    output: &Path,
    libraries: &BTreeSet<RuntimeLibrary>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        object.into(),
        "-o".into(),
        output.into(),
    ];
    for library in [RuntimeLibrary::Http, RuntimeLibrary::Fiber] {
        if !libraries.contains(&library) {
            continue;
        }
        let Some(archive) = library.archive() else {
            continue;
        };
        match find_runtime_archive(archive) {
            Some(path) => args.push(path.into()),
            None => tracing::warn!(archive, "runtime archive not found; relying on the linker"),
        }
    }
    if libraries.contains(&RuntimeLibrary::Fiber) {
        args.push("-lpthread".into());
    }
    if libraries.contains(&RuntimeLibrary::Http) {
        args.push("-lssl".into());
        args.push("-lcrypto".into());
    }
    args
}

/// Search `OSPREY_RUNTIME_DIR`, then `bin/` and `lib/` under the working
/// directory, next to the executable, and `/usr/local/lib`.
pub fn find_runtime_archive(name: &str) -> Option<PathBuf> {
    let file = format!("lib{name}.a");
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(dir) = std::env::var_os("OSPREY_RUNTIME_DIR") {
        dirs.push(dir.into());
    }
    dirs.push(PathBuf::from("bin"));
    dirs.push(PathBuf::from("lib"));
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir.join("..").join("lib"));
        dirs.push(exe_dir);
    }
    dirs.push(PathBuf::from("/usr/local/lib"));
    dirs.into_iter()
        .map(|dir| dir.join(&file))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libc_only_programs_link_without_extra_flags() {
        let libraries = BTreeSet::from([RuntimeLibrary::Libc]);
        let args = link_arguments(Path::new("a.o"), Path::new("out"), &libraries);
        assert_eq!(args, vec![OsString::from("a.o"), "-o".into(), "out".into()]);
    }

    #[test]
    fn fiber_programs_need_pthread() {
        let libraries = BTreeSet::from([RuntimeLibrary::Libc, RuntimeLibrary::Fiber]);
        let args = link_arguments(Path::new("a.o"), Path::new("out"), &libraries);
        assert_eq!(args.last(), Some(&OsString::from("-lpthread")));
        assert!(!args.contains(&OsString::from("-lssl")));
    }

    #[test]
    fn no_compiler_lists_every_candidate() {
        let err = ToolchainError::NoCompiler {
            tried: vec!["cc".into(), "clang".into()],
        };
        insta::assert_snapshot!(err.to_string(), @"no suitable C compiler found (tried cc, clang)");
        assert_eq!(err.diagnostic().category, Category::Toolchain);
    }

    #[test]
    fn writing_ir_creates_the_directory() {
        let dir = std::env::temp_dir().join(format!("osprey-ir-{}", std::process::id()));
        let path = dir.join("nested").join("out.clif");
        write_ir(&path, "function u0:0() {}").expect("written");
        assert_eq!(
            fs::read_to_string(&path).expect("readable"),
            "function u0:0() {}"
        );
        let _ = fs::remove_dir_all(&dir);
    }
}

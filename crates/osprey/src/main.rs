use std::path::{Path, PathBuf};
use std::process::ExitCode;

use osprey::{
    CompileError, CompileOptions, OptimizationLevel, SecurityConfig, compile_file,
    emit_diagnostics, emit_output, ir_only, toolchain,
};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_logging();
    let args = std::env::args().collect::<Vec<_>>();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Usage(message)) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
        Err(Failure::Compile(err)) => {
            emit_diagnostics(&[err.diagnostic()]);
            ExitCode::FAILURE
        }
    }
}

/// `OSPREY_LOG` takes an `EnvFilter` directive; the default only shows
/// warnings.
fn init_logging() {
    let filter = EnvFilter::try_from_env("OSPREY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug)]
enum Failure {
    Usage(String),
    Compile(CompileError),
}

impl From<CompileError> for Failure {
    fn from(err: CompileError) -> Self {
        Failure::Compile(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Print (or write) Cranelift IR.
    Ir {
        input: PathBuf,
        output: Option<PathBuf>,
        security: SecurityConfig,
    },
    /// Print the MIR dump.
    Mir {
        input: PathBuf,
        security: SecurityConfig,
    },
    Build {
        input: PathBuf,
        output: Option<PathBuf>,
        security: SecurityConfig,
        opt_level: OptimizationLevel,
    },
}

fn run(args: &[String]) -> Result<(), Failure> {
    match parse_cli(args).map_err(Failure::Usage)? {
        Command::Ir {
            input,
            output,
            security,
        } => {
            let artifact = compile_file(&input, &ir_only(security))?;
            match output {
                Some(path) => {
                    toolchain::write_ir(&path, &artifact.clif).map_err(CompileError::from)?
                }
                None => print!("{}", artifact.clif),
            }
        }
        Command::Mir { input, security } => {
            let artifact = compile_file(&input, &ir_only(security))?;
            print!("{}", artifact.mir);
        }
        Command::Build {
            input,
            output,
            security,
            opt_level,
        } => {
            let mut options = CompileOptions {
                security,
                ..CompileOptions::default()
            };
            options.backend.opt_level = opt_level;
            let artifact = compile_file(&input, &options)?;
            let output = output.unwrap_or_else(|| default_build_output_path(&input));
            emit_output(&artifact, &output)?;
            println!("built `{}`", output.display());
        }
    }
    Ok(())
}

fn parse_cli(args: &[String]) -> Result<Command, String> {
    if args.len() < 3 {
        return Err(usage());
    }
    let input = PathBuf::from(&args[2]);
    let mut output = None;
    let mut security = SecurityConfig::default();
    let mut opt_level = OptimizationLevel::Default;

    let mut idx = 3;
    while idx < args.len() {
        match args[idx].as_str() {
            "-o" | "--output" => {
                let Some(value) = args.get(idx + 1) else {
                    return Err("missing value for --output".to_string());
                };
                output = Some(PathBuf::from(value));
                idx += 1;
            }
            "--sandbox" => security = SecurityConfig::sandbox(),
            "--no-http" => security.allow_http = false,
            "--no-websocket" => security.allow_websocket = false,
            "--no-fs-read" => security.allow_file_read = false,
            "--no-fs-write" => security.allow_file_write = false,
            "--no-ffi" => security.allow_ffi = false,
            "--no-process" => security.allow_process_execution = false,
            "-O0" => opt_level = OptimizationLevel::None,
            "-O2" => opt_level = OptimizationLevel::Aggressive,
            unknown => return Err(format!("unknown argument `{unknown}`\n{}", usage())),
        }
        idx += 1;
    }

    match args[1].as_str() {
        "ir" => Ok(Command::Ir {
            input,
            output,
            security,
        }),
        "mir" if output.is_none() => Ok(Command::Mir { input, security }),
        "build" => Ok(Command::Build {
            input,
            output,
            security,
            opt_level,
        }),
        _ => Err(usage()),
    }
}

fn usage() -> String {
    "usage:\n  osprey ir <ast.json> [-o out.clif] [flags]\n  osprey mir <ast.json> [flags]\n  osprey build <ast.json> [-o output|output.o] [-O0|-O2] [flags]\n\nflags: --sandbox --no-http --no-websocket --no-fs-read --no-fs-write --no-ffi --no-process"
        .to_string()
}

fn default_build_output_path(input: &Path) -> PathBuf {
    input.with_extension("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_build_with_output_and_flags() {
        let command = parse_cli(&args(&[
            "osprey",
            "build",
            "main.json",
            "-o",
            "out/main.o",
            "--no-http",
            "-O2",
        ]))
        .expect("cli parse should succeed");
        let expected_security = SecurityConfig {
            allow_http: false,
            ..SecurityConfig::default()
        };
        assert_eq!(
            command,
            Command::Build {
                input: PathBuf::from("main.json"),
                output: Some(PathBuf::from("out/main.o")),
                security: expected_security,
                opt_level: OptimizationLevel::Aggressive,
            }
        );
    }

    #[test]
    fn sandbox_flag_disables_everything() {
        let command = parse_cli(&args(&["osprey", "ir", "main.json", "--sandbox"])).expect("parse");
        assert_eq!(
            command,
            Command::Ir {
                input: PathBuf::from("main.json"),
                output: None,
                security: SecurityConfig::sandbox(),
            }
        );
    }

    #[test]
    fn unknown_flags_and_commands_are_usage_errors() {
        assert!(parse_cli(&args(&["osprey", "ir", "main.json", "--fast"])).is_err());
        assert!(parse_cli(&args(&["osprey", "run", "main.json"])).is_err());
        assert!(parse_cli(&args(&["osprey", "build", "main.json", "-o"])).is_err());
        assert!(parse_cli(&args(&["osprey"])).is_err());
    }

    #[test]
    fn default_build_output_path_strips_extension() {
        assert_eq!(
            default_build_output_path(Path::new("demo/hello.json")),
            PathBuf::from("demo/hello")
        );
    }
}

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use osprey_ast::Program;
use osprey_codegen::runtime::{self, RuntimeLibrary};
use osprey_codegen::{Backend, BackendConfig, CodegenMode, CraneliftBackend, PassStats};
use osprey_diag::{Category, Diagnostic};
use osprey_hir::mono::{CacheStats, MonoError, monomorphize};
use osprey_infer::{TypeError, infer_program};
use osprey_mir::{CodegenError, LowerOptions, MirModule, SecurityConfig, lower_program};

use crate::toolchain::{self, ToolchainError};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileOptions {
    pub security: SecurityConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledArtifact {
    pub clif: String,
    pub mir: MirModule,
    pub specializations: CacheStats,
    pub stats: PassStats,
    /// Present in AOT mode.
    pub object: Option<Vec<u8>>,
    pub libraries: BTreeSet<RuntimeLibrary>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("invalid AST input: {detail}")]
    InvalidAst { detail: String },

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Mono(#[from] MonoError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
}

impl CompileError {
    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            CompileError::InvalidAst { .. } => {
                Diagnostic::error(Category::Unsupported, self.to_string())
            }
            CompileError::Type(err) => err.diagnostic(),
            CompileError::Mono(err) => {
                let category = match err {
                    MonoError::UnknownFunction { .. } => Category::UndefinedName,
                    MonoError::SchemeMismatch { .. } => Category::TypeMismatch,
                };
                Diagnostic::error(category, err.to_string())
            }
            CompileError::Codegen(err) => err.diagnostic(),
            CompileError::Toolchain(err) => err.diagnostic(),
        }
    }
}

pub type CompileResult = Result<CompiledArtifact, CompileError>;

/// Infer, specialize, lower and run the backend.
pub fn compile_program(program: &Program, options: &CompileOptions) -> CompileResult {
    let hir = infer_program(program)?;
    tracing::debug!(functions = hir.functions.len(), "inference finished");

    let mono = monomorphize(&hir)?;
    tracing::debug!(
        specializations = mono.stats.entries,
        hits = mono.stats.hits,
        "monomorphization finished"
    );

    let mir = lower_program(
        &mono,
        &LowerOptions {
            security: options.security,
        },
    )?;
    tracing::debug!(functions = mir.functions.len(), "lowered to MIR");

    let artifact = CraneliftBackend.compile_module(&mir, &options.backend)?;
    Ok(CompiledArtifact {
        clif: artifact.clif,
        libraries: runtime::required_libraries(&mir),
        mir,
        specializations: mono.stats,
        stats: artifact.stats,
        object: artifact.object,
    })
}

pub fn parse_program(json: &str) -> Result<Program, CompileError> {
    serde_json::from_str(json).map_err(|err| CompileError::InvalidAst {
        detail: err.to_string(),
    })
}

pub fn compile_json(json: &str, options: &CompileOptions) -> CompileResult {
    compile_program(&parse_program(json)?, options)
}

pub fn compile_file(input: &Path, options: &CompileOptions) -> CompileResult {
    let json = fs::read_to_string(input).map_err(|err| CompileError::InvalidAst {
        detail: format!("failed to read `{}`: {err}", input.display()),
    })?;
    compile_json(&json, options)
}

/// Write the object (`.o` output) or link an executable.
pub fn emit_output(artifact: &CompiledArtifact, output: &Path) -> Result<(), CompileError> {
    let object = artifact.object.as_deref().ok_or(ToolchainError::NoObject)?;
    if output.extension().and_then(|ext| ext.to_str()) == Some("o") {
        toolchain::write_object(output, object)?;
    } else {
        toolchain::link_executable(object, output, &artifact.libraries)?;
    }
    Ok(())
}

pub fn ir_only(security: SecurityConfig) -> CompileOptions {
    CompileOptions {
        security,
        backend: BackendConfig {
            mode: CodegenMode::IrOnly,
            ..BackendConfig::default()
        },
    }
}

pub fn emit_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!("{diagnostic}");
    }
}

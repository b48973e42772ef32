//! The Osprey compiler driver.
//!
//! Runs inference, monomorphization, MIR lowering and the Cranelift backend
//! over an AST handed over as JSON, and links the result with the system C
//! compiler.

mod compiler;
pub mod toolchain;

pub use compiler::{
    CompileError, CompileOptions, CompileResult, CompiledArtifact, compile_file, compile_json,
    compile_program, emit_diagnostics, emit_output, ir_only, parse_program,
};
pub use osprey_codegen::{BackendConfig, CodegenMode, OptimizationLevel};
pub use osprey_mir::SecurityConfig;
pub use toolchain::ToolchainError;

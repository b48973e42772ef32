//! Cranelift backend for Osprey MIR.
//!
//! The backend consumes a finished [`MirModule`] and produces the Cranelift
//! IR text for every function plus, in AOT mode, a relocatable object file.
//! Linking against the fiber/HTTP runtimes is left to the driver; the
//! [`runtime`] table tells it which libraries a module needs.

use std::collections::BTreeMap;
use std::sync::Arc;

use cranelift::prelude::{AbiParam, Configurable, types};
use cranelift_codegen::ir::Signature;
use cranelift_codegen::{isa, settings};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use cranelift_object::{ObjectBuilder, ObjectModule};
use osprey_mir::{
    CodegenError, MirCallee, MirFunction, MirInst, MirLinkage, MirModule, MirSignature, MirType,
    abi,
};

mod clif;
pub mod runtime;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub target_triple: String,
    pub opt_level: OptimizationLevel,
    pub mode: CodegenMode,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            target_triple: "host".to_string(),
            opt_level: OptimizationLevel::Default,
            mode: CodegenMode::Aot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    None,
    Default,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenMode {
    /// Emit an object file alongside the IR text.
    Aot,
    /// Stop after Cranelift IR; no object bytes.
    IrOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendArtifact {
    /// Cranelift IR of every defined function, in definition order.
    pub clif: String,
    /// `None` in [`CodegenMode::IrOnly`].
    pub object: Option<Vec<u8>>,
    pub stats: PassStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PassStats {
    pub imports: usize,
    pub data_objects: usize,
    pub per_function: Vec<FunctionPassStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionPassStats {
    pub function: String,
    pub block_count: usize,
    pub instruction_count: usize,
    pub call_count: usize,
    pub alloc_count: usize,
}

pub trait Backend {
    fn name(&self) -> &'static str;

    fn compile_module(
        &self,
        module: &MirModule,
        config: &BackendConfig,
    ) -> Result<BackendArtifact, CodegenError>;
}

#[derive(Debug, Default)]
pub struct CraneliftBackend;

impl Backend for CraneliftBackend {
    fn name(&self) -> &'static str {
        "cranelift"
    }

    fn compile_module(
        &self,
        module: &MirModule,
        config: &BackendConfig,
    ) -> Result<BackendArtifact, CodegenError> {
        validate_module(module)?;
        let isa = build_isa(config)?;
        let stats = collect_pass_stats(module);

        let builder = ObjectBuilder::new(isa, "osprey", cranelift_module::default_libcall_names())
            .map_err(|detail| CodegenError::Module {
                detail: detail.to_string(),
            })?;
        let mut object_module = ObjectModule::new(builder);
        let clif = compile_into_module(&mut object_module, module)?;

        let object = match config.mode {
            CodegenMode::IrOnly => None,
            CodegenMode::Aot => {
                let product = object_module.finish();
                let bytes = product.emit().map_err(|detail| CodegenError::ObjectEmit {
                    detail: detail.to_string(),
                })?;
                tracing::debug!(bytes = bytes.len(), "object emitted");
                Some(bytes)
            }
        };

        Ok(BackendArtifact {
            clif,
            object,
            stats,
        })
    }
}

fn build_isa(config: &BackendConfig) -> Result<Arc<dyn isa::TargetIsa>, CodegenError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", opt_level_setting(config.opt_level))
        .map_err(|detail| CodegenError::Module {
            detail: detail.to_string(),
        })?;
    flag_builder
        .set("preserve_frame_pointers", "true")
        .map_err(|detail| CodegenError::Module {
            detail: detail.to_string(),
        })?;
    if matches!(config.mode, CodegenMode::Aot) {
        flag_builder
            .set("is_pic", "true")
            .map_err(|detail| CodegenError::Module {
                detail: detail.to_string(),
            })?;
        flag_builder
            .set("use_colocated_libcalls", "false")
            .map_err(|detail| CodegenError::Module {
                detail: detail.to_string(),
            })?;
    }

    if config.target_triple != "host" {
        return Err(CodegenError::UnsupportedTarget {
            target: config.target_triple.clone(),
        });
    }
    let isa_builder = cranelift_native::builder().map_err(|detail| CodegenError::Module {
        detail: format!("host ISA not supported: {detail}"),
    })?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|detail| CodegenError::Module {
            detail: detail.to_string(),
        })?;
    // Every MIR handle and heap cell is an i64 word.
    if isa.pointer_type() != types::I64 {
        return Err(CodegenError::UnsupportedTarget {
            target: isa.triple().to_string(),
        });
    }
    Ok(isa)
}

fn opt_level_setting(level: OptimizationLevel) -> &'static str {
    match level {
        OptimizationLevel::None => "none",
        OptimizationLevel::Default => "speed",
        OptimizationLevel::Aggressive => "speed_and_size",
    }
}

/// Reject references the backend could not resolve, before touching
/// Cranelift.
pub fn validate_module(module: &MirModule) -> Result<(), CodegenError> {
    let defined = |name: &str| module.function(name).is_some();
    for function in &module.functions {
        for inst in function.instructions() {
            match inst {
                MirInst::Call {
                    callee: MirCallee::Local(name),
                    ..
                }
                | MirInst::FuncAddr { function: name, .. } => {
                    if !defined(name) {
                        return Err(CodegenError::UnknownFunction { name: name.clone() });
                    }
                }
                MirInst::Call {
                    callee: MirCallee::External(name),
                    ..
                } => {
                    if !module.externals.contains_key(name) {
                        return Err(CodegenError::UnknownFunction { name: name.clone() });
                    }
                }
                MirInst::DataAddr { data, .. } => {
                    if !module.data.iter().any(|d| &d.name == data) {
                        return Err(CodegenError::Module {
                            detail: format!("`{}` references undeclared data `{data}`", function.name),
                        });
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

pub fn collect_pass_stats(module: &MirModule) -> PassStats {
    PassStats {
        imports: module.externals.len(),
        data_objects: module.data.len(),
        per_function: module.functions.iter().map(function_stats).collect(),
    }
}

fn function_stats(function: &MirFunction) -> FunctionPassStats {
    let mut stats = FunctionPassStats {
        function: function.name.clone(),
        block_count: function.blocks.len(),
        ..FunctionPassStats::default()
    };
    for inst in function.instructions() {
        stats.instruction_count += 1;
        match inst {
            MirInst::Call { callee, .. } => {
                stats.call_count += 1;
                if callee.name() == abi::MALLOC {
                    stats.alloc_count += 1;
                }
            }
            MirInst::CallIndirect { .. } => stats.call_count += 1,
            _ => {}
        }
    }
    stats
}

/// Symbols declared in the Cranelift module, by MIR name.
pub(crate) struct Symbols {
    pub functions: BTreeMap<String, FuncId>,
    pub data: BTreeMap<String, DataId>,
}

fn compile_into_module<M: Module>(module: &mut M, mir: &MirModule) -> Result<String, CodegenError> {
    let mut symbols = Symbols {
        functions: BTreeMap::new(),
        data: BTreeMap::new(),
    };

    for data in &mir.data {
        let id = module
            .declare_data(&data.name, Linkage::Local, false, false)
            .map_err(|detail| CodegenError::Module {
                detail: detail.to_string(),
            })?;
        let mut description = DataDescription::new();
        description.define(data.bytes.clone().into_boxed_slice());
        module
            .define_data(id, &description)
            .map_err(|detail| CodegenError::Module {
                detail: detail.to_string(),
            })?;
        symbols.data.insert(data.name.clone(), id);
    }

    for (name, signature) in &mir.externals {
        let signature = clif_signature(module, signature);
        let id = module
            .declare_function(name, Linkage::Import, &signature)
            .map_err(|detail| CodegenError::Module {
                detail: detail.to_string(),
            })?;
        symbols.functions.insert(name.clone(), id);
    }

    for function in &mir.functions {
        let signature = clif_signature(module, &function.signature);
        let linkage = match function.linkage {
            MirLinkage::Export => Linkage::Export,
            MirLinkage::Local => Linkage::Local,
        };
        let id = module
            .declare_function(&function.name, linkage, &signature)
            .map_err(|detail| CodegenError::Module {
                detail: detail.to_string(),
            })?;
        symbols.functions.insert(function.name.clone(), id);
    }

    let mut text = String::new();
    let mut builder_context = cranelift::prelude::FunctionBuilderContext::new();
    for function in &mir.functions {
        let mut context = module.make_context();
        context.func.signature = clif_signature(module, &function.signature);
        clif::translate_function(module, &symbols, function, &mut context.func, &mut builder_context)?;
        text.push_str(&context.func.display().to_string());
        text.push('\n');

        let id = symbols
            .functions
            .get(&function.name)
            .copied()
            .ok_or_else(|| CodegenError::UnknownFunction {
                name: function.name.clone(),
            })?;
        module
            .define_function(id, &mut context)
            .map_err(|detail| CodegenError::Module {
                detail: format!("`{}`: {detail:?}", function.name),
            })?;
        tracing::debug!(function = %function.name, "function defined");
        module.clear_context(&mut context);
    }
    Ok(text)
}

pub(crate) fn clif_type(ty: MirType) -> types::Type {
    match ty {
        MirType::I8 => types::I8,
        MirType::I32 => types::I32,
        MirType::I64 => types::I64,
        MirType::F64 => types::F64,
    }
}

pub(crate) fn clif_signature<M: Module>(module: &M, signature: &MirSignature) -> Signature {
    let mut out = module.make_signature();
    for param in &signature.params {
        out.params.push(AbiParam::new(clif_type(*param)));
    }
    if let Some(ret) = signature.ret {
        out.returns.push(AbiParam::new(clif_type(ret)));
    }
    out
}

use osprey_mir::{
    MirBinaryOp, MirBuilder, MirCallee, MirCond, MirData, MirLinkage, MirSignature, MirTerminator,
    MirType, abi,
};

use super::*;

fn answer() -> MirFunction {
    let mut b = MirBuilder::new(
        "main",
        MirSignature::new(vec![], Some(MirType::I32)),
        MirLinkage::Export,
    );
    let value = b.iconst(MirType::I32, 42);
    b.terminate(MirTerminator::Return { value: Some(value) });
    b.finish()
}

fn module_of(functions: Vec<MirFunction>) -> MirModule {
    MirModule {
        functions,
        ..MirModule::default()
    }
}

fn compile(module: &MirModule, mode: CodegenMode) -> Result<BackendArtifact, CodegenError> {
    CraneliftBackend.compile_module(
        module,
        &BackendConfig {
            mode,
            ..BackendConfig::default()
        },
    )
}

#[test]
fn aot_emits_object_and_ir_text() {
    let artifact = compile(&module_of(vec![answer()]), CodegenMode::Aot).expect("compiles");
    assert!(artifact.clif.contains("iconst.i32 42"), "{}", artifact.clif);
    assert!(artifact.object.is_some_and(|bytes| !bytes.is_empty()));
}

#[test]
fn ir_only_mode_skips_the_object() {
    let artifact = compile(&module_of(vec![answer()]), CodegenMode::IrOnly).expect("compiles");
    assert!(artifact.object.is_none());
    assert!(artifact.clif.contains("return"));
}

#[test]
fn foreign_target_is_rejected() {
    let err = CraneliftBackend
        .compile_module(
            &module_of(vec![answer()]),
            &BackendConfig {
                target_triple: "riscv32-unknown-none-elf".into(),
                ..BackendConfig::default()
            },
        )
        .expect_err("unsupported");
    assert_eq!(
        err,
        CodegenError::UnsupportedTarget {
            target: "riscv32-unknown-none-elf".into()
        }
    );
}

#[test]
fn calls_to_undefined_functions_fail_validation() {
    let mut b = MirBuilder::new(
        "main",
        MirSignature::new(vec![], Some(MirType::I32)),
        MirLinkage::Export,
    );
    let value = b.call(MirCallee::Local("missing".into()), vec![], MirType::I32);
    b.terminate(MirTerminator::Return { value: Some(value) });
    let err = compile(&module_of(vec![b.finish()]), CodegenMode::IrOnly).expect_err("unknown");
    insta::assert_snapshot!(err.to_string(), @"unknown function `missing`");
    assert_eq!(
        err,
        CodegenError::UnknownFunction {
            name: "missing".into()
        }
    );
}

/// `sum(n)` counts down with a variable and a switch on `n == 0`.
#[test]
fn loops_with_variables_and_switches_compile() {
    let mut b = MirBuilder::new(
        "sum",
        MirSignature::new(vec![MirType::I64], Some(MirType::I64)),
        MirLinkage::Local,
    );
    let n = b.param(0);
    let total = b.declare_var(MirType::I64);
    let counter = b.declare_var(MirType::I64);
    let zero = b.iconst(MirType::I64, 0);
    b.def_var(total, zero);
    b.def_var(counter, n);
    let head = b.create_block();
    let body = b.create_block();
    let exit = b.create_block();
    b.jump(head);

    b.switch_to(head);
    let current = b.use_var(counter);
    let zero = b.iconst(MirType::I64, 0);
    let done = b.binary(MirBinaryOp::ICmp(MirCond::Eq), current, zero);
    let done = b.convert(osprey_mir::MirConvert::Uextend(MirType::I64), done);
    b.terminate(MirTerminator::Switch {
        value: done,
        cases: vec![(1, exit)],
        default: body,
    });

    b.switch_to(body);
    let current = b.use_var(counter);
    let acc = b.use_var(total);
    let acc = b.binary(MirBinaryOp::IAdd, acc, current);
    b.def_var(total, acc);
    let one = b.iconst(MirType::I64, 1);
    let next = b.binary(MirBinaryOp::ISub, current, one);
    b.def_var(counter, next);
    b.jump(head);

    b.switch_to(exit);
    let result = b.use_var(total);
    b.terminate(MirTerminator::Return {
        value: Some(result),
    });

    let artifact = compile(&module_of(vec![b.finish(), answer()]), CodegenMode::Aot)
        .expect("loop compiles");
    assert!(artifact.clif.contains("function"));
    let sum = &artifact.stats.per_function[0];
    assert_eq!(sum.function, "sum");
    assert_eq!(sum.block_count, 4);
}

#[test]
fn string_data_and_imports_are_declared() {
    let mut b = MirBuilder::new(
        "main",
        MirSignature::new(vec![], Some(MirType::I32)),
        MirLinkage::Export,
    );
    let text = b.data_addr("str0");
    let size = b.iconst(MirType::I64, 16);
    let _cell = b.call(MirCallee::External(abi::MALLOC.into()), vec![size], MirType::I64);
    b.call_void(MirCallee::External(abi::PUTS.into()), vec![text]);
    let zero = b.iconst(MirType::I32, 0);
    b.terminate(MirTerminator::Return { value: Some(zero) });

    let mut module = module_of(vec![b.finish()]);
    module.data.push(MirData {
        name: "str0".into(),
        bytes: b"hello\0".to_vec(),
    });
    for symbol in [abi::MALLOC, abi::PUTS] {
        let signature = abi::signature(symbol).expect("libc symbol");
        module.externals.insert(symbol.into(), signature);
    }

    let artifact = compile(&module, CodegenMode::Aot).expect("compiles");
    assert_eq!(artifact.stats.imports, 2);
    assert_eq!(artifact.stats.data_objects, 1);
    let main = &artifact.stats.per_function[0];
    assert_eq!(main.call_count, 2);
    assert_eq!(main.alloc_count, 1);
}

#[test]
fn opt_levels_map_to_cranelift_settings() {
    assert_eq!(opt_level_setting(OptimizationLevel::None), "none");
    assert_eq!(opt_level_setting(OptimizationLevel::Default), "speed");
    assert_eq!(
        opt_level_setting(OptimizationLevel::Aggressive),
        "speed_and_size"
    );
}

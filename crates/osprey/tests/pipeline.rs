//! End-to-end compilation from AST to Cranelift IR and object code.

use osprey::{
    CompileError, CompileOptions, SecurityConfig, ToolchainError, compile_json, compile_program,
    emit_output, ir_only,
};
use osprey_ast::build::*;
use osprey_ast::{BinOp, Program, Stmt, TypeExpr};
use osprey_codegen::runtime::RuntimeLibrary;
use osprey_diag::Category;
use osprey_mir::CodegenError;

fn hello() -> Program {
    program(vec![expr_stmt(call("print", vec![string("hello")]))])
}

fn compile_ir(statements: Vec<Stmt>) -> Result<osprey::CompiledArtifact, CompileError> {
    compile_program(&program(statements), &ir_only(SecurityConfig::default()))
}

#[test]
fn hello_world_produces_an_object() {
    let artifact = compile_program(&hello(), &CompileOptions::default()).expect("compiles");
    assert!(artifact.clif.contains("function"));
    assert!(artifact.object.as_ref().is_some_and(|o| !o.is_empty()));
    assert!(artifact.mir.function("main").is_some());
    assert!(artifact.libraries.iter().all(|l| *l == RuntimeLibrary::Libc));
}

#[test]
fn ast_is_accepted_as_json() {
    let json = serde_json::to_string(&hello()).expect("serializes");
    let artifact = compile_json(&json, &ir_only(SecurityConfig::default())).expect("compiles");
    assert!(artifact.object.is_none());
    assert!(artifact.clif.contains("call"));
}

#[test]
fn malformed_json_is_reported_as_invalid_input() {
    let err = compile_json("{\"statements\": 3}", &CompileOptions::default()).expect_err("bad");
    assert!(matches!(err, CompileError::InvalidAst { .. }));
}

#[test]
fn same_concrete_call_sites_share_one_specialization() {
    let artifact = compile_ir(vec![
        fn_stmt(fn_decl("identity", vec![param("x")], var("x"))),
        expr_stmt(call("print", vec![call("identity", vec![int(1)])])),
        expr_stmt(call("print", vec![call("identity", vec![int(2)])])),
    ])
    .expect("compiles");
    assert_eq!(artifact.specializations.entries, 1);
    assert_eq!(artifact.specializations.hits, 1);
    let identities = artifact
        .mir
        .functions
        .iter()
        .filter(|f| f.name.starts_with("identity"))
        .count();
    assert_eq!(identities, 1);
}

#[test]
fn field_access_on_int_is_a_type_error() {
    let err = compile_ir(vec![expr_stmt(field(int(42), "value"))]).expect_err("rejected");
    assert!(matches!(err, CompileError::Type(_)));
    let diagnostic = err.diagnostic();
    assert_eq!(diagnostic.category, Category::UnknownField);
    assert!(diagnostic.message.contains("value"));
    assert!(diagnostic.message.contains("Int"));
}

#[test]
fn unhandled_effect_renders_a_diagnostic() {
    let err = compile_ir(vec![
        effect_stmt(
            "Logger",
            vec![("log", vec![TypeExpr::named("String")], TypeExpr::named("Unit"))],
        ),
        expr_stmt(perform("Logger", "log", vec![string("hi")])),
    ])
    .expect_err("unhandled");
    insta::assert_snapshot!(err.diagnostic().to_string(), @r"
    error[E0008]: unhandled effect operation `Logger.log`
      help: Wrap the call in a `handle ... in` expression.
    ");
}

#[test]
fn division_by_literal_zero_has_no_divide() {
    let artifact = compile_ir(vec![expr_stmt(call(
        "print",
        vec![arith(BinOp::Div, int(10), int(0))],
    ))])
    .expect("compiles");
    assert!(!artifact.clif.contains("sdiv"));
}

#[test]
fn sandbox_rejects_http_calls() {
    let statements = vec![expr_stmt(call(
        "httpCreateClient",
        vec![string("http://x"), int(1000)],
    ))];
    let err = compile_program(&program(statements), &ir_only(SecurityConfig::sandbox()))
        .expect_err("blocked");
    assert!(matches!(
        err,
        CompileError::Codegen(CodegenError::UnsupportedCall { .. })
    ));
    assert_eq!(err.diagnostic().category, Category::SecurityViolation);
}

#[test]
fn fibers_require_the_fiber_runtime() {
    let artifact = compile_ir(vec![
        let_stmt("f", spawn(arith(BinOp::Add, int(1), int(2)))),
        expr_stmt(call("print", vec![await_(var("f"))])),
    ])
    .expect("compiles");
    assert!(artifact.libraries.contains(&RuntimeLibrary::Fiber));
    assert!(artifact.mir.externals.contains_key("fiber_spawn"));
}

#[test]
fn ir_only_artifacts_cannot_be_linked() {
    let artifact = compile_ir(vec![expr_stmt(call("print", vec![int(1)]))]).expect("compiles");
    let err = emit_output(&artifact, std::path::Path::new("never.o")).expect_err("no object");
    assert_eq!(err, CompileError::Toolchain(ToolchainError::NoObject));
}

#[test]
fn object_output_is_written_verbatim() {
    let artifact = compile_program(&hello(), &CompileOptions::default()).expect("compiles");
    let path = std::env::temp_dir().join(format!("osprey-pipeline-{}.o", std::process::id()));
    emit_output(&artifact, &path).expect("written");
    let written = std::fs::read(&path).expect("readable");
    assert_eq!(Some(written), artifact.object);
    let _ = std::fs::remove_file(&path);
}

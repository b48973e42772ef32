use osprey_ast::build::*;
use osprey_ast::{BinOp, Expr, Stmt, TypeExpr};
use osprey_hir::mono::monomorphize;
use osprey_infer::infer_program;

use super::*;
use crate::concurrency;
use crate::{MirInst, MirLiteral, MirModule};

fn lower_with(statements: Vec<Stmt>, options: &LowerOptions) -> Result<MirModule, CodegenError> {
    let hir = infer_program(&program(statements)).expect("program should typecheck");
    let mono = monomorphize(&hir).expect("program should monomorphize");
    lower_program(&mono, options)
}

fn lower(statements: Vec<Stmt>) -> Result<MirModule, CodegenError> {
    lower_with(statements, &LowerOptions::default())
}

fn has_division(module: &MirModule) -> bool {
    module
        .functions
        .iter()
        .flat_map(|f| f.instructions())
        .any(|inst| matches!(inst, MirInst::Binary { op, .. } if op.is_division()))
}

fn calls(module: &MirModule, function: &str, callee: &str) -> bool {
    module.function(function).is_some_and(|f| {
        f.instructions()
            .any(|inst| matches!(inst, MirInst::Call { callee: c, .. } if c.name() == callee))
    })
}

fn logger() -> Stmt {
    effect_stmt(
        "Logger",
        vec![("log", vec![TypeExpr::named("String")], TypeExpr::named("Unit"))],
    )
}

fn log(message: Expr) -> Expr {
    perform("Logger", "log", vec![message])
}

// -- builtins ---------------------------------------------------------------

#[test]
fn to_string_accepts_scalars() {
    for value in [int(42), boolean(true), string("x")] {
        let module = lower(vec![expr_stmt(call("toString", vec![value]))]);
        assert!(module.is_ok(), "{module:?}");
    }
}

#[test]
fn to_string_arity_is_checked() {
    for (args, found) in [(vec![], 0), (vec![int(1), int(2)], 2)] {
        let err = lower(vec![expr_stmt(call("toString", args))]).expect_err("arity");
        assert_eq!(
            err,
            CodegenError::WrongArgumentCount {
                function: "toString".into(),
                expected: 1,
                found,
            }
        );
    }
}

#[test]
fn named_builtin_arguments_are_reordered() {
    let module = lower(vec![expr_stmt(call(
        "print",
        vec![call_named(
            "contains",
            vec![("needle", string("b")), ("haystack", string("abc"))],
        )],
    ))])
    .expect("lowers");
    assert!(calls(&module, ENTRY_SYMBOL, abi::STRSTR));
}

#[test]
fn unknown_named_builtin_argument_is_rejected() {
    let err = lower(vec![expr_stmt(call_named("length", vec![("str", string("a"))]))])
        .expect_err("unknown name");
    assert!(matches!(err, CodegenError::UnknownNamedArgument { name, .. } if name == "str"));
}

#[test]
fn sandbox_blocks_file_reads() {
    let stmts = || vec![expr_stmt(call("readFile", vec![string("in.txt")]))];
    let err = lower_with(
        stmts(),
        &LowerOptions {
            security: SecurityConfig::sandbox(),
        },
    )
    .expect_err("blocked");
    assert_eq!(
        err,
        CodegenError::UnsupportedCall {
            function: "readFile".into(),
            permission: "file-read",
        }
    );

    let module = lower(stmts()).expect("allowed by default");
    assert!(module.externals.contains_key("osprey_read_file"));
}

#[test]
fn string_equality_uses_strcmp() {
    let module = lower(vec![expr_stmt(call(
        "print",
        vec![binary(BinOp::Eq, string("a"), string("b"))],
    ))])
    .expect("lowers");
    assert!(calls(&module, ENTRY_SYMBOL, abi::STRCMP));
}

// -- arithmetic -------------------------------------------------------------

#[test]
fn literal_zero_division_emits_no_divide() {
    let module = lower(vec![expr_stmt(call(
        "print",
        vec![arith(BinOp::Div, int(5), int(0))],
    ))])
    .expect("lowers");
    assert!(!has_division(&module));
}

#[test]
fn runtime_divisor_is_checked() {
    let half = fn_decl(
        "half",
        vec![typed_param("x", TypeExpr::named("Int"))],
        arith(BinOp::Div, var("x"), int(2)),
    );
    let module = lower(vec![
        fn_stmt(half),
        expr_stmt(call("print", vec![call("half", vec![int(8)])])),
    ])
    .expect("lowers");
    assert!(has_division(&module));
    assert!(
        module
            .data
            .iter()
            .any(|d| d.bytes.starts_with(b"Division by zero"))
    );
}

// -- effects ----------------------------------------------------------------

#[test]
fn effect_declarations_emit_nothing() {
    let body = || expr_stmt(call("print", vec![int(1)]));
    let plain = lower(vec![body()]).expect("lowers");
    let with_effects = lower(vec![
        logger(),
        effect_stmt(
            "State",
            vec![("get", vec![], TypeExpr::named("Int"))],
        ),
        body(),
    ])
    .expect("lowers");
    assert_eq!(plain, with_effects);
    assert_eq!(plain.to_string(), with_effects.to_string());
}

#[test]
fn perform_outside_handler_is_unhandled() {
    let err = lower(vec![logger(), expr_stmt(log(string("hi")))]).expect_err("unhandled");
    assert_eq!(
        err,
        CodegenError::UnhandledEffect {
            effect: "Logger".into(),
            operation: "log".into(),
        }
    );
}

#[test]
fn handler_arm_is_inlined_at_perform() {
    let module = lower(vec![
        logger(),
        expr_stmt(handle(
            "Logger",
            vec![handler_arm("log", &["msg"], call("print", vec![var("msg")]))],
            log(string("hi")),
        )),
    ])
    .expect("lowers");
    assert!(calls(&module, ENTRY_SYMBOL, abi::PUTS));
    assert_eq!(module.functions.len(), 1);
}

#[test]
fn perform_inside_arm_reaches_outer_handler() {
    let outer = handler_arm("log", &["msg"], call("print", vec![var("msg")]));
    let inner = handler_arm("log", &["msg"], log(var("msg")));
    let module = lower(vec![
        logger(),
        expr_stmt(handle(
            "Logger",
            vec![outer],
            handle("Logger", vec![inner], log(string("hi"))),
        )),
    ])
    .expect("inner arm resolves against the outer frame");
    assert!(calls(&module, ENTRY_SYMBOL, abi::PUTS));
}

#[test]
fn effectful_function_is_inlined_not_compiled() {
    let mut greet = fn_decl("greet", vec![], log(string("hello")));
    greet.effects = vec!["Logger".into()];
    let module = lower(vec![
        logger(),
        fn_stmt(greet),
        expr_stmt(handle(
            "Logger",
            vec![handler_arm("log", &["msg"], call("print", vec![var("msg")]))],
            call("greet", vec![]),
        )),
    ])
    .expect("lowers");
    assert!(module.function("greet").is_none());
    assert!(calls(&module, ENTRY_SYMBOL, abi::PUTS));
}

#[test]
fn recursive_effectful_function_is_circular() {
    let mut again = fn_decl(
        "again",
        vec![],
        block(vec![expr_stmt(log(string("tick")))], Some(call("again", vec![]))),
    );
    again.effects = vec!["Logger".into()];
    let err = lower(vec![
        logger(),
        fn_stmt(again),
        expr_stmt(handle(
            "Logger",
            vec![handler_arm("log", &["msg"], call("print", vec![var("msg")]))],
            call("again", vec![]),
        )),
    ])
    .expect_err("circular");
    assert!(
        matches!(&err, CodegenError::CircularEffect { function } if function.starts_with("again")),
        "{err:?}"
    );
}

// -- closures, fibers, matches ----------------------------------------------

#[test]
fn lambda_captures_are_stored_in_the_cell() {
    let module = lower(vec![
        let_stmt("n", int(1)),
        let_stmt(
            "add",
            lambda(
                vec![typed_param("x", TypeExpr::named("Int"))],
                arith(BinOp::Add, var("x"), var("n")),
            ),
        ),
        expr_stmt(call("print", vec![call("add", vec![int(2)])])),
    ])
    .expect("lowers");
    let lambda = module.function("__lambda0").expect("lifted lambda");
    assert_eq!(lambda.signature.params, vec![MirType::I64, MirType::I64]);
    let main = module.function(ENTRY_SYMBOL).expect("entry");
    assert!(
        main.instructions()
            .any(|inst| matches!(inst, MirInst::CallIndirect { .. }))
    );
}

#[test]
fn recursive_local_lambda_calls_through_its_own_cell() {
    let count = lambda(
        vec![typed_param("n", TypeExpr::named("Int"))],
        match_expr(
            var("n"),
            vec![
                arm(pat_lit(osprey_ast::Lit::Int(0)), int(0)),
                arm(
                    pat_wild(),
                    call("count", vec![arith(BinOp::Sub, var("n"), int(1))]),
                ),
            ],
        ),
    );
    let module = lower(vec![
        let_stmt("count", count),
        expr_stmt(call("print", vec![call("count", vec![int(3)])])),
    ])
    .expect("lowers");
    let lifted = module.function("__lambda0").expect("lifted lambda");
    // No captures: the cell is just the code pointer.
    assert_eq!(lifted.signature.params, vec![MirType::I64, MirType::I64]);
    assert!(
        lifted
            .instructions()
            .any(|inst| matches!(inst, MirInst::CallIndirect { .. }))
    );
}

fn int_div(op: BinOp) -> Vec<Stmt> {
    let int_ty = || TypeExpr::named("Int");
    let quot = fn_decl(
        "quot",
        vec![typed_param("a", int_ty()), typed_param("b", int_ty())],
        arith(op, var("a"), var("b")),
    );
    vec![
        fn_stmt(quot),
        expr_stmt(call("print", vec![call("quot", vec![int(7), int(2)])])),
    ]
}

fn has_const(module: &MirModule, function: &str, value: i64) -> bool {
    module.function(function).is_some_and(|f| {
        f.instructions().any(|inst| {
            matches!(inst, MirInst::Const { literal: MirLiteral::I64(v), .. } if *v == value)
        })
    })
}

#[test]
fn checked_division_guards_min_by_minus_one() {
    let module = lower(int_div(BinOp::Div)).expect("lowers");
    assert!(has_const(&module, "quot", i64::MIN));
    assert!(has_const(&module, "quot", -1));
    assert!(module.data.iter().any(|d| d.bytes.starts_with(b"Arithmetic overflow")));
}

#[test]
fn checked_modulo_by_minus_one_uses_unit_divisor() {
    let module = lower(int_div(BinOp::Mod)).expect("lowers");
    assert!(has_const(&module, "quot", -1));
    assert!(has_const(&module, "quot", 1));
    assert!(!has_const(&module, "quot", i64::MIN));
}

#[test]
fn spawn_lifts_a_fiber_entry() {
    let module = lower(vec![
        let_stmt("f", spawn(int(1))),
        expr_stmt(call("print", vec![await_(var("f"))])),
    ])
    .expect("lowers");
    let entry = module.function("__fiber0").expect("fiber entry");
    assert_eq!(entry.signature.params, vec![MirType::I64]);
    assert_eq!(entry.signature.ret, Some(MirType::I64));
    assert!(calls(&module, ENTRY_SYMBOL, concurrency::FIBER_SPAWN));
    assert!(calls(&module, ENTRY_SYMBOL, concurrency::FIBER_AWAIT));
}

#[test]
fn channel_without_capacity_uses_default() {
    let module = lower(vec![
        let_stmt("ch", channel(Some(TypeExpr::named("Int")), None)),
        expr_stmt(send(var("ch"), int(3))),
    ])
    .expect("lowers");
    assert!(calls(&module, ENTRY_SYMBOL, concurrency::CHANNEL_CREATE));
    assert!(calls(&module, ENTRY_SYMBOL, concurrency::CHANNEL_SEND));
}

#[test]
fn flat_union_match_is_a_switch() {
    let int_ty = || TypeExpr::named("Int");
    let area = fn_decl(
        "area",
        vec![typed_param("shape", TypeExpr::named("Shape"))],
        match_expr(
            var("shape"),
            vec![
                arm(pat_ctor("Circle", &["r"]), var("r")),
                arm(pat_ctor("Square", &["side"]), var("side")),
            ],
        ),
    );
    let module = lower(vec![
        union_stmt(
            "Shape",
            &[],
            vec![
                ("Circle", vec![("r", int_ty())]),
                ("Square", vec![("side", int_ty())]),
            ],
        ),
        fn_stmt(area),
        expr_stmt(call(
            "print",
            vec![call("area", vec![construct("Circle", vec![("r", int(2))])])],
        )),
    ])
    .expect("lowers");
    let area = module.function("area").expect("area");
    assert!(
        area.blocks
            .iter()
            .any(|b| matches!(b.terminator, MirTerminator::Switch { .. }))
    );
}

#[test]
fn user_main_is_wrapped_by_entry_point() {
    let main = fn_decl("main", vec![], call("print", vec![string("hi")]));
    let module = lower(vec![fn_stmt(main)]).expect("lowers");
    assert!(module.function(USER_MAIN_SYMBOL).is_some());
    let entry = module.function(ENTRY_SYMBOL).expect("entry");
    assert_eq!(entry.linkage, MirLinkage::Export);
    assert_eq!(entry.signature.ret, Some(MirType::I32));
    assert!(calls(&module, ENTRY_SYMBOL, USER_MAIN_SYMBOL));
}

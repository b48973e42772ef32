//! Constructors for AST nodes with synthetic spans.
//!
//! Front ends and tests use these to assemble programs without spelling out
//! `Spanned` wrappers. [`arith`] reproduces the builder's arithmetic
//! wrapping rule.

use crate::*;

fn sp<T>(node: T) -> Spanned<T> {
    Spanned::new(node, Span::synthetic())
}

pub fn int(n: i64) -> Expr {
    sp(ExprKind::Lit(Lit::Int(n)))
}

pub fn float(n: f64) -> Expr {
    sp(ExprKind::Lit(Lit::Float(n)))
}

pub fn boolean(b: bool) -> Expr {
    sp(ExprKind::Lit(Lit::Bool(b)))
}

pub fn string(text: &str) -> Expr {
    sp(ExprKind::Lit(Lit::String(text.to_string())))
}

pub fn unit() -> Expr {
    sp(ExprKind::Lit(Lit::Unit))
}

pub fn var(name: &str) -> Expr {
    sp(ExprKind::Var(name.to_string()))
}

pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    sp(ExprKind::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

/// An arithmetic expression as the AST builder emits it.
///
/// Division by a literal zero becomes an `Error` wrapper tagged
/// `DivisionByZero`; everything else is a generic success wrapper around the
/// raw binary node.
pub fn arith(op: BinOp, left: Expr, right: Expr) -> Expr {
    if op == BinOp::Div && matches!(right.node, ExprKind::Lit(Lit::Int(0))) {
        return sp(ExprKind::Result {
            success: false,
            value: Box::new(string("Division by zero")),
            error_type: Some("DivisionByZero".to_string()),
        });
    }
    sp(ExprKind::Result {
        success: true,
        value: Box::new(binary(op, left, right)),
        error_type: None,
    })
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    sp(ExprKind::Unary {
        op,
        operand: Box::new(operand),
    })
}

pub fn call(func: &str, args: Vec<Expr>) -> Expr {
    call_expr(var(func), args)
}

pub fn call_expr(func: Expr, args: Vec<Expr>) -> Expr {
    sp(ExprKind::Call {
        func: Box::new(func),
        args: args.into_iter().map(Argument::positional).collect(),
    })
}

pub fn call_named(func: &str, args: Vec<(&str, Expr)>) -> Expr {
    sp(ExprKind::Call {
        func: Box::new(var(func)),
        args: args
            .into_iter()
            .map(|(name, value)| Argument::named(name, value))
            .collect(),
    })
}

pub fn param(name: &str) -> Param {
    Param {
        name: name.to_string(),
        annotation: None,
        span: Span::synthetic(),
    }
}

pub fn typed_param(name: &str, ty: TypeExpr) -> Param {
    Param {
        name: name.to_string(),
        annotation: Some(ty),
        span: Span::synthetic(),
    }
}

pub fn lambda(params: Vec<Param>, body: Expr) -> Expr {
    sp(ExprKind::Lambda {
        params,
        return_annotation: None,
        body: Box::new(body),
    })
}

pub fn match_expr(scrutinee: Expr, arms: Vec<MatchArm>) -> Expr {
    sp(ExprKind::Match {
        scrutinee: Box::new(scrutinee),
        arms,
    })
}

pub fn arm(pattern: Pattern, body: Expr) -> MatchArm {
    MatchArm { pattern, body }
}

pub fn pat_wild() -> Pattern {
    sp(PatternKind::Wildcard)
}

pub fn pat_var(name: &str) -> Pattern {
    sp(PatternKind::Var(name.to_string()))
}

pub fn pat_lit(lit: Lit) -> Pattern {
    sp(PatternKind::Lit(lit))
}

/// `Name { a, b }`: each listed field binds under its own name.
pub fn pat_ctor(name: &str, fields: &[&str]) -> Pattern {
    sp(PatternKind::Constructor {
        name: name.to_string(),
        fields: fields
            .iter()
            .map(|field| FieldPattern {
                field: field.to_string(),
                pattern: None,
            })
            .collect(),
    })
}

pub fn pat_ctor_nested(name: &str, fields: Vec<(&str, Pattern)>) -> Pattern {
    sp(PatternKind::Constructor {
        name: name.to_string(),
        fields: fields
            .into_iter()
            .map(|(field, pattern)| FieldPattern {
                field: field.to_string(),
                pattern: Some(pattern),
            })
            .collect(),
    })
}

pub fn success(value: Expr) -> Expr {
    sp(ExprKind::Result {
        success: true,
        value: Box::new(value),
        error_type: Some("Error".to_string()),
    })
}

pub fn construct(type_name: &str, fields: Vec<(&str, Expr)>) -> Expr {
    sp(ExprKind::Construct {
        type_name: type_name.to_string(),
        fields: fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    })
}

pub fn update(target: Expr, fields: Vec<(&str, Expr)>) -> Expr {
    sp(ExprKind::Update {
        target: Box::new(target),
        fields: fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    })
}

pub fn field(expr: Expr, name: &str) -> Expr {
    sp(ExprKind::FieldAccess {
        expr: Box::new(expr),
        field: name.to_string(),
    })
}

pub fn block(statements: Vec<Stmt>, result: Option<Expr>) -> Expr {
    sp(ExprKind::Block {
        statements,
        result: result.map(Box::new),
    })
}

pub fn list(items: Vec<Expr>) -> Expr {
    sp(ExprKind::List(items))
}

pub fn index(list: Expr, index: Expr) -> Expr {
    sp(ExprKind::Index {
        list: Box::new(list),
        index: Box::new(index),
    })
}

pub fn interpolated(parts: Vec<InterpolatedPart>) -> Expr {
    sp(ExprKind::Interpolated(parts))
}

pub fn perform(effect: &str, operation: &str, args: Vec<Expr>) -> Expr {
    sp(ExprKind::Perform {
        effect: effect.to_string(),
        operation: operation.to_string(),
        args,
    })
}

pub fn handler_arm(operation: &str, params: &[&str], body: Expr) -> HandlerArm {
    HandlerArm {
        operation: operation.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        body,
        span: Span::synthetic(),
    }
}

pub fn handle(effect: &str, arms: Vec<HandlerArm>, body: Expr) -> Expr {
    sp(ExprKind::Handle {
        effect: effect.to_string(),
        arms,
        body: Box::new(body),
    })
}

pub fn spawn(body: Expr) -> Expr {
    sp(ExprKind::Spawn(Box::new(body)))
}

pub fn await_(fiber: Expr) -> Expr {
    sp(ExprKind::Await(Box::new(fiber)))
}

pub fn yield_(value: Option<Expr>) -> Expr {
    sp(ExprKind::Yield(value.map(Box::new)))
}

pub fn channel(element: Option<TypeExpr>, capacity: Option<Expr>) -> Expr {
    sp(ExprKind::ChannelCreate {
        element,
        capacity: capacity.map(Box::new),
    })
}

pub fn send(channel: Expr, value: Expr) -> Expr {
    sp(ExprKind::Send {
        channel: Box::new(channel),
        value: Box::new(value),
    })
}

pub fn recv(channel: Expr) -> Expr {
    sp(ExprKind::Recv(Box::new(channel)))
}

pub fn select(arms: Vec<SelectArm>) -> Expr {
    sp(ExprKind::Select(arms))
}

pub fn select_arm(pattern: Pattern, operation: Option<Expr>, body: Expr) -> SelectArm {
    SelectArm {
        pattern,
        operation,
        body,
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

pub fn let_stmt(name: &str, value: Expr) -> Stmt {
    sp(StmtKind::Let {
        name: name.to_string(),
        mutable: false,
        annotation: None,
        value,
    })
}

pub fn let_mut(name: &str, value: Expr) -> Stmt {
    sp(StmtKind::Let {
        name: name.to_string(),
        mutable: true,
        annotation: None,
        value,
    })
}

pub fn assign(name: &str, value: Expr) -> Stmt {
    sp(StmtKind::Assign {
        name: name.to_string(),
        value,
    })
}

pub fn expr_stmt(expr: Expr) -> Stmt {
    sp(StmtKind::Expr(expr))
}

pub fn fn_decl(name: &str, params: Vec<Param>, body: Expr) -> FnDecl {
    FnDecl {
        name: name.to_string(),
        params,
        return_annotation: None,
        effects: Vec::new(),
        body,
        span: Span::synthetic(),
    }
}

pub fn fn_stmt(decl: FnDecl) -> Stmt {
    sp(StmtKind::Fn(decl))
}

pub fn extern_stmt(name: &str, params: Vec<(&str, TypeExpr)>, ret: Option<TypeExpr>) -> Stmt {
    sp(StmtKind::Extern(ExternDecl {
        name: name.to_string(),
        params: params
            .into_iter()
            .map(|(name, ty)| (name.to_string(), ty))
            .collect(),
        return_annotation: ret,
        span: Span::synthetic(),
    }))
}

/// `type Name<params> = A { f: T } | B`.
pub fn union_stmt(name: &str, type_params: &[&str], variants: Vec<(&str, Vec<(&str, TypeExpr)>)>) -> Stmt {
    sp(StmtKind::Type(TypeDecl {
        name: name.to_string(),
        type_params: type_params.iter().map(|p| p.to_string()).collect(),
        variants: variants
            .into_iter()
            .map(|(variant, fields)| VariantDecl {
                name: variant.to_string(),
                fields: fields
                    .into_iter()
                    .map(|(field, ty)| FieldDecl {
                        name: field.to_string(),
                        ty,
                    })
                    .collect(),
            })
            .collect(),
        span: Span::synthetic(),
    }))
}

/// `type Name = { f: T }`.
pub fn record_stmt(name: &str, fields: Vec<(&str, TypeExpr)>) -> Stmt {
    union_stmt(name, &[], vec![(name, fields)])
}

pub fn effect_stmt(name: &str, operations: Vec<(&str, Vec<TypeExpr>, TypeExpr)>) -> Stmt {
    sp(StmtKind::Effect(EffectDecl {
        name: name.to_string(),
        operations: operations
            .into_iter()
            .map(|(op, params, ret)| OperationDecl {
                name: op.to_string(),
                params,
                ret,
            })
            .collect(),
        span: Span::synthetic(),
    }))
}

pub fn program(statements: Vec<Stmt>) -> Program {
    Program { statements }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_zero_division_becomes_error_wrapper() {
        let expr = arith(BinOp::Div, int(5), int(0));
        let ExprKind::Result {
            success,
            error_type,
            ..
        } = expr.node
        else {
            panic!("expected result wrapper");
        };
        assert!(!success);
        assert_eq!(error_type.as_deref(), Some("DivisionByZero"));
    }

    #[test]
    fn ordinary_arithmetic_gets_success_wrapper() {
        let expr = arith(BinOp::Add, int(1), int(2));
        let ExprKind::Result {
            success,
            value,
            error_type,
        } = expr.node
        else {
            panic!("expected result wrapper");
        };
        assert!(success);
        assert!(error_type.is_none());
        assert!(matches!(value.node, ExprKind::Binary { op: BinOp::Add, .. }));
    }
}

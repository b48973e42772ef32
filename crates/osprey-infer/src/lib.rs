//! Hindley-Milner type inference for Osprey.
//!
//! This crate implements:
//! - Eager unification with an occurs check ([`Unifier`])
//! - Algorithm W over the AST, producing typed HIR ([`typeck`])
//! - Let-generalization of top-level functions and local lambdas
//! - The builtin function table and the type/effect declaration registries
//!
//! Inference state is threaded explicitly: one [`Unifier`] and one
//! [`VarSupply`] per compilation, with no process-wide counters.

pub mod builtins;
pub mod exhaustive;
pub mod registry;
pub mod trace;
pub mod typeck;

use osprey_ast::Span;
use osprey_types::{Substitution, Type, TypeVarId, sanitize_type_display, sanitize_type_pair_display};

pub use osprey_diag::{Category, Diagnostic, DiagnosticError, SourceLocation};
pub use osprey_types::TypeScheme;
pub use typeck::infer_program;

use crate::trace::{UnifyAction, UnifyStep};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A fatal inference error. Inference stops at the first one.
///
/// Type names inside messages are already sanitized: variables render as
/// `a`, `b`, ... rather than internal ids.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("type mismatch: expected `{expected}`, found `{found}`")]
    Mismatch {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("infinite type: `{var}` occurs in `{ty}`")]
    InfiniteType { var: String, ty: String, span: Span },
    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: String, span: Span },
    #[error("arity mismatch: expected {expected} parameters, found {found}")]
    ArityMismatch {
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("wrong number of arguments to `{function}`: expected {expected}, got {found}")]
    WrongArgumentCount {
        function: String,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("unknown type `{name}`")]
    UnknownType { name: String, span: Span },
    #[error("unknown constructor `{name}`")]
    UnknownConstructor { name: String, span: Span },
    #[error("unknown field `{field}` on `{type_name}`")]
    UnknownField {
        field: String,
        type_name: String,
        span: Span,
    },
    #[error("missing field `{field}` in construction of `{type_name}`")]
    MissingField {
        field: String,
        type_name: String,
        span: Span,
    },
    #[error("cannot access field `{field}` on non-struct type `{ty}`")]
    FieldOnNonStruct {
        field: String,
        ty: String,
        span: Span,
    },
    #[error("unknown effect `{effect}`")]
    UnknownEffect { effect: String, span: Span },
    #[error("unknown effect operation `{effect}.{operation}`")]
    UnknownOperation {
        effect: String,
        operation: String,
        span: Span,
    },
    #[error("match expression has no arms")]
    EmptyMatch { span: Span },
    #[error("non-exhaustive match on `{type_name}`: missing {}", .missing.join(", "))]
    NonExhaustive {
        type_name: String,
        missing: Vec<String>,
        span: Span,
    },
    #[error("literal patterns are not allowed on `{ty}`")]
    LiteralPattern { ty: String, span: Span },
    #[error("unknown argument `{name}` in call to `{function}`")]
    UnknownNamedArgument {
        function: String,
        name: String,
        span: Span,
    },
    #[error("missing argument `{name}` in call to `{function}`")]
    MissingNamedArgument {
        function: String,
        name: String,
        span: Span,
    },
    #[error("argument `{name}` given twice in call to `{function}`")]
    DuplicateNamedArgument {
        function: String,
        name: String,
        span: Span,
    },
    #[error("named arguments are not allowed when calling `{callee}`")]
    NamedArgumentsNotAllowed { callee: String, span: Span },
    #[error("cannot assign to immutable binding `{name}`")]
    ImmutableAssign { name: String, span: Span },
    #[error("builtin `{name}` can only be called directly")]
    BuiltinAsValue { name: String, span: Span },
    #[error("select arms bind a plain name or `_`")]
    SelectPattern { span: Span },
}

impl TypeError {
    pub fn span(&self) -> Span {
        match self {
            TypeError::Mismatch { span, .. }
            | TypeError::InfiniteType { span, .. }
            | TypeError::UndefinedVariable { span, .. }
            | TypeError::ArityMismatch { span, .. }
            | TypeError::WrongArgumentCount { span, .. }
            | TypeError::UnknownType { span, .. }
            | TypeError::UnknownConstructor { span, .. }
            | TypeError::UnknownField { span, .. }
            | TypeError::MissingField { span, .. }
            | TypeError::FieldOnNonStruct { span, .. }
            | TypeError::UnknownEffect { span, .. }
            | TypeError::UnknownOperation { span, .. }
            | TypeError::EmptyMatch { span }
            | TypeError::NonExhaustive { span, .. }
            | TypeError::LiteralPattern { span, .. }
            | TypeError::UnknownNamedArgument { span, .. }
            | TypeError::MissingNamedArgument { span, .. }
            | TypeError::DuplicateNamedArgument { span, .. }
            | TypeError::NamedArgumentsNotAllowed { span, .. }
            | TypeError::ImmutableAssign { span, .. }
            | TypeError::BuiltinAsValue { span, .. }
            | TypeError::SelectPattern { span } => *span,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            TypeError::Mismatch { .. } | TypeError::LiteralPattern { .. } => Category::TypeMismatch,
            TypeError::InfiniteType { .. } => Category::InfiniteType,
            TypeError::UndefinedVariable { .. }
            | TypeError::UnknownType { .. }
            | TypeError::BuiltinAsValue { .. } => Category::UndefinedName,
            TypeError::ArityMismatch { .. } | TypeError::WrongArgumentCount { .. } => {
                Category::ArityMismatch
            }
            TypeError::UnknownConstructor { .. }
            | TypeError::UnknownField { .. }
            | TypeError::MissingField { .. }
            | TypeError::FieldOnNonStruct { .. } => Category::UnknownField,
            TypeError::UnknownEffect { .. } | TypeError::UnknownOperation { .. } => {
                Category::UnknownEffect
            }
            TypeError::EmptyMatch { .. } | TypeError::NonExhaustive { .. } => {
                Category::NonExhaustive
            }
            TypeError::UnknownNamedArgument { .. }
            | TypeError::MissingNamedArgument { .. }
            | TypeError::DuplicateNamedArgument { .. }
            | TypeError::NamedArgumentsNotAllowed { .. } => Category::NamedArgument,
            TypeError::ImmutableAssign { .. } | TypeError::SelectPattern { .. } => {
                Category::TypeError
            }
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        let category = self.category();
        Diagnostic::error(category, self.to_string())
            .at_opt(span_to_location(self.span()))
            .with_help(category.example_fix())
    }
}

pub fn span_to_location(span: Span) -> Option<SourceLocation> {
    if span.is_synthetic() {
        return None;
    }
    Some(SourceLocation {
        file_id: span.file.0,
        start: span.start,
        end: span.end,
    })
}

// ---------------------------------------------------------------------------
// Fresh variables
// ---------------------------------------------------------------------------

/// Source of fresh type variables for one compilation.
#[derive(Debug, Clone, Default)]
pub struct VarSupply {
    next: u32,
}

impl VarSupply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering at `next`; used when a caller already owns lower ids.
    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    pub fn fresh(&mut self) -> TypeVarId {
        let id = TypeVarId(self.next);
        self.next += 1;
        id
    }

    pub fn fresh_type(&mut self) -> Type {
        Type::Variable(self.fresh())
    }

    pub fn issued(&self) -> u32 {
        self.next
    }
}

// ---------------------------------------------------------------------------
// Unifier
// ---------------------------------------------------------------------------

/// Eager unifier over a running substitution.
#[derive(Debug, Clone, Default)]
pub struct Unifier {
    substitution: Substitution,
    tracing: bool,
    trace: Vec<UnifyStep>,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_tracing(&mut self) {
        self.tracing = true;
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    pub fn unify_trace(&self) -> &[UnifyStep] {
        &self.trace
    }

    pub fn substitution(&self) -> &Substitution {
        &self.substitution
    }

    pub fn into_substitution(self) -> Substitution {
        self.substitution
    }

    /// Resolve `ty` through the current substitution.
    pub fn apply(&self, ty: &Type) -> Type {
        self.substitution.apply(ty)
    }

    /// Make `expected` and `actual` equal, extending the substitution.
    ///
    /// On failure the substitution may hold bindings made before the
    /// conflicting pair was reached; inference aborts on the first error, so
    /// they are never observed.
    pub fn unify(&mut self, expected: &Type, actual: &Type, span: Span) -> Result<(), TypeError> {
        let expected = self.substitution.apply(expected);
        let actual = self.substitution.apply(actual);

        match (&expected, &actual) {
            _ if expected == actual => {
                self.push_step(UnifyAction::Identity, &expected, &actual, "types already equal");
                Ok(())
            }
            (Type::Variable(var), other) | (other, Type::Variable(var)) => {
                self.bind(*var, other, span)
            }
            (Type::Function(params1, ret1), Type::Function(params2, ret2)) => {
                if params1.len() != params2.len() {
                    self.push_step(UnifyAction::Error, &expected, &actual, "parameter counts differ");
                    return Err(TypeError::ArityMismatch {
                        expected: params1.len(),
                        found: params2.len(),
                        span,
                    });
                }
                self.push_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "unify parameters pairwise, then results",
                );
                for (a, b) in params1.iter().zip(params2) {
                    self.unify(a, b, span)?;
                }
                self.unify(ret1, ret2, span)
            }
            (Type::Generic(name1, args1), Type::Generic(name2, args2))
                if name1 == name2 && args1.len() == args2.len() =>
            {
                self.push_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "unify type arguments left to right",
                );
                for (a, b) in args1.iter().zip(args2) {
                    self.unify(a, b, span)?;
                }
                Ok(())
            }
            _ => {
                self.push_step(UnifyAction::Error, &expected, &actual, "type mismatch");
                let (expected, found) = sanitize_type_pair_display(&expected, &actual);
                Err(TypeError::Mismatch {
                    expected,
                    found,
                    span,
                })
            }
        }
    }

    fn bind(&mut self, var: TypeVarId, ty: &Type, span: Span) -> Result<(), TypeError> {
        if ty.occurs(var) {
            self.push_step(
                UnifyAction::OccursCheck,
                &Type::Variable(var),
                ty,
                "variable occurs in the other side",
            );
            let (var, ty) = sanitize_type_pair_display(&Type::Variable(var), ty);
            return Err(TypeError::InfiniteType { var, ty, span });
        }
        self.push_step(
            UnifyAction::Bind,
            &Type::Variable(var),
            ty,
            &format!("{var} := {}", sanitize_type_display(ty)),
        );
        self.substitution.bind_type(var, ty.clone());
        Ok(())
    }

    fn push_step(&mut self, action: UnifyAction, left: &Type, right: &Type, detail: &str) {
        if self.tracing {
            let step = self.trace.len() + 1;
            self.trace.push(UnifyStep {
                step,
                action,
                left: sanitize_type_display(left),
                right: sanitize_type_display(right),
                detail: detail.to_string(),
            });
        }
    }
}

/// Unify two types from scratch, returning the bindings that make them equal.
pub fn unify(t1: &Type, t2: &Type) -> Result<Substitution, TypeError> {
    let mut unifier = Unifier::new();
    unifier.unify(t1, t2, Span::synthetic())?;
    Ok(unifier.into_substitution())
}

#[cfg(test)]
mod prop_tests;


#[cfg(test)]
mod tests {
    use super::*;

    fn var(n: u32) -> Type {
        Type::Variable(TypeVarId(n))
    }

    #[test]
    fn identical_concretes_unify_with_empty_substitution() {
        let subst = unify(&Type::int(), &Type::int()).expect("Int ~ Int");
        assert!(subst.is_empty());
    }

    #[test]
    fn distinct_concretes_fail() {
        let err = unify(&Type::int(), &Type::string()).unwrap_err();
        assert_eq!(
            err,
            TypeError::Mismatch {
                expected: "Int".into(),
                found: "String".into(),
                span: Span::synthetic(),
            }
        );
    }

    #[test]
    fn occurs_check_rejects_self_containing_function() {
        let err = unify(&var(0), &Type::function(vec![var(0)], Type::int())).unwrap_err();
        assert!(matches!(err, TypeError::InfiniteType { .. }), "{err:?}");
        assert_eq!(err.category(), Category::InfiniteType);
    }

    #[test]
    fn function_arity_mismatch_is_reported() {
        let err = unify(
            &Type::function(vec![Type::int()], Type::int()),
            &Type::function(vec![Type::int(), Type::int()], Type::int()),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TypeError::ArityMismatch {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn generic_arguments_unify_pairwise() {
        let subst = unify(
            &Type::result(var(0), Type::string()),
            &Type::result(Type::int(), var(1)),
        )
        .expect("unifiable");
        assert_eq!(subst.apply(&var(0)), Type::int());
        assert_eq!(subst.apply(&var(1)), Type::string());
    }

    #[test]
    fn generic_name_mismatch_fails() {
        assert!(unify(&Type::list(Type::int()), &Type::fiber(Type::int())).is_err());
    }

    #[test]
    fn tracing_is_opt_in() {
        let mut quiet = Unifier::new();
        quiet
            .unify(&var(0), &Type::int(), Span::synthetic())
            .expect("bind");
        assert!(quiet.unify_trace().is_empty());

        let mut traced = Unifier::new();
        traced.enable_tracing();
        traced
            .unify(
                &Type::list(var(0)),
                &Type::list(Type::int()),
                Span::synthetic(),
            )
            .expect("decompose then bind");
        let actions: Vec<_> = traced.unify_trace().iter().map(|s| s.action).collect();
        assert_eq!(actions, vec![UnifyAction::Decompose, UnifyAction::Bind]);
    }

    #[test]
    fn trace_serializes_with_snake_case_actions() {
        let mut traced = Unifier::new();
        traced.enable_tracing();
        traced
            .unify(&Type::int(), &Type::int(), Span::synthetic())
            .expect("identity");
        let json = serde_json::to_string(traced.unify_trace()).expect("serialize");
        assert!(json.contains("\"action\":\"identity\""), "{json}");
    }

    #[test]
    fn type_error_renders_as_diagnostic() {
        let err = TypeError::FieldOnNonStruct {
            field: "value".into(),
            ty: "Int".into(),
            span: Span::new(osprey_ast::FileId(0), 0, 8),
        };
        let diag = err.diagnostic();
        assert_eq!(diag.code.as_deref(), Some("E0005"));
        insta::assert_snapshot!(diag.to_string(), @r"
        error[E0005]: cannot access field `value` on non-struct type `Int`
          --> file 0:0..8
          help: Use a declared constructor or field name.
        ");
    }

    #[test]
    fn var_supply_is_monotonic() {
        let mut supply = VarSupply::starting_at(10);
        assert_eq!(supply.fresh(), TypeVarId(10));
        assert_eq!(supply.fresh_type(), var(11));
        assert_eq!(supply.issued(), 12);
    }
}

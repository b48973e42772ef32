use osprey_diag::{Category, Diagnostic};

/// Errors raised while lowering to MIR or emitting native code.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("unsupported statement: {detail}")]
    UnsupportedStatement { detail: String },

    #[error("unsupported expression: {detail}")]
    UnsupportedExpression { detail: String },

    #[error("unsupported binary operator `{op}` on `{ty}`")]
    UnsupportedBinaryOperator { op: String, ty: String },

    #[error("unsupported unary operator `{op}` on `{ty}`")]
    UnsupportedUnaryOperator { op: String, ty: String },

    #[error("wrong number of arguments to `{function}`: expected {expected}, found {found}")]
    WrongArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("missing named argument `{name}` in call to `{function}`")]
    MissingNamedArgument { function: String, name: String },

    #[error("`{function}` has no parameter named `{name}`")]
    UnknownNamedArgument { function: String, name: String },

    #[error("argument `{name}` given twice in call to `{function}`")]
    DuplicateNamedArgument { function: String, name: String },

    #[error("unhandled effect operation `{effect}.{operation}`")]
    UnhandledEffect { effect: String, operation: String },

    #[error("circular effect: `{function}` is already being inlined")]
    CircularEffect { function: String },

    #[error("method `{name}` is not implemented")]
    MethodNotImplemented { name: String },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },

    #[error("undefined local `{name}` during lowering")]
    UndefinedLocal { name: String },

    #[error("call to `{function}` is not allowed: {permission} access is disabled")]
    UnsupportedCall {
        function: String,
        permission: &'static str,
    },

    #[error("no toString implementation for type `{ty}`")]
    MissingToString { ty: String },

    #[error("cannot access field `{field}` on non-struct type `{ty}`")]
    FieldOnNonStruct { field: String, ty: String },

    #[error("unsupported target triple `{target}`")]
    UnsupportedTarget { target: String },

    #[error("invalid MIR value {value} in function `{function}`")]
    InvalidMirValue { function: String, value: u32 },

    #[error("module error: {detail}")]
    Module { detail: String },

    #[error("object emission failed: {detail}")]
    ObjectEmit { detail: String },
}

impl CodegenError {
    pub fn category(&self) -> Category {
        match self {
            CodegenError::UnsupportedStatement { .. }
            | CodegenError::UnsupportedExpression { .. }
            | CodegenError::UnsupportedBinaryOperator { .. }
            | CodegenError::UnsupportedUnaryOperator { .. }
            | CodegenError::MethodNotImplemented { .. }
            | CodegenError::MissingToString { .. } => Category::Unsupported,
            CodegenError::WrongArgumentCount { .. } => Category::ArityMismatch,
            CodegenError::MissingNamedArgument { .. }
            | CodegenError::UnknownNamedArgument { .. }
            | CodegenError::DuplicateNamedArgument { .. } => Category::NamedArgument,
            CodegenError::UnhandledEffect { .. } | CodegenError::CircularEffect { .. } => {
                Category::UnhandledEffect
            }
            CodegenError::UnknownFunction { .. } | CodegenError::UndefinedLocal { .. } => {
                Category::UndefinedName
            }
            CodegenError::UnsupportedCall { .. } => Category::SecurityViolation,
            CodegenError::FieldOnNonStruct { .. } => Category::UnknownField,
            CodegenError::UnsupportedTarget { .. }
            | CodegenError::InvalidMirValue { .. }
            | CodegenError::Module { .. }
            | CodegenError::ObjectEmit { .. } => Category::Backend,
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        let category = self.category();
        Diagnostic::error(category, self.to_string()).with_help(category.example_fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_argument_count_names_both_counts() {
        let err = CodegenError::WrongArgumentCount {
            function: "toString".into(),
            expected: 1,
            found: 2,
        };
        insta::assert_snapshot!(
            err.to_string(),
            @"wrong number of arguments to `toString`: expected 1, found 2"
        );
        assert_eq!(err.category(), Category::ArityMismatch);
    }

    #[test]
    fn security_violations_have_their_own_category() {
        let err = CodegenError::UnsupportedCall {
            function: "httpGet".into(),
            permission: "http",
        };
        assert_eq!(err.diagnostic().category, Category::SecurityViolation);
    }
}

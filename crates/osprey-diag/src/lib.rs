//! Error reporting and diagnostics for Osprey.
//!
//! Every compiler stage reports failures through its own typed error enum;
//! those enums convert into [`Diagnostic`] values here so the driver can
//! render them uniformly. Type variables never appear in user-facing output:
//! producers sanitize type names before building a diagnostic.

use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Diagnostic severity and categories
// ---------------------------------------------------------------------------

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Broad category for diagnostics. Used for filtering and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Type mismatch: expected X, got Y.
    TypeMismatch,
    /// A type variable would have to contain itself.
    InfiniteType,
    /// Undefined variable or name.
    UndefinedName,
    /// Arity mismatch in a function or builtin call.
    ArityMismatch,
    /// Unknown constructor, field or record.
    UnknownField,
    /// Pattern matching: non-exhaustive or empty match.
    NonExhaustive,
    /// Named argument missing, unknown or duplicated.
    NamedArgument,
    /// Effect operation without an enclosing handler.
    UnhandledEffect,
    /// Effect or operation that was never declared.
    UnknownEffect,
    /// Call disabled by the active security configuration.
    SecurityViolation,
    /// Construct the code generator cannot lower.
    Unsupported,
    /// Failure inside the native backend.
    Backend,
    /// External tool (linker, compiler) failure.
    Toolchain,
    /// General type error.
    TypeError,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::TypeMismatch,
        Category::InfiniteType,
        Category::UndefinedName,
        Category::ArityMismatch,
        Category::UnknownField,
        Category::NonExhaustive,
        Category::NamedArgument,
        Category::UnhandledEffect,
        Category::UnknownEffect,
        Category::SecurityViolation,
        Category::Unsupported,
        Category::Backend,
        Category::Toolchain,
        Category::TypeError,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::TypeMismatch => "type_mismatch",
            Category::InfiniteType => "infinite_type",
            Category::UndefinedName => "undefined_name",
            Category::ArityMismatch => "arity_mismatch",
            Category::UnknownField => "unknown_field",
            Category::NonExhaustive => "non_exhaustive",
            Category::NamedArgument => "named_argument",
            Category::UnhandledEffect => "unhandled_effect",
            Category::UnknownEffect => "unknown_effect",
            Category::SecurityViolation => "security_violation",
            Category::Unsupported => "unsupported",
            Category::Backend => "backend",
            Category::Toolchain => "toolchain",
            Category::TypeError => "type_error",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::TypeMismatch => "E0001",
            Category::InfiniteType => "E0002",
            Category::UndefinedName => "E0003",
            Category::ArityMismatch => "E0004",
            Category::UnknownField => "E0005",
            Category::NonExhaustive => "E0006",
            Category::NamedArgument => "E0007",
            Category::UnhandledEffect => "E0008",
            Category::UnknownEffect => "E0009",
            Category::TypeError => "E0010",
            Category::SecurityViolation => "E0201",
            Category::Unsupported => "E0202",
            Category::Backend => "E0301",
            Category::Toolchain => "E0401",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::TypeMismatch => "Expression type does not match expected type.",
            Category::InfiniteType => "A type would have to contain itself.",
            Category::UndefinedName => "A referenced variable, function, or name is undefined.",
            Category::ArityMismatch => "A function was called with the wrong number of arguments.",
            Category::UnknownField => "A constructor, record or field name is not declared.",
            Category::NonExhaustive => "Pattern matching is missing one or more cases.",
            Category::NamedArgument => "Named arguments do not line up with the parameters.",
            Category::UnhandledEffect => "An effect operation is performed with no handler in scope.",
            Category::UnknownEffect => "An effect or operation was never declared.",
            Category::SecurityViolation => "The call is disabled by the security configuration.",
            Category::Unsupported => "The construct cannot be compiled.",
            Category::Backend => "Native code generation failed.",
            Category::Toolchain => "An external build tool failed.",
            Category::TypeError => "General type checking error.",
        }
    }

    pub fn example_fix(self) -> &'static str {
        match self {
            Category::TypeMismatch => {
                "Adjust the expression or add a conversion to match expected type."
            }
            Category::InfiniteType => "Break the self-reference, for example by naming a type.",
            Category::UndefinedName => "Define the missing name or fix the spelling.",
            Category::ArityMismatch => "Call the function with its declared parameter count.",
            Category::UnknownField => "Use a declared constructor or field name.",
            Category::NonExhaustive => "Add a wildcard or the missing pattern arms.",
            Category::NamedArgument => "Name every parameter exactly once.",
            Category::UnhandledEffect => "Wrap the call in a `handle ... in` expression.",
            Category::UnknownEffect => "Declare the effect and its operation first.",
            Category::SecurityViolation => "Enable the capability or remove the call.",
            Category::Unsupported => "Rewrite the expression using supported constructs.",
            Category::Backend => "Report the failing input; this is a compiler bug.",
            Category::Toolchain => "Install a C toolchain (cc, clang or gcc).",
            Category::TypeError => {
                "Follow the labeled spans and help text to align involved types."
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations (independent of osprey-ast's Span)
// ---------------------------------------------------------------------------

/// A source location for diagnostics.
///
/// Uses byte offsets. Callers convert from `osprey-ast` spans to this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. E0001).
    pub code: Option<String>,
    pub severity: Severity,
    pub category: Category,
    /// Primary message: what went wrong.
    pub message: String,
    /// Where it went wrong.
    pub location: Option<SourceLocation>,
    /// Additional labeled spans.
    pub labels: Vec<DiagLabel>,
    /// Suggested fix, if any.
    pub help: Option<String>,
}

/// A labeled source span within a diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct DiagLabel {
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    fn new(severity: Severity, category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity,
            category,
            message: message.into(),
            location: None,
            labels: Vec::new(),
            help: None,
        }
    }

    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Attach a location when one is known.
    pub fn at_opt(self, location: Option<SourceLocation>) -> Self {
        match location {
            Some(location) => self.at(location),
            None => self,
        }
    }

    pub fn with_label(mut self, location: SourceLocation, message: impl Into<String>) -> Self {
        self.labels.push(DiagLabel {
            location,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        if let Some(code) = &self.code {
            write!(f, "{prefix}[{code}]: {}", self.message)?;
        } else {
            write!(f, "{prefix}: {}", self.message)?;
        }
        if let Some(loc) = &self.location {
            write!(f, "\n  --> file {}:{}..{}", loc.file_id, loc.start, loc.end)?;
        }
        for label in &self.labels {
            write!(
                f,
                "\n  note: {} (at {}..{})",
                label.message, label.location.start, label.location.end
            )?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Error type wrapping one or more diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}

impl From<Diagnostic> for DiagnosticError {
    fn from(diag: Diagnostic) -> Self {
        Self::single(diag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_builder() {
        let loc = SourceLocation {
            file_id: 0,
            start: 10,
            end: 20,
        };
        let diag = Diagnostic::error(Category::TypeMismatch, "expected Int, found String")
            .at(loc)
            .with_help("use `toString` to convert");

        assert!(diag.is_error());
        assert_eq!(diag.code.as_deref(), Some("E0001"));
        assert_eq!(diag.category, Category::TypeMismatch);
        assert!(diag.message.contains("expected Int"));
        assert_eq!(diag.location, Some(loc));
    }

    #[test]
    fn diagnostic_display_renders_location_and_help() {
        let diag = Diagnostic::error(Category::UnhandledEffect, "Unhandled effect 'Logger.log'")
            .at(SourceLocation {
                file_id: 0,
                start: 4,
                end: 22,
            })
            .with_help(Category::UnhandledEffect.example_fix());
        insta::assert_snapshot!(diag.to_string(), @r"
        error[E0008]: Unhandled effect 'Logger.log'
          --> file 0:4..22
          help: Wrap the call in a `handle ... in` expression.
        ");
    }

    #[test]
    fn diagnostic_error_displays_first() {
        let err = DiagnosticError(vec![
            Diagnostic::warning(Category::TypeError, "first"),
            Diagnostic::error(Category::TypeError, "second"),
        ]);
        assert_eq!(err.to_string(), "warning[E0010]: first");
    }

    #[test]
    fn category_metadata_is_stable_and_unique() {
        let mut codes = std::collections::BTreeSet::new();
        for cat in Category::all() {
            assert!(!cat.as_str().is_empty());
            assert!(!cat.description().is_empty());
            assert!(!cat.example_fix().is_empty());
            assert!(
                codes.insert(cat.code()),
                "duplicate diagnostic code detected: {}",
                cat.code()
            );
        }
    }
}

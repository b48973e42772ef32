//! Unification traces.
//!
//! Tracing is opt-in via [`Unifier::enable_tracing`](crate::Unifier::enable_tracing);
//! a unifier that never enables it records nothing.

use serde::Serialize;

/// A single step in a unification trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifyStep {
    pub step: usize,
    pub action: UnifyAction,
    pub left: String,
    pub right: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifyAction {
    /// Both sides already equal.
    Identity,
    /// Structural recursion into function or generic arguments.
    Decompose,
    /// A type variable was bound.
    Bind,
    /// Binding refused: the variable occurs in the other side.
    OccursCheck,
    Error,
}

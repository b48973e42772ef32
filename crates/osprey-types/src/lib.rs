//! Type representations for Osprey.
//!
//! This crate defines the semantic types used by the inference engine, the
//! monomorphizer and the layout planner. These are distinct from syntactic
//! type annotations (which live in `osprey-ast`).
//!
//! The model is deliberately small: every nominal type is either a
//! [`Type::Concrete`] name or a [`Type::Generic`] application, so builtins and
//! user declarations share one representation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Builtin type names
// ---------------------------------------------------------------------------

pub const INT: &str = "Int";
pub const FLOAT: &str = "Float";
pub const BOOL: &str = "Bool";
pub const STRING: &str = "String";
pub const UNIT: &str = "Unit";
pub const RESULT: &str = "Result";
pub const LIST: &str = "List";
pub const ITERATOR: &str = "Iterator";
pub const FIBER: &str = "Fiber";
pub const CHANNEL: &str = "Channel";
pub const PROCESS_HANDLE: &str = "ProcessHandle";
/// Error type carried by checked arithmetic.
pub const MATH_ERROR: &str = "MathError";
/// Error type carried by list indexing.
pub const INDEX_ERROR: &str = "IndexError";

/// Messages carried by failing checked arithmetic.
pub const DIVISION_BY_ZERO: &str = "Division by zero";
pub const MODULO_BY_ZERO: &str = "Modulo by zero";
pub const ARITHMETIC_OVERFLOW: &str = "Arithmetic overflow";
/// Message carried by an out-of-range list index.
pub const INDEX_OUT_OF_BOUNDS: &str = "Index out of bounds";

pub const SUCCESS_VARIANT: &str = "Success";
pub const ERROR_VARIANT: &str = "Error";
pub const SUCCESS_FIELD: &str = "value";
pub const ERROR_FIELD: &str = "message";

/// Nominal types the compiler knows without a declaration.
pub const BUILTIN_TYPE_NAMES: [&str; 13] = [
    INT,
    FLOAT,
    BOOL,
    STRING,
    UNIT,
    RESULT,
    LIST,
    ITERATOR,
    FIBER,
    CHANNEL,
    PROCESS_HANDLE,
    MATH_ERROR,
    INDEX_ERROR,
];

pub fn is_builtin_type_name(name: &str) -> bool {
    BUILTIN_TYPE_NAMES.contains(&name)
}

/// Number of type parameters a builtin constructor takes.
pub fn builtin_type_constructor_arity(name: &str) -> Option<usize> {
    match name {
        RESULT => Some(2),
        LIST | ITERATOR | FIBER | CHANNEL => Some(1),
        INT | FLOAT | BOOL | STRING | UNIT | PROCESS_HANDLE | MATH_ERROR | INDEX_ERROR => Some(0),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Unique identifier for a type variable during inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeVarId(pub u32);

impl fmt::Display for TypeVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A semantic type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Type {
    /// A nominal type with no parameters: `Int`, `Shape`.
    Concrete(String),
    /// An inference variable.
    Variable(TypeVarId),
    /// `(params) -> result`.
    Function(Vec<Type>, Box<Type>),
    /// A parameterized nominal type: `Result<Int, String>`, `List<T>`.
    Generic(String, Vec<Type>),
}

impl Type {
    pub fn concrete(name: impl Into<String>) -> Self {
        Type::Concrete(name.into())
    }

    pub fn int() -> Self {
        Type::concrete(INT)
    }

    pub fn float() -> Self {
        Type::concrete(FLOAT)
    }

    pub fn bool() -> Self {
        Type::concrete(BOOL)
    }

    pub fn string() -> Self {
        Type::concrete(STRING)
    }

    pub fn unit() -> Self {
        Type::concrete(UNIT)
    }

    pub fn process_handle() -> Self {
        Type::concrete(PROCESS_HANDLE)
    }

    pub fn function(params: Vec<Type>, ret: Type) -> Self {
        Type::Function(params, Box::new(ret))
    }

    pub fn generic(name: impl Into<String>, params: Vec<Type>) -> Self {
        Type::Generic(name.into(), params)
    }

    pub fn result(ok: Type, err: Type) -> Self {
        Type::generic(RESULT, vec![ok, err])
    }

    pub fn list(elem: Type) -> Self {
        Type::generic(LIST, vec![elem])
    }

    pub fn iterator(elem: Type) -> Self {
        Type::generic(ITERATOR, vec![elem])
    }

    pub fn fiber(inner: Type) -> Self {
        Type::generic(FIBER, vec![inner])
    }

    pub fn channel(elem: Type) -> Self {
        Type::generic(CHANNEL, vec![elem])
    }

    /// The nominal name of a concrete or generic type.
    pub fn nominal_name(&self) -> Option<&str> {
        match self {
            Type::Concrete(name) | Type::Generic(name, _) => Some(name),
            Type::Variable(_) | Type::Function(..) => None,
        }
    }

    /// Type arguments of a nominal type; empty for concrete names.
    pub fn type_args(&self) -> &[Type] {
        match self {
            Type::Generic(_, args) => args,
            _ => &[],
        }
    }

    pub fn is_named(&self, name: &str) -> bool {
        matches!(self, Type::Concrete(n) if n == name)
    }

    pub fn is_int(&self) -> bool {
        self.is_named(INT)
    }

    pub fn is_float(&self) -> bool {
        self.is_named(FLOAT)
    }

    pub fn is_bool(&self) -> bool {
        self.is_named(BOOL)
    }

    pub fn is_string(&self) -> bool {
        self.is_named(STRING)
    }

    pub fn is_unit(&self) -> bool {
        self.is_named(UNIT)
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Type::Variable(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Type::Function(..))
    }

    /// `(ok, err)` when this is `Result<ok, err>`.
    pub fn result_parts(&self) -> Option<(&Type, &Type)> {
        match self {
            Type::Generic(name, args) if name == RESULT && args.len() == 2 => {
                Some((&args[0], &args[1]))
            }
            _ => None,
        }
    }

    /// The single type argument of `List`, `Iterator`, `Fiber` or `Channel`.
    pub fn element_of(&self, constructor: &str) -> Option<&Type> {
        match self {
            Type::Generic(name, args) if name == constructor && args.len() == 1 => Some(&args[0]),
            _ => None,
        }
    }

    /// True if no type variables remain anywhere inside.
    pub fn is_ground(&self) -> bool {
        match self {
            Type::Variable(_) => false,
            Type::Concrete(_) => true,
            Type::Function(params, ret) => params.iter().all(Type::is_ground) && ret.is_ground(),
            Type::Generic(_, args) => args.iter().all(Type::is_ground),
        }
    }

    /// Does `var` occur anywhere in this type?
    pub fn occurs(&self, var: TypeVarId) -> bool {
        match self {
            Type::Variable(v) => *v == var,
            Type::Concrete(_) => false,
            Type::Function(params, ret) => params.iter().any(|p| p.occurs(var)) || ret.occurs(var),
            Type::Generic(_, args) => args.iter().any(|a| a.occurs(var)),
        }
    }

    /// Replace every remaining variable with `fallback`.
    pub fn default_vars(&self, fallback: &Type) -> Type {
        match self {
            Type::Variable(_) => fallback.clone(),
            Type::Concrete(_) => self.clone(),
            Type::Function(params, ret) => Type::Function(
                params.iter().map(|p| p.default_vars(fallback)).collect(),
                Box::new(ret.default_vars(fallback)),
            ),
            Type::Generic(name, args) => Type::Generic(
                name.clone(),
                args.iter().map(|a| a.default_vars(fallback)).collect(),
            ),
        }
    }

    /// Replace variables named in `mapping` in one pass.
    ///
    /// Unlike [`Substitution::apply`] this never revisits a replacement, so a
    /// mapping whose targets mention its own keys is safe.
    pub fn instantiate(&self, mapping: &BTreeMap<TypeVarId, Type>) -> Type {
        match self {
            Type::Variable(v) => mapping.get(v).cloned().unwrap_or_else(|| self.clone()),
            Type::Concrete(_) => self.clone(),
            Type::Function(params, ret) => Type::Function(
                params.iter().map(|p| p.instantiate(mapping)).collect(),
                Box::new(ret.instantiate(mapping)),
            ),
            Type::Generic(name, args) => Type::Generic(
                name.clone(),
                args.iter().map(|a| a.instantiate(mapping)).collect(),
            ),
        }
    }

    /// A symbol-safe rendering used when naming specializations.
    pub fn mangle(&self) -> String {
        match self {
            Type::Concrete(name) => name.clone(),
            Type::Variable(v) => format!("t{}", v.0),
            Type::Function(params, ret) => {
                let params: Vec<String> = params.iter().map(Type::mangle).collect();
                format!("fn_{}_to_{}", params.join("_"), ret.mangle())
            }
            Type::Generic(name, args) => {
                let args: Vec<String> = args.iter().map(Type::mangle).collect();
                format!("{name}_{}", args.join("_"))
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Concrete(name) => write!(f, "{name}"),
            Type::Variable(v) => write!(f, "{v}"),
            Type::Function(params, ret) => {
                write!(f, "(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") -> {ret}")
            }
            Type::Generic(name, args) => {
                write!(f, "{name}<")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ">")
            }
        }
    }
}

/// Mangle a function name with a concrete type tuple: `identity$Int`.
pub fn mangle_specialization(name: &str, args: &[Type]) -> String {
    if args.is_empty() {
        return name.to_string();
    }
    let mut out = name.to_string();
    for arg in args {
        out.push('$');
        out.push_str(&arg.mangle());
    }
    out
}

// ---------------------------------------------------------------------------
// Type schemes
// ---------------------------------------------------------------------------

/// A type scheme: `forall a b. T`.
///
/// Schemes arise from let-generalization. Each use of a polymorphic binding
/// instantiates the scheme with fresh variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeScheme {
    pub type_vars: Vec<TypeVarId>,
    pub ty: Type,
}

impl TypeScheme {
    /// Create a monomorphic scheme (no quantified variables).
    pub fn mono(ty: Type) -> Self {
        Self {
            type_vars: Vec::new(),
            ty,
        }
    }

    pub fn is_mono(&self) -> bool {
        self.type_vars.is_empty()
    }

    /// Free variables of the scheme: those of the body minus the quantified ones.
    pub fn free_type_vars(&self) -> BTreeSet<TypeVarId> {
        let mut vars = free_type_vars(&self.ty);
        for tv in &self.type_vars {
            vars.remove(tv);
        }
        vars
    }
}

impl fmt::Display for TypeScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.type_vars.is_empty() {
            return write!(f, "{}", self.ty);
        }
        write!(f, "forall")?;
        for tv in &self.type_vars {
            write!(f, " {tv}")?;
        }
        write!(f, ". {}", self.ty)
    }
}

// ---------------------------------------------------------------------------
// Free variable computation
// ---------------------------------------------------------------------------

/// Collect all free type variables in a type.
pub fn free_type_vars(ty: &Type) -> BTreeSet<TypeVarId> {
    let mut vars = BTreeSet::new();
    collect_free_type_vars(ty, &mut vars);
    vars
}

fn collect_free_type_vars(ty: &Type, vars: &mut BTreeSet<TypeVarId>) {
    match ty {
        Type::Variable(v) => {
            vars.insert(*v);
        }
        Type::Concrete(_) => {}
        Type::Function(params, ret) => {
            for param in params {
                collect_free_type_vars(param, vars);
            }
            collect_free_type_vars(ret, vars);
        }
        Type::Generic(_, args) => {
            for arg in args {
                collect_free_type_vars(arg, vars);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// A mapping from type variables to types.
///
/// Bindings may refer to other bound variables; [`Substitution::apply`]
/// follows chains until no bound variable remains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    type_map: BTreeMap<TypeVarId, Type>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_type(&mut self, var: TypeVarId, ty: Type) {
        self.type_map.insert(var, ty);
    }

    pub fn lookup_type(&self, var: TypeVarId) -> Option<&Type> {
        self.type_map.get(&var)
    }

    pub fn type_bindings(&self) -> &BTreeMap<TypeVarId, Type> {
        &self.type_map
    }

    pub fn is_empty(&self) -> bool {
        self.type_map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.type_map.len()
    }

    /// Apply this substitution to a type, replacing all bound variables.
    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Variable(v) => match self.lookup_type(*v) {
                Some(resolved) => self.apply(resolved),
                None => ty.clone(),
            },
            Type::Concrete(_) => ty.clone(),
            Type::Function(params, ret) => Type::Function(
                params.iter().map(|p| self.apply(p)).collect(),
                Box::new(self.apply(ret)),
            ),
            Type::Generic(name, args) => {
                Type::Generic(name.clone(), args.iter().map(|a| self.apply(a)).collect())
            }
        }
    }

    /// Apply to a scheme body, leaving its quantified variables alone.
    pub fn apply_scheme(&self, scheme: &TypeScheme) -> TypeScheme {
        let mut shadowed = self.clone();
        for tv in &scheme.type_vars {
            shadowed.type_map.remove(tv);
        }
        TypeScheme {
            type_vars: scheme.type_vars.clone(),
            ty: shadowed.apply(&scheme.ty),
        }
    }
}

// ---------------------------------------------------------------------------
// Type display helpers
// ---------------------------------------------------------------------------

/// Display a type with alphabetic names for type variables instead of `t0`, `t1`.
pub fn sanitize_type_display(ty: &Type) -> String {
    let mapping = alphabetic_mapping(free_type_vars(ty));
    if mapping.is_empty() {
        return ty.to_string();
    }
    rename_vars(ty, &mapping).to_string()
}

/// Display two types with one shared variable namespace.
///
/// The same source variable appears with the same sanitized name on both sides.
pub fn sanitize_type_pair_display(left: &Type, right: &Type) -> (String, String) {
    let mut vars = free_type_vars(left);
    vars.extend(free_type_vars(right));
    let mapping = alphabetic_mapping(vars);
    if mapping.is_empty() {
        return (left.to_string(), right.to_string());
    }
    (
        rename_vars(left, &mapping).to_string(),
        rename_vars(right, &mapping).to_string(),
    )
}

fn alphabetic_mapping(vars: BTreeSet<TypeVarId>) -> BTreeMap<TypeVarId, String> {
    vars.into_iter()
        .enumerate()
        .map(|(i, var)| (var, alphabetic_var_name(i)))
        .collect()
}

fn alphabetic_var_name(index: usize) -> String {
    let letter = (b'a' + (index % 26) as u8) as char;
    let suffix = index / 26;
    if suffix == 0 {
        letter.to_string()
    } else {
        format!("{letter}{suffix}")
    }
}

fn rename_vars(ty: &Type, mapping: &BTreeMap<TypeVarId, String>) -> Type {
    match ty {
        Type::Variable(v) => match mapping.get(v) {
            Some(name) => Type::Concrete(name.clone()),
            None => ty.clone(),
        },
        Type::Concrete(_) => ty.clone(),
        Type::Function(params, ret) => Type::Function(
            params.iter().map(|p| rename_vars(p, mapping)).collect(),
            Box::new(rename_vars(ret, mapping)),
        ),
        Type::Generic(name, args) => Type::Generic(
            name.clone(),
            args.iter().map(|a| rename_vars(a, mapping)).collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(n: u32) -> Type {
        Type::Variable(TypeVarId(n))
    }

    #[test]
    fn display_uses_source_syntax() {
        let ty = Type::function(
            vec![Type::int(), Type::list(var(3))],
            Type::result(Type::string(), Type::concrete(MATH_ERROR)),
        );
        insta::assert_snapshot!(ty.to_string(), @"(Int, List<t3>) -> Result<String, MathError>");
    }

    #[test]
    fn substitution_follows_chains_to_a_fixed_point() {
        let mut subst = Substitution::new();
        subst.bind_type(TypeVarId(0), var(1));
        subst.bind_type(TypeVarId(1), Type::list(var(2)));
        subst.bind_type(TypeVarId(2), Type::int());
        assert_eq!(subst.apply(&var(0)), Type::list(Type::int()));
    }

    #[test]
    fn apply_scheme_skips_quantified_vars() {
        let mut subst = Substitution::new();
        subst.bind_type(TypeVarId(0), Type::int());
        subst.bind_type(TypeVarId(1), Type::bool());
        let scheme = TypeScheme {
            type_vars: vec![TypeVarId(0)],
            ty: Type::function(vec![var(0)], var(1)),
        };
        let applied = subst.apply_scheme(&scheme);
        assert_eq!(applied.ty, Type::function(vec![var(0)], Type::bool()));
    }

    #[test]
    fn free_vars_and_occurs() {
        let ty = Type::function(vec![var(4)], Type::result(var(2), var(4)));
        let vars: Vec<_> = free_type_vars(&ty).into_iter().collect();
        assert_eq!(vars, vec![TypeVarId(2), TypeVarId(4)]);
        assert!(ty.occurs(TypeVarId(2)));
        assert!(!ty.occurs(TypeVarId(9)));
        assert!(!ty.is_ground());
    }

    #[test]
    fn scheme_free_vars_exclude_quantified() {
        let scheme = TypeScheme {
            type_vars: vec![TypeVarId(1)],
            ty: Type::function(vec![var(1)], var(2)),
        };
        assert_eq!(scheme.free_type_vars().into_iter().collect::<Vec<_>>(), vec![TypeVarId(2)]);
        assert_eq!(scheme.to_string(), "forall t1. (t1) -> t2");
    }

    #[test]
    fn sanitized_display_hides_inference_vars() {
        let ty = Type::function(vec![var(17)], var(17));
        assert_eq!(sanitize_type_display(&ty), "(a) -> a");
        let (l, r) = sanitize_type_pair_display(&var(9), &Type::list(var(3)));
        assert_eq!((l.as_str(), r.as_str()), ("b", "List<a>"));
    }

    #[test]
    fn specialization_names_are_symbol_safe() {
        assert_eq!(mangle_specialization("identity", &[Type::int()]), "identity$Int");
        assert_eq!(
            mangle_specialization("pair", &[Type::list(Type::string()), Type::bool()]),
            "pair$List_String$Bool"
        );
        assert_eq!(mangle_specialization("main", &[]), "main");
    }

    #[test]
    fn instantiate_is_single_pass() {
        let mut mapping = BTreeMap::new();
        mapping.insert(TypeVarId(0), Type::list(var(0)));
        let ty = Type::function(vec![var(0)], var(1));
        assert_eq!(
            ty.instantiate(&mapping),
            Type::function(vec![Type::list(var(0))], var(1))
        );
    }

    #[test]
    fn default_vars_grounds_leftovers() {
        let ty = Type::result(var(1), Type::string());
        assert_eq!(ty.default_vars(&Type::unit()), Type::result(Type::unit(), Type::string()));
    }
}

//! Typed high-level IR (HIR) for Osprey.
//!
//! HIR is the typed boundary between inference and lowering. Every node
//! carries its resolved [`Type`]; after inference those types still mention
//! the quantified variables of polymorphic functions, and [`mono`] rewrites
//! them into concrete specializations.

use std::collections::{BTreeMap, BTreeSet};

pub use osprey_ast::{BinOp, Lit, Span, UnaryOp};
use osprey_types::{Type, TypeScheme, TypeVarId};

pub mod mono;

// ---------------------------------------------------------------------------
// Type declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDef {
    pub name: String,
    pub tag: u32,
    pub fields: Vec<FieldDef>,
}

impl VariantDef {
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == field)
    }
}

/// A nominal union or record. Field types mention `params` as variables.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub params: Vec<TypeVarId>,
    pub variants: Vec<VariantDef>,
    pub is_record: bool,
}

impl TypeDef {
    pub fn variant(&self, name: &str) -> Option<&VariantDef> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn max_fields(&self) -> usize {
        self.variants.iter().map(|v| v.fields.len()).max().unwrap_or(0)
    }

    /// The nominal type with the given arguments.
    pub fn applied(&self, args: Vec<Type>) -> Type {
        if self.params.is_empty() {
            Type::Concrete(self.name.clone())
        } else {
            Type::Generic(self.name.clone(), args)
        }
    }

    /// Field types of `variant` for a concrete instantiation.
    pub fn field_types(&self, variant: &VariantDef, args: &[Type]) -> Vec<Type> {
        let mapping: BTreeMap<TypeVarId, Type> = self
            .params
            .iter()
            .copied()
            .zip(args.iter().cloned())
            .collect();
        variant
            .fields
            .iter()
            .map(|f| f.ty.instantiate(&mapping))
            .collect()
    }

    /// Slot of `field` when every variant that has it agrees on the slot.
    pub fn shared_field_slot(&self, field: &str) -> Option<usize> {
        let mut slot = None;
        for variant in &self.variants {
            match (variant.field_index(field), slot) {
                (Some(idx), None) => slot = Some(idx),
                (Some(idx), Some(prev)) if idx != prev => return None,
                (None, _) => return None,
                _ => {}
            }
        }
        slot
    }
}

/// Every union and record known to the compilation, builtins included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeCatalog {
    defs: BTreeMap<String, TypeDef>,
    variant_owner: BTreeMap<String, String>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: TypeDef) {
        for variant in &def.variants {
            self.variant_owner
                .insert(variant.name.clone(), def.name.clone());
        }
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.defs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Resolve a constructor name to its owning type and variant.
    pub fn lookup_variant(&self, variant: &str) -> Option<(&TypeDef, &VariantDef)> {
        let owner = self.variant_owner.get(variant)?;
        let def = self.defs.get(owner)?;
        Some((def, def.variant(variant)?))
    }

    /// The single record declaring `field`, if exactly one does.
    pub fn record_with_field(&self, field: &str) -> Option<&TypeDef> {
        let mut found = self
            .defs
            .values()
            .filter(|d| d.is_record && d.variants[0].field_index(field).is_some());
        let first = found.next()?;
        match found.next() {
            Some(_) => None,
            None => Some(first),
        }
    }

    /// The declaration behind a nominal type, if it is a union or record.
    pub fn def_of(&self, ty: &Type) -> Option<&TypeDef> {
        self.defs.get(ty.nominal_name()?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDef> {
        self.defs.values()
    }
}

// ---------------------------------------------------------------------------
// Program structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HirProgram {
    pub types: TypeCatalog,
    pub functions: Vec<HirFunction>,
    pub externs: Vec<HirExtern>,
    /// Top-level statements, run in order by the synthesized entry point.
    pub entry: Vec<HirStmt>,
}

impl HirProgram {
    pub fn function(&self, name: &str) -> Option<&HirFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirFunction {
    pub name: String,
    pub params: Vec<HirParam>,
    pub ret: Type,
    pub body: HirExpr,
    /// Generalized signature; quantified variables appear in the body types.
    pub scheme: TypeScheme,
    /// Declared effects. Effectful functions are inlined at call sites.
    pub effects: Vec<String>,
    pub span: Span,
}

impl HirFunction {
    pub fn is_generic(&self) -> bool {
        !self.scheme.is_mono()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirExtern {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirParam {
    pub name: String,
    pub ty: Type,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HirExpr {
    pub kind: HirExprKind,
    pub ty: Type,
    pub span: Span,
}

impl HirExpr {
    pub fn new(kind: HirExprKind, ty: Type, span: Span) -> Self {
        Self { kind, ty, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirExprKind {
    Lit(Lit),
    /// Parameter or `let`-bound local.
    Local(String),
    /// Top-level function; the node type is the instantiation at this use.
    Function(String),
    Extern(String),
    Binary {
        op: BinOp,
        left: Box<HirExpr>,
        right: Box<HirExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<HirExpr>,
    },
    /// Call of a function value, top-level function or extern. Arguments are
    /// already in parameter order.
    Call {
        callee: Box<HirExpr>,
        args: Vec<HirExpr>,
    },
    /// Builtin call. Arguments keep their source names so the code generator
    /// can validate them against the builtin table.
    BuiltinCall {
        name: String,
        args: Vec<HirArg>,
    },
    Lambda {
        params: Vec<HirParam>,
        body: Box<HirExpr>,
    },
    Match {
        scrutinee: Box<HirExpr>,
        arms: Vec<HirMatchArm>,
    },
    /// Arithmetic that can fail at run time. The inner tree holds only raw
    /// arithmetic; the node type is `Result<T, MathError>`.
    CheckedArith(Box<HirExpr>),
    /// Union variant or record construction, fields in declaration order.
    Construct {
        type_name: String,
        variant: String,
        fields: Vec<HirExpr>,
    },
    Update {
        target: Box<HirExpr>,
        fields: Vec<(String, HirExpr)>,
    },
    FieldAccess {
        expr: Box<HirExpr>,
        field: String,
    },
    Block {
        stmts: Vec<HirStmt>,
        result: Option<Box<HirExpr>>,
    },
    List(Vec<HirExpr>),
    Index {
        list: Box<HirExpr>,
        index: Box<HirExpr>,
    },
    Interpolated(Vec<HirExpr>),
    Perform {
        effect: String,
        operation: String,
        args: Vec<HirExpr>,
    },
    Handle {
        effect: String,
        arms: Vec<HirHandlerArm>,
        body: Box<HirExpr>,
    },
    Spawn(Box<HirExpr>),
    Await(Box<HirExpr>),
    Yield(Option<Box<HirExpr>>),
    ChannelCreate {
        capacity: Option<Box<HirExpr>>,
    },
    Send {
        channel: Box<HirExpr>,
        value: Box<HirExpr>,
    },
    Recv(Box<HirExpr>),
    Select(Vec<HirSelectArm>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirArg {
    pub name: Option<String>,
    pub value: HirExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirMatchArm {
    pub pattern: HirPattern,
    pub body: HirExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirHandlerArm {
    pub operation: String,
    pub params: Vec<HirParam>,
    pub body: HirExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirSelectArm {
    /// Name bound to the received value, if any.
    pub binding: Option<HirParam>,
    pub op: HirSelectOp,
    pub body: HirExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirSelectOp {
    Recv(HirExpr),
    Send(HirExpr, HirExpr),
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirStmt {
    Let {
        name: String,
        mutable: bool,
        value: HirExpr,
        /// Variables generalized at this binding; empty for monomorphic lets.
        generalized: Vec<TypeVarId>,
    },
    Assign {
        name: String,
        value: HirExpr,
    },
    Expr(HirExpr),
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HirPattern {
    pub kind: HirPatternKind,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirPatternKind {
    Wildcard,
    Bind(String),
    Lit(Lit),
    /// `fields` pairs a payload slot index with the sub-pattern for it.
    Variant {
        type_name: String,
        variant: String,
        tag: u32,
        fields: Vec<(usize, HirPattern)>,
    },
}

impl HirPattern {
    /// True for patterns that match every value.
    pub fn is_irrefutable(&self) -> bool {
        matches!(self.kind, HirPatternKind::Wildcard | HirPatternKind::Bind(_))
    }

    pub fn bindings(&self, out: &mut Vec<String>) {
        match &self.kind {
            HirPatternKind::Bind(name) => out.push(name.clone()),
            HirPatternKind::Variant { fields, .. } => {
                for (_, sub) in fields {
                    sub.bindings(out);
                }
            }
            HirPatternKind::Wildcard | HirPatternKind::Lit(_) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Type rewriting
// ---------------------------------------------------------------------------

type TypeMap<'a> = dyn FnMut(&Type) -> Type + 'a;

impl HirExpr {
    /// Rewrite every type in this tree, node types and binder types alike.
    pub fn map_types(&mut self, f: &mut TypeMap<'_>) {
        self.ty = f(&self.ty);
        match &mut self.kind {
            HirExprKind::Lit(_)
            | HirExprKind::Local(_)
            | HirExprKind::Function(_)
            | HirExprKind::Extern(_) => {}
            HirExprKind::Binary { left, right, .. } => {
                left.map_types(f);
                right.map_types(f);
            }
            HirExprKind::Unary { operand, .. } => operand.map_types(f),
            HirExprKind::Call { callee, args } => {
                callee.map_types(f);
                args.iter_mut().for_each(|a| a.map_types(f));
            }
            HirExprKind::BuiltinCall { args, .. } => {
                args.iter_mut().for_each(|a| a.value.map_types(f));
            }
            HirExprKind::Lambda { params, body } => {
                params.iter_mut().for_each(|p| p.ty = f(&p.ty));
                body.map_types(f);
            }
            HirExprKind::Match { scrutinee, arms } => {
                scrutinee.map_types(f);
                for arm in arms {
                    arm.pattern.map_types(f);
                    arm.body.map_types(f);
                }
            }
            HirExprKind::CheckedArith(inner)
            | HirExprKind::Spawn(inner)
            | HirExprKind::Await(inner)
            | HirExprKind::Recv(inner) => inner.map_types(f),
            HirExprKind::Construct { fields, .. }
            | HirExprKind::List(fields)
            | HirExprKind::Interpolated(fields)
            | HirExprKind::Perform { args: fields, .. } => {
                fields.iter_mut().for_each(|e| e.map_types(f));
            }
            HirExprKind::Update { target, fields } => {
                target.map_types(f);
                fields.iter_mut().for_each(|(_, e)| e.map_types(f));
            }
            HirExprKind::FieldAccess { expr, .. } => expr.map_types(f),
            HirExprKind::Block { stmts, result } => {
                stmts.iter_mut().for_each(|s| s.map_types(f));
                if let Some(result) = result {
                    result.map_types(f);
                }
            }
            HirExprKind::Index { list, index } => {
                list.map_types(f);
                index.map_types(f);
            }
            HirExprKind::Handle { arms, body, .. } => {
                for arm in arms {
                    arm.params.iter_mut().for_each(|p| p.ty = f(&p.ty));
                    arm.body.map_types(f);
                }
                body.map_types(f);
            }
            HirExprKind::Yield(value) => {
                if let Some(v) = value {
                    v.map_types(f);
                }
            }
            HirExprKind::ChannelCreate { capacity } => {
                if let Some(c) = capacity {
                    c.map_types(f);
                }
            }
            HirExprKind::Send { channel, value } => {
                channel.map_types(f);
                value.map_types(f);
            }
            HirExprKind::Select(arms) => {
                for arm in arms {
                    if let Some(b) = &mut arm.binding {
                        b.ty = f(&b.ty);
                    }
                    match &mut arm.op {
                        HirSelectOp::Recv(ch) => ch.map_types(f),
                        HirSelectOp::Send(ch, v) => {
                            ch.map_types(f);
                            v.map_types(f);
                        }
                        HirSelectOp::Default => {}
                    }
                    arm.body.map_types(f);
                }
            }
        }
    }
}

impl HirStmt {
    pub fn map_types(&mut self, f: &mut TypeMap<'_>) {
        match self {
            HirStmt::Let { value, .. } | HirStmt::Assign { value, .. } => value.map_types(f),
            HirStmt::Expr(e) => e.map_types(f),
        }
    }
}

impl HirPattern {
    pub fn map_types(&mut self, f: &mut TypeMap<'_>) {
        self.ty = f(&self.ty);
        if let HirPatternKind::Variant { fields, .. } = &mut self.kind {
            fields.iter_mut().for_each(|(_, sub)| sub.map_types(f));
        }
    }
}

// ---------------------------------------------------------------------------
// Free variables
// ---------------------------------------------------------------------------

/// Locals referenced by `expr` that it does not bind itself, sorted by name.
///
/// Closure conversion captures exactly this set.
pub fn free_locals(expr: &HirExpr, params: &[HirParam]) -> BTreeSet<String> {
    let mut scope = Scope::default();
    for p in params {
        scope.bind(&p.name);
    }
    let mut out = BTreeSet::new();
    collect_free(expr, &mut scope, &mut out);
    out
}

#[derive(Default)]
struct Scope {
    bound: Vec<String>,
}

impl Scope {
    fn bind(&mut self, name: &str) {
        self.bound.push(name.to_string());
    }

    fn is_bound(&self, name: &str) -> bool {
        self.bound.iter().any(|b| b == name)
    }

    fn mark(&self) -> usize {
        self.bound.len()
    }

    fn reset(&mut self, mark: usize) {
        self.bound.truncate(mark);
    }
}

fn collect_free(expr: &HirExpr, scope: &mut Scope, out: &mut BTreeSet<String>) {
    match &expr.kind {
        HirExprKind::Local(name) => {
            if !scope.is_bound(name) {
                out.insert(name.clone());
            }
        }
        HirExprKind::Lit(_) | HirExprKind::Function(_) | HirExprKind::Extern(_) => {}
        HirExprKind::Binary { left, right, .. } => {
            collect_free(left, scope, out);
            collect_free(right, scope, out);
        }
        HirExprKind::Unary { operand, .. } => collect_free(operand, scope, out),
        HirExprKind::Call { callee, args } => {
            collect_free(callee, scope, out);
            for arg in args {
                collect_free(arg, scope, out);
            }
        }
        HirExprKind::BuiltinCall { args, .. } => {
            for arg in args {
                collect_free(&arg.value, scope, out);
            }
        }
        HirExprKind::Lambda { params, body } => {
            let mark = scope.mark();
            for p in params {
                scope.bind(&p.name);
            }
            collect_free(body, scope, out);
            scope.reset(mark);
        }
        HirExprKind::Match { scrutinee, arms } => {
            collect_free(scrutinee, scope, out);
            for arm in arms {
                let mark = scope.mark();
                let mut names = Vec::new();
                arm.pattern.bindings(&mut names);
                for name in &names {
                    scope.bind(name);
                }
                collect_free(&arm.body, scope, out);
                scope.reset(mark);
            }
        }
        HirExprKind::CheckedArith(inner) | HirExprKind::Spawn(inner) | HirExprKind::Await(inner) => {
            collect_free(inner, scope, out)
        }
        HirExprKind::Recv(inner) => collect_free(inner, scope, out),
        HirExprKind::Construct { fields, .. } | HirExprKind::List(fields) => {
            for f in fields {
                collect_free(f, scope, out);
            }
        }
        HirExprKind::Interpolated(parts) => {
            for p in parts {
                collect_free(p, scope, out);
            }
        }
        HirExprKind::Update { target, fields } => {
            collect_free(target, scope, out);
            for (_, f) in fields {
                collect_free(f, scope, out);
            }
        }
        HirExprKind::FieldAccess { expr, .. } => collect_free(expr, scope, out),
        HirExprKind::Block { stmts, result } => {
            let mark = scope.mark();
            for stmt in stmts {
                match stmt {
                    HirStmt::Let { name, value, .. } => {
                        collect_free(value, scope, out);
                        scope.bind(name);
                    }
                    HirStmt::Assign { name, value } => {
                        if !scope.is_bound(name) {
                            out.insert(name.clone());
                        }
                        collect_free(value, scope, out);
                    }
                    HirStmt::Expr(e) => collect_free(e, scope, out),
                }
            }
            if let Some(result) = result {
                collect_free(result, scope, out);
            }
            scope.reset(mark);
        }
        HirExprKind::Index { list, index } => {
            collect_free(list, scope, out);
            collect_free(index, scope, out);
        }
        HirExprKind::Perform { args, .. } => {
            for a in args {
                collect_free(a, scope, out);
            }
        }
        HirExprKind::Handle { arms, body, .. } => {
            for arm in arms {
                let mark = scope.mark();
                for p in &arm.params {
                    scope.bind(&p.name);
                }
                collect_free(&arm.body, scope, out);
                scope.reset(mark);
            }
            collect_free(body, scope, out);
        }
        HirExprKind::Yield(value) => {
            if let Some(v) = value {
                collect_free(v, scope, out);
            }
        }
        HirExprKind::ChannelCreate { capacity } => {
            if let Some(c) = capacity {
                collect_free(c, scope, out);
            }
        }
        HirExprKind::Send { channel, value } => {
            collect_free(channel, scope, out);
            collect_free(value, scope, out);
        }
        HirExprKind::Select(arms) => {
            for arm in arms {
                match &arm.op {
                    HirSelectOp::Recv(ch) => collect_free(ch, scope, out),
                    HirSelectOp::Send(ch, v) => {
                        collect_free(ch, scope, out);
                        collect_free(v, scope, out);
                    }
                    HirSelectOp::Default => {}
                }
                let mark = scope.mark();
                if let Some(b) = &arm.binding {
                    scope.bind(&b.name);
                }
                collect_free(&arm.body, scope, out);
                scope.reset(mark);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str, ty: Type) -> HirExpr {
        HirExpr::new(HirExprKind::Local(name.into()), ty, Span::synthetic())
    }

    fn param(name: &str) -> HirParam {
        HirParam {
            name: name.into(),
            ty: Type::int(),
        }
    }

    #[test]
    fn free_locals_respects_lambda_and_let_scopes() {
        let body = HirExpr::new(
            HirExprKind::Block {
                stmts: vec![HirStmt::Let {
                    name: "y".into(),
                    mutable: false,
                    value: local("offset", Type::int()),
                    generalized: vec![],
                }],
                result: Some(Box::new(HirExpr::new(
                    HirExprKind::Binary {
                        op: BinOp::Add,
                        left: Box::new(local("x", Type::int())),
                        right: Box::new(local("y", Type::int())),
                    },
                    Type::int(),
                    Span::synthetic(),
                ))),
            },
            Type::int(),
            Span::synthetic(),
        );
        let free = free_locals(&body, &[param("x")]);
        assert_eq!(free.into_iter().collect::<Vec<_>>(), vec!["offset".to_string()]);
    }

    #[test]
    fn match_bindings_are_not_free() {
        let pattern = HirPattern {
            kind: HirPatternKind::Bind("n".into()),
            ty: Type::int(),
        };
        let expr = HirExpr::new(
            HirExprKind::Match {
                scrutinee: Box::new(local("input", Type::int())),
                arms: vec![HirMatchArm {
                    pattern,
                    body: local("n", Type::int()),
                }],
            },
            Type::int(),
            Span::synthetic(),
        );
        let free = free_locals(&expr, &[]);
        assert!(free.contains("input"));
        assert!(!free.contains("n"));
    }

    #[test]
    fn shared_field_slot_requires_agreement() {
        let def = TypeDef {
            name: "Shape".into(),
            params: vec![],
            variants: vec![
                VariantDef {
                    name: "Circle".into(),
                    tag: 0,
                    fields: vec![FieldDef {
                        name: "size".into(),
                        ty: Type::int(),
                    }],
                },
                VariantDef {
                    name: "Square".into(),
                    tag: 1,
                    fields: vec![FieldDef {
                        name: "size".into(),
                        ty: Type::int(),
                    }],
                },
            ],
            is_record: false,
        };
        assert_eq!(def.shared_field_slot("size"), Some(0));
        assert_eq!(def.shared_field_slot("radius"), None);
        assert_eq!(def.max_fields(), 1);
    }

    #[test]
    fn catalog_resolves_variants_and_unique_record_fields() {
        let mut catalog = TypeCatalog::new();
        catalog.insert(TypeDef {
            name: "Point".into(),
            params: vec![],
            variants: vec![VariantDef {
                name: "Point".into(),
                tag: 0,
                fields: vec![
                    FieldDef {
                        name: "x".into(),
                        ty: Type::int(),
                    },
                    FieldDef {
                        name: "y".into(),
                        ty: Type::int(),
                    },
                ],
            }],
            is_record: true,
        });
        let (def, variant) = catalog.lookup_variant("Point").expect("registered");
        assert!(def.is_record);
        assert_eq!(variant.field_index("y"), Some(1));
        assert_eq!(
            catalog.record_with_field("x").map(|d| d.name.as_str()),
            Some("Point")
        );
        assert!(catalog.record_with_field("z").is_none());
    }
}

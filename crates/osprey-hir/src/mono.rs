//! Monomorphization of typed HIR.
//!
//! Inference leaves polymorphic functions with quantified type variables in
//! their bodies. This pass walks the program from its roots (every
//! non-generic function plus the entry statements), discovers each concrete
//! instantiation at the use sites it reaches, and emits one [`MonoFunction`]
//! per distinct `(function, type arguments)` pair. Generic functions are only
//! reached through the work-list, so an unused generic produces nothing.
//!
//! Local `let` bindings of polymorphic lambdas are specialized the same way,
//! once per distinct use type, under the names `name#0`, `name#1`, ...
//!
//! Variables still unconstrained after inference default to `Unit`; no
//! variable survives this pass.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use osprey_types::{Type, TypeVarId, mangle_specialization};
use parking_lot::RwLock;

use crate::{
    HirArg, HirExpr, HirExprKind, HirExtern, HirHandlerArm, HirMatchArm, HirParam, HirPattern,
    HirPatternKind, HirProgram, HirSelectArm, HirSelectOp, HirStmt, Span, TypeCatalog,
};

// ---------------------------------------------------------------------------
// Specialization cache
// ---------------------------------------------------------------------------

/// Identity of one specialization: a function and its concrete type tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecKey {
    pub function: String,
    pub args: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specialization {
    pub key: SpecKey,
    /// Mangled symbol, e.g. `identity$Int`. Equal to the function name for
    /// monomorphic functions.
    pub symbol: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Append-only map from [`SpecKey`] to its specialization.
///
/// Entries are fully built before insertion and never removed or replaced,
/// so a reader holding an `Arc` never observes a partial entry.
#[derive(Debug, Default)]
pub struct SpecializationCache {
    entries: RwLock<BTreeMap<SpecKey, Arc<Specialization>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SpecializationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SpecKey) -> Option<Arc<Specialization>> {
        self.entries.read().get(key).cloned()
    }

    /// Look up `key`, creating its entry on first request.
    ///
    /// The flag is `true` when this call created the entry.
    pub fn get_or_insert(&self, key: SpecKey) -> (Arc<Specialization>, bool) {
        if let Some(existing) = self.entries.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return (existing.clone(), false);
        }
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return (existing.clone(), false);
        }
        let spec = Arc::new(Specialization {
            symbol: mangle_specialization(&key.function, &key.args),
            key: key.clone(),
        });
        entries.insert(key, spec.clone());
        self.misses.fetch_add(1, Ordering::Relaxed);
        (spec, true)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MonoError {
    #[error("unknown function `{name}` referenced during specialization")]
    UnknownFunction { name: String },
    #[error("cannot specialize `{function}` at type `{ty}`")]
    SchemeMismatch { function: String, ty: String },
}

/// One concrete compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct MonoFunction {
    pub symbol: String,
    pub source: String,
    pub type_args: Vec<Type>,
    pub params: Vec<HirParam>,
    pub ret: Type,
    pub body: HirExpr,
    pub effects: Vec<String>,
    pub span: Span,
}

impl MonoFunction {
    /// Effectful functions are inlined at call sites instead of compiled.
    pub fn is_effectful(&self) -> bool {
        !self.effects.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonoProgram {
    pub types: TypeCatalog,
    pub functions: Vec<MonoFunction>,
    pub externs: Vec<HirExtern>,
    pub entry: Vec<HirStmt>,
    pub stats: CacheStats,
}

impl MonoProgram {
    pub fn function(&self, symbol: &str) -> Option<&MonoFunction> {
        self.functions.iter().find(|f| f.symbol == symbol)
    }
}

pub fn monomorphize(program: &HirProgram) -> Result<MonoProgram, MonoError> {
    Monomorphizer::new(program).run()
}

// ---------------------------------------------------------------------------
// Work-list driver
// ---------------------------------------------------------------------------

type Mapping = BTreeMap<TypeVarId, Type>;

/// A local name visible while specializing a body. `instances` is `Some` for
/// polymorphic lets and records each distinct use type with its new name;
/// otherwise uses resolve to `renamed`.
struct LocalScope {
    name: String,
    renamed: String,
    instances: Option<Vec<(Type, String)>>,
}

pub struct Monomorphizer<'a> {
    program: &'a HirProgram,
    cache: SpecializationCache,
    worklist: VecDeque<Arc<Specialization>>,
    output: Vec<MonoFunction>,
    scopes: Vec<LocalScope>,
}

impl<'a> Monomorphizer<'a> {
    pub fn new(program: &'a HirProgram) -> Self {
        Self {
            program,
            cache: SpecializationCache::new(),
            worklist: VecDeque::new(),
            output: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub fn run(mut self) -> Result<MonoProgram, MonoError> {
        for function in &self.program.functions {
            if !function.is_generic() {
                let ty = function.scheme.ty.clone();
                self.request(&function.name, &ty)?;
            }
        }
        let (entry, _) = self.specialize_stmts(&self.program.entry, None, &Mapping::new())?;

        while let Some(spec) = self.worklist.pop_front() {
            let function = self.program.function(&spec.key.function).ok_or_else(|| {
                MonoError::UnknownFunction {
                    name: spec.key.function.clone(),
                }
            })?;
            let mapping: Mapping = function
                .scheme
                .type_vars
                .iter()
                .copied()
                .zip(spec.key.args.iter().cloned())
                .collect();
            self.scopes.clear();
            let body = self.specialize_expr(&function.body, &mapping)?;
            self.output.push(MonoFunction {
                symbol: spec.symbol.clone(),
                source: function.name.clone(),
                type_args: spec.key.args.clone(),
                params: function
                    .params
                    .iter()
                    .map(|p| concrete_param(p, &mapping))
                    .collect(),
                ret: concretize(&function.ret, &mapping),
                body,
                effects: function.effects.clone(),
                span: function.span,
            });
        }

        let stats = self.cache.stats();
        tracing::debug!(
            specializations = stats.entries,
            hits = stats.hits,
            "monomorphization finished"
        );
        Ok(MonoProgram {
            types: self.program.types.clone(),
            functions: self.output,
            externs: self.program.externs.clone(),
            entry,
            stats,
        })
    }

    /// Resolve a use of `name` at `use_ty` to a specialization symbol.
    fn request(&mut self, name: &str, use_ty: &Type) -> Result<String, MonoError> {
        let function = self
            .program
            .function(name)
            .ok_or_else(|| MonoError::UnknownFunction {
                name: name.to_string(),
            })?;
        let args = if function.is_generic() {
            let mut binding = Mapping::new();
            if !match_type(&function.scheme.ty, use_ty, &mut binding) {
                return Err(MonoError::SchemeMismatch {
                    function: name.to_string(),
                    ty: use_ty.to_string(),
                });
            }
            function
                .scheme
                .type_vars
                .iter()
                .map(|tv| {
                    binding
                        .get(tv)
                        .map(|t| t.default_vars(&Type::unit()))
                        .unwrap_or_else(Type::unit)
                })
                .collect()
        } else {
            Vec::new()
        };
        let (spec, created) = self.cache.get_or_insert(SpecKey {
            function: name.to_string(),
            args,
        });
        if created {
            tracing::debug!(function = name, symbol = %spec.symbol, "new specialization");
            self.worklist.push_back(spec.clone());
        } else {
            tracing::trace!(symbol = %spec.symbol, "specialization cache hit");
        }
        Ok(spec.symbol.clone())
    }

    fn resolve_local(&mut self, name: &str, ty: &Type) -> String {
        for scope in self.scopes.iter_mut().rev() {
            if scope.name != name {
                continue;
            }
            let Some(instances) = scope.instances.as_mut() else {
                return scope.renamed.clone();
            };
            if let Some((_, renamed)) = instances.iter().find(|(t, _)| t == ty) {
                return renamed.clone();
            }
            let renamed = format!("{name}#{}", instances.len());
            instances.push((ty.clone(), renamed.clone()));
            return renamed;
        }
        name.to_string()
    }

    fn shadow(&mut self, name: &str) {
        self.alias(name, name);
    }

    fn alias(&mut self, name: &str, renamed: &str) {
        self.scopes.push(LocalScope {
            name: name.to_string(),
            renamed: renamed.to_string(),
            instances: None,
        });
    }

    fn specialize_stmts(
        &mut self,
        stmts: &[HirStmt],
        result: Option<&HirExpr>,
        m: &Mapping,
    ) -> Result<(Vec<HirStmt>, Option<HirExpr>), MonoError> {
        let Some((first, rest)) = stmts.split_first() else {
            let result = match result {
                Some(r) => Some(self.specialize_expr(r, m)?),
                None => None,
            };
            return Ok((Vec::new(), result));
        };
        match first {
            HirStmt::Let {
                name,
                mutable,
                value,
                generalized,
            } if !generalized.is_empty() => {
                self.scopes.push(LocalScope {
                    name: name.clone(),
                    renamed: name.clone(),
                    instances: Some(Vec::new()),
                });
                let tail = self.specialize_stmts(rest, result, m);
                let instances = self
                    .scopes
                    .pop()
                    .and_then(|scope| scope.instances)
                    .unwrap_or_default();
                let (mut tail, result) = tail?;

                let pattern = value.ty.instantiate(m);
                let mut out = Vec::with_capacity(instances.len() + tail.len());
                for (use_ty, renamed) in instances {
                    let mut local = m.clone();
                    if !match_type(&pattern, &use_ty, &mut local) {
                        return Err(MonoError::SchemeMismatch {
                            function: name.clone(),
                            ty: use_ty.to_string(),
                        });
                    }
                    tracing::trace!(local = %renamed, ty = %use_ty, "specialized local binding");
                    // A recursive lambda calls its own instance.
                    self.alias(name, &renamed);
                    let value = self.specialize_expr(value, &local);
                    self.scopes.pop();
                    out.push(HirStmt::Let {
                        name: renamed,
                        mutable: *mutable,
                        value: value?,
                        generalized: Vec::new(),
                    });
                }
                out.append(&mut tail);
                Ok((out, result))
            }
            HirStmt::Let {
                name,
                mutable,
                value,
                ..
            } => {
                let recursive = !*mutable && matches!(value.kind, HirExprKind::Lambda { .. });
                if recursive {
                    self.shadow(name);
                }
                let value = self.specialize_expr(value, m);
                if recursive {
                    self.scopes.pop();
                }
                let value = value?;
                self.shadow(name);
                let tail = self.specialize_stmts(rest, result, m);
                self.scopes.pop();
                let (tail, result) = tail?;
                let mut out = vec![HirStmt::Let {
                    name: name.clone(),
                    mutable: *mutable,
                    value,
                    generalized: Vec::new(),
                }];
                out.extend(tail);
                Ok((out, result))
            }
            HirStmt::Assign { name, value } => {
                let stmt = HirStmt::Assign {
                    name: name.clone(),
                    value: self.specialize_expr(value, m)?,
                };
                let (tail, result) = self.specialize_stmts(rest, result, m)?;
                let mut out = vec![stmt];
                out.extend(tail);
                Ok((out, result))
            }
            HirStmt::Expr(expr) => {
                let stmt = HirStmt::Expr(self.specialize_expr(expr, m)?);
                let (tail, result) = self.specialize_stmts(rest, result, m)?;
                let mut out = vec![stmt];
                out.extend(tail);
                Ok((out, result))
            }
        }
    }

    fn specialize_boxed(&mut self, expr: &HirExpr, m: &Mapping) -> Result<Box<HirExpr>, MonoError> {
        Ok(Box::new(self.specialize_expr(expr, m)?))
    }

    fn specialize_all(&mut self, exprs: &[HirExpr], m: &Mapping) -> Result<Vec<HirExpr>, MonoError> {
        exprs.iter().map(|e| self.specialize_expr(e, m)).collect()
    }

    /// Run `f` with `names` shadowing any outer polymorphic local.
    fn scoped<T>(
        &mut self,
        names: &[String],
        f: impl FnOnce(&mut Self) -> Result<T, MonoError>,
    ) -> Result<T, MonoError> {
        let mark = self.scopes.len();
        for name in names {
            self.shadow(name);
        }
        let out = f(self);
        self.scopes.truncate(mark);
        out
    }

    fn specialize_expr(&mut self, expr: &HirExpr, m: &Mapping) -> Result<HirExpr, MonoError> {
        let ty = concretize(&expr.ty, m);
        let kind = match &expr.kind {
            HirExprKind::Lit(lit) => HirExprKind::Lit(lit.clone()),
            HirExprKind::Local(name) => HirExprKind::Local(self.resolve_local(name, &ty)),
            HirExprKind::Function(name) => HirExprKind::Function(self.request(name, &ty)?),
            HirExprKind::Extern(name) => HirExprKind::Extern(name.clone()),
            HirExprKind::Binary { op, left, right } => HirExprKind::Binary {
                op: *op,
                left: self.specialize_boxed(left, m)?,
                right: self.specialize_boxed(right, m)?,
            },
            HirExprKind::Unary { op, operand } => HirExprKind::Unary {
                op: *op,
                operand: self.specialize_boxed(operand, m)?,
            },
            HirExprKind::Call { callee, args } => HirExprKind::Call {
                callee: self.specialize_boxed(callee, m)?,
                args: self.specialize_all(args, m)?,
            },
            HirExprKind::BuiltinCall { name, args } => HirExprKind::BuiltinCall {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| {
                        Ok(HirArg {
                            name: a.name.clone(),
                            value: self.specialize_expr(&a.value, m)?,
                        })
                    })
                    .collect::<Result<_, MonoError>>()?,
            },
            HirExprKind::Lambda { params, body } => {
                let names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
                let body = self.scoped(&names, |this| this.specialize_boxed(body, m))?;
                HirExprKind::Lambda {
                    params: params.iter().map(|p| concrete_param(p, m)).collect(),
                    body,
                }
            }
            HirExprKind::Match { scrutinee, arms } => {
                let scrutinee = self.specialize_boxed(scrutinee, m)?;
                let mut out = Vec::with_capacity(arms.len());
                for arm in arms {
                    let mut names = Vec::new();
                    arm.pattern.bindings(&mut names);
                    let body = self.scoped(&names, |this| this.specialize_expr(&arm.body, m))?;
                    out.push(HirMatchArm {
                        pattern: concrete_pattern(&arm.pattern, m),
                        body,
                    });
                }
                HirExprKind::Match {
                    scrutinee,
                    arms: out,
                }
            }
            HirExprKind::CheckedArith(inner) => {
                HirExprKind::CheckedArith(self.specialize_boxed(inner, m)?)
            }
            HirExprKind::Construct {
                type_name,
                variant,
                fields,
            } => HirExprKind::Construct {
                type_name: type_name.clone(),
                variant: variant.clone(),
                fields: self.specialize_all(fields, m)?,
            },
            HirExprKind::Update { target, fields } => HirExprKind::Update {
                target: self.specialize_boxed(target, m)?,
                fields: fields
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), self.specialize_expr(value, m)?)))
                    .collect::<Result<_, MonoError>>()?,
            },
            HirExprKind::FieldAccess { expr, field } => HirExprKind::FieldAccess {
                expr: self.specialize_boxed(expr, m)?,
                field: field.clone(),
            },
            HirExprKind::Block { stmts, result } => {
                let (stmts, result) = self.scoped(&[], |this| {
                    this.specialize_stmts(stmts, result.as_deref(), m)
                })?;
                HirExprKind::Block {
                    stmts,
                    result: result.map(Box::new),
                }
            }
            HirExprKind::List(items) => HirExprKind::List(self.specialize_all(items, m)?),
            HirExprKind::Index { list, index } => HirExprKind::Index {
                list: self.specialize_boxed(list, m)?,
                index: self.specialize_boxed(index, m)?,
            },
            HirExprKind::Interpolated(parts) => {
                HirExprKind::Interpolated(self.specialize_all(parts, m)?)
            }
            HirExprKind::Perform {
                effect,
                operation,
                args,
            } => HirExprKind::Perform {
                effect: effect.clone(),
                operation: operation.clone(),
                args: self.specialize_all(args, m)?,
            },
            HirExprKind::Handle { effect, arms, body } => {
                let mut out = Vec::with_capacity(arms.len());
                for arm in arms {
                    let names: Vec<String> = arm.params.iter().map(|p| p.name.clone()).collect();
                    let body = self.scoped(&names, |this| this.specialize_expr(&arm.body, m))?;
                    out.push(HirHandlerArm {
                        operation: arm.operation.clone(),
                        params: arm.params.iter().map(|p| concrete_param(p, m)).collect(),
                        body,
                    });
                }
                HirExprKind::Handle {
                    effect: effect.clone(),
                    arms: out,
                    body: self.specialize_boxed(body, m)?,
                }
            }
            HirExprKind::Spawn(inner) => HirExprKind::Spawn(self.specialize_boxed(inner, m)?),
            HirExprKind::Await(inner) => HirExprKind::Await(self.specialize_boxed(inner, m)?),
            HirExprKind::Yield(value) => HirExprKind::Yield(match value {
                Some(v) => Some(self.specialize_boxed(v, m)?),
                None => None,
            }),
            HirExprKind::ChannelCreate { capacity } => HirExprKind::ChannelCreate {
                capacity: match capacity {
                    Some(c) => Some(self.specialize_boxed(c, m)?),
                    None => None,
                },
            },
            HirExprKind::Send { channel, value } => HirExprKind::Send {
                channel: self.specialize_boxed(channel, m)?,
                value: self.specialize_boxed(value, m)?,
            },
            HirExprKind::Recv(channel) => HirExprKind::Recv(self.specialize_boxed(channel, m)?),
            HirExprKind::Select(arms) => {
                let mut out = Vec::with_capacity(arms.len());
                for arm in arms {
                    let op = match &arm.op {
                        HirSelectOp::Recv(ch) => HirSelectOp::Recv(self.specialize_expr(ch, m)?),
                        HirSelectOp::Send(ch, v) => HirSelectOp::Send(
                            self.specialize_expr(ch, m)?,
                            self.specialize_expr(v, m)?,
                        ),
                        HirSelectOp::Default => HirSelectOp::Default,
                    };
                    let names: Vec<String> =
                        arm.binding.iter().map(|b| b.name.clone()).collect();
                    let body = self.scoped(&names, |this| this.specialize_expr(&arm.body, m))?;
                    out.push(HirSelectArm {
                        binding: arm.binding.as_ref().map(|b| concrete_param(b, m)),
                        op,
                        body,
                    });
                }
                HirExprKind::Select(out)
            }
        };
        Ok(HirExpr {
            kind,
            ty,
            span: expr.span,
        })
    }
}

fn concretize(ty: &Type, m: &Mapping) -> Type {
    ty.instantiate(m).default_vars(&Type::unit())
}

fn concrete_param(param: &HirParam, m: &Mapping) -> HirParam {
    HirParam {
        name: param.name.clone(),
        ty: concretize(&param.ty, m),
    }
}

fn concrete_pattern(pattern: &HirPattern, m: &Mapping) -> HirPattern {
    let kind = match &pattern.kind {
        HirPatternKind::Variant {
            type_name,
            variant,
            tag,
            fields,
        } => HirPatternKind::Variant {
            type_name: type_name.clone(),
            variant: variant.clone(),
            tag: *tag,
            fields: fields
                .iter()
                .map(|(slot, sub)| (*slot, concrete_pattern(sub, m)))
                .collect(),
        },
        other => other.clone(),
    };
    HirPattern {
        kind,
        ty: concretize(&pattern.ty, m),
    }
}

/// Structurally match a scheme body against a concrete use type, recording
/// what each variable stands for.
pub fn match_type(pattern: &Type, concrete: &Type, binding: &mut Mapping) -> bool {
    match (pattern, concrete) {
        (Type::Variable(v), _) => match binding.get(v) {
            Some(prev) => prev == concrete,
            None => {
                binding.insert(*v, concrete.clone());
                true
            }
        },
        (Type::Concrete(a), Type::Concrete(b)) => a == b,
        (Type::Function(ps, r), Type::Function(qs, s)) => {
            ps.len() == qs.len()
                && ps.iter().zip(qs).all(|(p, q)| match_type(p, q, binding))
                && match_type(r, s, binding)
        }
        (Type::Generic(n, xs), Type::Generic(m, ys)) => {
            n == m && xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| match_type(x, y, binding))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HirFunction;
    use osprey_types::TypeScheme;

    fn tv(n: u32) -> Type {
        Type::Variable(TypeVarId(n))
    }

    fn expr(kind: HirExprKind, ty: Type) -> HirExpr {
        HirExpr::new(kind, ty, Span::synthetic())
    }

    fn identity() -> HirFunction {
        HirFunction {
            name: "identity".into(),
            params: vec![HirParam {
                name: "x".into(),
                ty: tv(0),
            }],
            ret: tv(0),
            body: expr(HirExprKind::Local("x".into()), tv(0)),
            scheme: TypeScheme {
                type_vars: vec![TypeVarId(0)],
                ty: Type::function(vec![tv(0)], tv(0)),
            },
            effects: vec![],
            span: Span::synthetic(),
        }
    }

    fn call_identity(arg: HirExpr) -> HirStmt {
        let arg_ty = arg.ty.clone();
        HirStmt::Expr(expr(
            HirExprKind::Call {
                callee: Box::new(expr(
                    HirExprKind::Function("identity".into()),
                    Type::function(vec![arg_ty.clone()], arg_ty.clone()),
                )),
                args: vec![arg],
            },
            arg_ty,
        ))
    }

    fn int(n: i64) -> HirExpr {
        expr(HirExprKind::Lit(crate::Lit::Int(n)), Type::int())
    }

    fn program(entry: Vec<HirStmt>) -> HirProgram {
        HirProgram {
            types: TypeCatalog::new(),
            functions: vec![identity()],
            externs: vec![],
            entry,
        }
    }

    #[test]
    fn same_concrete_tuple_shares_one_specialization() {
        let mono = monomorphize(&program(vec![call_identity(int(1)), call_identity(int(2))]))
            .expect("monomorphize");
        assert_eq!(mono.functions.len(), 1);
        assert_eq!(mono.functions[0].symbol, "identity$Int");
        assert_eq!(mono.functions[0].ret, Type::int());
        assert_eq!(mono.stats.entries, 1);
        assert_eq!(mono.stats.hits, 1);
    }

    #[test]
    fn distinct_tuples_get_distinct_specializations() {
        let text = expr(
            HirExprKind::Lit(crate::Lit::String("hi".into())),
            Type::string(),
        );
        let mono = monomorphize(&program(vec![call_identity(int(1)), call_identity(text)]))
            .expect("monomorphize");
        let mut symbols: Vec<_> = mono.functions.iter().map(|f| f.symbol.as_str()).collect();
        symbols.sort();
        assert_eq!(symbols, vec!["identity$Int", "identity$String"]);
    }

    #[test]
    fn unused_generic_produces_nothing() {
        let mono = monomorphize(&program(vec![])).expect("monomorphize");
        assert!(mono.functions.is_empty());
        assert!(mono.entry.is_empty());
    }

    #[test]
    fn call_sites_are_rewritten_to_mangled_symbols() {
        let mono = monomorphize(&program(vec![call_identity(int(7))])).expect("monomorphize");
        let HirStmt::Expr(call) = &mono.entry[0] else {
            panic!("expected call statement");
        };
        let HirExprKind::Call { callee, .. } = &call.kind else {
            panic!("expected call");
        };
        assert_eq!(callee.kind, HirExprKind::Function("identity$Int".into()));
    }

    #[test]
    fn polymorphic_local_is_specialized_per_use_type() {
        let lambda = expr(
            HirExprKind::Lambda {
                params: vec![HirParam {
                    name: "v".into(),
                    ty: tv(5),
                }],
                body: Box::new(expr(HirExprKind::Local("v".into()), tv(5))),
            },
            Type::function(vec![tv(5)], tv(5)),
        );
        let use_at = |arg: HirExpr| {
            let ty = arg.ty.clone();
            HirStmt::Expr(expr(
                HirExprKind::Call {
                    callee: Box::new(expr(
                        HirExprKind::Local("id".into()),
                        Type::function(vec![ty.clone()], ty.clone()),
                    )),
                    args: vec![arg],
                },
                ty,
            ))
        };
        let entry = vec![
            HirStmt::Let {
                name: "id".into(),
                mutable: false,
                value: lambda,
                generalized: vec![TypeVarId(5)],
            },
            use_at(int(1)),
            use_at(expr(HirExprKind::Lit(crate::Lit::Bool(true)), Type::bool())),
            use_at(int(2)),
        ];
        let mono = monomorphize(&program(entry)).expect("monomorphize");
        let lets: Vec<_> = mono
            .entry
            .iter()
            .filter_map(|s| match s {
                HirStmt::Let { name, value, .. } => Some((name.as_str(), value.ty.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            lets,
            vec![
                ("id#0", Type::function(vec![Type::int()], Type::int())),
                ("id#1", Type::function(vec![Type::bool()], Type::bool())),
            ]
        );
    }

    #[test]
    fn leftover_variables_default_to_unit() {
        let stmt = HirStmt::Expr(expr(HirExprKind::List(vec![]), Type::list(tv(9))));
        let mono = monomorphize(&program(vec![stmt])).expect("monomorphize");
        let HirStmt::Expr(list) = &mono.entry[0] else {
            panic!("expected expression");
        };
        assert_eq!(list.ty, Type::list(Type::unit()));
    }

    #[test]
    fn cache_reports_hits_and_misses() {
        let cache = SpecializationCache::new();
        let key = SpecKey {
            function: "f".into(),
            args: vec![Type::int()],
        };
        let (first, created) = cache.get_or_insert(key.clone());
        assert!(created);
        let (second, created_again) = cache.get_or_insert(key.clone());
        assert!(!created_again);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                hits: 1,
                misses: 1
            }
        );
        assert_eq!(cache.get(&key).map(|s| s.symbol.clone()), Some("f$Int".into()));
    }

    #[test]
    fn cache_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SpecializationCache>();
    }
}

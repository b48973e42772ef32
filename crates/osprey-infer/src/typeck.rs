//! Algorithm W over the Osprey AST.
//!
//! [`Inferer`] walks a [`Program`] and produces typed HIR. Declarations are
//! registered before any body is looked at: types, effects, externs, then
//! every top-level function signature, so bodies may refer to anything in
//! the unit. Function bodies are then inferred one strongly connected
//! component of the call graph at a time, callees first, and each component
//! is generalized as a group before its callers are checked.
//!
//! Types recorded on HIR nodes are resolved against the final substitution
//! just before [`Inferer::infer_program`] returns. Quantified variables of
//! generic functions and polymorphic local lambdas stay in place for the
//! monomorphizer.

use std::collections::{BTreeMap, BTreeSet};

use osprey_ast::{
    Argument, BinOp, Expr, ExprKind, ExternDecl, FieldPattern, FnDecl, HandlerArm,
    InterpolatedPart, Lit, MatchArm, Param, Pattern, PatternKind, Program, SelectArm, Span, Stmt,
    StmtKind, TypeDecl, TypeExpr, UnaryOp,
};
use osprey_hir::{
    HirArg, HirExpr, HirExprKind, HirExtern, HirFunction, HirHandlerArm, HirMatchArm, HirParam,
    HirPattern, HirPatternKind, HirProgram, HirSelectArm, HirSelectOp, HirStmt, TypeCatalog,
    TypeDef, VariantDef,
};
use osprey_types::{
    DIVISION_BY_ZERO, ERROR_VARIANT, INDEX_ERROR, ITERATOR, LIST, MATH_ERROR, MODULO_BY_ZERO,
    RESULT, SUCCESS_VARIANT, Substitution, Type, TypeScheme, TypeVarId, free_type_vars,
    sanitize_type_display,
};

use crate::builtins::{self, ArgumentMismatch, Builtin, bind_arguments};
use crate::exhaustive::missing_variants;
use crate::registry::{
    EffectRegistry, OperationSig, builtin_result_def, register_type_decls, resolve_type_expr,
};
use crate::{TypeError, Unifier, VarSupply};

// ---------------------------------------------------------------------------
// Type environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Local { mutable: bool },
    Function,
    Extern,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub scheme: TypeScheme,
    pub kind: BindingKind,
    /// Parameter names when calls through this binding may use named
    /// arguments.
    pub params: Option<Vec<String>>,
}

impl Binding {
    pub fn local(ty: Type, mutable: bool) -> Self {
        Self {
            scheme: TypeScheme::mono(ty),
            kind: BindingKind::Local { mutable },
            params: None,
        }
    }
}

/// Maps names to bindings through a stack of lexical scopes.
///
/// The outermost scope holds top-level functions and externs.
#[derive(Debug, Clone)]
pub struct TypeEnv {
    scopes: Vec<BTreeMap<String, Binding>>,
}

impl Default for TypeEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeEnv {
    pub fn new() -> Self {
        Self {
            scopes: vec![BTreeMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(BTreeMap::new());
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "pop_scope on the global scope");
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Bind in the innermost scope.
    pub fn bind(&mut self, name: impl Into<String>, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), binding);
        }
    }

    pub fn bind_global(&mut self, name: impl Into<String>, binding: Binding) {
        if let Some(scope) = self.scopes.first_mut() {
            scope.insert(name.into(), binding);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Free variables of every binding not named in `skip`.
    pub fn free_type_vars(&self, subst: &Substitution, skip: &BTreeSet<&str>) -> BTreeSet<TypeVarId> {
        let mut vars = BTreeSet::new();
        for scope in &self.scopes {
            for (name, binding) in scope {
                if skip.contains(name.as_str()) {
                    continue;
                }
                vars.extend(subst.apply_scheme(&binding.scheme).free_type_vars());
            }
        }
        vars
    }
}

/// Quantify the variables of `ty` that are not free in the environment.
///
/// Bindings named in `skip` are left out of the environment; a group of
/// mutually recursive functions is generalized that way.
pub fn generalize(
    ty: &Type,
    env: &TypeEnv,
    subst: &Substitution,
    skip: &BTreeSet<&str>,
) -> TypeScheme {
    let ty = subst.apply(ty);
    let env_vars = env.free_type_vars(subst, skip);
    let type_vars = free_type_vars(&ty).difference(&env_vars).copied().collect();
    TypeScheme { type_vars, ty }
}

/// Replace the quantified variables of `scheme` with fresh ones.
pub fn instantiate(scheme: &TypeScheme, supply: &mut VarSupply) -> Type {
    if scheme.is_mono() {
        return scheme.ty.clone();
    }
    let mapping: BTreeMap<TypeVarId, Type> = scheme
        .type_vars
        .iter()
        .map(|tv| (*tv, supply.fresh_type()))
        .collect();
    scheme.ty.instantiate(&mapping)
}

// ---------------------------------------------------------------------------
// Inferer
// ---------------------------------------------------------------------------

struct FnSig {
    params: Vec<HirParam>,
    ret: Type,
}

impl FnSig {
    fn function_type(&self) -> Type {
        Type::function(
            self.params.iter().map(|p| p.ty.clone()).collect(),
            self.ret.clone(),
        )
    }

    fn param_names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }
}

/// Tracks what a flattened arithmetic tree needs at its wrap site.
#[derive(Debug, Default)]
struct ArithmeticScan {
    /// Some divisor is not a literal, so a runtime check is needed.
    checked: bool,
    /// Message of the first operation known to fail.
    failure: Option<String>,
}

/// Inference state for one compilation unit.
#[derive(Debug)]
pub struct Inferer {
    unifier: Unifier,
    supply: VarSupply,
    env: TypeEnv,
    types: TypeCatalog,
    effects: EffectRegistry,
    externs: Vec<HirExtern>,
}

impl Default for Inferer {
    fn default() -> Self {
        Self::new()
    }
}

impl Inferer {
    pub fn new() -> Self {
        let mut supply = VarSupply::new();
        let mut types = TypeCatalog::new();
        types.insert(builtin_result_def(&mut supply));
        Self {
            unifier: Unifier::new(),
            supply,
            env: TypeEnv::new(),
            types,
            effects: EffectRegistry::new(),
            externs: Vec::new(),
        }
    }

    /// Record every unification step; see [`Unifier::unify_trace`].
    pub fn enable_tracing(&mut self) {
        self.unifier.enable_tracing();
    }

    pub fn unifier(&self) -> &Unifier {
        &self.unifier
    }

    pub fn types(&self) -> &TypeCatalog {
        &self.types
    }

    pub fn effects(&self) -> &EffectRegistry {
        &self.effects
    }

    pub fn infer_program(&mut self, program: &Program) -> Result<HirProgram, TypeError> {
        let type_decls: Vec<&TypeDecl> = program
            .statements
            .iter()
            .filter_map(|stmt| match &stmt.node {
                StmtKind::Type(decl) => Some(decl),
                _ => None,
            })
            .collect();
        register_type_decls(&type_decls, &mut self.types, &mut self.supply)?;
        for stmt in &program.statements {
            match &stmt.node {
                StmtKind::Effect(decl) => self.effects.register(decl, &self.types)?,
                StmtKind::Extern(decl) => self.declare_extern(decl)?,
                _ => {}
            }
        }

        let decls: Vec<&FnDecl> = program
            .statements
            .iter()
            .filter_map(|stmt| match &stmt.node {
                StmtKind::Fn(decl) => Some(decl),
                _ => None,
            })
            .collect();
        let mut signatures = Vec::with_capacity(decls.len());
        for decl in &decls {
            signatures.push(self.declare_function(decl)?);
        }

        let mut bodies: Vec<Option<HirExpr>> = vec![None; decls.len()];
        let mut schemes: Vec<Option<TypeScheme>> = vec![None; decls.len()];
        for component in function_components(&decls) {
            for &i in &component {
                bodies[i] = Some(self.infer_function_body(decls[i], &signatures[i])?);
            }
            let members: BTreeSet<&str> = component.iter().map(|&i| decls[i].name.as_str()).collect();
            for &i in &component {
                let scheme = generalize(
                    &signatures[i].function_type(),
                    &self.env,
                    self.unifier.substitution(),
                    &members,
                );
                tracing::debug!(
                    function = %decls[i].name,
                    ty = %sanitize_type_display(&scheme.ty),
                    quantified = scheme.type_vars.len(),
                    "inferred function"
                );
                self.env.bind_global(
                    decls[i].name.clone(),
                    Binding {
                        scheme: scheme.clone(),
                        kind: BindingKind::Function,
                        params: Some(signatures[i].param_names()),
                    },
                );
                schemes[i] = Some(scheme);
            }
        }

        self.env.push_scope();
        let entry = self.infer_entry(&program.statements);
        self.env.pop_scope();
        let mut entry = entry?;

        let mut functions = Vec::with_capacity(decls.len());
        for (((decl, sig), body), scheme) in decls.iter().zip(signatures).zip(bodies).zip(schemes) {
            let (Some(body), Some(scheme)) = (body, scheme) else {
                continue;
            };
            functions.push(HirFunction {
                name: decl.name.clone(),
                params: sig.params,
                ret: sig.ret,
                body,
                scheme,
                effects: decl.effects.clone(),
                span: decl.span,
            });
        }

        let subst = self.unifier.substitution();
        let mut resolve = |ty: &Type| subst.apply(ty);
        for function in &mut functions {
            function.body.map_types(&mut resolve);
            for param in &mut function.params {
                param.ty = subst.apply(&param.ty);
            }
            function.ret = subst.apply(&function.ret);
            function.scheme = subst.apply_scheme(&function.scheme);
        }
        for stmt in &mut entry {
            stmt.map_types(&mut resolve);
        }

        tracing::debug!(
            functions = functions.len(),
            entry_statements = entry.len(),
            bindings = self.unifier.substitution().len(),
            "type inference finished"
        );
        Ok(HirProgram {
            types: self.types.clone(),
            functions,
            externs: self.externs.clone(),
            entry,
        })
    }

    /// Top-level `let`, assignment and expression statements, in order.
    fn infer_entry(&mut self, statements: &[Stmt]) -> Result<Vec<HirStmt>, TypeError> {
        let mut entry = Vec::new();
        for stmt in statements {
            if matches!(
                stmt.node,
                StmtKind::Let { .. } | StmtKind::Assign { .. } | StmtKind::Expr(_)
            ) && let Some(hir) = self.infer_stmt(stmt)?
            {
                entry.push(hir);
            }
        }
        Ok(entry)
    }

    fn declare_function(&mut self, decl: &FnDecl) -> Result<FnSig, TypeError> {
        if let Some(effect) = decl.effects.iter().find(|e| self.effects.get(e).is_none()) {
            return Err(TypeError::UnknownEffect {
                effect: effect.clone(),
                span: decl.span,
            });
        }
        let mut params = Vec::with_capacity(decl.params.len());
        for param in &decl.params {
            params.push(HirParam {
                name: param.name.clone(),
                ty: self.annotated(param.annotation.as_ref(), param.span)?,
            });
        }
        let ret = self.annotated(decl.return_annotation.as_ref(), decl.span)?;
        let sig = FnSig { params, ret };
        self.env.bind_global(
            decl.name.clone(),
            Binding {
                scheme: TypeScheme::mono(sig.function_type()),
                kind: BindingKind::Function,
                params: Some(sig.param_names()),
            },
        );
        Ok(sig)
    }

    fn infer_function_body(&mut self, decl: &FnDecl, sig: &FnSig) -> Result<HirExpr, TypeError> {
        self.in_scope(|this| {
            for param in &sig.params {
                this.env
                    .bind(param.name.clone(), Binding::local(param.ty.clone(), false));
            }
            let body = this.infer_expr(&decl.body)?;
            this.unifier.unify(&sig.ret, &body.ty, body.span)?;
            Ok(body)
        })
    }

    fn declare_extern(&mut self, decl: &ExternDecl) -> Result<(), TypeError> {
        let scope = BTreeMap::new();
        let params = decl
            .params
            .iter()
            .map(|(_, ty)| resolve_type_expr(ty, &self.types, &scope, decl.span))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = match &decl.return_annotation {
            Some(ty) => resolve_type_expr(ty, &self.types, &scope, decl.span)?,
            None => Type::unit(),
        };
        self.env.bind_global(
            decl.name.clone(),
            Binding {
                scheme: TypeScheme::mono(Type::function(params.clone(), ret.clone())),
                kind: BindingKind::Extern,
                params: Some(decl.params.iter().map(|(name, _)| name.clone()).collect()),
            },
        );
        self.externs.retain(|e| e.name != decl.name);
        self.externs.push(HirExtern {
            name: decl.name.clone(),
            params,
            ret,
            span: decl.span,
        });
        Ok(())
    }

    /// The written type, or a fresh variable when there is none.
    fn annotated(&mut self, annotation: Option<&TypeExpr>, span: Span) -> Result<Type, TypeError> {
        match annotation {
            Some(expr) => resolve_type_expr(expr, &self.types, &BTreeMap::new(), span),
            None => Ok(self.supply.fresh_type()),
        }
    }

    fn in_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, TypeError>,
    ) -> Result<T, TypeError> {
        self.env.push_scope();
        let result = f(self);
        self.env.pop_scope();
        result
    }

    fn fresh_args(&mut self, def: &TypeDef) -> Vec<Type> {
        def.params.iter().map(|_| self.supply.fresh_type()).collect()
    }

    // -- statements ---------------------------------------------------------

    /// Infer one statement. Declarations register themselves and yield no
    /// HIR statement.
    pub fn infer_stmt(&mut self, stmt: &Stmt) -> Result<Option<HirStmt>, TypeError> {
        match &stmt.node {
            StmtKind::Let {
                name,
                mutable,
                annotation,
                value,
            } => {
                let value_hir = match &value.node {
                    ExprKind::Lambda { params, .. } if !mutable => {
                        let names = params.iter().map(|p| p.name.clone()).collect();
                        self.infer_recursive(name, names, |this| this.infer_expr(value))?
                    }
                    _ => self.infer_expr(value)?,
                };
                if let Some(annotation) = annotation {
                    let declared = self.annotated(Some(annotation), stmt.span)?;
                    self.unifier.unify(&declared, &value_hir.ty, value.span)?;
                }
                let generalizable = !mutable && matches!(value.node, ExprKind::Lambda { .. });
                Ok(Some(self.bind_let(name, *mutable, value_hir, generalizable)))
            }
            StmtKind::Assign { name, value } => {
                let Some(binding) = self.env.lookup(name).cloned() else {
                    return Err(TypeError::UndefinedVariable {
                        name: name.clone(),
                        span: stmt.span,
                    });
                };
                if binding.kind != (BindingKind::Local { mutable: true }) {
                    return Err(TypeError::ImmutableAssign {
                        name: name.clone(),
                        span: stmt.span,
                    });
                }
                let value = self.infer_expr(value)?;
                self.unifier.unify(&binding.scheme.ty, &value.ty, value.span)?;
                Ok(Some(HirStmt::Assign {
                    name: name.clone(),
                    value,
                }))
            }
            StmtKind::Fn(decl) => {
                let names = decl.params.iter().map(|p| p.name.clone()).collect();
                let value = self.infer_recursive(&decl.name, names, |this| {
                    this.infer_lambda(
                        &decl.params,
                        decl.return_annotation.as_ref(),
                        &decl.body,
                        decl.span,
                    )
                })?;
                Ok(Some(self.bind_let(&decl.name, false, value, true)))
            }
            StmtKind::Extern(decl) => {
                self.declare_extern(decl)?;
                Ok(None)
            }
            StmtKind::Type(decl) => {
                register_type_decls(&[decl], &mut self.types, &mut self.supply)?;
                Ok(None)
            }
            StmtKind::Effect(decl) => {
                self.effects.register(decl, &self.types)?;
                Ok(None)
            }
            StmtKind::Expr(expr) => Ok(Some(HirStmt::Expr(self.infer_expr(expr)?))),
        }
    }

    /// Infer a lambda that may call itself through `name`. Inside the body
    /// the name is monomorphic; it is dropped again before generalization.
    fn infer_recursive(
        &mut self,
        name: &str,
        params: Vec<String>,
        f: impl FnOnce(&mut Self) -> Result<HirExpr, TypeError>,
    ) -> Result<HirExpr, TypeError> {
        let this_ty = self.supply.fresh_type();
        self.in_scope(|this| {
            this.env.bind(
                name,
                Binding {
                    scheme: TypeScheme::mono(this_ty.clone()),
                    kind: BindingKind::Local { mutable: false },
                    params: Some(params),
                },
            );
            let value = f(this)?;
            this.unifier.unify(&this_ty, &value.ty, value.span)?;
            Ok(value)
        })
    }

    fn bind_let(&mut self, name: &str, mutable: bool, value: HirExpr, generalizable: bool) -> HirStmt {
        let scheme = if generalizable {
            generalize(
                &value.ty,
                &self.env,
                self.unifier.substitution(),
                &BTreeSet::new(),
            )
        } else {
            TypeScheme::mono(value.ty.clone())
        };
        let params = match &value.kind {
            HirExprKind::Lambda { params, .. } if !mutable => {
                Some(params.iter().map(|p| p.name.clone()).collect())
            }
            _ => None,
        };
        let generalized = scheme.type_vars.clone();
        self.env.bind(
            name,
            Binding {
                scheme,
                kind: BindingKind::Local { mutable },
                params,
            },
        );
        HirStmt::Let {
            name: name.to_string(),
            mutable,
            value,
            generalized,
        }
    }

    // -- expressions --------------------------------------------------------

    pub fn infer_expr(&mut self, expr: &Expr) -> Result<HirExpr, TypeError> {
        let span = expr.span;
        match &expr.node {
            ExprKind::Lit(lit) => Ok(HirExpr::new(
                HirExprKind::Lit(lit.clone()),
                lit_type(lit),
                span,
            )),
            ExprKind::Var(name) => self.infer_var(name, span),
            ExprKind::Binary { op, left, right } => {
                let left = self.infer_expr(left)?;
                let right = self.infer_expr(right)?;
                let ty = self.binary_type(*op, &left, &right, span)?;
                Ok(HirExpr::new(
                    HirExprKind::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    ty,
                    span,
                ))
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.infer_expr(operand)?;
                let ty = match op {
                    UnaryOp::Not => Type::bool(),
                    UnaryOp::Neg if self.unifier.apply(&operand.ty).is_float() => Type::float(),
                    UnaryOp::Neg => Type::int(),
                };
                self.unifier.unify(&ty, &operand.ty, operand.span)?;
                Ok(HirExpr::new(
                    HirExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    ty,
                    span,
                ))
            }
            ExprKind::Call { func, args } => self.infer_call(func, args, span),
            ExprKind::Lambda {
                params,
                return_annotation,
                body,
            } => self.infer_lambda(params, return_annotation.as_ref(), body, span),
            ExprKind::Match { scrutinee, arms } => self.infer_match(scrutinee, arms, span),
            ExprKind::Result {
                success,
                value,
                error_type,
            } => self.infer_result(*success, value, error_type.as_deref(), span),
            ExprKind::FieldAccess { expr: target, field } => {
                let target = self.infer_expr(target)?;
                let ty = self.field_type(&target.ty, field, span)?;
                Ok(HirExpr::new(
                    HirExprKind::FieldAccess {
                        expr: Box::new(target),
                        field: field.clone(),
                    },
                    ty,
                    span,
                ))
            }
            ExprKind::Construct { type_name, fields } => self.infer_construct(type_name, fields, span),
            ExprKind::Update { target, fields } => self.infer_update(target, fields, span),
            ExprKind::Block { statements, result } => self.in_scope(|this| {
                let mut stmts = Vec::with_capacity(statements.len());
                for stmt in statements {
                    if let Some(hir) = this.infer_stmt(stmt)? {
                        stmts.push(hir);
                    }
                }
                let result = match result {
                    Some(result) => Some(Box::new(this.infer_expr(result)?)),
                    None => None,
                };
                let ty = result.as_ref().map_or_else(Type::unit, |r| r.ty.clone());
                Ok(HirExpr::new(HirExprKind::Block { stmts, result }, ty, span))
            }),
            ExprKind::List(items) => {
                let elem = self.supply.fresh_type();
                let mut hir_items = Vec::with_capacity(items.len());
                for item in items {
                    let item = self.infer_expr(item)?;
                    self.unifier.unify(&elem, &item.ty, item.span)?;
                    hir_items.push(item);
                }
                Ok(HirExpr::new(HirExprKind::List(hir_items), Type::list(elem), span))
            }
            ExprKind::Index { list, index } => {
                let list = self.infer_expr(list)?;
                let elem = self.supply.fresh_type();
                self.unifier.unify(&Type::list(elem.clone()), &list.ty, list.span)?;
                let index = self.infer_expr(index)?;
                self.unifier.unify(&Type::int(), &index.ty, index.span)?;
                Ok(HirExpr::new(
                    HirExprKind::Index {
                        list: Box::new(list),
                        index: Box::new(index),
                    },
                    Type::result(elem, Type::concrete(INDEX_ERROR)),
                    span,
                ))
            }
            ExprKind::Interpolated(parts) => {
                let mut hir_parts = Vec::with_capacity(parts.len());
                for part in parts {
                    hir_parts.push(match part {
                        InterpolatedPart::Text(text) => HirExpr::new(
                            HirExprKind::Lit(Lit::String(text.clone())),
                            Type::string(),
                            span,
                        ),
                        InterpolatedPart::Expr(expr) => self.infer_expr(expr)?,
                    });
                }
                Ok(HirExpr::new(
                    HirExprKind::Interpolated(hir_parts),
                    Type::string(),
                    span,
                ))
            }
            ExprKind::Perform {
                effect,
                operation,
                args,
            } => self.infer_perform(effect, operation, args, span),
            ExprKind::Handle { effect, arms, body } => self.infer_handle(effect, arms, body, span),
            ExprKind::Spawn(body) => {
                let body = self.infer_expr(body)?;
                let ty = Type::fiber(body.ty.clone());
                Ok(HirExpr::new(HirExprKind::Spawn(Box::new(body)), ty, span))
            }
            ExprKind::Await(fiber) => {
                let fiber = self.infer_expr(fiber)?;
                let result = self.supply.fresh_type();
                self.unifier
                    .unify(&Type::fiber(result.clone()), &fiber.ty, fiber.span)?;
                Ok(HirExpr::new(HirExprKind::Await(Box::new(fiber)), result, span))
            }
            ExprKind::Yield(value) => match value {
                Some(value) => {
                    let value = self.infer_expr(value)?;
                    let ty = value.ty.clone();
                    Ok(HirExpr::new(HirExprKind::Yield(Some(Box::new(value))), ty, span))
                }
                None => Ok(HirExpr::new(HirExprKind::Yield(None), Type::unit(), span)),
            },
            ExprKind::ChannelCreate { element, capacity } => {
                let elem = self.annotated(element.as_ref(), span)?;
                let capacity = match capacity {
                    Some(capacity) => {
                        let capacity = self.infer_expr(capacity)?;
                        self.unifier.unify(&Type::int(), &capacity.ty, capacity.span)?;
                        Some(Box::new(capacity))
                    }
                    None => None,
                };
                Ok(HirExpr::new(
                    HirExprKind::ChannelCreate { capacity },
                    Type::channel(elem),
                    span,
                ))
            }
            ExprKind::Send { channel, value } => {
                let (channel, value) = self.infer_channel_send(channel, value)?;
                Ok(HirExpr::new(
                    HirExprKind::Send {
                        channel: Box::new(channel),
                        value: Box::new(value),
                    },
                    Type::int(),
                    span,
                ))
            }
            ExprKind::Recv(channel) => {
                let (channel, elem) = self.infer_channel_recv(channel)?;
                Ok(HirExpr::new(HirExprKind::Recv(Box::new(channel)), elem, span))
            }
            ExprKind::Select(arms) => self.infer_select(arms, span),
        }
    }

    fn infer_var(&mut self, name: &str, span: Span) -> Result<HirExpr, TypeError> {
        if let Some(binding) = self.env.lookup(name) {
            let kind = match binding.kind {
                BindingKind::Local { .. } => HirExprKind::Local(name.to_string()),
                BindingKind::Function => HirExprKind::Function(name.to_string()),
                BindingKind::Extern => HirExprKind::Extern(name.to_string()),
            };
            let scheme = binding.scheme.clone();
            let ty = instantiate(&scheme, &mut self.supply);
            return Ok(HirExpr::new(kind, ty, span));
        }
        if let Some((def, variant)) = self.types.lookup_variant(name) {
            if let Some(field) = variant.fields.first() {
                return Err(TypeError::MissingField {
                    field: field.name.clone(),
                    type_name: def.name.clone(),
                    span,
                });
            }
            let (def, variant) = (def.clone(), variant.name.clone());
            let args = self.fresh_args(&def);
            return Ok(HirExpr::new(
                HirExprKind::Construct {
                    type_name: def.name.clone(),
                    variant,
                    fields: Vec::new(),
                },
                def.applied(args),
                span,
            ));
        }
        if builtins::is_builtin(name) {
            return Err(TypeError::BuiltinAsValue {
                name: name.to_string(),
                span,
            });
        }
        Err(TypeError::UndefinedVariable {
            name: name.to_string(),
            span,
        })
    }

    fn binary_type(
        &mut self,
        op: BinOp,
        left: &HirExpr,
        right: &HirExpr,
        span: Span,
    ) -> Result<Type, TypeError> {
        if op.is_arithmetic() {
            return self.arithmetic_type(op, left, right);
        }
        if op.is_comparison() {
            self.unifier.unify(&left.ty, &right.ty, span)?;
            return Ok(Type::bool());
        }
        self.unifier.unify(&Type::bool(), &left.ty, left.span)?;
        self.unifier.unify(&Type::bool(), &right.ty, right.span)?;
        Ok(Type::bool())
    }

    /// Operand type of an arithmetic operator: `String` for `+` when either
    /// side is already a string, `Float` when either side is already a
    /// float, `Int` otherwise.
    fn arithmetic_type(&mut self, op: BinOp, left: &HirExpr, right: &HirExpr) -> Result<Type, TypeError> {
        let l = self.unifier.apply(&left.ty);
        let r = self.unifier.apply(&right.ty);
        let operand = if op == BinOp::Add && (l.is_string() || r.is_string()) {
            Type::string()
        } else if l.is_float() || r.is_float() {
            Type::float()
        } else {
            Type::int()
        };
        self.unifier.unify(&operand, &left.ty, left.span)?;
        self.unifier.unify(&operand, &right.ty, right.span)?;
        Ok(operand)
    }

    // -- calls --------------------------------------------------------------

    fn infer_call(&mut self, func: &Expr, args: &[Argument], span: Span) -> Result<HirExpr, TypeError> {
        let callee_name = match &func.node {
            ExprKind::Var(name) => Some(name.as_str()),
            _ => None,
        };
        if let Some(name) = callee_name
            && self.env.lookup(name).is_none()
            && let Some(builtin) = builtins::lookup(name)
        {
            return self.infer_builtin_call(builtin, args, span);
        }
        let display = callee_name.unwrap_or("<expression>").to_string();

        let ordered: Vec<&Expr> = if args.iter().any(|a| a.name.is_some()) {
            let params = callee_name
                .and_then(|name| self.env.lookup(name))
                .and_then(|binding| binding.params.clone());
            let Some(params) = params else {
                return Err(TypeError::NamedArgumentsNotAllowed {
                    callee: display,
                    span,
                });
            };
            let names: Vec<&str> = params.iter().map(String::as_str).collect();
            let arg_names: Vec<Option<&str>> = args.iter().map(|a| a.name.as_deref()).collect();
            let slots = bind_arguments(&names, &arg_names)
                .map_err(|err| argument_error(&display, err, span))?;
            let mut ordered: Vec<Option<&Expr>> = vec![None; names.len()];
            for (arg, slot) in args.iter().zip(slots) {
                ordered[slot] = Some(&arg.value);
            }
            ordered.into_iter().flatten().collect()
        } else {
            args.iter().map(|a| &a.value).collect()
        };

        let callee = self.infer_expr(func)?;
        let callee_ty = self.unifier.apply(&callee.ty);
        if let Type::Function(params, _) = &callee_ty
            && params.len() != ordered.len()
        {
            return Err(TypeError::WrongArgumentCount {
                function: display,
                expected: params.len(),
                found: ordered.len(),
                span,
            });
        }
        let mut hir_args = Vec::with_capacity(ordered.len());
        for arg in ordered {
            hir_args.push(self.infer_expr(arg)?);
        }
        let ret = match callee_ty {
            Type::Function(params, ret) => {
                for (param, arg) in params.iter().zip(&hir_args) {
                    self.unifier.unify(param, &arg.ty, arg.span)?;
                }
                *ret
            }
            other => {
                let ret = self.supply.fresh_type();
                let expected =
                    Type::function(hir_args.iter().map(|a| a.ty.clone()).collect(), ret.clone());
                self.unifier.unify(&expected, &other, span)?;
                ret
            }
        };
        Ok(HirExpr::new(
            HirExprKind::Call {
                callee: Box::new(callee),
                args: hir_args,
            },
            ret,
            span,
        ))
    }

    /// Builtin calls are typed against the builtin table. A call whose
    /// arguments do not line up with the table keeps its argument types
    /// unconstrained; the code generator rejects it.
    fn infer_builtin_call(
        &mut self,
        builtin: &'static Builtin,
        args: &[Argument],
        span: Span,
    ) -> Result<HirExpr, TypeError> {
        let vars: Vec<Type> = (0..builtin.type_var_count())
            .map(|_| self.supply.fresh_type())
            .collect();
        let (params, ret) = builtin.signature(&vars);
        let mut hir_args = Vec::with_capacity(args.len());
        for arg in args {
            hir_args.push(HirArg {
                name: arg.name.clone(),
                value: self.infer_expr(&arg.value)?,
            });
        }
        let names: Vec<&str> = builtin.param_names().collect();
        let arg_names: Vec<Option<&str>> = args.iter().map(|a| a.name.as_deref()).collect();
        if let Ok(slots) = bind_arguments(&names, &arg_names) {
            for (arg, slot) in hir_args.iter().zip(slots) {
                let expected = self.builtin_param_type(builtin, slot, &params[slot], &arg.value.ty);
                self.unifier.unify(&expected, &arg.value.ty, arg.value.span)?;
            }
        }
        tracing::trace!(builtin = builtin.name, "typed builtin call");
        Ok(HirExpr::new(
            HirExprKind::BuiltinCall {
                name: builtin.name.to_string(),
                args: hir_args,
            },
            ret,
            span,
        ))
    }

    /// Iterator parameters also accept a list of the same element type.
    fn builtin_param_type(&self, builtin: &Builtin, slot: usize, param: &Type, actual: &Type) -> Type {
        if builtin.takes_iterable(slot)
            && self.unifier.apply(actual).element_of(LIST).is_some()
            && let Some(elem) = param.element_of(ITERATOR)
        {
            return Type::list(elem.clone());
        }
        param.clone()
    }

    fn infer_lambda(
        &mut self,
        params: &[Param],
        return_annotation: Option<&TypeExpr>,
        body: &Expr,
        span: Span,
    ) -> Result<HirExpr, TypeError> {
        let mut hir_params = Vec::with_capacity(params.len());
        for param in params {
            hir_params.push(HirParam {
                name: param.name.clone(),
                ty: self.annotated(param.annotation.as_ref(), param.span)?,
            });
        }
        let ret = self.annotated(return_annotation, span)?;
        let body = self.in_scope(|this| {
            for param in &hir_params {
                this.env
                    .bind(param.name.clone(), Binding::local(param.ty.clone(), false));
            }
            let body = this.infer_expr(body)?;
            this.unifier.unify(&ret, &body.ty, body.span)?;
            Ok(body)
        })?;
        let ty = Type::function(
            hir_params.iter().map(|p| p.ty.clone()).collect(),
            body.ty.clone(),
        );
        Ok(HirExpr::new(
            HirExprKind::Lambda {
                params: hir_params,
                body: Box::new(body),
            },
            ty,
            span,
        ))
    }

    // -- matching -----------------------------------------------------------

    fn infer_match(&mut self, scrutinee: &Expr, arms: &[MatchArm], span: Span) -> Result<HirExpr, TypeError> {
        let scrutinee = self.infer_expr(scrutinee)?;
        if arms.is_empty() {
            return Err(TypeError::EmptyMatch { span });
        }
        let result_ty = self.supply.fresh_type();
        let mut hir_arms = Vec::with_capacity(arms.len());
        for arm in arms {
            let hir_arm = self.in_scope(|this| {
                let pattern = this.infer_pattern(&arm.pattern, &scrutinee.ty)?;
                let body = this.infer_expr(&arm.body)?;
                this.unifier.unify(&result_ty, &body.ty, body.span)?;
                Ok(HirMatchArm { pattern, body })
            })?;
            hir_arms.push(hir_arm);
        }
        self.check_exhaustive(&scrutinee.ty, &hir_arms, span)?;
        Ok(HirExpr::new(
            HirExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms: hir_arms,
            },
            result_ty,
            span,
        ))
    }

    fn check_exhaustive(&self, scrutinee: &Type, arms: &[HirMatchArm], span: Span) -> Result<(), TypeError> {
        let ty = self.unifier.apply(scrutinee);
        let Some(def) = self.types.def_of(&ty) else {
            return Ok(());
        };
        if def.variants.len() < 2 {
            return Ok(());
        }
        let patterns: Vec<&HirPattern> = arms.iter().map(|arm| &arm.pattern).collect();
        let missing = missing_variants(def, &patterns);
        if missing.is_empty() {
            return Ok(());
        }
        Err(TypeError::NonExhaustive {
            type_name: def.name.clone(),
            missing,
            span,
        })
    }

    /// Check `pattern` against `expected`, binding its names in the current
    /// scope.
    fn infer_pattern(&mut self, pattern: &Pattern, expected: &Type) -> Result<HirPattern, TypeError> {
        let span = pattern.span;
        let kind = match &pattern.node {
            PatternKind::Wildcard => HirPatternKind::Wildcard,
            PatternKind::Var(name) => {
                if let Some((def, variant)) = self.types.lookup_variant(name)
                    && variant.fields.is_empty()
                {
                    let (def, variant) = (def.clone(), variant.clone());
                    return self.variant_pattern(&def, &variant, &[], expected, span);
                }
                self.env
                    .bind(name.clone(), Binding::local(expected.clone(), false));
                HirPatternKind::Bind(name.clone())
            }
            PatternKind::Lit(lit) => {
                let ty = lit_type(lit);
                if !(ty.is_int() || ty.is_string() || ty.is_bool()) {
                    return Err(TypeError::LiteralPattern {
                        ty: ty.to_string(),
                        span,
                    });
                }
                self.unifier.unify(expected, &ty, span)?;
                HirPatternKind::Lit(lit.clone())
            }
            PatternKind::Constructor { name, fields } => {
                let Some((def, variant)) = self.types.lookup_variant(name) else {
                    return Err(TypeError::UnknownConstructor {
                        name: name.clone(),
                        span,
                    });
                };
                let (def, variant) = (def.clone(), variant.clone());
                return self.variant_pattern(&def, &variant, fields, expected, span);
            }
        };
        Ok(HirPattern {
            kind,
            ty: expected.clone(),
        })
    }

    fn variant_pattern(
        &mut self,
        def: &TypeDef,
        variant: &VariantDef,
        fields: &[FieldPattern],
        expected: &Type,
        span: Span,
    ) -> Result<HirPattern, TypeError> {
        let args = self.fresh_args(def);
        self.unifier.unify(expected, &def.applied(args.clone()), span)?;
        let field_types = def.field_types(variant, &args);
        let mut subs = Vec::with_capacity(fields.len());
        for field in fields {
            let Some(slot) = variant.field_index(&field.field) else {
                return Err(TypeError::UnknownField {
                    field: field.field.clone(),
                    type_name: def.name.clone(),
                    span,
                });
            };
            let field_ty = &field_types[slot];
            let sub = match &field.pattern {
                Some(pattern) => self.infer_pattern(pattern, field_ty)?,
                None => {
                    self.env
                        .bind(field.field.clone(), Binding::local(field_ty.clone(), false));
                    HirPattern {
                        kind: HirPatternKind::Bind(field.field.clone()),
                        ty: field_ty.clone(),
                    }
                }
            };
            subs.push((slot, sub));
        }
        Ok(HirPattern {
            kind: HirPatternKind::Variant {
                type_name: def.name.clone(),
                variant: variant.name.clone(),
                tag: variant.tag,
                fields: subs,
            },
            ty: expected.clone(),
        })
    }

    // -- results and arithmetic --------------------------------------------

    fn infer_result(
        &mut self,
        success: bool,
        value: &Expr,
        error_type: Option<&str>,
        span: Span,
    ) -> Result<HirExpr, TypeError> {
        match (success, error_type) {
            (true, None) => self.infer_arithmetic(value, span),
            (true, Some(_)) => {
                let value = self.infer_expr(value)?;
                let ty = Type::result(value.ty.clone(), self.supply.fresh_type());
                Ok(result_variant(SUCCESS_VARIANT, value, ty, span))
            }
            (false, error_type) => {
                let value = self.infer_expr(value)?;
                let err = if error_type.is_some_and(is_math_error) {
                    self.unifier.unify(&Type::string(), &value.ty, value.span)?;
                    Type::concrete(MATH_ERROR)
                } else {
                    value.ty.clone()
                };
                let ty = Type::result(self.supply.fresh_type(), err);
                Ok(result_variant(ERROR_VARIANT, value, ty, span))
            }
        }
    }

    /// Type an arithmetic wrapper.
    ///
    /// Wrappers nested inside the operands flatten into one tree checked at
    /// this site. A tree that divides by a literal zero anywhere becomes an
    /// `Error` value outright; one with any other division becomes
    /// [`HirExprKind::CheckedArith`]; anything else is the bare tree.
    fn infer_arithmetic(&mut self, value: &Expr, span: Span) -> Result<HirExpr, TypeError> {
        let mut scan = ArithmeticScan::default();
        let tree = self.infer_arithmetic_tree(value, &mut scan)?;
        let result_ty = Type::result(tree.ty.clone(), Type::concrete(MATH_ERROR));
        if let Some(message) = scan.failure {
            tracing::trace!(%message, "arithmetic fails statically");
            let payload = HirExpr::new(HirExprKind::Lit(Lit::String(message)), Type::string(), span);
            return Ok(result_variant(ERROR_VARIANT, payload, result_ty, span));
        }
        if scan.checked {
            return Ok(HirExpr::new(
                HirExprKind::CheckedArith(Box::new(tree)),
                result_ty,
                span,
            ));
        }
        Ok(tree)
    }

    fn infer_arithmetic_tree(&mut self, expr: &Expr, scan: &mut ArithmeticScan) -> Result<HirExpr, TypeError> {
        match &expr.node {
            ExprKind::Result {
                success: true,
                value,
                error_type: None,
            } => self.infer_arithmetic_tree(value, scan),
            ExprKind::Result {
                success: false,
                value,
                error_type: Some(name),
            } if is_math_error(name) => {
                let message = self.infer_expr(value)?;
                self.unifier.unify(&Type::string(), &message.ty, message.span)?;
                if scan.failure.is_none() {
                    scan.failure = Some(match &value.node {
                        ExprKind::Lit(Lit::String(text)) => text.clone(),
                        _ => DIVISION_BY_ZERO.to_string(),
                    });
                }
                // Placeholder operand; the tree is discarded.
                Ok(HirExpr::new(
                    HirExprKind::Lit(Lit::Int(0)),
                    self.supply.fresh_type(),
                    expr.span,
                ))
            }
            ExprKind::Binary { op, left, right } if op.is_arithmetic() => {
                let l = self.infer_arithmetic_tree(left, scan)?;
                let r = self.infer_arithmetic_tree(right, scan)?;
                if matches!(op, BinOp::Div | BinOp::Mod) {
                    if is_literal_zero(right) {
                        let message = if *op == BinOp::Div {
                            DIVISION_BY_ZERO
                        } else {
                            MODULO_BY_ZERO
                        };
                        if scan.failure.is_none() {
                            scan.failure = Some(message.to_string());
                        }
                    } else {
                        scan.checked = true;
                    }
                }
                let ty = self.arithmetic_type(*op, &l, &r)?;
                Ok(HirExpr::new(
                    HirExprKind::Binary {
                        op: *op,
                        left: Box::new(l),
                        right: Box::new(r),
                    },
                    ty,
                    expr.span,
                ))
            }
            _ => self.infer_expr(expr),
        }
    }

    // -- records and unions -------------------------------------------------

    /// Type of `field` on a value of type `owner`.
    ///
    /// An unresolved owner is pinned to the only record declaring `field`.
    /// On a union the field must sit in the same slot of every variant.
    fn field_type(&mut self, owner: &Type, field: &str, span: Span) -> Result<Type, TypeError> {
        let mut owner_ty = self.unifier.apply(owner);
        if owner_ty.is_var()
            && let Some(def) = self.types.record_with_field(field)
        {
            let def = def.clone();
            let args = self.fresh_args(&def);
            let applied = def.applied(args);
            self.unifier.unify(&applied, &owner_ty, span)?;
            owner_ty = applied;
        }
        let Some(def) = self.types.def_of(&owner_ty) else {
            return Err(TypeError::FieldOnNonStruct {
                field: field.to_string(),
                ty: sanitize_type_display(&owner_ty),
                span,
            });
        };
        let slot = if def.is_record {
            def.variants.first().and_then(|v| v.field_index(field))
        } else {
            def.shared_field_slot(field)
        };
        let variant = def.variants.iter().find(|v| v.field_index(field).is_some());
        slot.zip(variant)
            .and_then(|(slot, variant)| {
                def.field_types(variant, owner_ty.type_args())
                    .into_iter()
                    .nth(slot)
            })
            .ok_or_else(|| TypeError::UnknownField {
                field: field.to_string(),
                type_name: def.name.clone(),
                span,
            })
    }

    fn infer_construct(
        &mut self,
        name: &str,
        fields: &[(String, Expr)],
        span: Span,
    ) -> Result<HirExpr, TypeError> {
        let Some((def, variant)) = self.types.lookup_variant(name) else {
            return Err(TypeError::UnknownConstructor {
                name: name.to_string(),
                span,
            });
        };
        let (def, variant) = (def.clone(), variant.clone());
        if let Some((unknown, _)) = fields.iter().find(|(f, _)| variant.field_index(f).is_none()) {
            return Err(TypeError::UnknownField {
                field: unknown.clone(),
                type_name: def.name.clone(),
                span,
            });
        }
        let args = self.fresh_args(&def);
        let field_types = def.field_types(&variant, &args);
        let mut values = Vec::with_capacity(variant.fields.len());
        for (declared, field_ty) in variant.fields.iter().zip(&field_types) {
            let Some((_, expr)) = fields.iter().find(|(f, _)| *f == declared.name) else {
                return Err(TypeError::MissingField {
                    field: declared.name.clone(),
                    type_name: def.name.clone(),
                    span,
                });
            };
            let value = self.infer_expr(expr)?;
            self.unifier.unify(field_ty, &value.ty, value.span)?;
            values.push(value);
        }
        Ok(HirExpr::new(
            HirExprKind::Construct {
                type_name: def.name.clone(),
                variant: variant.name.clone(),
                fields: values,
            },
            def.applied(args),
            span,
        ))
    }

    fn infer_update(
        &mut self,
        target: &Expr,
        fields: &[(String, Expr)],
        span: Span,
    ) -> Result<HirExpr, TypeError> {
        let target = self.infer_expr(target)?;
        let mut hir_fields = Vec::with_capacity(fields.len());
        for (name, expr) in fields {
            let field_ty = self.field_type(&target.ty, name, span)?;
            let value = self.infer_expr(expr)?;
            self.unifier.unify(&field_ty, &value.ty, value.span)?;
            hir_fields.push((name.clone(), value));
        }
        let ty = self.unifier.apply(&target.ty);
        if let Some((first, _)) = fields.first()
            && !self.types.def_of(&ty).is_some_and(|def| def.is_record)
        {
            return Err(TypeError::FieldOnNonStruct {
                field: first.clone(),
                ty: sanitize_type_display(&ty),
                span,
            });
        }
        Ok(HirExpr::new(
            HirExprKind::Update {
                target: Box::new(target),
                fields: hir_fields,
            },
            ty,
            span,
        ))
    }

    // -- effects ------------------------------------------------------------

    fn operation(&self, effect: &str, operation: &str, span: Span) -> Result<OperationSig, TypeError> {
        let signature = self
            .effects
            .get(effect)
            .ok_or_else(|| TypeError::UnknownEffect {
                effect: effect.to_string(),
                span,
            })?;
        signature
            .operation(operation)
            .cloned()
            .ok_or_else(|| TypeError::UnknownOperation {
                effect: effect.to_string(),
                operation: operation.to_string(),
                span,
            })
    }

    fn infer_perform(
        &mut self,
        effect: &str,
        operation: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<HirExpr, TypeError> {
        let op = self.operation(effect, operation, span)?;
        if args.len() != op.params.len() {
            return Err(TypeError::WrongArgumentCount {
                function: format!("{effect}.{operation}"),
                expected: op.params.len(),
                found: args.len(),
                span,
            });
        }
        let mut hir_args = Vec::with_capacity(args.len());
        for (arg, param) in args.iter().zip(&op.params) {
            let arg = self.infer_expr(arg)?;
            self.unifier.unify(param, &arg.ty, arg.span)?;
            hir_args.push(arg);
        }
        Ok(HirExpr::new(
            HirExprKind::Perform {
                effect: effect.to_string(),
                operation: operation.to_string(),
                args: hir_args,
            },
            op.ret,
            span,
        ))
    }

    fn infer_handle(
        &mut self,
        effect: &str,
        arms: &[HandlerArm],
        body: &Expr,
        span: Span,
    ) -> Result<HirExpr, TypeError> {
        if self.effects.get(effect).is_none() {
            return Err(TypeError::UnknownEffect {
                effect: effect.to_string(),
                span,
            });
        }
        let mut hir_arms = Vec::with_capacity(arms.len());
        for arm in arms {
            let op = self.operation(effect, &arm.operation, arm.span)?;
            if arm.params.len() != op.params.len() {
                return Err(TypeError::ArityMismatch {
                    expected: op.params.len(),
                    found: arm.params.len(),
                    span: arm.span,
                });
            }
            let params: Vec<HirParam> = arm
                .params
                .iter()
                .zip(&op.params)
                .map(|(name, ty)| HirParam {
                    name: name.clone(),
                    ty: ty.clone(),
                })
                .collect();
            let arm_body = self.in_scope(|this| {
                for param in &params {
                    this.env
                        .bind(param.name.clone(), Binding::local(param.ty.clone(), false));
                }
                let body = this.infer_expr(&arm.body)?;
                this.unifier.unify(&op.ret, &body.ty, body.span)?;
                Ok(body)
            })?;
            hir_arms.push(HirHandlerArm {
                operation: arm.operation.clone(),
                params,
                body: arm_body,
            });
        }
        let body = self.infer_expr(body)?;
        let ty = body.ty.clone();
        Ok(HirExpr::new(
            HirExprKind::Handle {
                effect: effect.to_string(),
                arms: hir_arms,
                body: Box::new(body),
            },
            ty,
            span,
        ))
    }

    // -- concurrency --------------------------------------------------------

    fn infer_channel_recv(&mut self, channel: &Expr) -> Result<(HirExpr, Type), TypeError> {
        let channel = self.infer_expr(channel)?;
        let elem = self.supply.fresh_type();
        self.unifier
            .unify(&Type::channel(elem.clone()), &channel.ty, channel.span)?;
        Ok((channel, elem))
    }

    fn infer_channel_send(&mut self, channel: &Expr, value: &Expr) -> Result<(HirExpr, HirExpr), TypeError> {
        let channel = self.infer_expr(channel)?;
        let value = self.infer_expr(value)?;
        self.unifier
            .unify(&Type::channel(value.ty.clone()), &channel.ty, channel.span)?;
        Ok((channel, value))
    }

    fn infer_select(&mut self, arms: &[SelectArm], span: Span) -> Result<HirExpr, TypeError> {
        let result_ty = self.supply.fresh_type();
        let mut hir_arms = Vec::with_capacity(arms.len());
        for arm in arms {
            let (op, received) = match &arm.operation {
                None => (HirSelectOp::Default, None),
                Some(operation) => match &operation.node {
                    ExprKind::Send { channel, value } => {
                        let (channel, value) = self.infer_channel_send(channel, value)?;
                        (HirSelectOp::Send(channel, value), Some(Type::int()))
                    }
                    ExprKind::Recv(channel) => {
                        let (channel, elem) = self.infer_channel_recv(channel)?;
                        (HirSelectOp::Recv(channel), Some(elem))
                    }
                    _ => {
                        let (channel, elem) = self.infer_channel_recv(operation)?;
                        (HirSelectOp::Recv(channel), Some(elem))
                    }
                },
            };
            let binding = match (&arm.pattern.node, received) {
                (PatternKind::Wildcard, _) => None,
                (PatternKind::Var(name), Some(ty)) => Some(HirParam {
                    name: name.clone(),
                    ty,
                }),
                _ => {
                    return Err(TypeError::SelectPattern {
                        span: arm.pattern.span,
                    });
                }
            };
            let body = self.in_scope(|this| {
                if let Some(binding) = &binding {
                    this.env.bind(
                        binding.name.clone(),
                        Binding::local(binding.ty.clone(), false),
                    );
                }
                let body = this.infer_expr(&arm.body)?;
                this.unifier.unify(&result_ty, &body.ty, body.span)?;
                Ok(body)
            })?;
            hir_arms.push(HirSelectArm { binding, op, body });
        }
        Ok(HirExpr::new(HirExprKind::Select(hir_arms), result_ty, span))
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Infer a whole program with fresh inference state.
pub fn infer_program(program: &Program) -> Result<HirProgram, TypeError> {
    Inferer::new().infer_program(program)
}

/// Infer a closed expression and generalize its type.
pub fn infer_expression(expr: &Expr) -> Result<(HirExpr, TypeScheme), TypeError> {
    let mut inferer = Inferer::new();
    let mut hir = inferer.infer_expr(expr)?;
    let subst = inferer.unifier.substitution();
    hir.map_types(&mut |ty| subst.apply(ty));
    let scheme = generalize(&hir.ty, &inferer.env, subst, &BTreeSet::new());
    Ok((hir, scheme))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lit_type(lit: &Lit) -> Type {
    match lit {
        Lit::Int(_) => Type::int(),
        Lit::Float(_) => Type::float(),
        Lit::Bool(_) => Type::bool(),
        Lit::String(_) => Type::string(),
        Lit::Unit => Type::unit(),
    }
}

fn is_math_error(name: &str) -> bool {
    name == MATH_ERROR || name == "DivisionByZero"
}

fn is_literal_zero(expr: &Expr) -> bool {
    match &expr.node {
        ExprKind::Lit(Lit::Int(0)) => true,
        ExprKind::Result {
            success: true,
            value,
            error_type: None,
        } => is_literal_zero(value),
        _ => false,
    }
}

fn result_variant(variant: &str, payload: HirExpr, ty: Type, span: Span) -> HirExpr {
    HirExpr::new(
        HirExprKind::Construct {
            type_name: RESULT.to_string(),
            variant: variant.to_string(),
            fields: vec![payload],
        },
        ty,
        span,
    )
}

fn argument_error(function: &str, err: ArgumentMismatch, span: Span) -> TypeError {
    let function = function.to_string();
    match err {
        ArgumentMismatch::Count { expected, found } => TypeError::WrongArgumentCount {
            function,
            expected,
            found,
            span,
        },
        ArgumentMismatch::Unknown(name) => TypeError::UnknownNamedArgument {
            function,
            name,
            span,
        },
        ArgumentMismatch::Duplicate(name) => TypeError::DuplicateNamedArgument {
            function,
            name,
            span,
        },
        ArgumentMismatch::Missing(name) => TypeError::MissingNamedArgument {
            function,
            name,
            span,
        },
    }
}

// ---------------------------------------------------------------------------
// Call graph
// ---------------------------------------------------------------------------

/// Strongly connected components of the top-level call graph, callees
/// before callers. Members of a component are in source order.
fn function_components(decls: &[&FnDecl]) -> Vec<Vec<usize>> {
    let index_of: BTreeMap<&str, usize> = decls
        .iter()
        .enumerate()
        .map(|(i, decl)| (decl.name.as_str(), i))
        .collect();
    let edges: Vec<Vec<usize>> = decls
        .iter()
        .map(|decl| {
            let mut names = BTreeSet::new();
            referenced_names(&decl.body, &mut names);
            names
                .iter()
                .filter_map(|name| index_of.get(name.as_str()).copied())
                .collect()
        })
        .collect();
    let mut tarjan = Tarjan::new(&edges);
    for node in 0..decls.len() {
        if tarjan.index[node].is_none() {
            tarjan.visit(node);
        }
    }
    tarjan.components
}

struct Tarjan<'a> {
    edges: &'a [Vec<usize>],
    index: Vec<Option<usize>>,
    low: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next: usize,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn new(edges: &'a [Vec<usize>]) -> Self {
        Self {
            edges,
            index: vec![None; edges.len()],
            low: vec![0; edges.len()],
            on_stack: vec![false; edges.len()],
            stack: Vec::new(),
            next: 0,
            components: Vec::new(),
        }
    }

    fn visit(&mut self, node: usize) {
        self.index[node] = Some(self.next);
        self.low[node] = self.next;
        self.next += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let edges = self.edges;
        for &succ in &edges[node] {
            match self.index[succ] {
                None => {
                    self.visit(succ);
                    self.low[node] = self.low[node].min(self.low[succ]);
                }
                Some(idx) if self.on_stack[succ] => {
                    self.low[node] = self.low[node].min(idx);
                }
                Some(_) => {}
            }
        }

        if self.index[node] == Some(self.low[node]) {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}

/// Every name an expression mentions as a variable. Shadowing is ignored,
/// which can only merge components.
fn referenced_names(expr: &Expr, out: &mut BTreeSet<String>) {
    match &expr.node {
        ExprKind::Lit(_) => {}
        ExprKind::Var(name) => {
            out.insert(name.clone());
        }
        ExprKind::Binary { left, right, .. }
        | ExprKind::Index {
            list: left,
            index: right,
        }
        | ExprKind::Send {
            channel: left,
            value: right,
        } => {
            referenced_names(left, out);
            referenced_names(right, out);
        }
        ExprKind::Unary { operand: inner, .. }
        | ExprKind::Lambda { body: inner, .. }
        | ExprKind::Result { value: inner, .. }
        | ExprKind::FieldAccess { expr: inner, .. }
        | ExprKind::Spawn(inner)
        | ExprKind::Await(inner)
        | ExprKind::Recv(inner) => referenced_names(inner, out),
        ExprKind::Call { func, args } => {
            referenced_names(func, out);
            for arg in args {
                referenced_names(&arg.value, out);
            }
        }
        ExprKind::Match { scrutinee, arms } => {
            referenced_names(scrutinee, out);
            for arm in arms {
                referenced_names(&arm.body, out);
            }
        }
        ExprKind::Construct { fields, .. } => {
            for (_, value) in fields {
                referenced_names(value, out);
            }
        }
        ExprKind::Update { target, fields } => {
            referenced_names(target, out);
            for (_, value) in fields {
                referenced_names(value, out);
            }
        }
        ExprKind::Block { statements, result } => {
            for stmt in statements {
                match &stmt.node {
                    StmtKind::Let { value, .. } | StmtKind::Assign { value, .. } => {
                        referenced_names(value, out);
                    }
                    StmtKind::Fn(decl) => referenced_names(&decl.body, out),
                    StmtKind::Expr(expr) => referenced_names(expr, out),
                    StmtKind::Extern(_) | StmtKind::Type(_) | StmtKind::Effect(_) => {}
                }
            }
            if let Some(result) = result {
                referenced_names(result, out);
            }
        }
        ExprKind::List(items) | ExprKind::Perform { args: items, .. } => {
            for item in items {
                referenced_names(item, out);
            }
        }
        ExprKind::Interpolated(parts) => {
            for part in parts {
                if let InterpolatedPart::Expr(expr) = part {
                    referenced_names(expr, out);
                }
            }
        }
        ExprKind::Handle { arms, body, .. } => {
            for arm in arms {
                referenced_names(&arm.body, out);
            }
            referenced_names(body, out);
        }
        ExprKind::Yield(value) => {
            if let Some(value) = value {
                referenced_names(value, out);
            }
        }
        ExprKind::ChannelCreate { capacity, .. } => {
            if let Some(capacity) = capacity {
                referenced_names(capacity, out);
            }
        }
        ExprKind::Select(arms) => {
            for arm in arms {
                if let Some(operation) = &arm.operation {
                    referenced_names(operation, out);
                }
                referenced_names(&arm.body, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osprey_ast::build::*;

    fn fn_named(name: &str, body: Expr) -> FnDecl {
        fn_decl(name, vec![], body)
    }

    #[test]
    fn components_put_callees_first() {
        let main = fn_named("main", call("helper", vec![]));
        let helper = fn_named("helper", int(1));
        let components = function_components(&[&main, &helper]);
        assert_eq!(components, vec![vec![1], vec![0]]);
    }

    #[test]
    fn mutual_recursion_forms_one_component() {
        let even = fn_named("isEven", call("isOdd", vec![]));
        let odd = fn_named("isOdd", call("isEven", vec![]));
        let lone = fn_named("lone", int(0));
        let components = function_components(&[&even, &odd, &lone]);
        assert_eq!(components, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn scopes_shadow_and_restore() {
        let mut env = TypeEnv::new();
        env.bind("x", Binding::local(Type::int(), false));
        env.push_scope();
        env.bind("x", Binding::local(Type::string(), true));
        assert_eq!(env.lookup("x").map(|b| b.scheme.ty.clone()), Some(Type::string()));
        env.pop_scope();
        assert_eq!(env.lookup("x").map(|b| b.scheme.ty.clone()), Some(Type::int()));
    }

    #[test]
    fn generalize_skips_variables_free_in_the_environment() {
        let mut env = TypeEnv::new();
        let a = Type::Variable(TypeVarId(0));
        let b = Type::Variable(TypeVarId(1));
        env.bind("captured", Binding::local(a.clone(), false));
        let scheme = generalize(
            &Type::function(vec![a, b.clone()], b),
            &env,
            &Substitution::new(),
            &BTreeSet::new(),
        );
        assert_eq!(scheme.type_vars, vec![TypeVarId(1)]);
    }

    #[test]
    fn instantiate_uses_fresh_variables() {
        let scheme = TypeScheme {
            type_vars: vec![TypeVarId(0)],
            ty: Type::function(vec![Type::Variable(TypeVarId(0))], Type::Variable(TypeVarId(0))),
        };
        let mut supply = VarSupply::starting_at(7);
        let ty = instantiate(&scheme, &mut supply);
        let v = Type::Variable(TypeVarId(7));
        assert_eq!(ty, Type::function(vec![v.clone()], v));
    }
}

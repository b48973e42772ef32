//! Lowering of monomorphized HIR to MIR.
//!
//! Each non-effectful specialization becomes one MIR function. Effectful
//! functions are never compiled on their own; they are inlined wherever they
//! are called so their `perform`s see the caller's handlers. Lambdas and
//! spawned expressions are lifted to module-level functions that take their
//! closure cell as the first argument. Top-level statements and the call to
//! the user's `main` go into a synthesized exported `main`.

use std::collections::{BTreeMap, BTreeSet};

use osprey_hir::mono::{MonoFunction, MonoProgram};
use osprey_hir::{HirExpr, HirExprKind, HirExtern, HirParam, HirStmt, free_locals};
use osprey_infer::builtins::Permission;
use osprey_types::Type;

use crate::abi::{self, Imports};
use crate::effects::HandlerStack;
use crate::layout::{self, LayoutPlanner, value_type};
use crate::{
    CodegenError, MirBuilder, MirCallee, MirData, MirFunction, MirLinkage, MirModule,
    MirSignature, MirTerminator, MirType, MirValueId, MirVar, SecurityConfig,
};

mod builtins;
mod control;
mod expr;
mod pattern;

#[cfg(test)]
mod tests;

/// Exported process entry point.
pub const ENTRY_SYMBOL: &str = "main";
/// The user's own `main`, renamed so the entry point can wrap it.
pub const USER_MAIN_SYMBOL: &str = "__osprey_user_main";

#[derive(Debug, Clone, Default)]
pub struct LowerOptions {
    pub security: SecurityConfig,
}

pub fn lower_program(
    program: &MonoProgram,
    options: &LowerOptions,
) -> Result<MirModule, CodegenError> {
    ModuleLowerer::new(program, options).run()
}

/// Symbol a specialization is emitted under.
pub fn symbol_name(symbol: &str) -> String {
    if symbol == ENTRY_SYMBOL {
        USER_MAIN_SYMBOL.to_string()
    } else {
        symbol.to_string()
    }
}

pub fn function_signature(params: &[Type], ret: &Type) -> MirSignature {
    MirSignature::new(params.iter().map(value_type).collect(), Some(value_type(ret)))
}

/// Signature of a closure's code pointer: the cell comes first.
pub fn closure_signature(ty: &Type) -> Result<MirSignature, CodegenError> {
    match ty {
        Type::Function(params, ret) => {
            let mut sig_params = vec![MirType::I64];
            sig_params.extend(params.iter().map(value_type));
            Ok(MirSignature::new(sig_params, Some(value_type(ret))))
        }
        other => Err(CodegenError::UnsupportedExpression {
            detail: format!("call of non-function value of type `{other}`"),
        }),
    }
}

pub fn extern_signature(decl: &HirExtern) -> MirSignature {
    let ret = (!decl.ret.is_unit()).then(|| value_type(&decl.ret));
    MirSignature::new(decl.params.iter().map(value_type).collect(), ret)
}

// ---------------------------------------------------------------------------
// Module state
// ---------------------------------------------------------------------------

pub(crate) struct ModuleLowerer<'a> {
    program: &'a MonoProgram,
    options: &'a LowerOptions,
    layouts: LayoutPlanner<'a>,
    imports: Imports,
    strings: BTreeMap<String, String>,
    data: Vec<MirData>,
    functions: Vec<MirFunction>,
    adapters: BTreeSet<String>,
    lifted: u32,
}

impl<'a> ModuleLowerer<'a> {
    fn new(program: &'a MonoProgram, options: &'a LowerOptions) -> Self {
        Self {
            program,
            options,
            layouts: LayoutPlanner::new(&program.types),
            imports: Imports::new(),
            strings: BTreeMap::new(),
            data: Vec::new(),
            functions: Vec::new(),
            adapters: BTreeSet::new(),
            lifted: 0,
        }
    }

    fn run(mut self) -> Result<MirModule, CodegenError> {
        let program = self.program;
        for function in &program.functions {
            if function.is_effectful() {
                tracing::debug!(symbol = %function.symbol, "effectful; inlined at call sites");
                continue;
            }
            self.lower_function(function)?;
        }
        self.lower_entry()?;
        tracing::debug!(
            functions = self.functions.len(),
            strings = self.data.len(),
            layouts = self.layouts.cached(),
            "module lowered"
        );
        Ok(MirModule {
            functions: self.functions,
            externals: self.imports.into_map(),
            data: self.data,
        })
    }

    fn lower_function(&mut self, function: &'a MonoFunction) -> Result<(), CodegenError> {
        let params: Vec<Type> = function.params.iter().map(|p| p.ty.clone()).collect();
        let signature = function_signature(&params, &function.ret);
        let mut lowerer = FunctionLowerer::new(
            self,
            symbol_name(&function.symbol),
            signature,
            MirLinkage::Local,
        );
        lowerer.bind_params(&function.params, 0);
        let value = lowerer.lower_expr(&function.body)?;
        lowerer.b.terminate(MirTerminator::Return { value: Some(value) });
        let lowered = lowerer.finish();
        tracing::debug!(function = %lowered.name, blocks = lowered.blocks.len(), "lowered");
        self.functions.push(lowered);
        Ok(())
    }

    fn lower_entry(&mut self) -> Result<(), CodegenError> {
        let program = self.program;
        let signature = MirSignature::new(vec![], Some(MirType::I32));
        let mut lowerer = FunctionLowerer::new(self, ENTRY_SYMBOL, signature, MirLinkage::Export);
        lowerer.env.push_scope();
        for stmt in &program.entry {
            lowerer.lower_stmt(stmt)?;
        }
        if let Some(user_main) = program.function(ENTRY_SYMBOL) {
            if !user_main.params.is_empty() {
                return Err(CodegenError::UnsupportedStatement {
                    detail: "`main` must not take parameters".to_string(),
                });
            }
            if user_main.is_effectful() {
                lowerer.inline_function(user_main, Vec::new())?;
            } else {
                lowerer.b.call(
                    MirCallee::Local(USER_MAIN_SYMBOL.to_string()),
                    Vec::new(),
                    value_type(&user_main.ret),
                );
            }
        }
        let status = lowerer.b.iconst(MirType::I32, 0);
        lowerer.b.terminate(MirTerminator::Return {
            value: Some(status),
        });
        let entry = lowerer.finish();
        self.functions.push(entry);
        Ok(())
    }

    /// Data symbol holding `text` as a C string.
    fn intern(&mut self, text: &str) -> String {
        if let Some(symbol) = self.strings.get(text) {
            return symbol.clone();
        }
        let symbol = format!("__str{}", self.data.len());
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.data.push(MirData {
            name: symbol.clone(),
            bytes,
        });
        self.strings.insert(text.to_string(), symbol.clone());
        symbol
    }

    fn fresh_symbol(&mut self, prefix: &str) -> String {
        let n = self.lifted;
        self.lifted += 1;
        format!("{prefix}{n}")
    }

    fn extern_decl(&self, name: &str) -> Result<&'a HirExtern, CodegenError> {
        let program = self.program;
        program
            .externs
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| CodegenError::UnknownFunction {
                name: name.to_string(),
            })
    }

    fn function(&self, symbol: &str) -> Result<&'a MonoFunction, CodegenError> {
        let program = self.program;
        program
            .function(symbol)
            .ok_or_else(|| CodegenError::UnknownFunction {
                name: symbol.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Lexical environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct Local {
    pub var: MirVar,
    pub ty: Type,
}

/// Names in scope while lowering one body. Every local lives in a MIR
/// variable, so a snapshot stays valid anywhere later in the same function.
#[derive(Debug, Clone, Default)]
pub(crate) struct Env {
    scopes: Vec<BTreeMap<String, Local>>,
}

impl Env {
    fn push_scope(&mut self) {
        self.scopes.push(BTreeMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: &str, local: Local) {
        if self.scopes.is_empty() {
            self.push_scope();
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), local);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }
}

// ---------------------------------------------------------------------------
// Function lowering
// ---------------------------------------------------------------------------

pub(crate) struct FunctionLowerer<'m, 'a> {
    module: &'m mut ModuleLowerer<'a>,
    b: MirBuilder,
    env: Env,
    handlers: HandlerStack<'a, Env>,
    /// Effectful functions currently being inlined, outermost first.
    inlining: Vec<String>,
}

impl<'m, 'a> FunctionLowerer<'m, 'a> {
    fn new(
        module: &'m mut ModuleLowerer<'a>,
        name: impl Into<String>,
        signature: MirSignature,
        linkage: MirLinkage,
    ) -> Self {
        Self {
            module,
            b: MirBuilder::new(name, signature, linkage),
            env: Env::default(),
            handlers: HandlerStack::new(),
            inlining: Vec::new(),
        }
    }

    fn finish(self) -> MirFunction {
        self.b.finish()
    }

    fn security(&self) -> &SecurityConfig {
        &self.module.options.security
    }

    // -- locals -------------------------------------------------------------

    fn bind_params(&mut self, params: &[HirParam], first: usize) {
        self.env.push_scope();
        for (i, param) in params.iter().enumerate() {
            let value = self.b.param(first + i);
            self.bind_local(&param.name, &param.ty, value);
        }
    }

    fn bind_local(&mut self, name: &str, ty: &Type, value: MirValueId) -> MirVar {
        let var = self.b.declare_var(value_type(ty));
        self.b.def_var(var, value);
        self.env.bind(
            name,
            Local {
                var,
                ty: ty.clone(),
            },
        );
        var
    }

    fn local(&self, name: &str) -> Result<Local, CodegenError> {
        self.env
            .lookup(name)
            .cloned()
            .ok_or_else(|| CodegenError::UndefinedLocal {
                name: name.to_string(),
            })
    }

    // -- small emitters -----------------------------------------------------

    fn unit(&mut self) -> MirValueId {
        self.b.iconst(MirType::I8, 0)
    }

    fn string_literal(&mut self, text: &str) -> MirValueId {
        let symbol = self.module.intern(text);
        self.b.data_addr(symbol)
    }

    /// Call a fixed libc/runtime symbol, or a word-ABI runtime builtin.
    fn call_symbol(&mut self, name: &str, args: Vec<MirValueId>) -> MirValueId {
        let signature = abi::signature(name).unwrap_or_else(|| abi::word_signature(args.len()));
        let ret = signature.ret;
        self.module.imports.declare(name, signature);
        let callee = MirCallee::External(name.to_string());
        match ret {
            Some(ret) => self.b.call(callee, args, ret),
            None => {
                self.b.call_void(callee, args);
                self.unit()
            }
        }
    }

    fn malloc(&mut self, size: i32) -> MirValueId {
        let size = self.b.iconst(MirType::I64, i64::from(size));
        self.call_symbol(abi::MALLOC, vec![size])
    }

    // -- statements and blocks ---------------------------------------------

    fn lower_stmt(&mut self, stmt: &'a HirStmt) -> Result<(), CodegenError> {
        match stmt {
            HirStmt::Let {
                name,
                mutable,
                value,
                ..
            } => {
                let lowered = match &value.kind {
                    HirExprKind::Lambda { params, body } if !mutable => {
                        self.lower_lambda(params, body, Some(name))?
                    }
                    _ => self.lower_expr(value)?,
                };
                self.bind_local(name, &value.ty, lowered);
            }
            HirStmt::Assign { name, value } => {
                let local = self.local(name)?;
                let lowered = self.lower_expr(value)?;
                self.b.def_var(local.var, lowered);
            }
            HirStmt::Expr(expr) => {
                self.lower_expr(expr)?;
            }
        }
        Ok(())
    }

    fn lower_block(
        &mut self,
        stmts: &'a [HirStmt],
        result: Option<&'a HirExpr>,
    ) -> Result<MirValueId, CodegenError> {
        self.env.push_scope();
        for stmt in stmts {
            self.lower_stmt(stmt)?;
        }
        let value = match result {
            Some(expr) => self.lower_expr(expr)?,
            None => self.unit(),
        };
        self.env.pop_scope();
        Ok(value)
    }

    // -- calls --------------------------------------------------------------

    fn lower_args(&mut self, args: &'a [HirExpr]) -> Result<Vec<MirValueId>, CodegenError> {
        args.iter().map(|a| self.lower_expr(a)).collect()
    }

    fn lower_call(
        &mut self,
        callee: &'a HirExpr,
        args: &'a [HirExpr],
    ) -> Result<MirValueId, CodegenError> {
        match &callee.kind {
            HirExprKind::Function(symbol) => {
                let function = self.module.function(symbol)?;
                let values = self.lower_args(args)?;
                if function.is_effectful() {
                    return self.inline_function(function, values);
                }
                Ok(self.b.call(
                    MirCallee::Local(symbol_name(symbol)),
                    values,
                    value_type(&function.ret),
                ))
            }
            HirExprKind::Extern(name) => {
                let decl = self.module.extern_decl(name)?;
                self.security().check(name, Permission::Ffi)?;
                let values = self.lower_args(args)?;
                let signature = extern_signature(decl);
                let ret = signature.ret;
                self.module.imports.declare(name, signature);
                let callee = MirCallee::External(name.clone());
                match ret {
                    Some(ret) => Ok(self.b.call(callee, values, ret)),
                    None => {
                        self.b.call_void(callee, values);
                        Ok(self.unit())
                    }
                }
            }
            _ => {
                let closure = self.lower_expr(callee)?;
                let values = self.lower_args(args)?;
                self.call_closure(closure, &callee.ty, values)
            }
        }
    }

    /// Lower an effectful function's body in place, against the current
    /// handler stack.
    fn inline_function(
        &mut self,
        function: &'a MonoFunction,
        args: Vec<MirValueId>,
    ) -> Result<MirValueId, CodegenError> {
        if self.inlining.iter().any(|s| *s == function.symbol) {
            return Err(CodegenError::CircularEffect {
                function: function.symbol.clone(),
            });
        }
        tracing::trace!(function = %function.symbol, depth = self.inlining.len(), "inlining");
        self.inlining.push(function.symbol.clone());
        let saved = std::mem::take(&mut self.env);
        self.env.push_scope();
        for (param, value) in function.params.iter().zip(args) {
            self.bind_local(&param.name, &param.ty, value);
        }
        let result = self.lower_expr(&function.body);
        self.env = saved;
        self.inlining.pop();
        result
    }

    // -- closures -----------------------------------------------------------

    fn call_closure(
        &mut self,
        closure: MirValueId,
        ty: &Type,
        args: Vec<MirValueId>,
    ) -> Result<MirValueId, CodegenError> {
        let signature = closure_signature(ty)?;
        let code = self
            .b
            .load(MirType::I64, closure, layout::CLOSURE_CODE_OFFSET);
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(closure);
        call_args.extend(args);
        match self.b.call_indirect(signature, code, call_args) {
            Some(value) => Ok(value),
            None => Ok(self.unit()),
        }
    }

    fn captures(
        &self,
        body: &HirExpr,
        params: &[HirParam],
    ) -> Result<Vec<(String, Local)>, CodegenError> {
        self.captures_except(body, params, None)
    }

    fn captures_except(
        &self,
        body: &HirExpr,
        params: &[HirParam],
        this: Option<&str>,
    ) -> Result<Vec<(String, Local)>, CodegenError> {
        free_locals(body, params)
            .into_iter()
            .filter(|name| Some(name.as_str()) != this)
            .map(|name| {
                let local = self.local(&name)?;
                Ok((name, local))
            })
            .collect()
    }

    /// Heap cell `[code, captures...]` for the function `code`.
    fn alloc_closure(&mut self, code: &str, captures: &[(String, Local)]) -> MirValueId {
        let cell = self.malloc(layout::capture_offset(captures.len()));
        let addr = self.b.func_addr(code);
        self.b.store(addr, cell, layout::CLOSURE_CODE_OFFSET);
        for (i, (_, local)) in captures.iter().enumerate() {
            let value = self.b.use_var(local.var);
            self.b.store(value, cell, layout::capture_offset(i));
        }
        cell
    }

    /// Emit `body` as a module-level function whose first parameter is a
    /// closure cell holding `captures`. With `as_word` the result is widened
    /// to an `i64` word. `this` names the closure itself inside the body.
    #[allow(clippy::too_many_arguments)]
    fn lift(
        &mut self,
        name: &str,
        captures: &[(String, Local)],
        this: Option<(&str, &Type)>,
        params: &'a [HirParam],
        body: &'a HirExpr,
        signature: MirSignature,
        as_word: bool,
    ) -> Result<(), CodegenError> {
        let mut lifted = FunctionLowerer::new(&mut *self.module, name, signature, MirLinkage::Local);
        lifted.env.push_scope();
        let cell = lifted.b.param(0);
        if let Some((this, ty)) = this {
            lifted.bind_local(this, ty, cell);
        }
        for (i, (capture, local)) in captures.iter().enumerate() {
            let value = lifted
                .b
                .load(value_type(&local.ty), cell, layout::capture_offset(i));
            lifted.bind_local(capture, &local.ty, value);
        }
        lifted.bind_params(params, 1);
        let mut value = lifted.lower_expr(body)?;
        if as_word {
            value = abi::to_word(&mut lifted.b, value);
        }
        lifted.b.terminate(MirTerminator::Return { value: Some(value) });
        let function = lifted.finish();
        tracing::trace!(function = %function.name, captures = captures.len(), "lifted");
        self.module.functions.push(function);
        Ok(())
    }

    /// A lambda bound by `let` under `this` reaches itself through its own
    /// closure cell rather than a capture.
    fn lower_lambda(
        &mut self,
        params: &'a [HirParam],
        body: &'a HirExpr,
        this: Option<&str>,
    ) -> Result<MirValueId, CodegenError> {
        let captures = self.captures_except(body, params, this)?;
        let name = self.module.fresh_symbol("__lambda");
        let param_types: Vec<Type> = params.iter().map(|p| p.ty.clone()).collect();
        let ty = Type::function(param_types, body.ty.clone());
        let signature = closure_signature(&ty)?;
        let this = this.map(|this| (this, &ty));
        self.lift(&name, &captures, this, params, body, signature, false)?;
        Ok(self.alloc_closure(&name, &captures))
    }

    /// A top-level function used as a value: a capture-free closure over an
    /// adapter that drops the cell argument.
    fn function_value(&mut self, symbol: &str) -> Result<MirValueId, CodegenError> {
        let function = self.module.function(symbol)?;
        if function.is_effectful() {
            return Err(CodegenError::UnsupportedExpression {
                detail: format!("effectful function `{symbol}` cannot be used as a value"),
            });
        }
        let adapter = format!("__adapter_{symbol}");
        if self.module.adapters.insert(adapter.clone()) {
            let params: Vec<Type> = function.params.iter().map(|p| p.ty.clone()).collect();
            let signature = closure_signature(&Type::function(params, function.ret.clone()))?;
            let arity = function.params.len();
            let mut b = MirBuilder::new(&adapter, signature, MirLinkage::Local);
            let args = (1..=arity).map(|i| b.param(i)).collect();
            let value = b.call(
                MirCallee::Local(symbol_name(symbol)),
                args,
                value_type(&function.ret),
            );
            b.terminate(MirTerminator::Return { value: Some(value) });
            self.module.functions.push(b.finish());
        }
        Ok(self.alloc_closure(&adapter, &[]))
    }

    fn extern_value(&mut self, name: &str) -> Result<MirValueId, CodegenError> {
        let decl = self.module.extern_decl(name)?;
        self.security().check(name, Permission::Ffi)?;
        let adapter = format!("__adapter_{name}");
        if self.module.adapters.insert(adapter.clone()) {
            let foreign = extern_signature(decl);
            self.module.imports.declare(name, foreign.clone());
            let signature =
                closure_signature(&Type::function(decl.params.clone(), decl.ret.clone()))?;
            let mut b = MirBuilder::new(&adapter, signature, MirLinkage::Local);
            let args = (1..=decl.params.len()).map(|i| b.param(i)).collect();
            let callee = MirCallee::External(name.to_string());
            let value = match foreign.ret {
                Some(ret) => b.call(callee, args, ret),
                None => {
                    b.call_void(callee, args);
                    b.iconst(MirType::I8, 0)
                }
            };
            b.terminate(MirTerminator::Return { value: Some(value) });
            self.module.functions.push(b.finish());
        }
        Ok(self.alloc_closure(&adapter, &[]))
    }
}

use std::collections::BTreeMap;

use osprey_hir::{BinOp, HirExpr, HirExprKind, Lit, UnaryOp};
use osprey_types::{
    ARITHMETIC_OVERFLOW, DIVISION_BY_ZERO, ERROR_VARIANT, INDEX_OUT_OF_BOUNDS, MODULO_BY_ZERO,
    SUCCESS_VARIANT, Type,
};

use super::FunctionLowerer;
use crate::abi;
use crate::layout::{self, Layout, value_type};
use crate::{
    CodegenError, MirBinaryOp, MirBlockId, MirCond, MirType, MirUnaryOp, MirValueId, MirVar,
};

impl<'m, 'a> FunctionLowerer<'m, 'a> {
    pub(super) fn lower_expr(&mut self, expr: &'a HirExpr) -> Result<MirValueId, CodegenError> {
        match &expr.kind {
            HirExprKind::Lit(lit) => Ok(self.lower_lit(lit)),
            HirExprKind::Local(name) => {
                let local = self.local(name)?;
                Ok(self.b.use_var(local.var))
            }
            HirExprKind::Function(symbol) => self.function_value(symbol),
            HirExprKind::Extern(name) => self.extern_value(name),
            HirExprKind::Binary { op, left, right } => self.lower_binary(*op, left, right, &expr.ty),
            HirExprKind::Unary { op, operand } => self.lower_unary(*op, operand),
            HirExprKind::Call { callee, args } => self.lower_call(callee, args),
            HirExprKind::BuiltinCall { name, args } => self.lower_builtin(name, args, &expr.ty),
            HirExprKind::Lambda { params, body } => self.lower_lambda(params, body, None),
            HirExprKind::Match { scrutinee, arms } => self.lower_match(scrutinee, arms, &expr.ty),
            HirExprKind::CheckedArith(tree) => self.lower_checked(tree, &expr.ty),
            HirExprKind::Construct {
                variant, fields, ..
            } => {
                let values = self.lower_args(fields)?;
                self.build_aggregate(&expr.ty, variant, values)
            }
            HirExprKind::Update { target, fields } => self.lower_update(target, fields),
            HirExprKind::FieldAccess { expr: inner, field } => self.lower_field(inner, field),
            HirExprKind::Block { stmts, result } => self.lower_block(stmts, result.as_deref()),
            HirExprKind::List(items) => self.lower_list(items),
            HirExprKind::Index { list, index } => self.lower_index(list, index, &expr.ty),
            HirExprKind::Interpolated(parts) => self.lower_interpolated(parts),
            HirExprKind::Perform {
                effect,
                operation,
                args,
            } => self.lower_perform(effect, operation, args),
            HirExprKind::Handle { effect, arms, body } => self.lower_handle(effect, arms, body),
            HirExprKind::Spawn(body) => self.lower_spawn(body),
            HirExprKind::Await(fiber) => self.lower_await(fiber, &expr.ty),
            HirExprKind::Yield(value) => self.lower_yield(value.as_deref(), &expr.ty),
            HirExprKind::ChannelCreate { capacity } => self.lower_channel(capacity.as_deref()),
            HirExprKind::Send { channel, value } => self.lower_send(channel, value),
            HirExprKind::Recv(channel) => self.lower_recv(channel, &expr.ty),
            HirExprKind::Select(arms) => self.lower_select(arms, &expr.ty),
        }
    }

    fn lower_lit(&mut self, lit: &Lit) -> MirValueId {
        match lit {
            Lit::Int(n) => self.b.iconst(MirType::I64, *n),
            Lit::Float(x) => self.b.fconst(*x),
            Lit::Bool(v) => self.b.iconst(MirType::I8, i64::from(*v)),
            Lit::String(text) => self.string_literal(text),
            Lit::Unit => self.unit(),
        }
    }

    // -- operators ----------------------------------------------------------

    fn lower_binary(
        &mut self,
        op: BinOp,
        left: &'a HirExpr,
        right: &'a HirExpr,
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        if op.is_logical() {
            return self.lower_logical(op, left, right);
        }
        let l = self.lower_expr(left)?;
        let r = self.lower_expr(right)?;
        if op.is_arithmetic() {
            self.arithmetic(op, l, r, ty)
        } else {
            self.compare(op, l, r, &left.ty)
        }
    }

    /// `&&` and `||` evaluate the right operand only when needed.
    fn lower_logical(
        &mut self,
        op: BinOp,
        left: &'a HirExpr,
        right: &'a HirExpr,
    ) -> Result<MirValueId, CodegenError> {
        let result = self.b.declare_var(MirType::I8);
        let l = self.lower_expr(left)?;
        self.b.def_var(result, l);
        let rhs = self.b.create_block();
        let done = self.b.create_block();
        if op == BinOp::And {
            self.b.branch(l, rhs, done);
        } else {
            self.b.branch(l, done, rhs);
        }
        self.b.switch_to(rhs);
        let r = self.lower_expr(right)?;
        self.b.def_var(result, r);
        self.b.jump(done);
        self.b.switch_to(done);
        Ok(self.b.use_var(result))
    }

    pub(super) fn arithmetic(
        &mut self,
        op: BinOp,
        l: MirValueId,
        r: MirValueId,
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        if ty.is_string() && op == BinOp::Add {
            return Ok(self.concat(l, r));
        }
        let mir = if ty.is_float() {
            match op {
                BinOp::Add => Some(MirBinaryOp::FAdd),
                BinOp::Sub => Some(MirBinaryOp::FSub),
                BinOp::Mul => Some(MirBinaryOp::FMul),
                BinOp::Div => Some(MirBinaryOp::FDiv),
                BinOp::Mod => return Ok(self.float_rem(l, r)),
                _ => None,
            }
        } else if ty.is_int() {
            match op {
                BinOp::Add => Some(MirBinaryOp::IAdd),
                BinOp::Sub => Some(MirBinaryOp::ISub),
                BinOp::Mul => Some(MirBinaryOp::IMul),
                BinOp::Div => Some(MirBinaryOp::SDiv),
                BinOp::Mod => Some(MirBinaryOp::SRem),
                _ => None,
            }
        } else {
            None
        };
        match mir {
            Some(mir) => Ok(self.b.binary(mir, l, r)),
            None => Err(CodegenError::UnsupportedBinaryOperator {
                op: op.symbol().to_string(),
                ty: ty.to_string(),
            }),
        }
    }

    /// `l - trunc(l / r) * r`, the sign following the dividend.
    fn float_rem(&mut self, l: MirValueId, r: MirValueId) -> MirValueId {
        let quotient = self.b.binary(MirBinaryOp::FDiv, l, r);
        let whole = self.b.unary(MirUnaryOp::FTrunc, quotient);
        let product = self.b.binary(MirBinaryOp::FMul, whole, r);
        self.b.binary(MirBinaryOp::FSub, l, product)
    }

    fn compare(
        &mut self,
        op: BinOp,
        l: MirValueId,
        r: MirValueId,
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let unsupported = || CodegenError::UnsupportedBinaryOperator {
            op: op.symbol().to_string(),
            ty: ty.to_string(),
        };
        let cond = match op {
            BinOp::Eq => MirCond::Eq,
            BinOp::Neq => MirCond::Ne,
            BinOp::Lt => MirCond::Lt,
            BinOp::Lte => MirCond::Le,
            BinOp::Gt => MirCond::Gt,
            BinOp::Gte => MirCond::Ge,
            _ => return Err(unsupported()),
        };
        if ty.is_float() {
            return Ok(self.b.binary(MirBinaryOp::FCmp(cond), l, r));
        }
        if ty.is_string() {
            let order = self.call_symbol(abi::STRCMP, vec![l, r]);
            let zero = self.b.iconst(MirType::I32, 0);
            return Ok(self.b.binary(MirBinaryOp::ICmp(cond), order, zero));
        }
        let scalar = ty.is_int() || ty.is_bool() || ty.is_unit();
        if scalar || matches!(cond, MirCond::Eq | MirCond::Ne) {
            // Everything else compares by identity.
            return Ok(self.b.binary(MirBinaryOp::ICmp(cond), l, r));
        }
        Err(unsupported())
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &'a HirExpr) -> Result<MirValueId, CodegenError> {
        let value = self.lower_expr(operand)?;
        let mir = match op {
            UnaryOp::Not => MirUnaryOp::Not,
            UnaryOp::Neg if operand.ty.is_float() => MirUnaryOp::FNeg,
            UnaryOp::Neg if operand.ty.is_int() => MirUnaryOp::INeg,
            UnaryOp::Neg => {
                return Err(CodegenError::UnsupportedUnaryOperator {
                    op: op.symbol().to_string(),
                    ty: operand.ty.to_string(),
                });
            }
        };
        Ok(self.b.unary(mir, value))
    }

    // -- checked arithmetic -------------------------------------------------

    /// `Success { value }` unless a divisor is zero at run time, in which
    /// case every remaining operation is skipped and `Error { message }` is
    /// built once.
    fn lower_checked(&mut self, tree: &'a HirExpr, ty: &Type) -> Result<MirValueId, CodegenError> {
        let message = self.b.declare_var(MirType::I64);
        let result = self.b.declare_var(MirType::I64);
        let failed = self.b.create_block();
        let done = self.b.create_block();

        let value = self.lower_checked_tree(tree, message, failed)?;
        let ok = self.build_aggregate(ty, SUCCESS_VARIANT, vec![value])?;
        self.b.def_var(result, ok);
        self.b.jump(done);

        self.b.switch_to(failed);
        let text = self.b.use_var(message);
        let err = self.build_aggregate(ty, ERROR_VARIANT, vec![text])?;
        self.b.def_var(result, err);
        self.b.jump(done);

        self.b.switch_to(done);
        Ok(self.b.use_var(result))
    }

    fn lower_checked_tree(
        &mut self,
        expr: &'a HirExpr,
        message: MirVar,
        failed: MirBlockId,
    ) -> Result<MirValueId, CodegenError> {
        let HirExprKind::Binary { op, left, right } = &expr.kind else {
            return self.lower_expr(expr);
        };
        if !op.is_arithmetic() {
            return self.lower_expr(expr);
        }
        let l = self.lower_checked_tree(left, message, failed)?;
        let divides = matches!(op, BinOp::Div | BinOp::Mod);
        if divides && is_literal_zero(right) {
            // Always fails; no divide is emitted.
            self.fail_with(*op, message, failed);
            return Ok(self.zero_of(&expr.ty));
        }
        let mut r = self.lower_checked_tree(right, message, failed)?;
        if divides {
            let is_zero = if right.ty.is_float() {
                let zero = self.b.fconst(0.0);
                self.b.binary(MirBinaryOp::FCmp(MirCond::Eq), r, zero)
            } else {
                let zero = self.b.iconst(MirType::I64, 0);
                self.b.binary(MirBinaryOp::ICmp(MirCond::Eq), r, zero)
            };
            let zero_block = self.b.create_block();
            let proceed = self.b.create_block();
            self.b.branch(is_zero, zero_block, proceed);
            self.b.switch_to(zero_block);
            self.fail_with(*op, message, failed);
            self.b.switch_to(proceed);
            if !right.ty.is_float() {
                r = self.guard_overflow(*op, l, r, message, failed);
            }
        }
        self.arithmetic(*op, l, r, &expr.ty)
    }

    /// `i64::MIN / -1` fails with an overflow. `x % -1` is always 0, so the
    /// divisor becomes 1 instead. Returns the divisor to use.
    fn guard_overflow(
        &mut self,
        op: BinOp,
        l: MirValueId,
        r: MirValueId,
        message: MirVar,
        failed: MirBlockId,
    ) -> MirValueId {
        let minus_one = self.b.iconst(MirType::I64, -1);
        let by_minus_one = self.b.binary(MirBinaryOp::ICmp(MirCond::Eq), r, minus_one);
        let special = self.b.create_block();
        let proceed = self.b.create_block();
        if op == BinOp::Mod {
            let divisor = self.b.declare_var(MirType::I64);
            self.b.def_var(divisor, r);
            self.b.branch(by_minus_one, special, proceed);
            self.b.switch_to(special);
            let one = self.b.iconst(MirType::I64, 1);
            self.b.def_var(divisor, one);
            self.b.jump(proceed);
            self.b.switch_to(proceed);
            return self.b.use_var(divisor);
        }
        let min = self.b.iconst(MirType::I64, i64::MIN);
        let is_min = self.b.binary(MirBinaryOp::ICmp(MirCond::Eq), l, min);
        let overflows = self.b.binary(MirBinaryOp::And, is_min, by_minus_one);
        self.b.branch(overflows, special, proceed);
        self.b.switch_to(special);
        self.fail_with_text(ARITHMETIC_OVERFLOW, message, failed);
        self.b.switch_to(proceed);
        r
    }

    fn fail_with(&mut self, op: BinOp, message: MirVar, failed: MirBlockId) {
        let text = if op == BinOp::Div {
            DIVISION_BY_ZERO
        } else {
            MODULO_BY_ZERO
        };
        self.fail_with_text(text, message, failed);
    }

    fn fail_with_text(&mut self, text: &str, message: MirVar, failed: MirBlockId) {
        let text = self.string_literal(text);
        self.b.def_var(message, text);
        self.b.jump(failed);
    }

    /// Placeholder result for code that can no longer run.
    fn zero_of(&mut self, ty: &Type) -> MirValueId {
        match value_type(ty) {
            MirType::F64 => self.b.fconst(0.0),
            mir => self.b.iconst(mir, 0),
        }
    }

    // -- aggregates ---------------------------------------------------------

    /// Allocate and fill a union variant or record cell.
    pub(super) fn build_aggregate(
        &mut self,
        ty: &Type,
        variant: &str,
        values: Vec<MirValueId>,
    ) -> Result<MirValueId, CodegenError> {
        let layout = self.module.layouts.plan(ty);
        match &*layout {
            Layout::Union(union) => {
                let Some(shape) = union.variant(variant) else {
                    return Err(CodegenError::UnsupportedExpression {
                        detail: format!("`{ty}` has no variant `{variant}`"),
                    });
                };
                let cell = self.malloc(union.size);
                let tag = self.b.iconst(MirType::I32, i64::from(shape.tag));
                self.b.store(tag, cell, layout::TAG_OFFSET);
                for (field, value) in shape.fields.iter().zip(values) {
                    self.b.store(value, cell, field.offset);
                }
                Ok(cell)
            }
            Layout::Record(record) => {
                let cell = self.malloc(record.size);
                for (field, value) in record.fields.iter().zip(values) {
                    self.b.store(value, cell, field.offset);
                }
                Ok(cell)
            }
            _ => Err(CodegenError::UnsupportedExpression {
                detail: format!("`{ty}` has no constructor `{variant}`"),
            }),
        }
    }

    /// Copy a record, replacing the named fields.
    fn lower_update(
        &mut self,
        target: &'a HirExpr,
        fields: &'a [(String, HirExpr)],
    ) -> Result<MirValueId, CodegenError> {
        let base = self.lower_expr(target)?;
        let mut updates = BTreeMap::new();
        for (name, value) in fields {
            let lowered = self.lower_expr(value)?;
            updates.insert(name.as_str(), lowered);
        }
        let layout = self.module.layouts.plan(&target.ty);
        let Layout::Record(record) = &*layout else {
            return Err(CodegenError::FieldOnNonStruct {
                field: fields.first().map(|(n, _)| n.clone()).unwrap_or_default(),
                ty: target.ty.to_string(),
            });
        };
        let cell = self.malloc(record.size);
        for field in &record.fields {
            let value = match updates.get(field.name.as_str()) {
                Some(value) => *value,
                None => self.b.load(field.mir, base, field.offset),
            };
            self.b.store(value, cell, field.offset);
        }
        Ok(cell)
    }

    fn lower_field(&mut self, inner: &'a HirExpr, field: &str) -> Result<MirValueId, CodegenError> {
        let slot = self.module.layouts.field(&inner.ty, field)?;
        let value = self.lower_expr(inner)?;
        Ok(self.b.load(slot.mir, value, slot.offset))
    }

    // -- lists --------------------------------------------------------------

    fn lower_list(&mut self, items: &'a [HirExpr]) -> Result<MirValueId, CodegenError> {
        let values = self.lower_args(items)?;
        let cell = self.malloc(layout::LIST_ELEMS_OFFSET + layout::SLOT * values.len() as i32);
        let len = self.b.iconst(MirType::I64, values.len() as i64);
        self.b.store(len, cell, layout::LIST_LEN_OFFSET);
        for (i, value) in values.into_iter().enumerate() {
            let offset = layout::LIST_ELEMS_OFFSET + layout::SLOT * i as i32;
            self.b.store(value, cell, offset);
        }
        Ok(cell)
    }

    /// `cell + index * SLOT`; elements sit at `LIST_ELEMS_OFFSET` from it.
    pub(super) fn element_base(&mut self, cell: MirValueId, index: MirValueId) -> MirValueId {
        let slot = self.b.iconst(MirType::I64, i64::from(layout::SLOT));
        let offset = self.b.binary(MirBinaryOp::IMul, index, slot);
        self.b.binary(MirBinaryOp::IAdd, cell, offset)
    }

    fn lower_index(
        &mut self,
        list: &'a HirExpr,
        index: &'a HirExpr,
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let cell = self.lower_expr(list)?;
        let i = self.lower_expr(index)?;
        let elem = ty
            .result_parts()
            .map_or(MirType::I64, |(ok, _)| value_type(ok));

        let len = self.b.load(MirType::I64, cell, layout::LIST_LEN_OFFSET);
        let zero = self.b.iconst(MirType::I64, 0);
        let non_negative = self.b.binary(MirBinaryOp::ICmp(MirCond::Ge), i, zero);
        let below = self.b.binary(MirBinaryOp::ICmp(MirCond::Lt), i, len);
        let in_bounds = self.b.binary(MirBinaryOp::And, non_negative, below);

        let result = self.b.declare_var(MirType::I64);
        let hit = self.b.create_block();
        let miss = self.b.create_block();
        let done = self.b.create_block();
        self.b.branch(in_bounds, hit, miss);

        self.b.switch_to(hit);
        let base = self.element_base(cell, i);
        let value = self.b.load(elem, base, layout::LIST_ELEMS_OFFSET);
        let ok = self.build_aggregate(ty, SUCCESS_VARIANT, vec![value])?;
        self.b.def_var(result, ok);
        self.b.jump(done);

        self.b.switch_to(miss);
        let text = self.string_literal(INDEX_OUT_OF_BOUNDS);
        let err = self.build_aggregate(ty, ERROR_VARIANT, vec![text])?;
        self.b.def_var(result, err);
        self.b.jump(done);

        self.b.switch_to(done);
        Ok(self.b.use_var(result))
    }

    // -- strings ------------------------------------------------------------

    fn lower_interpolated(&mut self, parts: &'a [HirExpr]) -> Result<MirValueId, CodegenError> {
        let mut text: Option<MirValueId> = None;
        for part in parts {
            let value = self.lower_expr(part)?;
            let piece = self.to_string_value(value, &part.ty)?;
            text = Some(match text {
                Some(prefix) => self.concat(prefix, piece),
                None => piece,
            });
        }
        Ok(match text {
            Some(text) => text,
            None => self.string_literal(""),
        })
    }

    /// Fresh heap string holding `left` followed by `right`.
    pub(super) fn concat(&mut self, left: MirValueId, right: MirValueId) -> MirValueId {
        let left_len = self.call_symbol(abi::STRLEN, vec![left]);
        let right_len = self.call_symbol(abi::STRLEN, vec![right]);
        let one = self.b.iconst(MirType::I64, 1);
        let total = self.b.binary(MirBinaryOp::IAdd, left_len, right_len);
        let size = self.b.binary(MirBinaryOp::IAdd, total, one);
        let out = self.call_symbol(abi::MALLOC, vec![size]);
        self.call_symbol(abi::MEMCPY, vec![out, left, left_len]);
        let tail = self.b.binary(MirBinaryOp::IAdd, out, left_len);
        let right_size = self.b.binary(MirBinaryOp::IAdd, right_len, one);
        self.call_symbol(abi::MEMCPY, vec![tail, right, right_size]);
        out
    }
}

fn is_literal_zero(expr: &HirExpr) -> bool {
    match &expr.kind {
        HirExprKind::Lit(Lit::Int(n)) => *n == 0,
        HirExprKind::Lit(Lit::Float(x)) => *x == 0.0,
        _ => false,
    }
}

//! `match` lowering.
//!
//! A match over a union whose arms only inspect the tag becomes one switch.
//! Anything with nested or literal patterns is tested arm by arm, falling
//! through to the next arm on the first failed check.

use osprey_hir::{HirExpr, HirMatchArm, HirPattern, HirPatternKind, Lit};
use osprey_types::Type;

use super::FunctionLowerer;
use crate::abi;
use crate::layout::{self, FieldLayout, Layout, value_type};
use crate::{
    CodegenError, MirBinaryOp, MirBlockId, MirCond, MirTerminator, MirType, MirValueId, MirVar,
};

impl<'m, 'a> FunctionLowerer<'m, 'a> {
    pub(super) fn lower_match(
        &mut self,
        scrutinee: &'a HirExpr,
        arms: &'a [HirMatchArm],
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let value = self.lower_expr(scrutinee)?;
        let result = self.b.declare_var(value_type(ty));
        let done = self.b.create_block();

        let is_union = matches!(&*self.module.layouts.plan(&scrutinee.ty), Layout::Union(_));
        if is_union && arms.iter().all(|arm| is_flat(&arm.pattern)) {
            self.switch_arms(value, &scrutinee.ty, arms, result, done)?;
        } else {
            self.chain_arms(value, &scrutinee.ty, arms, result, done)?;
        }

        self.b.switch_to(done);
        Ok(self.b.use_var(result))
    }

    fn switch_arms(
        &mut self,
        value: MirValueId,
        ty: &Type,
        arms: &'a [HirMatchArm],
        result: MirVar,
        done: MirBlockId,
    ) -> Result<(), CodegenError> {
        let tag = self.b.load(MirType::I32, value, layout::TAG_OFFSET);
        let mut cases: Vec<(u64, MirBlockId)> = Vec::new();
        let mut default = None;
        let mut bodies = Vec::new();
        for arm in arms {
            match &arm.pattern.kind {
                HirPatternKind::Variant { tag: t, .. } => {
                    if default.is_some() || cases.iter().any(|(c, _)| *c == u64::from(*t)) {
                        tracing::trace!(tag = t, "unreachable match arm skipped");
                        continue;
                    }
                    let block = self.b.create_block();
                    cases.push((u64::from(*t), block));
                    bodies.push((block, arm));
                }
                _ => {
                    if default.is_none() {
                        let block = self.b.create_block();
                        default = Some(block);
                        bodies.push((block, arm));
                    }
                }
            }
        }
        let default = match default {
            Some(block) => block,
            None => {
                let block = self.b.create_block();
                let resume = self.b.current_block();
                self.b.switch_to(block);
                self.b.terminate(MirTerminator::Unreachable);
                self.b.switch_to(resume);
                block
            }
        };
        self.b.terminate(MirTerminator::Switch {
            value: tag,
            cases,
            default,
        });

        for (block, arm) in bodies {
            self.b.switch_to(block);
            self.env.push_scope();
            self.bind_pattern(&arm.pattern, value, ty)?;
            let body = self.lower_expr(&arm.body)?;
            self.env.pop_scope();
            self.b.def_var(result, body);
            self.b.jump(done);
        }
        Ok(())
    }

    fn chain_arms(
        &mut self,
        value: MirValueId,
        ty: &Type,
        arms: &'a [HirMatchArm],
        result: MirVar,
        done: MirBlockId,
    ) -> Result<(), CodegenError> {
        for arm in arms {
            let next = self.b.create_block();
            self.test_pattern(&arm.pattern, value, ty, next)?;
            self.env.push_scope();
            self.bind_pattern(&arm.pattern, value, ty)?;
            let body = self.lower_expr(&arm.body)?;
            self.env.pop_scope();
            self.b.def_var(result, body);
            self.b.jump(done);
            self.b.switch_to(next);
            if arm.pattern.is_irrefutable() {
                break;
            }
        }
        // Exhaustiveness was checked during inference.
        self.b.terminate(MirTerminator::Unreachable);
        Ok(())
    }

    /// Fall through to `fail` unless `value` matches `pattern`. Leaves the
    /// builder in the success block.
    fn test_pattern(
        &mut self,
        pattern: &HirPattern,
        value: MirValueId,
        ty: &Type,
        fail: MirBlockId,
    ) -> Result<(), CodegenError> {
        match &pattern.kind {
            HirPatternKind::Wildcard | HirPatternKind::Bind(_) => Ok(()),
            HirPatternKind::Lit(lit) => {
                let hit = self.literal_matches(lit, value)?;
                self.branch_or_fail(hit, fail);
                Ok(())
            }
            HirPatternKind::Variant {
                variant,
                tag,
                fields,
                ..
            } => {
                if matches!(&*self.module.layouts.plan(ty), Layout::Union(_)) {
                    let actual = self.b.load(MirType::I32, value, layout::TAG_OFFSET);
                    let expected = self.b.iconst(MirType::I32, i64::from(*tag));
                    let hit = self.b.binary(MirBinaryOp::ICmp(MirCond::Eq), actual, expected);
                    self.branch_or_fail(hit, fail);
                }
                for (slot, sub) in fields {
                    if sub.is_irrefutable() {
                        continue;
                    }
                    let field = self.variant_field(ty, variant, *slot)?;
                    let inner = self.b.load(field.mir, value, field.offset);
                    self.test_pattern(sub, inner, &field.ty, fail)?;
                }
                Ok(())
            }
        }
    }

    fn branch_or_fail(&mut self, hit: MirValueId, fail: MirBlockId) {
        let ok = self.b.create_block();
        self.b.branch(hit, ok, fail);
        self.b.switch_to(ok);
    }

    fn literal_matches(&mut self, lit: &Lit, value: MirValueId) -> Result<MirValueId, CodegenError> {
        let eq = MirBinaryOp::ICmp(MirCond::Eq);
        Ok(match lit {
            Lit::Int(n) => {
                let expected = self.b.iconst(MirType::I64, *n);
                self.b.binary(eq, value, expected)
            }
            Lit::Bool(v) => {
                let expected = self.b.iconst(MirType::I8, i64::from(*v));
                self.b.binary(eq, value, expected)
            }
            Lit::Float(x) => {
                let expected = self.b.fconst(*x);
                self.b.binary(MirBinaryOp::FCmp(MirCond::Eq), value, expected)
            }
            Lit::String(text) => {
                let expected = self.string_literal(text);
                let order = self.call_symbol(abi::STRCMP, vec![value, expected]);
                let zero = self.b.iconst(MirType::I32, 0);
                self.b.binary(eq, order, zero)
            }
            Lit::Unit => self.b.iconst(MirType::I8, 1),
        })
    }

    fn bind_pattern(
        &mut self,
        pattern: &HirPattern,
        value: MirValueId,
        ty: &Type,
    ) -> Result<(), CodegenError> {
        match &pattern.kind {
            HirPatternKind::Bind(name) => {
                self.bind_local(name, ty, value);
            }
            HirPatternKind::Variant {
                variant, fields, ..
            } => {
                for (slot, sub) in fields {
                    if matches!(sub.kind, HirPatternKind::Wildcard | HirPatternKind::Lit(_)) {
                        continue;
                    }
                    let field = self.variant_field(ty, variant, *slot)?;
                    let inner = self.b.load(field.mir, value, field.offset);
                    self.bind_pattern(sub, inner, &field.ty)?;
                }
            }
            HirPatternKind::Wildcard | HirPatternKind::Lit(_) => {}
        }
        Ok(())
    }

    /// Storage of payload slot `slot` of `variant` in a value of type `ty`.
    fn variant_field(
        &mut self,
        ty: &Type,
        variant: &str,
        slot: usize,
    ) -> Result<FieldLayout, CodegenError> {
        let layout = self.module.layouts.plan(ty);
        let field = match &*layout {
            Layout::Union(union) => union
                .variant(variant)
                .and_then(|v| v.fields.get(slot))
                .cloned(),
            Layout::Record(record) => record.fields.get(slot).cloned(),
            _ => None,
        };
        field.ok_or_else(|| CodegenError::UnsupportedExpression {
            detail: format!("pattern `{variant}` does not fit `{ty}`"),
        })
    }
}

/// Matched by the tag alone: irrefutable, or a variant whose sub-patterns
/// only bind.
fn is_flat(pattern: &HirPattern) -> bool {
    match &pattern.kind {
        HirPatternKind::Wildcard | HirPatternKind::Bind(_) => true,
        HirPatternKind::Variant { fields, .. } => fields.iter().all(|(_, p)| p.is_irrefutable()),
        HirPatternKind::Lit(_) => false,
    }
}

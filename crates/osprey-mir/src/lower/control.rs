//! Effect handlers and fiber/channel operations.

use osprey_hir::{HirExpr, HirHandlerArm, HirSelectArm, HirSelectOp};
use osprey_types::Type;

use super::FunctionLowerer;
use crate::abi;
use crate::concurrency::{self, ChannelHandle, FiberHandle};
use crate::effects::HandlerFrame;
use crate::layout::{self, value_type};
use crate::{
    CodegenError, MirBlockId, MirSignature, MirTerminator, MirType, MirValueId, MirVar,
};

impl<'m, 'a> FunctionLowerer<'m, 'a> {
    // -- effects ------------------------------------------------------------

    pub(super) fn lower_handle(
        &mut self,
        effect: &'a str,
        arms: &'a [HirHandlerArm],
        body: &'a HirExpr,
    ) -> Result<MirValueId, CodegenError> {
        self.handlers.push(HandlerFrame {
            effect,
            arms,
            env: self.env.clone(),
        });
        tracing::trace!(effect, depth = self.handlers.depth(), "handler pushed");
        let result = self.lower_expr(body);
        self.handlers.pop();
        result
    }

    /// Inline the innermost matching arm. The arm sees the environment of
    /// its `handle` and only the handlers outside it.
    pub(super) fn lower_perform(
        &mut self,
        effect: &str,
        operation: &str,
        args: &'a [HirExpr],
    ) -> Result<MirValueId, CodegenError> {
        let values = self.lower_args(args)?;
        let Some(found) = self.handlers.resolve(effect, operation) else {
            return Err(CodegenError::UnhandledEffect {
                effect: effect.to_string(),
                operation: operation.to_string(),
            });
        };
        let frame_env = self
            .handlers
            .frame(found.depth)
            .map(|frame| frame.env.clone())
            .unwrap_or_default();
        let hidden = self.handlers.hide_from(found.depth);
        let saved = std::mem::replace(&mut self.env, frame_env);
        self.env.push_scope();
        for (param, value) in found.arm.params.iter().zip(values) {
            self.bind_local(&param.name, &param.ty, value);
        }
        let result = self.lower_expr(&found.arm.body);
        self.env = saved;
        self.handlers.restore(hidden);
        result
    }

    // -- fibers -------------------------------------------------------------

    pub(super) fn lower_spawn(&mut self, body: &'a HirExpr) -> Result<MirValueId, CodegenError> {
        let captures = self.captures(body, &[])?;
        let name = self.module.fresh_symbol("__fiber");
        let signature = MirSignature::new(vec![MirType::I64], Some(MirType::I64));
        self.lift(&name, &captures, None, &[], body, signature, true)?;
        let env = self.alloc_closure(&name, &captures);
        let entry = self.b.func_addr(&name);
        let handle = FiberHandle(self.call_symbol(concurrency::FIBER_SPAWN, vec![entry, env]));
        Ok(handle.value())
    }

    pub(super) fn lower_await(
        &mut self,
        fiber: &'a HirExpr,
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let handle = FiberHandle(self.lower_expr(fiber)?);
        let word = self.call_symbol(concurrency::FIBER_AWAIT, vec![handle.value()]);
        Ok(self.from_runtime_word(word, ty))
    }

    pub(super) fn lower_yield(
        &mut self,
        value: Option<&'a HirExpr>,
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let word = match value {
            Some(value) => {
                let lowered = self.lower_expr(value)?;
                abi::to_word(&mut self.b, lowered)
            }
            None => self.b.iconst(MirType::I64, 0),
        };
        let back = self.call_symbol(concurrency::FIBER_YIELD, vec![word]);
        Ok(self.from_runtime_word(back, ty))
    }

    // -- channels -----------------------------------------------------------

    pub(super) fn lower_channel(
        &mut self,
        capacity: Option<&'a HirExpr>,
    ) -> Result<MirValueId, CodegenError> {
        let capacity = match capacity {
            Some(expr) => self.lower_expr(expr)?,
            None => self
                .b
                .iconst(MirType::I64, concurrency::DEFAULT_CHANNEL_CAPACITY),
        };
        let channel = ChannelHandle(self.call_symbol(concurrency::CHANNEL_CREATE, vec![capacity]));
        Ok(channel.value())
    }

    pub(super) fn lower_send(
        &mut self,
        channel: &'a HirExpr,
        value: &'a HirExpr,
    ) -> Result<MirValueId, CodegenError> {
        let channel = ChannelHandle(self.lower_expr(channel)?);
        let value = self.lower_expr(value)?;
        let word = abi::to_word(&mut self.b, value);
        Ok(self.call_symbol(concurrency::CHANNEL_SEND, vec![channel.value(), word]))
    }

    pub(super) fn lower_recv(
        &mut self,
        channel: &'a HirExpr,
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let channel = ChannelHandle(self.lower_expr(channel)?);
        let word = self.call_symbol(concurrency::CHANNEL_RECV, vec![channel.value()]);
        Ok(self.from_runtime_word(word, ty))
    }

    /// Build the case table, let the runtime pick a ready case, then branch
    /// on its index. With a default arm the runtime does not block and
    /// `SELECT_NONE` lands on the default edge.
    pub(super) fn lower_select(
        &mut self,
        arms: &'a [HirSelectArm],
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let cases: Vec<&'a HirSelectArm> = arms
            .iter()
            .filter(|arm| !matches!(arm.op, HirSelectOp::Default))
            .collect();
        let default_arm = arms
            .iter()
            .find(|arm| matches!(arm.op, HirSelectOp::Default));

        let table = self.malloc(concurrency::SELECT_CASE_SIZE * cases.len().max(1) as i32);
        for (i, arm) in cases.iter().copied().enumerate() {
            let base = concurrency::SELECT_CASE_SIZE * i as i32;
            let (channel, kind, word) = match &arm.op {
                HirSelectOp::Recv(channel) => {
                    let channel = self.lower_expr(channel)?;
                    let none = self.b.iconst(MirType::I64, 0);
                    (channel, concurrency::SELECT_RECV, none)
                }
                HirSelectOp::Send(channel, value) => {
                    let channel = self.lower_expr(channel)?;
                    let value = self.lower_expr(value)?;
                    let word = abi::to_word(&mut self.b, value);
                    (channel, concurrency::SELECT_SEND, word)
                }
                HirSelectOp::Default => continue,
            };
            let kind = self.b.iconst(MirType::I64, kind);
            self.b
                .store(channel, table, base + concurrency::SELECT_CASE_CHANNEL);
            self.b.store(kind, table, base + concurrency::SELECT_CASE_KIND);
            self.b.store(word, table, base + concurrency::SELECT_CASE_VALUE);
        }
        let out = self.malloc(layout::SLOT);
        let count = self.b.iconst(MirType::I64, cases.len() as i64);
        let has_default = self.b.iconst(MirType::I64, i64::from(default_arm.is_some()));
        let index = self.call_symbol(
            concurrency::CHANNEL_SELECT,
            vec![table, count, has_default, out],
        );

        let result = self.b.declare_var(value_type(ty));
        let done = self.b.create_block();
        let blocks: Vec<MirBlockId> = cases.iter().map(|_| self.b.create_block()).collect();
        let default_block = self.b.create_block();
        self.b.terminate(MirTerminator::Switch {
            value: index,
            cases: blocks
                .iter()
                .enumerate()
                .map(|(i, block)| (i as u64, *block))
                .collect(),
            default: default_block,
        });

        for (arm, block) in cases.iter().copied().zip(blocks) {
            self.b.switch_to(block);
            self.lower_select_body(arm, out, result, done)?;
        }
        self.b.switch_to(default_block);
        match default_arm {
            Some(arm) => self.lower_select_body(arm, out, result, done)?,
            None => self.b.terminate(MirTerminator::Unreachable),
        }

        self.b.switch_to(done);
        Ok(self.b.use_var(result))
    }

    fn lower_select_body(
        &mut self,
        arm: &'a HirSelectArm,
        out: MirValueId,
        result: MirVar,
        done: MirBlockId,
    ) -> Result<(), CodegenError> {
        self.env.push_scope();
        if let Some(binding) = &arm.binding {
            let word = self.b.load(MirType::I64, out, 0);
            let value = abi::from_word(&mut self.b, word, value_type(&binding.ty));
            self.bind_local(&binding.name, &binding.ty, value);
        }
        let body = self.lower_expr(&arm.body)?;
        self.env.pop_scope();
        self.b.def_var(result, body);
        self.b.jump(done);
        Ok(())
    }

    fn from_runtime_word(&mut self, word: MirValueId, ty: &Type) -> MirValueId {
        if ty.is_unit() {
            return self.unit();
        }
        abi::from_word(&mut self.b, word, value_type(ty))
    }
}

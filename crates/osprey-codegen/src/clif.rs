//! MIR function -> Cranelift IR.

use std::collections::BTreeMap;

use cranelift::prelude::{FunctionBuilder, FunctionBuilderContext, InstBuilder, Value, types};
use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{Block, Function, MemFlags, TrapCode};
use cranelift_frontend::{Switch, Variable};
use cranelift_module::Module;
use osprey_mir::{
    CodegenError, MirBinaryOp, MirBlock, MirCond, MirConvert, MirFunction, MirInst, MirLiteral,
    MirTerminator, MirUnaryOp, MirValueId,
};

use crate::{Symbols, clif_signature, clif_type};

pub(crate) fn translate_function<M: Module>(
    module: &mut M,
    symbols: &Symbols,
    function: &MirFunction,
    func: &mut Function,
    builder_context: &mut FunctionBuilderContext,
) -> Result<(), CodegenError> {
    let builder = FunctionBuilder::new(func, builder_context);
    let mut translator = Translator {
        module,
        symbols,
        function,
        builder,
        blocks: BTreeMap::new(),
        values: BTreeMap::new(),
    };
    translator.run()?;
    translator.builder.seal_all_blocks();
    translator.builder.finalize();
    Ok(())
}

struct Translator<'t, 'f, M: Module> {
    module: &'t mut M,
    symbols: &'t Symbols,
    function: &'t MirFunction,
    builder: FunctionBuilder<'f>,
    blocks: BTreeMap<osprey_mir::MirBlockId, Block>,
    values: BTreeMap<MirValueId, Value>,
}

impl<M: Module> Translator<'_, '_, M> {
    fn run(&mut self) -> Result<(), CodegenError> {
        for block in &self.function.blocks {
            let clif = self.builder.create_block();
            self.blocks.insert(block.id, clif);
        }
        for (var, ty) in &self.function.vars {
            self.builder
                .declare_var(Variable::from_u32(var.0), clif_type(*ty));
        }

        let entry = self.block(self.function.entry)?;
        self.builder.append_block_params_for_function_params(entry);
        let params = self.builder.block_params(entry).to_vec();
        for (index, value) in params.into_iter().enumerate() {
            self.values.insert(MirValueId(index as u32), value);
        }

        let function = self.function;
        for block in &function.blocks {
            let clif = self.block(block.id)?;
            self.builder.switch_to_block(clif);
            for inst in &block.instructions {
                self.instruction(inst)?;
            }
            self.terminator(block)?;
        }
        Ok(())
    }

    fn block(&self, id: osprey_mir::MirBlockId) -> Result<Block, CodegenError> {
        self.blocks
            .get(&id)
            .copied()
            .ok_or_else(|| CodegenError::Module {
                detail: format!("`{}` has no block {id}", self.function.name),
            })
    }

    fn value(&self, id: MirValueId) -> Result<Value, CodegenError> {
        self.values
            .get(&id)
            .copied()
            .ok_or_else(|| CodegenError::InvalidMirValue {
                function: self.function.name.clone(),
                value: id.0,
            })
    }

    fn values(&self, ids: &[MirValueId]) -> Result<Vec<Value>, CodegenError> {
        ids.iter().map(|id| self.value(*id)).collect()
    }

    fn define(&mut self, dest: MirValueId, value: Value) {
        self.values.insert(dest, value);
    }

    fn instruction(&mut self, inst: &MirInst) -> Result<(), CodegenError> {
        match inst {
            MirInst::Const { dest, literal } => {
                let ins = self.builder.ins();
                let value = match *literal {
                    // Narrow immediates are stored zero-extended.
                    MirLiteral::I8(v) => ins.iconst(types::I8, i64::from(v as u8)),
                    MirLiteral::I32(v) => ins.iconst(types::I32, i64::from(v as u32)),
                    MirLiteral::I64(v) => ins.iconst(types::I64, v),
                    MirLiteral::F64(v) => ins.f64const(v),
                };
                self.define(*dest, value);
            }
            MirInst::DataAddr { dest, data } => {
                let id = self
                    .symbols
                    .data
                    .get(data)
                    .copied()
                    .ok_or_else(|| CodegenError::Module {
                        detail: format!("undeclared data `{data}`"),
                    })?;
                let global = self.module.declare_data_in_func(id, self.builder.func);
                let value = self.builder.ins().symbol_value(types::I64, global);
                self.define(*dest, value);
            }
            MirInst::FuncAddr { dest, function } => {
                let callee = self.func_ref(function)?;
                let value = self.builder.ins().func_addr(types::I64, callee);
                self.define(*dest, value);
            }
            MirInst::Binary {
                dest,
                op,
                left,
                right,
            } => {
                let (l, r) = (self.value(*left)?, self.value(*right)?);
                let value = self.binary(*op, l, r);
                self.define(*dest, value);
            }
            MirInst::Unary { dest, op, operand } => {
                let operand = self.value(*operand)?;
                let ins = self.builder.ins();
                let value = match op {
                    MirUnaryOp::INeg => ins.ineg(operand),
                    MirUnaryOp::FNeg => ins.fneg(operand),
                    MirUnaryOp::FTrunc => ins.trunc(operand),
                    MirUnaryOp::Not => ins.bxor_imm(operand, 1),
                };
                self.define(*dest, value);
            }
            MirInst::Convert { dest, op, value } => {
                let value = self.value(*value)?;
                let converted = self.convert(*op, value);
                self.define(*dest, converted);
            }
            MirInst::Load {
                dest,
                ty,
                addr,
                offset,
            } => {
                let addr = self.value(*addr)?;
                let value = self
                    .builder
                    .ins()
                    .load(clif_type(*ty), MemFlags::new(), addr, *offset);
                self.define(*dest, value);
            }
            MirInst::Store {
                value,
                addr,
                offset,
            } => {
                let (value, addr) = (self.value(*value)?, self.value(*addr)?);
                self.builder
                    .ins()
                    .store(MemFlags::new(), value, addr, *offset);
            }
            MirInst::Call { dest, callee, args } => {
                let callee = self.func_ref(callee.name())?;
                let args = self.values(args)?;
                let call = self.builder.ins().call(callee, &args);
                self.bind_result(*dest, call)?;
            }
            MirInst::CallIndirect {
                dest,
                signature,
                target,
                args,
            } => {
                let target = self.value(*target)?;
                let args = self.values(args)?;
                let signature = clif_signature(&*self.module, signature);
                let signature = self.builder.import_signature(signature);
                let call = self.builder.ins().call_indirect(signature, target, &args);
                self.bind_result(*dest, call)?;
            }
            MirInst::DefVar { var, value } => {
                let value = self.value(*value)?;
                self.builder.def_var(Variable::from_u32(var.0), value);
            }
            MirInst::UseVar { dest, var } => {
                let value = self.builder.use_var(Variable::from_u32(var.0));
                self.define(*dest, value);
            }
        }
        Ok(())
    }

    fn func_ref(&mut self, name: &str) -> Result<cranelift_codegen::ir::FuncRef, CodegenError> {
        let id = self
            .symbols
            .functions
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::UnknownFunction {
                name: name.to_string(),
            })?;
        Ok(self.module.declare_func_in_func(id, self.builder.func))
    }

    fn bind_result(
        &mut self,
        dest: Option<MirValueId>,
        call: cranelift_codegen::ir::Inst,
    ) -> Result<(), CodegenError> {
        let Some(dest) = dest else {
            return Ok(());
        };
        let result = self
            .builder
            .inst_results(call)
            .first()
            .copied()
            .ok_or_else(|| CodegenError::Module {
                detail: format!(
                    "call in `{}` binds {dest} but the callee returns nothing",
                    self.function.name
                ),
            })?;
        self.define(dest, result);
        Ok(())
    }

    fn binary(&mut self, op: MirBinaryOp, l: Value, r: Value) -> Value {
        let ins = self.builder.ins();
        match op {
            MirBinaryOp::IAdd => ins.iadd(l, r),
            MirBinaryOp::ISub => ins.isub(l, r),
            MirBinaryOp::IMul => ins.imul(l, r),
            MirBinaryOp::SDiv => ins.sdiv(l, r),
            MirBinaryOp::SRem => ins.srem(l, r),
            MirBinaryOp::FAdd => ins.fadd(l, r),
            MirBinaryOp::FSub => ins.fsub(l, r),
            MirBinaryOp::FMul => ins.fmul(l, r),
            MirBinaryOp::FDiv => ins.fdiv(l, r),
            MirBinaryOp::And => ins.band(l, r),
            MirBinaryOp::Or => ins.bor(l, r),
            MirBinaryOp::ICmp(cond) => ins.icmp(int_cc(cond), l, r),
            MirBinaryOp::FCmp(cond) => ins.fcmp(float_cc(cond), l, r),
        }
    }

    fn convert(&mut self, op: MirConvert, value: Value) -> Value {
        let from = self.builder.func.dfg.value_type(value);
        match op {
            MirConvert::Uextend(to) if clif_type(to) == from => value,
            MirConvert::Ireduce(to) if clif_type(to) == from => value,
            MirConvert::Uextend(to) => self.builder.ins().uextend(clif_type(to), value),
            MirConvert::Ireduce(to) => self.builder.ins().ireduce(clif_type(to), value),
            MirConvert::FloatBits => self
                .builder
                .ins()
                .bitcast(types::I64, MemFlags::new(), value),
            MirConvert::BitsFloat => self
                .builder
                .ins()
                .bitcast(types::F64, MemFlags::new(), value),
        }
    }

    fn terminator(&mut self, block: &MirBlock) -> Result<(), CodegenError> {
        match &block.terminator {
            MirTerminator::Jump { target } => {
                let target = self.block(*target)?;
                self.builder.ins().jump(target, &[]);
            }
            MirTerminator::Branch {
                condition,
                then_block,
                else_block,
            } => {
                let condition = self.value(*condition)?;
                let (then_block, else_block) = (self.block(*then_block)?, self.block(*else_block)?);
                self.builder
                    .ins()
                    .brif(condition, then_block, &[], else_block, &[]);
            }
            MirTerminator::Switch {
                value,
                cases,
                default,
            } => {
                let value = self.value(*value)?;
                let default = self.block(*default)?;
                let mut switch = Switch::new();
                for (case, target) in cases {
                    switch.set_entry(u128::from(*case), self.block(*target)?);
                }
                switch.emit(&mut self.builder, value, default);
            }
            MirTerminator::Return { value } => match value {
                Some(value) => {
                    let value = self.value(*value)?;
                    self.builder.ins().return_(&[value]);
                }
                None => {
                    self.builder.ins().return_(&[]);
                }
            },
            MirTerminator::Unreachable => {
                self.builder.ins().trap(TrapCode::unwrap_user(1));
            }
        }
        Ok(())
    }
}

fn int_cc(cond: MirCond) -> IntCC {
    match cond {
        MirCond::Eq => IntCC::Equal,
        MirCond::Ne => IntCC::NotEqual,
        MirCond::Lt => IntCC::SignedLessThan,
        MirCond::Le => IntCC::SignedLessThanOrEqual,
        MirCond::Gt => IntCC::SignedGreaterThan,
        MirCond::Ge => IntCC::SignedGreaterThanOrEqual,
    }
}

fn float_cc(cond: MirCond) -> FloatCC {
    match cond {
        MirCond::Eq => FloatCC::Equal,
        MirCond::Ne => FloatCC::NotEqual,
        MirCond::Lt => FloatCC::LessThan,
        MirCond::Le => FloatCC::LessThanOrEqual,
        MirCond::Gt => FloatCC::GreaterThan,
        MirCond::Ge => FloatCC::GreaterThanOrEqual,
    }
}

//! Incremental construction of one [`MirFunction`].

use crate::{
    MirBinaryOp, MirBlock, MirBlockId, MirCallee, MirConvert, MirFunction, MirInst, MirLinkage,
    MirLiteral, MirSignature, MirTerminator, MirType, MirUnaryOp, MirValueId, MirVar,
};

struct PendingBlock {
    id: MirBlockId,
    instructions: Vec<MirInst>,
    terminator: Option<MirTerminator>,
}

/// Builds a function block by block, tracking the type of every value.
///
/// Entry block parameters are the function parameters, numbered
/// `MirValueId(0..n)`. Instructions appended after the current block was
/// terminated land in a fresh block with no predecessors.
pub struct MirBuilder {
    name: String,
    signature: MirSignature,
    linkage: MirLinkage,
    blocks: Vec<PendingBlock>,
    current: MirBlockId,
    types: Vec<MirType>,
    vars: Vec<(MirVar, MirType)>,
}

impl MirBuilder {
    pub fn new(name: impl Into<String>, signature: MirSignature, linkage: MirLinkage) -> Self {
        let types = signature.params.clone();
        let mut builder = Self {
            name: name.into(),
            signature,
            linkage,
            blocks: Vec::new(),
            current: MirBlockId(0),
            types,
            vars: Vec::new(),
        };
        builder.current = builder.create_block();
        builder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &MirSignature {
        &self.signature
    }

    pub fn param(&self, index: usize) -> MirValueId {
        MirValueId(index as u32)
    }

    pub fn value_type(&self, value: MirValueId) -> MirType {
        self.types
            .get(value.0 as usize)
            .copied()
            .unwrap_or(MirType::I64)
    }

    // -- blocks -------------------------------------------------------------

    pub fn create_block(&mut self) -> MirBlockId {
        let id = MirBlockId(self.blocks.len() as u32);
        self.blocks.push(PendingBlock {
            id,
            instructions: Vec::new(),
            terminator: None,
        });
        id
    }

    pub fn switch_to(&mut self, block: MirBlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> MirBlockId {
        self.current
    }

    pub fn is_terminated(&self) -> bool {
        self.blocks[self.current.0 as usize].terminator.is_some()
    }

    /// End the current block. A block keeps its first terminator.
    pub fn terminate(&mut self, terminator: MirTerminator) {
        let block = &mut self.blocks[self.current.0 as usize];
        if block.terminator.is_none() {
            block.terminator = Some(terminator);
        }
    }

    pub fn jump(&mut self, target: MirBlockId) {
        self.terminate(MirTerminator::Jump { target });
    }

    pub fn branch(&mut self, condition: MirValueId, then_block: MirBlockId, else_block: MirBlockId) {
        self.terminate(MirTerminator::Branch {
            condition,
            then_block,
            else_block,
        });
    }

    // -- instructions -------------------------------------------------------

    fn fresh(&mut self, ty: MirType) -> MirValueId {
        let id = MirValueId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    fn push(&mut self, inst: MirInst) {
        if self.is_terminated() {
            let detached = self.create_block();
            self.current = detached;
        }
        self.blocks[self.current.0 as usize].instructions.push(inst);
    }

    pub fn constant(&mut self, literal: MirLiteral) -> MirValueId {
        let dest = self.fresh(literal.ty());
        self.push(MirInst::Const { dest, literal });
        dest
    }

    /// An integer constant of type `ty`, truncated to its width.
    pub fn iconst(&mut self, ty: MirType, value: i64) -> MirValueId {
        let literal = match ty {
            MirType::I8 => MirLiteral::I8(value as i8),
            MirType::I32 => MirLiteral::I32(value as i32),
            MirType::I64 => MirLiteral::I64(value),
            MirType::F64 => MirLiteral::F64(value as f64),
        };
        self.constant(literal)
    }

    pub fn fconst(&mut self, value: f64) -> MirValueId {
        self.constant(MirLiteral::F64(value))
    }

    pub fn data_addr(&mut self, data: impl Into<String>) -> MirValueId {
        let dest = self.fresh(MirType::I64);
        self.push(MirInst::DataAddr {
            dest,
            data: data.into(),
        });
        dest
    }

    pub fn func_addr(&mut self, function: impl Into<String>) -> MirValueId {
        let dest = self.fresh(MirType::I64);
        self.push(MirInst::FuncAddr {
            dest,
            function: function.into(),
        });
        dest
    }

    pub fn binary(&mut self, op: MirBinaryOp, left: MirValueId, right: MirValueId) -> MirValueId {
        let ty = match op {
            MirBinaryOp::ICmp(_) | MirBinaryOp::FCmp(_) => MirType::I8,
            _ => self.value_type(left),
        };
        let dest = self.fresh(ty);
        self.push(MirInst::Binary {
            dest,
            op,
            left,
            right,
        });
        dest
    }

    pub fn unary(&mut self, op: MirUnaryOp, operand: MirValueId) -> MirValueId {
        let ty = match op {
            MirUnaryOp::Not => MirType::I8,
            _ => self.value_type(operand),
        };
        let dest = self.fresh(ty);
        self.push(MirInst::Unary { dest, op, operand });
        dest
    }

    pub fn convert(&mut self, op: MirConvert, value: MirValueId) -> MirValueId {
        let ty = match op {
            MirConvert::Uextend(ty) | MirConvert::Ireduce(ty) => ty,
            MirConvert::FloatBits => MirType::I64,
            MirConvert::BitsFloat => MirType::F64,
        };
        let dest = self.fresh(ty);
        self.push(MirInst::Convert { dest, op, value });
        dest
    }

    pub fn load(&mut self, ty: MirType, addr: MirValueId, offset: i32) -> MirValueId {
        let dest = self.fresh(ty);
        self.push(MirInst::Load {
            dest,
            ty,
            addr,
            offset,
        });
        dest
    }

    pub fn store(&mut self, value: MirValueId, addr: MirValueId, offset: i32) {
        self.push(MirInst::Store {
            value,
            addr,
            offset,
        });
    }

    pub fn call(&mut self, callee: MirCallee, args: Vec<MirValueId>, ret: MirType) -> MirValueId {
        let dest = self.fresh(ret);
        self.push(MirInst::Call {
            dest: Some(dest),
            callee,
            args,
        });
        dest
    }

    pub fn call_void(&mut self, callee: MirCallee, args: Vec<MirValueId>) {
        self.push(MirInst::Call {
            dest: None,
            callee,
            args,
        });
    }

    pub fn call_indirect(
        &mut self,
        signature: MirSignature,
        target: MirValueId,
        args: Vec<MirValueId>,
    ) -> Option<MirValueId> {
        let dest = signature.ret.map(|ty| self.fresh(ty));
        self.push(MirInst::CallIndirect {
            dest,
            signature,
            target,
            args,
        });
        dest
    }

    // -- variables ----------------------------------------------------------

    pub fn declare_var(&mut self, ty: MirType) -> MirVar {
        let var = MirVar(self.vars.len() as u32);
        self.vars.push((var, ty));
        var
    }

    pub fn var_type(&self, var: MirVar) -> MirType {
        self.vars
            .get(var.0 as usize)
            .map_or(MirType::I64, |(_, ty)| *ty)
    }

    pub fn def_var(&mut self, var: MirVar, value: MirValueId) {
        self.push(MirInst::DefVar { var, value });
    }

    pub fn use_var(&mut self, var: MirVar) -> MirValueId {
        let dest = self.fresh(self.var_type(var));
        self.push(MirInst::UseVar { dest, var });
        dest
    }

    /// Close the function. Blocks left open end in `unreachable`.
    pub fn finish(self) -> MirFunction {
        let blocks = self
            .blocks
            .into_iter()
            .map(|b| MirBlock {
                id: b.id,
                instructions: b.instructions,
                terminator: b.terminator.unwrap_or(MirTerminator::Unreachable),
            })
            .collect();
        MirFunction {
            name: self.name,
            signature: self.signature,
            linkage: self.linkage,
            entry: MirBlockId(0),
            vars: self.vars,
            blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MirCond;

    #[test]
    fn params_are_the_first_values() {
        let mut b = MirBuilder::new(
            "add",
            MirSignature::new(vec![MirType::I64, MirType::I64], Some(MirType::I64)),
            MirLinkage::Local,
        );
        let sum = b.binary(MirBinaryOp::IAdd, b.param(0), b.param(1));
        assert_eq!(sum, MirValueId(2));
        assert_eq!(b.value_type(sum), MirType::I64);
        let flag = b.binary(MirBinaryOp::ICmp(MirCond::Lt), sum, b.param(0));
        assert_eq!(b.value_type(flag), MirType::I8);
    }

    #[test]
    fn code_after_a_terminator_goes_to_a_detached_block() {
        let mut b = MirBuilder::new("f", MirSignature::default(), MirLinkage::Local);
        b.terminate(MirTerminator::Unreachable);
        b.iconst(MirType::I64, 1);
        assert_eq!(b.current_block(), MirBlockId(1));
        let function = b.finish();
        assert_eq!(function.blocks.len(), 2);
        assert_eq!(function.blocks[1].terminator, MirTerminator::Unreachable);
    }

    #[test]
    fn first_terminator_wins() {
        let mut b = MirBuilder::new("f", MirSignature::default(), MirLinkage::Local);
        b.terminate(MirTerminator::Return { value: None });
        b.terminate(MirTerminator::Unreachable);
        let function = b.finish();
        assert_eq!(function.blocks[0].terminator, MirTerminator::Return { value: None });
    }
}

//! Backend-neutral mid-level IR (MIR) for Osprey.
//!
//! MIR is explicit control flow over a handful of machine types. Every value
//! is an `i8`, `i32`, `i64` or `f64`; heap cells, closures and runtime
//! handles are all `i64` words. Lowering from monomorphized HIR lives in
//! [`lower`]. The Cranelift backend consumes [`MirModule`] without looking
//! back at source types.

use std::collections::BTreeMap;
use std::fmt;

pub mod abi;
mod builder;
pub mod concurrency;
pub mod effects;
mod error;
pub mod layout;
pub mod lower;
pub mod security;

pub use builder::MirBuilder;
pub use error::CodegenError;
pub use lower::{LowerOptions, lower_program};
pub use security::SecurityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirBlockId(pub u32);

/// A mutable local. The backend maps each one to an SSA variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirVar(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirType {
    I8,
    I32,
    I64,
    F64,
}

impl MirType {
    pub fn bytes(self) -> u32 {
        match self {
            MirType::I8 => 1,
            MirType::I32 => 4,
            MirType::I64 | MirType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        self == MirType::F64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MirSignature {
    pub params: Vec<MirType>,
    /// `None` for C functions returning `void`.
    pub ret: Option<MirType>,
}

impl MirSignature {
    pub fn new(params: Vec<MirType>, ret: Option<MirType>) -> Self {
        Self { params, ret }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirLinkage {
    Export,
    Local,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MirModule {
    pub functions: Vec<MirFunction>,
    /// Imported symbols: libc, the Osprey runtime and `extern` declarations.
    pub externals: BTreeMap<String, MirSignature>,
    pub data: Vec<MirData>,
}

impl MirModule {
    pub fn function(&self, name: &str) -> Option<&MirFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A read-only data object. String literals are stored NUL-terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirData {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirFunction {
    pub name: String,
    pub signature: MirSignature,
    pub linkage: MirLinkage,
    pub entry: MirBlockId,
    /// Variables declared anywhere in the body, with their types.
    pub vars: Vec<(MirVar, MirType)>,
    pub blocks: Vec<MirBlock>,
}

impl MirFunction {
    pub fn instructions(&self) -> impl Iterator<Item = &MirInst> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirBlock {
    pub id: MirBlockId,
    pub instructions: Vec<MirInst>,
    pub terminator: MirTerminator,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MirLiteral {
    I8(i8),
    I32(i32),
    I64(i64),
    F64(f64),
}

impl MirLiteral {
    pub fn ty(self) -> MirType {
        match self {
            MirLiteral::I8(_) => MirType::I8,
            MirLiteral::I32(_) => MirType::I32,
            MirLiteral::I64(_) => MirType::I64,
            MirLiteral::F64(_) => MirType::F64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirCond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirBinaryOp {
    IAdd,
    ISub,
    IMul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    And,
    Or,
    /// Signed integer comparison producing an `i8` flag.
    ICmp(MirCond),
    /// Ordered float comparison producing an `i8` flag.
    FCmp(MirCond),
}

impl MirBinaryOp {
    pub fn is_division(self) -> bool {
        matches!(
            self,
            MirBinaryOp::SDiv | MirBinaryOp::SRem | MirBinaryOp::FDiv
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirUnaryOp {
    INeg,
    FNeg,
    /// Round toward zero, keeping `f64`.
    FTrunc,
    /// `i8` flag negation.
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirConvert {
    Uextend(MirType),
    Ireduce(MirType),
    /// Reinterpret `f64` bits as `i64`.
    FloatBits,
    /// Reinterpret `i64` bits as `f64`.
    BitsFloat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirCallee {
    /// A function defined in this module.
    Local(String),
    /// An entry of [`MirModule::externals`].
    External(String),
}

impl MirCallee {
    pub fn name(&self) -> &str {
        match self {
            MirCallee::Local(name) | MirCallee::External(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirInst {
    Const {
        dest: MirValueId,
        literal: MirLiteral,
    },
    DataAddr {
        dest: MirValueId,
        data: String,
    },
    FuncAddr {
        dest: MirValueId,
        function: String,
    },
    Binary {
        dest: MirValueId,
        op: MirBinaryOp,
        left: MirValueId,
        right: MirValueId,
    },
    Unary {
        dest: MirValueId,
        op: MirUnaryOp,
        operand: MirValueId,
    },
    Convert {
        dest: MirValueId,
        op: MirConvert,
        value: MirValueId,
    },
    Load {
        dest: MirValueId,
        ty: MirType,
        addr: MirValueId,
        offset: i32,
    },
    Store {
        value: MirValueId,
        addr: MirValueId,
        offset: i32,
    },
    Call {
        dest: Option<MirValueId>,
        callee: MirCallee,
        args: Vec<MirValueId>,
    },
    CallIndirect {
        dest: Option<MirValueId>,
        signature: MirSignature,
        target: MirValueId,
        args: Vec<MirValueId>,
    },
    DefVar {
        var: MirVar,
        value: MirValueId,
    },
    UseVar {
        dest: MirValueId,
        var: MirVar,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirTerminator {
    Jump {
        target: MirBlockId,
    },
    Branch {
        condition: MirValueId,
        then_block: MirBlockId,
        else_block: MirBlockId,
    },
    /// Jump table over an integer value.
    Switch {
        value: MirValueId,
        cases: Vec<(u64, MirBlockId)>,
        default: MirBlockId,
    },
    Return {
        value: Option<MirValueId>,
    },
    Unreachable,
}

// ---------------------------------------------------------------------------
// Text dump
// ---------------------------------------------------------------------------

impl fmt::Display for MirValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for MirBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for MirVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var{}", self.0)
    }
}

impl fmt::Display for MirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MirType::I8 => "i8",
            MirType::I32 => "i32",
            MirType::I64 => "i64",
            MirType::F64 => "f64",
        };
        f.write_str(name)
    }
}

impl fmt::Display for MirSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        write_list(f, &self.params)?;
        match self.ret {
            Some(ret) => write!(f, ") -> {ret}"),
            None => write!(f, ")"),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for MirInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirInst::Const { dest, literal } => match literal {
                MirLiteral::I8(v) => write!(f, "{dest} = const.i8 {v}"),
                MirLiteral::I32(v) => write!(f, "{dest} = const.i32 {v}"),
                MirLiteral::I64(v) => write!(f, "{dest} = const.i64 {v}"),
                MirLiteral::F64(v) => write!(f, "{dest} = const.f64 {v:?}"),
            },
            MirInst::DataAddr { dest, data } => write!(f, "{dest} = data_addr {data}"),
            MirInst::FuncAddr { dest, function } => write!(f, "{dest} = func_addr {function}"),
            MirInst::Binary {
                dest,
                op,
                left,
                right,
            } => write!(f, "{dest} = {op:?} {left}, {right}"),
            MirInst::Unary { dest, op, operand } => write!(f, "{dest} = {op:?} {operand}"),
            MirInst::Convert { dest, op, value } => write!(f, "{dest} = {op:?} {value}"),
            MirInst::Load {
                dest,
                ty,
                addr,
                offset,
            } => write!(f, "{dest} = load.{ty} {addr}+{offset}"),
            MirInst::Store {
                value,
                addr,
                offset,
            } => write!(f, "store {value}, {addr}+{offset}"),
            MirInst::Call { dest, callee, args } => {
                if let Some(dest) = dest {
                    write!(f, "{dest} = ")?;
                }
                write!(f, "call {}(", callee.name())?;
                write_list(f, args)?;
                write!(f, ")")
            }
            MirInst::CallIndirect {
                dest,
                signature,
                target,
                args,
            } => {
                if let Some(dest) = dest {
                    write!(f, "{dest} = ")?;
                }
                write!(f, "call_indirect {signature} {target}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            MirInst::DefVar { var, value } => write!(f, "{var} := {value}"),
            MirInst::UseVar { dest, var } => write!(f, "{dest} = {var}"),
        }
    }
}

impl fmt::Display for MirTerminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirTerminator::Jump { target } => write!(f, "jump {target}"),
            MirTerminator::Branch {
                condition,
                then_block,
                else_block,
            } => write!(f, "brif {condition}, {then_block}, {else_block}"),
            MirTerminator::Switch {
                value,
                cases,
                default,
            } => {
                write!(f, "switch {value} [")?;
                for (i, (case, block)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{case}: {block}")?;
                }
                write!(f, "] default {default}")
            }
            MirTerminator::Return { value: Some(v) } => write!(f, "return {v}"),
            MirTerminator::Return { value: None } => write!(f, "return"),
            MirTerminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for MirFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let linkage = match self.linkage {
            MirLinkage::Export => "export ",
            MirLinkage::Local => "",
        };
        writeln!(f, "{linkage}fn {}{} {{", self.name, self.signature)?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.id)?;
            for inst in &block.instructions {
                writeln!(f, "    {inst}")?;
            }
            writeln!(f, "    {}", block.terminator)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for MirModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, sig) in &self.externals {
            writeln!(f, "extern {name}{sig}")?;
        }
        for data in &self.data {
            writeln!(f, "data {} = {:?}", data.name, String::from_utf8_lossy(&data.bytes))?;
        }
        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_dump_lists_blocks_in_order() {
        let function = MirFunction {
            name: "answer".into(),
            signature: MirSignature::new(vec![], Some(MirType::I64)),
            linkage: MirLinkage::Local,
            entry: MirBlockId(0),
            vars: vec![],
            blocks: vec![MirBlock {
                id: MirBlockId(0),
                instructions: vec![MirInst::Const {
                    dest: MirValueId(0),
                    literal: MirLiteral::I64(42),
                }],
                terminator: MirTerminator::Return {
                    value: Some(MirValueId(0)),
                },
            }],
        };
        insta::assert_snapshot!(function.to_string(), @r"
        fn answer() -> i64 {
        bb0:
            v0 = const.i64 42
            return v0
        }
        ");
    }

    #[test]
    fn division_ops_are_flagged() {
        assert!(MirBinaryOp::SDiv.is_division());
        assert!(MirBinaryOp::FDiv.is_division());
        assert!(!MirBinaryOp::IMul.is_division());
    }
}

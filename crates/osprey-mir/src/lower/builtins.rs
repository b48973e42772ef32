//! Builtin calls.
//!
//! Arguments are checked against the builtin table here, not during
//! inference, so arity and named-argument errors come out of lowering.
//! Intrinsics expand inline; everything else is a word-ABI call into the
//! runtime.

use osprey_hir::HirArg;
use osprey_infer::builtins::{self, ArgumentMismatch, Builtin, Lowering};
use osprey_types::{
    ERROR_VARIANT, FIBER, INDEX_ERROR, MATH_ERROR, PROCESS_HANDLE, SUCCESS_VARIANT, Type,
};

use super::FunctionLowerer;
use crate::abi;
use crate::layout::{self, Layout, UnionLayout, VariantLayout, value_type};
use crate::{CodegenError, MirBinaryOp, MirCond, MirTerminator, MirType, MirValueId};

impl<'m, 'a> FunctionLowerer<'m, 'a> {
    pub(super) fn lower_builtin(
        &mut self,
        name: &str,
        args: &'a [HirArg],
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let Some(builtin) = builtins::lookup(name) else {
            return Err(CodegenError::MethodNotImplemented {
                name: name.to_string(),
            });
        };
        let ordered = order_arguments(builtin, args)?;
        self.security().check(name, builtin.permission)?;
        match builtin.lowering {
            Lowering::Intrinsic => self.lower_intrinsic(name, &ordered, ty),
            Lowering::Runtime(symbol) => self.lower_runtime(name, symbol, &ordered, ty),
        }
    }

    fn lower_intrinsic(
        &mut self,
        name: &str,
        args: &[&'a HirArg],
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let values = args
            .iter()
            .map(|arg| self.lower_expr(&arg.value))
            .collect::<Result<Vec<_>, _>>()?;
        let arg_ty = |i: usize| -> &'a Type { &args[i].value.ty };
        match name {
            "print" => {
                let text = self.to_string_value(values[0], arg_ty(0))?;
                self.call_symbol(abi::PUTS, vec![text]);
                Ok(self.unit())
            }
            "toString" => self.to_string_value(values[0], arg_ty(0)),
            "length" => Ok(self.call_symbol(abi::STRLEN, vec![values[0]])),
            "contains" => {
                let found = self.call_symbol(abi::STRSTR, vec![values[0], values[1]]);
                let null = self.b.iconst(MirType::I64, 0);
                Ok(self.b.binary(MirBinaryOp::ICmp(MirCond::Ne), found, null))
            }
            "range" => self.lower_range(values[0], values[1]),
            "forEach" => {
                let (list, f) = (values[0], values[1]);
                let elem = self.elem_type(arg_ty(0));
                let f_ty = arg_ty(1);
                let len = self.b.load(MirType::I64, list, layout::LIST_LEN_OFFSET);
                self.for_each_index(len, |this, i| {
                    let item = this.list_elem(list, i, elem);
                    this.call_closure(f, f_ty, vec![item])?;
                    Ok(())
                })?;
                Ok(self.unit())
            }
            "map" => {
                let (list, f) = (values[0], values[1]);
                let elem = self.elem_type(arg_ty(0));
                let f_ty = arg_ty(1);
                let len = self.b.load(MirType::I64, list, layout::LIST_LEN_OFFSET);
                let out = self.alloc_list(len);
                self.for_each_index(len, |this, i| {
                    let item = this.list_elem(list, i, elem);
                    let mapped = this.call_closure(f, f_ty, vec![item])?;
                    let base = this.element_base(out, i);
                    this.b.store(mapped, base, layout::LIST_ELEMS_OFFSET);
                    Ok(())
                })?;
                Ok(out)
            }
            "filter" => {
                let (list, predicate) = (values[0], values[1]);
                let elem = self.elem_type(arg_ty(0));
                let p_ty = arg_ty(1);
                let len = self.b.load(MirType::I64, list, layout::LIST_LEN_OFFSET);
                let out = self.alloc_list(len);
                let kept = self.b.declare_var(MirType::I64);
                let zero = self.b.iconst(MirType::I64, 0);
                self.b.def_var(kept, zero);
                self.for_each_index(len, |this, i| {
                    let item = this.list_elem(list, i, elem);
                    let keep = this.call_closure(predicate, p_ty, vec![item])?;
                    let store = this.b.create_block();
                    let next = this.b.create_block();
                    this.b.branch(keep, store, next);
                    this.b.switch_to(store);
                    let slot = this.b.use_var(kept);
                    let base = this.element_base(out, slot);
                    this.b.store(item, base, layout::LIST_ELEMS_OFFSET);
                    let one = this.b.iconst(MirType::I64, 1);
                    let bumped = this.b.binary(MirBinaryOp::IAdd, slot, one);
                    this.b.def_var(kept, bumped);
                    this.b.jump(next);
                    this.b.switch_to(next);
                    Ok(())
                })?;
                let count = self.b.use_var(kept);
                self.b.store(count, out, layout::LIST_LEN_OFFSET);
                Ok(out)
            }
            "fold" => {
                let (list, initial, f) = (values[0], values[1], values[2]);
                let elem = self.elem_type(arg_ty(0));
                let f_ty = arg_ty(2);
                let acc = self.b.declare_var(value_type(ty));
                self.b.def_var(acc, initial);
                let len = self.b.load(MirType::I64, list, layout::LIST_LEN_OFFSET);
                self.for_each_index(len, |this, i| {
                    let item = this.list_elem(list, i, elem);
                    let current = this.b.use_var(acc);
                    let next = this.call_closure(f, f_ty, vec![current, item])?;
                    this.b.def_var(acc, next);
                    Ok(())
                })?;
                Ok(self.b.use_var(acc))
            }
            other => Err(CodegenError::MethodNotImplemented {
                name: other.to_string(),
            }),
        }
    }

    /// Word-ABI call into the runtime. A `Result<T, String>` return is built
    /// from the word, zero meaning failure.
    fn lower_runtime(
        &mut self,
        name: &str,
        symbol: &str,
        args: &[&'a HirArg],
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let mut words = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.lower_expr(&arg.value)?;
            words.push(abi::to_word(&mut self.b, value));
        }
        let word = self.call_symbol(symbol, words);
        if let Some((ok, _)) = ty.result_parts() {
            return self.wrap_runtime_result(name, word, ok, ty);
        }
        if ty.is_unit() {
            return Ok(self.unit());
        }
        Ok(abi::from_word(&mut self.b, word, value_type(ty)))
    }

    fn wrap_runtime_result(
        &mut self,
        name: &str,
        word: MirValueId,
        ok: &Type,
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        let result = self.b.declare_var(MirType::I64);
        let succeeded = self.b.create_block();
        let failed = self.b.create_block();
        let done = self.b.create_block();
        let null = self.b.iconst(MirType::I64, 0);
        let is_ok = self.b.binary(MirBinaryOp::ICmp(MirCond::Ne), word, null);
        self.b.branch(is_ok, succeeded, failed);

        self.b.switch_to(succeeded);
        let payload = abi::from_word(&mut self.b, word, value_type(ok));
        let value = self.build_aggregate(ty, SUCCESS_VARIANT, vec![payload])?;
        self.b.def_var(result, value);
        self.b.jump(done);

        self.b.switch_to(failed);
        let message = self.string_literal(&format!("{name} failed"));
        let value = self.build_aggregate(ty, ERROR_VARIANT, vec![message])?;
        self.b.def_var(result, value);
        self.b.jump(done);

        self.b.switch_to(done);
        Ok(self.b.use_var(result))
    }

    // -- toString -----------------------------------------------------------

    pub(super) fn to_string_value(
        &mut self,
        value: MirValueId,
        ty: &Type,
    ) -> Result<MirValueId, CodegenError> {
        if ty.is_string() || ty.is_named(MATH_ERROR) || ty.is_named(INDEX_ERROR) {
            return Ok(value);
        }
        if ty.is_int() || ty.is_named(PROCESS_HANDLE) || ty.element_of(FIBER).is_some() {
            return Ok(self.call_symbol(abi::INT_TO_STRING, vec![value]));
        }
        if ty.is_float() {
            return Ok(self.call_symbol(abi::FLOAT_TO_STRING, vec![value]));
        }
        if ty.is_bool() {
            return Ok(self.bool_to_string(value));
        }
        if ty.is_unit() {
            return Ok(self.string_literal("()"));
        }
        if ty.is_function() {
            return Ok(self.string_literal("<function>"));
        }
        let layout = self.module.layouts.plan(ty);
        match &*layout {
            Layout::Union(union) if ty.result_parts().is_some() => {
                self.switch_on_tag(value, union, |this, variant| {
                    let Some(field) = variant.fields.first() else {
                        return Ok(this.string_literal(&variant.name));
                    };
                    let payload = this.b.load(field.mir, value, field.offset);
                    this.to_string_value(payload, &field.ty)
                })
            }
            Layout::Union(union) => self.switch_on_tag(value, union, |this, variant| {
                Ok(this.string_literal(&variant.name))
            }),
            Layout::Record(record) => Ok(self.string_literal(&record.type_name)),
            _ => Err(CodegenError::MissingToString { ty: ty.to_string() }),
        }
    }

    fn bool_to_string(&mut self, value: MirValueId) -> MirValueId {
        let text = self.b.declare_var(MirType::I64);
        let yes = self.b.create_block();
        let no = self.b.create_block();
        let done = self.b.create_block();
        self.b.branch(value, yes, no);
        self.b.switch_to(yes);
        let t = self.string_literal("true");
        self.b.def_var(text, t);
        self.b.jump(done);
        self.b.switch_to(no);
        let f = self.string_literal("false");
        self.b.def_var(text, f);
        self.b.jump(done);
        self.b.switch_to(done);
        self.b.use_var(text)
    }

    /// One block per variant, each producing a word; merged into one value.
    fn switch_on_tag(
        &mut self,
        value: MirValueId,
        union: &UnionLayout,
        mut emit: impl FnMut(&mut Self, &VariantLayout) -> Result<MirValueId, CodegenError>,
    ) -> Result<MirValueId, CodegenError> {
        let result = self.b.declare_var(MirType::I64);
        let done = self.b.create_block();
        let trap = self.b.create_block();
        let tag = self.b.load(MirType::I32, value, layout::TAG_OFFSET);
        let mut arms = Vec::with_capacity(union.variants.len());
        for variant in &union.variants {
            arms.push((u64::from(variant.tag), self.b.create_block(), variant));
        }
        self.b.terminate(MirTerminator::Switch {
            value: tag,
            cases: arms.iter().map(|(tag, block, _)| (*tag, *block)).collect(),
            default: trap,
        });
        for (_, block, variant) in arms {
            self.b.switch_to(block);
            let text = emit(self, variant)?;
            self.b.def_var(result, text);
            self.b.jump(done);
        }
        self.b.switch_to(trap);
        self.b.terminate(MirTerminator::Unreachable);
        self.b.switch_to(done);
        Ok(self.b.use_var(result))
    }

    // -- list helpers -------------------------------------------------------

    fn elem_type(&mut self, ty: &Type) -> MirType {
        match &*self.module.layouts.plan(ty) {
            Layout::List { mir, .. } => *mir,
            _ => MirType::I64,
        }
    }

    fn list_elem(&mut self, list: MirValueId, index: MirValueId, ty: MirType) -> MirValueId {
        let base = self.element_base(list, index);
        self.b.load(ty, base, layout::LIST_ELEMS_OFFSET)
    }

    /// List cell with room for `len` elements, its length set to `len`.
    fn alloc_list(&mut self, len: MirValueId) -> MirValueId {
        let slot = self.b.iconst(MirType::I64, i64::from(layout::SLOT));
        let header = self.b.iconst(MirType::I64, i64::from(layout::LIST_ELEMS_OFFSET));
        let body = self.b.binary(MirBinaryOp::IMul, len, slot);
        let size = self.b.binary(MirBinaryOp::IAdd, body, header);
        let cell = self.call_symbol(abi::MALLOC, vec![size]);
        self.b.store(len, cell, layout::LIST_LEN_OFFSET);
        cell
    }

    /// `[start, end)` as a list; empty when `end <= start`.
    fn lower_range(
        &mut self,
        start: MirValueId,
        end: MirValueId,
    ) -> Result<MirValueId, CodegenError> {
        let span = self.b.binary(MirBinaryOp::ISub, end, start);
        let len = self.b.declare_var(MirType::I64);
        let zero = self.b.iconst(MirType::I64, 0);
        self.b.def_var(len, zero);
        let positive = self.b.binary(MirBinaryOp::ICmp(MirCond::Gt), span, zero);
        let take = self.b.create_block();
        let sized = self.b.create_block();
        self.b.branch(positive, take, sized);
        self.b.switch_to(take);
        self.b.def_var(len, span);
        self.b.jump(sized);
        self.b.switch_to(sized);

        let len = self.b.use_var(len);
        let cell = self.alloc_list(len);
        self.for_each_index(len, |this, i| {
            let value = this.b.binary(MirBinaryOp::IAdd, start, i);
            let base = this.element_base(cell, i);
            this.b.store(value, base, layout::LIST_ELEMS_OFFSET);
            Ok(())
        })?;
        Ok(cell)
    }

    /// Run `body` once for each index in `0..len`.
    fn for_each_index(
        &mut self,
        len: MirValueId,
        mut body: impl FnMut(&mut Self, MirValueId) -> Result<(), CodegenError>,
    ) -> Result<(), CodegenError> {
        let counter = self.b.declare_var(MirType::I64);
        let zero = self.b.iconst(MirType::I64, 0);
        self.b.def_var(counter, zero);
        let header = self.b.create_block();
        let step = self.b.create_block();
        let exit = self.b.create_block();
        self.b.jump(header);

        self.b.switch_to(header);
        let i = self.b.use_var(counter);
        let more = self.b.binary(MirBinaryOp::ICmp(MirCond::Lt), i, len);
        self.b.branch(more, step, exit);

        self.b.switch_to(step);
        let i = self.b.use_var(counter);
        body(self, i)?;
        let i = self.b.use_var(counter);
        let one = self.b.iconst(MirType::I64, 1);
        let next = self.b.binary(MirBinaryOp::IAdd, i, one);
        self.b.def_var(counter, next);
        self.b.jump(header);

        self.b.switch_to(exit);
        Ok(())
    }
}

/// Line call arguments up with the builtin's parameters, in parameter order.
fn order_arguments<'a>(
    builtin: &Builtin,
    args: &'a [HirArg],
) -> Result<Vec<&'a HirArg>, CodegenError> {
    let params: Vec<&str> = builtin.param_names().collect();
    let names: Vec<Option<&str>> = args.iter().map(|a| a.name.as_deref()).collect();
    let function = builtin.name.to_string();
    let slots = builtins::bind_arguments(&params, &names).map_err(|mismatch| match mismatch {
        ArgumentMismatch::Count { expected, found } => CodegenError::WrongArgumentCount {
            function: function.clone(),
            expected,
            found,
        },
        ArgumentMismatch::Missing(name) => CodegenError::MissingNamedArgument {
            function: function.clone(),
            name,
        },
        ArgumentMismatch::Unknown(name) => CodegenError::UnknownNamedArgument {
            function: function.clone(),
            name,
        },
        ArgumentMismatch::Duplicate(name) => CodegenError::DuplicateNamedArgument {
            function: function.clone(),
            name,
        },
    })?;
    let mut ordered: Vec<Option<&'a HirArg>> = vec![None; params.len()];
    for (arg, slot) in args.iter().zip(slots) {
        ordered[slot] = Some(arg);
    }
    Ok(ordered.into_iter().flatten().collect())
}

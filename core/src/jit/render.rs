use std::collections::BTreeSet;

use super::artifact::CompiledArtifact;
use super::ir::{Block, BlockId, Instr, Op, Reg, Term};
use crate::code::CodeUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RuntimeHelper {
    LoadConst,
    LoadLocal,
    CheckLocal,
    StoreLocal,
    DeleteLocal,
    LoadGlobal,
    StoreGlobal,
    DeleteGlobal,
    LoadDeref,
    StoreDeref,
    LoadClosure,
    GetAttr,
    SetAttr,
    DelAttr,
    Incref,
    Decref,
    Binary,
    InPlace,
    Unary,
    Compare,
    GetItem,
    SetItem,
    DelItem,
    GetSlice,
    SetSlice,
    DelSlice,
    GetIter,
    IterNext,
    IsTrue,
    BuildTuple,
    BuildList,
    BuildMap,
    BuildSlice,
    StoreMap,
    ListAppend,
    Unpack,
    Call,
    MakeFunction,
    Catch,
    Raise,
    Reraise,
    Unwind,
}

impl RuntimeHelper {
    fn symbol(self) -> &'static str {
        match self {
            RuntimeHelper::LoadConst => "sw_rt_load_const",
            RuntimeHelper::LoadLocal => "sw_rt_load_local",
            RuntimeHelper::CheckLocal => "sw_rt_check_local",
            RuntimeHelper::StoreLocal => "sw_rt_store_local",
            RuntimeHelper::DeleteLocal => "sw_rt_delete_local",
            RuntimeHelper::LoadGlobal => "sw_rt_load_global",
            RuntimeHelper::StoreGlobal => "sw_rt_store_global",
            RuntimeHelper::DeleteGlobal => "sw_rt_delete_global",
            RuntimeHelper::LoadDeref => "sw_rt_load_deref",
            RuntimeHelper::StoreDeref => "sw_rt_store_deref",
            RuntimeHelper::LoadClosure => "sw_rt_load_closure",
            RuntimeHelper::GetAttr => "sw_rt_getattr",
            RuntimeHelper::SetAttr => "sw_rt_setattr",
            RuntimeHelper::DelAttr => "sw_rt_delattr",
            RuntimeHelper::Incref => "sw_rt_incref",
            RuntimeHelper::Decref => "sw_rt_decref",
            RuntimeHelper::Binary => "sw_rt_binary",
            RuntimeHelper::InPlace => "sw_rt_inplace",
            RuntimeHelper::Unary => "sw_rt_unary",
            RuntimeHelper::Compare => "sw_rt_compare",
            RuntimeHelper::GetItem => "sw_rt_getitem",
            RuntimeHelper::SetItem => "sw_rt_setitem",
            RuntimeHelper::DelItem => "sw_rt_delitem",
            RuntimeHelper::GetSlice => "sw_rt_getslice",
            RuntimeHelper::SetSlice => "sw_rt_setslice",
            RuntimeHelper::DelSlice => "sw_rt_delslice",
            RuntimeHelper::GetIter => "sw_rt_getiter",
            RuntimeHelper::IterNext => "sw_rt_iter_next",
            RuntimeHelper::IsTrue => "sw_rt_is_true",
            RuntimeHelper::BuildTuple => "sw_rt_build_tuple",
            RuntimeHelper::BuildList => "sw_rt_build_list",
            RuntimeHelper::BuildMap => "sw_rt_build_map",
            RuntimeHelper::BuildSlice => "sw_rt_build_slice",
            RuntimeHelper::StoreMap => "sw_rt_store_map",
            RuntimeHelper::ListAppend => "sw_rt_list_append",
            RuntimeHelper::Unpack => "sw_rt_unpack",
            RuntimeHelper::Call => "sw_rt_call",
            RuntimeHelper::MakeFunction => "sw_rt_make_function",
            RuntimeHelper::Catch => "sw_rt_catch",
            RuntimeHelper::Raise => "sw_rt_raise",
            RuntimeHelper::Reraise => "sw_rt_reraise",
            RuntimeHelper::Unwind => "sw_rt_unwind",
        }
    }

    fn declaration(self) -> &'static str {
        match self {
            RuntimeHelper::LoadConst => "declare i64 @sw_rt_load_const(i32)",
            RuntimeHelper::LoadLocal => "declare i64 @sw_rt_load_local(i32)",
            RuntimeHelper::CheckLocal => "declare void @sw_rt_check_local(i32)",
            RuntimeHelper::StoreLocal => "declare void @sw_rt_store_local(i32, i64)",
            RuntimeHelper::DeleteLocal => "declare void @sw_rt_delete_local(i32)",
            RuntimeHelper::LoadGlobal => "declare i64 @sw_rt_load_global(i32)",
            RuntimeHelper::StoreGlobal => "declare void @sw_rt_store_global(i32, i64)",
            RuntimeHelper::DeleteGlobal => "declare void @sw_rt_delete_global(i32)",
            RuntimeHelper::LoadDeref => "declare i64 @sw_rt_load_deref(i32)",
            RuntimeHelper::StoreDeref => "declare void @sw_rt_store_deref(i32, i64)",
            RuntimeHelper::LoadClosure => "declare i64 @sw_rt_load_closure(i32)",
            RuntimeHelper::GetAttr => "declare i64 @sw_rt_getattr(i64, i32)",
            RuntimeHelper::SetAttr => "declare void @sw_rt_setattr(i64, i32, i64)",
            RuntimeHelper::DelAttr => "declare void @sw_rt_delattr(i64, i32)",
            RuntimeHelper::Incref => "declare i64 @sw_rt_incref(i64)",
            RuntimeHelper::Decref => "declare void @sw_rt_decref(i64)",
            RuntimeHelper::Binary => "declare i64 @sw_rt_binary(i32, i64, i64)",
            RuntimeHelper::InPlace => "declare i64 @sw_rt_inplace(i32, i64, i64)",
            RuntimeHelper::Unary => "declare i64 @sw_rt_unary(i32, i64)",
            RuntimeHelper::Compare => "declare i64 @sw_rt_compare(i32, i64, i64)",
            RuntimeHelper::GetItem => "declare i64 @sw_rt_getitem(i64, i64)",
            RuntimeHelper::SetItem => "declare void @sw_rt_setitem(i64, i64, i64)",
            RuntimeHelper::DelItem => "declare void @sw_rt_delitem(i64, i64)",
            RuntimeHelper::GetSlice => "declare i64 @sw_rt_getslice(i64, i64, i64)",
            RuntimeHelper::SetSlice => "declare void @sw_rt_setslice(i64, i64, i64, i64)",
            RuntimeHelper::DelSlice => "declare void @sw_rt_delslice(i64, i64, i64)",
            RuntimeHelper::GetIter => "declare i64 @sw_rt_getiter(i64)",
            RuntimeHelper::IterNext => "declare i64 @sw_rt_iter_next(i64)",
            RuntimeHelper::IsTrue => "declare i1 @sw_rt_is_true(i64)",
            RuntimeHelper::BuildTuple => "declare i64 @sw_rt_build_tuple(i64*, i64)",
            RuntimeHelper::BuildList => "declare i64 @sw_rt_build_list(i64*, i64)",
            RuntimeHelper::BuildMap => "declare i64 @sw_rt_build_map()",
            RuntimeHelper::BuildSlice => "declare i64 @sw_rt_build_slice(i64, i64, i64)",
            RuntimeHelper::StoreMap => "declare void @sw_rt_store_map(i64, i64, i64)",
            RuntimeHelper::ListAppend => "declare void @sw_rt_list_append(i64, i64)",
            RuntimeHelper::Unpack => "declare void @sw_rt_unpack(i64, i64*, i64)",
            RuntimeHelper::Call => "declare i64 @sw_rt_call(i64, i64*, i64, i64*, i64, i64, i64)",
            RuntimeHelper::MakeFunction => "declare i64 @sw_rt_make_function(i64, i64*, i64, i64)",
            RuntimeHelper::Catch => "declare void @sw_rt_catch(i64*)",
            RuntimeHelper::Raise => "declare void @sw_rt_raise(i64*, i64)",
            RuntimeHelper::Reraise => "declare void @sw_rt_reraise(i64, i64, i64)",
            RuntimeHelper::Unwind => "declare void @sw_rt_unwind()",
        }
    }
}

struct IrWriter {
    buf: String,
    indent: usize,
}

impl IrWriter {
    fn new() -> Self {
        Self {
            buf: String::new(),
            indent: 0,
        }
    }

    fn indent(&mut self) {
        self.indent += 1;
    }

    fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    fn line<S: AsRef<str>>(&mut self, line: S) {
        let line = line.as_ref();
        if !line.is_empty() {
            for _ in 0..self.indent {
                self.buf.push_str("  ");
            }
        }
        self.buf.push_str(line);
        self.buf.push('\n');
    }

    fn raw_line<S: AsRef<str>>(&mut self, line: S) {
        self.buf.push_str(line.as_ref());
        self.buf.push('\n');
    }

    fn finish(self) -> String {
        self.buf
    }
}

/// A rendered call: helper, result register, operand list, annotation.
struct Call {
    helper: RuntimeHelper,
    dst: Option<Reg>,
    args: Vec<String>,
    note: Option<String>,
}

impl Call {
    fn new(helper: RuntimeHelper, dst: Option<Reg>) -> Self {
        Self {
            helper,
            dst,
            args: Vec::new(),
            note: None,
        }
    }

    fn int(mut self, value: impl std::fmt::Display) -> Self {
        self.args.push(format!("i32 {value}"));
        self
    }

    fn reg(mut self, reg: Reg) -> Self {
        self.args.push(format!("i64 {reg}"));
        self
    }

    fn opt(mut self, reg: Option<Reg>) -> Self {
        match reg {
            Some(reg) => self.args.push(format!("i64 {reg}")),
            None => self.args.push("i64 null".to_string()),
        }
        self
    }

    fn list(mut self, regs: &[Reg]) -> Self {
        let items: Vec<String> = regs.iter().map(|r| r.to_string()).collect();
        self.args.push(format!("i64* [{}]", items.join(", ")));
        self.args.push(format!("i64 {}", regs.len()));
        self
    }

    fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

struct Renderer<'a> {
    code: &'a CodeUnit,
    helpers: BTreeSet<RuntimeHelper>,
    body: IrWriter,
    tmp_counter: usize,
}

impl<'a> Renderer<'a> {
    fn name(&self, idx: u32) -> String {
        self.code
            .names
            .get(idx as usize)
            .cloned()
            .unwrap_or_else(|| format!("<name {idx}>"))
    }

    fn local(&self, idx: u32) -> String {
        self.code
            .varnames
            .get(idx as usize)
            .cloned()
            .unwrap_or_else(|| format!("<local {idx}>"))
    }

    fn fresh_tmp(&mut self) -> String {
        let tmp = format!("%t{}", self.tmp_counter);
        self.tmp_counter += 1;
        tmp
    }

    fn emit_call(&mut self, call: Call, unwind: Option<BlockId>) {
        self.helpers.insert(call.helper);
        let ret = match call.dst {
            Some(_) => "i64",
            None => "void",
        };
        let mut text = String::new();
        if let Some(dst) = call.dst {
            text.push_str(&format!("{dst} = "));
        }
        let verb = if unwind.is_some() { "invoke" } else { "call" };
        text.push_str(&format!("{verb} {ret} @{}({})", call.helper.symbol(), call.args.join(", ")));
        if let Some(pad) = unwind {
            text.push_str(&format!(" unwind label %{pad}"));
        }
        if let Some(note) = call.note {
            text.push_str(&format!(" ; {note}"));
        }
        self.body.line(text);
    }

    fn instr(&mut self, instr: &Instr) {
        use RuntimeHelper as H;
        let call = match &instr.op {
            Op::LoadConst { dst, idx } => {
                let note = self
                    .code
                    .consts
                    .get(*idx as usize)
                    .map(|c| c.debug_repr())
                    .unwrap_or_default();
                Call::new(H::LoadConst, Some(*dst)).int(idx).note(note)
            }
            Op::LoadLocal { dst, idx } => Call::new(H::LoadLocal, Some(*dst)).int(idx).note(self.local(*idx)),
            Op::CheckLocal { idx } => Call::new(H::CheckLocal, None).int(idx).note(self.local(*idx)),
            Op::StoreLocal { idx, src } => Call::new(H::StoreLocal, None)
                .int(idx)
                .reg(*src)
                .note(self.local(*idx)),
            Op::DeleteLocal { idx } => Call::new(H::DeleteLocal, None).int(idx).note(self.local(*idx)),
            Op::LoadGlobal { dst, name } => Call::new(H::LoadGlobal, Some(*dst)).int(name).note(self.name(*name)),
            Op::StoreGlobal { name, src } => Call::new(H::StoreGlobal, None)
                .int(name)
                .reg(*src)
                .note(self.name(*name)),
            Op::DeleteGlobal { name } => Call::new(H::DeleteGlobal, None).int(name).note(self.name(*name)),
            Op::LoadDeref { dst, idx } => Call::new(H::LoadDeref, Some(*dst)).int(idx),
            Op::StoreDeref { idx, src } => Call::new(H::StoreDeref, None).int(idx).reg(*src),
            Op::LoadClosure { dst, idx } => Call::new(H::LoadClosure, Some(*dst)).int(idx),
            Op::LoadAttr { dst, obj, name } => Call::new(H::GetAttr, Some(*dst))
                .reg(*obj)
                .int(name)
                .note(self.name(*name)),
            Op::StoreAttr { obj, name, value } => Call::new(H::SetAttr, None)
                .reg(*obj)
                .int(name)
                .reg(*value)
                .note(self.name(*name)),
            Op::DeleteAttr { obj, name } => Call::new(H::DelAttr, None).reg(*obj).int(name).note(self.name(*name)),
            Op::Copy { dst, src } => Call::new(H::Incref, Some(*dst)).reg(*src),
            Op::Move { dst, src } => {
                self.body.line(format!("{dst} = bitcast i64 {src} to i64"));
                return;
            }
            Op::Release { reg } => Call::new(H::Decref, None).reg(*reg),
            Op::Binary { dst, op, lhs, rhs } => Call::new(H::Binary, Some(*dst))
                .int(*op as u32)
                .reg(*lhs)
                .reg(*rhs)
                .note(op.symbol()),
            Op::InPlace { dst, op, lhs, rhs } => Call::new(H::InPlace, Some(*dst))
                .int(*op as u32)
                .reg(*lhs)
                .reg(*rhs)
                .note(op.inplace_symbol()),
            Op::Unary { dst, op, operand } => Call::new(H::Unary, Some(*dst))
                .int(*op as u32)
                .reg(*operand)
                .note(op.name()),
            Op::Compare { dst, op, lhs, rhs } => Call::new(H::Compare, Some(*dst))
                .int(op.as_arg())
                .reg(*lhs)
                .reg(*rhs)
                .note(op.symbol()),
            Op::GetItem { dst, container, key } => Call::new(H::GetItem, Some(*dst)).reg(*container).reg(*key),
            Op::SetItem { container, key, value } => Call::new(H::SetItem, None).reg(*container).reg(*key).reg(*value),
            Op::DelItem { container, key } => Call::new(H::DelItem, None).reg(*container).reg(*key),
            Op::GetSlice { dst, obj, start, stop } => Call::new(H::GetSlice, Some(*dst)).reg(*obj).opt(*start).opt(*stop),
            Op::SetSlice { obj, start, stop, value } => Call::new(H::SetSlice, None)
                .reg(*obj)
                .opt(*start)
                .opt(*stop)
                .reg(*value),
            Op::DelSlice { obj, start, stop } => Call::new(H::DelSlice, None).reg(*obj).opt(*start).opt(*stop),
            Op::GetIter { dst, src } => Call::new(H::GetIter, Some(*dst)).reg(*src),
            Op::BuildTuple { dst, items } => Call::new(H::BuildTuple, Some(*dst)).list(items),
            Op::BuildList { dst, items } => Call::new(H::BuildList, Some(*dst)).list(items),
            Op::BuildMap { dst } => Call::new(H::BuildMap, Some(*dst)),
            Op::BuildSlice { dst, start, stop, step } => Call::new(H::BuildSlice, Some(*dst))
                .reg(*start)
                .reg(*stop)
                .opt(*step),
            Op::StoreMap { map, key, value } => Call::new(H::StoreMap, None).reg(*map).reg(*key).reg(*value),
            Op::ListAppend { list, item } => Call::new(H::ListAppend, None).reg(*list).reg(*item),
            Op::Unpack { dsts, src } => Call::new(H::Unpack, None).reg(*src).list(dsts),
            Op::Call {
                dst,
                func,
                args,
                kwargs,
                star,
                starstar,
            } => {
                let flat: Vec<Reg> = kwargs.iter().flat_map(|(k, v)| [*k, *v]).collect();
                Call::new(H::Call, Some(*dst))
                    .reg(*func)
                    .list(args)
                    .list(&flat)
                    .opt(*star)
                    .opt(*starstar)
            }
            Op::MakeFunction {
                dst,
                code,
                defaults,
                closure,
            } => Call::new(H::MakeFunction, Some(*dst)).reg(*code).list(defaults).opt(*closure),
            Op::Catch { tb, val, ty } => Call::new(H::Catch, None).list(&[*tb, *val, *ty]).note("tb, value, type"),
        };
        self.emit_call(call, instr.unwind);
    }

    fn terminator(&mut self, block: &Block) {
        use RuntimeHelper as H;
        let unwind = block.term_unwind;
        match &block.term {
            Term::Jump(target) => self.body.line(format!("br label %{target}")),
            Term::Branch {
                cond,
                keep,
                if_true,
                if_false,
            } => {
                let tmp = self.fresh_tmp();
                self.helpers.insert(H::IsTrue);
                let mut text = format!("{tmp} = invoke i1 @{}(i64 {cond})", H::IsTrue.symbol());
                if let Some(pad) = unwind {
                    text.push_str(&format!(" unwind label %{pad}"));
                }
                if !*keep {
                    self.helpers.insert(H::Decref);
                    text.push_str(" ; consumes operand");
                }
                self.body.line(text);
                self.body.line(format!("br i1 {tmp}, label %{if_true}, label %{if_false}"));
            }
            Term::ForIter { iter, dst, body, exit } => {
                self.emit_call(Call::new(H::IterNext, Some(*dst)).reg(*iter), unwind);
                let tmp = self.fresh_tmp();
                self.body.line(format!("{tmp} = icmp eq i64 {dst}, 0"));
                self.body.line(format!("br i1 {tmp}, label %{exit}, label %{body}"));
            }
            Term::Return(reg) => self.body.line(format!("ret i64 {reg}")),
            Term::Raise { args } => {
                self.emit_call(Call::new(H::Raise, None).list(args), unwind);
                self.body.line("unreachable");
            }
            Term::Reraise { ty, val, tb } => {
                self.emit_call(Call::new(H::Reraise, None).reg(*ty).reg(*val).reg(*tb), unwind);
                self.body.line("unreachable");
            }
            Term::Unwind => {
                self.emit_call(Call::new(H::Unwind, None), None);
                self.body.line("ret i64 0");
            }
        }
    }
}

pub(crate) fn render(artifact: &CompiledArtifact, code: &CodeUnit) -> String {
    let function = &artifact.function;
    let mut renderer = Renderer {
        code,
        helpers: BTreeSet::new(),
        body: IrWriter::new(),
        tmp_counter: 0,
    };
    renderer.body.raw_line(format!(
        "define i64 @\"sw_jit.{}.{}\"() {{",
        artifact.name,
        artifact.code_id.get()
    ));
    for (idx, block) in function.blocks.iter().enumerate() {
        let id = BlockId(idx as u32);
        let entry = if id == function.entry { " ; entry" } else { "" };
        renderer.body.raw_line(format!("{id}:{entry}"));
        renderer.body.indent();
        for instr in &block.instrs {
            renderer.instr(instr);
        }
        renderer.terminator(block);
        renderer.body.dedent();
    }
    renderer.body.raw_line("}");

    let mut out = IrWriter::new();
    out.raw_line(format!("; ModuleID = 'swallow.{}'", artifact.name));
    out.raw_line(format!(
        "; code {} at {}: {} blocks, {} registers",
        artifact.code_id,
        artifact.level,
        function.blocks.len(),
        function.nregs
    ));
    out.raw_line("");
    for helper in &renderer.helpers {
        out.raw_line(helper.declaration());
    }
    if !renderer.helpers.is_empty() {
        out.raw_line("");
    }
    let mut text = out.finish();
    text.push_str(&renderer.body.finish());
    text
}

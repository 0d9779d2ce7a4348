//! Print an in-memory representation of the IR.
//!
//! The textual form round-trips through [`crate::parser`] for IR built from
//! text; metadata written by the annotation passes is printed but not
//! parsed back.

use std::collections::BTreeMap;
use std::fmt::Write;

use itertools::Itertools;

use crate::{
    block::Block,
    constant::{Constant, ConstantValue},
    context::Context,
    function::Function,
    instruction::{BinaryOpKind, InstOp, Predicate},
    metadata::{MetadataIndex, Metadatum},
    module::Module,
    value::{Value, ValueDatum},
};

#[derive(Default)]
struct MetadataNamer {
    names: BTreeMap<u64, MetadataIndex>,
    ids: BTreeMap<MetadataIndex, u64>,
    next: u64,
}

impl MetadataNamer {
    /// Assign a printable number to `md_idx` and, depth first, to every node
    /// it references, so the definitions printed at the end are
    /// self-contained.
    fn assign(&mut self, context: &Context, md_idx: MetadataIndex) -> u64 {
        if let Some(id) = self.ids.get(&md_idx) {
            return *id;
        }
        if let Metadatum::List(els) = &context.metadata[md_idx.0] {
            for el in els.clone() {
                self.assign(context, el);
            }
        }
        let id = self.next;
        self.next += 1;
        self.ids.insert(md_idx, id);
        self.names.insert(id, md_idx);
        id
    }

    fn to_doc(&self, context: &Context) -> String {
        let mut doc = String::new();
        for (id, md_idx) in &self.names {
            let body = match &context.metadata[md_idx.0] {
                Metadatum::Integer(n) => n.to_string(),
                Metadatum::List(els) => format!(
                    "({})",
                    els.iter().map(|el| format!("!{}", self.ids[el])).join(" ")
                ),
            };
            let _ = writeln!(doc, "!{id} = {body}");
        }
        doc
    }
}

#[derive(Default)]
struct ValueNamer {
    names: BTreeMap<Value, String>,
    next: u64,
}

impl ValueNamer {
    fn name(&mut self, value: Value) -> String {
        if let Some(name) = self.names.get(&value) {
            return name.clone();
        }
        let name = format!("v{}", self.next);
        self.next += 1;
        self.names.insert(value, name.clone());
        name
    }
}

/// Print the whole context.
pub fn to_string(context: &Context) -> String {
    let mut md_namer = MetadataNamer::default();
    let mut doc = String::new();
    for module in context.module_iter() {
        doc.push_str(&module_to_string(context, module, &mut md_namer));
    }
    let md_doc = md_namer.to_doc(context);
    if !md_doc.is_empty() {
        doc.push('\n');
        doc.push_str(&md_doc);
    }
    doc
}

fn module_to_string(context: &Context, module: Module, md_namer: &mut MetadataNamer) -> String {
    let mut doc = String::new();
    doc.push_str("module {\n");
    for (name, gvar_val) in module.globals_iter(context) {
        let gvar = gvar_val.get_global(context).unwrap();
        let prefix = if gvar.is_constant(context) {
            "global const"
        } else {
            "global"
        };
        match gvar.get_initializer(context) {
            Some(init) => {
                let _ = writeln!(doc, "    {prefix} @{name} = {}", constant_to_string(init));
            }
            None => {
                let _ = writeln!(
                    doc,
                    "    {prefix} @{name}: {}",
                    gvar.get_type(context).as_string()
                );
            }
        }
    }
    for function in module.function_iter(context) {
        if function.is_declaration(context) {
            doc.push_str(&decl_to_string(context, function));
        } else {
            doc.push_str(&function_to_string(context, function, md_namer));
        }
    }
    doc.push_str("}\n");
    doc
}

fn decl_to_string(context: &Context, function: Function) -> String {
    let mut params = function
        .args_iter(context)
        .map(|(_, arg_val)| {
            arg_val
                .get_argument(context)
                .map(|arg| arg.ty.as_string())
                .unwrap_or_else(|| "()".to_owned())
        })
        .collect::<Vec<_>>();
    if function.is_variadic(context) {
        params.push("...".to_owned());
    }
    format!(
        "    decl fn {}({}) -> {}\n",
        function.get_name(context),
        params.join(", "),
        function.get_return_type(context).as_string()
    )
}

fn function_to_string(
    context: &Context,
    function: Function,
    md_namer: &mut MetadataNamer,
) -> String {
    let mut namer = ValueNamer::default();
    // Arguments keep their declared names.
    for (name, arg_val) in function.args_iter(context) {
        namer.names.insert(*arg_val, name.clone());
    }

    let mut doc = String::new();
    let args = function
        .args_iter(context)
        .map(|(name, arg_val)| {
            let ty = arg_val
                .get_argument(context)
                .map(|arg| arg.ty.as_string())
                .unwrap_or_else(|| "()".to_owned());
            format!("{name}: {ty}")
        })
        .join(", ");
    let _ = writeln!(
        doc,
        "    fn {}({}) -> {} {{",
        function.get_name(context),
        args,
        function.get_return_type(context).as_string()
    );
    let mut first = true;
    for block in function.block_iter(context) {
        if !first {
            doc.push('\n');
        }
        first = false;
        doc.push_str(&block_to_string(context, block, &mut namer, md_namer));
    }
    doc.push_str("    }\n");
    doc
}

fn block_to_string(
    context: &Context,
    block: Block,
    namer: &mut ValueNamer,
    md_namer: &mut MetadataNamer,
) -> String {
    let mut doc = String::new();
    let _ = writeln!(doc, "        {}():", block.get_label(context));
    for ins_val in block.instruction_iter(context) {
        let body = match &context.values[ins_val.0].value {
            ValueDatum::Instruction(ins) => instruction_to_string(context, ins_val, &ins.op, namer),
            ValueDatum::Constant(Constant {
                value: ConstantValue::Gep { base },
                ..
            }) => {
                let base = operand_str(context, namer, *base);
                format!("{} = const_gep {base}", namer.name(ins_val))
            }
            ValueDatum::Constant(constant) => {
                format!("{} = {}", namer.name(ins_val), constant_to_string(constant))
            }
            _otherwise => continue,
        };
        let mut suffix = String::new();
        if let Some(loc) = ins_val.get_debug_loc(context) {
            let _ = write!(suffix, ", !loc({:?}, {}, {})", &*loc.file, loc.line, loc.col);
        }
        for (key, md_idx) in ins_val.metadata(context) {
            let id = md_namer.assign(context, *md_idx);
            let _ = write!(suffix, ", {key} !{id}");
        }
        let _ = writeln!(doc, "        {body}{suffix}");
    }
    doc
}

fn constant_to_string(constant: &Constant) -> String {
    match &constant.value {
        ConstantValue::Undef => format!("const {} undef", constant.ty.as_string()),
        ConstantValue::Unit => "const ()".to_owned(),
        ConstantValue::Bool(b) => format!("const bool {b}"),
        ConstantValue::Uint(n) => format!("const {} {n}", constant.ty.as_string()),
        ConstantValue::String(s) => format!("const string {s:?}"),
        ConstantValue::Gep { .. } => "const_gep".to_owned(),
    }
}

fn predicate_str(pred: Predicate) -> &'static str {
    match pred {
        Predicate::Equal => "eq",
        Predicate::NotEqual => "ne",
        Predicate::LessThan => "lt",
        Predicate::GreaterThan => "gt",
    }
}

fn binary_op_str(op: BinaryOpKind) -> &'static str {
    match op {
        BinaryOpKind::Add => "add",
        BinaryOpKind::Sub => "sub",
        BinaryOpKind::Mul => "mul",
        BinaryOpKind::Div => "div",
    }
}

fn operand_str(context: &Context, namer: &mut ValueNamer, value: Value) -> String {
    match &context.values[value.0].value {
        ValueDatum::Global(gvar) => format!("@{}", gvar.get_name(context)),
        ValueDatum::Constant(Constant {
            value: ConstantValue::Gep { base },
            ..
        }) if namer.names.get(&value).is_none() => {
            format!("const_gep {}", operand_str(context, namer, *base))
        }
        _otherwise => namer.name(value),
    }
}

fn instruction_to_string(
    context: &Context,
    ins_val: Value,
    op: &InstOp,
    namer: &mut ValueNamer,
) -> String {
    let mut opd = |value: &Value| operand_str(context, namer, *value);
    match op {
        InstOp::BinaryOp { op, arg1, arg2 } => {
            let (arg1, arg2) = (opd(arg1), opd(arg2));
            format!(
                "{} = {} {arg1}, {arg2}",
                namer.name(ins_val),
                binary_op_str(*op)
            )
        }
        InstOp::Branch(block) => format!("br {}", block.get_label(context)),
        InstOp::Call(callee, args) => {
            let args = args.iter().map(&mut opd).join(", ");
            format!(
                "{} = call {}({args})",
                namer.name(ins_val),
                callee.get_name(context)
            )
        }
        InstOp::Cmp(pred, lhs, rhs) => {
            let (lhs, rhs) = (opd(lhs), opd(rhs));
            format!(
                "{} = cmp {} {lhs}, {rhs}",
                namer.name(ins_val),
                predicate_str(*pred)
            )
        }
        InstOp::ConditionalBranch {
            cond_value,
            true_block,
            false_block,
        } => {
            let cond = opd(cond_value);
            format!(
                "cbr {cond}, {}, {}",
                true_block.get_label(context),
                false_block.get_label(context)
            )
        }
        InstOp::GetElemPtr { base, indices } => {
            let base = opd(base);
            let indices = indices.iter().map(&mut opd).join(", ");
            format!("{} = gep {base} [{indices}]", namer.name(ins_val))
        }
        InstOp::Load(ptr) => {
            let ptr = opd(ptr);
            format!("{} = load {ptr}", namer.name(ins_val))
        }
        InstOp::Nop => "nop".to_owned(),
        InstOp::Phi(pairs) => {
            let pairs = pairs
                .iter()
                .map(|(block, value)| format!("{}: {}", block.get_label(context), opd(value)))
                .join(", ");
            format!("{} = phi({pairs})", namer.name(ins_val))
        }
        InstOp::Ret(None) => "ret ()".to_owned(),
        InstOp::Ret(Some(value)) => {
            let ret_ty = ins_val
                .get_instruction(context)
                .map(|ins| ins.parent.get_function(context).get_return_type(context))
                .unwrap_or(crate::irtype::Type::Unit);
            format!("ret {} {}", ret_ty.as_string(), opd(value))
        }
        InstOp::Store {
            dst_val,
            stored_val,
        } => {
            let (stored, dst) = (opd(stored_val), opd(dst_val));
            format!("store {stored} to {dst}")
        }
        InstOp::Switch {
            value,
            default_block,
            cases,
        } => {
            let value = opd(value);
            let cases = cases
                .iter()
                .map(|(n, block)| format!("{n}: {}", block.get_label(context)))
                .join(", ");
            format!(
                "switch {value}, default {}, [{cases}]",
                default_block.get_label(context)
            )
        }
    }
}

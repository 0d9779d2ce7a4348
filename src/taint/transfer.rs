//! The per-instruction taint transfer function.
//!
//! Comparisons do not propagate taint.  Calls are the interesting case:
//! external callees are modeled from the specification tables (sink
//! recording, source injection, copier summaries), defined callees plug in
//! their current summary.  Stores copy the stored value's taint to the
//! pointer; phis register aliases; everything else unions its operands'
//! taint into the instruction.

use crate::{
    constant::{Constant, ConstantValue},
    context::Context,
    function::Function,
    instruction::InstOp,
    taint::{
        driver::TaintAnalysis,
        map::{pass_through_gep, AliasedTaintMap},
        token::{Category, TaintToken, RETVAL_INDEX},
    },
    value::Value,
    FxIndexSet,
};

/// Best-effort classifier for literal strings worth tracking as filename
/// resources: 4 to 99 characters, all printable ASCII, no spaces.
pub fn looks_like_filename(s: &str) -> bool {
    (4..100).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_graphic())
}

/// If `val` is a constant GEP over a global with a string initializer,
/// return the string.
pub fn constant_gep_string<'a>(context: &'a Context, val: Value) -> Option<&'a str> {
    match val.get_constant(context) {
        Some(Constant {
            value: ConstantValue::Gep { base },
            ..
        }) => base
            .get_global(context)
            .and_then(|gvar| gvar.get_string_initializer(context)),
        _otherwise => None,
    }
}

impl TaintAnalysis {
    pub(in crate::taint) fn analyze_instruction(
        &mut self,
        context: &Context,
        caller: Function,
        ins_val: Value,
        taint: &mut AliasedTaintMap,
        gvar_set: &mut FxIndexSet<Value>,
    ) {
        let Some(ins) = ins_val.get_instruction(context) else {
            // Named constants ride along in instruction lists; nothing to do.
            return;
        };
        match &ins.op {
            // Comparison results do not carry their operands' data.
            InstOp::Cmp(..) => {}
            InstOp::Call(callee, args) => {
                self.analyze_call(context, caller, ins_val, *callee, args, taint, gvar_set);
            }
            InstOp::Store {
                dst_val,
                stored_val,
            } => {
                let stored_taint = taint.get_taint(context, *stored_val);
                taint.add_taint_set(context, *dst_val, &stored_taint);
            }
            InstOp::Phi(incoming) => {
                for (_, in_val) in incoming {
                    taint.add_alias(context, ins_val, *in_val);
                }
                for operand in ins.op.get_operands() {
                    let operand_taint = taint.get_taint(context, operand);
                    taint.add_taint_set(context, ins_val, &operand_taint);
                }
            }
            _otherwise => {
                for operand in ins.op.get_operands() {
                    let operand_taint = taint.get_taint(context, operand);
                    taint.add_taint_set(context, ins_val, &operand_taint);
                }
            }
        }
    }

    /// Register that `caller` communicates with the non-constant global
    /// behind `arg`, if there is one.
    fn note_global_reference(
        &mut self,
        context: &Context,
        caller: Function,
        arg: Value,
        gvar_set: &mut FxIndexSet<Value>,
    ) {
        let base = pass_through_gep(context, arg);
        if let Some(gvar) = base.get_global(context) {
            if !gvar.is_constant(context) {
                self.fns_referencing_gvar
                    .entry(base)
                    .or_default()
                    .insert(caller);
                gvar_set.insert(base);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn analyze_call(
        &mut self,
        context: &Context,
        caller: Function,
        call_site: Value,
        callee: Function,
        args: &[Value],
        taint: &mut AliasedTaintMap,
        gvar_set: &mut FxIndexSet<Value>,
    ) {
        // Literal strings that look like filenames are taint sources in
        // their own right.
        for arg in args {
            if let Some(str_const) = constant_gep_string(context, *arg) {
                if looks_like_filename(str_const) {
                    taint.add_taint(context, *arg, TaintToken::aux_constant(*arg));
                }
            }
        }

        if !callee.is_declaration(context) {
            self.plug_in_summary(context, call_site, callee, caller, args, taint);
            return;
        }

        // A function with only a declaration is an external routine; model
        // it from the specification tables.
        if self.spec.copiers.contains(&callee) {
            self.plug_in_summary(context, call_site, callee, caller, args, taint);
        }

        let sink_cats = self
            .spec
            .arg_sink_cats
            .get(&callee)
            .cloned()
            .unwrap_or_default();
        for (ix_arg, arg) in args.iter().enumerate() {
            if sink_cats.is_empty() {
                break;
            }
            // Variadic extras extend the last declared category.
            let cat = sink_cats[ix_arg.min(sink_cats.len() - 1)];
            if cat == Category::Null {
                continue;
            }
            let sink = TaintToken::concrete(callee, ix_arg as i32, call_site, cat);
            let arg_taint = taint.get_taint(context, *arg);
            self.flows.entry(caller).or_default().insert(sink, arg_taint);
            self.note_global_reference(context, caller, *arg, gvar_set);
        }

        if callee.get_name(context).starts_with("llvm.") {
            // Intrinsics without explicit models are silently ignored.
        } else if !self.spec.known_external.contains(&callee) {
            self.unknown_externals.insert(callee);
        }

        let src_cats = self
            .spec
            .arg_src_cats
            .get(&callee)
            .cloned()
            .unwrap_or_default();
        let ret_cat = self
            .spec
            .ret_cat
            .get(&callee)
            .copied()
            .unwrap_or(Category::Null);
        if ret_cat != Category::Null {
            let src = TaintToken::concrete(callee, RETVAL_INDEX, call_site, ret_cat);
            taint.add_taint(context, call_site, src);
        }
        for (ix_arg, cat) in src_cats.iter().enumerate() {
            if *cat == Category::Null {
                continue;
            }
            let Some(arg) = args.get(ix_arg) else {
                continue;
            };
            let src = TaintToken::concrete(callee, ix_arg as i32, call_site, *cat);
            if taint.add_taint(context, *arg, src) {
                self.note_global_reference(context, caller, *arg, gvar_set);
            }
        }
    }
}

//! The interprocedural fixpoint driver.
//!
//! Functions are analyzed to a local fixpoint one at a time, leaves-first
//! where the call graph allows it.  A function whose summary grew re-enqueues
//! its callers, plus every function known to reference a global variable
//! whose taint was touched during the run.  A barrier sentinel in the
//! worklist demarcates fixpoint rounds for progress reporting.  Convergence
//! follows from monotonicity: summaries and the global table only grow, and
//! the total number of taint facts is finite.

use std::collections::{BTreeMap, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    context::Context,
    error::IrError,
    function::Function,
    instruction::InstOp,
    module::Module,
    taint::{
        map::{AliasedTaintMap, GlobalTaintMap},
        spec::{TaintConfig, TaintSpec},
        token::{TaintToken, TokenInterner, TokenSet, RETVAL_INDEX},
    },
    value::Value,
    FxIndexMap, FxIndexSet,
};

/// A function summary: for each sink, the set of sources that may flow into
/// it.  A summary sink with `arg_index = i` means "whatever flows into
/// parameter `i`"; `arg_index = -1` means "whatever flows out via return".
/// Concrete call-site sinks inside the function are keyed by their full
/// identity.
pub type SummaryMap = BTreeMap<TaintToken, TokenSet>;

#[derive(Default)]
struct WorkList {
    queue: VecDeque<Option<Function>>,
    members: FxHashSet<Option<Function>>,
}

impl WorkList {
    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn contains(&self, item: &Option<Function>) -> bool {
        self.members.contains(item)
    }

    fn add(&mut self, item: Option<Function>) {
        if self.members.insert(item) {
            self.queue.push_back(item);
        }
    }

    fn pop(&mut self) -> Option<Option<Function>> {
        let item = self.queue.pop_front()?;
        self.members.remove(&item);
        Some(item)
    }
}

/// One interprocedural taint analysis over a module.
///
/// All shared mutable state of the analysis (the flow table, the global
/// taint table, the token intern table) is scoped to this value and
/// discarded with it.
pub struct TaintAnalysis {
    pub spec: TaintSpec,
    /// Per-function summaries and concrete flows.
    pub flows: FxHashMap<Function, SummaryMap>,
    /// The process-wide global-variable side channel.
    pub global_taint: GlobalTaintMap,
    /// Intern table backing `TaintToken::wrapped` references.
    pub interner: TokenInterner,
    /// External calls with no model, collected for the report.
    pub unknown_externals: FxIndexSet<Function>,

    pub(in crate::taint) callers_of: FxHashMap<Function, FxIndexSet<Function>>,
    pub(in crate::taint) fns_referencing_gvar: FxHashMap<Value, FxIndexSet<Function>>,
    worklist: WorkList,
}

impl TaintAnalysis {
    /// Build an analysis around a loaded specification.  Copier summaries
    /// are installed into the flow table here and never overwritten
    /// (declarations are not analyzed).
    pub fn new(spec: TaintSpec) -> TaintAnalysis {
        let mut flows = FxHashMap::<Function, SummaryMap>::default();
        for (func, summary) in &spec.copier_summaries {
            flows.insert(*func, summary.clone());
        }
        TaintAnalysis {
            spec,
            flows,
            global_taint: GlobalTaintMap::default(),
            interner: TokenInterner::default(),
            unknown_externals: FxIndexSet::default(),
            callers_of: FxHashMap::default(),
            fns_referencing_gvar: FxHashMap::default(),
            worklist: WorkList::default(),
        }
    }

    /// Run the fixpoint over every defined function in `module`.
    pub fn run(&mut self, context: &Context, module: Module) {
        self.build_call_graph(context, module);

        // The barrier sentinel demarcates fixpoint rounds.
        self.worklist.add(None);
        self.prioritize_leaves_first(context, module);

        let mut round = 1u32;
        while let Some(item) = self.worklist.pop() {
            match item {
                None => {
                    if !self.worklist.is_empty() {
                        self.worklist.add(None);
                    }
                    tracing::debug!(
                        "Round {round} ({} functions in worklist)",
                        self.worklist.len()
                    );
                    round += 1;
                }
                Some(func) => self.analyze_function(context, func),
            }
        }
    }

    fn build_call_graph(&mut self, context: &Context, module: Module) {
        for caller in module.function_iter(context) {
            if caller.is_declaration(context) {
                continue;
            }
            for (_, ins_val) in caller.instruction_iter(context) {
                if let Some(InstOp::Call(callee, _)) =
                    ins_val.get_instruction(context).map(|ins| &ins.op)
                {
                    self.callers_of.entry(*callee).or_default().insert(caller);
                }
            }
        }
    }

    /// Schedule functions with no unresolved (defined) callees first,
    /// peeling the call graph from its leaves.  The pass is bounded; call
    /// cycles are left to the outer fixpoint and flushed in declaration
    /// order.
    fn prioritize_leaves_first(&mut self, context: &Context, module: Module) {
        let mut callees_of = FxIndexMap::<Function, FxIndexSet<Function>>::default();
        for func in module.function_iter(context) {
            if !func.is_declaration(context) {
                callees_of.entry(func).or_default();
            }
        }
        for (callee, callers) in &self.callers_of {
            if callee.is_declaration(context) {
                continue;
            }
            for caller in callers {
                if caller != callee {
                    callees_of.entry(*caller).or_default().insert(*callee);
                }
            }
        }

        let mut count = 0;
        let mut is_stuck = false;
        while !is_stuck && count < 20 {
            count += 1;
            is_stuck = true;
            let ready: Vec<Function> = callees_of
                .iter()
                .filter(|(func, callees)| {
                    !self.worklist.contains(&Some(**func)) && callees.is_empty()
                })
                .map(|(func, _)| *func)
                .collect();
            for func in ready {
                is_stuck = false;
                self.worklist.add(Some(func));
                if let Some(callers) = self.callers_of.get(&func) {
                    for caller in callers {
                        if let Some(callees) = callees_of.get_mut(caller) {
                            callees.shift_remove(&func);
                        }
                    }
                }
            }
        }

        for func in module.function_iter(context) {
            if !func.is_declaration(context) {
                self.worklist.add(Some(func));
            }
        }
    }

    /// Analyze one function from scratch: seed each parameter with its own
    /// summary token, iterate the transfer function to a local fixpoint,
    /// then aggregate the return-value and parameter ("out" / "in-out")
    /// taints into the summary.
    pub(in crate::taint) fn analyze_function(&mut self, context: &Context, function: Function) {
        let old_summary = self.flows.get(&function).cloned().unwrap_or_default();
        let mut taint = AliasedTaintMap::new(std::mem::take(&mut self.global_taint));
        let mut gvar_set = FxIndexSet::<Value>::default();

        for (ix_arg, (_, arg_val)) in function.args_iter(context).enumerate() {
            taint.add_taint(
                context,
                *arg_val,
                TaintToken::summary(function, ix_arg as i32),
            );
        }

        loop {
            let size_at_start = taint.size();
            for block in function.block_iter(context) {
                for ins_val in block.instruction_iter(context) {
                    self.analyze_instruction(context, function, ins_val, &mut taint, &mut gvar_set);
                }
            }
            if taint.size() == size_at_start {
                break;
            }
        }

        // Taint flowing out via `return`.
        let mut ret_taint = TokenSet::new();
        for (_, ins_val) in function.instruction_iter(context) {
            if let Some(InstOp::Ret(Some(ret_val))) =
                ins_val.get_instruction(context).map(|ins| &ins.op)
            {
                ret_taint.extend(taint.get_taint(context, *ret_val));
            }
        }

        // Taint of "OUT"/"INOUT" arguments.
        let arg_taints: Vec<(TaintToken, TokenSet)> = function
            .args_iter(context)
            .enumerate()
            .map(|(ix_arg, (_, arg_val))| {
                (
                    TaintToken::summary(function, ix_arg as i32),
                    taint.get_taint(context, *arg_val),
                )
            })
            .collect();

        let summary = self.flows.entry(function).or_default();
        summary.insert(TaintToken::summary(function, RETVAL_INDEX), ret_taint);
        for (arg_sink, arg_taint) in arg_taints {
            summary.insert(arg_sink, arg_taint);
        }

        self.global_taint = taint.into_global_taint();

        if self.flows[&function] != old_summary {
            let callers = self
                .callers_of
                .get(&function)
                .cloned()
                .unwrap_or_default();
            for caller in &callers {
                self.worklist.add(Some(*caller));
            }
            // Schedule every function observing a touched global, minus the
            // callers just scheduled and the function itself.
            for gvar in &gvar_set {
                if let Some(fns) = self.fns_referencing_gvar.get(gvar) {
                    for func in fns {
                        if !callers.contains(func) && *func != function {
                            self.worklist.add(Some(*func));
                        }
                    }
                }
            }
        }
    }

    /// Plug a callee's summary in at a call site.
    ///
    /// Summary sinks target the call's return value or actual arguments in
    /// the caller's taint map.  Concrete sinks of the callee reappear in the
    /// caller's flow table; when the callee is a wrapper they are re-wrapped
    /// so the caller sees "sink at wrapper, which is really system API X"
    /// without losing the inner identity.  The wrapper argument index is the
    /// placeholder 0.
    pub(in crate::taint) fn plug_in_summary(
        &mut self,
        context: &Context,
        call_site: Value,
        callee: Function,
        caller: Function,
        args: &[Value],
        taint: &mut AliasedTaintMap,
    ) {
        enum Dest {
            Val(Value),
            Flow(TaintToken),
        }

        let Some(callee_summary) = self.flows.get(&callee).cloned() else {
            return;
        };
        let callee_is_wrapper = self.spec.wrappers.contains(&callee);

        for (sum_sink, sum_sources) in &callee_summary {
            let dest = if sum_sink.call_site.is_none() {
                let val_to_taint = if sum_sink.arg_index == RETVAL_INDEX {
                    call_site
                } else {
                    match args.get(sum_sink.arg_index as usize) {
                        Some(arg) => *arg,
                        None => {
                            tracing::warn!(
                                "summary of {} names argument {} missing at call site",
                                callee.get_name(context),
                                sum_sink.arg_index
                            );
                            continue;
                        }
                    }
                };
                Dest::Val(val_to_taint)
            } else if callee_is_wrapper {
                let inner = self.interner.intern(*sum_sink);
                Dest::Flow(TaintToken {
                    func: Some(callee),
                    arg_index: 0,
                    call_site: Some(call_site),
                    category: sum_sink.category,
                    wrapped: Some(inner),
                    constant: None,
                })
            } else {
                Dest::Flow(*sum_sink)
            };

            for sum_src in sum_sources {
                if !sum_src.is_summary() {
                    if sum_sink.call_site.is_some() {
                        // No need to propagate fully concrete flows upwards;
                        // they are already recorded where the sink lives.
                        continue;
                    }
                    let ins_src = if callee_is_wrapper {
                        let inner = self.interner.intern(*sum_src);
                        TaintToken {
                            func: Some(callee),
                            arg_index: 0,
                            call_site: Some(call_site),
                            category: sum_src.category,
                            wrapped: Some(inner),
                            constant: None,
                        }
                    } else {
                        *sum_src
                    };
                    match &dest {
                        Dest::Val(val) => {
                            taint.add_taint(context, *val, ins_src);
                        }
                        Dest::Flow(sink) => {
                            self.flows
                                .entry(caller)
                                .or_default()
                                .entry(*sink)
                                .or_default()
                                .insert(ins_src);
                        }
                    }
                } else {
                    // A summary source names one of the callee's own
                    // parameters; anything else, including a return-value
                    // placeholder, has no actual to resolve and is dropped.
                    if sum_src.func != Some(callee) || sum_src.arg_index == RETVAL_INDEX {
                        continue;
                    }
                    let Some(act_arg) = args.get(sum_src.arg_index as usize) else {
                        continue;
                    };
                    let src_taint = taint.get_taint(context, *act_arg);
                    match &dest {
                        Dest::Val(val) => {
                            taint.add_taint_set(context, *val, &src_taint);
                        }
                        Dest::Flow(sink) => {
                            self.flows
                                .entry(caller)
                                .or_default()
                                .entry(*sink)
                                .or_default()
                                .extend(src_taint);
                        }
                    }
                }
            }
        }
    }
}

/// Load the specification named by `config` and run the analysis over
/// `module`.
pub fn run_taint_analysis(
    context: &Context,
    module: Module,
    config: &TaintConfig,
) -> Result<TaintAnalysis, IrError> {
    let spec = TaintSpec::load(context, module, config)?;
    let mut analysis = TaintAnalysis::new(spec);
    analysis.run(context, module);
    Ok(analysis)
}

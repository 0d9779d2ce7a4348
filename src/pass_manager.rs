//! Named passes over the IR and the machinery to run them.
//!
//! Every pass in this crate works one function at a time.  An analysis pass
//! computes a result (a dominator tree, say) which later passes retrieve by
//! type; a transform pass may rewrite the function and reports whether it
//! did.  A pass names the analyses it needs and the [`PassManager`] computes
//! missing ones on demand, discarding cached results for a function whenever
//! a transform changes it.

use std::any::TypeId;

use downcast_rs::{impl_downcast, Downcast};
use rustc_hash::FxHashMap;

use crate::{
    analysis::{create_dominators_pass, create_postdominators_pass, create_postorder_pass},
    condmerge::{create_condmerge_pass, create_print_merge_edges_pass},
    context::Context,
    error::IrError,
    function::Function,
};

/// Marker trait for analysis results, so they can be stored behind one box
/// and recovered by concrete type.
pub trait AnalysisResultT: Downcast {}
impl_downcast!(AnalysisResultT);
pub type AnalysisResult = Box<dyn AnalysisResultT>;

/// What a pass does when run on a function.
#[derive(Clone, Copy)]
pub enum PassKind {
    /// Computes a result for later passes to query; never touches the IR.
    Analysis(fn(&Context, &AnalysisResults, Function) -> Result<AnalysisResult, IrError>),
    /// May rewrite the function; reports whether anything changed.
    Transform(fn(&mut Context, &AnalysisResults, Function) -> Result<bool, IrError>),
}

/// A named pass over a single function.
pub struct Pass {
    pub name: &'static str,
    pub descr: &'static str,
    /// Analyses that must be available before the runner is called.
    pub deps: Vec<&'static str>,
    pub kind: PassKind,
}

impl Pass {
    pub fn is_analysis(&self) -> bool {
        matches!(self.kind, PassKind::Analysis(_))
    }
}

/// Analysis results cached per function, keyed by the concrete result type.
#[derive(Default)]
pub struct AnalysisResults {
    cache: FxHashMap<(TypeId, slotmap::DefaultKey), AnalysisResult>,
    result_type_of: FxHashMap<&'static str, TypeId>,
}

impl AnalysisResults {
    /// Fetch the result an analysis pass computed earlier for `function`,
    /// e.g. `analyses.get_analysis_result::<DomTree>(function)`.
    ///
    /// Panics if the analysis was never run for this function; the manager
    /// guarantees declared dependencies are in place before a pass runs.
    pub fn get_analysis_result<T: AnalysisResultT>(&self, function: Function) -> &T {
        self.cache
            .get(&(TypeId::of::<T>(), function.0))
            .and_then(|result| result.downcast_ref())
            .unwrap_or_else(|| {
                panic!(
                    "no {} result cached for this function",
                    std::any::type_name::<T>()
                )
            })
    }

    fn contains(&self, pass_name: &str, function: Function) -> bool {
        self.result_type_of
            .get(pass_name)
            .is_some_and(|type_id| self.cache.contains_key(&(*type_id, function.0)))
    }

    fn store(&mut self, pass_name: &'static str, function: Function, result: AnalysisResult) {
        let type_id = result.as_any().type_id();
        self.result_type_of.insert(pass_name, type_id);
        self.cache.insert((type_id, function.0), result);
    }

    fn forget_function(&mut self, function: Function) {
        self.cache.retain(|(_, key), _| *key != function.0);
    }
}

/// An ordered list of pass names to run.
#[derive(Default)]
pub struct PassGroup(Vec<&'static str>);

impl PassGroup {
    pub fn append_pass(&mut self, name: &'static str) {
        self.0.push(name);
    }

    fn pass_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().copied()
    }
}

#[derive(Default)]
pub struct PassManager {
    passes: FxHashMap<&'static str, Pass>,
    analyses: AnalysisResults,
}

impl PassManager {
    /// Register a pass under its name, once.  Its dependencies must already
    /// be registered, and must be analyses.
    pub fn register(&mut self, pass: Pass) -> &'static str {
        for dep in &pass.deps {
            match self.passes.get(dep) {
                None => panic!("pass {} depends on unregistered pass {dep}", pass.name),
                Some(dep_pass) if !dep_pass.is_analysis() => {
                    panic!("pass {} depends on transform pass {dep}", pass.name)
                }
                Some(_) => (),
            }
        }
        let name = pass.name;
        if self.passes.insert(name, pass).is_some() {
            panic!("pass {name} registered twice");
        }
        name
    }

    /// Run each pass of `group` in order over every defined function of
    /// every module.  Returns whether any transform modified the IR.
    pub fn run(&mut self, ir: &mut Context, group: &PassGroup) -> Result<bool, IrError> {
        let mut modified = false;
        for name in group.pass_names() {
            for module in ir.module_iter() {
                for function in module.function_iter(ir) {
                    if function.is_declaration(ir) {
                        continue;
                    }
                    modified |= self.run_on_function(ir, name, function)?;
                }
            }
        }
        Ok(modified)
    }

    fn run_on_function(
        &mut self,
        ir: &mut Context,
        name: &'static str,
        function: Function,
    ) -> Result<bool, IrError> {
        // Bring the declared dependencies into the cache first.
        let deps = self
            .passes
            .get(name)
            .unwrap_or_else(|| panic!("pass {name} is not registered"))
            .deps
            .clone();
        for dep in deps {
            if !self.analyses.contains(dep, function) {
                self.run_on_function(ir, dep, function)?;
            }
        }

        let pass = &self.passes[name];
        match pass.kind {
            PassKind::Analysis(runner) => {
                let result = runner(ir, &self.analyses, function)?;
                self.analyses.store(name, function, result);
                Ok(false)
            }
            PassKind::Transform(runner) => {
                let changed = runner(ir, &self.analyses, function)?;
                if changed {
                    // Whatever was cached may describe a CFG that no longer
                    // exists.
                    self.analyses.forget_function(function);
                }
                Ok(changed)
            }
        }
    }

    /// Get a reference to a registered pass.
    pub fn lookup_registered_pass(&self, name: &str) -> Option<&Pass> {
        self.passes.get(name)
    }

    /// A listing of every registered pass, for command-line help.
    pub fn help_text(&self) -> String {
        let mut lines: Vec<String> = self
            .passes
            .values()
            .map(|pass| format!("  {:18} {}", pass.name, pass.descr))
            .collect();
        lines.sort();
        format!("Known passes:\n{}", lines.join("\n"))
    }
}

/// A convenience utility to register known passes.
pub fn register_known_passes(pm: &mut PassManager) {
    // Analysis passes.
    pm.register(create_postorder_pass());
    pm.register(create_dominators_pass());
    pm.register(create_postdominators_pass());
    // Annotation and reporting passes.
    pm.register(create_condmerge_pass());
    pm.register(create_print_merge_edges_pass());
}

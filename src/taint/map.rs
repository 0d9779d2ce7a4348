//! The per-function abstract taint state.
//!
//! Two sub-maps: a per-function base map from values to token sets, and the
//! process-wide global-variable table threaded through every function
//! analysis.  A simple alias abstraction handles phi nodes: every value
//! except a phi is a base location; a phi may stand for any of its incoming
//! base locations.  GEPs (instructions or constant expressions) are routed
//! to their pointer base before any lookup or insertion, keeping the
//! analysis field-insensitive.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::{
    constant::{Constant, ConstantValue},
    context::Context,
    instruction::{InstOp, Instruction},
    taint::token::{TaintToken, TokenSet, RETVAL_INDEX},
    value::{Value, ValueDatum},
    FxIndexSet,
};

/// The process-wide global-variable taint table, keyed by the canonical
/// global value.
pub type GlobalTaintMap = BTreeMap<Value, TokenSet>;

/// Route a GEP (instruction or constant expression) to its ultimate pointer
/// base.  Any other value is returned unchanged.
pub fn pass_through_gep(context: &Context, val: Value) -> Value {
    let mut val = val;
    loop {
        let base = match &context.values[val.0].value {
            ValueDatum::Instruction(Instruction {
                op: InstOp::GetElemPtr { base, .. },
                ..
            }) => *base,
            ValueDatum::Constant(Constant {
                value: ConstantValue::Gep { base },
                ..
            }) => *base,
            _otherwise => return val,
        };
        val = base;
    }
}

pub struct AliasedTaintMap {
    base_taint: FxHashMap<Value, TokenSet>,
    aliases_of: FxHashMap<Value, FxIndexSet<Value>>,
    global_taint: GlobalTaintMap,
}

impl AliasedTaintMap {
    /// Build a fresh per-function map around the shared global table.
    pub fn new(global_taint: GlobalTaintMap) -> AliasedTaintMap {
        AliasedTaintMap {
            base_taint: FxHashMap::default(),
            aliases_of: FxHashMap::default(),
            global_taint,
        }
    }

    /// Hand the shared global table back at the end of a function analysis.
    pub fn into_global_taint(self) -> GlobalTaintMap {
        self.global_taint
    }

    fn is_global(context: &Context, loc: Value) -> bool {
        matches!(context.values[loc.0].value, ValueDatum::Global(_))
    }

    fn insert(&mut self, into_globals: bool, loc: Value, token: TaintToken) {
        let targets: Vec<Value> = match self.aliases_of.get(&loc) {
            Some(aliases) => aliases.iter().copied().collect(),
            None => vec![loc],
        };
        for target in targets {
            if into_globals {
                self.global_taint.entry(target).or_default().insert(token);
            } else {
                self.base_taint.entry(target).or_default().insert(token);
            }
        }
    }

    /// Associate `loc` with the taint source `token`.
    ///
    /// Taint destined for a global variable (other than return-value tokens)
    /// is routed to the process-wide table: summary placeholders are dropped
    /// there (they are function-relative), and the return value reports
    /// whether a real source reached a global, i.e. whether cross-function
    /// re-analysis should be scheduled.
    pub fn add_taint(&mut self, context: &Context, loc: Value, token: TaintToken) -> bool {
        let loc = pass_through_gep(context, loc);
        let is_global = Self::is_global(context, loc);
        if is_global && token.arg_index != RETVAL_INDEX {
            if token.is_summary() {
                return false;
            }
            self.insert(true, loc, token);
            return token.call_site.is_some();
        }
        self.insert(false, loc, token);
        is_global
    }

    /// Fold [`AliasedTaintMap::add_taint`] over a set.
    pub fn add_taint_set(&mut self, context: &Context, loc: Value, tokens: &TokenSet) -> bool {
        let loc = pass_through_gep(context, loc);
        let mut added_to_global_set = false;
        for token in tokens {
            if self.add_taint(context, loc, *token) {
                added_to_global_set = true;
            }
        }
        added_to_global_set
    }

    /// Return the set of sources that have tainted `loc`, unioned across its
    /// alias bases.
    pub fn get_taint(&self, context: &Context, loc: Value) -> TokenSet {
        let loc = pass_through_gep(context, loc);
        let read = |l: &Value| -> Option<&TokenSet> {
            if Self::is_global(context, *l) {
                self.global_taint.get(l)
            } else {
                self.base_taint.get(l)
            }
        };
        match self.aliases_of.get(&loc) {
            None => read(&loc).cloned().unwrap_or_default(),
            Some(aliases) => {
                let mut ret = TokenSet::new();
                for base_loc in aliases {
                    if let Some(tokens) = read(base_loc) {
                        ret.extend(tokens.iter().copied());
                    }
                }
                ret
            }
        }
    }

    /// Record that `alias` may stand for the base location `base_loc`.
    ///
    /// Applied to every incoming operand of a phi.  Aliases are not
    /// transitive; a phi-of-phi chain is resolved by union at lookup.
    pub fn add_alias(&mut self, context: &Context, alias: Value, base_loc: Value) {
        let alias = pass_through_gep(context, alias);
        let base_loc = pass_through_gep(context, base_loc);
        self.aliases_of.entry(alias).or_default().insert(base_loc);
    }

    /// A weakly-monotone size metric over the whole state, used to detect
    /// whether an iteration added any facts.
    pub fn size(&self) -> usize {
        let mut ret = 0;
        for src_set in self.base_taint.values() {
            ret += src_set.len();
        }
        for base_locs in self.aliases_of.values() {
            ret += base_locs.len();
        }
        for src_set in self.global_taint.values() {
            ret += src_set.len();
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{module::Module, parser};

    #[test]
    fn gep_routes_to_base() {
        let context = parser::parse(
            r#"
            module {
                fn f(p: ptr) -> () {
                    entry():
                    v0 = const u64 0
                    v1 = gep p [v0]
                    v2 = gep v1 [v0]
                    ret ()
                }
            }
            "#,
        )
        .unwrap();
        let module: Module = context.module_iter().next().unwrap();
        let func = module.get_function(&context, "f").unwrap();
        let p = func.get_arg(&context, 0).unwrap();
        let entry = func.get_entry_block(&context);
        let ins: Vec<Value> = entry.instruction_iter(&context).collect();
        let (gep1, gep2) = (ins[1], ins[2]);

        // Chained GEPs route to the ultimate base.
        assert_eq!(pass_through_gep(&context, gep1), p);
        assert_eq!(pass_through_gep(&context, gep2), p);

        // Taint added through a GEP is observed through the base, and vice
        // versa.
        let mut map = AliasedTaintMap::new(GlobalTaintMap::default());
        let token = TaintToken::summary(func, 0);
        map.add_taint(&context, gep2, token);
        assert_eq!(map.get_taint(&context, p).len(), 1);
        assert_eq!(map.get_taint(&context, gep1), map.get_taint(&context, p));
    }

    #[test]
    fn phi_aliases_merge_bases() {
        let context = parser::parse(
            r#"
            module {
                fn g(c: bool, p: ptr, q: ptr) -> () {
                    entry():
                    cbr c, lhs, rhs

                    lhs():
                    br exit

                    rhs():
                    br exit

                    exit():
                    v0 = phi(lhs: p, rhs: q)
                    ret ()
                }
            }
            "#,
        )
        .unwrap();
        let module: Module = context.module_iter().next().unwrap();
        let func = module.get_function(&context, "g").unwrap();
        let p = func.get_arg(&context, 1).unwrap();
        let q = func.get_arg(&context, 2).unwrap();
        let exit = func
            .block_iter(&context)
            .find(|b| b.get_label(&context) == "exit")
            .unwrap();
        let phi = exit.instruction_iter(&context).next().unwrap();

        let mut map = AliasedTaintMap::new(GlobalTaintMap::default());
        map.add_alias(&context, phi, p);
        map.add_alias(&context, phi, q);

        // Writing through the phi taints both bases.
        let token = TaintToken::summary(func, 1);
        map.add_taint(&context, phi, token);
        assert_eq!(map.get_taint(&context, p).len(), 1);
        assert_eq!(map.get_taint(&context, q).len(), 1);

        // Reading through the phi unions the bases.
        let other = TaintToken::summary(func, 2);
        map.add_taint(&context, q, other);
        assert_eq!(map.get_taint(&context, phi).len(), 2);
    }
}

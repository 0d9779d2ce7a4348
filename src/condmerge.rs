//! Conditional-path / merge-edge annotation.
//!
//! For every terminator with more than one successor the `condmerge` pass
//! explores control flow forward from each conditional choice edge and
//! classifies the edges it meets: an edge is a *merge edge* when it leads
//! back to the branching instruction itself, to a block whose terminator
//! pre-dominates the branch's block, or to a block whose terminator
//! post-dominates the branch.  Any of the three means the conditional region
//! has been exited.  Blocks met before a merge edge lie on the conditional
//! path of that choice edge.
//!
//! Results are persisted as IR metadata: `JumpID` (a module-unique integer
//! per multi-successor terminator, monotone from 1), `MergeEdges` (one edge
//! list per successor) and `CondPaths` (on the terminator of each
//! conditional-path block, the choice edges it lies under).  An edge is
//! encoded as the integer pair `(jump_id, successor_index)`.

use std::collections::VecDeque;
use std::fmt::Write;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    analysis::{DomTree, PostDomTree, DOMINATORS_NAME, POSTDOMINATORS_NAME},
    block::Block,
    context::Context,
    error::IrError,
    function::Function,
    metadata::{DebugLoc, MetadataIndex},
    pass_manager::{AnalysisResults, Pass, PassKind},
    value::Value,
    FxIndexMap,
};

pub const JUMP_ID_KEY: &str = "JumpID";
pub const MERGE_EDGES_KEY: &str = "MergeEdges";
pub const COND_PATHS_KEY: &str = "CondPaths";

/// A control-flow edge: a terminator and one of its successor indices.
pub type CondEdge = (Value, usize);

pub const CONDMERGE_NAME: &str = "condmerge";

pub fn create_condmerge_pass() -> Pass {
    Pass {
        name: CONDMERGE_NAME,
        descr: "Identify merge edges of conditional paths",
        deps: vec![DOMINATORS_NAME, POSTDOMINATORS_NAME],
        kind: PassKind::Transform(annotate_merge_edges),
    }
}

/// Return the jump identifier of `term`, assigning and persisting a fresh one
/// if the terminator hasn't been observed before.
pub fn get_or_assign_jump_id(context: &mut Context, term: Value) -> u64 {
    if let Some(id) = term
        .get_metadata(context, JUMP_ID_KEY)
        .and_then(|md| md.get_integer(context))
    {
        return id;
    }
    let id = context.next_jump_id();
    let md = MetadataIndex::integer(context, id);
    term.set_metadata(context, JUMP_ID_KEY, md);
    id
}

/// Encode an edge as `(jump_id, successor_index)` metadata, assigning a
/// jump identifier to its terminator on demand.
fn edge_metadata(context: &mut Context, edge: CondEdge) -> MetadataIndex {
    let jump_id = get_or_assign_jump_id(context, edge.0);
    let jump_md = MetadataIndex::integer(context, jump_id);
    let succ_md = MetadataIndex::integer(context, edge.1 as u64);
    MetadataIndex::list(context, vec![jump_md, succ_md])
}

fn dest_block_of_edge(context: &Context, edge: CondEdge) -> Option<Block> {
    edge.0
        .get_instruction(context)
        .and_then(|ins| ins.op.get_successor(edge.1))
}

pub fn annotate_merge_edges(
    context: &mut Context,
    analyses: &AnalysisResults,
    function: Function,
) -> Result<bool, IrError> {
    let dom_tree: &DomTree = analyses.get_analysis_result(function);
    let post_dom: &PostDomTree = analyses.get_analysis_result(function);

    let mut bb_to_cond_paths = FxIndexMap::<Block, Vec<CondEdge>>::default();
    let mut modified = false;
    for block in function.block_iter(context) {
        let Some(term) = block.get_terminator(context) else {
            continue;
        };
        if block.num_successors(context) > 1 {
            find_merge_edges(
                context,
                dom_tree,
                post_dom,
                term,
                block,
                &mut bb_to_cond_paths,
            );
            modified = true;
        }
    }

    for (bb, cond_paths) in bb_to_cond_paths {
        let Some(term) = bb.get_terminator(context) else {
            continue;
        };
        let edge_mds = cond_paths
            .into_iter()
            .map(|edge| edge_metadata(context, edge))
            .collect();
        let md = MetadataIndex::list(context, edge_mds);
        term.set_metadata(context, COND_PATHS_KEY, md);
    }

    Ok(modified)
}

/// BFS from each conditional choice edge of `jump`, classifying edges and
/// collecting conditional-path blocks.  Emits the `MergeEdges` metadata.
fn find_merge_edges(
    context: &mut Context,
    dom_tree: &DomTree,
    post_dom: &PostDomTree,
    jump: Value,
    jump_block: Block,
    bb_to_cond_paths: &mut FxIndexMap<Block, Vec<CondEdge>>,
) {
    let num_jump_succ = jump_block.num_successors(context);
    get_or_assign_jump_id(context, jump);

    let mut md_per_succ = Vec::with_capacity(num_jump_succ);
    for i_succ in 0..num_jump_succ {
        let mut already_seen = FxHashSet::<CondEdge>::default();
        let mut seen_bbs = FxHashSet::<Block>::default();
        let mut queue = VecDeque::<CondEdge>::new();
        let mut merge_edges = Vec::<CondEdge>::new();
        let cond_edge: CondEdge = (jump, i_succ);
        queue.push_back(cond_edge);
        while let Some(cur_edge) = queue.pop_front() {
            if !already_seen.insert(cur_edge) {
                continue;
            }
            let Some(bb) = dest_block_of_edge(context, cur_edge) else {
                continue;
            };
            let Some(bb_term) = bb.get_terminator(context) else {
                continue;
            };
            let is_merge_edge = bb_term == jump
                || dom_tree.dominates(bb, jump_block)
                || post_dom.dominates(bb, jump_block);
            if is_merge_edge {
                merge_edges.push(cur_edge);
            } else {
                if seen_bbs.insert(bb) {
                    bb_to_cond_paths.entry(bb).or_default().push(cond_edge);
                }
                for i in 0..bb.num_successors(context) {
                    queue.push_back((bb_term, i));
                }
            }
        }
        let edge_mds = merge_edges
            .into_iter()
            .map(|edge| edge_metadata(context, edge))
            .collect();
        md_per_succ.push(MetadataIndex::list(context, edge_mds));
    }
    let md = MetadataIndex::list(context, md_per_succ);
    jump.set_metadata(context, MERGE_EDGES_KEY, md);
}

// -------------------------------------------------------------------------------------------------

pub const PRINT_MERGE_EDGES_NAME: &str = "print-merge-edges";

pub fn create_print_merge_edges_pass() -> Pass {
    Pass {
        name: PRINT_MERGE_EDGES_NAME,
        descr: "Print merge edges of conditional paths",
        deps: vec![],
        kind: PassKind::Transform(print_merge_edges),
    }
}

fn print_merge_edges(
    context: &mut Context,
    _analyses: &AnalysisResults,
    function: Function,
) -> Result<bool, IrError> {
    print!("{}", merge_edges_report(context, function));
    Ok(false)
}

fn loc_str(loc: Option<&DebugLoc>) -> String {
    match loc {
        Some(loc) => format!("[Line{}:c{}]", loc.line, loc.col),
        None => "[MissingLoc]".to_owned(),
    }
}

/// The location reported for a jump: the last located instruction of its
/// block.
fn jump_debug_loc<'a>(context: &'a Context, term: Value) -> Option<&'a DebugLoc> {
    let block = term.get_instruction(context)?.parent;
    let ins_vals: Vec<Value> = block.instruction_iter(context).collect();
    ins_vals.into_iter().rev().find_map(|val| {
        val.get_debug_loc(context)
            .filter(|loc| loc.line > 0)
    })
}

/// The location reported for a block: its first located instruction.
fn block_debug_loc<'a>(context: &'a Context, block: Block) -> Option<&'a DebugLoc> {
    block.instruction_iter(context).find_map(|val| {
        val.get_debug_loc(context)
            .filter(|loc| loc.line > 0)
    })
}

fn edge_target_loc_str(context: &Context, term: Value, succ_idx: usize) -> String {
    let target = term
        .get_instruction(context)
        .and_then(|ins| ins.op.get_successor(succ_idx));
    match target {
        Some(block) => loc_str(block_debug_loc(context, block)),
        None => "[MissingLoc]".to_owned(),
    }
}

/// Render the merge-edge and conditional-path annotations of `function` in a
/// human-readable per-branch listing.
pub fn merge_edges_report(context: &Context, function: Function) -> String {
    let mut report = String::new();
    let wr = &mut report;
    let _ = writeln!(wr, "################## ");
    let _ = writeln!(wr, "# Function: {}", function.get_name(context));

    // Resolve the jump table for this function.
    let mut jump_of_id = FxHashMap::<u64, Value>::default();
    for block in function.block_iter(context) {
        if let Some(term) = block.get_terminator(context) {
            if let Some(id) = term
                .get_metadata(context, JUMP_ID_KEY)
                .and_then(|md| md.get_integer(context))
            {
                jump_of_id.insert(id, term);
            }
        }
    }

    let render_edge = |wr: &mut String, edge_md: MetadataIndex| {
        let Some((jump_id, succ_idx)) = edge_md.get_integer_pair(context) else {
            tracing::error!("malformed edge metadata in {}", function.get_name(context));
            return;
        };
        let Some(edge_jump) = jump_of_id.get(&jump_id) else {
            tracing::error!(
                "edge metadata references unknown JumpID {jump_id} in {}",
                function.get_name(context)
            );
            return;
        };
        let _ = writeln!(
            wr,
            "  {} -> {}",
            loc_str(jump_debug_loc(context, *edge_jump)),
            edge_target_loc_str(context, *edge_jump, succ_idx as usize)
        );
    };

    for block in function.block_iter(context) {
        let Some(term) = block.get_terminator(context) else {
            continue;
        };
        let num_succ = block.num_successors(context);
        if num_succ <= 1 {
            continue;
        }
        match term.get_metadata(context, MERGE_EDGES_KEY) {
            Some(top_md) => {
                let succ_lists = top_md.get_list(context).unwrap_or_default();
                for (i_succ, mid_md) in succ_lists.iter().enumerate() {
                    let _ = writeln!(
                        wr,
                        "Merge edges for {} -> {}:",
                        loc_str(jump_debug_loc(context, term)),
                        edge_target_loc_str(context, term, i_succ)
                    );
                    for edge_md in mid_md.get_list(context).unwrap_or_default() {
                        render_edge(wr, *edge_md);
                    }
                }
            }
            None => {
                let _ = writeln!(
                    wr,
                    "No merge-edge info for jump at {}.",
                    loc_str(jump_debug_loc(context, term))
                );
            }
        }
    }

    let _ = writeln!(wr, "-----------------");
    let mut terminators: Vec<Value> = function
        .block_iter(context)
        .filter_map(|block| block.get_terminator(context))
        .collect();
    terminators.sort_by(|t1, t2| {
        match (
            jump_debug_loc(context, *t1),
            jump_debug_loc(context, *t2),
        ) {
            (Some(l1), Some(l2)) => l1.line.cmp(&l2.line),
            _otherwise => std::cmp::Ordering::Equal,
        }
    });
    for term in terminators {
        let Some(md) = term.get_metadata(context, COND_PATHS_KEY) else {
            continue;
        };
        let _ = writeln!(
            wr,
            "Basic block ending at {} is on a cond path for the following cond edges:",
            loc_str(jump_debug_loc(context, term))
        );
        for edge_md in md.get_list(context).unwrap_or_default() {
            render_edge(wr, *edge_md);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser, register_known_passes, PassGroup, PassManager};

    fn annotate(ir_text: &str) -> Context {
        let mut ir = parser::parse(ir_text).unwrap();
        let mut pm = PassManager::default();
        register_known_passes(&mut pm);
        let mut group = PassGroup::default();
        group.append_pass(CONDMERGE_NAME);
        pm.run(&mut ir, &group).unwrap();
        ir
    }

    fn terminator_of(context: &Context, func_name: &str, label: &str) -> Value {
        let module = context.module_iter().next().unwrap();
        let function = module.get_function(context, func_name).unwrap();
        let block = function
            .block_iter(context)
            .find(|b| b.get_label(context) == label)
            .unwrap();
        block.get_terminator(context).unwrap()
    }

    #[test]
    fn diamond_merges_at_join() {
        let ir = annotate(
            r#"
            module {
                fn main(c: bool) -> u64 {
                    entry():
                    cbr c, lhs, rhs

                    lhs():
                    br exit

                    rhs():
                    br exit

                    exit():
                    v0 = const u64 0
                    ret u64 v0
                }
            }
            "#,
        );

        let cbr = terminator_of(&ir, "main", "entry");
        let jump_id = cbr
            .get_metadata(&ir, JUMP_ID_KEY)
            .and_then(|md| md.get_integer(&ir))
            .unwrap();
        assert_eq!(jump_id, 1);

        // One merge edge per arm, both landing on the join block.
        let merge_md = cbr.get_metadata(&ir, MERGE_EDGES_KEY).unwrap();
        let per_succ = merge_md.get_list(&ir).unwrap();
        assert_eq!(per_succ.len(), 2);
        for succ_md in per_succ {
            let edges = succ_md.get_list(&ir).unwrap();
            assert_eq!(edges.len(), 1);
        }

        // Each arm lies on the conditional path of its own choice edge.
        for (label, succ_idx) in [("lhs", 0), ("rhs", 1)] {
            let term = terminator_of(&ir, "main", label);
            let cond_md = term.get_metadata(&ir, COND_PATHS_KEY).unwrap();
            let edges = cond_md.get_list(&ir).unwrap();
            assert_eq!(edges.len(), 1);
            assert_eq!(edges[0].get_integer_pair(&ir), Some((jump_id, succ_idx)));
        }
    }

    #[test]
    fn loop_back_edge_is_a_merge_edge() {
        let ir = annotate(
            r#"
            module {
                fn spin(n: u64) -> () {
                    entry():
                    br header

                    header():
                    v0 = const u64 0
                    v1 = cmp eq n, v0
                    cbr v1, exit, body

                    body():
                    br header

                    exit():
                    ret ()
                }
            }
            "#,
        );

        let cbr = terminator_of(&ir, "spin", "header");
        let merge_md = cbr.get_metadata(&ir, MERGE_EDGES_KEY).unwrap();
        let per_succ = merge_md.get_list(&ir).unwrap();
        assert_eq!(per_succ.len(), 2);

        // Exploring the body arm finds the back edge to the header, closed by
        // returning to the branching instruction itself.
        let body_edges = per_succ[1].get_list(&ir).unwrap();
        let body_term = terminator_of(&ir, "spin", "body");
        let cbr_id = cbr
            .get_metadata(&ir, JUMP_ID_KEY)
            .and_then(|md| md.get_integer(&ir))
            .unwrap();
        let body_id = body_term
            .get_metadata(&ir, JUMP_ID_KEY)
            .and_then(|md| md.get_integer(&ir))
            .unwrap();
        assert_ne!(cbr_id, body_id);
        assert!(body_edges
            .iter()
            .any(|md| md.get_integer_pair(&ir) == Some((body_id, 0))));
    }
}

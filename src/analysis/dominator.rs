//! Dominator analysis.
//!
//! The tree is computed with the iterative scheme of Cooper, Harvey and
//! Kennedy ("A Simple, Fast Dominance Algorithm"): sweep the blocks in
//! reverse postorder, folding each block's processed predecessors together
//! with a meet over the partial tree, until nothing moves.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    block::Block, AnalysisResult, AnalysisResultT, AnalysisResults, Context, Function,
    FxIndexMap, IrError, Pass, PassKind,
};

/// Blocks of a function numbered in postorder of a DFS from the entry.
/// Unreachable blocks get no number.
pub struct PostOrder {
    pub number: FxHashMap<Block, usize>,
    pub order: Vec<Block>,
}
impl AnalysisResultT for PostOrder {}

pub const POSTORDER_NAME: &str = "postorder";

pub fn create_postorder_pass() -> Pass {
    Pass {
        name: POSTORDER_NAME,
        descr: "Postorder numbering of the control-flow graph",
        deps: vec![],
        kind: PassKind::Analysis(postorder_pass),
    }
}

fn postorder_pass(
    context: &Context,
    _analyses: &AnalysisResults,
    function: Function,
) -> Result<AnalysisResult, IrError> {
    Ok(Box::new(compute_post_order(context, function)))
}

/// Number the blocks reachable from the entry in postorder: a block is
/// numbered once all of its successors have been, the entry last of all.
pub fn compute_post_order(context: &Context, function: Function) -> PostOrder {
    enum Visit {
        Descend(Block),
        Number(Block),
    }

    let mut po = PostOrder {
        number: FxHashMap::default(),
        order: Vec::new(),
    };
    let mut seen = FxHashSet::<Block>::default();
    let mut stack = vec![Visit::Descend(function.get_entry_block(context))];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Descend(block) => {
                if !seen.insert(block) {
                    continue;
                }
                stack.push(Visit::Number(block));
                // Reversed so the stack pops successors in declared order.
                for succ in block.successors(context).into_iter().rev() {
                    if !seen.contains(&succ) {
                        stack.push(Visit::Descend(succ));
                    }
                }
            }
            Visit::Number(block) => {
                po.number.insert(block, po.order.len());
                po.order.push(block);
            }
        }
    }
    po
}

/// The dominator tree, kept as each block's immediate dominator.  The entry
/// has none; unreachable blocks aren't in the tree at all.
#[derive(Default)]
pub struct DomTree {
    idom: FxIndexMap<Block, Option<Block>>,
}
impl AnalysisResultT for DomTree {}

impl DomTree {
    /// Does `a` dominate `b`?
    ///
    /// Every block dominates itself; a block missing from the tree
    /// dominates nothing else.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        let mut cursor = Some(b);
        while let Some(block) = cursor {
            if block == a {
                return true;
            }
            cursor = self.idom.get(&block).copied().flatten();
        }
        false
    }

    /// The immediate dominator of `block`, if it has one.
    pub fn immediate_dominator(&self, block: Block) -> Option<Block> {
        self.idom.get(&block).copied().flatten()
    }
}

pub const DOMINATORS_NAME: &str = "dominators";

pub fn create_dominators_pass() -> Pass {
    Pass {
        name: DOMINATORS_NAME,
        descr: "Dominator tree computation",
        deps: vec![POSTORDER_NAME],
        kind: PassKind::Analysis(dominators_pass),
    }
}

fn dominators_pass(
    context: &Context,
    analyses: &AnalysisResults,
    function: Function,
) -> Result<AnalysisResult, IrError> {
    let po: &PostOrder = analyses.get_analysis_result(function);
    Ok(Box::new(compute_dom_tree(context, function, po)))
}

/// Iterate to the fixed dominator tree.
fn compute_dom_tree(context: &Context, function: Function, po: &PostOrder) -> DomTree {
    let entry = function.get_entry_block(context);
    let mut tree = DomTree::default();
    tree.idom.insert(entry, None);

    // Two ancestor chains meet at the nearest common dominator; the block
    // with the smaller postorder number is the deeper one and walks up.
    let meet = |tree: &DomTree, mut a: Block, mut b: Block| -> Block {
        while a != b {
            while po.number[&a] < po.number[&b] {
                a = tree.idom[&a].expect("only the entry lacks an immediate dominator");
            }
            while po.number[&b] < po.number[&a] {
                b = tree.idom[&b].expect("only the entry lacks an immediate dominator");
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        // Reverse postorder, entry excluded.
        for block in po.order.iter().rev() {
            if *block == entry {
                continue;
            }
            // Fold the processed predecessors together.  The DFS tree parent
            // is always among them, so there is at least one.
            let mut folded: Option<Block> = None;
            for pred in block.pred_iter(context) {
                if !po.number.contains_key(pred) || !tree.idom.contains_key(pred) {
                    // Unreachable, or not processed yet this sweep.
                    continue;
                }
                folded = Some(match folded {
                    None => *pred,
                    Some(acc) => meet(&tree, *pred, acc),
                });
            }
            let new_idom =
                folded.expect("reverse postorder leaves no block without a processed predecessor");
            if tree.idom.get(block) != Some(&Some(new_idom)) {
                tree.idom.insert(*block, Some(new_idom));
                changed = true;
            }
        }
    }

    tree
}

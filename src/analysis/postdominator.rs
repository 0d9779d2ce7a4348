//! Post-dominator analysis.
//!
//! The dominator fixpoint run over the reverse CFG.  Every exit block hangs
//! off a shared virtual exit which is kept implicit: an exit's immediate
//! post-dominator is `None`.  With several exits the result is a forest, and
//! blocks on no path to an exit are absent, post-dominating only themselves.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    block::Block, AnalysisResult, AnalysisResultT, AnalysisResults, Context, Function,
    FxIndexMap, IrError, Pass, PassKind,
};

/// The post-dominator forest: each block's immediate post-dominator, `None`
/// meaning the virtual exit.
#[derive(Default)]
pub struct PostDomTree {
    idom: FxIndexMap<Block, Option<Block>>,
}
impl AnalysisResultT for PostDomTree {}

impl PostDomTree {
    /// Does `a` post-dominate `b`?
    ///
    /// Every block post-dominates itself; a block missing from the forest
    /// post-dominates nothing else.
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

    /// The immediate post-dominator of `block`: `Some(None)` is the virtual
    /// exit, outer `None` means the block cannot reach an exit.
    pub fn immediate_post_dominator(&self, block: Block) -> Option<Option<Block>> {
        self.idom.get(&block).copied()
    }
}

/// Blocks numbered in postorder of a DFS over predecessor edges, rooted at
/// the exit blocks.  Blocks that reach no exit get no number.
struct ExitPostOrder {
    number: FxHashMap<Block, usize>,
    order: Vec<Block>,
}

fn exit_blocks(context: &Context, function: Function) -> impl Iterator<Item = Block> + '_ {
    function
        .block_iter(context)
        .filter(|block| block.num_successors(context) == 0)
}

fn compute_exit_post_order(context: &Context, function: Function) -> ExitPostOrder {
    enum Visit {
        Descend(Block),
        Number(Block),
    }

    let mut po = ExitPostOrder {
        number: FxHashMap::default(),
        order: Vec::new(),
    };
    let mut seen = FxHashSet::<Block>::default();
    let mut stack: Vec<Visit> = exit_blocks(context, function).map(Visit::Descend).collect();
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Descend(block) => {
                if !seen.insert(block) {
                    continue;
                }
                stack.push(Visit::Number(block));
                for pred in block.pred_iter(context) {
                    if !seen.contains(pred) {
                        stack.push(Visit::Descend(*pred));
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

pub const POSTDOMINATORS_NAME: &str = "postdominators";

pub fn create_postdominators_pass() -> Pass {
    Pass {
        name: POSTDOMINATORS_NAME,
        descr: "Post-dominator forest computation",
        deps: vec![],
        kind: PassKind::Analysis(postdominators_pass),
    }
}

fn postdominators_pass(
    context: &Context,
    _analyses: &AnalysisResults,
    function: Function,
) -> Result<AnalysisResult, IrError> {
    Ok(Box::new(compute_post_dom_tree(context, function)))
}

/// Iterate to the fixed post-dominator forest.
fn compute_post_dom_tree(context: &Context, function: Function) -> PostDomTree {
    let po = compute_exit_post_order(context, function);
    let exits: FxHashSet<Block> = exit_blocks(context, function).collect();

    let mut tree = PostDomTree::default();
    for exit in po.order.iter().filter(|block| exits.contains(block)) {
        tree.idom.insert(*exit, None);
    }

    // Two chains meet at the nearest common post-dominator; the virtual exit
    // is everyone's ancestor, so reaching it on either side ends the walk.
    let meet = |idom: &FxIndexMap<Block, Option<Block>>,
                mut a: Block,
                mut b: Block|
     -> Option<Block> {
        while a != b {
            let deeper = if po.number[&a] < po.number[&b] {
                &mut a
            } else {
                &mut b
            };
            match idom.get(deeper).copied().flatten() {
                Some(up) => *deeper = up,
                None => return None,
            }
        }
        Some(a)
    };

    let mut changed = true;
    while changed {
        changed = false;
        // Reverse postorder of the reverse CFG, exits excluded.
        for block in po.order.iter().rev() {
            if exits.contains(block) {
                continue;
            }
            // Fold the processed exit-reaching successors together.  The DFS
            // tree parent is always among them, so there is at least one.
            let mut folded: Option<Option<Block>> = None;
            for succ in block.successors(context) {
                if !po.number.contains_key(&succ) || !tree.idom.contains_key(&succ) {
                    continue;
                }
                folded = Some(match folded {
                    None => Some(succ),
                    // Already at the virtual exit; it absorbs everything.
                    Some(None) => None,
                    Some(Some(acc)) => meet(&tree.idom, succ, acc),
                });
            }
            let new_idom = folded
                .expect("reverse postorder leaves no block without a processed successor");
            if tree.idom.get(block).copied() != Some(new_idom) {
                tree.idom.insert(*block, new_idom);
                changed = true;
            }
        }
    }

    tree
}

//! A basic block: a non-empty sequence of instructions ending in a
//! terminator.
//!
//! Blocks are created through their [`Function`] and keep their predecessor
//! set up to date as terminators are appended.

use crate::{
    context::Context,
    function::Function,
    instruction::{InstOp, InstructionIterator},
    value::Value,
    FxIndexSet,
};

/// A wrapper around an arena handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Block(pub generational_arena::Index);

#[doc(hidden)]
pub struct BlockContent {
    pub label: Label,
    pub function: Function,
    pub instructions: Vec<Value>,
    pub preds: FxIndexSet<Block>,
}

pub type Label = String;

impl Block {
    /// Return a new block handle.  Use
    /// [`Function::create_block`](crate::function::Function::create_block)
    /// to create and append one to a function.
    pub fn new(context: &mut Context, function: Function, label: Option<String>) -> Block {
        let label = function.get_unique_label(context, label);
        let content = BlockContent {
            label,
            function,
            instructions: vec![],
            preds: FxIndexSet::default(),
        };
        Block(context.blocks.insert(content))
    }

    pub fn get_function(&self, context: &Context) -> Function {
        context.blocks[self.0].function
    }

    pub fn get_label(&self, context: &Context) -> String {
        context.blocks[self.0].label.clone()
    }

    /// Create a new instruction value for `op` and append it to this block.
    ///
    /// If `op` is a terminator, this block is registered as a predecessor of
    /// each successor.
    pub fn append(&self, context: &mut Context, op: InstOp) -> Value {
        let succs = op.get_successors();
        let ins_val = Value::new_instruction(context, *self, op);
        context.blocks[self.0].instructions.push(ins_val);
        for succ in succs {
            succ.add_pred(context, self);
        }
        ins_val
    }

    pub fn add_pred(&self, context: &mut Context, from_block: &Block) {
        context.blocks[self.0].preds.insert(*from_block);
    }

    /// Return the terminator instruction value, if the block ends in one.
    pub fn get_terminator(&self, context: &Context) -> Option<Value> {
        context.blocks[self.0]
            .instructions
            .last()
            .filter(|val| val.is_terminator(context))
            .copied()
    }

    /// Return the successor blocks in declared order.
    pub fn successors(&self, context: &Context) -> Vec<Block> {
        self.get_terminator(context)
            .and_then(|term| term.get_instruction(context))
            .map(|ins| ins.op.get_successors())
            .unwrap_or_default()
    }

    pub fn num_successors(&self, context: &Context) -> usize {
        self.successors(context).len()
    }

    pub fn pred_iter<'a>(&self, context: &'a Context) -> impl Iterator<Item = &'a Block> {
        context.blocks[self.0].preds.iter()
    }

    pub fn num_predecessors(&self, context: &Context) -> usize {
        context.blocks[self.0].preds.len()
    }

    pub fn num_instructions(&self, context: &Context) -> usize {
        context.blocks[self.0].instructions.len()
    }

    pub fn instruction_iter(&self, context: &Context) -> InstructionIterator {
        InstructionIterator::new(context, self)
    }
}

/// An iterator over each block in a [`Function`].
pub struct BlockIterator {
    blocks: Vec<generational_arena::Index>,
    next: usize,
}

impl BlockIterator {
    pub fn new(context: &Context, function: &Function) -> Self {
        // Snapshot the block list up front; the context stays free for
        // mutation while iterating.
        BlockIterator {
            blocks: context.functions[function.0]
                .blocks
                .iter()
                .map(|block| block.0)
                .collect(),
            next: 0,
        }
    }
}

impl Iterator for BlockIterator {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.next < self.blocks.len() {
            let idx = self.next;
            self.next += 1;
            Some(Block(self.blocks[idx]))
        } else {
            None
        }
    }
}

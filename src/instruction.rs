//! Instructions for data manipulation and control flow.
//!
//! Unlike a register machine the IR is in SSA form: joins in the data flow
//! are expressed with [`InstOp::Phi`] nodes whose value is selected by the
//! control-flow predecessor.

use crate::{block::Block, context::Context, function::Function, value::Value};

#[derive(Debug, Clone)]
pub struct Instruction {
    /// The block containing this instruction.
    pub parent: Block,
    pub op: InstOp,
}

#[derive(Debug, Clone)]
pub enum InstOp {
    /// Binary arithmetic operations.
    BinaryOp {
        op: BinaryOpKind,
        arg1: Value,
        arg2: Value,
    },
    /// An unconditional jump.
    Branch(Block),
    /// A function call with a list of arguments.
    Call(Function, Vec<Value>),
    /// Comparison between two values returning a boolean.
    Cmp(Predicate, Value, Value),
    /// A conditional jump with the boolean condition value and true or false
    /// destinations.
    ConditionalBranch {
        cond_value: Value,
        true_block: Block,
        false_block: Block,
    },
    /// Pointer arithmetic over a structured base pointer.
    ///
    /// The analyses in this crate are field-insensitive and treat the result
    /// as an alias of `base`.
    GetElemPtr { base: Value, indices: Vec<Value> },
    /// Read a value from a memory pointer.
    Load(Value),
    /// No-op, handy as a placeholder instruction.
    Nop,
    /// Select a value per control-flow predecessor.
    Phi(Vec<(Block, Value)>),
    /// Return from a function, optionally with a value.
    Ret(Option<Value>),
    /// Write a value to a memory pointer.
    Store { dst_val: Value, stored_val: Value },
    /// A multi-way jump on an integer value.  The default destination is
    /// successor 0; cases follow in declaration order.
    Switch {
        value: Value,
        default_block: Block,
        cases: Vec<(u64, Block)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    Div,
}

impl InstOp {
    /// Return the value operands of this instruction, in declaration order.
    ///
    /// Phi operands are the incoming values; branch targets are not
    /// operands.
    pub fn get_operands(&self) -> Vec<Value> {
        match self {
            InstOp::BinaryOp { arg1, arg2, .. } => vec![*arg1, *arg2],
            InstOp::Branch(_) => vec![],
            InstOp::Call(_, args) => args.clone(),
            InstOp::Cmp(_, lhs, rhs) => vec![*lhs, *rhs],
            InstOp::ConditionalBranch { cond_value, .. } => vec![*cond_value],
            InstOp::GetElemPtr { base, indices } => {
                let mut ops = vec![*base];
                ops.extend_from_slice(indices);
                ops
            }
            InstOp::Load(ptr) => vec![*ptr],
            InstOp::Nop => vec![],
            InstOp::Phi(pairs) => pairs.iter().map(|(_, val)| *val).collect(),
            InstOp::Ret(val) => val.iter().copied().collect(),
            InstOp::Store {
                dst_val,
                stored_val,
            } => vec![*dst_val, *stored_val],
            InstOp::Switch { value, .. } => vec![*value],
        }
    }

    /// Return the successor blocks of this instruction, in declaration
    /// order.  Empty unless this is a terminator.
    pub fn get_successors(&self) -> Vec<Block> {
        match self {
            InstOp::Branch(block) => vec![*block],
            InstOp::ConditionalBranch {
                true_block,
                false_block,
                ..
            } => vec![*true_block, *false_block],
            InstOp::Switch {
                default_block,
                cases,
                ..
            } => {
                let mut succs = vec![*default_block];
                succs.extend(cases.iter().map(|(_, block)| *block));
                succs
            }
            _otherwise => vec![],
        }
    }

    /// Return successor number `idx`, if it exists.
    pub fn get_successor(&self, idx: usize) -> Option<Block> {
        self.get_successors().get(idx).copied()
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstOp::Branch(_)
                | InstOp::ConditionalBranch { .. }
                | InstOp::Switch { .. }
                | InstOp::Ret(_)
        )
    }

    pub fn is_call(&self) -> bool {
        matches!(self, InstOp::Call(..))
    }

    pub fn is_cmp(&self) -> bool {
        matches!(self, InstOp::Cmp(..))
    }
}

/// An iterator over the instruction values of a [`Block`].
pub struct InstructionIterator {
    instructions: Vec<generational_arena::Index>,
    next: usize,
}

impl InstructionIterator {
    pub fn new(context: &Context, block: &Block) -> Self {
        // Snapshot the instruction list up front; the context stays free
        // for mutation while iterating.
        InstructionIterator {
            instructions: context.blocks[block.0]
                .instructions
                .iter()
                .map(|val| val.0)
                .collect(),
            next: 0,
        }
    }
}

impl Iterator for InstructionIterator {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        if self.next < self.instructions.len() {
            let idx = self.next;
            self.next += 1;
            Some(Value(self.instructions[idx]))
        } else {
            None
        }
    }
}

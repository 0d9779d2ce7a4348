//! The base descriptor for various values within the IR.
//!
//! [`Value`]s can be function arguments, constants, globals and instructions.
//! [`Instruction`]s generally refer to each other and to constants via the
//! [`Value`] wrapper.
//!
//! Like most IR data structures they are `Copy` and cheap to pass around by
//! value.

use std::collections::BTreeMap;

use crate::{
    block::Block,
    constant::Constant,
    context::Context,
    function::FuncArgument,
    global_var::GlobalVar,
    instruction::{InstOp, Instruction},
    metadata::{DebugLoc, MetadataIndex},
};

/// A wrapper around an arena handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Value(pub generational_arena::Index);

#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct ValueContent {
    pub value: ValueDatum,
    pub debug_loc: Option<DebugLoc>,
    pub metadata: BTreeMap<String, MetadataIndex>,
}

/// The discriminated view over what a [`Value`] is.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub enum ValueDatum {
    Argument(FuncArgument),
    Constant(Constant),
    Global(GlobalVar),
    Instruction(Instruction),
}

impl Value {
    fn new(context: &mut Context, value: ValueDatum) -> Value {
        let content = ValueContent {
            value,
            debug_loc: None,
            metadata: BTreeMap::new(),
        };
        Value(context.values.insert(content))
    }

    /// Return a new argument [`Value`].
    pub fn new_argument(context: &mut Context, arg: FuncArgument) -> Value {
        Value::new(context, ValueDatum::Argument(arg))
    }

    /// Return a new constant [`Value`].
    pub fn new_constant(context: &mut Context, constant: Constant) -> Value {
        Value::new(context, ValueDatum::Constant(constant))
    }

    /// Return a new global [`Value`].
    pub fn new_global(context: &mut Context, gvar: GlobalVar) -> Value {
        Value::new(context, ValueDatum::Global(gvar))
    }

    /// Return a new instruction [`Value`] belonging to `block`.
    ///
    /// The value is not inserted into the block; use
    /// [`Block::append`](crate::block::Block::append) for that.
    pub fn new_instruction(context: &mut Context, block: Block, op: InstOp) -> Value {
        Value::new(
            context,
            ValueDatum::Instruction(Instruction { parent: block, op }),
        )
    }

    /// Attach metadata to this value under `key`, replacing any existing
    /// entry for that key.
    pub fn set_metadata(&self, context: &mut Context, key: &str, md_idx: MetadataIndex) {
        context.values[self.0].metadata.insert(key.to_owned(), md_idx);
    }

    /// Return this value's metadata under `key`.
    pub fn get_metadata(&self, context: &Context, key: &str) -> Option<MetadataIndex> {
        context.values[self.0].metadata.get(key).copied()
    }

    /// Return the full metadata dictionary for this value.
    pub fn metadata<'a>(&self, context: &'a Context) -> &'a BTreeMap<String, MetadataIndex> {
        &context.values[self.0].metadata
    }

    pub fn set_debug_loc(&self, context: &mut Context, loc: DebugLoc) {
        context.values[self.0].debug_loc = Some(loc);
    }

    pub fn get_debug_loc<'a>(&self, context: &'a Context) -> Option<&'a DebugLoc> {
        context.values[self.0].debug_loc.as_ref()
    }

    /// Return whether this is a constant value.
    pub fn is_constant(&self, context: &Context) -> bool {
        matches!(context.values[self.0].value, ValueDatum::Constant(_))
    }

    /// Return whether this value is an instruction, and specifically a
    /// 'terminator'.
    ///
    /// A terminator is always the last instruction in a block (and may not
    /// appear anywhere else) and is either a branch, a switch or a return.
    pub fn is_terminator(&self, context: &Context) -> bool {
        match &context.values[self.0].value {
            ValueDatum::Instruction(ins) => ins.op.is_terminator(),
            _otherwise => false,
        }
    }

    /// Replace this value with another one, in-place.
    pub fn replace(&self, context: &mut Context, other: ValueDatum) {
        context.values[self.0].value = other;
    }

    pub fn get_instruction<'a>(&self, context: &'a Context) -> Option<&'a Instruction> {
        if let ValueDatum::Instruction(instruction) = &context.values[self.0].value {
            Some(instruction)
        } else {
            None
        }
    }

    pub fn get_instruction_mut<'a>(&self, context: &'a mut Context) -> Option<&'a mut Instruction> {
        if let ValueDatum::Instruction(instruction) = &mut context.values[self.0].value {
            Some(instruction)
        } else {
            None
        }
    }

    /// Get a reference to the [`Constant`] inside this value, if it's one.
    pub fn get_constant<'a>(&self, context: &'a Context) -> Option<&'a Constant> {
        if let ValueDatum::Constant(cn) = &context.values[self.0].value {
            Some(cn)
        } else {
            None
        }
    }

    /// Get the [`GlobalVar`] behind this value, if it's a global.
    pub fn get_global(&self, context: &Context) -> Option<GlobalVar> {
        if let ValueDatum::Global(gvar) = &context.values[self.0].value {
            Some(*gvar)
        } else {
            None
        }
    }

    /// Get the [`FuncArgument`] behind this value, if it's a formal
    /// parameter.
    pub fn get_argument(&self, context: &Context) -> Option<FuncArgument> {
        if let ValueDatum::Argument(arg) = &context.values[self.0].value {
            Some(*arg)
        } else {
            None
        }
    }
}

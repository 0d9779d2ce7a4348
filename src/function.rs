//! A typical function data type.
//!
//! [`Function`] is named, takes zero or more arguments and has a return
//! type.  A function with a body contains a collection of [`Block`]s, the
//! first being its entry block; a function without blocks is a declaration,
//! standing in for an external routine modeled by the analysis
//! specification files.

use crate::{
    block::{Block, BlockIterator, Label},
    context::Context,
    irtype::Type,
    module::Module,
    value::Value,
};

/// A wrapper around an arena handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Function(pub slotmap::DefaultKey);

#[doc(hidden)]
pub struct FunctionContent {
    pub name: String,
    pub arguments: Vec<(String, Value)>,
    pub return_type: Type,
    pub blocks: Vec<Block>,
    pub module: Module,
    pub is_variadic: bool,

    next_label_idx: u64,
}

/// A formal parameter of a [`Function`], indexed from 0.
#[derive(Debug, Clone, Copy)]
pub struct FuncArgument {
    pub function: Function,
    pub idx: usize,
    pub ty: Type,
}

impl Function {
    /// Return a new [`Function`] handle with no blocks.
    ///
    /// Blocks are added with [`Function::create_block`]; the first block
    /// created is the entry block.  A function left without blocks is a
    /// declaration.
    pub fn new(
        context: &mut Context,
        module: Module,
        name: String,
        args: Vec<(String, Type)>,
        return_type: Type,
        is_variadic: bool,
    ) -> Function {
        let content = FunctionContent {
            name,
            arguments: Vec::new(),
            return_type,
            blocks: Vec::new(),
            module,
            is_variadic,
            next_label_idx: 0,
        };
        let func = Function(context.functions.insert(content));
        context.modules[module.0].functions.push(func);

        let arguments: Vec<_> = args
            .into_iter()
            .enumerate()
            .map(|(idx, (name, ty))| {
                (
                    name,
                    Value::new_argument(
                        context,
                        FuncArgument {
                            function: func,
                            idx,
                            ty,
                        },
                    ),
                )
            })
            .collect();
        context.functions[func.0].arguments = arguments;

        func
    }

    /// Create and append a new [`Block`] to this function.
    pub fn create_block(&self, context: &mut Context, label: Option<Label>) -> Block {
        let block = Block::new(context, *self, label);
        context.functions[self.0].blocks.push(block);
        block
    }

    /// Get a new unique block label.
    ///
    /// If `hint` is `None` then the label will be in the form `"blockN"`
    /// where N is an incrementing decimal.  Otherwise if the hint is already
    /// unique to this function it will be returned; if not it will have N
    /// appended until it is.
    pub fn get_unique_label(&self, context: &mut Context, hint: Option<String>) -> String {
        match hint {
            Some(hint) => {
                if context.functions[self.0]
                    .blocks
                    .iter()
                    .any(|block| context.blocks[block.0].label == hint)
                {
                    let idx = self.get_next_label_idx(context);
                    self.get_unique_label(context, Some(format!("{hint}{idx}")))
                } else {
                    hint
                }
            }
            None => {
                let idx = self.get_next_label_idx(context);
                self.get_unique_label(context, Some(format!("block{idx}")))
            }
        }
    }

    fn get_next_label_idx(&self, context: &mut Context) -> u64 {
        let func = &mut context.functions[self.0];
        let idx = func.next_label_idx;
        func.next_label_idx += 1;
        idx
    }

    /// Return the function name.
    pub fn get_name<'a>(&self, context: &'a Context) -> &'a str {
        &context.functions[self.0].name
    }

    /// Return the module that this function belongs to.
    pub fn get_module(&self, context: &Context) -> Module {
        context.functions[self.0].module
    }

    /// Whether this function has no body.
    pub fn is_declaration(&self, context: &Context) -> bool {
        context.functions[self.0].blocks.is_empty()
    }

    /// Whether this function accepts extra arguments beyond its declared
    /// parameters.
    pub fn is_variadic(&self, context: &Context) -> bool {
        context.functions[self.0].is_variadic
    }

    /// Return the number of blocks in this function.
    pub fn num_blocks(&self, context: &Context) -> usize {
        context.functions[self.0].blocks.len()
    }

    /// Return the function entry (i.e., the first) block.
    ///
    /// Panics if the function is a declaration.
    pub fn get_entry_block(&self, context: &Context) -> Block {
        context.functions[self.0].blocks[0]
    }

    /// Get the function return type.
    pub fn get_return_type(&self, context: &Context) -> Type {
        context.functions[self.0].return_type
    }

    /// Get the number of args.
    pub fn num_args(&self, context: &Context) -> usize {
        context.functions[self.0].arguments.len()
    }

    /// Get the formal parameter value at `idx`, if it exists.
    pub fn get_arg(&self, context: &Context, idx: usize) -> Option<Value> {
        context.functions[self.0]
            .arguments
            .get(idx)
            .map(|(_, val)| *val)
    }

    /// Return an iterator over the function arguments.
    pub fn args_iter<'a>(&self, context: &'a Context) -> impl Iterator<Item = &'a (String, Value)> {
        context.functions[self.0].arguments.iter()
    }

    /// Return an iterator over each block in this function.
    pub fn block_iter(&self, context: &Context) -> BlockIterator {
        BlockIterator::new(context, self)
    }

    /// Return an iterator over each instruction in each block in this
    /// function.
    ///
    /// This is a convenience method for when all instructions in a function
    /// need to be inspected.  The instruction value is returned from the
    /// iterator along with the block it belongs to.
    pub fn instruction_iter<'a>(
        &self,
        context: &'a Context,
    ) -> impl Iterator<Item = (Block, Value)> + 'a {
        context.functions[self.0]
            .blocks
            .iter()
            .flat_map(move |block| {
                block
                    .instruction_iter(context)
                    .map(move |ins_val| (*block, ins_val))
            })
    }
}

/// An iterator over each [`Function`] in a [`Module`].
pub struct FunctionIterator {
    functions: Vec<slotmap::DefaultKey>,
    next: usize,
}

impl FunctionIterator {
    /// Return a new iterator for the functions in `module`.
    pub fn new(context: &Context, module: &Module) -> FunctionIterator {
        // Snapshot the function list up front; the context stays free for
        // mutation while iterating.
        FunctionIterator {
            functions: context.modules[module.0]
                .functions
                .iter()
                .map(|func| func.0)
                .collect(),
            next: 0,
        }
    }
}

impl Iterator for FunctionIterator {
    type Item = Function;

    fn next(&mut self) -> Option<Function> {
        if self.next < self.functions.len() {
            let idx = self.next;
            self.next += 1;
            Some(Function(self.functions[idx]))
        } else {
            None
        }
    }
}

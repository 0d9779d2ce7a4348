//! The main handle to an IR instance.
//!
//! [`Context`] contains several arena collections to maintain the IR ECS.
//!
//! It is passed around as a mutable reference to many of the IR APIs.

use generational_arena::Arena;
use slotmap::{DefaultKey, SlotMap};

use crate::{
    block::BlockContent,
    function::FunctionContent,
    global_var::GlobalVarContent,
    metadata::Metadatum,
    module::{ModuleContent, ModuleIterator},
    value::ValueContent,
};

/// The main IR context handle.
///
/// Every module, function, block and value is stored here.  Some aggregate
/// metadata is also managed by the context, including the jump-identifier
/// counter used by the CFG annotator; identifiers live for the duration of
/// one analysis over the context and are monotone from 1.
pub struct Context {
    pub(crate) modules: SlotMap<DefaultKey, ModuleContent>,
    pub(crate) functions: SlotMap<DefaultKey, FunctionContent>,
    pub(crate) blocks: Arena<BlockContent>,
    pub(crate) values: Arena<ValueContent>,
    pub(crate) globals: Arena<GlobalVarContent>,
    pub(crate) metadata: Arena<Metadatum>,

    next_jump_id: u64,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            modules: Default::default(),
            functions: Default::default(),
            blocks: Default::default(),
            values: Default::default(),
            globals: Default::default(),
            metadata: Default::default(),
            next_jump_id: 1,
        }
    }
}

impl Context {
    /// Return an iterator for every module in this context.
    pub fn module_iter(&self) -> ModuleIterator {
        ModuleIterator::new(self)
    }

    /// Draw the next jump identifier.
    pub fn next_jump_id(&mut self) -> u64 {
        let id = self.next_jump_id;
        self.next_jump_id += 1;
        id
    }
}

use std::fmt::{Display, Error, Formatter};

impl Display for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", crate::printer::to_string(self))
    }
}

impl From<Context> for String {
    fn from(context: Context) -> Self {
        crate::printer::to_string(&context)
    }
}

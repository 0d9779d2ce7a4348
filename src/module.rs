//! A module: an ordered collection of functions plus named globals.

use std::collections::BTreeMap;

use crate::{
    context::Context,
    function::{Function, FunctionIterator},
    value::Value,
};

/// A wrapper around an arena handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Module(pub slotmap::DefaultKey);

#[doc(hidden)]
pub struct ModuleContent {
    pub name: String,
    pub functions: Vec<Function>,
    // BTree rather than Hash for deterministic ordering.
    pub globals: BTreeMap<String, Value>,
}

impl Module {
    pub fn new(context: &mut Context, name: &str) -> Module {
        let content = ModuleContent {
            name: name.to_owned(),
            functions: Vec::new(),
            globals: BTreeMap::new(),
        };
        Module(context.modules.insert(content))
    }

    pub fn get_name<'a>(&self, context: &'a Context) -> &'a str {
        &context.modules[self.0].name
    }

    /// Return an iterator over the functions in this module, in declaration
    /// order.
    pub fn function_iter(&self, context: &Context) -> FunctionIterator {
        FunctionIterator::new(context, self)
    }

    /// Look up a function by name.
    pub fn get_function(&self, context: &Context, name: &str) -> Option<Function> {
        self.function_iter(context)
            .find(|func| func.get_name(context) == name)
    }

    /// Register a global's canonical value under `name`.
    pub fn add_global(&self, context: &mut Context, name: String, gvar_val: Value) {
        context.modules[self.0].globals.insert(name, gvar_val);
    }

    /// Look up a global's canonical value by name.
    pub fn get_global(&self, context: &Context, name: &str) -> Option<Value> {
        context.modules[self.0].globals.get(name).copied()
    }

    /// Return the globals as `(name, value)` pairs in name order.
    pub fn globals_iter(&self, context: &Context) -> Vec<(String, Value)> {
        context.modules[self.0]
            .globals
            .iter()
            .map(|(name, val)| (name.clone(), *val))
            .collect()
    }
}

/// An iterator over each [`Module`] in a [`Context`].
pub struct ModuleIterator {
    modules: Vec<slotmap::DefaultKey>,
    next: usize,
}

impl ModuleIterator {
    pub fn new(context: &Context) -> ModuleIterator {
        // Snapshot the module list up front; the context stays free for
        // mutation while iterating.
        ModuleIterator {
            modules: context.modules.keys().collect(),
            next: 0,
        }
    }
}

impl Iterator for ModuleIterator {
    type Item = Module;

    fn next(&mut self) -> Option<Module> {
        if self.next < self.modules.len() {
            let idx = self.next;
            self.next += 1;
            Some(Module(self.modules[idx]))
        } else {
            None
        }
    }
}

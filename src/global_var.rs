//! Module-scope global variables.
//!
//! A global is registered with its module under a name and is represented in
//! operand position by a single canonical [`Value`] with
//! [`crate::value::ValueDatum::Global`].  The taint analysis keys its
//! process-wide side-channel table by that canonical value.

use crate::{
    constant::{Constant, ConstantValue},
    context::Context,
    irtype::Type,
    module::Module,
    value::Value,
};

/// A wrapper around an arena handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GlobalVar(pub generational_arena::Index);

#[doc(hidden)]
pub struct GlobalVarContent {
    pub name: String,
    pub ty: Type,
    pub initializer: Option<Constant>,
    pub is_constant: bool,
}

impl GlobalVar {
    /// Create a new global in `module` and return its canonical [`Value`].
    pub fn new(
        context: &mut Context,
        module: Module,
        name: String,
        ty: Type,
        initializer: Option<Constant>,
        is_constant: bool,
    ) -> Value {
        let content = GlobalVarContent {
            name: name.clone(),
            ty,
            initializer,
            is_constant,
        };
        let gvar = GlobalVar(context.globals.insert(content));
        let gvar_val = Value::new_global(context, gvar);
        module.add_global(context, name, gvar_val);
        gvar_val
    }

    pub fn get_name<'a>(&self, context: &'a Context) -> &'a str {
        &context.globals[self.0].name
    }

    pub fn get_type(&self, context: &Context) -> Type {
        context.globals[self.0].ty
    }

    pub fn is_constant(&self, context: &Context) -> bool {
        context.globals[self.0].is_constant
    }

    pub fn get_initializer<'a>(&self, context: &'a Context) -> Option<&'a Constant> {
        context.globals[self.0].initializer.as_ref()
    }

    /// Return the string initializer, if this global is a constant string.
    pub fn get_string_initializer<'a>(&self, context: &'a Context) -> Option<&'a str> {
        match self.get_initializer(context) {
            Some(Constant {
                value: ConstantValue::String(s),
                ..
            }) => Some(s),
            _otherwise => None,
        }
    }
}

//! [`Constant`] is a typed constant value.

use crate::{context::Context, irtype::Type, value::Value};

/// A [`Type`] and constant value, including [`ConstantValue::Undef`] for
/// uninitialized constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    pub ty: Type,
    pub value: ConstantValue,
}

/// A constant representation of each of the supported [`Type`]s.
///
/// [`ConstantValue::Gep`] is a constant expression: pointer arithmetic over a
/// (usually global) base computed at compile time, e.g. the address of a
/// string literal passed to a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantValue {
    Undef,
    Unit,
    Bool(bool),
    Uint(u64),
    String(String),
    Gep { base: Value },
}

impl Constant {
    pub fn new_unit() -> Self {
        Constant {
            ty: Type::Unit,
            value: ConstantValue::Unit,
        }
    }

    pub fn new_bool(b: bool) -> Self {
        Constant {
            ty: Type::Bool,
            value: ConstantValue::Bool(b),
        }
    }

    pub fn new_uint(nbits: u16, n: u64) -> Self {
        Constant {
            ty: Type::Uint(nbits),
            value: ConstantValue::Uint(n),
        }
    }

    pub fn new_string(string: String) -> Self {
        Constant {
            ty: Type::String(string.chars().count() as u64),
            value: ConstantValue::String(string),
        }
    }

    /// A constant GEP expression over `base`.
    pub fn new_gep(base: Value) -> Self {
        Constant {
            ty: Type::Ptr,
            value: ConstantValue::Gep { base },
        }
    }

    pub fn get_unit(context: &mut Context) -> Value {
        Value::new_constant(context, Constant::new_unit())
    }

    pub fn get_bool(context: &mut Context, value: bool) -> Value {
        Value::new_constant(context, Constant::new_bool(value))
    }

    pub fn get_uint(context: &mut Context, nbits: u16, value: u64) -> Value {
        Value::new_constant(context, Constant::new_uint(nbits, value))
    }

    pub fn get_string(context: &mut Context, value: String) -> Value {
        Value::new_constant(context, Constant::new_string(value))
    }

    pub fn get_gep(context: &mut Context, base: Value) -> Value {
        Value::new_constant(context, Constant::new_gep(base))
    }
}

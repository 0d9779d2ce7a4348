//! Taint tokens: the source-or-sink records tracked by the analysis.

use std::collections::{BTreeMap, BTreeSet};

use crate::{function::Function, value::Value};

/// The argument index denoting a function's return value.
pub const RETVAL_INDEX: i32 = -1;

/// The category tag of a source or sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Not sensitive (also the tag of summary placeholders).
    #[default]
    Null,
    /// General sensitive data.
    Main,
    /// A file resource (a `FILE*`, a filename).
    File,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Category::Null => "null",
            Category::Main => "main",
            Category::File => "file",
        }
    }
}

/// An interned reference to a wrapped inner token; see
/// [`TokenInterner`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WrappedRef(u32);

/// A source-or-sink record.
///
/// Interpretation, following the combination of fields:
///
/// - `call_site` set, `arg_index >= 0`: a concrete source/sink occurrence at
///   a system-API argument.
/// - `call_site` set, `arg_index == -1`: a concrete source at a system-API
///   return value.
/// - `call_site` unset, `constant` unset: a *summary token*, standing for
///   "this function's parameter (or return value)" inside a summary.
/// - `constant` set: an auxiliary token identifying a literal string
///   resource, e.g. a filename constant.
///
/// `wrapped` preserves one level of indirection when a wrapper function
/// intervenes between a caller and the true system API.
///
/// Equality and ordering are structural over all fields; `wrapped` refers to
/// an interned token, so nested comparisons stay stable across re-wraps at
/// different call sites.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaintToken {
    pub func: Option<Function>,
    /// 0-indexed; [`RETVAL_INDEX`] denotes the return value.
    pub arg_index: i32,
    pub call_site: Option<Value>,
    pub category: Category,
    pub wrapped: Option<WrappedRef>,
    pub constant: Option<Value>,
}

impl TaintToken {
    /// A summary placeholder for `func`'s parameter `arg_index` (or return
    /// value).
    pub fn summary(func: Function, arg_index: i32) -> TaintToken {
        TaintToken {
            func: Some(func),
            arg_index,
            call_site: None,
            category: Category::Null,
            wrapped: None,
            constant: None,
        }
    }

    /// A concrete source/sink occurrence at a call site.
    pub fn concrete(
        func: Function,
        arg_index: i32,
        call_site: Value,
        category: Category,
    ) -> TaintToken {
        TaintToken {
            func: Some(func),
            arg_index,
            call_site: Some(call_site),
            category,
            wrapped: None,
            constant: None,
        }
    }

    /// An auxiliary token for a literal string resource.
    pub fn aux_constant(constant: Value) -> TaintToken {
        TaintToken {
            func: None,
            arg_index: 0,
            call_site: None,
            category: Category::Main,
            wrapped: None,
            constant: Some(constant),
        }
    }

    /// Whether this is a summary placeholder rather than a concrete
    /// occurrence or an auxiliary constant.
    pub fn is_summary(&self) -> bool {
        self.call_site.is_none() && self.constant.is_none()
    }
}

/// A set of taint tokens; ordered for deterministic iteration.
pub type TokenSet = BTreeSet<TaintToken>;

/// Deduplication table for tokens referenced through
/// [`TaintToken::wrapped`].
#[derive(Default)]
pub struct TokenInterner {
    tokens: Vec<TaintToken>,
    ids: BTreeMap<TaintToken, WrappedRef>,
}

impl TokenInterner {
    pub fn intern(&mut self, token: TaintToken) -> WrappedRef {
        if let Some(id) = self.ids.get(&token) {
            return *id;
        }
        let id = WrappedRef(self.tokens.len() as u32);
        self.tokens.push(token);
        self.ids.insert(token, id);
        id
    }

    pub fn resolve(&self, id: WrappedRef) -> TaintToken {
        self.tokens[id.0 as usize]
    }
}

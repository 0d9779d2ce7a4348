//! Structured metadata attached to values.
//!
//! Each value carries a mutable dictionary keyed by string, mapping to
//! [`Metadatum`]s held in the [`Context`] arena.  Metadata describe
//! properties which aren't required for execution but are consumed by
//! downstream introspective tools; the CFG annotator persists its results
//! here under the `JumpID`, `MergeEdges` and `CondPaths` keys.

use std::sync::Arc;

use crate::context::Context;

/// A source location: file, line and column.
///
/// Attached to values separately from the keyed metadata dictionary, the way
/// debug info rides alongside ordinary metadata in the source IR.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebugLoc {
    pub file: Arc<str>,
    pub line: u32,
    pub col: u32,
}

impl DebugLoc {
    pub fn new(file: &str, line: u32, col: u32) -> DebugLoc {
        DebugLoc {
            file: Arc::from(file),
            line,
            col,
        }
    }
}

/// A single metadata node: an integer or a list of other nodes.
///
/// An edge `(jump_id, succ_idx)` is encoded as a two-element integer list;
/// `MergeEdges` is a list of lists of edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadatum {
    Integer(u64),
    List(Vec<MetadataIndex>),
}

/// A handle to a [`Metadatum`] in the context arena.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct MetadataIndex(pub generational_arena::Index);

impl MetadataIndex {
    /// Create an integer metadatum.
    pub fn integer(context: &mut Context, n: u64) -> MetadataIndex {
        MetadataIndex(context.metadata.insert(Metadatum::Integer(n)))
    }

    /// Create a list metadatum from existing nodes.
    pub fn list(context: &mut Context, els: Vec<MetadataIndex>) -> MetadataIndex {
        MetadataIndex(context.metadata.insert(Metadatum::List(els)))
    }

    /// Return the integer payload, if this is an integer node.
    pub fn get_integer(&self, context: &Context) -> Option<u64> {
        match &context.metadata[self.0] {
            Metadatum::Integer(n) => Some(*n),
            _otherwise => None,
        }
    }

    /// Return the element list, if this is a list node.
    pub fn get_list<'a>(&self, context: &'a Context) -> Option<&'a [MetadataIndex]> {
        match &context.metadata[self.0] {
            Metadatum::List(els) => Some(els),
            _otherwise => None,
        }
    }

    /// Decode a two-element integer list into an `(integer, integer)` pair.
    ///
    /// This is the encoding used for control-flow edges in the annotator
    /// metadata.
    pub fn get_integer_pair(&self, context: &Context) -> Option<(u64, u64)> {
        match self.get_list(context)? {
            [fst, snd] => Some((fst.get_integer(context)?, snd.get_integer(context)?)),
            _otherwise => None,
        }
    }
}

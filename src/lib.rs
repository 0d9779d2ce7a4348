//! An IR-level static-analysis toolkit for C-family programs lowered to an
//! SSA form: basic blocks of typed instructions with phi-nodes, calls, loads,
//! stores, GEPs, branches and returns.
//!
//! Two analyses are provided as passes over the IR:
//!
//! - `condmerge` classifies the edges reachable from every conditional branch
//!   into interior edges and *merge edges* (edges crossing back to converged
//!   control flow), and annotates the IR with `JumpID`, `MergeEdges` and
//!   `CondPaths` metadata.  `print-merge-edges` renders the annotations.
//! - [`taint`] runs a flow-sensitive, summary-based interprocedural taint
//!   analysis driven by external specification files naming sensitive
//!   sources, sinks, taint copiers and wrapper functions.
//!
//! The IR itself lives in a [`Context`] of arenas and is manipulated through
//! cheap `Copy` handles ([`Module`], [`Function`], [`Block`], [`Value`]).  A
//! textual form with a printer and parser is provided, useful mostly for
//! testing.

pub mod analysis;
pub mod block;
pub mod condmerge;
pub mod constant;
pub mod context;
pub mod error;
pub mod function;
pub mod global_var;
pub mod instruction;
pub mod irtype;
pub mod metadata;
pub mod module;
pub mod parser;
pub mod pass_manager;
pub mod printer;
pub mod taint;
pub mod value;

pub use analysis::*;
pub use block::*;
pub use condmerge::*;
pub use constant::*;
pub use context::*;
pub use error::*;
pub use function::*;
pub use global_var::*;
pub use instruction::*;
pub use irtype::*;
pub use metadata::*;
pub use module::*;
pub use pass_manager::*;
pub use value::*;

use std::hash::BuildHasherDefault;

pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
pub type FxIndexSet<T> = indexmap::IndexSet<T, BuildHasherDefault<rustc_hash::FxHasher>>;

//! Flow-sensitive, summary-based interprocedural taint analysis.
//!
//! Sensitive *sources* and *sinks* are declared for external routines in
//! specification files ([`spec`]).  The [`driver`] computes a summary per
//! function over a worklist ordered leaves-first, plugging callee summaries
//! in at call sites; the per-instruction transfer function tracks taint
//! through an alias-aware map ([`map`]) with a phi-based alias abstraction
//! and a process-wide global-variable side channel.  [`report`] renders the
//! resulting summaries and end-to-end flows.

pub mod driver;
pub mod map;
pub mod report;
pub mod spec;
pub mod token;
pub mod transfer;

pub use driver::*;
pub use map::*;
pub use report::*;
pub use spec::*;
pub use token::*;
pub use transfer::*;

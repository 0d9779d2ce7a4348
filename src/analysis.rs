pub mod dominator;
pub mod postdominator;

pub use dominator::*;
pub use postdominator::*;

//! Stack-variable reconstruction over lifted IR.
//!
//! Runs after control-flow decoding: a reaching-definitions analysis feeds a
//! symbolic evaluator that folds frame-pointer-relative pointer expressions
//! to constant offsets, and memory accesses at folded offsets are rewritten
//! to named stack slots.

mod rda;
mod stack;
mod symbolic;

pub use rda::*;
pub use stack::*;
pub use symbolic::*;

//! Recursive control-flow decoding from a binary image into IR.
//!
//! The decoder pops jump targets off a priority worklist, translates machine
//! instructions through an [`InstructionLifter`], and materializes functions
//! and basic blocks on demand, splitting already-decoded ones when a later
//! target lands inside them.

mod abi;
mod config;
mod debuginfo;
mod decoder;
mod dump;
mod index;
mod jump_target;
mod lift;
mod pseudo;
pub mod testing;

pub use abi::*;
pub use config::*;
pub use debuginfo::*;
pub use decoder::*;
pub use dump::*;
pub use index::*;
pub use jump_target::*;
pub use lift::*;
pub use pseudo::*;

//! Intermediate representation for the relift decoder.
//!
//! This crate provides the IR types only; lifting machine instructions into
//! the IR is the job of an `InstructionLifter` implementation, and address
//! bookkeeping is the decoder's.

mod cursor;
mod display;
mod inst;
mod modifier;
mod module;
mod ty;
mod value;

pub use cursor::*;
pub use inst::*;
pub use modifier::*;
pub use module::*;
pub use ty::*;
pub use value::*;

//! relift - program structure reconstruction from raw executable images.
//!
//! The core is a recursive control-flow decoder: given a loaded image and a
//! single-instruction lifter, it discovers functions and basic blocks by
//! draining a priority worklist of jump targets, then a stack pass rewrites
//! frame-relative memory accesses into named stack slots.
//!
//! # Example
//!
//! ```
//! use relift::testing::{x86_config, X86SubsetLifter};
//! use relift::{Address, Pipeline, RawImage};
//!
//! // push ebp; mov ebp, esp; pop ebp; ret
//! let image = RawImage::with_code(Address::new(0x1000), vec![0x55, 0x89, 0xe5, 0x5d, 0xc3]);
//! let config = x86_config();
//! let mut lifter = X86SubsetLifter::new();
//!
//! let mut pipeline = Pipeline::new(&image, &config);
//! pipeline.decode(&mut lifter).unwrap();
//! pipeline.reconstruct_stack().unwrap();
//! println!("{}", pipeline.dump_ir().unwrap());
//! ```

// Re-export from sub-crates
pub use relift_decode::{
    control_flow_dump, control_flow_json, Abi, AddressIndex, CfgBlockDump, CfgFunctionDump,
    Config, DebugFunction, DebugInfo, DebugVariable, DecodeError, DecodeResult, Decoder,
    InstructionLifter, JumpTarget, JumpTargetKind, JumpTargetQueue, LiftError, MachineInsn, Mode,
    PseudoWorklist, RegisterInfo, Storage, Translated,
};
pub use relift_decode::testing;
pub use relift_image::{Address, AddressRange, Image, ImageError, RangeSet, RawImage, Section};
pub use relift_ir::{
    BinOp, Block, BlockId, CalleeSlot, CastOp, Cursor, Function, FunctionId, Inst, InstId,
    InstKind, IrModifier, Module, RegId, SlotId, StackSlot, TargetSlot, Ty, Value,
};
pub use relift_stack::{ReachingDefinitions, StackAnalysis, SymbolicTree, Val2Val};

mod pipeline;
pub use pipeline::*;

use thiserror::Error;

/// Top-level errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("image error: {0}")]
    Image(#[from] ImageError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("module not decoded: call decode before {0}")]
    NotDecoded(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Single-instruction lifter interface.

use thiserror::Error;

use relift_image::Address;
use relift_ir::{Cursor, InstId, Module};

use crate::abi::MachineInsn;
use crate::config::Mode;

/// Translation failures. All of them are recoverable for the decoder: the
/// current block is closed and decoding continues with other jump targets.
#[derive(Error, Debug)]
pub enum LiftError {
    #[error("unknown opcode {opcode:#04x} at {address}")]
    UnknownOpcode { opcode: u8, address: Address },
    #[error("truncated instruction at {address}")]
    Truncated { address: Address },
    #[error("no bytes to translate at {address}")]
    Empty { address: Address },
}

/// Outcome of translating a single machine instruction.
#[derive(Clone, Debug)]
pub struct Translated {
    /// First IR instruction emitted for the machine instruction.
    pub first: InstId,
    /// The control-transfer instruction, when one was emitted. Its kind
    /// (`Call`/`Ret`/`Br`/`CondBr`) classifies the transfer.
    pub control: Option<InstId>,
    /// Bytes consumed.
    pub size: usize,
    /// Raw machine instruction record.
    pub insn: MachineInsn,
}

/// Translates one machine instruction at a time into IR.
///
/// Control transfers are emitted as tagged nodes with unresolved target
/// slots; the decoder resolves them as their targets materialize.
pub trait InstructionLifter {
    fn translate_one(
        &mut self,
        bytes: &[u8],
        addr: Address,
        mode: Mode,
        module: &mut Module,
        cursor: &mut Cursor,
    ) -> Result<Translated, LiftError>;
}

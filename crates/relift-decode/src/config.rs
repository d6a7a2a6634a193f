//! Decoder configuration.

use relift_image::Address;
use relift_ir::{RegId, Value};

/// Opaque per-architecture decoder mode tag (e.g. ARM vs Thumb). Attached to
/// every jump target so decoding can be re-entered correctly; the decoder
/// itself only threads it through to the lifter.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Mode(pub u16);

impl Mode {
    pub const DEFAULT: Mode = Mode(0);
}

/// A named ABI register.
#[derive(Clone, Debug)]
pub struct RegisterInfo {
    pub id: RegId,
    pub name: String,
    pub bits: u16,
}

impl RegisterInfo {
    pub fn new(id: RegId, name: &str, bits: u16) -> Self {
        Self {
            id,
            name: name.to_string(),
            bits,
        }
    }
}

/// Input configuration for one decode run.
#[derive(Clone, Debug)]
pub struct Config {
    /// Register set of the target architecture.
    pub registers: Vec<RegisterInfo>,
    /// Stack pointer register.
    pub sp: RegId,
    /// Architecture mode used for seeds.
    pub mode: Mode,
    /// Extra entry points beyond the image's own.
    pub entry_points: Vec<Address>,
    /// User-specified function start addresses.
    pub function_starts: Vec<Address>,
    /// Addresses of exported symbols.
    pub exports: Vec<Address>,
}

impl Config {
    pub fn new(registers: Vec<RegisterInfo>, sp: RegId) -> Self {
        Self {
            registers,
            sp,
            mode: Mode::DEFAULT,
            entry_points: Vec::new(),
            function_starts: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Check if a value reads or names the stack pointer register.
    pub fn is_stack_pointer(&self, value: Value) -> bool {
        matches!(value, Value::Reg(r) if r == self.sp)
    }
}

//! Optional debug-info provider.

use rustc_hash::FxHashMap;

use relift_image::Address;
use relift_ir::{RegId, Ty};

/// Where a debug variable lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Storage {
    Stack(i64),
    Register(RegId),
    Global(Address),
}

/// A local variable from debug info.
#[derive(Clone, Debug)]
pub struct DebugVariable {
    pub name: String,
    pub ty: Ty,
    pub storage: Storage,
}

impl DebugVariable {
    /// Frame offset, when the variable is declared on the stack.
    pub fn stack_offset(&self) -> Option<i64> {
        match self.storage {
            Storage::Stack(offset) => Some(offset),
            _ => None,
        }
    }
}

/// Debug information for one function.
#[derive(Clone, Debug)]
pub struct DebugFunction {
    pub address: Address,
    pub name: String,
    pub locals: Vec<DebugVariable>,
}

/// Debug information for a module, keyed by function address.
#[derive(Clone, Debug, Default)]
pub struct DebugInfo {
    functions: FxHashMap<Address, DebugFunction>,
}

impl DebugInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, function: DebugFunction) {
        self.functions.insert(function.address, function);
    }

    pub fn function_at(&self, address: Address) -> Option<&DebugFunction> {
        self.functions.get(&address)
    }
}

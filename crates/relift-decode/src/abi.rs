//! ABI information: registers and instruction classification.

use relift_image::Address;
use relift_ir::{RegId, Value};

use crate::config::{Config, RegisterInfo};

/// Raw record of one lifted machine instruction.
#[derive(Clone, Debug)]
pub struct MachineInsn {
    pub address: Address,
    pub size: usize,
    pub bytes: Vec<u8>,
}

/// ABI provider: register table, stack-pointer identity, NOP recognition.
#[derive(Clone, Debug)]
pub struct Abi {
    registers: Vec<RegisterInfo>,
    sp: RegId,
    /// Byte patterns recognized as NOP instructions.
    nops: Vec<Vec<u8>>,
}

impl Abi {
    /// Build from the decode configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            registers: config.registers.clone(),
            sp: config.sp,
            nops: Vec::new(),
        }
    }

    /// Register NOP byte patterns for `is_nop`.
    pub fn with_nops(mut self, nops: Vec<Vec<u8>>) -> Self {
        self.nops = nops;
        self
    }

    /// Look up a register by id.
    pub fn register(&self, id: RegId) -> Option<&RegisterInfo> {
        self.registers.iter().find(|r| r.id == id)
    }

    pub fn stack_pointer(&self) -> RegId {
        self.sp
    }

    /// Check if a value names a known register.
    pub fn is_register(&self, value: Value) -> bool {
        matches!(value, Value::Reg(r) if self.register(r).is_some())
    }

    pub fn is_stack_pointer(&self, value: Value) -> bool {
        matches!(value, Value::Reg(r) if r == self.sp)
    }

    /// Check if a lifted machine instruction is a NOP. NOPs are still lifted;
    /// later passes may remove them.
    pub fn is_nop(&self, insn: &MachineInsn) -> bool {
        self.nops.iter().any(|n| n[..] == insn.bytes[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abi() -> Abi {
        let config = Config::new(
            vec![
                RegisterInfo::new(RegId(0), "eax", 32),
                RegisterInfo::new(RegId(4), "esp", 32),
            ],
            RegId(4),
        );
        Abi::from_config(&config).with_nops(vec![vec![0x90]])
    }

    #[test]
    fn test_register_lookup() {
        let abi = abi();
        assert_eq!(abi.register(RegId(0)).unwrap().name, "eax");
        assert!(abi.register(RegId(9)).is_none());
        assert!(abi.is_register(Value::Reg(RegId(4))));
        assert!(!abi.is_register(Value::Reg(RegId(9))));
        assert!(abi.is_stack_pointer(Value::Reg(RegId(4))));
    }

    #[test]
    fn test_is_nop() {
        let abi = abi();
        let nop = MachineInsn {
            address: Address::new(0x1000),
            size: 1,
            bytes: vec![0x90],
        };
        let ret = MachineInsn {
            address: Address::new(0x1001),
            size: 1,
            bytes: vec![0xc3],
        };
        assert!(abi.is_nop(&nop));
        assert!(!abi.is_nop(&ret));
    }
}

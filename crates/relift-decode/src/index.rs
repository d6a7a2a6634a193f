//! Bidirectional address ↔ IR indices.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use relift_image::Address;
use relift_ir::{BlockId, FunctionId, InstId, Module};

/// Ordered maps between addresses and IR entities, with nearest-below
/// lookups. The address-keyed sides are `BTreeMap`s because the decoder needs
/// `upper_bound`-style queries; the reverse sides are hash maps.
#[derive(Default, Debug)]
pub struct AddressIndex {
    addr2fnc: BTreeMap<Address, FunctionId>,
    fnc2addr: FxHashMap<FunctionId, Address>,
    addr2bb: BTreeMap<Address, BlockId>,
    bb2addr: FxHashMap<BlockId, Address>,
    addr2inst: BTreeMap<Address, InstId>,
    inst2addr: FxHashMap<InstId, Address>,
}

impl AddressIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- registration -----

    pub fn record_function(&mut self, address: Address, function: FunctionId) {
        debug_assert!(address.is_defined());
        debug_assert!(!self.addr2fnc.contains_key(&address));
        self.addr2fnc.insert(address, function);
        self.fnc2addr.insert(function, address);
    }

    pub fn record_block(&mut self, address: Address, block: BlockId) {
        debug_assert!(address.is_defined());
        self.addr2bb.insert(address, block);
        self.bb2addr.insert(block, address);
    }

    pub fn record_inst(&mut self, address: Address, inst: InstId) {
        debug_assert!(address.is_defined());
        self.addr2inst.insert(address, inst);
        self.inst2addr.insert(inst, address);
    }

    // ----- exact lookups -----

    pub fn function_at(&self, address: Address) -> Option<FunctionId> {
        self.addr2fnc.get(&address).copied()
    }

    pub fn block_at(&self, address: Address) -> Option<BlockId> {
        self.addr2bb.get(&address).copied()
    }

    pub fn inst_at(&self, address: Address) -> Option<InstId> {
        self.addr2inst.get(&address).copied()
    }

    pub fn function_address(&self, function: FunctionId) -> Address {
        self.fnc2addr
            .get(&function)
            .copied()
            .unwrap_or(Address::UNDEFINED)
    }

    pub fn block_address(&self, block: BlockId) -> Address {
        self.bb2addr
            .get(&block)
            .copied()
            .unwrap_or(Address::UNDEFINED)
    }

    pub fn inst_address(&self, inst: InstId) -> Address {
        self.inst2addr
            .get(&inst)
            .copied()
            .unwrap_or(Address::UNDEFINED)
    }

    // ----- nearest-below lookups -----

    /// The last function starting at or before `address`.
    pub fn function_before(&self, address: Address) -> Option<FunctionId> {
        if address.is_undefined() {
            return None;
        }
        self.addr2fnc
            .range(..=address)
            .next_back()
            .map(|(_, &f)| f)
    }

    /// The last block starting at or before `address`.
    pub fn block_before(&self, address: Address) -> Option<BlockId> {
        if address.is_undefined() {
            return None;
        }
        self.addr2bb.range(..=address).next_back().map(|(_, &b)| b)
    }

    /// Address of the last lifted instruction of `function`; the function's
    /// own address when it has none.
    pub fn function_end(&self, module: &Module, function: FunctionId) -> Address {
        for &bb in module.function(function).blocks().iter().rev() {
            for &inst in module.block(bb).insts().iter().rev() {
                let addr = self.inst_address(inst);
                if addr.is_defined() {
                    return addr;
                }
            }
        }
        self.function_address(function)
    }

    /// Address of the last lifted instruction of `block`; the block's own
    /// address when it has none.
    pub fn block_end(&self, module: &Module, block: BlockId) -> Address {
        for &inst in module.block(block).insts().iter().rev() {
            let addr = self.inst_address(inst);
            if addr.is_defined() {
                return addr;
            }
        }
        self.block_address(block)
    }

    /// The function whose decoded span contains `address`: the nearest
    /// function below, when its last-instruction address lies past `address`.
    pub fn function_containing(&self, module: &Module, address: Address) -> Option<FunctionId> {
        let f = self.function_before(address)?;
        let end = self.function_end(module, f);
        (address.is_defined() && end.is_defined() && address < end).then_some(f)
    }

    /// The block whose decoded span contains `address`.
    pub fn block_containing(&self, module: &Module, address: Address) -> Option<BlockId> {
        let b = self.block_before(address)?;
        let end = self.block_end(module, b);
        (address.is_defined() && end.is_defined() && address < end).then_some(b)
    }

    /// Functions in ascending address order.
    pub fn functions(&self) -> impl Iterator<Item = (Address, FunctionId)> + '_ {
        self.addr2fnc.iter().map(|(&a, &f)| (a, f))
    }

    /// Check the mutual-inverse invariant of both index pairs.
    pub fn verify(&self) -> bool {
        self.addr2fnc.len() == self.fnc2addr.len()
            && self
                .addr2fnc
                .iter()
                .all(|(a, f)| self.fnc2addr.get(f) == Some(a))
            && self.addr2bb.len() == self.bb2addr.len()
            && self
                .addr2bb
                .iter()
                .all(|(a, b)| self.bb2addr.get(b) == Some(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relift_ir::InstKind;

    #[test]
    fn test_mutual_inverse() {
        let mut m = Module::new();
        let f = m.create_function("f", None);
        let b = m.create_block(f, "bb", None);
        let mut idx = AddressIndex::new();
        idx.record_function(Address::new(0x1000), f);
        idx.record_block(Address::new(0x1000), b);
        assert!(idx.verify());
        assert_eq!(idx.function_at(Address::new(0x1000)), Some(f));
        assert_eq!(idx.function_address(f), Address::new(0x1000));
    }

    #[test]
    fn test_before_lookups() {
        let mut m = Module::new();
        let f1 = m.create_function("f1", None);
        let f2 = m.create_function("f2", Some(f1));
        let mut idx = AddressIndex::new();
        idx.record_function(Address::new(0x1000), f1);
        idx.record_function(Address::new(0x2000), f2);

        assert_eq!(idx.function_before(Address::new(0x0fff)), None);
        assert_eq!(idx.function_before(Address::new(0x1000)), Some(f1));
        assert_eq!(idx.function_before(Address::new(0x1fff)), Some(f1));
        assert_eq!(idx.function_before(Address::new(0x2000)), Some(f2));
        assert_eq!(idx.function_before(Address::new(0x9000)), Some(f2));
    }

    #[test]
    fn test_containing() {
        let mut m = Module::new();
        let f = m.create_function("f", None);
        let b = m.create_block(f, "bb", None);
        let i0 = m.append_inst(b, InstKind::Nop, Address::new(0x1000));
        let i1 = m.append_inst(b, InstKind::Nop, Address::new(0x1004));

        let mut idx = AddressIndex::new();
        idx.record_function(Address::new(0x1000), f);
        idx.record_block(Address::new(0x1000), b);
        idx.record_inst(Address::new(0x1000), i0);
        idx.record_inst(Address::new(0x1004), i1);

        assert_eq!(idx.function_end(&m, f), Address::new(0x1004));
        assert_eq!(idx.function_containing(&m, Address::new(0x1002)), Some(f));
        // End address is the last instruction itself; it does not "contain".
        assert_eq!(idx.function_containing(&m, Address::new(0x1004)), None);
        assert_eq!(idx.function_containing(&m, Address::new(0x2000)), None);
    }
}

//! Insertion cursor for lifted IR.

use relift_image::Address;

use crate::inst::InstKind;
use crate::module::Module;
use crate::value::{BlockId, InstId};

/// An insertion point: a block and a position within it.
///
/// The lifter emits IR through a cursor; each emitted instruction advances
/// the position, so consecutive emissions stay in order even when decoding
/// resumes in the middle of a block (after a call).
#[derive(Clone, Copy, Debug)]
pub struct Cursor {
    block: BlockId,
    at: usize,
}

impl Cursor {
    /// Cursor at the end of `block`.
    pub fn at_end(module: &Module, block: BlockId) -> Self {
        Self {
            block,
            at: module.block(block).insts().len(),
        }
    }

    /// Cursor right after `inst`, in the same block.
    pub fn after_inst(module: &Module, inst: InstId) -> Self {
        let (block, at) = module.position_of(inst);
        Self { block, at: at + 1 }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Insert an instruction at the cursor and advance past it.
    pub fn emit(&mut self, module: &mut Module, kind: InstKind, address: Address) -> InstId {
        let id = module.insert_inst(self.block, self.at, kind, address);
        self.at += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::InstKind;

    #[test]
    fn test_emit_in_order() {
        let mut m = Module::new();
        let f = m.create_function("f", None);
        let b = m.create_block(f, "bb", None);
        let mut cur = Cursor::at_end(&m, b);
        let i0 = cur.emit(&mut m, InstKind::Nop, Address::new(0x1000));
        let i1 = cur.emit(&mut m, InstKind::Nop, Address::new(0x1001));
        assert_eq!(m.block(b).insts(), &[i0, i1]);
    }

    #[test]
    fn test_after_inst_inserts_between() {
        let mut m = Module::new();
        let f = m.create_function("f", None);
        let b = m.create_block(f, "bb", None);
        let i0 = m.append_inst(b, InstKind::Nop, Address::new(0x1000));
        let i2 = m.append_inst(b, InstKind::Nop, Address::new(0x1005));

        let mut cur = Cursor::after_inst(&m, i0);
        let i1 = cur.emit(&mut m, InstKind::Nop, Address::new(0x1001));
        assert_eq!(m.block(b).insts(), &[i0, i1, i2]);
    }
}

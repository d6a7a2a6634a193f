//! IR module: arenas of functions, blocks, instructions, and stack slots.

use relift_image::Address;

use crate::inst::{Inst, InstKind, TargetSlot};
use crate::ty::Ty;
use crate::value::{BlockId, FunctionId, InstId, SlotId, Value};

/// A decoded function: a name and an ordered list of blocks.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub(crate) blocks: Vec<BlockId>,
}

impl Function {
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Entry block, if any block has been created yet.
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}

/// A basic block: a name, its parent function, and ordered instructions.
#[derive(Clone, Debug)]
pub struct Block {
    pub name: String,
    pub(crate) function: FunctionId,
    pub(crate) insts: Vec<InstId>,
}

impl Block {
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    pub fn function(&self) -> FunctionId {
        self.function
    }

    pub fn last_inst(&self) -> Option<InstId> {
        self.insts.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

/// A named local memory object at a fixed frame offset.
#[derive(Clone, Debug)]
pub struct StackSlot {
    pub function: FunctionId,
    pub offset: i64,
    pub ty: Ty,
    pub name: String,
    pub from_debug: bool,
}

/// The IR module. Owns every function, block, instruction, and stack slot;
/// everything else refers to them through ids, which stay valid across block
/// and function splits.
#[derive(Clone, Debug, Default)]
pub struct Module {
    funcs: Vec<Function>,
    blocks: Vec<Block>,
    insts: Vec<Inst>,
    slots: Vec<StackSlot>,
    /// Function layout order (address order, maintained by the decoder
    /// through `insert_after`).
    layout: Vec<FunctionId>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- accessors -----

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.funcs[id.index()]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.funcs[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.index()]
    }

    pub fn slot(&self, id: SlotId) -> &StackSlot {
        &self.slots[id.index()]
    }

    /// Functions in layout order.
    pub fn functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.layout.iter().copied()
    }

    pub fn num_functions(&self) -> usize {
        self.funcs.len()
    }

    pub fn has_functions(&self) -> bool {
        !self.funcs.is_empty()
    }

    // ----- construction -----

    /// Create a function, placed after `insert_after` in layout order, or
    /// first when `None`.
    pub fn create_function(&mut self, name: &str, insert_after: Option<FunctionId>) -> FunctionId {
        let id = FunctionId(self.funcs.len() as u32);
        self.funcs.push(Function {
            name: name.to_string(),
            blocks: Vec::new(),
        });
        match insert_after.and_then(|f| self.layout.iter().position(|&x| x == f)) {
            Some(pos) => self.layout.insert(pos + 1, id),
            None => self.layout.insert(0, id),
        }
        id
    }

    /// Create a block in `function`, placed after `insert_after`, or at the
    /// end of the function when `None`.
    pub fn create_block(
        &mut self,
        function: FunctionId,
        name: &str,
        insert_after: Option<BlockId>,
    ) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            name: name.to_string(),
            function,
            insts: Vec::new(),
        });
        let blocks = &mut self.funcs[function.index()].blocks;
        match insert_after.and_then(|b| blocks.iter().position(|&x| x == b)) {
            Some(pos) => blocks.insert(pos + 1, id),
            None => blocks.push(id),
        }
        id
    }

    /// Append an instruction to `block`.
    pub fn append_inst(&mut self, block: BlockId, kind: InstKind, address: Address) -> InstId {
        let at = self.blocks[block.index()].insts.len();
        self.insert_inst(block, at, kind, address)
    }

    /// Insert an instruction into `block` at position `at`.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        at: usize,
        kind: InstKind,
        address: Address,
    ) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(Inst {
            kind,
            address,
            block,
        });
        self.blocks[block.index()].insts.insert(at, id);
        id
    }

    /// Position of an instruction within its block.
    pub fn position_of(&self, inst: InstId) -> (BlockId, usize) {
        let block = self.insts[inst.index()].block;
        let at = self.blocks[block.index()]
            .insts
            .iter()
            .position(|&i| i == inst)
            .expect("instruction listed in its parent block");
        (block, at)
    }

    // ----- splitting -----

    /// Split `block` before the instruction at position `at`. The tail moves
    /// into a new block named `name`, inserted right after `block`, and the
    /// old block is terminated with a branch to it. Splitting at position 0
    /// is a no-op that returns `block` itself.
    pub fn split_block(&mut self, block: BlockId, at: usize, name: &str) -> BlockId {
        if at == 0 {
            return block;
        }
        let function = self.blocks[block.index()].function;
        let new_bb = self.create_block(function, name, Some(block));

        let tail: Vec<InstId> = self.blocks[block.index()].insts.split_off(at);
        for &i in &tail {
            self.insts[i.index()].block = new_bb;
        }
        self.blocks[new_bb.index()].insts = tail;

        // Retarget the old block into the new one.
        self.append_inst(
            block,
            InstKind::Br {
                target: Value::Undef,
                dest: TargetSlot::Block(new_bb),
            },
            Address::UNDEFINED,
        );
        new_bb
    }

    /// Split a function before `at_block`: that block and every block after
    /// it in layout order move into a new function named `name`, placed
    /// right after the old one.
    pub fn split_function(&mut self, at_block: BlockId, name: &str) -> FunctionId {
        let old_fn = self.blocks[at_block.index()].function;
        let pos = self.funcs[old_fn.index()]
            .blocks
            .iter()
            .position(|&b| b == at_block)
            .expect("block listed in its parent function");

        let moved: Vec<BlockId> = self.funcs[old_fn.index()].blocks.split_off(pos);
        let new_fn = self.create_function(name, Some(old_fn));
        for &b in &moved {
            self.blocks[b.index()].function = new_fn;
        }
        self.funcs[new_fn.index()].blocks = moved;
        new_fn
    }

    // ----- stack slots -----

    /// Existing slot for `(function, offset, ty)`, if any.
    pub fn find_slot(&self, function: FunctionId, offset: i64, ty: &Ty) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|s| s.function == function && s.offset == offset && s.ty == *ty)
            .map(|i| SlotId(i as u32))
    }

    pub fn add_slot(&mut self, slot: StackSlot) -> SlotId {
        let id = SlotId(self.slots.len() as u32);
        self.slots.push(slot);
        id
    }

    /// Slots belonging to `function`, in creation order.
    pub fn slots_of(&self, function: FunctionId) -> impl Iterator<Item = SlotId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.function == function)
            .map(|(i, _)| SlotId(i as u32))
    }

    // ----- rewriting -----

    /// Replace every use of `from` with `to` in `function`, skipping the
    /// instructions in `skip`.
    pub fn replace_uses(&mut self, function: FunctionId, from: Value, to: Value, skip: &[InstId]) {
        let insts: Vec<InstId> = self.funcs[function.index()]
            .blocks
            .iter()
            .flat_map(|&b| self.blocks[b.index()].insts.iter().copied())
            .collect();
        for i in insts {
            if skip.contains(&i) {
                continue;
            }
            self.insts[i.index()].kind.for_each_value_mut(|v| {
                if *v == from {
                    *v = to;
                }
            });
        }
    }

    // ----- control flow -----

    /// Successor blocks, from the block's terminating instruction.
    pub fn block_successors(&self, block: BlockId) -> Vec<BlockId> {
        let Some(last) = self.blocks[block.index()].last_inst() else {
            return Vec::new();
        };
        match &self.insts[last.index()].kind {
            InstKind::Br {
                dest: TargetSlot::Block(b),
                ..
            } => vec![*b],
            InstKind::CondBr { taken, fall, .. } => {
                let mut succs = Vec::new();
                if let TargetSlot::Block(b) = taken {
                    succs.push(*b);
                }
                if let TargetSlot::Block(b) = fall {
                    succs.push(*b);
                }
                succs
            }
            _ => Vec::new(),
        }
    }
}

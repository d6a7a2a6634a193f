//! The control-flow decoder.

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

use relift_image::{Address, AddressRange, Image, RangeSet};
use relift_ir::{BlockId, Cursor, FunctionId, InstId, InstKind, Module, Value};

use crate::abi::{Abi, MachineInsn};
use crate::config::{Config, Mode};
use crate::index::AddressIndex;
use crate::jump_target::{JumpTarget, JumpTargetKind, JumpTargetQueue};
use crate::lift::InstructionLifter;
use crate::pseudo::PseudoWorklist;

/// Decoder failures.
///
/// `Invariant` is fatal for the run: it reports an index or control-flow
/// inconsistency that valid input cannot produce. Lifter failures are not
/// errors at this level; they close the current block and decoding goes on.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image has no executable sections")]
    NoExecutableSections,
    #[error("no entry points to decode")]
    NoEntryPoints,
    #[error("decoder invariant violated at {address}: {detail}")]
    Invariant { address: Address, detail: String },
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Everything one decode run produced.
#[derive(Debug)]
pub struct DecodeResult {
    pub module: Module,
    pub index: AddressIndex,
    /// Raw machine instruction records, keyed by the first IR instruction
    /// lifted from each.
    pub insns: FxHashMap<InstId, MachineInsn>,
    /// Control transfers whose constant targets could not be decoded.
    pub unresolved: Vec<InstId>,
}

/// One decode context: owns all mutable state of a run. No process-wide
/// registries; everything is threaded through this value.
pub struct Decoder<'a> {
    image: &'a dyn Image,
    config: &'a Config,
    abi: &'a Abi,
    lifter: &'a mut dyn InstructionLifter,
    module: Module,
    allowed: RangeSet,
    alternative: RangeSet,
    targets: JumpTargetQueue,
    pseudo: PseudoWorklist,
    index: AddressIndex,
    insns: FxHashMap<InstId, MachineInsn>,
}

impl<'a> Decoder<'a> {
    pub fn new(
        image: &'a dyn Image,
        config: &'a Config,
        abi: &'a Abi,
        lifter: &'a mut dyn InstructionLifter,
    ) -> Self {
        Self {
            image,
            config,
            abi,
            lifter,
            module: Module::new(),
            allowed: RangeSet::new(),
            alternative: RangeSet::new(),
            targets: JumpTargetQueue::new(),
            pseudo: PseudoWorklist::new(),
            index: AddressIndex::new(),
            insns: FxHashMap::default(),
        }
    }

    /// Run the full decode: seed ranges and jump targets, then drain the
    /// worklist.
    pub fn run(mut self) -> Result<DecodeResult> {
        self.init_ranges()?;
        self.init_jump_targets()?;
        debug!(allowed = %self.allowed, alternative = %self.alternative, "initialized ranges");

        self.decode()?;

        self.pseudo.finalize(&mut self.module);
        let unresolved = self.pseudo.unresolved(&self.module);
        if !unresolved.is_empty() {
            warn!(count = unresolved.len(), "control transfers left unresolved");
        }
        debug!(
            functions = self.module.num_functions(),
            transfers = self.pseudo.num_registered(),
            "decoding finished"
        );
        debug_assert!(self.index.verify());

        Ok(DecodeResult {
            module: self.module,
            index: self.index,
            insns: self.insns,
            unresolved,
        })
    }

    fn init_ranges(&mut self) -> Result<()> {
        for section in self.image.sections() {
            if section.executable {
                self.allowed.insert(section.range);
            } else if section.readable {
                self.alternative.insert(section.range);
            }
        }
        if self.allowed.is_empty() {
            return Err(DecodeError::NoExecutableSections);
        }
        Ok(())
    }

    fn init_jump_targets(&mut self) -> Result<()> {
        let mode = self.config.mode;
        let mut seeded = 0usize;

        let entry = self.image.entry_point();
        if entry.is_defined() {
            self.targets.push(entry, JumpTargetKind::EntryPoint, mode, None);
            seeded += 1;
        }
        for &addr in self
            .config
            .entry_points
            .iter()
            .chain(&self.config.exports)
            .chain(&self.config.function_starts)
        {
            if addr.is_defined() {
                self.targets.push(addr, JumpTargetKind::EntryPoint, mode, None);
                seeded += 1;
            }
        }

        if seeded == 0 {
            return Err(DecodeError::NoEntryPoints);
        }
        Ok(())
    }

    fn decode(&mut self) -> Result<()> {
        while let Some(jt) = self.targets.pop() {
            debug!(target = %jt, "processing jump target");
            self.decode_jump_target(&jt)?;
        }
        Ok(())
    }

    /// Decode one jump target: resolve it against already-decoded IR when
    /// its bytes are consumed, otherwise translate instructions until a
    /// control transfer or the end of the allowed range.
    fn decode_jump_target(&mut self, jt: &JumpTarget) -> Result<()> {
        let start = jt.address;
        if start.is_undefined() {
            debug!("unknown target address, skipped");
            return Ok(());
        }

        let Some(range) = self.allowed.get(start) else {
            return self.fixup_outside_allowed(jt);
        };
        trace!(%range, "found allowed range");

        let image = self.image;
        let Some(data) = image.raw_bytes_at(start) else {
            debug!("found no data, skipped");
            return Ok(());
        };
        let clip = ((range.end().value() - start.value() + 1) as usize).min(data.len());

        let Some(mut cursor) = self.cursor_for(jt)? else {
            return Ok(());
        };

        let mut addr = start;
        let mut off = 0usize;
        loop {
            trace!(%addr, "translating");
            let res = match self.lifter.translate_one(
                &data[off..clip],
                addr,
                jt.mode,
                &mut self.module,
                &mut cursor,
            ) {
                Ok(res) => res,
                Err(e) => {
                    debug!(error = %e, "translation failed, closing block");
                    break;
                }
            };

            self.index.record_inst(addr, res.first);
            if self.abi.is_nop(&res.insn) {
                trace!(%addr, "nop");
            }
            self.insns.insert(res.first, res.insn);

            addr = addr + res.size as u64;
            off += res.size;

            if let Some(ctrl) = res.control {
                self.classify_control(ctrl, addr, jt.mode);
                break;
            }
            if off >= clip {
                break;
            }
        }

        if addr > start {
            let decoded = AddressRange::new(start, addr - 1);
            debug!(range = %decoded, "decoded range");
            self.allowed.remove(decoded);
        }
        Ok(())
    }

    /// Push follow-up jump targets for a control transfer and register it
    /// for later fixup. Constant targets are queued; computed ones are left
    /// for `PseudoWorklist::finalize`.
    fn classify_control(&mut self, ctrl: InstId, next: Address, mode: Mode) {
        let kind = self.module.inst(ctrl).kind.clone();
        match kind {
            InstKind::Call { target, .. } => {
                let t = jump_target_of(target);
                if t.is_defined() {
                    self.targets
                        .push(t, JumpTargetKind::CallTarget, mode, Some(ctrl));
                    debug!(target = %t, "call");
                }
                self.targets
                    .push(next, JumpTargetKind::CallAfter, mode, Some(ctrl));
                self.pseudo.add_call(ctrl);
            }
            InstKind::Ret { target } => {
                // Computing a return target (the address on the stack) rarely
                // succeeds, but try anyway.
                let t = jump_target_of(target);
                if t.is_defined() {
                    self.targets
                        .push(t, JumpTargetKind::ReturnTarget, mode, Some(ctrl));
                    debug!(target = %t, "return");
                }
                self.pseudo.add_return(ctrl);
            }
            InstKind::Br { target, .. } => {
                let t = jump_target_of(target);
                if t.is_defined() {
                    self.targets
                        .push(t, JumpTargetKind::BrTrue, mode, Some(ctrl));
                    debug!(target = %t, "branch");
                }
                self.pseudo.add_br(ctrl);
            }
            InstKind::CondBr { target, .. } => {
                let t = jump_target_of(target);
                if t.is_defined() {
                    self.targets
                        .push(t, JumpTargetKind::BrTrue, mode, Some(ctrl));
                    debug!(target = %t, "cond branch taken edge");
                }
                self.targets
                    .push(next, JumpTargetKind::BrFalse, mode, Some(ctrl));
                self.pseudo.add_cond_br(ctrl);
            }
            other => debug_assert!(false, "not a control transfer: {other:?}"),
        }
    }

    /// The target's bytes are already consumed (or were never decodable):
    /// resolve against existing IR, splitting blocks and functions as needed.
    fn fixup_outside_allowed(&mut self, jt: &JumpTarget) -> Result<()> {
        match jt.kind {
            JumpTargetKind::CallAfter => Err(DecodeError::Invariant {
                address: jt.address,
                detail: "call fall-through outside allowed ranges".to_string(),
            }),
            JumpTargetKind::BrFalse => {
                let from = self.origin_of(jt)?;
                let from_fn = self.function_of(from);
                match self.index.block_at(jt.address) {
                    Some(bb) if self.module.block(bb).function() == from_fn => {
                        self.pseudo.set_target_block_false(&mut self.module, from, bb);
                        Ok(())
                    }
                    Some(_) => Err(DecodeError::Invariant {
                        address: jt.address,
                        detail: "conditional fall-through resolves into another function"
                            .to_string(),
                    }),
                    None => {
                        // The section may simply end right after the branch;
                        // keep the edge unresolved instead of aborting.
                        warn!(address = %jt.address, "conditional fall-through has no decoded block, edge left unresolved");
                        Ok(())
                    }
                }
            }
            JumpTargetKind::BrTrue => {
                let from = self.origin_of(jt)?;
                let from_fn = self.function_of(from);
                if let Some(bb) = self.index.block_at(jt.address) {
                    if self.module.block(bb).function() == from_fn {
                        self.pseudo.set_target_block_true(&mut self.module, from, bb);
                        Ok(())
                    } else {
                        Err(DecodeError::Invariant {
                            address: jt.address,
                            detail: "branch into a block of another function".to_string(),
                        })
                    }
                } else if let Some(inst) = self.index.inst_at(jt.address) {
                    if self.function_of(inst) == from_fn {
                        // Branch into the middle of an already-decoded block:
                        // split at the instruction boundary.
                        let (bb, at) = self.module.position_of(inst);
                        let new_bb = self.split_block_at(bb, at, jt.address);
                        self.pseudo.set_target_block_true(&mut self.module, from, new_bb);
                        Ok(())
                    } else {
                        // Across a function boundary: carve a new function
                        // out of the old one at the instruction boundary.
                        warn!(address = %jt.address, "branch into the middle of another function, splitting");
                        let name = format!("function_{}", jt.address.to_hex());
                        let new_fn = self.split_function_at(inst, jt.address, &name);
                        self.pseudo.set_target_function(&mut self.module, from, new_fn);
                        Ok(())
                    }
                } else {
                    Err(DecodeError::Invariant {
                        address: jt.address,
                        detail: "branch target has no decoded block or instruction".to_string(),
                    })
                }
            }
            JumpTargetKind::CallTarget => {
                if let Some(f) = self.index.function_at(jt.address) {
                    if let Some(from) = jt.from {
                        self.pseudo.set_target_function(&mut self.module, from, f);
                    }
                    Ok(())
                } else if let Some(inst) = self.index.inst_at(jt.address) {
                    let name = format!("function_{}", jt.address.to_hex());
                    let new_fn = self.split_function_at(inst, jt.address, &name);
                    if let Some(from) = jt.from {
                        self.pseudo.set_target_function(&mut self.module, from, new_fn);
                    }
                    Ok(())
                } else {
                    Err(DecodeError::Invariant {
                        address: jt.address,
                        detail: "call target has no decoded function or instruction".to_string(),
                    })
                }
            }
            JumpTargetKind::EntryPoint | JumpTargetKind::ReturnTarget => {
                debug!("found no range, skipped");
                Ok(())
            }
        }
    }

    /// Position an insertion cursor for a target inside the allowed ranges,
    /// creating the function or block it decodes into. `None` means the
    /// target needs no decoding.
    fn cursor_for(&mut self, jt: &JumpTarget) -> Result<Option<Cursor>> {
        match jt.kind {
            JumpTargetKind::EntryPoint => {
                if self.index.block_at(jt.address).is_some() {
                    debug!("seed already decoded, skipped");
                    return Ok(None);
                }
                if self
                    .index
                    .function_containing(&self.module, jt.address)
                    .is_some()
                {
                    warn!(address = %jt.address, "seed inside a decoded function, skipped");
                    return Ok(None);
                }
                let f = self.create_function(jt.address);
                Ok(Some(self.entry_cursor(f)))
            }
            JumpTargetKind::CallAfter => {
                let from = self.origin_of(jt)?;
                Ok(Some(Cursor::after_inst(&self.module, from)))
            }
            JumpTargetKind::BrFalse => {
                let from = self.origin_of(jt)?;
                let from_bb = self.module.inst(from).block();
                let from_fn = self.module.block(from_bb).function();
                let bb = self.create_block(jt.address, from_fn, Some(from_bb));
                self.pseudo.set_target_block_false(&mut self.module, from, bb);
                Ok(Some(Cursor::at_end(&self.module, bb)))
            }
            JumpTargetKind::BrTrue => {
                let from = self.origin_of(jt)?;
                let from_fn = self.function_of(from);
                match self.index.function_before(jt.address) {
                    None => {
                        // Nothing precedes the target; it starts a function.
                        let f = self.create_function(jt.address);
                        self.pseudo.set_target_function(&mut self.module, from, f);
                        Ok(Some(self.entry_cursor(f)))
                    }
                    Some(target_fn) if target_fn == from_fn => {
                        let Some(before_bb) = self.index.block_before(jt.address) else {
                            return Err(DecodeError::Invariant {
                                address: jt.address,
                                detail: "branch target inside its function but before the first block"
                                    .to_string(),
                            });
                        };
                        let bb = self.create_block(jt.address, from_fn, Some(before_bb));
                        self.pseudo.set_target_block_true(&mut self.module, from, bb);
                        Ok(Some(Cursor::at_end(&self.module, bb)))
                    }
                    Some(target_fn) => {
                        if self.index.function_address(target_fn) == jt.address {
                            return Err(DecodeError::Invariant {
                                address: jt.address,
                                detail: "function entry decoded but its bytes still allowed"
                                    .to_string(),
                            });
                        }
                        if self
                            .index
                            .function_containing(&self.module, jt.address)
                            .is_some()
                        {
                            return Err(DecodeError::Invariant {
                                address: jt.address,
                                detail: "branch into the undecoded body of another function"
                                    .to_string(),
                            });
                        }
                        let f = self.create_function(jt.address);
                        self.pseudo.set_target_function(&mut self.module, from, f);
                        Ok(Some(self.entry_cursor(f)))
                    }
                }
            }
            JumpTargetKind::CallTarget => {
                if self.index.function_at(jt.address).is_some() {
                    return Err(DecodeError::Invariant {
                        address: jt.address,
                        detail: "call target decoded but its bytes still allowed".to_string(),
                    });
                }
                if self
                    .index
                    .function_containing(&self.module, jt.address)
                    .is_some()
                {
                    return Err(DecodeError::Invariant {
                        address: jt.address,
                        detail: "call target inside another function's decoded span".to_string(),
                    });
                }
                let f = self.create_function(jt.address);
                if let Some(from) = jt.from {
                    self.pseudo.set_target_function(&mut self.module, from, f);
                }
                Ok(Some(self.entry_cursor(f)))
            }
            JumpTargetKind::ReturnTarget => {
                debug!("return target, skipped");
                Ok(None)
            }
        }
    }

    // ----- helpers -----

    fn origin_of(&self, jt: &JumpTarget) -> Result<InstId> {
        jt.from.ok_or_else(|| DecodeError::Invariant {
            address: jt.address,
            detail: format!("{:?} target without an originating instruction", jt.kind),
        })
    }

    fn function_of(&self, inst: InstId) -> FunctionId {
        let bb = self.module.inst(inst).block();
        self.module.block(bb).function()
    }

    fn entry_cursor(&self, function: FunctionId) -> Cursor {
        let entry = self
            .module
            .function(function)
            .entry()
            .expect("created functions have an entry block");
        Cursor::at_end(&self.module, entry)
    }

    /// Create a function at `addr`, placed in address order, with its entry
    /// block; register both.
    fn create_function(&mut self, addr: Address) -> FunctionId {
        let name = format!("function_{}", addr.to_hex());
        let before = self.index.function_before(addr);
        let f = self.module.create_function(&name, before);
        let bb = self
            .module
            .create_block(f, &format!("bb_{}", addr.to_hex()), None);
        self.index.record_function(addr, f);
        self.index.record_block(addr, bb);
        debug!(%addr, name = %self.module.function(f).name, "created function");
        f
    }

    /// Create a block at `addr` in `function` after `insert_after`; register.
    fn create_block(
        &mut self,
        addr: Address,
        function: FunctionId,
        insert_after: Option<BlockId>,
    ) -> BlockId {
        let bb = self
            .module
            .create_block(function, &format!("bb_{}", addr.to_hex()), insert_after);
        self.index.record_block(addr, bb);
        bb
    }

    /// Split `bb` before position `at` (the instruction at `addr`) and
    /// register the tail block.
    fn split_block_at(&mut self, bb: BlockId, at: usize, addr: Address) -> BlockId {
        let new_bb = self
            .module
            .split_block(bb, at, &format!("bb_{}", addr.to_hex()));
        if new_bb != bb {
            self.index.record_block(addr, new_bb);
        }
        new_bb
    }

    /// Carve a new function out of an existing one, starting at `inst`
    /// (which begins at `addr`).
    fn split_function_at(&mut self, inst: InstId, addr: Address, name: &str) -> FunctionId {
        let (bb, at) = self.module.position_of(inst);
        let target_bb = self.split_block_at(bb, at, addr);
        let new_fn = self.module.split_function(target_bb, name);
        self.index.record_function(addr, new_fn);
        debug!(%addr, name, "split function");
        new_fn
    }
}

/// Constant jump target of a transfer operand, or undefined.
fn jump_target_of(value: Value) -> Address {
    value
        .as_int()
        .map_or(Address::UNDEFINED, |v| Address::new(v as u64))
}

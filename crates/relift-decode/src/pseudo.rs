//! Worklist of control transfers awaiting target resolution.

use tracing::trace;

use relift_ir::{BlockId, CalleeSlot, FunctionId, InstId, InstKind, Module, TargetSlot, Value};

/// Tracks the tagged control-transfer instructions the lifter emitted, and
/// fills their target slots as the decoder materializes functions and blocks.
///
/// A transfer left with an `Unresolved` slot at the end of decoding either
/// had a computed (non-constant) target, in which case `finalize` marks it
/// `Indirect`, or its constant target could not be decoded, in which case it
/// stays `Unresolved` and is reported by `unresolved`.
#[derive(Default, Debug)]
pub struct PseudoWorklist {
    calls: Vec<InstId>,
    returns: Vec<InstId>,
    brs: Vec<InstId>,
    cond_brs: Vec<InstId>,
}

impl PseudoWorklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_call(&mut self, inst: InstId) {
        self.calls.push(inst);
    }

    pub fn add_return(&mut self, inst: InstId) {
        self.returns.push(inst);
    }

    pub fn add_br(&mut self, inst: InstId) {
        self.brs.push(inst);
    }

    pub fn add_cond_br(&mut self, inst: InstId) {
        self.cond_brs.push(inst);
    }

    /// Resolve a call's callee, or a branch's target when it lands on a
    /// function entry (tail transfer).
    pub fn set_target_function(&self, module: &mut Module, inst: InstId, function: FunctionId) {
        trace!(inst = inst.index(), function = function.index(), "resolving to function");
        match &mut module.inst_mut(inst).kind {
            InstKind::Call { callee, .. } => *callee = CalleeSlot::Function(function),
            InstKind::Br { dest, .. } => *dest = TargetSlot::Function(function),
            other => debug_assert!(false, "not a call or branch: {other:?}"),
        }
    }

    /// Resolve the taken edge of a branch or conditional branch.
    pub fn set_target_block_true(&self, module: &mut Module, inst: InstId, block: BlockId) {
        trace!(inst = inst.index(), block = block.index(), "resolving true edge");
        match &mut module.inst_mut(inst).kind {
            InstKind::Br { dest, .. } => *dest = TargetSlot::Block(block),
            InstKind::CondBr { taken, .. } => *taken = TargetSlot::Block(block),
            other => debug_assert!(false, "not a branch: {other:?}"),
        }
    }

    /// Resolve the fall-through edge of a conditional branch.
    pub fn set_target_block_false(&self, module: &mut Module, inst: InstId, block: BlockId) {
        trace!(inst = inst.index(), block = block.index(), "resolving false edge");
        match &mut module.inst_mut(inst).kind {
            InstKind::CondBr { fall, .. } => *fall = TargetSlot::Block(block),
            other => debug_assert!(false, "not a conditional branch: {other:?}"),
        }
    }

    /// Mark transfers whose targets were never constant as indirect control
    /// flow. Constant targets that failed to resolve stay `Unresolved`.
    pub fn finalize(&self, module: &mut Module) {
        for &inst in self.calls.iter().chain(&self.brs).chain(&self.cond_brs) {
            match &mut module.inst_mut(inst).kind {
                InstKind::Call { target, callee } => {
                    if *callee == CalleeSlot::Unresolved && target.as_int().is_none() {
                        *callee = CalleeSlot::Indirect;
                    }
                }
                InstKind::Br { target, dest } => {
                    if *dest == TargetSlot::Unresolved && target.as_int().is_none() {
                        *dest = TargetSlot::Indirect;
                    }
                }
                InstKind::CondBr { target, taken, .. } => {
                    if *taken == TargetSlot::Unresolved && target.as_int().is_none() {
                        *taken = TargetSlot::Indirect;
                    }
                }
                _ => {}
            }
        }
    }

    /// Transfers still carrying an `Unresolved` slot.
    pub fn unresolved(&self, module: &Module) -> Vec<InstId> {
        let mut out = Vec::new();
        for &inst in self
            .calls
            .iter()
            .chain(&self.returns)
            .chain(&self.brs)
            .chain(&self.cond_brs)
        {
            let open = match &module.inst(inst).kind {
                InstKind::Call { callee, .. } => *callee == CalleeSlot::Unresolved,
                InstKind::Br { dest, .. } => *dest == TargetSlot::Unresolved,
                InstKind::CondBr { taken, fall, .. } => {
                    *taken == TargetSlot::Unresolved || *fall == TargetSlot::Unresolved
                }
                _ => false,
            };
            if open {
                out.push(inst);
            }
        }
        out
    }

    pub fn num_registered(&self) -> usize {
        self.calls.len() + self.returns.len() + self.brs.len() + self.cond_brs.len()
    }
}

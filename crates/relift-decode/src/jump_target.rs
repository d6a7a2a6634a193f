//! Jump targets and the decode worklist.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use tracing::trace;

use relift_image::Address;
use relift_ir::InstId;

use crate::config::Mode;

/// What kind of control flow produced a jump target.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JumpTargetKind {
    /// Seeded entry point, export, or user-specified function start.
    EntryPoint,
    /// Target of a call.
    CallTarget,
    /// Fall-through after a call.
    CallAfter,
    /// Taken edge of a branch.
    BrTrue,
    /// Fall-through edge of a conditional branch.
    BrFalse,
    /// Computed target of a return.
    ReturnTarget,
}

impl JumpTargetKind {
    /// Decode priority; higher decodes first.
    fn priority(self) -> u8 {
        match self {
            JumpTargetKind::EntryPoint => 4,
            JumpTargetKind::CallAfter | JumpTargetKind::BrFalse => 3,
            JumpTargetKind::BrTrue | JumpTargetKind::CallTarget => 2,
            JumpTargetKind::ReturnTarget => 1,
        }
    }
}

/// An address queued for decoding, tagged with its origin.
#[derive(Clone, Copy, Debug)]
pub struct JumpTarget {
    pub address: Address,
    pub kind: JumpTargetKind,
    pub mode: Mode,
    /// The control-transfer instruction that produced this target; `None`
    /// for seeds.
    pub from: Option<InstId>,
}

impl JumpTarget {
    fn key(&self) -> (u8, Address) {
        (self.kind.priority(), self.address)
    }
}

impl PartialEq for JumpTarget {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for JumpTarget {}

impl Ord for JumpTarget {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower address first.
        self.kind
            .priority()
            .cmp(&other.kind.priority())
            .then_with(|| other.address.cmp(&self.address))
    }
}

impl PartialOrd for JumpTarget {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} @ {}", self.kind, self.address)
    }
}

/// Priority worklist of jump targets.
///
/// Duplicates at the same `(address, kind)` may coexist; the decoder's
/// idempotence handles them.
#[derive(Default, Debug)]
pub struct JumpTargetQueue {
    heap: BinaryHeap<JumpTarget>,
}

impl JumpTargetQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, address: Address, kind: JumpTargetKind, mode: Mode, from: Option<InstId>) {
        trace!(%address, ?kind, "queueing jump target");
        self.heap.push(JumpTarget {
            address,
            kind,
            mode,
            from,
        });
    }

    pub fn pop(&mut self) -> Option<JumpTarget> {
        self.heap.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Peek without removing; pops must never yield lower priority than this.
    pub fn peek(&self) -> Option<&JumpTarget> {
        self.heap.peek()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(q: &mut JumpTargetQueue, addr: u64, kind: JumpTargetKind) {
        q.push(Address::new(addr), kind, Mode::DEFAULT, None);
    }

    #[test]
    fn test_priority_order() {
        let mut q = JumpTargetQueue::new();
        push(&mut q, 0x3000, JumpTargetKind::ReturnTarget);
        push(&mut q, 0x2000, JumpTargetKind::CallTarget);
        push(&mut q, 0x1500, JumpTargetKind::BrTrue);
        push(&mut q, 0x1004, JumpTargetKind::CallAfter);
        push(&mut q, 0x1000, JumpTargetKind::EntryPoint);

        assert_eq!(q.pop().unwrap().kind, JumpTargetKind::EntryPoint);
        assert_eq!(q.pop().unwrap().kind, JumpTargetKind::CallAfter);
        // BrTrue and CallTarget share a priority level; lower address first.
        assert_eq!(q.pop().unwrap().address, Address::new(0x1500));
        assert_eq!(q.pop().unwrap().address, Address::new(0x2000));
        assert_eq!(q.pop().unwrap().kind, JumpTargetKind::ReturnTarget);
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_ties_broken_by_lower_address() {
        let mut q = JumpTargetQueue::new();
        push(&mut q, 0x2000, JumpTargetKind::CallTarget);
        push(&mut q, 0x1000, JumpTargetKind::CallTarget);
        assert_eq!(q.pop().unwrap().address, Address::new(0x1000));
        assert_eq!(q.pop().unwrap().address, Address::new(0x2000));
    }

    #[test]
    fn test_pop_respects_peek_priority() {
        let mut q = JumpTargetQueue::new();
        push(&mut q, 0x1000, JumpTargetKind::BrTrue);
        push(&mut q, 0x2000, JumpTargetKind::BrFalse);
        push(&mut q, 0x3000, JumpTargetKind::EntryPoint);
        while let Some(peeked) = q.peek().copied() {
            let popped = q.pop().unwrap();
            assert!(popped.cmp(&peeked) != Ordering::Less);
        }
    }

    #[test]
    fn test_duplicates_coexist() {
        let mut q = JumpTargetQueue::new();
        push(&mut q, 0x1000, JumpTargetKind::BrTrue);
        push(&mut q, 0x1000, JumpTargetKind::BrTrue);
        assert_eq!(q.len(), 2);
    }
}

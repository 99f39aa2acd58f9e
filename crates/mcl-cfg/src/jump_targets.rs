//! Ordered worklist of pending decode points.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use mcl_image::Address;
use mcl_ir::InstId;
use rustc_hash::FxHashSet;

use crate::translator::DecodeMode;

/// Why an address was discovered. The kind determines both worklist
/// priority and how the decoder stitches the result into the CFG.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum JumpTargetKind {
    /// Binary entry point, exported function, or debug-info function.
    EntryPoint,
    /// Computed target of a pseudo call.
    CallTarget,
    /// Taken edge of a branch.
    BrTrue,
    /// Fallthrough edge of a conditional branch.
    BrFalse,
    /// Address right after a call instruction.
    CallAfter,
    /// Statically visible return target.
    ReturnTarget,
}

impl JumpTargetKind {
    /// Deterministic tie-break rank at equal addresses.
    fn rank(self) -> u8 {
        match self {
            Self::EntryPoint => 0,
            Self::CallTarget => 1,
            Self::BrTrue => 2,
            Self::BrFalse => 3,
            Self::CallAfter => 4,
            Self::ReturnTarget => 5,
        }
    }
}

/// A pending decode request.
#[derive(Clone, Debug)]
pub struct JumpTarget {
    pub address: Address,
    pub kind: JumpTargetKind,
    /// Opaque decoder-mode token handed back to the translator.
    pub mode: DecodeMode,
    /// The pseudo terminator this target originates from.
    pub from_inst: Option<InstId>,
}

impl fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.address, self.kind)
    }
}

struct Entry {
    target: JumpTarget,
    seq: u64,
}

impl Entry {
    /// Lower key = higher priority: entry points first, then ascending
    /// address, then kind rank, then insertion order.
    fn key(&self) -> (u8, Address, u8, u64) {
        let class = if self.target.kind == JumpTargetKind::EntryPoint {
            0
        } else {
            1
        };
        (class, self.target.address, self.target.kind.rank(), self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: BinaryHeap is a max-heap, we pop the smallest key.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Priority queue of jump targets with idempotent pushes.
#[derive(Default)]
pub struct JumpTargets {
    heap: BinaryHeap<Entry>,
    seen: FxHashSet<(Address, JumpTargetKind, Option<InstId>)>,
    seq: u64,
}

impl JumpTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a target. Duplicate `(address, kind, from_inst)` pushes are
    /// ignored.
    pub fn push(
        &mut self,
        address: Address,
        kind: JumpTargetKind,
        mode: DecodeMode,
        from_inst: Option<InstId>,
    ) {
        if !self.seen.insert((address, kind, from_inst)) {
            return;
        }
        self.heap.push(Entry {
            target: JumpTarget {
                address,
                kind,
                mode,
                from_inst,
            },
            seq: self.seq,
        });
        self.seq += 1;
    }

    /// Pop the highest-priority target.
    pub fn pop(&mut self) -> Option<JumpTarget> {
        self.heap.pop().map(|e| e.target)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(q: &mut JumpTargets, addr: u64, kind: JumpTargetKind) {
        q.push(Address::new(addr), kind, DecodeMode::default(), None);
    }

    #[test]
    fn test_entry_points_first() {
        let mut q = JumpTargets::new();
        push(&mut q, 0x1000, JumpTargetKind::CallTarget);
        push(&mut q, 0x9000, JumpTargetKind::EntryPoint);
        assert_eq!(q.pop().unwrap().kind, JumpTargetKind::EntryPoint);
        assert_eq!(q.pop().unwrap().kind, JumpTargetKind::CallTarget);
    }

    #[test]
    fn test_ascending_address() {
        let mut q = JumpTargets::new();
        push(&mut q, 0x3000, JumpTargetKind::BrTrue);
        push(&mut q, 0x1000, JumpTargetKind::BrTrue);
        push(&mut q, 0x2000, JumpTargetKind::BrTrue);
        let addrs: Vec<u64> = std::iter::from_fn(|| q.pop())
            .map(|t| t.address.value().unwrap())
            .collect();
        assert_eq!(addrs, vec![0x1000, 0x2000, 0x3000]);
    }

    #[test]
    fn test_kind_order_at_same_address() {
        let mut q = JumpTargets::new();
        push(&mut q, 0x1000, JumpTargetKind::ReturnTarget);
        push(&mut q, 0x1000, JumpTargetKind::CallAfter);
        push(&mut q, 0x1000, JumpTargetKind::BrFalse);
        push(&mut q, 0x1000, JumpTargetKind::BrTrue);
        push(&mut q, 0x1000, JumpTargetKind::CallTarget);
        let kinds: Vec<JumpTargetKind> =
            std::iter::from_fn(|| q.pop()).map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                JumpTargetKind::CallTarget,
                JumpTargetKind::BrTrue,
                JumpTargetKind::BrFalse,
                JumpTargetKind::CallAfter,
                JumpTargetKind::ReturnTarget,
            ]
        );
    }

    #[test]
    fn test_duplicate_push_is_idempotent() {
        let mut q = JumpTargets::new();
        push(&mut q, 0x1000, JumpTargetKind::CallTarget);
        push(&mut q, 0x1000, JumpTargetKind::CallTarget);
        assert_eq!(q.len(), 1);
    }
}

//! Arena-owned IR module: functions, blocks, instructions, stack slots.
//!
//! All storage lives in the module; functions, blocks and instructions
//! are addressed by plain index ids, so side tables (the decoder's
//! address maps, analysis results) hold non-owning references.

use rustc_hash::FxHashMap;

use crate::types::Type;
use crate::value::{InstKind, Value};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FuncId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InstId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SlotId(pub u32);

/// A function: a named, ordered list of blocks.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub(crate) blocks: Vec<BlockId>,
}

impl Function {
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}

/// A basic block: an ordered list of instructions.
#[derive(Clone, Debug)]
pub struct Block {
    pub func: FuncId,
    pub name: String,
    pub(crate) insts: Vec<InstId>,
}

impl Block {
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }
}

/// A single instruction.
#[derive(Clone, Debug)]
pub struct Inst {
    pub block: BlockId,
    pub kind: InstKind,
}

/// A per-function stack slot, created by the stack pass for one
/// `stack_pointer + offset` location.
#[derive(Clone, Debug)]
pub struct StackSlot {
    pub func: FuncId,
    pub offset: i64,
    pub ty: Type,
    pub name: String,
    pub from_debug: bool,
}

/// The IR module.
#[derive(Clone, Debug, Default)]
pub struct Module {
    funcs: Vec<Function>,
    blocks: Vec<Block>,
    insts: Vec<Inst>,
    slots: Vec<StackSlot>,
    slot_index: FxHashMap<(FuncId, i64), SlotId>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Functions =====

    /// Append a new, empty function.
    pub fn add_function(&mut self, name: &str) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        self.funcs.push(Function {
            name: name.to_string(),
            blocks: Vec::new(),
        });
        id
    }

    pub fn func(&self, f: FuncId) -> &Function {
        &self.funcs[f.0 as usize]
    }

    pub fn func_mut(&mut self, f: FuncId) -> &mut Function {
        &mut self.funcs[f.0 as usize]
    }

    pub fn funcs(&self) -> impl Iterator<Item = FuncId> {
        (0..self.funcs.len() as u32).map(FuncId)
    }

    pub fn func_count(&self) -> usize {
        self.funcs.len()
    }

    // ===== Blocks =====

    /// Append a block to a function.
    pub fn add_block(&mut self, func: FuncId, name: &str) -> BlockId {
        let id = self.new_block(func, name);
        self.funcs[func.0 as usize].blocks.push(id);
        id
    }

    /// Insert a block into `func` right after `after`.
    pub fn insert_block_after(&mut self, func: FuncId, after: BlockId, name: &str) -> BlockId {
        let id = self.new_block(func, name);
        let blocks = &mut self.funcs[func.0 as usize].blocks;
        let pos = blocks
            .iter()
            .position(|&b| b == after)
            .map(|p| p + 1)
            .unwrap_or(blocks.len());
        blocks.insert(pos, id);
        id
    }

    fn new_block(&mut self, func: FuncId, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            func,
            name: name.to_string(),
            insts: Vec::new(),
        });
        id
    }

    pub fn block(&self, b: BlockId) -> &Block {
        &self.blocks[b.0 as usize]
    }

    pub fn block_mut(&mut self, b: BlockId) -> &mut Block {
        &mut self.blocks[b.0 as usize]
    }

    // ===== Instructions =====

    pub fn inst(&self, i: InstId) -> &Inst {
        &self.insts[i.0 as usize]
    }

    pub fn inst_mut(&mut self, i: InstId) -> &mut Inst {
        &mut self.insts[i.0 as usize]
    }

    /// Append an instruction to a block.
    pub fn push_inst(&mut self, block: BlockId, kind: InstKind) -> InstId {
        let len = self.blocks[block.0 as usize].insts.len();
        self.insert_inst(block, len, kind)
    }

    /// Insert an instruction at a position inside a block.
    pub fn insert_inst(&mut self, block: BlockId, index: usize, kind: InstKind) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(Inst { block, kind });
        self.blocks[block.0 as usize].insts.insert(index, id);
        id
    }

    /// Remove an instruction from its block. The arena entry survives
    /// but is no longer reachable by iteration.
    pub fn erase_inst(&mut self, inst: InstId) {
        let block = self.insts[inst.0 as usize].block;
        self.blocks[block.0 as usize].insts.retain(|&i| i != inst);
    }

    /// Position of an instruction: its block and index within it.
    pub fn position_of(&self, inst: InstId) -> (BlockId, usize) {
        let block = self.insts[inst.0 as usize].block;
        let index = self.blocks[block.0 as usize]
            .insts
            .iter()
            .position(|&i| i == inst)
            .expect("instruction not in its block");
        (block, index)
    }

    /// Iterate all instructions of a function in block order.
    pub fn func_insts(&self, func: FuncId) -> impl Iterator<Item = InstId> + '_ {
        self.funcs[func.0 as usize]
            .blocks
            .iter()
            .flat_map(|&b| self.blocks[b.0 as usize].insts.iter().copied())
    }

    // ===== Structural edits =====

    /// Split a block before the instruction at `index`. The suffix
    /// moves into a new block inserted right after the original one.
    pub fn split_block(&mut self, block: BlockId, index: usize, name: &str) -> BlockId {
        let func = self.blocks[block.0 as usize].func;
        let suffix: Vec<InstId> = self.blocks[block.0 as usize].insts.split_off(index);
        let new_block = self.insert_block_after(func, block, name);
        for &i in &suffix {
            self.insts[i.0 as usize].block = new_block;
        }
        self.blocks[new_block.0 as usize].insts = suffix;
        new_block
    }

    /// Move `first` and every later block of its function into a new
    /// function. Used when a call target lands inside an already
    /// decoded function.
    pub fn split_function(&mut self, first: BlockId, name: &str) -> FuncId {
        let old_func = self.blocks[first.0 as usize].func;
        let pos = self.funcs[old_func.0 as usize]
            .blocks
            .iter()
            .position(|&b| b == first)
            .expect("block not in its function");
        let moved: Vec<BlockId> = self.funcs[old_func.0 as usize].blocks.split_off(pos);

        let new_func = self.add_function(name);
        for &b in &moved {
            self.blocks[b.0 as usize].func = new_func;
        }
        self.funcs[new_func.0 as usize].blocks = moved;
        new_func
    }

    // ===== Uses =====

    /// Replace uses of `from` with `to` in a single instruction.
    pub fn replace_uses_in(&mut self, inst: InstId, from: &Value, to: &Value) -> usize {
        self.insts[inst.0 as usize].kind.replace_operand(from, to)
    }

    /// Replace all uses of `from` with `to` across a function.
    pub fn replace_all_uses(&mut self, func: FuncId, from: &Value, to: &Value) -> usize {
        let targets: Vec<InstId> = self.func_insts(func).collect();
        let mut n = 0;
        for i in targets {
            n += self.insts[i.0 as usize].kind.replace_operand(from, to);
        }
        n
    }

    // ===== Stack slots =====

    /// Get or create the slot for `(func, offset)`. The first creation
    /// fixes the slot's type and name; later calls return the existing
    /// slot unchanged.
    pub fn get_or_create_slot(
        &mut self,
        func: FuncId,
        offset: i64,
        ty: Type,
        name: &str,
    ) -> (SlotId, bool) {
        if let Some(&id) = self.slot_index.get(&(func, offset)) {
            return (id, false);
        }
        let id = SlotId(self.slots.len() as u32);
        self.slots.push(StackSlot {
            func,
            offset,
            ty,
            name: name.to_string(),
            from_debug: false,
        });
        self.slot_index.insert((func, offset), id);
        (id, true)
    }

    pub fn slot(&self, s: SlotId) -> &StackSlot {
        &self.slots[s.0 as usize]
    }

    pub fn slot_mut(&mut self, s: SlotId) -> &mut StackSlot {
        &mut self.slots[s.0 as usize]
    }

    /// Slots belonging to a function.
    pub fn slots_of(&self, func: FuncId) -> impl Iterator<Item = SlotId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.func == func)
            .map(|(i, _)| SlotId(i as u32))
    }

    // ===== Types =====

    /// Type of a value, when it has one. `Store`, pseudo terminators
    /// and placeholders produce no value.
    pub fn value_type(&self, value: &Value) -> Option<Type> {
        match value {
            Value::Const(_, ty) | Value::Undef(ty) => Some(ty.clone()),
            Value::Reg(_) => Some(Type::ptr_to(Type::Int(64))),
            Value::Slot(s) => Some(Type::ptr_to(self.slot(*s).ty.clone())),
            Value::Inst(i) => match &self.inst(*i).kind {
                InstKind::BinOp { lhs, .. } => self.value_type(lhs),
                InstKind::Conv { to, .. } => Some(to.clone()),
                InstKind::Load { ty, .. } => Some(ty.clone()),
                InstKind::Store { .. } | InstKind::Pseudo(_) | InstKind::RetUndef => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{BinOp, RegId};

    #[test]
    fn test_build_and_iterate() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b = m.add_block(f, "entry");
        let i1 = m.push_inst(
            b,
            InstKind::BinOp {
                op: BinOp::Add,
                lhs: Value::const_int(1),
                rhs: Value::const_int(2),
            },
        );
        let i2 = m.push_inst(b, InstKind::RetUndef);

        assert_eq!(m.func(f).entry(), Some(b));
        assert_eq!(m.func_insts(f).collect::<Vec<_>>(), vec![i1, i2]);
    }

    #[test]
    fn test_insert_and_erase() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b = m.add_block(f, "entry");
        let term = m.push_inst(b, InstKind::RetUndef);
        let i = m.insert_inst(
            b,
            0,
            InstKind::Load {
                ptr: Value::Reg(RegId(2)),
                ty: Type::Int(64),
            },
        );
        assert_eq!(m.block(b).insts(), &[i, term]);
        assert_eq!(m.position_of(term), (b, 1));

        m.erase_inst(i);
        assert_eq!(m.block(b).insts(), &[term]);
    }

    #[test]
    fn test_split_block() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b = m.add_block(f, "entry");
        let i1 = m.push_inst(b, InstKind::RetUndef);
        let i2 = m.push_inst(b, InstKind::RetUndef);
        let i3 = m.push_inst(b, InstKind::RetUndef);

        let tail = m.split_block(b, 1, "bb_tail");
        assert_eq!(m.block(b).insts(), &[i1]);
        assert_eq!(m.block(tail).insts(), &[i2, i3]);
        assert_eq!(m.inst(i2).block, tail);
        assert_eq!(m.func(f).blocks(), &[b, tail]);
    }

    #[test]
    fn test_split_function() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b1 = m.add_block(f, "entry");
        let b2 = m.add_block(f, "bb2");
        let b3 = m.add_block(f, "bb3");

        let g = m.split_function(b2, "function_2000");
        assert_eq!(m.func(f).blocks(), &[b1]);
        assert_eq!(m.func(g).blocks(), &[b2, b3]);
        assert_eq!(m.block(b3).func, g);
    }

    #[test]
    fn test_slot_interning() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let (s1, created1) = m.get_or_create_slot(f, 8, Type::Int(32), "local_8");
        let (s2, created2) = m.get_or_create_slot(f, 8, Type::Int(64), "other");
        assert!(created1);
        assert!(!created2);
        assert_eq!(s1, s2);
        // First writer wins the type.
        assert_eq!(m.slot(s1).ty, Type::Int(32));
    }

    #[test]
    fn test_replace_all_uses() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b = m.add_block(f, "entry");
        let load = m.push_inst(
            b,
            InstKind::Load {
                ptr: Value::Reg(RegId(2)),
                ty: Type::Int(64),
            },
        );
        m.push_inst(
            b,
            InstKind::BinOp {
                op: BinOp::Add,
                lhs: Value::Inst(load),
                rhs: Value::const_int(8),
            },
        );
        let n = m.replace_all_uses(f, &Value::Inst(load), &Value::const_int(0));
        assert_eq!(n, 1);
    }
}

//! Bidirectional address↔IR index over the decoded CFG.
//!
//! Two ordered maps (address → function, address → basic block) with
//! inverse maps for the return direction, plus the instruction↔address
//! anchors. These queries are the only means the decoder uses to
//! decide create-vs-reuse-vs-split.

use std::collections::BTreeMap;

use mcl_image::Address;
use mcl_ir::{BlockId, FuncId, InstId, Module};
use rustc_hash::FxHashMap;

#[derive(Default, Debug)]
pub struct CfgIndex {
    addr2func: BTreeMap<u64, FuncId>,
    func2addr: FxHashMap<FuncId, u64>,
    addr2block: BTreeMap<u64, BlockId>,
    block2addr: FxHashMap<BlockId, u64>,
    addr2inst: FxHashMap<u64, InstId>,
    inst2addr: FxHashMap<InstId, u64>,
}

impl CfgIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Insertion =====

    /// Index a function at an address. At most one function per address.
    pub fn insert_function(&mut self, address: u64, func: FuncId) {
        debug_assert!(!self.addr2func.contains_key(&address));
        self.addr2func.insert(address, func);
        self.func2addr.insert(func, address);
    }

    pub fn insert_block(&mut self, address: u64, block: BlockId) {
        debug_assert!(!self.addr2block.contains_key(&address));
        self.addr2block.insert(address, block);
        self.block2addr.insert(block, address);
    }

    pub fn insert_inst(&mut self, address: u64, inst: InstId) {
        self.addr2inst.insert(address, inst);
        self.inst2addr.insert(inst, address);
    }

    // ===== Function queries =====

    /// Function exactly at `address`.
    pub fn function_at(&self, address: u64) -> Option<FuncId> {
        self.addr2func.get(&address).copied()
    }

    /// Start address of a function; undefined when not indexed.
    pub fn function_address(&self, func: FuncId) -> Address {
        self.func2addr
            .get(&func)
            .copied()
            .map_or_else(Address::undef, Address::new)
    }

    /// The function with the largest indexed address `<= address`.
    pub fn function_before(&self, address: u64) -> Option<FuncId> {
        self.addr2func
            .range(..=address)
            .next_back()
            .map(|(_, &f)| f)
    }

    /// End address of a function: the address of the last anchored
    /// instruction in its last block, else the function's own address.
    pub fn function_end(&self, module: &Module, func: FuncId) -> Address {
        let Some(&last_block) = module.func(func).blocks().last() else {
            return self.function_address(func);
        };
        self.last_anchored(module, last_block)
            .unwrap_or_else(|| self.function_address(func))
    }

    /// Function whose `[start, end)` span covers `address`.
    pub fn function_containing(&self, module: &Module, address: u64) -> Option<FuncId> {
        let f = self.function_before(address)?;
        let end = self.function_end(module, f);
        match end.value() {
            Some(end) if address < end => Some(f),
            _ => None,
        }
    }

    // ===== Block queries =====

    pub fn block_at(&self, address: u64) -> Option<BlockId> {
        self.addr2block.get(&address).copied()
    }

    pub fn block_address(&self, block: BlockId) -> Address {
        self.block2addr
            .get(&block)
            .copied()
            .map_or_else(Address::undef, Address::new)
    }

    pub fn block_before(&self, address: u64) -> Option<BlockId> {
        self.addr2block
            .range(..=address)
            .next_back()
            .map(|(_, &b)| b)
    }

    /// End address of a block: the address of its last anchored
    /// instruction, else the block's own address.
    pub fn block_end(&self, module: &Module, block: BlockId) -> Address {
        self.last_anchored(module, block)
            .unwrap_or_else(|| self.block_address(block))
    }

    pub fn block_containing(&self, module: &Module, address: u64) -> Option<BlockId> {
        let b = self.block_before(address)?;
        let end = self.block_end(module, b);
        match end.value() {
            Some(end) if address < end => Some(b),
            _ => None,
        }
    }

    // ===== Instruction queries =====

    pub fn inst_at(&self, address: u64) -> Option<InstId> {
        self.addr2inst.get(&address).copied()
    }

    pub fn inst_address(&self, inst: InstId) -> Address {
        self.inst2addr
            .get(&inst)
            .copied()
            .map_or_else(Address::undef, Address::new)
    }

    /// Indexed functions in ascending address order.
    pub fn functions(&self) -> impl Iterator<Item = (u64, FuncId)> + '_ {
        self.addr2func.iter().map(|(&a, &f)| (a, f))
    }

    /// Indexed blocks in ascending address order.
    pub fn blocks(&self) -> impl Iterator<Item = (u64, BlockId)> + '_ {
        self.addr2block.iter().map(|(&a, &b)| (a, b))
    }

    fn last_anchored(&self, module: &Module, block: BlockId) -> Option<Address> {
        module
            .block(block)
            .insts()
            .iter()
            .rev()
            .find_map(|i| self.inst2addr.get(i).copied())
            .map(Address::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcl_ir::InstKind;

    fn module_with_anchors() -> (Module, CfgIndex, FuncId, BlockId) {
        let mut m = Module::new();
        let f = m.add_function("function_1000");
        let b = m.add_block(f, "bb_1000");
        let mut index = CfgIndex::new();
        index.insert_function(0x1000, f);
        index.insert_block(0x1000, b);
        for addr in [0x1000u64, 0x1004, 0x1008] {
            let i = m.push_inst(
                b,
                InstKind::Store {
                    ptr: mcl_ir::Value::Undef(mcl_ir::Type::ptr_to(mcl_ir::Type::Int(64))),
                    value: mcl_ir::Value::const_int(addr as i64),
                    anchor: Some(addr),
                },
            );
            index.insert_inst(addr, i);
        }
        (m, index, f, b)
    }

    #[test]
    fn test_exact_and_before() {
        let (_, index, f, _) = module_with_anchors();
        assert_eq!(index.function_at(0x1000), Some(f));
        assert_eq!(index.function_at(0x1004), None);
        assert_eq!(index.function_before(0x1004), Some(f));
        assert_eq!(index.function_before(0xfff), None);
    }

    #[test]
    fn test_end_and_containing() {
        let (m, index, f, b) = module_with_anchors();
        assert_eq!(index.function_end(&m, f), Address::new(0x1008));
        assert_eq!(index.block_end(&m, b), Address::new(0x1008));
        assert_eq!(index.function_containing(&m, 0x1004), Some(f));
        // The last instruction's own address is not "contained".
        assert_eq!(index.function_containing(&m, 0x1008), None);
    }

    #[test]
    fn test_empty_function_end_is_own_address() {
        let mut m = Module::new();
        let f = m.add_function("f");
        m.add_block(f, "entry");
        let mut index = CfgIndex::new();
        index.insert_function(0x2000, f);
        assert_eq!(index.function_end(&m, f), Address::new(0x2000));
    }

    #[test]
    fn test_unindexed_function_address_is_undefined() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let index = CfgIndex::new();
        assert!(index.function_address(f).is_undefined());
        assert!(index.function_end(&m, f).is_undefined());
    }

    #[test]
    fn test_inst_lookup() {
        let (_, index, _, _) = module_with_anchors();
        assert!(index.inst_at(0x1004).is_some());
        assert!(index.inst_at(0x1002).is_none());
    }
}

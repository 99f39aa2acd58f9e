//! Positioned instruction insertion.

use crate::module::{BlockId, InstId, Module};
use crate::types::Type;
use crate::value::{BinOp, InstKind, PseudoOp, Value};

/// Builder inserting instructions at a position inside a block.
///
/// The position advances past each inserted instruction, so a sequence
/// of calls emits instructions in order.
pub struct Builder<'m> {
    module: &'m mut Module,
    block: BlockId,
    index: usize,
}

impl<'m> Builder<'m> {
    /// Position immediately before `inst`.
    pub fn before(module: &'m mut Module, inst: InstId) -> Self {
        let (block, index) = module.position_of(inst);
        Self {
            module,
            block,
            index,
        }
    }

    /// Position immediately after `inst`.
    pub fn after(module: &'m mut Module, inst: InstId) -> Self {
        let (block, index) = module.position_of(inst);
        Self {
            module,
            block,
            index: index + 1,
        }
    }

    /// Position at the end of a block.
    pub fn at_end(module: &'m mut Module, block: BlockId) -> Self {
        let index = module.block(block).insts().len();
        Self {
            module,
            block,
            index,
        }
    }

    /// Position before the block's trailing placeholder terminator,
    /// or at the end when there is none.
    pub fn at_terminator(module: &'m mut Module, block: BlockId) -> Self {
        let insts = module.block(block).insts();
        let index = match insts.last() {
            Some(&last) if module.inst(last).kind == InstKind::RetUndef => insts.len() - 1,
            Some(_) | None => insts.len(),
        };
        Self {
            module,
            block,
            index,
        }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    /// Insert a raw instruction at the current position.
    pub fn insert(&mut self, kind: InstKind) -> InstId {
        let id = self.module.insert_inst(self.block, self.index, kind);
        self.index += 1;
        id
    }

    pub fn binop(&mut self, op: BinOp, lhs: Value, rhs: Value) -> InstId {
        self.insert(InstKind::BinOp { op, lhs, rhs })
    }

    pub fn conv(&mut self, value: Value, to: Type) -> InstId {
        self.insert(InstKind::Conv { value, to })
    }

    pub fn load(&mut self, ptr: Value, ty: Type) -> InstId {
        self.insert(InstKind::Load { ptr, ty })
    }

    pub fn store(&mut self, ptr: Value, value: Value) -> InstId {
        self.insert(InstKind::Store {
            ptr,
            value,
            anchor: None,
        })
    }

    /// Synthetic store anchoring the following IR to a machine address.
    pub fn anchor(&mut self, address: u64) -> InstId {
        self.insert(InstKind::Store {
            ptr: Value::Undef(Type::ptr_to(Type::Int(64))),
            value: Value::const_int(address as i64),
            anchor: Some(address),
        })
    }

    pub fn pseudo(&mut self, op: PseudoOp) -> InstId {
        self.insert(InstKind::Pseudo(op))
    }

    pub fn ret_undef(&mut self) -> InstId {
        self.insert(InstKind::RetUndef)
    }
}

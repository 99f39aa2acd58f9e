//! Reaching-definitions analysis.
//!
//! Module-scope, run once over the decoded IR and queried read-only by
//! the stack pass. Definitions are non-anchor stores; locations are the
//! stores' pointer operands compared structurally, so register cells,
//! slots and shared address computations are all tracked.

use std::collections::VecDeque;

use mcl_ir::{BlockId, InstId, InstKind, Module, PseudoOp, Value};
use rustc_hash::FxHashMap;

/// Reaching definitions for every block of every function.
#[derive(Default, Debug)]
pub struct ReachingDefinitions {
    block_in: FxHashMap<BlockId, FxHashMap<Value, Vec<InstId>>>,
}

impl ReachingDefinitions {
    /// Run the analysis over a whole module.
    pub fn run(module: &Module) -> Self {
        let mut block_in = FxHashMap::default();
        for f in module.funcs() {
            Self::run_on_function(module, f, &mut block_in);
        }
        Self { block_in }
    }

    fn run_on_function(
        module: &Module,
        func: mcl_ir::FuncId,
        block_in: &mut FxHashMap<BlockId, FxHashMap<Value, Vec<InstId>>>,
    ) {
        let blocks: Vec<BlockId> = module.func(func).blocks().to_vec();

        let mut preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        for &b in &blocks {
            for s in block_successors(module, b) {
                preds.entry(s).or_default().push(b);
            }
        }

        // GEN: the last store per location in each block.
        let mut gen: FxHashMap<BlockId, FxHashMap<Value, InstId>> = FxHashMap::default();
        for &b in &blocks {
            let g = gen.entry(b).or_default();
            for &i in module.block(b).insts() {
                if let InstKind::Store {
                    ptr, anchor: None, ..
                } = &module.inst(i).kind
                {
                    g.insert(ptr.clone(), i);
                }
            }
        }

        // Iterate OUT sets to a fixed point with a union join.
        let mut out: FxHashMap<BlockId, FxHashMap<Value, Vec<InstId>>> = FxHashMap::default();
        let mut worklist: VecDeque<BlockId> = blocks.iter().copied().collect();

        while let Some(b) = worklist.pop_front() {
            let in_b = Self::join(&preds, &out, b);
            let mut out_b = in_b;
            for (cell, &inst) in &gen[&b] {
                out_b.insert(cell.clone(), vec![inst]);
            }
            if out.get(&b) != Some(&out_b) {
                out.insert(b, out_b);
                for s in block_successors(module, b) {
                    if !worklist.contains(&s) {
                        worklist.push_back(s);
                    }
                }
            }
        }

        for &b in &blocks {
            block_in.insert(b, Self::join(&preds, &out, b));
        }
    }

    fn join(
        preds: &FxHashMap<BlockId, Vec<BlockId>>,
        out: &FxHashMap<BlockId, FxHashMap<Value, Vec<InstId>>>,
        block: BlockId,
    ) -> FxHashMap<Value, Vec<InstId>> {
        let mut joined: FxHashMap<Value, Vec<InstId>> = FxHashMap::default();
        for p in preds.get(&block).map(Vec::as_slice).unwrap_or(&[]) {
            let Some(out_p) = out.get(p) else { continue };
            for (cell, defs) in out_p {
                let entry = joined.entry(cell.clone()).or_default();
                for &d in defs {
                    if !entry.contains(&d) {
                        entry.push(d);
                    }
                }
                entry.sort_unstable();
            }
        }
        joined
    }

    /// Definitions of `cell` that might reach `at`.
    pub fn defs_of(&self, module: &Module, at: InstId, cell: &Value) -> Vec<InstId> {
        let (block, pos) = module.position_of(at);

        // A store earlier in the same block wins outright.
        for &i in module.block(block).insts()[..pos].iter().rev() {
            if let InstKind::Store {
                ptr, anchor: None, ..
            } = &module.inst(i).kind
            {
                if ptr == cell {
                    return vec![i];
                }
            }
        }

        self.block_in
            .get(&block)
            .and_then(|m| m.get(cell))
            .cloned()
            .unwrap_or_default()
    }

    /// The unique store whose destination equals the load's pointer,
    /// when exactly one reaches the load.
    pub fn unique_def(&self, module: &Module, load: InstId) -> Option<InstId> {
        let InstKind::Load { ptr, .. } = &module.inst(load).kind else {
            return None;
        };
        let defs = self.defs_of(module, load, &ptr.clone());
        match defs.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }
}

/// Successor blocks, derived from the block's patched pseudo
/// terminator. Calls fall through to the next block in function order;
/// returns and unpatched terminators have no successors.
pub fn block_successors(module: &Module, block: BlockId) -> Vec<BlockId> {
    let insts = module.block(block).insts();
    let Some(&last) = insts
        .iter()
        .rev()
        .find(|&&i| matches!(module.inst(i).kind, InstKind::Pseudo(_)))
    else {
        return Vec::new();
    };

    match module.inst(last).kind.as_pseudo() {
        Some(PseudoOp::CondBr {
            target_true,
            target_false,
            ..
        }) => target_true
            .iter()
            .chain(target_false.iter())
            .copied()
            .collect(),
        Some(PseudoOp::Br {
            target_block: Some(b),
            ..
        }) => vec![*b],
        Some(PseudoOp::Call { .. }) => {
            let func = module.block(block).func;
            let blocks = module.func(func).blocks();
            blocks
                .iter()
                .position(|&b| b == block)
                .and_then(|p| blocks.get(p + 1))
                .map(|&b| vec![b])
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcl_ir::{RegId, Type};

    #[test]
    fn test_unique_def_in_block() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b = m.add_block(f, "entry");
        let cell = Value::Reg(RegId(5));
        let store = m.push_inst(
            b,
            InstKind::Store {
                ptr: cell.clone(),
                value: Value::const_int(42),
                anchor: None,
            },
        );
        let load = m.push_inst(
            b,
            InstKind::Load {
                ptr: cell.clone(),
                ty: Type::Int(64),
            },
        );

        let rd = ReachingDefinitions::run(&m);
        assert_eq!(rd.unique_def(&m, load), Some(store));
    }

    #[test]
    fn test_later_store_does_not_reach() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b = m.add_block(f, "entry");
        let cell = Value::Reg(RegId(5));
        let load = m.push_inst(
            b,
            InstKind::Load {
                ptr: cell.clone(),
                ty: Type::Int(64),
            },
        );
        m.push_inst(
            b,
            InstKind::Store {
                ptr: cell.clone(),
                value: Value::const_int(42),
                anchor: None,
            },
        );

        let rd = ReachingDefinitions::run(&m);
        assert_eq!(rd.unique_def(&m, load), None);
    }

    #[test]
    fn test_join_over_branch_is_not_unique() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let entry = m.add_block(f, "entry");
        let bb_true = m.add_block(f, "bb_true");
        let bb_false = m.add_block(f, "bb_false");
        let join = m.add_block(f, "bb_join");
        let cell = Value::Reg(RegId(5));

        m.push_inst(
            entry,
            InstKind::Pseudo(PseudoOp::CondBr {
                cond: Value::const_int(1),
                target: Value::const_int(0),
                target_true: Some(bb_true),
                target_false: Some(bb_false),
            }),
        );
        for &b in &[bb_true, bb_false] {
            m.push_inst(
                b,
                InstKind::Store {
                    ptr: cell.clone(),
                    value: Value::const_int(1),
                    anchor: None,
                },
            );
            m.push_inst(
                b,
                InstKind::Pseudo(PseudoOp::Br {
                    target: Value::const_int(0),
                    target_block: Some(join),
                    target_fn: None,
                }),
            );
        }
        let load = m.push_inst(
            join,
            InstKind::Load {
                ptr: cell.clone(),
                ty: Type::Int(64),
            },
        );

        let rd = ReachingDefinitions::run(&m);
        assert_eq!(rd.defs_of(&m, load, &cell).len(), 2);
        assert_eq!(rd.unique_def(&m, load), None);
    }

    #[test]
    fn test_anchor_stores_are_invisible() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b = m.add_block(f, "entry");
        m.push_inst(
            b,
            InstKind::Store {
                ptr: Value::Undef(Type::ptr_to(Type::Int(64))),
                value: Value::const_int(0x1000),
                anchor: Some(0x1000),
            },
        );
        let load = m.push_inst(
            b,
            InstKind::Load {
                ptr: Value::Reg(RegId(5)),
                ty: Type::Int(64),
            },
        );
        let rd = ReachingDefinitions::run(&m);
        assert_eq!(rd.unique_def(&m, load), None);
    }
}

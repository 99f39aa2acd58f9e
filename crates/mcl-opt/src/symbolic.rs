//! Lazy symbolic expression trees over IR values.
//!
//! A tree is rooted at one IR value and expanded through defining
//! operations, and through unique reaching definitions when the value
//! is a memory load. Trees are ephemeral: built per analyzed
//! instruction and discarded.

use mcl_ir::{Abi, BinOp, FuncId, InstId, InstKind, Module, Value};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::reaching::ReachingDefinitions;

/// Default cap on expansion depth, bounding tree size on heavily
/// aliased registers.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Everything tree construction needs to look at, read-only.
pub struct SymbolicContext<'a> {
    pub module: &'a Module,
    pub func: FuncId,
    pub rd: &'a ReachingDefinitions,
    pub max_depth: usize,
}

/// One node of a symbolic tree.
#[derive(Debug)]
pub struct SymbolicTree {
    pub value: Value,
    pub ops: Vec<SymbolicTree>,
    /// The node was expanded through a reaching definition (the ops
    /// hold the stored value, not the operands).
    via_def: bool,
    /// Root only: the caller's substitution map was consulted somewhere
    /// in the tree.
    val2val_used: bool,
}

impl SymbolicTree {
    /// Build a tree rooted at `root`, expanding through reaching
    /// definitions and the caller's substitution map (store
    /// instruction → known constant).
    pub fn build(
        ctx: &SymbolicContext<'_>,
        root: &Value,
        subst: &FxHashMap<InstId, Value>,
    ) -> Self {
        let mut visited = FxHashSet::default();
        let mut used = false;
        let mut tree = Self::expand(ctx, root, subst, &mut visited, 0, &mut used);
        tree.val2val_used = used;
        tree
    }

    fn expand(
        ctx: &SymbolicContext<'_>,
        value: &Value,
        subst: &FxHashMap<InstId, Value>,
        visited: &mut FxHashSet<InstId>,
        depth: usize,
        used: &mut bool,
    ) -> Self {
        if depth >= ctx.max_depth {
            return Self::leaf(value.clone());
        }

        let Value::Inst(inst) = value else {
            // Constants, registers, slots and undef are leaves.
            return Self::leaf(value.clone());
        };

        // Each value is expanded at most once per tree; cycles are cut
        // at the second visit.
        if !visited.insert(*inst) {
            return Self::leaf(value.clone());
        }

        let data = ctx.module.inst(*inst);
        if ctx.module.block(data.block).func != ctx.func {
            return Self::leaf(value.clone());
        }

        let ops = match &data.kind {
            InstKind::Load { ptr, .. } => {
                if let Some(store) = ctx.rd.unique_def(ctx.module, *inst) {
                    let child = if let Some(known) = subst.get(&store) {
                        *used = true;
                        Self::leaf(known.clone())
                    } else if let InstKind::Store { value: stored, .. } =
                        &ctx.module.inst(store).kind
                    {
                        Self::expand(ctx, stored, subst, visited, depth + 1, used)
                    } else {
                        Self::leaf(value.clone())
                    };
                    return Self {
                        value: value.clone(),
                        ops: vec![child],
                        via_def: true,
                        val2val_used: false,
                    };
                }
                vec![Self::expand(ctx, ptr, subst, visited, depth + 1, used)]
            }
            InstKind::BinOp { lhs, rhs, .. } => vec![
                Self::expand(ctx, lhs, subst, visited, depth + 1, used),
                Self::expand(ctx, rhs, subst, visited, depth + 1, used),
            ],
            InstKind::Conv { value: v, .. } => {
                vec![Self::expand(ctx, v, subst, visited, depth + 1, used)]
            }
            InstKind::Store { .. } | InstKind::Pseudo(_) | InstKind::RetUndef => {
                return Self::leaf(value.clone());
            }
        };

        Self {
            value: value.clone(),
            ops,
            via_def: false,
            val2val_used: false,
        }
    }

    fn leaf(value: Value) -> Self {
        Self {
            value,
            ops: Vec::new(),
            via_def: false,
            val2val_used: false,
        }
    }

    pub fn val2val_used(&self) -> bool {
        self.val2val_used
    }

    pub fn root_const(&self) -> Option<i64> {
        self.value.as_const()
    }

    /// Does any node read the stack-pointer register?
    pub fn contains_stack_pointer(&self, abi: &Abi) -> bool {
        abi.is_stack_pointer(&self.value)
            || self.ops.iter().any(|n| n.contains_stack_pointer(abi))
    }

    /// Nodes in level order (root first).
    pub fn level_order(&self) -> Vec<&SymbolicTree> {
        let mut order = vec![self];
        let mut i = 0;
        while i < order.len() {
            for child in &order[i].ops {
                order.push(child);
            }
            i += 1;
        }
        order
    }

    fn node_count(&self) -> usize {
        1 + self.ops.iter().map(Self::node_count).sum::<usize>()
    }

    /// Simplify to a normal form: fold constants and arithmetic
    /// identities, collapse passthrough nodes, substitute known
    /// register reads. Runs to a fixed point; every step either removes
    /// a node or replaces one with a constant, so it terminates.
    pub fn simplify(&mut self, module: &Module, abi: &Abi) {
        loop {
            let before = self.node_count();
            self.simplify_once(module, abi);
            if self.node_count() == before {
                break;
            }
        }
    }

    fn simplify_once(&mut self, module: &Module, abi: &Abi) {
        for op in &mut self.ops {
            op.simplify_once(module, abi);
        }

        let kind = match &self.value {
            Value::Inst(i) => Some(&module.inst(*i).kind),
            _ => None,
        };

        match kind {
            // A read of the stack pointer canonicalizes to offset zero,
            // so `sp + k` folds to the plain offset `k`.
            Some(InstKind::Load { .. })
                if self.ops.len() == 1
                    && !self.via_def
                    && abi.is_stack_pointer(&self.ops[0].value) =>
            {
                self.replace_with_value(Value::const_int(0));
            }
            // A load expanded through its unique reaching store stands
            // for the stored value.
            Some(InstKind::Load { .. }) if self.via_def && self.ops.len() == 1 => {
                self.replace_with_child(0);
            }
            // Casts and no-op conversions pass their operand through.
            Some(InstKind::Conv { .. }) if self.ops.len() == 1 => {
                self.replace_with_child(0);
            }
            Some(InstKind::BinOp { op, .. }) if self.ops.len() == 2 => {
                self.simplify_binop(*op);
            }
            _ => {}
        }
    }

    fn simplify_binop(&mut self, op: BinOp) {
        let lhs = self.ops[0].value.as_const();
        let rhs = self.ops[1].value.as_const();

        if let (Some(l), Some(r)) = (lhs, rhs) {
            self.replace_with_value(Value::const_int(op.fold(l, r)));
            return;
        }

        let identity = match (op, lhs, rhs) {
            (BinOp::Add | BinOp::Or | BinOp::Xor, _, Some(0)) => Some(0),
            (BinOp::Add | BinOp::Or | BinOp::Xor, Some(0), _) => Some(1),
            (BinOp::Sub | BinOp::Shl | BinOp::Shr, _, Some(0)) => Some(0),
            (BinOp::Mul, _, Some(1)) => Some(0),
            (BinOp::Mul, Some(1), _) => Some(1),
            (BinOp::And, _, Some(-1)) => Some(0),
            (BinOp::And, Some(-1), _) => Some(1),
            _ => None,
        };
        if let Some(keep) = identity {
            self.replace_with_child(keep);
        }
    }

    fn replace_with_child(&mut self, index: usize) {
        let child = self.ops.swap_remove(index);
        self.value = child.value;
        self.ops = child.ops;
        self.via_def = child.via_def;
    }

    fn replace_with_value(&mut self, value: Value) {
        self.value = value;
        self.ops.clear();
        self.via_def = false;
    }
}

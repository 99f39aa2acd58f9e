//! Stack-variable reconstruction.
//!
//! Per function: find memory accesses whose address expression reduces
//! symbolically to `stack_pointer + offset`, intern one scalar slot per
//! distinct offset and rewrite the accesses to reference it. Rewrites
//! are deferred until the whole function has been analyzed so the
//! reaching-definitions analysis feeding the symbolic trees stays
//! valid throughout.

use mcl_cfg::CfgIndex;
use mcl_image::{DebugInfo, DebugVariable};
use mcl_ir::{Abi, BinOp, Builder, FuncId, InstId, InstKind, Module, Type, Value};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::reaching::ReachingDefinitions;
use crate::symbolic::{SymbolicContext, SymbolicTree, DEFAULT_MAX_DEPTH};
use crate::StackError;

/// A deferred rewrite: in `inst`, `from` becomes a reference to the
/// slot.
struct ReplaceItem {
    inst: InstId,
    from: Value,
    to: mcl_ir::SlotId,
}

/// The stack reconstruction pass.
pub struct StackAnalysis<'a> {
    abi: &'a Abi,
    debug_info: Option<&'a DebugInfo>,
    max_depth: usize,
}

impl<'a> StackAnalysis<'a> {
    pub fn new(abi: &'a Abi, debug_info: Option<&'a DebugInfo>) -> Self {
        Self {
            abi,
            debug_info,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Run over every function. Returns whether the module changed.
    pub fn run(
        &self,
        module: &mut Module,
        rd: &ReachingDefinitions,
        index: &CfgIndex,
    ) -> Result<bool, StackError> {
        let mut changed = false;
        let funcs: Vec<FuncId> = module.funcs().collect();
        for f in funcs {
            changed |= self.run_on_function(module, rd, index, f)?;
        }
        Ok(changed)
    }

    fn run_on_function(
        &self,
        module: &mut Module,
        rd: &ReachingDefinitions,
        index: &CfgIndex,
        func: FuncId,
    ) -> Result<bool, StackError> {
        debug!(name = %module.func(func).name, "stack analysis");

        let mut changed = false;
        let mut subst: FxHashMap<InstId, Value> = FxHashMap::default();
        let mut replace_items: Vec<ReplaceItem> = Vec::new();
        let insts: Vec<InstId> = module.func_insts(func).collect();

        // Phase A: stored values. A store whose value operand reduces
        // to a constant stack address seeds the substitution map, so
        // later address trees can see through memory.
        for &i in &insts {
            if let InstKind::Store {
                value,
                anchor: None,
                ..
            } = &module.inst(i).kind
            {
                let value = value.clone();
                let Some(ty) = module.value_type(&value) else {
                    continue;
                };
                self.handle_instruction(
                    module,
                    rd,
                    index,
                    func,
                    i,
                    &value,
                    ty,
                    &mut replace_items,
                    &mut subst,
                );
            }
        }

        // Phase B: pointer operands of loads and stores.
        for &i in &insts {
            match module.inst(i).kind.clone() {
                InstKind::Load { ptr, ty } => {
                    if self.abi.is_register(&ptr) {
                        continue;
                    }
                    if pointee_is_single_bit(module, &ptr) {
                        continue;
                    }
                    changed |= self.handle_instruction(
                        module,
                        rd,
                        index,
                        func,
                        i,
                        &ptr,
                        ty,
                        &mut replace_items,
                        &mut subst,
                    );
                }
                InstKind::Store {
                    ptr,
                    value,
                    anchor: None,
                } => {
                    if self.abi.is_register(&ptr) {
                        continue;
                    }
                    if pointee_is_single_bit(module, &ptr) {
                        continue;
                    }
                    let Some(ty) = module.value_type(&value) else {
                        continue;
                    };
                    changed |= self.handle_instruction(
                        module,
                        rd,
                        index,
                        func,
                        i,
                        &ptr,
                        ty,
                        &mut replace_items,
                        &mut subst,
                    );
                }
                _ => {}
            }
        }

        // Phase D: apply the deferred rewrites.
        self.apply_replacements(module, func, &replace_items)?;

        Ok(changed)
    }

    /// Analyze one access operand. On a `stack_pointer + offset` match,
    /// intern the slot and queue the rewrite.
    #[allow(clippy::too_many_arguments)]
    fn handle_instruction(
        &self,
        module: &mut Module,
        rd: &ReachingDefinitions,
        index: &CfgIndex,
        func: FuncId,
        inst: InstId,
        val: &Value,
        ty: Type,
        replace_items: &mut Vec<ReplaceItem>,
        subst: &mut FxHashMap<InstId, Value>,
    ) -> bool {
        let ctx = SymbolicContext {
            module: &*module,
            func,
            rd,
            max_depth: self.max_depth,
        };
        let mut tree = SymbolicTree::build(&ctx, val, subst);

        // Unless the substitution map already vouched for a stack
        // address, the tree must read the stack pointer somewhere.
        if !tree.val2val_used() && !tree.contains_stack_pointer(self.abi) {
            trace!(?inst, "no stack pointer");
            return false;
        }

        let mut debug_var = self.debug_stack_variable(module, index, func, &tree);
        tree.simplify(module, self.abi);
        if debug_var.is_none() {
            debug_var = self.debug_stack_variable(module, index, func, &tree);
        }

        let Some(offset) = tree.root_const() else {
            return false;
        };

        // Hint for later trees: this store writes a known stack address.
        if let InstKind::Store { value, .. } = &module.inst(inst).kind {
            if value == val {
                subst.insert(inst, Value::const_int(offset));
            }
        }

        let (name, slot_ty) = match &debug_var {
            Some(v) => (v.name.clone(), v.ty.clone()),
            None => (format!("stack_var_{}", offset), ty),
        };

        let (slot, created) = module.get_or_create_slot(func, offset, slot_ty, &name);
        if created {
            trace!(offset, name = %module.slot(slot).name, "new stack slot");
        }
        if let Some(v) = &debug_var {
            let s = module.slot_mut(slot);
            s.from_debug = true;
            s.name = v.name.clone();
        }

        replace_items.push(ReplaceItem {
            inst,
            from: val.clone(),
            to: slot,
        });

        true
    }

    /// Find the debug local matching the offset the tree adds to the
    /// stack pointer: the simplified root constant when available, else
    /// the first `load(register) + constant` node in level order.
    fn debug_stack_variable(
        &self,
        module: &Module,
        index: &CfgIndex,
        func: FuncId,
        tree: &SymbolicTree,
    ) -> Option<DebugVariable> {
        let info = self.debug_info?;
        let addr = index.function_address(func).value()?;
        let debug_fn = info.function_at(addr)?;

        let offset = tree.root_const().or_else(|| {
            let node = tree.level_order().into_iter().find(|n| {
                is_add_node(module, &n.value)
                    && n.ops.len() == 2
                    && is_register_load(module, &n.ops[0].value)
                    && n.ops[1].value.is_const()
            })?;
            node.ops[1].value.as_const()
        })?;

        debug_fn.local_at_offset(offset).cloned()
    }

    fn apply_replacements(
        &self,
        module: &mut Module,
        func: FuncId,
        items: &[ReplaceItem],
    ) -> Result<(), StackError> {
        let mut to_erase: Vec<InstId> = Vec::new();

        for ri in items {
            // Erasure is deferred until after the whole list, so every
            // queued instruction must still sit in its block.
            let home = module.inst(ri.inst).block;
            if !module.block(home).insts().contains(&ri.inst) {
                return Err(StackError::Invariant(
                    "replacement target vanished before rewrite",
                ));
            }

            let slot_ty = module.slot(ri.to).ty.clone();
            let slot_val = Value::Slot(ri.to);

            match module.inst(ri.inst).kind.clone() {
                InstKind::Store { ptr, value, anchor } if ptr == ri.from => {
                    if slot_ty.is_aggregate() {
                        // Coerce the slot to the original pointer type
                        // and retarget the store in place.
                        let ptr_ty = module
                            .value_type(&ptr)
                            .unwrap_or_else(|| Type::ptr_to(Type::Int(64)));
                        let mut b = Builder::before(module, ri.inst);
                        let conv = convert_value(&mut b, slot_val, &ptr_ty);
                        module.inst_mut(ri.inst).kind = InstKind::Store {
                            ptr: conv,
                            value,
                            anchor,
                        };
                    } else {
                        // Fresh store of the coerced value to the slot.
                        let mut b = Builder::before(module, ri.inst);
                        let v = convert_value(&mut b, value, &slot_ty);
                        b.store(slot_val, v);
                        to_erase.push(ri.inst);
                    }
                }
                InstKind::Load { ptr, ty } if ptr == ri.from => {
                    if slot_ty.is_aggregate() {
                        let ptr_ty = module
                            .value_type(&ptr)
                            .unwrap_or_else(|| Type::ptr_to(Type::Int(64)));
                        let mut b = Builder::before(module, ri.inst);
                        let conv = convert_value(&mut b, slot_val, &ptr_ty);
                        module.inst_mut(ri.inst).kind = InstKind::Load { ptr: conv, ty };
                    } else {
                        // Fresh load from the slot, coerced back to the
                        // old load's type, replacing all its uses.
                        let mut b = Builder::before(module, ri.inst);
                        let fresh = b.load(slot_val, slot_ty.clone());
                        let conv = convert_value(&mut b, Value::Inst(fresh), &ty);
                        module.replace_all_uses(func, &Value::Inst(ri.inst), &conv);
                        to_erase.push(ri.inst);
                    }
                }
                _ => {
                    // Some other operand (e.g. a stored stack address):
                    // coerce the slot to the operand's type and swap it
                    // in.
                    let from_ty = module
                        .value_type(&ri.from)
                        .unwrap_or_else(|| Type::Int(64));
                    let mut b = Builder::before(module, ri.inst);
                    let conv = convert_value(&mut b, slot_val, &from_ty);
                    module.replace_uses_in(ri.inst, &ri.from, &conv);
                }
            }
        }

        for i in to_erase {
            module.erase_inst(i);
        }

        Ok(())
    }
}

/// Coerce a value to a type, inserting a conversion only when needed.
fn convert_value(builder: &mut Builder<'_>, value: Value, ty: &Type) -> Value {
    if builder.module().value_type(&value).as_ref() == Some(ty) {
        return value;
    }
    Value::Inst(builder.conv(value, ty.clone()))
}

fn pointee_is_single_bit(module: &Module, ptr: &Value) -> bool {
    matches!(
        module.value_type(ptr).as_ref().and_then(|t| t.pointee()),
        Some(Type::Int(1))
    )
}

fn is_add_node(module: &Module, value: &Value) -> bool {
    matches!(
        value,
        Value::Inst(i) if matches!(module.inst(*i).kind, InstKind::BinOp { op: BinOp::Add, .. })
    )
}

fn is_register_load(module: &Module, value: &Value) -> bool {
    matches!(
        value,
        Value::Inst(i) if matches!(module.inst(*i).kind, InstKind::Load { ptr: Value::Reg(_), .. })
    )
}

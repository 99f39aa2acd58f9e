//! Worklist of pseudo terminators awaiting target patches.

use mcl_ir::{BlockId, FuncId, InstId, InstKind, Module, PseudoOp};
use tracing::debug;

use crate::DecodeError;

/// Holds every pseudo terminator the translator emitted until its real
/// target (function, true-branch block, false-branch block) is known.
///
/// Each `set_*` is idempotent for the same target and fails loudly when
/// called twice with different targets. Entries whose targets are still
/// incomplete at module finalization are left as-is: decoding is
/// best-effort.
#[derive(Default, Debug)]
pub struct PseudoWorklist {
    items: Vec<InstId>,
}

impl PseudoWorklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an emitted pseudo terminator.
    pub fn register(&mut self, pseudo: InstId) {
        self.items.push(pseudo);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Patch the callee of a pseudo call, or the tail-transfer function
    /// of a pseudo branch.
    pub fn set_target_function(
        &mut self,
        module: &mut Module,
        pseudo: InstId,
        func: FuncId,
    ) -> Result<(), DecodeError> {
        match &mut module.inst_mut(pseudo).kind {
            InstKind::Pseudo(PseudoOp::Call { target_fn, .. })
            | InstKind::Pseudo(PseudoOp::Br { target_fn, .. }) => {
                Self::patch(target_fn, func, pseudo, "function")
            }
            _ => Err(DecodeError::NotPatchable(pseudo)),
        }
    }

    /// Patch the taken edge of a branch or conditional branch.
    pub fn set_target_block_true(
        &mut self,
        module: &mut Module,
        pseudo: InstId,
        block: BlockId,
    ) -> Result<(), DecodeError> {
        match &mut module.inst_mut(pseudo).kind {
            InstKind::Pseudo(PseudoOp::Br { target_block, .. })
            | InstKind::Pseudo(PseudoOp::CondBr {
                target_true: target_block,
                ..
            }) => Self::patch(target_block, block, pseudo, "true block"),
            _ => Err(DecodeError::NotPatchable(pseudo)),
        }
    }

    /// Patch the fallthrough edge of a conditional branch.
    pub fn set_target_block_false(
        &mut self,
        module: &mut Module,
        pseudo: InstId,
        block: BlockId,
    ) -> Result<(), DecodeError> {
        match &mut module.inst_mut(pseudo).kind {
            InstKind::Pseudo(PseudoOp::CondBr { target_false, .. }) => {
                Self::patch(target_false, block, pseudo, "false block")
            }
            _ => Err(DecodeError::NotPatchable(pseudo)),
        }
    }

    /// Registered pseudo terminators whose targets are still incomplete.
    pub fn incomplete(&self, module: &Module) -> Vec<InstId> {
        self.items
            .iter()
            .copied()
            .filter(|&i| match module.inst(i).kind.as_pseudo() {
                Some(PseudoOp::Call { target_fn, .. }) => target_fn.is_none(),
                Some(PseudoOp::Br {
                    target_block,
                    target_fn,
                    ..
                }) => target_block.is_none() && target_fn.is_none(),
                Some(PseudoOp::CondBr {
                    target_true,
                    target_false,
                    ..
                }) => target_true.is_none() || target_false.is_none(),
                // Returns need no patching.
                Some(PseudoOp::Return { .. }) | None => false,
            })
            .collect()
    }

    fn patch<T: Copy + PartialEq + std::fmt::Debug>(
        slot: &mut Option<T>,
        value: T,
        pseudo: InstId,
        what: &'static str,
    ) -> Result<(), DecodeError> {
        match slot {
            None => {
                *slot = Some(value);
                Ok(())
            }
            Some(existing) if *existing == value => {
                debug!(?pseudo, what, "re-patching with identical target");
                Ok(())
            }
            Some(_) => Err(DecodeError::InconsistentPatch { pseudo, what }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcl_ir::Value;

    fn setup() -> (Module, PseudoWorklist, InstId, InstId) {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b = m.add_block(f, "entry");
        let call = m.push_inst(
            b,
            InstKind::Pseudo(PseudoOp::call(Value::const_int(0x2000))),
        );
        let cond = m.push_inst(
            b,
            InstKind::Pseudo(PseudoOp::cond_br(
                Value::const_int(1),
                Value::const_int(0x1010),
            )),
        );
        let mut wl = PseudoWorklist::new();
        wl.register(call);
        wl.register(cond);
        (m, wl, call, cond)
    }

    #[test]
    fn test_patch_call_target() {
        let (mut m, mut wl, call, _) = setup();
        let g = m.add_function("g");
        wl.set_target_function(&mut m, call, g).unwrap();
        assert!(matches!(
            m.inst(call).kind.as_pseudo(),
            Some(PseudoOp::Call {
                target_fn: Some(tf),
                ..
            }) if *tf == g
        ));
    }

    #[test]
    fn test_repatch_same_target_is_idempotent() {
        let (mut m, mut wl, call, _) = setup();
        let g = m.add_function("g");
        wl.set_target_function(&mut m, call, g).unwrap();
        wl.set_target_function(&mut m, call, g).unwrap();
    }

    #[test]
    fn test_conflicting_patch_fails() {
        let (mut m, mut wl, call, _) = setup();
        let g = m.add_function("g");
        let h = m.add_function("h");
        wl.set_target_function(&mut m, call, g).unwrap();
        let err = wl.set_target_function(&mut m, call, h).unwrap_err();
        assert!(matches!(err, DecodeError::InconsistentPatch { .. }));
    }

    #[test]
    fn test_cond_branch_edges() {
        let (mut m, mut wl, _, cond) = setup();
        let f = m.inst(cond).block;
        let func = m.block(f).func;
        let bt = m.add_block(func, "bb_true");
        let bf = m.add_block(func, "bb_false");
        wl.set_target_block_true(&mut m, cond, bt).unwrap();
        assert_eq!(wl.incomplete(&m), vec![cond]);
        wl.set_target_block_false(&mut m, cond, bf).unwrap();
        assert!(wl.incomplete(&m).iter().all(|&i| i != cond));
    }

    #[test]
    fn test_incomplete_reports_unpatched_call() {
        let (m, wl, call, cond) = setup();
        assert_eq!(wl.incomplete(&m), vec![call, cond]);
    }
}

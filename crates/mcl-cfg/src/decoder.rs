//! Decoder driver: drains the jump-target worklist, lifts instructions
//! through the external translator and stitches the emitted IR into
//! functions and basic blocks.

use mcl_image::{Address, AddressRange, DebugInfo, Image, RangeSet};
use mcl_ir::{BlockId, Builder, FuncId, InstId, Module, PseudoOp, Value};
use tracing::{debug, trace, warn};

use crate::index::CfgIndex;
use crate::jump_targets::{JumpTarget, JumpTargetKind, JumpTargets};
use crate::pseudo_worklist::PseudoWorklist;
use crate::translator::{DecodeMode, Translator};
use crate::DecodeError;

/// Incremental control-flow decoder.
///
/// Owns the allowed/alternative range sets, the jump-target worklist,
/// the address↔IR index and the pseudo-call worklist for the duration
/// of one module decode.
pub struct Decoder<'a> {
    image: &'a Image,
    mode: DecodeMode,
    allowed: RangeSet,
    alternative: RangeSet,
    jump_targets: JumpTargets,
    index: CfgIndex,
    pseudo_worklist: PseudoWorklist,
    changed: bool,
}

impl<'a> Decoder<'a> {
    /// Create a decoder seeded from the image: executable segments fill
    /// the allowed set, readable-non-executable segments the
    /// alternative set, and the worklist starts with the entry point,
    /// exported functions and debug-info functions.
    pub fn new(image: &'a Image, debug_info: Option<&DebugInfo>, mode: DecodeMode) -> Self {
        let mut decoder = Self {
            image,
            mode,
            allowed: RangeSet::new(),
            alternative: RangeSet::new(),
            jump_targets: JumpTargets::new(),
            index: CfgIndex::new(),
            pseudo_worklist: PseudoWorklist::new(),
            changed: false,
        };
        decoder.init_ranges();
        decoder.init_jump_targets(debug_info);
        decoder
    }

    fn init_ranges(&mut self) {
        for r in self.image.executable_ranges() {
            self.allowed.insert(r);
        }
        for r in self.image.alternative_ranges() {
            self.alternative.insert(r);
        }
    }

    fn init_jump_targets(&mut self, debug_info: Option<&DebugInfo>) {
        self.jump_targets.push(
            Address::new(self.image.entry_point),
            JumpTargetKind::EntryPoint,
            self.mode,
            None,
        );
        for addr in self.image.function_symbols() {
            self.jump_targets.push(
                Address::new(addr),
                JumpTargetKind::EntryPoint,
                self.mode,
                None,
            );
        }
        if let Some(info) = debug_info {
            for addr in info.function_addresses() {
                self.jump_targets.push(
                    Address::new(addr),
                    JumpTargetKind::EntryPoint,
                    self.mode,
                    None,
                );
            }
        }
    }

    pub fn index(&self) -> &CfgIndex {
        &self.index
    }

    /// Take ownership of the index once decoding is done.
    pub fn into_index(self) -> CfgIndex {
        self.index
    }

    pub fn allowed(&self) -> &RangeSet {
        &self.allowed
    }

    pub fn alternative(&self) -> &RangeSet {
        &self.alternative
    }

    pub fn pseudo_worklist(&self) -> &PseudoWorklist {
        &self.pseudo_worklist
    }

    /// Drain the worklist. Returns whether the module changed.
    pub fn run(
        &mut self,
        module: &mut Module,
        translator: &mut dyn Translator,
    ) -> Result<bool, DecodeError> {
        debug!(allowed = %self.allowed, alternative = %self.alternative, "decoding");

        while let Some(jt) = self.jump_targets.pop() {
            trace!(target = %jt, "processing jump target");
            self.decode_jump_target(module, translator, &jt)?;
        }

        let open = self.pseudo_worklist.incomplete(module);
        if !open.is_empty() {
            debug!(count = open.len(), "pseudo terminators left unpatched");
        }

        Ok(self.changed)
    }

    fn decode_jump_target(
        &mut self,
        module: &mut Module,
        translator: &mut dyn Translator,
        jt: &JumpTarget,
    ) -> Result<(), DecodeError> {
        let Some(start) = jt.address.value() else {
            debug!("unknown target address -> skipped");
            return Ok(());
        };

        let Some(range) = self.allowed.range_of(start) else {
            return self.recover_outside_range(module, jt, start);
        };
        trace!(%range, "found range");

        let image = self.image;
        let Some(bytes) = image.raw_bytes(start) else {
            debug!(address = %jt.address, "found no data -> skipped");
            return Ok(());
        };
        let avail = ((range.end - start) as usize).min(bytes.len());
        let bytes = &bytes[..avail];

        let Some(block) = self.place_builder(module, jt, start)? else {
            return Ok(());
        };

        let mut builder = Builder::at_terminator(module, block);
        let mut addr = start;
        let mut offset = 0usize;

        loop {
            let window = &bytes[offset..];
            if window.is_empty() {
                break;
            }

            trace!(address = %Address::new(addr), "translating");
            let res = translator.translate_one(window, addr, jt.mode, &mut builder);
            let Some(inst) = res.inst else {
                // Local recovery: close the block, enqueue nothing.
                warn!(address = %Address::new(addr), "translation failed");
                break;
            };
            if res.failed || res.size == 0 {
                warn!(address = %Address::new(addr), "translation failed");
                break;
            }

            self.index.insert_inst(addr, inst);
            self.changed = true;

            let bb_end =
                self.classify_terminator(builder.module(), addr, res.size, res.pseudo, jt.mode);

            addr += res.size;
            offset = (offset + res.size as usize).min(bytes.len());
            if bb_end {
                break;
            }
        }

        drop(builder);

        if addr > start {
            let decoded = AddressRange::new(start, addr);
            trace!(range = %decoded, "decoded range");
            self.allowed.remove(decoded);
        }

        Ok(())
    }

    /// Kind-dependent recovery when a popped target lies outside every
    /// allowed range: the bytes were already decoded, so the target
    /// must be patched against existing IR (possibly splitting it).
    fn recover_outside_range(
        &mut self,
        module: &mut Module,
        jt: &JumpTarget,
        addr: u64,
    ) -> Result<(), DecodeError> {
        match jt.kind {
            JumpTargetKind::CallAfter => {
                // The address after a call is always inside code.
                Err(DecodeError::Invariant(
                    "call fallthrough outside any allowed range",
                ))
            }
            JumpTargetKind::BrFalse => {
                let from = self.from_inst(jt)?;
                let from_fn = self.func_of(module, from);
                match self.index.block_at(addr) {
                    Some(bb) if module.block(bb).func == from_fn => {
                        self.pseudo_worklist
                            .set_target_block_false(module, from, bb)?;
                        Ok(())
                    }
                    Some(_) => Err(DecodeError::Invariant(
                        "false branch target in a different function",
                    )),
                    None => Err(DecodeError::Invariant(
                        "false branch target has no basic block",
                    )),
                }
            }
            JumpTargetKind::BrTrue => {
                let from = self.from_inst(jt)?;
                let from_fn = self.func_of(module, from);
                if let Some(bb) = self.index.block_at(addr) {
                    if module.block(bb).func != from_fn {
                        return Err(DecodeError::Invariant(
                            "true branch target in a different function",
                        ));
                    }
                    self.pseudo_worklist
                        .set_target_block_true(module, from, bb)?;
                    return Ok(());
                }
                if let Some(inst) = self.index.inst_at(addr) {
                    if self.func_of(module, inst) != from_fn {
                        return Err(DecodeError::Invariant(
                            "true branch target instruction in a different function",
                        ));
                    }
                    let bb = self.block_start_at(module, inst, addr);
                    self.pseudo_worklist
                        .set_target_block_true(module, from, bb)?;
                    return Ok(());
                }
                Err(DecodeError::Invariant(
                    "true branch target has no decoded instruction",
                ))
            }
            JumpTargetKind::CallTarget => {
                let from = self.from_inst(jt)?;
                if let Some(f) = self.index.function_at(addr) {
                    self.pseudo_worklist.set_target_function(module, from, f)?;
                    return Ok(());
                }
                if let Some(inst) = self.index.inst_at(addr) {
                    // The call lands mid-function: the suffix becomes a
                    // new function.
                    let bb = self.block_start_at(module, inst, addr);
                    let name = format!("function_{:x}", addr);
                    let new_fn = module.split_function(bb, &name);
                    self.index.insert_function(addr, new_fn);
                    self.pseudo_worklist
                        .set_target_function(module, from, new_fn)?;
                    self.changed = true;
                    return Ok(());
                }
                Err(DecodeError::Invariant(
                    "call target has no decoded instruction",
                ))
            }
            JumpTargetKind::EntryPoint | JumpTargetKind::ReturnTarget => {
                debug!(address = %jt.address, "found no range -> skipped");
                Ok(())
            }
        }
    }

    /// Make the instruction a block start, splitting its current block
    /// when it sits mid-block, and index the result at `addr`.
    fn block_start_at(&mut self, module: &mut Module, inst: InstId, addr: u64) -> BlockId {
        let (block, pos) = module.position_of(inst);
        if pos == 0 {
            if self.index.block_address(block).is_undefined() {
                self.index.insert_block(addr, block);
            }
            return block;
        }
        let name = format!("bb_{:x}", addr);
        let new_block = module.split_block(block, pos, &name);
        self.index.insert_block(addr, new_block);
        self.changed = true;
        new_block
    }

    /// Place the IR builder for a jump target whose address lies inside
    /// an allowed range, creating functions and blocks per kind.
    /// Returns the block the decode loop should append into, or `None`
    /// when the target should be skipped.
    fn place_builder(
        &mut self,
        module: &mut Module,
        jt: &JumpTarget,
        addr: u64,
    ) -> Result<Option<BlockId>, DecodeError> {
        match jt.kind {
            JumpTargetKind::EntryPoint => {
                if self.index.function_at(addr).is_some() {
                    debug!(address = %jt.address, "entry point already decoded -> skipped");
                    return Ok(None);
                }
                let (_, entry) = self.create_function(module, addr);
                Ok(Some(entry))
            }
            JumpTargetKind::CallAfter => {
                // Continue in the caller, in a fresh block right after
                // the pseudo call's block.
                let from = self.from_inst(jt)?;
                let from_block = module.inst(from).block;
                let func = module.block(from_block).func;
                let block = self.create_block_after(module, addr, func, from_block);
                Ok(Some(block))
            }
            JumpTargetKind::BrFalse => {
                let from = self.from_inst(jt)?;
                let from_block = module.inst(from).block;
                let func = module.block(from_block).func;
                let block = self.create_block_after(module, addr, func, from_block);
                self.pseudo_worklist
                    .set_target_block_false(module, from, block)?;
                Ok(Some(block))
            }
            JumpTargetKind::BrTrue => {
                let from = self.from_inst(jt)?;
                let from_fn = self.func_of(module, from);
                match self.index.function_before(addr) {
                    None => {
                        let (f, entry) = self.create_function(module, addr);
                        self.pseudo_worklist.set_target_function(module, from, f)?;
                        Ok(Some(entry))
                    }
                    Some(f) if f == from_fn => {
                        let Some(prev) = self.index.block_before(addr) else {
                            // In this function, but before its first block.
                            return Err(DecodeError::Invariant(
                                "branch target precedes the function's first block",
                            ));
                        };
                        let block = self.create_block_after(module, addr, f, prev);
                        self.pseudo_worklist
                            .set_target_block_true(module, from, block)?;
                        Ok(Some(block))
                    }
                    Some(f) => {
                        if self.index.function_address(f) == Address::new(addr) {
                            // Such a function exists, so its entry block
                            // was already decoded; the range check should
                            // have caught this.
                            return Err(DecodeError::Invariant(
                                "branch target function entry already decoded",
                            ));
                        }
                        if self.index.function_containing(module, addr).is_some() {
                            return Err(DecodeError::Invariant(
                                "branch into the middle of another function",
                            ));
                        }
                        let (new_fn, entry) = self.create_function(module, addr);
                        self.pseudo_worklist
                            .set_target_function(module, from, new_fn)?;
                        Ok(Some(entry))
                    }
                }
            }
            JumpTargetKind::CallTarget => {
                let from = self.from_inst(jt)?;
                if self.index.function_at(addr).is_some() {
                    return Err(DecodeError::Invariant(
                        "call target function entry already decoded",
                    ));
                }
                if self.index.function_containing(module, addr).is_some() {
                    return Err(DecodeError::Invariant(
                        "call target inside an undecoded span of another function",
                    ));
                }
                let (f, entry) = self.create_function(module, addr);
                self.pseudo_worklist.set_target_function(module, from, f)?;
                Ok(Some(entry))
            }
            JumpTargetKind::ReturnTarget => {
                // Return targets are opportunistic; decoding them as
                // fresh code is not worth a wrong function boundary.
                debug!(address = %jt.address, "return target -> skipped");
                Ok(None)
            }
        }
    }

    /// Classify the pseudo terminator emitted for the instruction at
    /// `addr` and enqueue follow-up targets. Returns whether the
    /// current block is finished.
    fn classify_terminator(
        &mut self,
        module: &Module,
        addr: u64,
        size: u64,
        pseudo: Option<InstId>,
        mode: DecodeMode,
    ) -> bool {
        let Some(p) = pseudo else {
            return false;
        };
        let Some(op) = module.inst(p).kind.as_pseudo() else {
            return false;
        };
        let next = Address::new(addr + size);

        match op {
            PseudoOp::Call { target, .. } => {
                if let Some(t) = constant_target(target) {
                    trace!(from = %Address::new(addr), to = %t, "call");
                    self.jump_targets
                        .push(t, JumpTargetKind::CallTarget, mode, Some(p));
                }
                // A call may return: the next address is always code.
                self.jump_targets
                    .push(next, JumpTargetKind::CallAfter, mode, Some(p));
                self.pseudo_worklist.register(p);
                true
            }
            PseudoOp::Return { target } => {
                // Computing the return target (an address on the stack)
                // rarely succeeds, but try anyway.
                if let Some(t) = constant_target(target) {
                    trace!(from = %Address::new(addr), to = %t, "return");
                    self.jump_targets
                        .push(t, JumpTargetKind::ReturnTarget, mode, Some(p));
                }
                self.pseudo_worklist.register(p);
                true
            }
            PseudoOp::Br { target, .. } => {
                if let Some(t) = constant_target(target) {
                    trace!(from = %Address::new(addr), to = %t, "br");
                    self.jump_targets
                        .push(t, JumpTargetKind::BrTrue, mode, Some(p));
                }
                self.pseudo_worklist.register(p);
                true
            }
            PseudoOp::CondBr { target, .. } => {
                if let Some(t) = constant_target(target) {
                    trace!(from = %Address::new(addr), to = %t, "cond br (true)");
                    self.jump_targets
                        .push(t, JumpTargetKind::BrTrue, mode, Some(p));
                }
                self.jump_targets
                    .push(next, JumpTargetKind::BrFalse, mode, Some(p));
                self.pseudo_worklist.register(p);
                true
            }
        }
    }

    fn create_function(&mut self, module: &mut Module, addr: u64) -> (FuncId, BlockId) {
        let f = module.add_function(&format!("function_{:x}", addr));
        let entry = module.add_block(f, &format!("bb_{:x}", addr));
        module.push_inst(entry, mcl_ir::InstKind::RetUndef);
        self.index.insert_function(addr, f);
        self.index.insert_block(addr, entry);
        self.changed = true;
        (f, entry)
    }

    fn create_block_after(
        &mut self,
        module: &mut Module,
        addr: u64,
        func: FuncId,
        after: BlockId,
    ) -> BlockId {
        let block = module.insert_block_after(func, after, &format!("bb_{:x}", addr));
        module.push_inst(block, mcl_ir::InstKind::RetUndef);
        self.index.insert_block(addr, block);
        self.changed = true;
        block
    }

    fn from_inst(&self, jt: &JumpTarget) -> Result<InstId, DecodeError> {
        jt.from_inst
            .ok_or(DecodeError::Invariant("jump target without origin"))
    }

    fn func_of(&self, module: &Module, inst: InstId) -> FuncId {
        module.block(module.inst(inst).block).func
    }
}

/// The "folds to a constant address" test. Anything beyond a constant
/// integer argument is deferred to a future symbolic evaluation.
fn constant_target(value: &Value) -> Option<Address> {
    value.as_const().map(|c| Address::new(c as u64))
}

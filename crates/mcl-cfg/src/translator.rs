//! Contract of the external single-instruction translator.

use mcl_ir::{Builder, InstId};

/// Opaque decoder-mode token (instruction-set sub-mode). Produced and
/// consumed by the translator; the decoder only carries it through
/// jump targets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct DecodeMode(pub u32);

/// Result of lifting one machine instruction.
#[derive(Clone, Debug)]
pub struct Translated {
    /// Representative emitted instruction (the anchor), used for the
    /// address↔IR mapping. `None` when nothing was emitted.
    pub inst: Option<InstId>,
    /// Pseudo terminator the translator synthesized, if the machine
    /// instruction was control flow.
    pub pseudo: Option<InstId>,
    /// Bytes consumed.
    pub size: u64,
    /// Set on decode error.
    pub failed: bool,
}

impl Translated {
    pub fn failure() -> Self {
        Self {
            inst: None,
            pseudo: None,
            size: 0,
            failed: true,
        }
    }
}

/// Lifts one machine instruction at a time into the IR.
///
/// The translator emits IR through `builder` and reports what it
/// emitted. Classification of the emitted pseudo terminator is done by
/// the decoder via [`mcl_ir::PseudoOp`] pattern matches.
pub trait Translator {
    fn translate_one(
        &mut self,
        bytes: &[u8],
        address: u64,
        mode: DecodeMode,
        builder: &mut Builder<'_>,
    ) -> Translated;
}

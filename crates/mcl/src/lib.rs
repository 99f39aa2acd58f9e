//! MCL - machine-code lifter.
//!
//! Lifts a machine-code binary into a typed, structured IR: the
//! control-flow decoder discovers code incrementally through an
//! external single-instruction translator, and the stack pass rewrites
//! `stack_pointer + offset` accesses into per-function slots.
//!
//! # Example
//!
//! ```ignore
//! use mcl::{Abi, Config, Image, Lifter, RegId};
//!
//! let image = Image::from_code(code, 0x1000);
//! let lifter = Lifter::new(&image, Abi::new(RegId(2)));
//! let result = lifter.run(&mut translator)?;
//! ```

pub use mcl_cfg::{
    control_flow_json, CfgIndex, DecodeError, DecodeMode, Decoder, JumpTarget, JumpTargetKind,
    JumpTargets, PseudoWorklist, Translated, Translator,
};
pub use mcl_image::{
    Address, AddressRange, DebugFunction, DebugInfo, DebugVariable, Image, ImageError, RangeSet,
    Segment, Symbol, SEG_EXEC, SEG_READ, SEG_WRITE,
};
pub use mcl_ir::{
    Abi, BinOp, BlockId, Builder, FuncId, InstId, InstKind, Module, PseudoOp, RegId, SlotId,
    StackSlot, Type, Value,
};
pub use mcl_opt::{ReachingDefinitions, StackAnalysis, StackError, SymbolicTree, DEFAULT_MAX_DEPTH};

pub mod toy;

use thiserror::Error;

/// Lifter errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("image error: {0}")]
    Image(#[from] ImageError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("stack pass error: {0}")]
    Stack(#[from] StackError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Lifter configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Initial decoder mode handed to the translator.
    pub mode: DecodeMode,
    /// Cap on symbolic tree expansion depth.
    pub max_expansion_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: DecodeMode::default(),
            max_expansion_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_mode(mut self, mode: DecodeMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_max_expansion_depth(mut self, depth: usize) -> Self {
        self.max_expansion_depth = depth;
        self
    }
}

/// Result of one lift.
pub struct LiftResult {
    pub module: Module,
    /// Whether decoding or the stack pass changed the module.
    pub changed: bool,
    pub index: CfgIndex,
    /// Control-flow dump; a pure function of the final module.
    pub cfg_json: String,
}

/// The lifting pipeline: decode, then reconstruct stack variables.
pub struct Lifter<'a> {
    image: &'a Image,
    debug_info: Option<&'a DebugInfo>,
    abi: Abi,
    config: Config,
}

impl<'a> Lifter<'a> {
    pub fn new(image: &'a Image, abi: Abi) -> Self {
        Self {
            image,
            debug_info: None,
            abi,
            config: Config::default(),
        }
    }

    #[must_use]
    pub fn with_debug_info(mut self, debug_info: &'a DebugInfo) -> Self {
        self.debug_info = Some(debug_info);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Decode the image and run the stack pass over the result.
    pub fn run(&self, translator: &mut dyn Translator) -> Result<LiftResult> {
        let mut module = Module::new();

        let mut decoder = Decoder::new(self.image, self.debug_info, self.config.mode);
        let mut changed = decoder.run(&mut module, translator)?;

        let rd = ReachingDefinitions::run(&module);
        let stack = StackAnalysis::new(&self.abi, self.debug_info)
            .with_max_depth(self.config.max_expansion_depth);
        changed |= stack.run(&mut module, &rd, decoder.index())?;

        let cfg_json = control_flow_json(&module, decoder.index());
        let index = decoder.into_index();

        Ok(LiftResult {
            module,
            changed,
            index,
            cfg_json,
        })
    }
}

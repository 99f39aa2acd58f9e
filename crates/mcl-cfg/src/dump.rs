//! Control-flow JSON dump.
//!
//! Produces a dump of the decoded module's control flow in a format
//! that can be diffed against control-flow dumps from other tools.
//! The output is a pure function of the final module and index.

use mcl_ir::{BlockId, FuncId, InstKind, Module, PseudoOp};
use serde::Serialize;

use crate::index::CfgIndex;

#[derive(Serialize)]
struct JsonBlock {
    address: String,
    address_end: String,
    succs: Vec<String>,
}

#[derive(Serialize)]
struct JsonFunction {
    address: String,
    address_end: String,
    bbs: Vec<JsonBlock>,
    code_refs: Vec<String>,
}

/// Render the module's control flow as JSON.
pub fn control_flow_json(module: &Module, index: &CfgIndex) -> String {
    let mut funcs = Vec::new();

    for (_, f) in index.functions() {
        let start = index.function_address(f);
        let end = index.function_end(module, f);
        let (Some(_), Some(_)) = (start.value(), end.value()) else {
            continue;
        };

        let mut bbs = Vec::new();
        for &b in module.func(f).blocks() {
            // Synthetic blocks internal to a lifted macro-instruction
            // carry no address and are elided.
            let bb_start = index.block_address(b);
            let bb_end = index.block_end(module, b);
            let (Some(_), Some(_)) = (bb_start.value(), bb_end.value()) else {
                continue;
            };

            bbs.push(JsonBlock {
                address: bb_start.to_hex(),
                address_end: bb_end.to_hex(),
                succs: successor_addresses(module, index, f, b),
            });
        }

        funcs.push(JsonFunction {
            address: start.to_hex(),
            address_end: end.to_hex(),
            bbs,
            code_refs: Vec::new(),
        });
    }

    serde_json::to_string_pretty(&funcs).expect("CFG dump serialization")
}

/// Successor addresses of a block, taken from its patched pseudo
/// terminator. An address-less successor is reported as the nearest
/// preceding addressed block of the function.
fn successor_addresses(
    module: &Module,
    index: &CfgIndex,
    func: FuncId,
    block: BlockId,
) -> Vec<String> {
    let mut succs = Vec::new();
    let Some(&last) = module.block(block).insts().iter().rev().find(|&&i| {
        matches!(module.inst(i).kind, InstKind::Pseudo(_))
    }) else {
        return succs;
    };

    let targets: Vec<BlockId> = match module.inst(last).kind.as_pseudo() {
        Some(PseudoOp::Br {
            target_block: Some(b),
            ..
        }) => vec![*b],
        Some(PseudoOp::CondBr {
            target_true,
            target_false,
            ..
        }) => target_true.iter().chain(target_false.iter()).copied().collect(),
        Some(PseudoOp::Call { .. }) => {
            // A call falls through to the next block in function order.
            let blocks = module.func(func).blocks();
            blocks
                .iter()
                .position(|&b| b == block)
                .and_then(|p| blocks.get(p + 1))
                .map(|&b| vec![b])
                .unwrap_or_default()
        }
        _ => Vec::new(),
    };

    for t in targets {
        if let Some(addr) = addressed_block(module, index, func, t) {
            succs.push(addr);
        }
    }
    succs
}

fn addressed_block(
    module: &Module,
    index: &CfgIndex,
    func: FuncId,
    block: BlockId,
) -> Option<String> {
    let addr = index.block_address(block);
    if addr.is_defined() {
        return Some(addr.to_hex());
    }
    // Walk back to the nearest predecessor block that has an address.
    let blocks = module.func(func).blocks();
    let pos = blocks.iter().position(|&b| b == block)?;
    blocks[..pos]
        .iter()
        .rev()
        .map(|&b| index.block_address(b))
        .find(|a| a.is_defined())
        .map(|a| a.to_hex())
}

//! End-to-end decoder scenarios over the toy ISA.

use mcl::toy::{self, ToyTranslator};
use mcl::{
    DecodeMode, Decoder, Image, InstId, InstKind, Module, PseudoOp, Segment, SEG_EXEC, SEG_READ,
    Symbol,
};

fn program(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.iter().flatten().copied().collect()
}

fn decode(image: &Image) -> (Module, Decoder<'_>) {
    let mut module = Module::new();
    let mut decoder = Decoder::new(image, None, DecodeMode::default());
    decoder
        .run(&mut module, &mut ToyTranslator::new())
        .expect("decode");
    (module, decoder)
}

fn pseudos(module: &Module, pred: impl Fn(&PseudoOp) -> bool) -> Vec<InstId> {
    module
        .funcs()
        .flat_map(|f| module.func_insts(f).collect::<Vec<_>>())
        .filter(|&i| matches!(module.inst(i).kind.as_pseudo(), Some(op) if pred(op)))
        .collect()
}

#[test]
fn test_linear_block() {
    // 0x1000: three arithmetic ops, then a return; trailing padding
    // stays undecoded.
    let code = program(&[
        toy::add_imm(1, 2),  // 0x1000
        toy::add_imm(3, 4),  // 0x1003
        toy::add_imm(5, 6),  // 0x1006
        toy::ret(),          // 0x1009
        toy::nop(),
        toy::nop(),
        toy::nop(),
    ]);
    let image = Image::from_code(code, 0x1000);
    let (module, decoder) = decode(&image);

    let f = decoder.index().function_at(0x1000).expect("function");
    assert_eq!(decoder.index().functions().count(), 1);
    assert_eq!(module.func(f).blocks().len(), 1);

    let block = module.func(f).blocks()[0];
    let arith = module
        .block(block)
        .insts()
        .iter()
        .filter(|&&i| matches!(module.inst(i).kind, InstKind::BinOp { .. }))
        .count();
    assert_eq!(arith, 3);
    assert_eq!(pseudos(&module, PseudoOp::is_return).len(), 1);

    // Exactly [0x1000, 0x100a) was consumed.
    assert!(!decoder.allowed().contains(0x1000));
    assert!(!decoder.allowed().contains(0x1009));
    assert!(decoder.allowed().contains(0x100a));
    assert_eq!(decoder.allowed().coverage(), 3);
}

#[test]
fn test_call_and_fallthrough() {
    // 0x1000: call 0x2000; 0x1005: ret -- with the callee in its own
    // segment.
    let caller = program(&[toy::call(0x2000), toy::ret()]);
    let image = Image::new(
        0x1000,
        vec![
            Segment::new(0x1000, caller, SEG_READ | SEG_EXEC),
            Segment::new(0x2000, toy::ret(), SEG_READ | SEG_EXEC),
        ],
        Vec::new(),
    )
    .unwrap();
    let (module, decoder) = decode(&image);

    let f_caller = decoder.index().function_at(0x1000).expect("caller");
    let f_callee = decoder.index().function_at(0x2000).expect("callee");

    // The pseudo call was patched to the callee.
    let calls = pseudos(&module, PseudoOp::is_call);
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        module.inst(calls[0]).kind.as_pseudo(),
        Some(PseudoOp::Call {
            target_fn: Some(tf),
            ..
        }) if *tf == f_callee
    ));

    // The return after the call sits in a second block of the caller.
    let after = decoder.index().block_at(0x1005).expect("fallthrough block");
    assert_eq!(module.block(after).func, f_caller);
    assert_eq!(module.func(f_caller).blocks().len(), 2);
    assert!(module
        .block(after)
        .insts()
        .iter()
        .any(|&i| matches!(module.inst(i).kind.as_pseudo(), Some(op) if op.is_return())));

    // The CFG dump reports the call block's fallthrough successor.
    let json = mcl::control_flow_json(&module, decoder.index());
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed[0]["bbs"][0]["succs"][0], "0x1005");
}

#[test]
fn test_conditional_branch_forward() {
    // 0x1000: test; 0x1002: jz 0x1010; 0x1008: ret; 0x1010: ret.
    let code = program(&[
        toy::test_flags(),  // 0x1000
        toy::jz(0x1010),    // 0x1002
        toy::ret(),         // 0x1008
        toy::nop(),         // 0x1009..0x1010 padding
        toy::nop(),
        toy::nop(),
        toy::nop(),
        toy::nop(),
        toy::nop(),
        toy::nop(),
        toy::ret(),         // 0x1010
    ]);
    let image = Image::from_code(code, 0x1000);
    let (module, decoder) = decode(&image);

    assert_eq!(decoder.index().functions().count(), 1);
    let f = decoder.index().function_at(0x1000).unwrap();
    assert_eq!(module.func(f).blocks().len(), 3);

    let bb_false = decoder.index().block_at(0x1008).expect("false block");
    let bb_true = decoder.index().block_at(0x1010).expect("true block");
    assert_eq!(module.block(bb_false).func, f);
    assert_eq!(module.block(bb_true).func, f);

    let branches = pseudos(&module, PseudoOp::is_cond_branch);
    assert_eq!(branches.len(), 1);
    assert!(matches!(
        module.inst(branches[0]).kind.as_pseudo(),
        Some(PseudoOp::CondBr {
            target_true: Some(t),
            target_false: Some(fb),
            ..
        }) if *t == bb_true && *fb == bb_false
    ));
}

#[test]
fn test_call_back_splits_function() {
    // One function at 0x1000 gets decoded first; a later call into its
    // middle (0x1003) splits it.
    let code = program(&[
        toy::add_imm(1, 2), // 0x1000
        toy::add_imm(3, 4), // 0x1003
        toy::ret(),         // 0x1006
        toy::call(0x1003),  // 0x1007, seeded via symbol
        toy::ret(),         // 0x100c
    ]);
    let mut image = Image::from_code(code, 0x1000);
    image.symbols.push(Symbol {
        name: "helper".to_string(),
        address: 0x1007,
        is_function: true,
    });
    let (module, decoder) = decode(&image);

    let f_head = decoder.index().function_at(0x1000).expect("head");
    let f_split = decoder.index().function_at(0x1003).expect("split suffix");
    assert_eq!(module.func(f_split).name, "function_1003");

    // The suffix block moved into the new function; the split point is
    // also a block start.
    let bb = decoder.index().block_at(0x1003).expect("split block");
    assert_eq!(module.block(bb).func, f_split);
    assert_eq!(module.func(f_head).blocks().len(), 1);

    // The pseudo call was patched to the new function.
    let calls = pseudos(&module, PseudoOp::is_call);
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        module.inst(calls[0]).kind.as_pseudo(),
        Some(PseudoOp::Call {
            target_fn: Some(tf),
            ..
        }) if *tf == f_split
    ));
}

#[test]
fn test_translation_failure_is_local() {
    // Garbage after one good instruction: the block closes, the run
    // succeeds.
    let mut code = program(&[toy::add_imm(1, 2)]);
    code.push(0xff);
    let image = Image::from_code(code, 0x1000);

    let mut module = Module::new();
    let mut decoder = Decoder::new(&image, None, DecodeMode::default());
    let changed = decoder
        .run(&mut module, &mut ToyTranslator::new())
        .expect("failure is recovered locally");
    assert!(changed);
    assert!(decoder.index().function_at(0x1000).is_some());
    // The good instruction was consumed, the garbage byte was not.
    assert!(decoder.allowed().contains(0x1003));
}

#[test]
fn test_cfg_json_is_pure() {
    let code = program(&[
        toy::test_flags(),
        toy::jz(0x1010),
        toy::ret(),
        toy::nop(),
        toy::nop(),
        toy::nop(),
        toy::nop(),
        toy::nop(),
        toy::nop(),
        toy::nop(),
        toy::ret(),
    ]);
    let image = Image::from_code(code, 0x1000);
    let (module, decoder) = decode(&image);

    let a = mcl::control_flow_json(&module, decoder.index());
    let b = mcl::control_flow_json(&module, decoder.index());
    assert_eq!(a, b);

    let parsed: serde_json::Value = serde_json::from_str(&a).unwrap();
    let funcs = parsed.as_array().unwrap();
    assert_eq!(funcs.len(), 1);
    assert_eq!(funcs[0]["address"], "0x1000");
    let bbs = funcs[0]["bbs"].as_array().unwrap();
    assert_eq!(bbs.len(), 3);
    // The branch block lists its true and false successors.
    let branch_bb = &bbs[0];
    let succs = branch_bb["succs"].as_array().unwrap();
    assert!(succs.contains(&serde_json::json!("0x1010")));
    assert!(succs.contains(&serde_json::json!("0x1008")));
    assert_eq!(funcs[0]["code_refs"].as_array().unwrap().len(), 0);
}

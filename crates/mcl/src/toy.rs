//! A minimal demonstration ISA.
//!
//! The real single-instruction translator lives outside this
//! workspace; this scripted stand-in exists so the CLI and the
//! integration tests can exercise the full pipeline with hand-written
//! byte programs. Encodings are fixed-size per opcode, immediates are
//! little-endian.

use mcl_ir::{Builder, InstKind, PseudoOp, RegId, Type, Value};

use crate::{DecodeMode, Translated, Translator};

/// Stack pointer register of the toy ISA.
pub const TOY_SP: RegId = RegId(2);
/// Flags register written by `test`, read by `jz`.
pub const TOY_FLAGS: RegId = RegId(1);

pub const OP_NOP: u8 = 0x90;
/// `add imm8, imm8` - 3 bytes.
pub const OP_ADD: u8 = 0x10;
/// `test` - sets flags, 2 bytes.
pub const OP_TEST: u8 = 0x85;
/// `store [sp+imm8], 42` - 2 bytes, signed offset.
pub const OP_STORE_SP: u8 = 0x50;
/// `load [sp+imm8]` - 2 bytes, signed offset.
pub const OP_LOAD_SP: u8 = 0x58;
/// `ret` - 1 byte.
pub const OP_RET: u8 = 0xc3;
/// `call abs32` - 5 bytes.
pub const OP_CALL: u8 = 0xe8;
/// `jmp abs32` - 5 bytes.
pub const OP_JMP: u8 = 0xe9;
/// `jz abs32` - 6 bytes (two-byte opcode).
pub const OP_JZ: u8 = 0x0f;
const OP_JZ2: u8 = 0x84;

/// Translator for the toy ISA.
#[derive(Default)]
pub struct ToyTranslator;

impl ToyTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl Translator for ToyTranslator {
    fn translate_one(
        &mut self,
        bytes: &[u8],
        address: u64,
        _mode: DecodeMode,
        builder: &mut Builder<'_>,
    ) -> Translated {
        let Some(&op) = bytes.first() else {
            return Translated::failure();
        };

        match op {
            OP_NOP => {
                let anchor = builder.anchor(address);
                ok(anchor, None, 1)
            }
            OP_ADD => {
                let Some(&[a, b]) = bytes.get(1..3) else {
                    return Translated::failure();
                };
                let anchor = builder.anchor(address);
                builder.binop(
                    mcl_ir::BinOp::Add,
                    Value::const_int(a as i64),
                    Value::const_int(b as i64),
                );
                ok(anchor, None, 3)
            }
            OP_TEST => {
                if bytes.len() < 2 {
                    return Translated::failure();
                }
                let anchor = builder.anchor(address);
                builder.insert(InstKind::Store {
                    ptr: Value::Reg(TOY_FLAGS),
                    value: Value::Undef(Type::Int(64)),
                    anchor: None,
                });
                ok(anchor, None, 2)
            }
            OP_STORE_SP => {
                let Some(&off) = bytes.get(1) else {
                    return Translated::failure();
                };
                let anchor = builder.anchor(address);
                let addr = sp_offset(builder, off as i8);
                builder.store(Value::Inst(addr), Value::const_int(42));
                ok(anchor, None, 2)
            }
            OP_LOAD_SP => {
                let Some(&off) = bytes.get(1) else {
                    return Translated::failure();
                };
                let anchor = builder.anchor(address);
                let addr = sp_offset(builder, off as i8);
                builder.load(Value::Inst(addr), Type::Int(64));
                ok(anchor, None, 2)
            }
            OP_RET => {
                let anchor = builder.anchor(address);
                let pseudo = builder.pseudo(PseudoOp::ret(Value::Undef(Type::Int(64))));
                ok(anchor, Some(pseudo), 1)
            }
            OP_CALL => {
                let Some(target) = abs32(bytes) else {
                    return Translated::failure();
                };
                let anchor = builder.anchor(address);
                let pseudo = builder.pseudo(PseudoOp::call(Value::const_int(target as i64)));
                ok(anchor, Some(pseudo), 5)
            }
            OP_JMP => {
                let Some(target) = abs32(bytes) else {
                    return Translated::failure();
                };
                let anchor = builder.anchor(address);
                let pseudo = builder.pseudo(PseudoOp::br(Value::const_int(target as i64)));
                ok(anchor, Some(pseudo), 5)
            }
            OP_JZ if bytes.get(1) == Some(&OP_JZ2) => {
                let Some(target) = abs32(&bytes[1..]) else {
                    return Translated::failure();
                };
                let anchor = builder.anchor(address);
                let flags = builder.load(Value::Reg(TOY_FLAGS), Type::Int(64));
                let pseudo = builder.pseudo(PseudoOp::cond_br(
                    Value::Inst(flags),
                    Value::const_int(target as i64),
                ));
                ok(anchor, Some(pseudo), 6)
            }
            _ => Translated::failure(),
        }
    }
}

fn ok(inst: mcl_ir::InstId, pseudo: Option<mcl_ir::InstId>, size: u64) -> Translated {
    Translated {
        inst: Some(inst),
        pseudo,
        size,
        failed: false,
    }
}

/// Emit `load sp; add offset` and return the address instruction.
fn sp_offset(builder: &mut Builder<'_>, offset: i8) -> mcl_ir::InstId {
    let sp = builder.load(Value::Reg(TOY_SP), Type::Int(64));
    builder.binop(
        mcl_ir::BinOp::Add,
        Value::Inst(sp),
        Value::const_int(offset as i64),
    )
}

fn abs32(bytes: &[u8]) -> Option<u32> {
    let imm: [u8; 4] = bytes.get(1..5)?.try_into().ok()?;
    Some(u32::from_le_bytes(imm))
}

// ===== Assembler helpers for byte programs =====

pub fn nop() -> Vec<u8> {
    vec![OP_NOP]
}

pub fn add_imm(a: u8, b: u8) -> Vec<u8> {
    vec![OP_ADD, a, b]
}

pub fn test_flags() -> Vec<u8> {
    vec![OP_TEST, 0x00]
}

pub fn store_sp(offset: i8) -> Vec<u8> {
    vec![OP_STORE_SP, offset as u8]
}

pub fn load_sp(offset: i8) -> Vec<u8> {
    vec![OP_LOAD_SP, offset as u8]
}

pub fn ret() -> Vec<u8> {
    vec![OP_RET]
}

pub fn call(target: u32) -> Vec<u8> {
    let mut v = vec![OP_CALL];
    v.extend(target.to_le_bytes());
    v
}

pub fn jmp(target: u32) -> Vec<u8> {
    let mut v = vec![OP_JMP];
    v.extend(target.to_le_bytes());
    v
}

pub fn jz(target: u32) -> Vec<u8> {
    let mut v = vec![OP_JZ, OP_JZ2];
    v.extend(target.to_le_bytes());
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcl_ir::Module;

    #[test]
    fn test_sizes() {
        assert_eq!(call(0x2000).len(), 5);
        assert_eq!(jz(0x1010).len(), 6);
        assert_eq!(ret().len(), 1);
        assert_eq!(test_flags().len(), 2);
    }

    #[test]
    fn test_translate_call() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b = m.add_block(f, "entry");
        let mut builder = Builder::at_end(&mut m, b);

        let mut t = ToyTranslator::new();
        let res = t.translate_one(&call(0x2000), 0x1000, DecodeMode::default(), &mut builder);

        assert!(!res.failed);
        assert_eq!(res.size, 5);
        let pseudo = res.pseudo.unwrap();
        assert!(matches!(
            m.inst(pseudo).kind.as_pseudo(),
            Some(PseudoOp::Call { target, .. }) if target.as_const() == Some(0x2000)
        ));
    }

    #[test]
    fn test_translate_unknown_opcode_fails() {
        let mut m = Module::new();
        let f = m.add_function("f");
        let b = m.add_block(f, "entry");
        let mut builder = Builder::at_end(&mut m, b);

        let mut t = ToyTranslator::new();
        let res = t.translate_one(&[0xff], 0x1000, DecodeMode::default(), &mut builder);
        assert!(res.failed);
    }
}

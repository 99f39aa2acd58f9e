//! IR values and instruction kinds.

use crate::module::{BlockId, FuncId, InstId, SlotId};
use crate::types::Type;

/// A machine register cell. The IR treats registers as addressable
/// locations: reads and writes of a register are loads and stores whose
/// pointer operand is `Value::Reg`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegId(pub u16);

/// An IR value: an operand of an instruction.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Value {
    /// Constant integer with its type.
    Const(i64, Type),
    /// Result of an instruction.
    Inst(InstId),
    /// A register cell, usable as a pointer operand.
    Reg(RegId),
    /// A reconstructed stack slot, usable as a pointer operand.
    Slot(SlotId),
    /// Undefined value of a type.
    Undef(Type),
}

impl Value {
    /// A 64-bit constant.
    pub fn const_int(value: i64) -> Self {
        Self::Const(value, Type::Int(64))
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Self::Const(v, _) => Some(*v),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Self::Const(..))
    }
}

/// Binary operation kinds. All are pure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinOp {
    /// Constant-fold the operation on two known values.
    pub fn fold(self, lhs: i64, rhs: i64) -> i64 {
        match self {
            Self::Add => lhs.wrapping_add(rhs),
            Self::Sub => lhs.wrapping_sub(rhs),
            Self::Mul => lhs.wrapping_mul(rhs),
            Self::And => lhs & rhs,
            Self::Or => lhs | rhs,
            Self::Xor => lhs ^ rhs,
            Self::Shl => lhs.wrapping_shl(rhs as u32),
            Self::Shr => (lhs as u64).wrapping_shr(rhs as u32) as i64,
        }
    }
}

/// Pseudo control-flow terminators.
///
/// The translator emits these in place of machine-level control flow;
/// the decoder patches their targets once the corresponding function or
/// block exists. The four classes share the common pseudo-call shape:
/// an argument slot carrying the computed target.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PseudoOp {
    /// Function call. `target` holds the computed callee address.
    Call {
        target: Value,
        target_fn: Option<FuncId>,
    },
    /// Function return. `target` holds the return address when it is
    /// statically visible.
    Return { target: Value },
    /// Unconditional branch. Patched with either a block in the same
    /// function or a function (tail transfer).
    Br {
        target: Value,
        target_block: Option<BlockId>,
        target_fn: Option<FuncId>,
    },
    /// Conditional branch with true and false edges.
    CondBr {
        cond: Value,
        target: Value,
        target_true: Option<BlockId>,
        target_false: Option<BlockId>,
    },
}

impl PseudoOp {
    pub fn call(target: Value) -> Self {
        Self::Call {
            target,
            target_fn: None,
        }
    }

    pub fn ret(target: Value) -> Self {
        Self::Return { target }
    }

    pub fn br(target: Value) -> Self {
        Self::Br {
            target,
            target_block: None,
            target_fn: None,
        }
    }

    pub fn cond_br(cond: Value, target: Value) -> Self {
        Self::CondBr {
            cond,
            target,
            target_true: None,
            target_false: None,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Self::Return { .. })
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Self::Br { .. })
    }

    pub fn is_cond_branch(&self) -> bool {
        matches!(self, Self::CondBr { .. })
    }

    /// The computed-target argument: callee for calls, return address
    /// for returns, branch target otherwise.
    pub fn target_arg(&self) -> &Value {
        match self {
            Self::Call { target, .. }
            | Self::Return { target }
            | Self::Br { target, .. }
            | Self::CondBr { target, .. } => target,
        }
    }
}

/// Instruction kinds.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum InstKind {
    /// Pure binary operation.
    BinOp { op: BinOp, lhs: Value, rhs: Value },
    /// Value conversion (width change, pointer cast). A no-op when the
    /// operand already has the target type.
    Conv { value: Value, to: Type },
    /// Memory or register read through a pointer operand.
    Load { ptr: Value, ty: Type },
    /// Memory or register write through a pointer operand.
    ///
    /// `anchor` marks the synthetic stores that anchor IR back to the
    /// original machine instruction; it carries the machine address.
    /// Anchor stores are invisible to analyses.
    Store {
        ptr: Value,
        value: Value,
        anchor: Option<u64>,
    },
    /// Pseudo control-flow terminator.
    Pseudo(PseudoOp),
    /// Placeholder terminator every fresh block gets so it is
    /// well-formed before real instructions are inserted.
    RetUndef,
}

impl InstKind {
    /// Does the instruction produce a value?
    pub fn has_result(&self) -> bool {
        matches!(self, Self::BinOp { .. } | Self::Conv { .. } | Self::Load { .. })
    }

    pub fn is_anchor(&self) -> bool {
        matches!(self, Self::Store { anchor: Some(_), .. })
    }

    pub fn as_pseudo(&self) -> Option<&PseudoOp> {
        match self {
            Self::Pseudo(op) => Some(op),
            _ => None,
        }
    }

    /// Operands, in a fixed order.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Self::BinOp { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Conv { value, .. } => vec![value],
            Self::Load { ptr, .. } => vec![ptr],
            Self::Store { ptr, value, .. } => vec![ptr, value],
            Self::Pseudo(op) => match op {
                PseudoOp::Call { target, .. }
                | PseudoOp::Return { target }
                | PseudoOp::Br { target, .. } => vec![target],
                PseudoOp::CondBr { cond, target, .. } => vec![cond, target],
            },
            Self::RetUndef => Vec::new(),
        }
    }

    /// Replace every operand equal to `from` with `to`. Returns the
    /// number of replaced operands.
    pub fn replace_operand(&mut self, from: &Value, to: &Value) -> usize {
        let mut n = 0;
        let mut rep = |v: &mut Value| {
            if v == from {
                *v = to.clone();
                n += 1;
            }
        };
        match self {
            Self::BinOp { lhs, rhs, .. } => {
                rep(lhs);
                rep(rhs);
            }
            Self::Conv { value, .. } => rep(value),
            Self::Load { ptr, .. } => rep(ptr),
            Self::Store { ptr, value, .. } => {
                rep(ptr);
                rep(value);
            }
            Self::Pseudo(op) => match op {
                PseudoOp::Call { target, .. }
                | PseudoOp::Return { target }
                | PseudoOp::Br { target, .. } => rep(target),
                PseudoOp::CondBr { cond, target, .. } => {
                    rep(cond);
                    rep(target);
                }
            },
            Self::RetUndef => {}
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binop_fold() {
        assert_eq!(BinOp::Add.fold(2, 3), 5);
        assert_eq!(BinOp::Sub.fold(2, 3), -1);
        assert_eq!(BinOp::And.fold(0xff, 0x0f), 0x0f);
        assert_eq!(BinOp::Shr.fold(-8, 1), (u64::MAX / 2 - 3) as i64);
    }

    #[test]
    fn test_pseudo_predicates() {
        let call = PseudoOp::call(Value::const_int(0x2000));
        assert!(call.is_call());
        assert!(!call.is_branch());
        assert_eq!(call.target_arg().as_const(), Some(0x2000));
    }

    #[test]
    fn test_replace_operand() {
        let from = Value::const_int(1);
        let to = Value::const_int(2);
        let mut kind = InstKind::BinOp {
            op: BinOp::Add,
            lhs: from.clone(),
            rhs: from.clone(),
        };
        assert_eq!(kind.replace_operand(&from, &to), 2);
        assert_eq!(kind.operands(), vec![&to, &to]);
    }
}

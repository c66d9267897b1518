//! Instructions and block terminators.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Operand, Type};

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    And,
    Or,
    Xor,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::SRem => "srem",
            BinaryOp::FAdd => "fadd",
            BinaryOp::FSub => "fsub",
            BinaryOp::FMul => "fmul",
            BinaryOp::FDiv => "fdiv",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
        };
        f.write_str(s)
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl fmt::Display for IntPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
        };
        f.write_str(s)
    }
}

/// Ordered floating-point comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatPredicate {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

impl fmt::Display for FloatPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FloatPredicate::Oeq => "oeq",
            FloatPredicate::One => "one",
            FloatPredicate::Olt => "olt",
            FloatPredicate::Ole => "ole",
            FloatPredicate::Ogt => "ogt",
            FloatPredicate::Oge => "oge",
        };
        f.write_str(s)
    }
}

/// A non-terminating instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Call {
        dest: Option<String>,
        ret: Type,
        callee: String,
        args: Vec<Operand>,
    },
    Binary {
        dest: String,
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    ICmp {
        dest: String,
        pred: IntPredicate,
        lhs: Operand,
        rhs: Operand,
    },
    FCmp {
        dest: String,
        pred: FloatPredicate,
        lhs: Operand,
        rhs: Operand,
    },
    Phi {
        dest: String,
        ty: Type,
        incoming: Vec<(Operand, String)>,
    },
    Alloca {
        dest: String,
        ty: Type,
    },
    Load {
        dest: String,
        ty: Type,
        ptr: Operand,
    },
    Store {
        value: Operand,
        ptr: Operand,
    },
    Bitcast {
        dest: String,
        value: Operand,
        to: Type,
    },
    SIToFP {
        dest: String,
        value: Operand,
    },
    FNeg {
        dest: String,
        value: Operand,
    },
}

impl Instruction {
    /// Name of the value this instruction defines, if any.
    pub fn dest(&self) -> Option<&str> {
        match self {
            Instruction::Call { dest, .. } => dest.as_deref(),
            Instruction::Binary { dest, .. }
            | Instruction::ICmp { dest, .. }
            | Instruction::FCmp { dest, .. }
            | Instruction::Phi { dest, .. }
            | Instruction::Alloca { dest, .. }
            | Instruction::Load { dest, .. }
            | Instruction::Bitcast { dest, .. }
            | Instruction::SIToFP { dest, .. }
            | Instruction::FNeg { dest, .. } => Some(dest),
            Instruction::Store { .. } => None,
        }
    }

    /// Callee name if this is a call.
    pub fn callee(&self) -> Option<&str> {
        match self {
            Instruction::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Instruction::Phi { .. })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Call {
                dest,
                ret,
                callee,
                args,
            } => {
                if let Some(dest) = dest {
                    write!(f, "%{dest} = ")?;
                }
                let args: Vec<String> = args.iter().map(Operand::typed).collect();
                write!(f, "call {ret} @{callee}({})", args.join(", "))
            }
            Instruction::Binary { dest, op, lhs, rhs } => {
                write!(f, "%{dest} = {op} {} {lhs}, {rhs}", lhs.ty())
            }
            Instruction::ICmp {
                dest,
                pred,
                lhs,
                rhs,
            } => write!(f, "%{dest} = icmp {pred} {} {lhs}, {rhs}", lhs.ty()),
            Instruction::FCmp {
                dest,
                pred,
                lhs,
                rhs,
            } => write!(f, "%{dest} = fcmp {pred} {} {lhs}, {rhs}", lhs.ty()),
            Instruction::Phi { dest, ty, incoming } => {
                let arms: Vec<String> = incoming
                    .iter()
                    .map(|(value, block)| format!("[ {value}, %{block} ]"))
                    .collect();
                write!(f, "%{dest} = phi {ty} {}", arms.join(", "))
            }
            Instruction::Alloca { dest, ty } => write!(f, "%{dest} = alloca {ty}"),
            Instruction::Load { dest, ty, ptr } => {
                write!(f, "%{dest} = load {ty}, {}", ptr.typed())
            }
            Instruction::Store { value, ptr } => {
                write!(f, "store {}, {}", value.typed(), ptr.typed())
            }
            Instruction::Bitcast { dest, value, to } => {
                write!(f, "%{dest} = bitcast {} to {to}", value.typed())
            }
            Instruction::SIToFP { dest, value } => {
                write!(f, "%{dest} = sitofp {} to double", value.typed())
            }
            Instruction::FNeg { dest, value } => write!(f, "%{dest} = fneg {}", value.typed()),
        }
    }
}

/// The single instruction that ends a basic block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Ret(Option<Operand>),
    Br(String),
    CondBr {
        cond: Operand,
        then_block: String,
        else_block: String,
    },
    Unreachable,
}

impl Terminator {
    /// Labels of the blocks control may transfer to.
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Ret(_) | Terminator::Unreachable => vec![],
            Terminator::Br(target) => vec![target],
            Terminator::CondBr {
                then_block,
                else_block,
                ..
            } => vec![then_block, else_block],
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Ret(None) => write!(f, "ret void"),
            Terminator::Ret(Some(value)) => write!(f, "ret {}", value.typed()),
            Terminator::Br(target) => write!(f, "br label %{target}"),
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            } => write!(
                f,
                "br i1 {cond}, label %{then_block}, label %{else_block}"
            ),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_display() {
        let inst = Instruction::Call {
            dest: None,
            ret: Type::Void,
            callee: "__quantum__qis__mz__body".into(),
            args: vec![Operand::QubitId(0), Operand::ResultId(1)],
        };
        assert_eq!(
            inst.to_string(),
            "call void @__quantum__qis__mz__body(%Qubit* inttoptr (i64 0 to %Qubit*), %Result* inttoptr (i64 1 to %Result*))"
        );
    }

    #[test]
    fn test_phi_display() {
        let inst = Instruction::Phi {
            dest: "x.4".into(),
            ty: Type::I64,
            incoming: vec![
                (Operand::i64(1), "then.1".into()),
                (Operand::local("y.2", Type::I64), "else.2".into()),
            ],
        };
        assert_eq!(
            inst.to_string(),
            "%x.4 = phi i64 [ 1, %then.1 ], [ %y.2, %else.2 ]"
        );
    }

    #[test]
    fn test_memory_display() {
        let slot = Operand::local("n.0", Type::ptr(Type::I64));
        let load = Instruction::Load {
            dest: "n.1".into(),
            ty: Type::I64,
            ptr: slot.clone(),
        };
        assert_eq!(load.to_string(), "%n.1 = load i64, i64* %n.0");
        let store = Instruction::Store {
            value: Operand::i64(0),
            ptr: slot,
        };
        assert_eq!(store.to_string(), "store i64 0, i64* %n.0");
    }

    #[test]
    fn test_terminators() {
        let br = Terminator::CondBr {
            cond: Operand::local("c.0", Type::I1),
            then_block: "then.1".into(),
            else_block: "else.2".into(),
        };
        assert_eq!(br.to_string(), "br i1 %c.0, label %then.1, label %else.2");
        assert_eq!(br.successors(), vec!["then.1", "else.2"]);
        assert_eq!(Terminator::Ret(None).to_string(), "ret void");
        assert!(Terminator::Unreachable.successors().is_empty());
    }
}

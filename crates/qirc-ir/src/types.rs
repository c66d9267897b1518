//! IR types and operands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A first-class IR type in the typed-pointer LLVM dialect used by QIR.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    I1,
    I8,
    I32,
    I64,
    Double,
    /// `%Qubit*`
    Qubit,
    /// `%Result*`
    Result,
    /// `%Array*`
    Array,
    /// Pointer to another type, e.g. `i64*` or `%Qubit**`.
    Ptr(Box<Type>),
}

impl Type {
    /// Pointer to `inner`.
    pub fn ptr(inner: Type) -> Type {
        Type::Ptr(Box::new(inner))
    }

    /// The pointee of a pointer type.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    /// Whether values of this type are pointers.
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Qubit | Type::Result | Type::Array | Type::Ptr(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::Double => write!(f, "double"),
            Type::Qubit => write!(f, "%Qubit*"),
            Type::Result => write!(f, "%Result*"),
            Type::Array => write!(f, "%Array*"),
            Type::Ptr(inner) => write!(f, "{inner}*"),
        }
    }
}

/// A value used by an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// SSA value or parameter, printed `%name`.
    Local { name: String, ty: Type },
    /// Integer constant of an integer type other than `i1`.
    Int { ty: Type, value: i64 },
    Bool(bool),
    Double(f64),
    /// `null` of a pointer type.
    Null(Type),
    /// Statically addressed qubit, `inttoptr (i64 N to %Qubit*)`.
    QubitId(u64),
    /// Statically addressed result, `inttoptr (i64 N to %Result*)`.
    ResultId(u64),
}

impl Operand {
    pub fn local(name: impl Into<String>, ty: Type) -> Self {
        Operand::Local {
            name: name.into(),
            ty,
        }
    }

    pub fn i64(value: i64) -> Self {
        Operand::Int {
            ty: Type::I64,
            value,
        }
    }

    pub fn i32(value: i32) -> Self {
        Operand::Int {
            ty: Type::I32,
            value: i64::from(value),
        }
    }

    /// Type of the operand.
    pub fn ty(&self) -> Type {
        match self {
            Operand::Local { ty, .. } | Operand::Int { ty, .. } | Operand::Null(ty) => ty.clone(),
            Operand::Bool(_) => Type::I1,
            Operand::Double(_) => Type::Double,
            Operand::QubitId(_) => Type::Qubit,
            Operand::ResultId(_) => Type::Result,
        }
    }

    /// Whether the operand is a compile-time constant.
    pub fn is_constant(&self) -> bool {
        !matches!(self, Operand::Local { .. })
    }

    /// `type value`, as it appears in argument lists.
    pub fn typed(&self) -> String {
        format!("{} {self}", self.ty())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Local { name, .. } => write!(f, "%{name}"),
            Operand::Int { value, .. } => write!(f, "{value}"),
            Operand::Bool(b) => write!(f, "{b}"),
            Operand::Double(v) => f.write_str(&format_double(*v)),
            Operand::Null(_) => write!(f, "null"),
            Operand::QubitId(id) => write!(f, "inttoptr (i64 {id} to %Qubit*)"),
            Operand::ResultId(id) => write!(f, "inttoptr (i64 {id} to %Result*)"),
        }
    }
}

/// Format a double the way the LLVM assembler accepts it.
///
/// Finite values use the shortest round-tripping decimal form with a
/// mandatory `.`; non-finite values use the hexadecimal bit pattern.
pub fn format_double(v: f64) -> String {
    if !v.is_finite() {
        return format!("0x{:016X}", v.to_bits());
    }
    let s = format!("{v:?}");
    if s.contains('.') {
        s
    } else if let Some(pos) = s.find('e') {
        format!("{}.0{}", &s[..pos], &s[pos..])
    } else {
        format!("{s}.0")
    }
}

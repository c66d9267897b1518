//! QIR module model for qirc.
//!
//! This crate holds the output side of the compiler: a small, typed model of
//! an LLVM module in the typed-pointer dialect QIR uses, a
//! [`FunctionBuilder`] that hands out fresh names and refuses to append to a
//! terminated block, structural verification over the control-flow graph
//! ([`cfg::verify`]), and a textual printer (the `Display` impls).
//!
//! # Example
//!
//! ```rust
//! use qirc_ir::{FunctionBuilder, Module, Operand, Type};
//!
//! let mut module = Module::new("bell");
//! module
//!     .declare("__quantum__qis__h__body", Type::Void, vec![Type::Qubit], None)
//!     .unwrap();
//!
//! let mut entry = FunctionBuilder::new("ENTRYPOINT__main", vec![], Type::Void);
//! entry
//!     .call("__quantum__qis__h__body", Type::Void, vec![Operand::QubitId(0)])
//!     .unwrap();
//! entry.ret(None).unwrap();
//!
//! let function = entry.finish();
//! qirc_ir::cfg::verify(&function).unwrap();
//! module.add_function(function).unwrap();
//!
//! let text = module.to_string();
//! assert!(text.contains("call void @__quantum__qis__h__body(%Qubit* inttoptr (i64 0 to %Qubit*))"));
//! ```

pub mod builder;
pub mod cfg;
pub mod error;
pub mod instruction;
pub mod module;
pub mod types;

pub use builder::FunctionBuilder;
pub use error::{IrError, IrResult};
pub use instruction::{BinaryOp, FloatPredicate, Instruction, IntPredicate, Terminator};
pub use module::{
    Attribute, BasicBlock, Declaration, FlagValue, Function, Linkage, Module, ModuleFlag,
};
pub use types::{Operand, Type};

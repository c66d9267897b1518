//! Profile-aware lowering of qirc programs to QIR.
//!
//! This crate holds the profile validator, the two lowering engines and the
//! post-lowering pass pipeline. [`generate_ir`] is the single front door used
//! by the worker process.
//!
//! # Pipeline
//!
//! ```text
//! source ──parse──▶ Program ──@Config──▶ ConfiguredProgram
//!                                              │
//!                      ┌───────────────────────┴──────────────┐
//!                      ▼ Base / Adaptive                      ▼ Full
//!               partial evaluation                      direct codegen
//!                      └───────────────────────┬──────────────┘
//!                                              ▼
//!                           PassManager (prune, verify)
//!                                              ▼
//!                                     textual LLVM IR
//! ```
//!
//! Every construct is checked against [`is_construct_allowed`] before it is
//! emitted. A rejected construct aborts lowering with
//! [`LoweringError::UnsupportedConstruct`]; no partial IR is returned.
//!
//! # Example
//!
//! ```rust
//! use qirc_compile::{TargetProfile, generate_ir};
//!
//! let ir = generate_ir("bell.qs", r#"
//!     namespace Bell {
//!         @EntryPoint()
//!         operation Main() : Result[] {
//!             use qs = Qubit[2];
//!             H(qs[0]);
//!             CNOT(qs[0], qs[1]);
//!             return [M(qs[0]), M(qs[1])];
//!         }
//!     }
//! "#, TargetProfile::Base).unwrap();
//!
//! assert!(ir.contains("define void @ENTRYPOINT__main() #0"));
//! assert!(ir.contains("\"required_num_qubits\"=\"2\""));
//! ```

pub mod context;
pub mod error;
pub mod lower;
pub mod manager;
pub mod pass;
pub mod passes;
pub mod preprocess;
pub mod profile;

pub use context::PassContext;
pub use error::{CompileError, CompileResult, LoweringError, LoweringResult};
pub use lower::{ENTRY_POINT_SYMBOL, lower};
pub use manager::{PassManager, PassManagerBuilder};
pub use pass::{Pass, PassKind};
pub use profile::{
    ConstructKind, LEGALITY, TargetProfile, UnknownProfile, is_construct_allowed,
    is_construct_name_allowed,
};

use tracing::{info, instrument};

use qirc_ir::Module;
use qirc_syntax::LineIndex;

/// Lower `source` to a verified module for `profile`.
#[instrument(skip(source), fields(len = source.len()))]
pub fn compile_module(source_name: &str, source: &str, profile: TargetProfile) -> CompileResult<Module> {
    let program = qirc_syntax::parse(source)?;
    let lines = LineIndex::new(source);
    let mut module = lower(source_name, &program, &lines, profile)?;

    let (pm, mut ctx) = PassManagerBuilder::new().with_profile(profile).build();
    pm.run(&mut module, &mut ctx)?;
    Ok(module)
}

/// Compile `source` to QIR text for `profile`.
///
/// The output is deterministic: the same source and profile always produce
/// byte-identical text.
pub fn generate_ir(source_name: &str, source: &str, profile: TargetProfile) -> CompileResult<String> {
    let module = compile_module(source_name, source, profile)?;
    let ir = module.to_string();
    info!(bytes = ir.len(), profile = %profile, "generated IR");
    Ok(ir)
}

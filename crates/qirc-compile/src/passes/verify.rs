//! Verification passes run on the finished module.

use tracing::debug;

use qirc_ir::cfg::{self, ControlFlowGraph};
use qirc_ir::{Function, Module};

use crate::context::PassContext;
use crate::error::{LoweringError, LoweringResult};
use crate::lower::runtime::DYNAMIC_ALLOCATION;
use crate::pass::{Pass, PassKind};
use crate::profile::TargetProfile;

/// Checks the block structure of every function.
pub struct VerifyControlFlow;

impl Pass for VerifyControlFlow {
    fn name(&self) -> &'static str {
        "verify_control_flow"
    }

    fn kind(&self) -> PassKind {
        PassKind::Analysis
    }

    fn run(&self, module: &mut Module, _ctx: &mut PassContext) -> LoweringResult<()> {
        for function in module.functions() {
            cfg::verify(function)?;
        }
        debug!(functions = module.functions().len(), "control flow verified");
        Ok(())
    }
}

/// Checks the shape a static profile promises to the target.
///
/// Base output is one function with one block. Adaptive output is one
/// function without loops. Neither may allocate qubits at run time.
pub struct VerifyProfileConformance;

impl VerifyProfileConformance {
    fn check_function(function: &Function, profile: TargetProfile) -> LoweringResult<()> {
        let violation = |what: String| {
            LoweringError::InvalidIr(format!(
                "@{} does not conform to the {profile} profile: {what}",
                function.name
            ))
        };

        if let Some(callee) = function.calls().find(|c| DYNAMIC_ALLOCATION.contains(c)) {
            return Err(violation(format!("calls @{callee}")));
        }

        match profile {
            TargetProfile::Base if function.blocks.len() != 1 => Err(violation(format!(
                "{} blocks instead of one",
                function.blocks.len()
            ))),
            TargetProfile::Adaptive if ControlFlowGraph::build(function)?.has_cycle() => {
                Err(violation("control flow contains a loop".into()))
            }
            _ => Ok(()),
        }
    }
}

impl Pass for VerifyProfileConformance {
    fn name(&self) -> &'static str {
        "verify_profile_conformance"
    }

    fn kind(&self) -> PassKind {
        PassKind::Analysis
    }

    fn should_run(&self, _module: &Module, ctx: &PassContext) -> bool {
        ctx.profile.is_static()
    }

    fn run(&self, module: &mut Module, ctx: &mut PassContext) -> LoweringResult<()> {
        if module.functions().len() != 1 {
            return Err(LoweringError::InvalidIr(format!(
                "{} profile output must define exactly one function, found {}",
                ctx.profile,
                module.functions().len()
            )));
        }
        for function in module.functions() {
            Self::check_function(function, ctx.profile)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qirc_ir::{FunctionBuilder, Operand, Type};

    fn branching() -> Function {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        let then = b.add_block("then");
        let join = b.add_block("join");
        b.cond_br(Operand::Bool(true), &then, &join).unwrap();
        b.position_at(&then).unwrap();
        b.br(&join).unwrap();
        b.position_at(&join).unwrap();
        b.ret(None).unwrap();
        b.finish()
    }

    #[test]
    fn test_base_rejects_branches() {
        let err = VerifyProfileConformance::check_function(&branching(), TargetProfile::Base).unwrap_err();
        assert!(err.to_string().contains("3 blocks"));
        VerifyProfileConformance::check_function(&branching(), TargetProfile::Adaptive).unwrap();
    }

    #[test]
    fn test_adaptive_rejects_loops() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        let header = b.add_block("header");
        b.br(&header).unwrap();
        b.position_at(&header).unwrap();
        b.br(&header).unwrap();
        let f = b.finish();
        assert!(VerifyProfileConformance::check_function(&f, TargetProfile::Adaptive).is_err());
    }

    #[test]
    fn test_dynamic_allocation_rejected() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        b.call("__quantum__rt__qubit_allocate", Type::Qubit, vec![]).unwrap();
        b.ret(None).unwrap();
        let err = VerifyProfileConformance::check_function(&b.finish(), TargetProfile::Adaptive).unwrap_err();
        assert!(err.to_string().contains("qubit_allocate"));
    }

    #[test]
    fn test_skipped_for_full() {
        let ctx = PassContext::new(TargetProfile::Full);
        assert!(!VerifyProfileConformance.should_run(&Module::new("m"), &ctx));
    }
}

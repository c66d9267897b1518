//! Pass trait for post-lowering module passes.

use qirc_ir::Module;

use crate::context::PassContext;
use crate::error::LoweringResult;

/// The kind of module pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Reads the module and reports problems or statistics.
    Analysis,
    /// Rewrites the module.
    Transformation,
}

/// A pass over a lowered [`Module`].
pub trait Pass: Send + Sync {
    /// Get the name of this pass.
    fn name(&self) -> &str;

    /// Get the kind of this pass.
    fn kind(&self) -> PassKind;

    /// Run the pass.
    ///
    /// Analysis passes must leave `module` unchanged.
    fn run(&self, module: &mut Module, ctx: &mut PassContext) -> LoweringResult<()>;

    /// Check if this pass should run based on current state.
    fn should_run(&self, _module: &Module, _ctx: &PassContext) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::TargetProfile;

    struct TestPass;

    impl Pass for TestPass {
        fn name(&self) -> &'static str {
            "test"
        }

        fn kind(&self) -> PassKind {
            PassKind::Analysis
        }

        fn run(&self, _module: &mut Module, _ctx: &mut PassContext) -> LoweringResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_pass_kind() {
        let pass = TestPass;
        assert_eq!(pass.kind(), PassKind::Analysis);
        assert_eq!(pass.name(), "test");
        assert!(pass.should_run(&Module::new("m"), &PassContext::new(TargetProfile::Base)));
    }
}

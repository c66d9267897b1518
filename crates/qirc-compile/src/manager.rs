//! Pass manager for the post-lowering pipeline.

use tracing::{debug, info, instrument};

use qirc_ir::Module;

use crate::context::PassContext;
use crate::error::LoweringResult;
use crate::pass::Pass;
use crate::passes::{PruneUnreachableBlocks, VerifyControlFlow, VerifyProfileConformance};
use crate::profile::TargetProfile;

/// Runs a sequence of passes over a module.
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    /// Create a new empty pass manager.
    pub fn new() -> Self {
        Self { passes: vec![] }
    }

    /// Add a pass to the manager.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) {
        self.passes.push(Box::new(pass));
    }

    /// Run all passes on `module`.
    #[instrument(skip(self, module, ctx), fields(module = %module.name()))]
    pub fn run(&self, module: &mut Module, ctx: &mut PassContext) -> LoweringResult<()> {
        info!(
            "Running pass manager with {} passes on {} functions",
            self.passes.len(),
            module.functions().len()
        );

        for pass in &self.passes {
            if pass.should_run(module, ctx) {
                debug!("Running pass: {}", pass.name());
                pass.run(module, ctx)?;
                ctx.completed.push(pass.name().to_string());
            } else {
                debug!("Skipping pass: {}", pass.name());
            }
        }

        info!(
            "Pass manager completed, {} blocks removed",
            ctx.blocks_removed
        );
        Ok(())
    }

    /// Get the number of passes.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Check if the manager has no passes.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the standard pipeline of a profile.
pub struct PassManagerBuilder {
    profile: TargetProfile,
    verify: bool,
}

impl PassManagerBuilder {
    /// Create a new builder for the Full profile with verification on.
    pub fn new() -> Self {
        Self {
            profile: TargetProfile::Full,
            verify: true,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: TargetProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Enable or disable the verification passes.
    #[must_use]
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Build the pass manager and the context to run it with.
    pub fn build(self) -> (PassManager, PassContext) {
        let mut pm = PassManager::new();
        pm.add_pass(PruneUnreachableBlocks);
        if self.verify {
            pm.add_pass(VerifyControlFlow);
            pm.add_pass(VerifyProfileConformance);
        }
        (pm, PassContext::new(self.profile))
    }
}

impl Default for PassManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! State shared between module passes.

use crate::profile::TargetProfile;

/// Profile being compiled for plus what the passes have done so far.
#[derive(Debug, Clone)]
pub struct PassContext {
    pub profile: TargetProfile,
    /// Blocks removed as unreachable, across all functions.
    pub blocks_removed: usize,
    /// Names of the passes that have run, in order.
    pub completed: Vec<String>,
}

impl PassContext {
    pub fn new(profile: TargetProfile) -> Self {
        Self {
            profile,
            blocks_removed: 0,
            completed: Vec::new(),
        }
    }

    /// Whether a pass named `name` has already run.
    pub fn has_run(&self, name: &str) -> bool {
        self.completed.iter().any(|n| n == name)
    }
}

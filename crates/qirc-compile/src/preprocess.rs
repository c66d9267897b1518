//! `@Config` conditional compilation.
//!
//! A callable carrying `@Config(P)` is kept only when `P` names the requested
//! profile. An argument that names no known profile keeps the item. Names of
//! dropped callables are remembered so that a later call to one can say why
//! it does not resolve.

use rustc_hash::FxHashSet;
use tracing::debug;

use qirc_syntax::ast::{Callable, Program};

use crate::profile::TargetProfile;

/// Program with the callables for other profiles removed.
#[derive(Debug, Clone)]
pub struct ConfiguredProgram {
    pub program: Program,
    /// Qualified names (`Ns.Name`) of dropped callables.
    pub excluded: FxHashSet<String>,
}

impl ConfiguredProgram {
    /// Whether `qualified` was dropped and no surviving callable took its place.
    pub fn is_excluded(&self, qualified: &str) -> bool {
        self.excluded.contains(qualified)
    }
}

/// Whether `callable` survives for `profile`.
pub fn keeps(callable: &Callable, profile: TargetProfile) -> bool {
    callable
        .attrs
        .iter()
        .filter(|a| a.name == "Config")
        .all(|a| match a.arg.as_deref().map(str::parse::<TargetProfile>) {
            Some(Ok(wanted)) => wanted == profile,
            _ => true,
        })
}

/// Drop callables configured for a different profile.
pub fn apply_config(program: &Program, profile: TargetProfile) -> ConfiguredProgram {
    let mut program = program.clone();
    let mut excluded = FxHashSet::default();

    for ns in &mut program.namespaces {
        let ns_name = ns.name.clone();
        ns.items.retain(|callable| {
            let keep = keeps(callable, profile);
            if !keep {
                debug!(callable = %callable.name.name, %profile, "dropped by @Config");
                excluded.insert(format!("{ns_name}.{}", callable.name.name));
            }
            keep
        });
    }

    // A name kept under another variant is not excluded.
    for (ns, callable) in program.callables() {
        excluded.remove(&format!("{ns}.{}", callable.name.name));
    }

    ConfiguredProgram { program, excluded }
}

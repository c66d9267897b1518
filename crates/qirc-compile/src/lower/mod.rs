//! Lowering from the program representation to a QIR module.
//!
//! Two engines share one contract:
//!
//! - [`partial`] serves the Base and Adaptive profiles. It evaluates the
//!   entry point at compile time, inlining calls, unrolling loops and giving
//!   qubits and results static ids. Only measurement-dependent values reach
//!   the output as real instructions.
//! - [`full`] serves the Full profile. Every reachable callable becomes an
//!   IR function and control flow is kept as basic blocks.
//!
//! Both ask the profile validator before emitting a construct and fail with
//! [`LoweringError::UnsupportedConstruct`] rather than returning partial IR.
//! For the static profiles [`scan`] first checks the code evaluation would
//! never reach: unused callables, dead branches and zero-trip loops.

mod callgraph;
mod full;
mod partial;
mod resolve;
pub(crate) mod runtime;
mod scan;

use tracing::{debug, info, instrument};

use qirc_ir::{Attribute, FlagValue, Module, ModuleFlag};
use qirc_syntax::LineIndex;
use qirc_syntax::ast::{Location, Program, Span};

use crate::error::{LoweringError, LoweringResult};
use crate::preprocess::apply_config;
use crate::profile::{ConstructKind, TargetProfile, is_construct_allowed};

use resolve::CallableTable;

/// Name of the generated entry-point function.
pub const ENTRY_POINT_SYMBOL: &str = "ENTRYPOINT__main";

/// Attribute group of the entry-point function.
pub const ENTRY_POINT_GROUP: u32 = 0;

/// Per-request settings shared by both engines.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Session<'a> {
    pub lines: &'a LineIndex,
    pub profile: TargetProfile,
}

impl Session<'_> {
    pub(crate) fn loc(&self, span: Span) -> Location {
        self.lines.span_location(span)
    }

    /// Consult the validator for a construct at `span`.
    pub(crate) fn check(&self, kind: ConstructKind, span: Span) -> LoweringResult<()> {
        if is_construct_allowed(kind, self.profile) {
            Ok(())
        } else {
            debug!(construct = kind.name(), profile = %self.profile, "construct rejected");
            Err(LoweringError::UnsupportedConstruct {
                kind,
                profile: self.profile,
                location: self.loc(span),
            })
        }
    }

    pub(crate) fn mismatch(&self, expected: impl Into<String>, found: impl Into<String>, span: Span) -> LoweringError {
        LoweringError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
            location: self.loc(span),
        }
    }

    pub(crate) fn eval_error(&self, message: impl Into<String>, span: Span) -> LoweringError {
        LoweringError::Evaluation {
            message: message.into(),
            location: self.loc(span),
        }
    }

    pub(crate) fn unresolved(&self, name: impl Into<String>, reason: impl Into<String>, span: Span) -> LoweringError {
        LoweringError::Unresolved {
            name: name.into(),
            location: self.loc(span),
            reason: reason.into(),
        }
    }
}

pub(crate) fn unimplemented(kind: impl Into<String>) -> LoweringError {
    LoweringError::Unimplemented { kind: kind.into() }
}

/// Lower `program` for `profile`.
///
/// `@Config` filtering is applied first; `lines` must be the index of the
/// source `program` was parsed from. The result has not been through the
/// post-lowering passes yet.
#[instrument(skip(program, lines), fields(profile = %profile))]
pub fn lower(
    module_name: &str,
    program: &Program,
    lines: &LineIndex,
    profile: TargetProfile,
) -> LoweringResult<Module> {
    let session = Session { lines, profile };
    let configured = apply_config(program, profile);
    let table = CallableTable::build(&configured, &session)?;
    let entry = table.entry_point(&session)?;
    info!(entry = %entry.qualified(), "lowering");

    let graph = callgraph::analyze(&session, &table, entry)?;
    if let Some(site) = graph.recursion {
        session.check(ConstructKind::Recursion, site)?;
    }
    if profile.is_static() {
        scan::check_program(&session, &table)?;
    }

    let mut module = Module::new(module_name);
    let usage = if profile.is_static() {
        partial::lower_entry(&session, &table, entry, &mut module)?
    } else {
        full::lower_program(&session, &table, &graph, entry, &mut module)?
    };

    finish_module(&mut module, profile, usage);
    info!(
        functions = module.functions().len(),
        declarations = module.declarations().count(),
        "lowering complete"
    );
    Ok(module)
}

/// Static resource counts reported on the entry point.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ResourceUsage {
    pub qubits: u64,
    pub results: u64,
}

/// Attach entry-point attributes and module flags.
fn finish_module(module: &mut Module, profile: TargetProfile, usage: Option<ResourceUsage>) {
    let mut entry_attrs = vec![
        Attribute::Flag("entry_point".into()),
        Attribute::Flag("output_labeling_schema".into()),
        Attribute::Pair("qir_profiles".into(), profile.qir_profiles_attr().into()),
    ];
    if let Some(usage) = usage {
        entry_attrs.push(Attribute::Pair(
            "required_num_qubits".into(),
            usage.qubits.to_string(),
        ));
        entry_attrs.push(Attribute::Pair(
            "required_num_results".into(),
            usage.results.to_string(),
        ));
    }
    module.set_attribute_group(ENTRY_POINT_GROUP, entry_attrs);

    if module
        .declarations()
        .any(|d| d.attributes == Some(runtime::IRREVERSIBLE_GROUP))
    {
        module.set_attribute_group(
            runtime::IRREVERSIBLE_GROUP,
            vec![Attribute::Flag("irreversible".into())],
        );
    }

    let dynamic = !profile.is_static();
    module.add_flag(ModuleFlag::new(1, "qir_major_version", FlagValue::I32(1)));
    module.add_flag(ModuleFlag::new(7, "qir_minor_version", FlagValue::I32(0)));
    module.add_flag(ModuleFlag::new(
        1,
        "dynamic_qubit_management",
        FlagValue::Bool(dynamic),
    ));
    module.add_flag(ModuleFlag::new(
        1,
        "dynamic_result_management",
        FlagValue::Bool(dynamic),
    ));
    if profile == TargetProfile::Adaptive {
        module.add_flag(ModuleFlag::new(
            5,
            "int_computations",
            FlagValue::Strings(vec!["i64".into()]),
        ));
    }
}

//! Callable lookup, intrinsic catalog and entry-point discovery.

use rustc_hash::FxHashMap;

use qirc_syntax::ast::{Callable, Span};

use crate::error::{LoweringError, LoweringResult};
use crate::preprocess::ConfiguredProgram;
use crate::profile::TargetProfile;

use super::Session;

/// Built-in operations and functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intrinsic {
    /// A gate taking `angles` doubles followed by `qubits` qubits.
    Gate {
        qis: &'static str,
        angles: usize,
        qubits: usize,
    },
    Measure,
    Reset,
    Length,
    IntAsDouble,
}

impl Intrinsic {
    pub(crate) fn lookup(name: &str) -> Option<Intrinsic> {
        let gate = |qis, angles, qubits| Intrinsic::Gate {
            qis,
            angles,
            qubits,
        };
        Some(match name {
            "H" => gate("h", 0, 1),
            "X" => gate("x", 0, 1),
            "Y" => gate("y", 0, 1),
            "Z" => gate("z", 0, 1),
            "S" => gate("s", 0, 1),
            "T" => gate("t", 0, 1),
            "Rx" => gate("rx", 1, 1),
            "Ry" => gate("ry", 1, 1),
            "Rz" => gate("rz", 1, 1),
            "CNOT" => gate("cnot", 0, 2),
            "CZ" => gate("cz", 0, 2),
            "SWAP" => gate("swap", 0, 2),
            "M" => Intrinsic::Measure,
            "Reset" => Intrinsic::Reset,
            "Length" => Intrinsic::Length,
            "IntAsDouble" => Intrinsic::IntAsDouble,
            _ => return None,
        })
    }

    pub(crate) fn arity(self) -> usize {
        match self {
            Intrinsic::Gate { angles, qubits, .. } => angles + qubits,
            Intrinsic::Measure | Intrinsic::Reset | Intrinsic::Length | Intrinsic::IntAsDouble => 1,
        }
    }
}

/// A user-defined callable together with its namespace.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UserCallable<'p> {
    pub ns: &'p str,
    pub callable: &'p Callable,
}

impl UserCallable<'_> {
    pub(crate) fn qualified(&self) -> String {
        format!("{}.{}", self.ns, self.callable.name.name)
    }

    /// Symbol name of the lowered function, e.g. `Sample__Inner__Main`.
    pub(crate) fn symbol(&self) -> String {
        format!("{}__{}", self.ns.replace('.', "__"), self.callable.name.name)
    }

    /// Identity for graph and map keys.
    pub(crate) fn key(&self) -> *const Callable {
        std::ptr::from_ref(self.callable)
    }
}

/// What a call expression refers to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Callee<'p> {
    Intrinsic(Intrinsic),
    User(UserCallable<'p>),
}

/// All callables that survived `@Config`, indexed by qualified name.
#[derive(Debug)]
pub(crate) struct CallableTable<'p> {
    by_name: FxHashMap<String, UserCallable<'p>>,
    by_short: FxHashMap<&'p str, Vec<String>>,
    configured: &'p ConfiguredProgram,
    profile: TargetProfile,
    source_order: Vec<UserCallable<'p>>,
}

impl<'p> CallableTable<'p> {
    /// Index the program. Two callables with the same qualified name are an error.
    pub(crate) fn build(configured: &'p ConfiguredProgram, session: &Session<'_>) -> LoweringResult<Self> {
        let mut by_name = FxHashMap::default();
        let mut by_short: FxHashMap<&'p str, Vec<String>> = FxHashMap::default();
        let mut source_order = Vec::new();

        for (ns, callable) in configured.program.callables() {
            let entry = UserCallable { ns, callable };
            let qualified = entry.qualified();
            if by_name.insert(qualified.clone(), entry).is_some() {
                return Err(LoweringError::Duplicate {
                    name: qualified,
                    location: session.loc(callable.name.span),
                });
            }
            by_short
                .entry(callable.name.name.as_str())
                .or_default()
                .push(qualified);
            source_order.push(entry);
        }

        Ok(Self {
            by_name,
            by_short,
            configured,
            profile: session.profile,
            source_order,
        })
    }

    /// Callables in source order.
    pub(crate) fn in_source_order(&self) -> &[UserCallable<'p>] {
        &self.source_order
    }

    /// Resolve the callee of a call made from namespace `current_ns`.
    ///
    /// A single-segment intrinsic name always means the intrinsic. Other
    /// single-segment names look in the current namespace first, then for a
    /// unique match anywhere.
    pub(crate) fn resolve(
        &self,
        session: &Session<'_>,
        current_ns: &str,
        path: &[String],
        span: Span,
    ) -> LoweringResult<Callee<'p>> {
        let display = path.join(".");

        if let [name] = path {
            if let Some(intrinsic) = Intrinsic::lookup(name) {
                return Ok(Callee::Intrinsic(intrinsic));
            }

            let local = format!("{current_ns}.{name}");
            if let Some(found) = self.by_name.get(&local) {
                return Ok(Callee::User(*found));
            }

            match self.by_short.get(name.as_str()).map(Vec::as_slice) {
                Some([only]) => return Ok(Callee::User(self.by_name[only])),
                Some(many) if many.len() > 1 => {
                    return Err(LoweringError::Unresolved {
                        name: display,
                        location: session.loc(span),
                        reason: format!("ambiguous between {}", many.join(", ")),
                    });
                }
                _ => {}
            }

            let excluded = self.configured.is_excluded(&local)
                || self
                    .configured
                    .excluded
                    .iter()
                    .any(|q| q.rsplit('.').next() == Some(name.as_str()));
            return Err(self.unresolved(session, display, span, excluded));
        }

        if let Some(found) = self.by_name.get(&display) {
            return Ok(Callee::User(*found));
        }
        let excluded = self.configured.is_excluded(&display);
        Err(self.unresolved(session, display, span, excluded))
    }

    fn unresolved(&self, session: &Session<'_>, name: String, span: Span, excluded: bool) -> LoweringError {
        let reason = if excluded {
            format!("callable is excluded by @Config for the {} profile", self.profile)
        } else {
            "no callable with this name is defined".to_string()
        };
        LoweringError::Unresolved {
            name,
            location: session.loc(span),
            reason,
        }
    }

    /// The callable marked `@EntryPoint()`, or failing that the one named `Main`.
    pub(crate) fn entry_point(&self, session: &Session<'_>) -> LoweringResult<UserCallable<'p>> {
        let marked: Vec<_> = self
            .source_order
            .iter()
            .filter(|c| c.callable.is_entry_point())
            .collect();
        let candidates = if marked.is_empty() {
            self.source_order
                .iter()
                .filter(|c| c.callable.name.name == "Main")
                .collect()
        } else {
            marked
        };

        match candidates.as_slice() {
            [] => Err(LoweringError::MissingEntryPoint),
            [only] => {
                let entry = **only;
                if let Some(param) = entry.callable.params.first() {
                    return Err(LoweringError::TypeMismatch {
                        expected: "an entry point without parameters".into(),
                        found: format!("parameter '{}'", param.name.name),
                        location: session.loc(param.name.span),
                    });
                }
                Ok(entry)
            }
            [_, second, ..] => Err(LoweringError::Duplicate {
                name: "entry point".into(),
                location: session.loc(second.callable.name.span),
            }),
        }
    }
}

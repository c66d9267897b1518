//! Target profiles and the construct legality table.
//!
//! A target profile names the subset of QIR a backend accepts. Lowering asks
//! [`is_construct_allowed`] once per construct it meets, before emitting any
//! IR for it. Anything not listed in [`LEGALITY`] is refused.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A QIR target profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetProfile {
    /// Straight-line programs, measurements only recorded as output.
    Base,
    /// Mid-circuit measurement with forward branching and integer computation.
    Adaptive,
    /// No restrictions.
    #[default]
    Full,
}

impl TargetProfile {
    /// Every profile, from most to least restrictive.
    pub const ALL: [TargetProfile; 3] = [
        TargetProfile::Base,
        TargetProfile::Adaptive,
        TargetProfile::Full,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TargetProfile::Base => "base",
            TargetProfile::Adaptive => "adaptive",
            TargetProfile::Full => "full",
        }
    }

    /// Value of the `qir_profiles` entry-point attribute.
    pub fn qir_profiles_attr(self) -> &'static str {
        match self {
            TargetProfile::Base => "base_profile",
            TargetProfile::Adaptive => "adaptive_profile",
            TargetProfile::Full => "full",
        }
    }

    /// Whether this profile compiles by evaluating the program at compile time.
    pub fn is_static(self) -> bool {
        !matches!(self, TargetProfile::Full)
    }
}

impl fmt::Display for TargetProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetProfile::Base => "Base",
            TargetProfile::Adaptive => "Adaptive",
            TargetProfile::Full => "Full",
        };
        f.write_str(s)
    }
}

/// Error returned when parsing an unknown profile name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown target profile '{0}' (expected base, adaptive or full)")]
pub struct UnknownProfile(pub String);

impl FromStr for TargetProfile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(TargetProfile::Base),
            "adaptive" => Ok(TargetProfile::Adaptive),
            "full" | "unrestricted" => Ok(TargetProfile::Full),
            _ => Err(UnknownProfile(s.to_string())),
        }
    }
}

/// A language construct whose legality depends on the target profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConstructKind {
    QubitAllocation,
    QuantumGate,
    Measurement,
    QubitReset,
    CallableInvocation,
    /// Loop whose trip count is known at compile time.
    ClassicalLoop,
    /// Comparison of a measurement result.
    MeasurementComparison,
    /// Branch on a value derived from a measurement.
    MeasurementBranch,
    /// `Int` or `Bool` computed from a measurement at run time.
    DynamicClassicalValue,
    /// Entry point returning `Int`, `Bool` or `Double`.
    ClassicalOutput,
    /// Loop whose condition depends on a measurement.
    DynamicLoop,
    /// Qubit allocation with a size only known at run time.
    DynamicQubitAllocation,
    /// `Double` computed from a measurement at run time.
    DynamicDoubleValue,
    Recursion,
}

impl ConstructKind {
    pub const ALL: [ConstructKind; 14] = [
        ConstructKind::QubitAllocation,
        ConstructKind::QuantumGate,
        ConstructKind::Measurement,
        ConstructKind::QubitReset,
        ConstructKind::CallableInvocation,
        ConstructKind::ClassicalLoop,
        ConstructKind::MeasurementComparison,
        ConstructKind::MeasurementBranch,
        ConstructKind::DynamicClassicalValue,
        ConstructKind::ClassicalOutput,
        ConstructKind::DynamicLoop,
        ConstructKind::DynamicQubitAllocation,
        ConstructKind::DynamicDoubleValue,
        ConstructKind::Recursion,
    ];

    /// Identifier form, as accepted by [`is_construct_name_allowed`].
    pub fn name(self) -> &'static str {
        match self {
            ConstructKind::QubitAllocation => "QubitAllocation",
            ConstructKind::QuantumGate => "QuantumGate",
            ConstructKind::Measurement => "Measurement",
            ConstructKind::QubitReset => "QubitReset",
            ConstructKind::CallableInvocation => "CallableInvocation",
            ConstructKind::ClassicalLoop => "ClassicalLoop",
            ConstructKind::MeasurementComparison => "MeasurementComparison",
            ConstructKind::MeasurementBranch => "MeasurementBranch",
            ConstructKind::DynamicClassicalValue => "DynamicClassicalValue",
            ConstructKind::ClassicalOutput => "ClassicalOutput",
            ConstructKind::DynamicLoop => "DynamicLoop",
            ConstructKind::DynamicQubitAllocation => "DynamicQubitAllocation",
            ConstructKind::DynamicDoubleValue => "DynamicDoubleValue",
            ConstructKind::Recursion => "Recursion",
        }
    }

    /// Look up a construct by its identifier form (case-sensitive).
    pub fn from_name(name: &str) -> Option<ConstructKind> {
        ConstructKind::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstructKind::QubitAllocation => "qubit allocation",
            ConstructKind::QuantumGate => "quantum gate application",
            ConstructKind::Measurement => "measurement",
            ConstructKind::QubitReset => "qubit reset",
            ConstructKind::CallableInvocation => "callable invocation",
            ConstructKind::ClassicalLoop => "statically bounded loop",
            ConstructKind::MeasurementComparison => "comparison of measurement results",
            ConstructKind::MeasurementBranch => "branching on a measurement result",
            ConstructKind::DynamicClassicalValue => "classical value computed from a measurement",
            ConstructKind::ClassicalOutput => "classical (non-Result) entry point output",
            ConstructKind::DynamicLoop => "loop whose condition depends on a measurement",
            ConstructKind::DynamicQubitAllocation => "qubit allocation with a run-time size",
            ConstructKind::DynamicDoubleValue => "Double value computed from a measurement",
            ConstructKind::Recursion => "recursion",
        };
        f.write_str(s)
    }
}

use TargetProfile::{Adaptive, Base, Full};

/// Which profiles permit each construct.
pub static LEGALITY: &[(ConstructKind, &[TargetProfile])] = &[
    (ConstructKind::QubitAllocation, &[Base, Adaptive, Full]),
    (ConstructKind::QuantumGate, &[Base, Adaptive, Full]),
    (ConstructKind::Measurement, &[Base, Adaptive, Full]),
    (ConstructKind::QubitReset, &[Base, Adaptive, Full]),
    (ConstructKind::CallableInvocation, &[Base, Adaptive, Full]),
    (ConstructKind::ClassicalLoop, &[Base, Adaptive, Full]),
    (ConstructKind::MeasurementComparison, &[Adaptive, Full]),
    (ConstructKind::MeasurementBranch, &[Adaptive, Full]),
    (ConstructKind::DynamicClassicalValue, &[Adaptive, Full]),
    (ConstructKind::ClassicalOutput, &[Adaptive, Full]),
    (ConstructKind::DynamicLoop, &[Full]),
    (ConstructKind::DynamicQubitAllocation, &[Full]),
    (ConstructKind::DynamicDoubleValue, &[Full]),
    (ConstructKind::Recursion, &[Full]),
];

/// Whether `profile` permits `kind`. Constructs missing from the table are refused.
pub fn is_construct_allowed(kind: ConstructKind, profile: TargetProfile) -> bool {
    LEGALITY
        .iter()
        .find(|(k, _)| *k == kind)
        .is_some_and(|(_, profiles)| profiles.contains(&profile))
}

/// Like [`is_construct_allowed`] for a construct given by name. Unknown
/// names are refused.
pub fn is_construct_name_allowed(name: &str, profile: TargetProfile) -> bool {
    ConstructKind::from_name(name).is_some_and(|kind| is_construct_allowed(kind, profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_construct_in_table() {
        for kind in ConstructKind::ALL {
            assert!(
                LEGALITY.iter().any(|(k, _)| *k == kind),
                "{kind:?} missing from legality table"
            );
            assert!(is_construct_allowed(kind, TargetProfile::Full));
        }
    }

    #[test]
    fn test_profiles_are_nested() {
        for kind in ConstructKind::ALL {
            if is_construct_allowed(kind, TargetProfile::Base) {
                assert!(is_construct_allowed(kind, TargetProfile::Adaptive));
            }
            if is_construct_allowed(kind, TargetProfile::Adaptive) {
                assert!(is_construct_allowed(kind, TargetProfile::Full));
            }
        }
    }

    #[test]
    fn test_base_restrictions() {
        assert!(is_construct_allowed(ConstructKind::Measurement, TargetProfile::Base));
        assert!(!is_construct_allowed(ConstructKind::MeasurementBranch, TargetProfile::Base));
        assert!(!is_construct_allowed(ConstructKind::Recursion, TargetProfile::Adaptive));
        assert!(is_construct_allowed(ConstructKind::MeasurementBranch, TargetProfile::Adaptive));
    }

    #[test]
    fn test_unknown_name_fails_closed() {
        assert!(!is_construct_name_allowed("Teleportation", TargetProfile::Full));
        assert!(!is_construct_name_allowed("", TargetProfile::Base));
        assert!(is_construct_name_allowed("QuantumGate", TargetProfile::Base));
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("BASE".parse::<TargetProfile>().unwrap(), TargetProfile::Base);
        assert_eq!("Adaptive".parse::<TargetProfile>().unwrap(), TargetProfile::Adaptive);
        assert_eq!("unrestricted".parse::<TargetProfile>().unwrap(), TargetProfile::Full);
        assert!("quantum".parse::<TargetProfile>().is_err());
        assert_eq!(TargetProfile::default(), TargetProfile::Full);
    }

    #[test]
    fn test_profile_serde() {
        let json = serde_json::to_string(&TargetProfile::Adaptive).unwrap();
        assert_eq!(json, "\"adaptive\"");
        let back: TargetProfile = serde_json::from_str("\"base\"").unwrap();
        assert_eq!(back, TargetProfile::Base);
    }
}

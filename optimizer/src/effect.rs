// effect.rs — Side-effect severity lattice
//
// Pure < DeterministicEffect < NonDeterministicEffect < ExternalEffect,
// joined by max. Only the two lowest ranks may take part in fusion.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a stage's side-effect strength.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EffectTag {
    #[default]
    Pure = 0,
    #[serde(alias = "deterministic")]
    DeterministicEffect = 1,
    #[serde(alias = "nondeterministic")]
    NonDeterministicEffect = 2,
    #[serde(alias = "external")]
    ExternalEffect = 3,
}

impl EffectTag {
    pub const ALL: [EffectTag; 4] = [
        EffectTag::Pure,
        EffectTag::DeterministicEffect,
        EffectTag::NonDeterministicEffect,
        EffectTag::ExternalEffect,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(rank: u8) -> Option<EffectTag> {
        EffectTag::ALL.get(usize::from(rank)).copied()
    }

    /// Least upper bound of two tags.
    pub fn join(self, other: EffectTag) -> EffectTag {
        self.max(other)
    }

    /// Pure and deterministic effects may be merged or reordered with their
    /// neighbours; anything stronger pins the stage in place.
    pub fn is_fusible(self) -> bool {
        match self {
            EffectTag::Pure | EffectTag::DeterministicEffect => true,
            EffectTag::NonDeterministicEffect | EffectTag::ExternalEffect => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EffectTag::Pure => "pure",
            EffectTag::DeterministicEffect => "deterministic",
            EffectTag::NonDeterministicEffect => "nondeterministic",
            EffectTag::ExternalEffect => "external",
        }
    }
}

impl fmt::Display for EffectTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

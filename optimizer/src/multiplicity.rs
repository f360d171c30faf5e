// multiplicity.rs — Usage bounds and their arithmetic
//
// A bound is the declared upper limit on output elements a stage may emit per
// input element: a finite count or unbounded. Unbounded absorbs sum, product
// and max; it is the identity of min.
//
// Preconditions: none (value types only).
// Postconditions: arithmetic never overflows; finite overflow saturates to
//                 `Unbounded`.
// Failure modes: `FromStr` rejects text that is neither a count nor a
//                recognized unbounded spelling.
// Side effects: none.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Declared per-input repetition bound of a stage.
///
/// The derived ordering is the intended total order: every finite bound is
/// below `Unbounded`, finite bounds compare by count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "BoundRepr", into = "BoundRepr")]
pub enum Multiplicity {
    Finite(u64),
    Unbounded,
}

impl Multiplicity {
    pub const ZERO: Multiplicity = Multiplicity::Finite(0);
    pub const ONE: Multiplicity = Multiplicity::Finite(1);

    pub fn is_unbounded(self) -> bool {
        matches!(self, Multiplicity::Unbounded)
    }

    /// The finite count, or `None` when unbounded.
    pub fn count(self) -> Option<u64> {
        match self {
            Multiplicity::Finite(n) => Some(n),
            Multiplicity::Unbounded => None,
        }
    }

    /// True for bounds of 0 or 1: the stage never repeats work per input.
    pub fn at_most_one(self) -> bool {
        self <= Multiplicity::ONE
    }

    /// Sum of two bounds, unbounded absorbing.
    pub fn saturating_add(self, other: Multiplicity) -> Multiplicity {
        match (self, other) {
            (Multiplicity::Finite(a), Multiplicity::Finite(b)) => {
                a.checked_add(b).map_or(Multiplicity::Unbounded, Multiplicity::Finite)
            }
            _ => Multiplicity::Unbounded,
        }
    }

    /// Product of two bounds, unbounded absorbing (including `0 * ∞`).
    pub fn saturating_mul(self, other: Multiplicity) -> Multiplicity {
        match (self, other) {
            (Multiplicity::Finite(a), Multiplicity::Finite(b)) => {
                a.checked_mul(b).map_or(Multiplicity::Unbounded, Multiplicity::Finite)
            }
            _ => Multiplicity::Unbounded,
        }
    }

    /// Sum over any number of bounds; the empty sum is zero.
    pub fn sum<I>(bounds: I) -> Multiplicity
    where
        I: IntoIterator<Item = Multiplicity>,
    {
        bounds
            .into_iter()
            .fold(Multiplicity::ZERO, Multiplicity::saturating_add)
    }
}

impl Default for Multiplicity {
    fn default() -> Self {
        Multiplicity::ONE
    }
}

impl From<u64> for Multiplicity {
    fn from(n: u64) -> Self {
        Multiplicity::Finite(n)
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Multiplicity::Finite(n) => write!(f, "{n}"),
            Multiplicity::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Error returned when a bound cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid multiplicity '{0}': expected a count or 'unbounded'")]
pub struct ParseMultiplicityError(pub String);

impl FromStr for Multiplicity {
    type Err = ParseMultiplicityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "unbounded" | "inf" | "*" | "∞" => Ok(Multiplicity::Unbounded),
            _ => trimmed
                .parse::<u64>()
                .map(Multiplicity::Finite)
                .map_err(|_| ParseMultiplicityError(s.to_string())),
        }
    }
}

// ── Serde form ──────────────────────────────────────────────────────────────

/// On-the-wire form: a JSON number for finite bounds, a string otherwise.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BoundRepr {
    Count(u64),
    Word(String),
}

impl From<Multiplicity> for BoundRepr {
    fn from(m: Multiplicity) -> Self {
        match m {
            Multiplicity::Finite(n) => BoundRepr::Count(n),
            Multiplicity::Unbounded => BoundRepr::Word("unbounded".to_string()),
        }
    }
}

impl TryFrom<BoundRepr> for Multiplicity {
    type Error = ParseMultiplicityError;

    fn try_from(repr: BoundRepr) -> Result<Self, Self::Error> {
        match repr {
            BoundRepr::Count(n) => Ok(Multiplicity::Finite(n)),
            BoundRepr::Word(w) => w.parse(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

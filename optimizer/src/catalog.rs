// catalog.rs — Operator categories and the operator catalog
//
// Operators are classified into a closed set of categories so fusion-rule
// dispatch is exhaustive. The catalog maps operator names to their category
// and the bound/effect a stage of that operator declares by default.
//
// Preconditions: none.
// Postconditions: `OperatorCatalog::standard()` contains the built-in
//                 operators; names are unique.
// Failure modes: registering a duplicate name → `CatalogError`.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::effect::EffectTag;
use crate::error::CatalogError;
use crate::multiplicity::Multiplicity;
use crate::stream::{Stream, Transform};

// ── Categories ──────────────────────────────────────────────────────────────

/// Operator category, ordered by how much the operator constrains fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorCategory {
    /// map, filter, flat_map: no state carried between inputs.
    Stateless,
    /// scan, take, distinct: state evolves identically on every run.
    StatefulDeterministic,
    /// sample, shuffle: state depends on something other than the inputs.
    StatefulNondeterministic,
    /// tap, sink: observable outside the graph.
    External,
}

impl OperatorCategory {
    /// The weakest effect tag an operator of this category can honestly declare.
    pub fn implied_effect(self) -> EffectTag {
        match self {
            OperatorCategory::Stateless => EffectTag::Pure,
            OperatorCategory::StatefulDeterministic => EffectTag::DeterministicEffect,
            OperatorCategory::StatefulNondeterministic => EffectTag::NonDeterministicEffect,
            OperatorCategory::External => EffectTag::ExternalEffect,
        }
    }

    pub fn join(self, other: OperatorCategory) -> OperatorCategory {
        self.max(other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperatorCategory::Stateless => "stateless",
            OperatorCategory::StatefulDeterministic => "stateful_deterministic",
            OperatorCategory::StatefulNondeterministic => "stateful_nondeterministic",
            OperatorCategory::External => "external",
        }
    }
}

impl fmt::Display for OperatorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Operator kind ───────────────────────────────────────────────────────────

/// The operator a node runs: a display name plus its category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorKind {
    pub name: String,
    pub category: OperatorCategory,
}

impl OperatorKind {
    pub fn new(name: impl Into<String>, category: OperatorCategory) -> Self {
        OperatorKind {
            name: name.into(),
            category,
        }
    }

    pub fn stateless(name: impl Into<String>) -> Self {
        OperatorKind::new(name, OperatorCategory::Stateless)
    }

    /// Kind of the node that replaces `first` followed by `second`.
    ///
    /// Takes `first` by value so repeated fusion into one node appends to its
    /// name instead of copying it.
    pub fn fused(first: OperatorKind, second: &OperatorKind) -> Self {
        let mut name = first.name;
        name.reserve(second.name.len() + 1);
        name.push('+');
        name.push_str(&second.name);
        OperatorKind {
            name,
            category: first.category.join(second.category),
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// Catalog entry: the declared defaults for one operator name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorMeta {
    pub name: String,
    pub category: OperatorCategory,
    pub bound: Multiplicity,
    pub effect: EffectTag,
}

impl OperatorMeta {
    pub fn new(
        name: impl Into<String>,
        category: OperatorCategory,
        bound: Multiplicity,
        effect: EffectTag,
    ) -> Self {
        OperatorMeta {
            name: name.into(),
            category,
            bound,
            effect,
        }
    }

    pub fn kind(&self) -> OperatorKind {
        OperatorKind::new(self.name.clone(), self.category)
    }
}

/// Name → metadata lookup for known operators.
#[derive(Debug, Clone, Default)]
pub struct OperatorCatalog {
    entries: BTreeMap<String, OperatorMeta>,
}

impl OperatorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the built-in operators.
    pub fn standard() -> Self {
        use EffectTag::*;
        use OperatorCategory::*;

        let builtins = [
            ("map", Stateless, Multiplicity::ONE, Pure),
            ("filter", Stateless, Multiplicity::ONE, Pure),
            ("flat_map", Stateless, Multiplicity::Unbounded, Pure),
            ("scan", StatefulDeterministic, Multiplicity::ONE, DeterministicEffect),
            ("take", StatefulDeterministic, Multiplicity::ONE, DeterministicEffect),
            ("distinct", StatefulDeterministic, Multiplicity::ONE, DeterministicEffect),
            ("sample", StatefulNondeterministic, Multiplicity::ONE, NonDeterministicEffect),
            ("tap", External, Multiplicity::ONE, ExternalEffect),
            ("sink", External, Multiplicity::ZERO, ExternalEffect),
        ];

        let mut catalog = OperatorCatalog::new();
        for (name, category, bound, effect) in builtins {
            catalog
                .entries
                .insert(name.to_string(), OperatorMeta::new(name, category, bound, effect));
        }
        catalog
    }

    pub fn register(&mut self, meta: OperatorMeta) -> Result<(), CatalogError> {
        if self.entries.contains_key(&meta.name) {
            return Err(CatalogError::DuplicateOperator(meta.name));
        }
        self.entries.insert(meta.name.clone(), meta);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&OperatorMeta> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &OperatorMeta> {
        self.entries.values()
    }

    /// A stream declaring the operator's defaults around the given body.
    pub fn stream(&self, name: &str, transform: Transform) -> Option<Stream> {
        self.get(name)
            .map(|meta| Stream::new(meta.bound, meta.effect, transform))
    }
}

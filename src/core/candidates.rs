//! Indirect call sites and their candidate target sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::core::function::FuncIdx;

/// How much an edge or candidate set can be trusted, from least to most
/// precise. `Ord` follows that order, so `min` picks the weaker one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Signature-based fallback: every function with the declared type
    OverApproximated,
    /// Narrowed through recovered vtable slots
    Heuristic,
    /// Exact index evidence with several possible targets
    Precise,
    /// Direct call, or exact evidence with a single target
    Certain,
}

impl Confidence {
    pub fn value(&self) -> &str {
        match self {
            Confidence::OverApproximated => "over_approximated",
            Confidence::Heuristic => "heuristic",
            Confidence::Precise => "precise",
            Confidence::Certain => "certain",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// What the backward walk learned about the table-index operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexEvidence {
    /// The operand evaluates to one of these table indices
    Exact {
        indices: BTreeSet<u32>,
        /// Some index was read out of a recovered vtable
        via_vtable: bool,
    },
    /// The operand is loaded from an unknown vtable at this byte offset
    VirtualSlot { byte_offset: u64 },
    /// Nothing usable was found
    Unresolved { reason: String },
}

impl IndexEvidence {
    pub fn unresolved(reason: impl Into<String>) -> Self {
        IndexEvidence::Unresolved {
            reason: reason.into(),
        }
    }
}

/// One `call_indirect`/`return_call_indirect`/`call_ref` instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectCallSite {
    pub caller: FuncIdx,
    /// Byte offset of the call instruction in the binary
    pub offset: usize,
    /// Declared signature (type section index)
    pub type_idx: u32,
    /// `None` for `call_ref`, which does not go through a table
    pub table: Option<u32>,
    pub tail: bool,
    pub evidence: IndexEvidence,
}

/// Functions a call site may invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSet {
    targets: BTreeSet<FuncIdx>,
    confidence: Confidence,
}

impl CandidateSet {
    /// The conservative superset every refinement starts from.
    pub fn conservative(targets: BTreeSet<FuncIdx>) -> Self {
        Self {
            targets,
            confidence: Confidence::OverApproximated,
        }
    }

    /// The single target of a direct call.
    pub fn direct(target: FuncIdx) -> Self {
        Self {
            targets: BTreeSet::from([target]),
            confidence: Confidence::Certain,
        }
    }

    /// Narrow this set with evidence. The result is the intersection with
    /// the current targets, so it can never grow. Refining to an empty set
    /// is refused and returns `None`; the caller keeps the wider set.
    pub fn refine(&self, evidence: &BTreeSet<FuncIdx>, confidence: Confidence) -> Option<Self> {
        let targets: BTreeSet<FuncIdx> = self.targets.intersection(evidence).copied().collect();
        if targets.is_empty() {
            return None;
        }
        // A single exact target is as good as a direct call.
        let confidence = if confidence == Confidence::Precise && targets.len() == 1 {
            Confidence::Certain
        } else {
            confidence
        };
        // Confidence never drops below what the wider set already had.
        let confidence = confidence.max(self.confidence);
        Some(Self {
            targets,
            confidence,
        })
    }

    pub fn targets(&self) -> &BTreeSet<FuncIdx> {
        &self.targets
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn is_conservative(&self) -> bool {
        self.confidence == Confidence::OverApproximated
    }

    pub fn contains(&self, f: FuncIdx) -> bool {
        self.targets.contains(&f)
    }

    pub fn is_subset(&self, other: &CandidateSet) -> bool {
        self.targets.is_subset(&other.targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[u32]) -> BTreeSet<FuncIdx> {
        ids.iter().map(|i| FuncIdx(*i)).collect()
    }

    #[test]
    fn confidence_order() {
        assert!(Confidence::OverApproximated < Confidence::Heuristic);
        assert!(Confidence::Heuristic < Confidence::Precise);
        assert!(Confidence::Precise < Confidence::Certain);
        assert_eq!(
            Confidence::Certain.min(Confidence::OverApproximated),
            Confidence::OverApproximated
        );
    }

    #[test]
    fn refine_only_shrinks() {
        let base = CandidateSet::conservative(set(&[1, 2, 3]));
        let refined = base.refine(&set(&[2, 3, 9]), Confidence::Precise).unwrap();
        assert_eq!(refined.targets(), &set(&[2, 3]));
        assert!(refined.is_subset(&base));
        assert_eq!(refined.confidence(), Confidence::Precise);
    }

    #[test]
    fn single_exact_target_is_certain() {
        let base = CandidateSet::conservative(set(&[1, 2, 3]));
        let refined = base.refine(&set(&[2]), Confidence::Precise).unwrap();
        assert_eq!(refined.len(), 1);
        assert_eq!(refined.confidence(), Confidence::Certain);

        // Heuristic evidence stays heuristic even with one target
        let heur = base.refine(&set(&[2]), Confidence::Heuristic).unwrap();
        assert_eq!(heur.confidence(), Confidence::Heuristic);
    }

    #[test]
    fn refine_to_nothing_is_refused() {
        let base = CandidateSet::conservative(set(&[1, 2]));
        assert!(base.refine(&set(&[7]), Confidence::Precise).is_none());
        assert!(base.is_conservative());
    }
}

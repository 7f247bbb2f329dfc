//! Bounded abstract domain for i32 values.
//!
//! A `ValueSet` is either a finite set of concrete values or `Unknown`. Sets
//! that would grow past the configured cap widen to `Unknown`, which keeps
//! every operation bounded.

use std::collections::BTreeSet;
use std::fmt;

use crate::core::instruction::BinaryOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSet {
    Known(BTreeSet<i32>),
    Unknown,
}

impl ValueSet {
    pub fn empty() -> Self {
        ValueSet::Known(BTreeSet::new())
    }

    pub fn single(v: i32) -> Self {
        ValueSet::Known(BTreeSet::from([v]))
    }

    pub fn from_values<I: IntoIterator<Item = i32>>(values: I, cap: usize) -> Self {
        ValueSet::Known(values.into_iter().collect()).capped(cap)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ValueSet::Unknown)
    }

    pub fn values(&self) -> Option<&BTreeSet<i32>> {
        match self {
            ValueSet::Known(v) => Some(v),
            ValueSet::Unknown => None,
        }
    }

    fn capped(self, cap: usize) -> Self {
        match self {
            ValueSet::Known(v) if v.len() > cap => ValueSet::Unknown,
            other => other,
        }
    }

    pub fn union(&self, other: &ValueSet, cap: usize) -> ValueSet {
        match (self, other) {
            (ValueSet::Known(a), ValueSet::Known(b)) => {
                ValueSet::Known(a.union(b).copied().collect()).capped(cap)
            }
            _ => ValueSet::Unknown,
        }
    }

    /// Pointwise application of a binary operator with wrapping semantics.
    pub fn binary(&self, op: BinaryOp, rhs: &ValueSet, cap: usize) -> ValueSet {
        let (ValueSet::Known(a), ValueSet::Known(b)) = (self, rhs) else {
            return ValueSet::Unknown;
        };
        if a.len().saturating_mul(b.len()) > cap.saturating_mul(cap) {
            return ValueSet::Unknown;
        }
        let mut out = BTreeSet::new();
        for x in a {
            for y in b {
                match op.eval_i32(*x, *y) {
                    Some(v) => {
                        out.insert(v);
                    }
                    None => return ValueSet::Unknown,
                }
            }
        }
        ValueSet::Known(out).capped(cap)
    }

    /// Apply `f` to each value; any `None` makes the result unknown.
    pub fn try_map<F: FnMut(i32) -> Option<i32>>(&self, mut f: F, cap: usize) -> ValueSet {
        let ValueSet::Known(a) = self else {
            return ValueSet::Unknown;
        };
        let mut out = BTreeSet::new();
        for x in a {
            match f(*x) {
                Some(v) => {
                    out.insert(v);
                }
                None => return ValueSet::Unknown,
            }
        }
        ValueSet::Known(out).capped(cap)
    }
}

impl fmt::Display for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSet::Unknown => write!(f, "T"),
            ValueSet::Known(v) => {
                write!(f, "{{")?;
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_widens_past_cap() {
        let a = ValueSet::from_values([1, 2], 3);
        let b = ValueSet::from_values([3, 4], 3);
        assert!(a.union(&b, 3).is_unknown());
        assert_eq!(a.union(&b, 4).values().unwrap().len(), 4);
        assert!(a.union(&ValueSet::Unknown, 8).is_unknown());
    }

    #[test]
    fn binary_is_pointwise_and_wrapping() {
        let a = ValueSet::from_values([8, 16], 8);
        let four = ValueSet::single(4);
        assert_eq!(a.binary(BinaryOp::I32Add, &four, 8), ValueSet::from_values([12, 20], 8));
        let max = ValueSet::single(i32::MAX);
        assert_eq!(
            max.binary(BinaryOp::I32Add, &ValueSet::single(1), 8),
            ValueSet::single(i32::MIN)
        );
        assert!(a.binary(BinaryOp::Other, &four, 8).is_unknown());
    }

    #[test]
    fn display() {
        assert_eq!(ValueSet::from_values([2, 1], 4).to_string(), "{1, 2}");
        assert_eq!(ValueSet::Unknown.to_string(), "T");
    }
}

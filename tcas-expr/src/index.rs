//! Tensor index slots and the fresh-name generator.
//!
//! An [`Index`] identifies one tensor slot occurrence: its [`IndexType`], whether it is raised or
//! lowered ([`IndexState`]), and a numeric name. Two indices with the same type and name but
//! opposite state are the *same* index in opposite position; a pair of them within one
//! multiplicative scope is a contraction (a "dummy" index). The state-independent identity of an
//! index is its [`IndexName`].
//!
//! Whether an index is *free* or *dummy* is never stored; it is derived from the expression tree
//! (see [`Expr::free_indices`](crate::expr::Expr::free_indices)).
//!
//! [`IndexGenerator`] is the explicit fresh-dummy-name context used when a rewrite has to invent
//! index names. It is always passed in by the caller; there is no process-wide name registry, so
//! rewrite sessions stay independent and reproducible.

use std::collections::HashSet;
use std::fmt;

/// The type of a tensor index (Lorentz, spinor, color, ...). Values are opaque small integers;
/// indices of different types never map onto each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexType(pub u8);

/// Whether an index occurrence is raised (contravariant) or lowered (covariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexState {
    Upper,
    Lower,
}

impl IndexState {
    /// Returns the opposite state.
    pub fn toggled(self) -> Self {
        match self {
            Self::Upper => Self::Lower,
            Self::Lower => Self::Upper,
        }
    }
}

/// The state-independent identity of an index: its type and numeric name.
///
/// Renaming always happens at this granularity; both occurrences of a contracted pair follow the
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexName {
    pub ty: IndexType,
    pub name: u32,
}

/// One tensor slot occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index {
    pub ty: IndexType,
    pub name: u32,
    pub state: IndexState,
}

impl Index {
    /// Creates a raised index.
    pub fn upper(ty: IndexType, name: u32) -> Self {
        Self { ty, name, state: IndexState::Upper }
    }

    /// Creates a lowered index.
    pub fn lower(ty: IndexType, name: u32) -> Self {
        Self { ty, name, state: IndexState::Lower }
    }

    /// Returns the same index in the opposite position.
    pub fn toggled(self) -> Self {
        Self { state: self.state.toggled(), ..self }
    }

    /// Returns the state-independent identity of this index.
    pub fn key(self) -> IndexName {
        IndexName { ty: self.ty, name: self.name }
    }
}

/// Writes a numeric index name as letters: `0..=25` are `a..=z`, larger names append the cycle
/// count (`26` is `a1`).
fn fmt_name(name: u32, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let letter = (b'a' + (name % 26) as u8) as char;
    let cycle = name / 26;
    if cycle == 0 {
        write!(f, "{}", letter)
    } else {
        write!(f, "{}{}", letter, cycle)
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_name(self.name, f)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            IndexState::Upper => write!(f, "^")?,
            IndexState::Lower => write!(f, "_")?,
        }
        fmt_name(self.name, f)
    }
}

/// An explicit context for generating fresh index names.
///
/// The generator is seeded with a set of forbidden names (names live somewhere in the tree being
/// rewritten) and optionally offered a reuse pool (names that a rewrite just freed up, which are
/// preferred over brand-new names). Every name handed out is recorded so the caller can propagate
/// the delta to enclosing scopes.
#[derive(Debug, Default)]
pub struct IndexGenerator {
    forbidden: HashSet<IndexName>,
    pool: Vec<IndexName>,
    issued: Vec<IndexName>,
}

impl IndexGenerator {
    /// Creates a generator with nothing forbidden.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator that will never hand out a name in `forbidden`.
    pub fn with_forbidden(forbidden: HashSet<IndexName>) -> Self {
        Self { forbidden, ..Self::default() }
    }

    /// Marks a single name as off-limits.
    pub fn forbid(&mut self, name: IndexName) {
        self.forbidden.insert(name);
    }

    /// Offers a name for reuse. Offered names are preferred over fresh ones, smallest first,
    /// unless they are forbidden.
    pub fn offer(&mut self, name: IndexName) {
        self.pool.push(name);
    }

    /// Returns the smallest available name of the given type, preferring the reuse pool.
    ///
    /// The returned name becomes forbidden for the rest of this generator's lifetime.
    pub fn fresh(&mut self, ty: IndexType) -> u32 {
        let pooled = self
            .pool
            .iter()
            .enumerate()
            .filter(|(_, n)| n.ty == ty && !self.forbidden.contains(n))
            .min_by_key(|(_, n)| n.name)
            .map(|(i, _)| i);

        let name = match pooled {
            Some(i) => self.pool.swap_remove(i),
            None => {
                let mut candidate = 0u32;
                while self.forbidden.contains(&IndexName { ty, name: candidate }) {
                    candidate += 1;
                }
                IndexName { ty, name: candidate }
            }
        };

        self.forbidden.insert(name);
        self.issued.push(name);
        name.name
    }

    /// Every name this generator has handed out, in order.
    pub fn issued(&self) -> &[IndexName] {
        &self.issued
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use super::*;

    const T: IndexType = IndexType(0);

    #[test]
    fn toggling() {
        let a = Index::upper(T, 0);
        assert_eq!(a.toggled(), Index::lower(T, 0));
        assert_eq!(a.toggled().toggled(), a);
        assert_eq!(a.key(), a.toggled().key());
    }

    #[test]
    fn fresh_skips_forbidden() {
        let forbidden = [IndexName { ty: T, name: 0 }, IndexName { ty: T, name: 2 }]
            .into_iter()
            .collect();
        let mut gen = IndexGenerator::with_forbidden(forbidden);
        assert_eq!(gen.fresh(T), 1);
        assert_eq!(gen.fresh(T), 3);
        assert_eq!(gen.issued().len(), 2);
    }

    #[test]
    fn pool_preferred_over_fresh() {
        let mut gen = IndexGenerator::new();
        gen.offer(IndexName { ty: T, name: 7 });
        gen.offer(IndexName { ty: T, name: 5 });
        assert_eq!(gen.fresh(T), 5);
        assert_eq!(gen.fresh(T), 7);
        // pool exhausted, fall back to smallest unused
        assert_eq!(gen.fresh(T), 0);
    }

    #[test]
    fn pooled_names_respect_forbidden() {
        let mut gen = IndexGenerator::with_forbidden(
            [IndexName { ty: T, name: 5 }].into_iter().collect(),
        );
        gen.offer(IndexName { ty: T, name: 5 });
        assert_eq!(gen.fresh(T), 0);
    }

    #[test]
    fn types_are_independent() {
        let mut gen = IndexGenerator::new();
        assert_eq!(gen.fresh(IndexType(0)), 0);
        assert_eq!(gen.fresh(IndexType(1)), 0);
        assert_eq!(gen.fresh(IndexType(0)), 1);
    }

    #[test]
    fn display() {
        assert_eq!(Index::upper(T, 0).to_string(), "^a");
        assert_eq!(Index::lower(T, 1).to_string(), "_b");
        assert_eq!(Index::lower(T, 26).to_string(), "_a1");
    }
}

//! Scoped forbidden-index tracking.
//!
//! While the driver walks a tree it keeps a stack of scopes, one per traversal position that can
//! own index names. [`ScopeStack::forbidden`] answers "which names are off-limits for fresh dummy
//! generation right here"; [`ScopeStack::notify`] feeds the delta of a replacement (names the
//! matched subtree gave up, names the replacement introduced) back into every enclosing scope's
//! cache, so no rewrite ever forces a full tree rescan.
//!
//! Sum scopes get special treatment. A sum does not introduce a shared dummy scope, but its
//! summands each own their dummies independently, and the same name may appear in several
//! summands at once. Each sum scope therefore keeps, per dummy name, one bit per immediate
//! summand; a name is only reported "removed" to the scopes above once its last summand bit
//! clears.

use std::collections::{BTreeSet, HashMap, HashSet};
use tcas_expr::{Expr, IndexName, Product};

/// What kind of tree position a scope guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The root of the traversal. Owns every name in the tree that no inner scope accounts for.
    TopLevel,

    /// A product node: one multiplicative scope, owning every name used anywhere inside it.
    Product,

    /// A sum node: tracks per-summand dummy usage, introduces no names of its own.
    Sum,

    /// A pass-through position (a power); contributes nothing.
    Transparent,

    /// A scalar-function or field-argument boundary. Indices inside cannot leak out, so the
    /// scope contributes nothing; removals reported from inside stop here, additions pass.
    FunBoundary,
}

/// Which immediate summands of one sum still use a given dummy name.
#[derive(Debug, Clone)]
pub struct SummandBits {
    words: Vec<u64>,
}

impl SummandBits {
    fn new(summands: usize) -> Self {
        Self { words: vec![0; summands.div_ceil(64)] }
    }

    fn set(&mut self, i: usize) {
        self.words[i / 64] |= 1 << (i % 64);
    }

    fn clear(&mut self, i: usize) {
        self.words[i / 64] &= !(1 << (i % 64));
    }

    fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }
}

#[derive(Debug)]
struct SumUsage {
    summands: usize,
    current: usize,
    bits: HashMap<IndexName, SummandBits>,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    names: HashSet<IndexName>,
    sum: Option<SumUsage>,
}

impl Scope {
    fn bare(kind: ScopeKind) -> Self {
        Self { kind, names: HashSet::new(), sum: None }
    }
}

/// The stack of active scopes for one in-flight traversal.
///
/// Owned exclusively by that traversal and not valid afterward.
#[derive(Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    /// Opens the root scope, seeded with every index name in the tree about to be rewritten.
    pub fn new(tree: &Expr) -> Self {
        let mut names = HashSet::new();
        tree.collect_index_names(&mut names);
        Self {
            scopes: vec![Scope { kind: ScopeKind::TopLevel, names, sum: None }],
        }
    }

    /// Enters a product scope, caching every name used anywhere inside the product.
    pub fn enter_product(&mut self, product: &Product) {
        let mut names = HashSet::new();
        for child in product.children() {
            child.collect_index_names(&mut names);
        }
        self.scopes.push(Scope { kind: ScopeKind::Product, names, sum: None });
    }

    /// Enters a sum scope, recording which summands use which dummy names.
    pub fn enter_sum(&mut self, terms: &[Expr]) {
        let mut bits: HashMap<IndexName, SummandBits> = HashMap::new();
        for (i, term) in terms.iter().enumerate() {
            let mut dummies = BTreeSet::new();
            term.collect_dummy_names(&mut dummies);
            for d in dummies {
                bits.entry(d).or_insert_with(|| SummandBits::new(terms.len())).set(i);
            }
        }
        self.scopes.push(Scope {
            kind: ScopeKind::Sum,
            names: HashSet::new(),
            sum: Some(SumUsage { summands: terms.len(), current: 0, bits }),
        });
    }

    pub fn enter_transparent(&mut self) {
        self.scopes.push(Scope::bare(ScopeKind::Transparent));
    }

    pub fn enter_boundary(&mut self) {
        self.scopes.push(Scope::bare(ScopeKind::FunBoundary));
    }

    /// Leaves the innermost scope. The root scope is never popped.
    pub fn leave(&mut self) {
        debug_assert!(self.scopes.len() > 1);
        self.scopes.pop();
    }

    /// Tells the innermost sum scope which summand the traversal is descending into.
    pub fn set_summand(&mut self, i: usize) {
        if let Some(usage) = self.scopes.last_mut().and_then(|s| s.sum.as_mut()) {
            debug_assert!(i < usage.summands);
            usage.current = i;
        }
    }

    /// Every index name currently off-limits for fresh dummy generation at this position: the
    /// union of all active scopes' caches, with a sum's dummy counted as long as any summand
    /// still uses it.
    pub fn forbidden(&self) -> HashSet<IndexName> {
        let mut out = HashSet::new();
        for scope in &self.scopes {
            out.extend(scope.names.iter().copied());
            if let Some(usage) = &scope.sum {
                out.extend(usage.bits.iter().filter(|(_, b)| b.any()).map(|(n, _)| *n));
            }
        }
        out
    }

    /// Propagates a replacement's index delta outward through every active scope.
    ///
    /// `removed` are dummy names the matched subtree gave up, `added` are names the replacement
    /// introduced. At each sum scope on the way up, a removed name only continues upward once its
    /// bit is clear in every summand, and a function boundary swallows removals entirely.
    pub fn notify(&mut self, removed: &BTreeSet<IndexName>, added: &[IndexName]) {
        let mut removed: Vec<IndexName> = removed.iter().copied().collect();
        for scope in self.scopes.iter_mut().rev() {
            match scope.kind {
                ScopeKind::Transparent => {}
                ScopeKind::FunBoundary => {
                    // indices inside the boundary cannot alias indices outside it, so a name
                    // freed inside must not clear the outer caches; additions keep propagating
                    removed.clear();
                }
                ScopeKind::Sum => {
                    let usage = scope.sum.as_mut().expect("sum scope carries usage");
                    let current = usage.current;
                    removed.retain(|name| {
                        let live = match usage.bits.get_mut(name) {
                            Some(bits) => {
                                bits.clear(current);
                                bits.any()
                            }
                            None => false,
                        };
                        if live {
                            return false;
                        }
                        usage.bits.remove(name);
                        true
                    });
                    for a in added {
                        usage
                            .bits
                            .entry(*a)
                            .or_insert_with(|| SummandBits::new(usage.summands))
                            .set(current);
                    }
                }
                ScopeKind::TopLevel | ScopeKind::Product => {
                    for r in &removed {
                        scope.names.remove(r);
                    }
                    scope.names.extend(added.iter().copied());
                }
            }
        }
    }
}

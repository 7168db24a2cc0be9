//! Rule compilation and application.
//!
//! [`compile`] classifies a `from → to` pair by the pattern's top-level shape and precomputes
//! everything the hot rewrite loop would otherwise derive per node: the shape kind, whether the
//! replacement is a bare symbolic placeholder, whether applying the rule can introduce net new
//! dummies of some index type, and (for product patterns) the decomposed pattern with its
//! fast-path eligibility.

use crate::driver::RuleSet;
use crate::error::RuleError;
use crate::scope::ScopeStack;
use crate::{product_bijection, sum_bijection};
use rug::Rational;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tcas_expr::matcher::{first_mapping, Mapping};
use tcas_expr::{Expr, Index, IndexGenerator, IndexName, IndexType};

/// The pattern's top-level shape, fixed at compile time so application never pays runtime
/// shape dispatch beyond one enum match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// A bare indexed symbol, or any shape without a specialized strategy: one matcher call
    /// against the whole node.
    Symbol,

    /// An indexed symbolic function; argument order is significant.
    Field,

    /// A product pattern; matched by repeated subgraph extraction.
    Product,

    /// A sum pattern; matched by subset correspondence.
    Sum,
}

/// Which batch algorithm a two-factor product pattern is eligible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPathKind {
    /// The two factors share a summed index; candidates are found by walking contraction
    /// adjacency.
    Contraction,

    /// The factors merely co-occur; candidates are found by scanning hash buckets.
    CoOccurrence,
}

/// A product pattern decomposed once at compile time.
#[derive(Debug, Clone)]
pub struct ProductPattern {
    /// The pattern's numeric factor. The target's factor is not required to match it; instead
    /// each extracted bite divides the rebuilt product by this normalizing factor.
    pub factor: Rational,
    pub scalars: Vec<Expr>,
    pub data: Vec<Expr>,
    pub fast_path: Option<FastPathKind>,
}

/// A compiled rewrite rule. Immutable after construction.
#[derive(Debug, Clone)]
pub struct Rule {
    pub from: Expr,
    pub to: Expr,
    pub kind: RuleKind,
    /// The replacement carries no indices at all: matching is purely a presence test and
    /// replacing needs no renaming, only the matched sign.
    symbolic_to: bool,
    /// For some index type, the replacement holds more dummies than the pattern gives up, so
    /// fresh names must be drawn against the full scope-forbidden set.
    adds_dummies: bool,
    pub product: Option<ProductPattern>,
}

/// Compiles one rule, rejecting it if the replacement's free indices (as a set) differ from the
/// pattern's. A zero replacement is exempt.
pub fn compile(from: Expr, to: Expr) -> Result<Rule, RuleError> {
    let from_free: BTreeSet<Index> = from.free_indices().into_iter().collect();
    let to_free: BTreeSet<Index> = to.free_indices().into_iter().collect();
    if !to.is_zero() && from_free != to_free {
        return Err(RuleError::FreeIndexMismatch {
            from: from_free.into_iter().collect(),
            to: to_free.into_iter().collect(),
        });
    }

    let symbolic_to = {
        let mut names = HashSet::new();
        to.collect_index_names(&mut names);
        names.is_empty()
    };
    let adds_dummies = adds_dummies(&from, &to);

    let (kind, product) = match &from {
        Expr::Field(_) => (RuleKind::Field, None),
        Expr::Sum(_) => (RuleKind::Sum, None),
        Expr::Product(p) => {
            let fast_path = if p.scalars.is_empty() && p.data.len() == 2 {
                if p.contracted_names().is_empty() {
                    Some(FastPathKind::CoOccurrence)
                } else {
                    Some(FastPathKind::Contraction)
                }
            } else {
                None
            };
            let pattern = ProductPattern {
                factor: p.factor.clone(),
                scalars: p.scalars.clone(),
                data: p.data.clone(),
                fast_path,
            };
            (RuleKind::Product, Some(pattern))
        }
        _ => (RuleKind::Symbol, None),
    };

    Ok(Rule { from, to, kind, symbolic_to, adds_dummies, product })
}

/// Per index type, does `to` hold more dummy names than `from`?
fn adds_dummies(from: &Expr, to: &Expr) -> bool {
    fn counts(e: &Expr) -> BTreeMap<IndexType, usize> {
        let mut dummies = BTreeSet::new();
        e.collect_dummy_names(&mut dummies);
        let mut by_type = BTreeMap::new();
        for d in dummies {
            *by_type.entry(d.ty).or_insert(0) += 1;
        }
        by_type
    }
    let removed = counts(from);
    counts(to)
        .into_iter()
        .any(|(ty, n)| n > removed.get(&ty).copied().unwrap_or(0))
}

impl Rule {
    /// Which fast path this rule's pattern qualifies for, if any.
    pub fn fast_path(&self) -> Option<FastPathKind> {
        self.product.as_ref().and_then(|p| p.fast_path)
    }

    /// Attempts this rule once against `target`, returning the replacement node on success.
    pub fn apply(&self, target: &Expr, scopes: &mut ScopeStack) -> Option<Expr> {
        match self.kind {
            RuleKind::Symbol => {
                let m = first_mapping(&self.from, target)?;
                Some(self.replacement(&m, target, &BTreeSet::new(), scopes))
            }
            RuleKind::Sum => {
                let pattern = match &self.from {
                    Expr::Sum(terms) => terms,
                    _ => return None,
                };
                let terms = match target {
                    Expr::Sum(terms) => terms,
                    _ => return None,
                };
                let (m, chosen) = sum_bijection::find(pattern, terms)?;
                let matched = Expr::sum(chosen.iter().map(|&j| terms[j].clone()).collect());
                let mut rest: Vec<Expr> = terms
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| !chosen.contains(j))
                    .map(|(_, t)| t.clone())
                    .collect();
                // dummy names the unmatched summands keep using are not freed by this match
                let mut retained = BTreeSet::new();
                for t in &rest {
                    t.collect_dummy_names(&mut retained);
                }
                let replacement = self.replacement(&m, &matched, &retained, scopes);
                rest.push(replacement);
                Some(Expr::sum(rest))
            }
            RuleKind::Product => {
                let product = match target {
                    Expr::Product(p) => p,
                    _ => return None,
                };
                product_bijection::apply(self, product, scopes)
            }
            RuleKind::Field => self.apply_field(target, scopes),
        }
    }

    /// Builds the replacement for one successful match: the rule's `to` under the mapping, with
    /// its own dummies renamed so they collide with nothing live in the tree.
    ///
    /// Two renaming strategies, chosen by the compile-time `adds_dummies` fact: a rule that
    /// cannot add net dummies reuses the names the matched subtree just freed up, with no scope
    /// lookup at all; a rule that can draws names outside the full forbidden set and reports the
    /// delta back to the scopes.
    ///
    /// `retained` are dummy names the matched subtree uses that stay live in sibling material
    /// the match did not consume; they are neither reused nor reported as freed.
    pub(crate) fn replacement(
        &self,
        mapping: &Mapping,
        matched: &Expr,
        retained: &BTreeSet<IndexName>,
        scopes: &mut ScopeStack,
    ) -> Expr {
        if self.symbolic_to {
            return if mapping.sign { -self.to.clone() } else { self.to.clone() };
        }

        let mut freed = BTreeSet::new();
        matched.collect_dummy_names(&mut freed);
        for r in retained {
            freed.remove(r);
        }

        if !self.adds_dummies {
            let mut forbidden = HashSet::new();
            matched.collect_index_names(&mut forbidden);
            for (_, t) in mapping.iter() {
                forbidden.insert(t);
            }
            for d in &freed {
                forbidden.remove(d);
            }
            let mut gen = IndexGenerator::with_forbidden(forbidden);
            for d in &freed {
                gen.offer(*d);
            }
            return mapping.apply_to(&self.to, &mut gen);
        }

        let mut forbidden = scopes.forbidden();
        matched.collect_index_names(&mut forbidden);
        for (_, t) in mapping.iter() {
            forbidden.insert(t);
        }
        let mut gen = IndexGenerator::with_forbidden(forbidden);
        let result = mapping.apply_to(&self.to, &mut gen);
        scopes.notify(&freed, gen.issued());
        result
    }

    /// Field rules: same head name, same argument count, argument order significant.
    ///
    /// Each pattern argument is re-expressed in the target argument's binding indices; arguments
    /// that do not already coincide become an auxiliary substitution that is run over the
    /// replacement before the head's own index mapping is applied.
    fn apply_field(&self, target: &Expr, scopes: &mut ScopeStack) -> Option<Expr> {
        let pattern = match &self.from {
            Expr::Field(f) => f,
            _ => return None,
        };
        let field = match target {
            Expr::Field(f) => f,
            _ => return None,
        };
        if pattern.head.name != field.head.name
            || pattern.head.indices.len() != field.head.indices.len()
            || pattern.args.len() != field.args.len()
        {
            return None;
        }

        let mut head_map = Mapping::new();
        for (p, t) in pattern.head.indices.iter().zip(&field.head.indices) {
            if !head_map.insert(*p, *t) {
                return None;
            }
        }

        let mut aux: Vec<(Expr, Expr)> = Vec::new();
        for ((pa, ta), (pb, tb)) in pattern
            .args
            .iter()
            .zip(&field.args)
            .zip(pattern.arg_indices.iter().zip(&field.arg_indices))
        {
            if pb.len() != tb.len() {
                return None;
            }
            let binding: HashMap<IndexName, IndexName> =
                pb.iter().zip(tb).map(|(p, t)| (p.key(), t.key())).collect();
            let renamed = pa.rename(&binding);
            if renamed == *ta {
                continue;
            }
            aux.push((renamed, ta.clone()));
        }

        let mut result = self.to.clone();
        if !aux.is_empty() {
            let aux_rules = RuleSet::compile_many(aux, true).ok()?;
            result = aux_rules.rewrite(&result);
        }

        let mut freed = BTreeSet::new();
        target.collect_dummy_names(&mut freed);
        let mut gen = IndexGenerator::with_forbidden(scopes.forbidden());
        let out = head_map.apply_to(&result, &mut gen);
        scopes.notify(&freed, gen.issued());
        Some(out)
    }
}

//! Batch fast paths for two-factor product rules.
//!
//! When a rule's pattern is an index-bearing product of exactly two factors, a full subgraph
//! search is overkill: candidate pairs can be found directly, either by walking the target's
//! contraction adjacency (the pattern factors share a summed index) or by scanning hash buckets
//! (the factors merely co-occur). Both paths run every eligible rule over the product in one
//! pass, accumulate replacements and a consumed-factor set, and rebuild the product once at the
//! end, only if something actually fired.

use crate::rule::{FastPathKind, Rule};
use crate::scope::ScopeStack;
use rug::Rational;
use std::collections::{BTreeSet, HashMap};
use tcas_expr::matcher::first_mapping;
use tcas_expr::{Expr, Index, Product};

/// Runs every fast-path-eligible rule over one product node. Returns the rebuilt product if at
/// least one replacement fired.
pub fn apply_all(rules: &[Rule], target: &Product, scopes: &mut ScopeStack) -> Option<Expr> {
    let data = &target.data;
    if data.len() < 2 {
        return None;
    }

    let hashes: Vec<u64> = data.iter().map(Expr::structural_hash).collect();
    let mut buckets: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, h) in hashes.iter().enumerate() {
        buckets.entry(*h).or_default().push(i);
    }
    // index occurrence -> positions carrying it free, for contraction adjacency
    let mut by_index: HashMap<Index, Vec<usize>> = HashMap::new();
    for (i, d) in data.iter().enumerate() {
        for idx in d.free_indices() {
            by_index.entry(idx).or_default().push(i);
        }
    }

    let mut used = vec![false; data.len()];
    let mut replacements: Vec<Expr> = Vec::new();
    let mut normalizer = Rational::from(1);

    for rule in rules {
        let kind = match rule.fast_path() {
            Some(kind) => kind,
            None => continue,
        };
        let pattern = rule.product.as_ref().expect("fast path implies a product pattern");
        let (h0, h1) = (pattern.data[0].structural_hash(), pattern.data[1].structural_hash());
        let pair = Expr::product(pattern.data.clone());

        // candidate positions for each pattern slot, snapshotted once per rule
        let first = buckets.get(&h0).map(Vec::as_slice).unwrap_or_default();
        let second = match kind {
            FastPathKind::CoOccurrence => buckets.get(&h1).map(Vec::as_slice).unwrap_or_default(),
            FastPathKind::Contraction => &[],
        };

        let mut partners: Vec<usize> = Vec::new();
        'candidates: for &i in first {
            if used[i] {
                continue;
            }
            partners.clear();
            match kind {
                FastPathKind::Contraction => {
                    for idx in data[i].free_indices() {
                        if let Some(adjacent) = by_index.get(&idx.toggled()) {
                            partners.extend(adjacent);
                        }
                    }
                }
                FastPathKind::CoOccurrence => partners.extend(second),
            }
            for &j in &partners {
                if j == i || used[j] || hashes[j] != h1 {
                    continue;
                }
                let matched = Expr::product(vec![data[i].clone(), data[j].clone()]);
                if let Some(m) = first_mapping(&pair, &matched) {
                    replacements.push(rule.replacement(&m, &matched, &BTreeSet::new(), scopes));
                    if pattern.factor != 1 {
                        normalizer *= Rational::from(pattern.factor.recip_ref());
                    }
                    used[i] = true;
                    used[j] = true;
                    continue 'candidates;
                }
            }
        }
    }

    if replacements.is_empty() {
        return None;
    }

    let mut factor = target.factor.clone();
    factor *= normalizer;
    let mut parts = vec![Expr::num(factor)];
    parts.extend(target.scalars.iter().cloned());
    parts.extend(
        data.iter()
            .enumerate()
            .filter(|(i, _)| !used[*i])
            .map(|(_, d)| d.clone()),
    );
    parts.extend(replacements);
    Some(Expr::product(parts))
}

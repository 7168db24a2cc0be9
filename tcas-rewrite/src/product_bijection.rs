//! Sub-multiset (subgraph) correspondence between a product pattern and a larger product.
//!
//! The pattern is repeatedly "bitten" out of the target: each bite finds one subset of the
//! target's indexless factors and one subset of its index-bearing factors that together match
//! the pattern under a single shared mapping, removes them, and records the mapped replacement.
//! Biting repeats against the remainder until it is too small or nothing matches, then the whole
//! product is rebuilt once.

use crate::rule::Rule;
use crate::scope::ScopeStack;
use rug::Rational;
use std::collections::BTreeSet;
use tcas_expr::matcher::{first_mapping, Mapping};
use tcas_expr::{Expr, Product};

/// Applies a product rule to `target` by repeated bite extraction. Returns the rebuilt product
/// if at least one bite fired.
pub fn apply(rule: &Rule, target: &Product, scopes: &mut ScopeStack) -> Option<Expr> {
    let pattern = rule.product.as_ref()?;
    let mut scalars = target.scalars.clone();
    let mut data = target.data.clone();
    let mut replacements: Vec<Expr> = Vec::new();
    let mut normalizer = Rational::from(1);

    loop {
        // count and boundary-hash checks before any combinatorial work
        if pattern.scalars.len() > scalars.len() || pattern.data.len() > data.len() {
            break;
        }
        if pattern.scalars.is_empty() && pattern.data.is_empty() {
            break;
        }
        if !pattern.data.is_empty() && !hash_bounds_admit(&pattern.data, &data) {
            break;
        }

        let Some((mapping, s_sel, d_sel)) = bite(pattern, &scalars, &data) else {
            break;
        };

        let matched = Expr::product(
            s_sel
                .iter()
                .map(|&j| scalars[j].clone())
                .chain(d_sel.iter().map(|&j| data[j].clone()))
                .collect(),
        );
        replacements.push(rule.replacement(&mapping, &matched, &BTreeSet::new(), scopes));
        if pattern.factor != 1 {
            normalizer *= Rational::from(pattern.factor.recip_ref());
        }

        // removal in descending position order keeps the canonical sort intact
        for &j in s_sel.iter().rev() {
            scalars.remove(j);
        }
        for &j in d_sel.iter().rev() {
            data.remove(j);
        }
    }

    if replacements.is_empty() {
        return None;
    }

    let mut factor = target.factor.clone();
    factor *= normalizer;
    let mut parts = vec![Expr::num(factor)];
    parts.extend(scalars);
    parts.extend(data);
    parts.extend(replacements);
    Some(Expr::product(parts))
}

/// With both sides canonical-sorted, a sub-multiset of `data` can only carry the pattern's hash
/// extrema if they lie within the target's.
fn hash_bounds_admit(pattern: &[Expr], data: &[Expr]) -> bool {
    let ph: Vec<u64> = pattern.iter().map(Expr::structural_hash).collect();
    let (pmin, pmax) = (*ph.iter().min().unwrap(), *ph.iter().max().unwrap());
    let tmin = data.first().map(Expr::structural_hash).unwrap_or(0);
    let tmax = data.last().map(Expr::structural_hash).unwrap_or(0);
    pmin >= tmin && pmax <= tmax
}

/// Finds one bite: subsets of `scalars` and `data` matching the pattern under a single shared
/// mapping. Candidate subsets are chosen by structural hash; each full candidate set is
/// validated with one matcher call on the two induced sub-products.
fn bite(
    pattern: &crate::rule::ProductPattern,
    scalars: &[Expr],
    data: &[Expr],
) -> Option<(Mapping, Vec<usize>, Vec<usize>)> {
    let mut s_sel = Vec::with_capacity(pattern.scalars.len());
    choose(&pattern.scalars, scalars, 0, &mut s_sel, &mut |s_sel| {
        let mut d_sel = Vec::with_capacity(pattern.data.len());
        choose(&pattern.data, data, 0, &mut d_sel, &mut |d_sel| {
            let p_sub = Expr::product(
                pattern.scalars.iter().chain(pattern.data.iter()).cloned().collect(),
            );
            let t_sub = Expr::product(
                s_sel
                    .iter()
                    .map(|&j| scalars[j].clone())
                    .chain(d_sel.iter().map(|&j| data[j].clone()))
                    .collect(),
            );
            first_mapping(&p_sub, &t_sub).map(|m| (m, s_sel.to_vec(), d_sel.to_vec()))
        })
    })
}

/// Enumerates ascending index combinations of `pool` whose hashes match `pattern`'s, position by
/// position, short-circuiting on the first accepted candidate set.
fn choose<R>(
    pattern: &[Expr],
    pool: &[Expr],
    i: usize,
    sel: &mut Vec<usize>,
    accept: &mut dyn FnMut(&[usize]) -> Option<R>,
) -> Option<R> {
    if i == pattern.len() {
        return accept(sel);
    }
    let ph = pattern[i].structural_hash();
    let start = sel.last().map(|&j| j + 1).unwrap_or(0);
    for j in start..pool.len() {
        if pool[j].structural_hash() != ph {
            continue;
        }
        sel.push(j);
        if let Some(found) = choose(pattern, pool, i + 1, sel, accept) {
            return Some(found);
        }
        sel.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use crate::rule::compile;
    use pretty_assertions::assert_eq;
    use super::*;
    use tcas_expr::{Index, IndexType};

    const T: IndexType = IndexType(0);

    fn contraction_rule() -> Rule {
        // A_m^n B_n^p = C_m^p
        let from = Expr::product(vec![
            Expr::symbol("A", vec![Index::lower(T, 0), Index::upper(T, 1)]),
            Expr::symbol("B", vec![Index::lower(T, 1), Index::upper(T, 2)]),
        ]);
        let to = Expr::symbol("C", vec![Index::lower(T, 0), Index::upper(T, 2)]);
        compile(from, to).unwrap()
    }

    #[test]
    fn bite_leaves_the_remainder_untouched() {
        let rule = contraction_rule();
        let target = Expr::product(vec![
            Expr::symbol("A", vec![Index::lower(T, 10), Index::upper(T, 11)]),
            Expr::symbol("B", vec![Index::lower(T, 11), Index::upper(T, 12)]),
            Expr::symbol("D", vec![Index::lower(T, 13)]),
        ]);
        let product = match &target {
            Expr::Product(p) => p,
            _ => unreachable!(),
        };
        let mut scopes = ScopeStack::new(&target);
        let result = apply(&rule, product, &mut scopes).unwrap();

        let expected = Expr::product(vec![
            Expr::symbol("C", vec![Index::lower(T, 10), Index::upper(T, 12)]),
            Expr::symbol("D", vec![Index::lower(T, 13)]),
        ]);
        assert_eq!(result, expected);
    }

    #[test]
    fn repeated_bites_consume_every_occurrence() {
        let rule = contraction_rule();
        let target = Expr::product(vec![
            Expr::symbol("A", vec![Index::lower(T, 0), Index::upper(T, 1)]),
            Expr::symbol("B", vec![Index::lower(T, 1), Index::upper(T, 2)]),
            Expr::symbol("A", vec![Index::lower(T, 5), Index::upper(T, 6)]),
            Expr::symbol("B", vec![Index::lower(T, 6), Index::upper(T, 7)]),
        ]);
        let product = match &target {
            Expr::Product(p) => p,
            _ => unreachable!(),
        };
        let mut scopes = ScopeStack::new(&target);
        let result = apply(&rule, product, &mut scopes).unwrap();

        let expected = Expr::product(vec![
            Expr::symbol("C", vec![Index::lower(T, 0), Index::upper(T, 2)]),
            Expr::symbol("C", vec![Index::lower(T, 5), Index::upper(T, 7)]),
        ]);
        assert_eq!(result, expected);
    }

    #[test]
    fn no_bite_means_no_result() {
        let rule = contraction_rule();
        let target = Expr::product(vec![
            Expr::symbol("E", vec![Index::lower(T, 0)]),
            Expr::symbol("F", vec![Index::upper(T, 0)]),
        ]);
        let product = match &target {
            Expr::Product(p) => p,
            _ => unreachable!(),
        };
        let mut scopes = ScopeStack::new(&target);
        assert_eq!(apply(&rule, product, &mut scopes), None);
    }

    #[test]
    fn pattern_factor_normalizes_the_rebuild() {
        // 2 A_m A^m = S  applied to  6 A_x A^x  gives  3 S
        let from = Expr::product(vec![
            Expr::num(2),
            Expr::symbol("A", vec![Index::lower(T, 0)]),
            Expr::symbol("A", vec![Index::upper(T, 0)]),
        ]);
        let rule = compile(from, Expr::var("S")).unwrap();
        let target = Expr::product(vec![
            Expr::num(6),
            Expr::symbol("A", vec![Index::lower(T, 4)]),
            Expr::symbol("A", vec![Index::upper(T, 4)]),
        ]);
        let product = match &target {
            Expr::Product(p) => p,
            _ => unreachable!(),
        };
        let mut scopes = ScopeStack::new(&target);
        let result = apply(&rule, product, &mut scopes).unwrap();
        assert_eq!(result, Expr::product(vec![Expr::num(3), Expr::var("S")]));
    }
}

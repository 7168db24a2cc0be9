//! Subset correspondence between a pattern sum and a larger target sum.

use tcas_expr::matcher::{first_mapping, Mapping};
use tcas_expr::Expr;

/// Finds a size-k subset of `target`'s terms and one shared [`Mapping`] under which the pattern
/// sum equals that subset's sum termwise. Returns the mapping and the selected target positions,
/// or `None` if no subset works.
///
/// Candidates are selected per pattern term by structural hash and the whole candidate set is
/// validated with a single matcher call on the two induced sub-sums, backtracking on failure.
/// Both sums are expected in canonical hash order, which makes the initial hash-range rejection
/// sound.
pub fn find(pattern: &[Expr], target: &[Expr]) -> Option<(Mapping, Vec<usize>)> {
    if pattern.is_empty() || pattern.len() > target.len() {
        return None;
    }

    let ph: Vec<u64> = pattern.iter().map(Expr::structural_hash).collect();
    let th: Vec<u64> = target.iter().map(Expr::structural_hash).collect();

    // canonical order puts the hash extrema at the ends of the target
    let (pmin, pmax) = (*ph.iter().min().unwrap(), *ph.iter().max().unwrap());
    if pmin < *th.first().unwrap() || pmax > *th.last().unwrap() {
        return None;
    }

    let mut chosen = Vec::with_capacity(pattern.len());
    let mut used = vec![false; target.len()];
    select(pattern, target, &ph, &th, 0, &mut chosen, &mut used)
}

fn select(
    pattern: &[Expr],
    target: &[Expr],
    ph: &[u64],
    th: &[u64],
    i: usize,
    chosen: &mut Vec<usize>,
    used: &mut Vec<bool>,
) -> Option<(Mapping, Vec<usize>)> {
    if i == pattern.len() {
        let p_sub = Expr::sum(pattern.to_vec());
        let t_sub = Expr::sum(chosen.iter().map(|&j| target[j].clone()).collect());
        return first_mapping(&p_sub, &t_sub).map(|m| (m, chosen.clone()));
    }
    for j in 0..target.len() {
        if used[j] || th[j] != ph[i] {
            continue;
        }
        used[j] = true;
        chosen.push(j);
        if let Some(found) = select(pattern, target, ph, th, i + 1, chosen, used) {
            return Some(found);
        }
        chosen.pop();
        used[j] = false;
    }
    None
}

//! Symmetry-aware structural matching.
//!
//! [`mappings`] answers the question "does `pattern` match `target`, and under what index
//! correspondence, with what sign": it enumerates every distinct [`Mapping`] (a bijection
//! between the two subtrees' index names plus a sign) that makes the pattern structurally equal
//! to the target up to commutativity of sums and products and up to the declared slot symmetries
//! of simple symbols. [`first_mapping`] is the short-circuit convenience.
//!
//! Pattern indices are always the *domain* of the resulting mapping. The sign is `true` when an
//! odd antisymmetric reordering was needed to align pattern and target: an odd permutation of an
//! antisymmetric symbol's slots, or a sum that only matches its target globally negated, filtered
//! through the parity of any enclosing scalar function (odd functions pass the sign out, even
//! functions absorb it, functions of unknown parity reject signed argument matches).

use crate::expr::{Expr, Symbol};
use crate::index::{Index, IndexGenerator, IndexName};
use crate::symmetry::{for_each_permutation, Symmetry};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Scalar functions that are odd in their argument: `f(-x) = -f(x)`.
static ODD_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["sin", "tan", "sinh", "tanh", "arcsin", "arctan", "arcsinh", "arctanh"]
        .into_iter()
        .collect()
});

/// Scalar functions that are even in their argument: `f(-x) = f(x)`.
static EVEN_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["cos", "cosh", "abs", "sec", "sech"].into_iter().collect()
});

/// A bijection between the index names of two subtrees (pattern → target), plus a sign.
///
/// Mappings are produced by [`mappings`], consumed by
/// [`apply_to`](Mapping::apply_to), and discarded within a single match/apply step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mapping {
    fwd: BTreeMap<IndexName, IndexName>,
    rev: BTreeMap<IndexName, IndexName>,
    pub sign: bool,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the pattern occurrence `from` corresponds to the target occurrence `to`.
    ///
    /// Returns false (leaving the mapping unchanged) if the pair is inconsistent with what is
    /// already recorded: a type or state mismatch, or a violation of bijectivity in either
    /// direction.
    pub fn insert(&mut self, from: Index, to: Index) -> bool {
        if from.ty != to.ty || from.state != to.state {
            return false;
        }
        let (fk, tk) = (from.key(), to.key());
        if let Some(existing) = self.fwd.get(&fk) {
            return *existing == tk;
        }
        if self.rev.contains_key(&tk) {
            return false;
        }
        self.fwd.insert(fk, tk);
        self.rev.insert(tk, fk);
        true
    }

    /// Looks up the target name a pattern name is mapped to.
    pub fn get(&self, from: IndexName) -> Option<IndexName> {
        self.fwd.get(&from).copied()
    }

    /// Iterates over the recorded (pattern, target) name pairs.
    pub fn iter(&self) -> impl Iterator<Item = (IndexName, IndexName)> + '_ {
        self.fwd.iter().map(|(f, t)| (*f, *t))
    }

    pub fn len(&self) -> usize {
        self.fwd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fwd.is_empty()
    }

    /// Rename-and-substitute: applies this mapping to `expr` (normally a rule's replacement),
    /// renaming its free indices through the recorded correspondence and its dummy indices to
    /// names drawn from `gen`, then applying the sign.
    ///
    /// All renames happen simultaneously, so a mapping target colliding with one of `expr`'s own
    /// dummies cannot capture it.
    pub fn apply_to(&self, expr: &Expr, gen: &mut IndexGenerator) -> Expr {
        let mut dummies = BTreeSet::new();
        expr.collect_dummy_names(&mut dummies);

        let mut rename: HashMap<IndexName, IndexName> =
            self.fwd.iter().map(|(f, t)| (*f, *t)).collect();
        for d in dummies {
            let fresh = gen.fresh(d.ty);
            rename.insert(d, IndexName { ty: d.ty, name: fresh });
        }

        let renamed = expr.rename(&rename);
        if self.sign {
            -renamed
        } else {
            renamed
        }
    }
}

/// Enumerates every distinct mapping that makes `pattern` structurally equal to `target`.
///
/// The sequence is exhaustive over distinct index correspondences compatible with the declared
/// symmetries, in a deterministic order (canonical child order plus lexicographic permutation
/// order).
pub fn mappings(pattern: &Expr, target: &Expr) -> Vec<Mapping> {
    let mut out = Vec::new();
    extend(pattern, target, Mapping::new(), &mut out);

    let mut unique: Vec<Mapping> = Vec::new();
    for m in out {
        if !unique.contains(&m) {
            unique.push(m);
        }
    }
    unique
}

/// Returns the first mapping found in search order, if any.
pub fn first_mapping(pattern: &Expr, target: &Expr) -> Option<Mapping> {
    mappings(pattern, target).into_iter().next()
}

/// Extends `base` with every consistent way of aligning `pattern` with `target`, pushing each
/// completed extension into `out`.
fn extend(pattern: &Expr, target: &Expr, base: Mapping, out: &mut Vec<Mapping>) {
    match (pattern, target) {
        (Expr::Num(a), Expr::Num(b)) => {
            if a == b {
                out.push(base);
            }
        }
        (Expr::Symbol(p), Expr::Symbol(t)) => extend_symbol(p, t, &base, out),
        (Expr::Pow(pb, pe), Expr::Pow(tb, te)) => {
            let base_sign = base.sign;
            let mut mid = Vec::new();
            extend(pb, tb, base, &mut mid);
            for mut m in mid {
                if m.sign != base_sign {
                    // the base only matched globally negated; an even integer exponent
                    // absorbs that sign, an odd one carries it, anything else cannot
                    // hold a sign at all
                    match pe.as_ref() {
                        Expr::Num(e) if e.is_integer() => {
                            if e.numer().is_even() {
                                m.sign = base_sign;
                            }
                        }
                        _ => continue,
                    }
                }
                // the exponent itself must match without a sign
                let want = m.sign;
                let mut done = Vec::new();
                extend(pe, te, m, &mut done);
                out.extend(done.into_iter().filter(|r| r.sign == want));
            }
        }
        (Expr::Fun(pn, pa), Expr::Fun(tn, ta)) if pn == tn => {
            let mut mid = Vec::new();
            extend(pa, ta, base.clone(), &mut mid);
            for mut m in mid {
                if m.sign != base.sign {
                    // the argument only matched globally negated
                    if ODD_FUNCTIONS.contains(pn.as_str()) {
                        out.push(m);
                    } else if EVEN_FUNCTIONS.contains(pn.as_str()) {
                        m.sign = base.sign;
                        out.push(m);
                    }
                    // unknown parity: a signed argument match proves nothing, drop it
                } else {
                    out.push(m);
                }
            }
        }
        (Expr::Sum(ps), Expr::Sum(ts)) if ps.len() == ts.len() => {
            multiset_extend(ps, ts, base.clone(), out);

            // the sum may instead equal the negated target; try the pattern with every term
            // negated and flip the resulting sign
            let negated: Vec<Expr> = ps.iter().map(|t| -t.clone()).collect();
            let mut flipped = Vec::new();
            multiset_extend(&negated, ts, base, &mut flipped);
            for mut m in flipped {
                m.sign = !m.sign;
                out.push(m);
            }
        }
        (Expr::Product(pp), Expr::Product(tp))
            if pp.factor == tp.factor
                && pp.scalars.len() == tp.scalars.len()
                && pp.data.len() == tp.data.len() =>
        {
            let mut mid = Vec::new();
            multiset_extend(&pp.scalars, &tp.scalars, base, &mut mid);
            for m in mid {
                multiset_extend(&pp.data, &tp.data, m, out);
            }
        }
        (Expr::Field(pf), Expr::Field(tf))
            if pf.head.name == tf.head.name
                && pf.head.indices.len() == tf.head.indices.len()
                && pf.args.len() == tf.args.len() =>
        {
            let mut mid = vec![base];
            // binding indices correspond positionally
            for (pb, tb) in pf.arg_indices.iter().zip(&tf.arg_indices) {
                if pb.len() != tb.len() {
                    return;
                }
            }
            for (pa, ta) in pf.args.iter().zip(&tf.args) {
                let mut next = Vec::new();
                for m in mid {
                    extend(pa, ta, m, &mut next);
                }
                mid = next;
                if mid.is_empty() {
                    return;
                }
            }
            for m in mid {
                let mut next = Vec::new();
                extend_symbol(&pf.head, &tf.head, &m, &mut next);
                for mut head_match in next {
                    let mut consistent = true;
                    'bindings: for (pb, tb) in pf.arg_indices.iter().zip(&tf.arg_indices) {
                        for (pi, ti) in pb.iter().zip(tb) {
                            if !head_match.insert(*pi, *ti) {
                                consistent = false;
                                break 'bindings;
                            }
                        }
                    }
                    if consistent {
                        out.push(head_match);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Aligns two simple symbols: same head, same arity, index correspondence positional modulo the
/// pattern's declared slot symmetry (odd antisymmetric permutations flip the sign).
fn extend_symbol(pattern: &Symbol, target: &Symbol, base: &Mapping, out: &mut Vec<Mapping>) {
    if pattern.name != target.name || pattern.indices.len() != target.indices.len() {
        return;
    }
    let n = pattern.indices.len();
    if !pattern.symmetry.permutable() || n < 2 {
        if let Some(m) = try_slots(pattern, target, base, (0..n).collect::<Vec<_>>().as_slice(), false) {
            out.push(m);
        }
        return;
    }
    let antisymmetric = pattern.symmetry == Symmetry::Antisymmetric;
    for_each_permutation(n, |perm, parity| {
        if let Some(m) = try_slots(pattern, target, base, perm, antisymmetric && parity) {
            out.push(m);
        }
        true
    });
}

/// Attempts the slot assignment `pattern[i] -> target[perm[i]]` on a copy of `base`.
fn try_slots(
    pattern: &Symbol,
    target: &Symbol,
    base: &Mapping,
    perm: &[usize],
    flip: bool,
) -> Option<Mapping> {
    let mut m = base.clone();
    for (i, &j) in perm.iter().enumerate() {
        if !m.insert(pattern.indices[i], target.indices[j]) {
            return None;
        }
    }
    m.sign ^= flip;
    Some(m)
}

/// Extends `base` over an unordered correspondence between two equal-length child multisets,
/// all pattern children aligned under one shared mapping. Candidate target children are
/// pre-filtered by structural hash before any recursive work.
fn multiset_extend(patterns: &[Expr], targets: &[Expr], base: Mapping, out: &mut Vec<Mapping>) {
    if patterns.len() != targets.len() {
        return;
    }
    let target_hashes: Vec<u64> = targets.iter().map(Expr::structural_hash).collect();
    let mut used = vec![false; targets.len()];
    multiset_rec(patterns, targets, &target_hashes, 0, &mut used, base, out);
}

fn multiset_rec(
    patterns: &[Expr],
    targets: &[Expr],
    target_hashes: &[u64],
    i: usize,
    used: &mut Vec<bool>,
    m: Mapping,
    out: &mut Vec<Mapping>,
) {
    if i == patterns.len() {
        out.push(m);
        return;
    }
    let ph = patterns[i].structural_hash();
    for j in 0..targets.len() {
        if used[j] || target_hashes[j] != ph {
            continue;
        }
        let mut sub = Vec::new();
        extend(&patterns[i], &targets[j], m.clone(), &mut sub);
        if sub.is_empty() {
            continue;
        }
        used[j] = true;
        for mm in sub {
            multiset_rec(patterns, targets, target_hashes, i + 1, used, mm, out);
        }
        used[j] = false;
    }
}

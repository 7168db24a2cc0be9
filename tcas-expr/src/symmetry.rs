//! Declared permutation symmetries of simple symbols.
//!
//! The matcher only ever needs to know which slot permutations of a symbol are allowed, and with
//! what sign. This closed enum answers that for the symmetries the engine supports: none
//! (identity only), fully symmetric (every permutation, sign `+`), and fully antisymmetric (every
//! permutation, sign by parity).

/// The declared symmetry of a simple symbol over all of its index slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Symmetry {
    /// Index order is significant; only the identity permutation matches.
    #[default]
    None,

    /// Any permutation of the slots matches with positive sign.
    Symmetric,

    /// Any permutation of the slots matches; odd permutations flip the sign.
    Antisymmetric,
}

impl Symmetry {
    /// Returns true if any non-identity slot permutation is allowed.
    pub fn permutable(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Returns the parity of a permutation: `true` for odd.
///
/// Counts transpositions by walking the permutation's cycles.
pub fn parity(perm: &[usize]) -> bool {
    let mut seen = vec![false; perm.len()];
    let mut transpositions = 0;
    for start in 0..perm.len() {
        if seen[start] {
            continue;
        }
        let mut i = start;
        let mut cycle_len = 0;
        while !seen[i] {
            seen[i] = true;
            i = perm[i];
            cycle_len += 1;
        }
        transpositions += cycle_len - 1;
    }
    transpositions % 2 == 1
}

/// Calls `f` with every permutation of `0..n` and its parity, in a deterministic order starting
/// from the identity. Stops early if `f` returns `false`.
pub fn for_each_permutation(n: usize, mut f: impl FnMut(&[usize], bool) -> bool) {
    let mut perm: Vec<usize> = (0..n).collect();
    loop {
        if !f(&perm, parity(&perm)) {
            return;
        }
        // next permutation in lexicographic order
        let Some(i) = perm.windows(2).rposition(|w| w[0] < w[1]) else {
            return;
        };
        let j = perm.iter().rposition(|&x| x > perm[i]).unwrap();
        perm.swap(i, j);
        perm[i + 1..].reverse();
    }
}

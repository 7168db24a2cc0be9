//! Rule construction errors.

use tcas_expr::Index;
use thiserror::Error;

/// An error raised while compiling a rewrite rule. Compilation errors are configuration errors:
/// they are surfaced to the caller immediately and the offending rule is never applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The replacement's free indices do not equal the pattern's (as sets). A substitution that
    /// changed the free-index signature of a subtree would corrupt the whole expression, so this
    /// is rejected up front. A zero replacement is exempt: zero carries any signature.
    #[error("free indices of the replacement ({}) do not match the pattern's ({})", fmt_indices(.to), fmt_indices(.from))]
    FreeIndexMismatch { from: Vec<Index>, to: Vec<Index> },
}

fn fmt_indices(indices: &[Index]) -> String {
    indices
        .iter()
        .map(Index::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

//! Rule-directed term rewriting for tensor expressions.
//!
//! Given a rewrite rule `from → to` and a target tree, the engine finds every subtree matching
//! `from` up to commutativity and declared index symmetries, and replaces it with `to` after
//! renaming `to`'s dummy indices so they cannot collide with indices live anywhere else in the
//! tree. [`compile`] builds a single rule, [`RuleSet::rewrite`] applies a compiled set in one
//! full traversal; iterating to a fixpoint, with an iteration cap, is the caller's business.

pub mod driver;
pub mod error;
pub mod fast_path;
pub mod product_bijection;
pub mod rule;
pub mod scope;
pub mod sum_bijection;

pub use driver::RuleSet;
pub use error::RuleError;
pub use rule::{compile, FastPathKind, Rule, RuleKind};
pub use scope::{ScopeKind, ScopeStack};

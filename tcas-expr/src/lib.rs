//! Tensor expression trees and structural matching.
//!
//! This crate defines the expression representation shared by the rewrite engine: indexed
//! symbols and fields, canonical-ordered sums and products, the renaming-invariant structural
//! hash, and the symmetry-aware matcher that aligns a pattern with a target up to index renaming
//! and sign.

pub mod expr;
pub mod index;
pub mod matcher;
pub mod primitive;
pub mod symmetry;

pub use expr::{Expr, Field, Product, Symbol};
pub use index::{Index, IndexGenerator, IndexName, IndexState, IndexType};
pub use matcher::{first_mapping, mappings, Mapping};
pub use symmetry::Symmetry;

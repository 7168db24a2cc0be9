//! The tensor expression tree.
//!
//! Expressions are trees of [`Expr`] nodes: sums, products, powers, scalar functions, indexed
//! simple symbols, and indexed symbolic functions ("fields"). The commutative containers (the
//! terms of a [`Expr::Sum`] and the index-bearing part of a [`Expr::Product`]) are unordered
//! multisets kept in a **canonical order** determined by each child's [structural
//! hash](Expr::structural_hash). Every pruning heuristic in the rewrite engine depends on that
//! invariant, so nodes are only ever built through the smart constructors ([`Expr::sum`],
//! [`Expr::product`], [`Expr::pow`], ...), which flatten nested containers, fold numeric leaves,
//! collapse trivial shapes, and sort.
//!
//! # Structural hash
//!
//! The structural hash is deliberately **invariant under index renaming**: it hashes index types
//! and states but never index names, and it ignores a product's numeric factor (and the sign of a
//! numeric leaf). Any two subtrees that could possibly match under an index mapping therefore
//! hash equal, which is what makes hash comparison a sound fast-rejection test. The converse does
//! not hold; equal hashes prove nothing.
//!
//! # Free and dummy indices
//!
//! An index name occurring twice with opposite state within one multiplicative scope is summed
//! ("dummy"); a name occurring once is part of the expression's visible signature ("free").
//! These views are derived on demand ([`Expr::free_indices`], [`Expr::collect_dummy_names`]),
//! never stored, so they can never go stale while the tree is rebuilt.

pub mod iter;

use crate::index::{Index, IndexName};
use crate::primitive::{rat, rat_pow};
use crate::symmetry::Symmetry;
use iter::ExprIter;
use rug::Rational;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Mul, Neg};

/// An indexed simple symbol, such as a metric, a field strength, or a plain scalar variable
/// (a symbol with no indices).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub indices: Vec<Index>,
    pub symmetry: Symmetry,
}

impl Symbol {
    /// The free indices of the symbol: every slot whose opposite-state twin does not also appear
    /// on the symbol (a repeated name in both positions is a self-contraction, i.e. a trace).
    pub fn free_indices(&self) -> Vec<Index> {
        let mut free: Vec<Index> = self
            .indices
            .iter()
            .copied()
            .filter(|i| !self.indices.contains(&i.toggled()))
            .collect();
        free.sort();
        free
    }

    /// The names contracted within the symbol itself.
    fn trace_names(&self, out: &mut BTreeSet<IndexName>) {
        for i in &self.indices {
            if self.indices.contains(&i.toggled()) {
                out.insert(i.key());
            }
        }
    }

    fn rename(&self, map: &HashMap<IndexName, IndexName>) -> Self {
        Self {
            name: self.name.clone(),
            indices: self.indices.iter().map(|i| rename_index(*i, map)).collect(),
            symmetry: self.symmetry,
        }
    }
}

/// An indexed symbolic function. The head carries the field's own indices; each argument is an
/// expression whose visible indices are bound by the corresponding `arg_indices` entry, so they
/// never leak into the field's surroundings. Argument order is significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub head: Symbol,
    pub args: Vec<Expr>,
    pub arg_indices: Vec<Vec<Index>>,
}

/// A product node: one exact scalar factor, the indexless factors, and the index-bearing "data"
/// factors kept canonical-sorted by structural hash.
#[derive(Debug, Clone)]
pub struct Product {
    pub factor: Rational,
    pub scalars: Vec<Expr>,
    pub data: Vec<Expr>,
}

impl Product {
    /// The free indices of the product: every data factor's free index whose opposite-state twin
    /// does not appear on a sibling factor.
    pub fn free_indices(&self) -> Vec<Index> {
        let all: Vec<Index> = self.data.iter().flat_map(|d| d.free_indices()).collect();
        let mut free: Vec<Index> = all
            .iter()
            .copied()
            .filter(|i| !all.contains(&i.toggled()))
            .collect();
        free.sort();
        free
    }

    /// The names contracted between factors at this product's own scope.
    pub fn contracted_names(&self) -> BTreeSet<IndexName> {
        let all: Vec<Index> = self.data.iter().flat_map(|d| d.free_indices()).collect();
        all.iter()
            .filter(|i| all.contains(&i.toggled()))
            .map(|i| i.key())
            .collect()
    }

    /// All factors, indexless first.
    pub fn children(&self) -> impl Iterator<Item = &Expr> {
        self.scalars.iter().chain(self.data.iter())
    }
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.factor == other.factor
            && multiset_eq(&self.scalars, &other.scalars)
            && multiset_eq(&self.data, &other.data)
    }
}

impl Eq for Product {}

/// A tensor expression.
///
/// Commutative containers are canonical-sorted; see the [module-level documentation](self).
#[derive(Debug, Clone, Eq)]
pub enum Expr {
    /// An exact rational number.
    Num(Rational),

    /// Multiple terms added together. Always ≥ 2 terms; all terms share one free-index set.
    Sum(Vec<Expr>),

    /// Multiple factors multiplied together.
    Product(Product),

    /// An indexless expression raised to an indexless power.
    Pow(Box<Expr>, Box<Expr>),

    /// A scalar function of a single indexless argument.
    Fun(String, Box<Expr>),

    /// An indexed simple symbol.
    Symbol(Symbol),

    /// An indexed symbolic function.
    Field(Field),
}

/// Checks two slices for equality as multisets of expressions, the way similar-term scans compare
/// commutative children.
fn multiset_eq(a: &[Expr], b: &[Expr]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

/// Renames one index occurrence through a name map, keeping its state.
fn rename_index(i: Index, map: &HashMap<IndexName, IndexName>) -> Index {
    match map.get(&i.key()) {
        Some(n) => Index { ty: n.ty, name: n.name, state: i.state },
        None => i,
    }
}

impl Expr {
    /// Creates an exact rational leaf.
    pub fn num<T>(n: T) -> Self
    where
        Rational: From<T>,
    {
        Self::Num(rat(n))
    }

    /// Creates an indexless symbol (a plain scalar variable).
    pub fn var(name: impl Into<String>) -> Self {
        Self::symbol(name, Vec::new())
    }

    /// Creates a simple symbol with the given indices and no declared symmetry.
    pub fn symbol(name: impl Into<String>, indices: Vec<Index>) -> Self {
        Self::symbol_with(name, indices, Symmetry::None)
    }

    /// Creates a simple symbol with a declared slot symmetry.
    pub fn symbol_with(name: impl Into<String>, indices: Vec<Index>, symmetry: Symmetry) -> Self {
        Self::Symbol(Symbol { name: name.into(), indices, symmetry })
    }

    /// Creates a scalar function node. No simplification is done.
    pub fn fun(name: impl Into<String>, arg: Expr) -> Self {
        Self::Fun(name.into(), Box::new(arg))
    }

    /// Creates a field node. Each argument's binding indices default to the argument's own free
    /// indices.
    pub fn field(head: impl Into<String>, head_indices: Vec<Index>, args: Vec<Expr>) -> Self {
        let arg_indices = args.iter().map(|a| a.free_indices()).collect();
        Self::Field(Field {
            head: Symbol { name: head.into(), indices: head_indices, symmetry: Symmetry::None },
            args,
            arg_indices,
        })
    }

    /// Builds a sum, flattening nested sums, folding numeric terms, dropping zeros, and
    /// canonical-sorting the result. Trivial shapes collapse to the single term or to `0`.
    pub fn sum(terms: Vec<Expr>) -> Self {
        let mut acc = rat(0);
        let mut out: Vec<Expr> = Vec::new();
        let mut stack = terms;
        stack.reverse();
        while let Some(term) = stack.pop() {
            match term {
                Self::Num(n) => acc += n,
                Self::Sum(inner) => {
                    for t in inner.into_iter().rev() {
                        stack.push(t);
                    }
                }
                other => out.push(other),
            }
        }
        if acc != 0 {
            out.push(Self::Num(acc));
        }
        match out.len() {
            0 => Self::Num(rat(0)),
            1 => out.remove(0),
            _ => {
                out.sort_by_cached_key(Self::structural_hash);
                Self::Sum(out)
            }
        }
    }

    /// Builds a product, flattening nested products, folding numeric factors into the scalar
    /// factor, splitting indexless factors from index-bearing ones, and canonical-sorting both
    /// parts. A zero factor collapses the whole product to `0`; trivial shapes downgrade.
    pub fn product(factors: Vec<Expr>) -> Self {
        let mut factor = rat(1);
        let mut scalars: Vec<Expr> = Vec::new();
        let mut data: Vec<Expr> = Vec::new();
        let mut stack = factors;
        stack.reverse();
        while let Some(f) = stack.pop() {
            match f {
                Self::Num(n) => factor *= n,
                Self::Product(p) => {
                    factor *= p.factor;
                    scalars.extend(p.scalars);
                    data.extend(p.data);
                }
                other => {
                    if other.free_indices().is_empty() {
                        scalars.push(other);
                    } else {
                        data.push(other);
                    }
                }
            }
        }
        if factor == 0 {
            return Self::Num(rat(0));
        }
        if scalars.is_empty() && data.is_empty() {
            return Self::Num(factor);
        }
        if factor == 1 && scalars.len() + data.len() == 1 {
            return scalars.pop().or_else(|| data.pop()).unwrap();
        }
        scalars.sort_by_cached_key(Self::structural_hash);
        data.sort_by_cached_key(Self::structural_hash);
        Self::Product(Product { factor, scalars, data })
    }

    /// Builds a power. Unit and zero exponents collapse, numeric bases under integer exponents
    /// are computed exactly, and a negative-factored product base under an integer exponent has
    /// its sign extracted (absorbed for even exponents, pulled out for odd ones).
    pub fn pow(base: Expr, exp: Expr) -> Self {
        let e = match exp {
            Self::Num(e) => e,
            exp => return Self::Pow(Box::new(base), Box::new(exp)),
        };
        if e == 0 {
            return Self::Num(rat(1));
        }
        if e == 1 {
            return base;
        }
        if e.is_integer() {
            let even = e.numer().is_even();
            match base {
                Self::Num(b) => {
                    if let Some(k) = e.numer().to_i32() {
                        if b != 0 || k > 0 {
                            return Self::Num(rat_pow(&b, k));
                        }
                    }
                    Self::Pow(Box::new(Self::Num(b)), Box::new(Self::Num(e)))
                }
                Self::Product(p) if p.factor.cmp0() == Ordering::Less => {
                    let mut parts = vec![Self::Num(-p.factor)];
                    parts.extend(p.scalars);
                    parts.extend(p.data);
                    let positive = Self::product(parts);
                    let pw = Self::Pow(Box::new(positive), Box::new(Self::Num(e)));
                    if even {
                        pw
                    } else {
                        Self::product(vec![Self::Num(rat(-1)), pw])
                    }
                }
                base => Self::Pow(Box::new(base), Box::new(Self::Num(e))),
            }
        } else {
            Self::Pow(Box::new(base), Box::new(Self::Num(e)))
        }
    }

    /// Returns true if the expression is the number zero.
    pub fn is_zero(&self) -> bool {
        matches!(self, Self::Num(n) if *n == 0)
    }

    /// The free indices of the expression, sorted: indices that appear exactly once and are part
    /// of the externally visible index signature.
    pub fn free_indices(&self) -> Vec<Index> {
        match self {
            Self::Num(_) => Vec::new(),
            Self::Symbol(s) => s.free_indices(),
            Self::Field(f) => f.head.free_indices(),
            Self::Pow(base, _) => base.free_indices(),
            Self::Fun(_, arg) => arg.free_indices(),
            Self::Sum(terms) => terms.first().map(Self::free_indices).unwrap_or_default(),
            Self::Product(p) => p.free_indices(),
        }
    }

    /// Accumulates every index name appearing anywhere in the subtree. This is the primitive the
    /// forbidden-index scopes are built from.
    pub fn collect_index_names(&self, out: &mut HashSet<IndexName>) {
        for node in self.post_order_iter() {
            match node {
                Self::Symbol(s) => out.extend(s.indices.iter().map(|i| i.key())),
                Self::Field(f) => {
                    out.extend(f.head.indices.iter().map(|i| i.key()));
                    for binding in &f.arg_indices {
                        out.extend(binding.iter().map(|i| i.key()));
                    }
                }
                _ => {}
            }
        }
    }

    /// Accumulates every contracted (dummy) index name in the subtree, at any scope.
    pub fn collect_dummy_names(&self, out: &mut BTreeSet<IndexName>) {
        match self {
            Self::Num(_) => {}
            Self::Symbol(s) => s.trace_names(out),
            Self::Field(f) => {
                f.head.trace_names(out);
                for a in &f.args {
                    a.collect_dummy_names(out);
                }
            }
            Self::Sum(terms) => {
                for t in terms {
                    t.collect_dummy_names(out);
                }
            }
            Self::Product(p) => {
                out.extend(p.contracted_names());
                for c in p.children() {
                    c.collect_dummy_names(out);
                }
            }
            Self::Pow(base, exp) => {
                base.collect_dummy_names(out);
                exp.collect_dummy_names(out);
            }
            Self::Fun(_, arg) => arg.collect_dummy_names(out),
        }
    }

    /// Renames every index occurrence whose name is in the map, simultaneously. Structure,
    /// canonical order, and structural hashes are unchanged (hashes never see names).
    pub fn rename(&self, map: &HashMap<IndexName, IndexName>) -> Expr {
        match self {
            Self::Num(n) => Self::Num(n.clone()),
            Self::Symbol(s) => Self::Symbol(s.rename(map)),
            Self::Field(f) => Self::Field(Field {
                head: f.head.rename(map),
                args: f.args.iter().map(|a| a.rename(map)).collect(),
                arg_indices: f
                    .arg_indices
                    .iter()
                    .map(|b| b.iter().map(|i| rename_index(*i, map)).collect())
                    .collect(),
            }),
            Self::Sum(terms) => Self::Sum(terms.iter().map(|t| t.rename(map)).collect()),
            Self::Product(p) => Self::Product(Product {
                factor: p.factor.clone(),
                scalars: p.scalars.iter().map(|c| c.rename(map)).collect(),
                data: p.data.iter().map(|c| c.rename(map)).collect(),
            }),
            Self::Pow(base, exp) => {
                Self::Pow(Box::new(base.rename(map)), Box::new(exp.rename(map)))
            }
            Self::Fun(name, arg) => Self::Fun(name.clone(), Box::new(arg.rename(map))),
        }
    }

    /// The per-node structural hash; see the [module-level documentation](self) for what it is
    /// and is not sensitive to.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash_into(&mut hasher);
        hasher.finish()
    }

    fn hash_into<H: Hasher>(&self, h: &mut H) {
        match self {
            Self::Num(n) => {
                0u8.hash(h);
                // sign-insensitive, so a globally negated term still collides
                n.clone().abs().hash(h);
            }
            Self::Sum(terms) => {
                1u8.hash(h);
                terms.len().hash(h);
                for t in terms {
                    t.hash_into(h);
                }
            }
            Self::Product(p) => {
                // the numeric factor is excluded for the same reason the Num sign is; a product
                // wrapping a single factor (e.g. a negated symbol) hashes as that factor, so a
                // globally negated term still collides with its positive form
                if p.scalars.len() + p.data.len() == 1 {
                    if let Some(only) = p.children().next() {
                        only.hash_into(h);
                    }
                    return;
                }
                2u8.hash(h);
                p.scalars.len().hash(h);
                p.data.len().hash(h);
                for c in p.children() {
                    c.hash_into(h);
                }
            }
            Self::Pow(base, exp) => {
                3u8.hash(h);
                base.hash_into(h);
                exp.hash_into(h);
            }
            Self::Fun(name, arg) => {
                4u8.hash(h);
                name.hash(h);
                arg.hash_into(h);
            }
            Self::Symbol(s) => {
                5u8.hash(h);
                s.name.hash(h);
                s.indices.len().hash(h);
                for i in &s.indices {
                    i.ty.0.hash(h);
                    (i.state as u8).hash(h);
                }
            }
            Self::Field(f) => {
                6u8.hash(h);
                f.head.name.hash(h);
                f.head.indices.len().hash(h);
                for i in &f.head.indices {
                    i.ty.0.hash(h);
                    (i.state as u8).hash(h);
                }
                f.args.len().hash(h);
                for a in &f.args {
                    a.hash_into(h);
                }
            }
        }
    }

    /// Returns an iterator that traverses the tree of expressions in left-to-right post-order
    /// (i.e. depth-first).
    pub fn post_order_iter(&self) -> ExprIter {
        ExprIter::new(self)
    }
}

/// Structural equality: same shape, equal values, with commutative children compared as
/// multisets (canonical order makes the common case a positional scan, but equal expressions
/// built along different routes may tie-break hash collisions differently).
impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a == b,
            (Self::Sum(a), Self::Sum(b)) => multiset_eq(a, b),
            (Self::Product(a), Self::Product(b)) => a == b,
            (Self::Pow(a, b), Self::Pow(c, d)) => a == c && b == d,
            (Self::Fun(n, a), Self::Fun(m, b)) => n == m && a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Field(a), Self::Field(b)) => a == b,
            _ => false,
        }
    }
}

/// Adds two expressions through [`Expr::sum`] (flattening, folding, canonicalizing).
impl Add for Expr {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::sum(vec![self, rhs])
    }
}

/// Multiplies two expressions through [`Expr::product`].
impl Mul for Expr {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self::product(vec![self, rhs])
    }
}

/// Multiplies the expression by -1.
impl Neg for Expr {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::product(vec![Self::Num(rat(-1)), self])
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", n),
            Self::Sum(terms) => {
                let mut iter = terms.iter();
                if let Some(term) = iter.next() {
                    write!(f, "{}", term)?;
                    for term in iter {
                        write!(f, " + {}", term)?;
                    }
                }
                Ok(())
            }
            Self::Product(p) => {
                let mut separate = false;
                if p.factor == -1 {
                    write!(f, "-")?;
                } else if p.factor != 1 {
                    write!(f, "{}", p.factor)?;
                    separate = true;
                }
                for child in p.children() {
                    if separate {
                        write!(f, "*")?;
                    }
                    if matches!(child, Self::Sum(_)) {
                        write!(f, "({})", child)?;
                    } else {
                        write!(f, "{}", child)?;
                    }
                    separate = true;
                }
                Ok(())
            }
            Self::Pow(base, exp) => {
                fmt_tight(base, f)?;
                write!(f, "^")?;
                fmt_tight(exp, f)
            }
            Self::Fun(name, arg) => write!(f, "{}({})", name, arg),
            Self::Symbol(s) => write!(f, "{}", s),
            Self::Field(field) => {
                write!(f, "{}[", field.head)?;
                let mut iter = field.args.iter();
                if let Some(arg) = iter.next() {
                    write!(f, "{}", arg)?;
                    for arg in iter {
                        write!(f, ", {}", arg)?;
                    }
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for i in &self.indices {
            write!(f, "{}", i)?;
        }
        Ok(())
    }
}

/// Wraps composite subexpressions in parentheses when rendered inside a tighter operator.
fn fmt_tight(expr: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match expr {
        Expr::Sum(_) | Expr::Product(_) | Expr::Pow(..) => write!(f, "({})", expr),
        Expr::Num(n) if *n < 0 => write!(f, "({})", expr),
        _ => write!(f, "{}", expr),
    }
}

//! The rewrite driver: one depth-first traversal applying a compiled rule set.

use crate::error::RuleError;
use crate::fast_path;
use crate::rule::{compile, Rule};
use crate::scope::ScopeStack;
use std::collections::BTreeSet;
use tcas_expr::{Expr, Field, Index};

/// An ordered set of compiled rules plus the one piece of configuration: whether several rules
/// may fire on the same node during one visit.
///
/// [`rewrite`](RuleSet::rewrite) performs exactly one full traversal; callers that want a
/// fixpoint call it repeatedly under their own iteration cap.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<Rule>,
    apply_if_modified: bool,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>, apply_if_modified: bool) -> Self {
        Self { rules, apply_if_modified }
    }

    /// Compiles a batch of `from → to` pairs, failing on the first bad rule.
    pub fn compile_many(
        pairs: Vec<(Expr, Expr)>,
        apply_if_modified: bool,
    ) -> Result<Self, RuleError> {
        let rules = pairs
            .into_iter()
            .map(|(from, to)| compile(from, to))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules, apply_if_modified))
    }

    /// One full rewrite pass over `tree`. Nodes are offered to the rules innermost-first; a node
    /// a rule turned into zero propagates up immediately without visiting its remaining siblings.
    pub fn rewrite(&self, tree: &Expr) -> Expr {
        let mut scopes = ScopeStack::new(tree);
        self.rewrite_node(tree, &mut scopes)
    }

    fn rewrite_node(&self, node: &Expr, scopes: &mut ScopeStack) -> Expr {
        let rebuilt = match node {
            Expr::Num(_) | Expr::Symbol(_) => node.clone(),
            Expr::Sum(terms) => {
                scopes.enter_sum(terms);
                let mut out = Vec::with_capacity(terms.len());
                for (i, term) in terms.iter().enumerate() {
                    scopes.set_summand(i);
                    out.push(self.rewrite_node(term, scopes));
                }
                scopes.leave();
                Expr::sum(out)
            }
            Expr::Product(p) => {
                scopes.enter_product(p);
                let mut parts = vec![Expr::Num(p.factor.clone())];
                let mut zeroed = false;
                for child in p.children() {
                    let new = self.rewrite_node(child, scopes);
                    if new.is_zero() {
                        zeroed = true;
                        break;
                    }
                    parts.push(new);
                }
                scopes.leave();
                if zeroed {
                    return Expr::num(0);
                }
                Expr::product(parts)
            }
            Expr::Pow(base, exp) => {
                scopes.enter_transparent();
                let base = self.rewrite_node(base, scopes);
                let exp = self.rewrite_node(exp, scopes);
                scopes.leave();
                Expr::pow(base, exp)
            }
            Expr::Fun(name, arg) => {
                scopes.enter_boundary();
                let arg = self.rewrite_node(arg, scopes);
                scopes.leave();
                Expr::fun(name.clone(), arg)
            }
            Expr::Field(f) => {
                scopes.enter_boundary();
                let args = f.args.iter().map(|a| self.rewrite_node(a, scopes)).collect();
                scopes.leave();
                Expr::Field(Field {
                    head: f.head.clone(),
                    args,
                    arg_indices: f.arg_indices.clone(),
                })
            }
        };
        if rebuilt.is_zero() {
            return rebuilt;
        }
        self.offer(rebuilt, scopes)
    }

    /// Offers one fully-rebuilt node to the rules. Products with at least two index-bearing
    /// factors go through the batch fast paths first; the general per-rule scan then runs in
    /// fixed rule order, stopping at the first firing rule unless `apply_if_modified` allows
    /// more.
    fn offer(&self, node: Expr, scopes: &mut ScopeStack) -> Expr {
        let free_before: BTreeSet<Index> = node.free_indices().into_iter().collect();
        let mut node = node;
        let mut fired = false;

        let mut batched = false;
        let batch_result = match &node {
            Expr::Product(p) if p.data.len() >= 2 => {
                batched = true;
                fast_path::apply_all(&self.rules, p, scopes)
            }
            _ => None,
        };
        if let Some(new) = batch_result {
            node = new;
            fired = true;
        }

        for rule in &self.rules {
            if fired && !self.apply_if_modified {
                break;
            }
            if batched && rule.fast_path().is_some() {
                continue;
            }
            if let Some(new) = rule.apply(&node, scopes) {
                node = new;
                fired = true;
                if !self.apply_if_modified {
                    break;
                }
            }
        }

        if fired && !node.is_zero() {
            let free_after: BTreeSet<Index> = node.free_indices().into_iter().collect();
            assert_eq!(
                free_before, free_after,
                "rewrite changed the free indices of a subtree"
            );
        }
        node
    }
}

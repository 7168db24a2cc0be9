//! End-to-end rewriting behavior, one test per engine guarantee.

use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use tcas_expr::{Expr, Index, IndexName, IndexType, Symmetry};
use tcas_rewrite::{compile, RuleError, RuleSet};

const T: IndexType = IndexType(0);

fn up(name: u32) -> Index {
    Index::upper(T, name)
}

fn dn(name: u32) -> Index {
    Index::lower(T, name)
}

fn rewrite_once(from: Expr, to: Expr, tree: &Expr) -> Expr {
    RuleSet::new(vec![compile(from, to).unwrap()], false).rewrite(tree)
}

fn free_set(e: &Expr) -> BTreeSet<Index> {
    e.free_indices().into_iter().collect()
}

/// How many index slots anywhere in the tree carry `name`.
fn occurrences(e: &Expr, name: IndexName) -> usize {
    e.post_order_iter()
        .map(|n| match n {
            Expr::Symbol(s) => s.indices.iter().filter(|i| i.key() == name).count(),
            Expr::Field(f) => f.head.indices.iter().filter(|i| i.key() == name).count(),
            _ => 0,
        })
        .sum()
}

#[test]
fn no_op_rule_returns_the_tree_unchanged() {
    let tree = Expr::product(vec![
        Expr::symbol("A", vec![dn(0), up(1)]),
        Expr::symbol("B", vec![dn(1)]),
    ]) + Expr::symbol("E", vec![dn(0)]);
    let result = rewrite_once(Expr::var("nowhere"), Expr::var("else"), &tree);
    assert_eq!(result, tree);
}

#[test]
fn rewriting_preserves_free_indices() {
    // A_m^n B_n^p = C_m^p inside a larger contraction
    let from = Expr::product(vec![
        Expr::symbol("A", vec![dn(0), up(1)]),
        Expr::symbol("B", vec![dn(1), up(2)]),
    ]);
    let to = Expr::symbol("C", vec![dn(0), up(2)]);
    let tree = Expr::product(vec![
        Expr::symbol("A", vec![dn(4), up(5)]),
        Expr::symbol("B", vec![dn(5), up(6)]),
        Expr::symbol("D", vec![dn(6), up(7)]),
    ]);
    let result = rewrite_once(from, to, &tree);
    assert_eq!(free_set(&result), free_set(&tree));
}

#[test]
fn replacement_dummies_avoid_live_indices() {
    // A_m = B_m^k C_k introduces a dummy; the tree already contracts over every small name
    let from = Expr::symbol("A", vec![dn(0)]);
    let to = Expr::product(vec![
        Expr::symbol("B", vec![dn(0), up(1)]),
        Expr::symbol("C", vec![dn(1)]),
    ]);
    let tree = Expr::product(vec![
        Expr::symbol("A", vec![dn(9)]),
        Expr::symbol("X", vec![up(0), dn(1)]),
        Expr::symbol("Y", vec![dn(0), up(1)]),
    ]);
    let result = rewrite_once(from, to, &tree);

    assert_eq!(free_set(&result), free_set(&tree));
    // the names contracted in X·Y must survive untouched, and the new B·C contraction must use
    // a name distinct from every one of them
    let mut dummies = BTreeSet::new();
    result.collect_dummy_names(&mut dummies);
    assert!(dummies.contains(&IndexName { ty: T, name: 0 }));
    assert!(dummies.contains(&IndexName { ty: T, name: 1 }));
    assert_eq!(dummies.len(), 3);
}

#[test]
fn sum_rule_replaces_a_subset() {
    let (a, b, c) = (Expr::var("a"), Expr::var("b"), Expr::var("c"));
    let result = rewrite_once(
        a.clone() + b.clone(),
        Expr::var("s"),
        &(a.clone() + b.clone() + c.clone()),
    );
    assert_eq!(result, Expr::var("s") + c);

    // no overlap, no match
    let target = Expr::var("c") + Expr::var("d");
    let result = rewrite_once(a + b, Expr::var("s"), &target);
    assert_eq!(result, target);
}

#[test]
fn product_rule_bites_a_subgraph() {
    // A_m^n B_n^p = C_m^p on A_x^y B_y^z D_w
    let from = Expr::product(vec![
        Expr::symbol("A", vec![dn(0), up(1)]),
        Expr::symbol("B", vec![dn(1), up(2)]),
    ]);
    let to = Expr::symbol("C", vec![dn(0), up(2)]);
    let tree = Expr::product(vec![
        Expr::symbol("A", vec![dn(3), up(4)]),
        Expr::symbol("B", vec![dn(4), up(5)]),
        Expr::symbol("D", vec![dn(6)]),
    ]);
    let result = rewrite_once(from, to, &tree);
    let expected = Expr::product(vec![
        Expr::symbol("C", vec![dn(3), up(5)]),
        Expr::symbol("D", vec![dn(6)]),
    ]);
    assert_eq!(result, expected);
}

#[test]
fn odd_function_argument_sign() {
    let (a, b, c) = (Expr::var("a"), Expr::var("b"), Expr::var("c"));
    let from = Expr::fun("sin", a.clone() + -b.clone());
    let target = Expr::fun("sin", b.clone() + -a.clone());

    // sin(a-b) = c applied to sin(b-a) gives -c
    let result = rewrite_once(from.clone(), c.clone(), &target);
    assert_eq!(result, -c.clone());

    // and applied to sin(b-a)^2 gives c^2: the sign is absorbed by the even power
    let squared = Expr::pow(Expr::fun("sin", b + -a), Expr::num(2));
    let result = rewrite_once(from, c.clone(), &squared);
    assert_eq!(result, Expr::pow(c, Expr::num(2)));
}

#[test]
fn antisymmetric_match_carries_parity() {
    // F_mn = G_mn with F antisymmetric, applied to F_nm
    let from = Expr::symbol_with("F", vec![dn(0), dn(1)], Symmetry::Antisymmetric);
    let to = Expr::symbol("G", vec![dn(0), dn(1)]);
    let target = Expr::symbol_with("F", vec![dn(1), dn(0)], Symmetry::Antisymmetric);

    let result = rewrite_once(from, to, &target);
    // the positional assignment maps 0 -> 1, 1 -> 0 with even parity, so no sign appears
    assert_eq!(result, Expr::symbol("G", vec![dn(1), dn(0)]));
}

#[test]
fn one_rule_per_node_per_pass() {
    let (x, y, z) = (Expr::var("x"), Expr::var("y"), Expr::var("z"));
    let rules = RuleSet::compile_many(
        vec![(x.clone(), y.clone()), (y.clone(), z.clone())],
        false,
    )
    .unwrap();

    // only the first matching rule fires per pass; a second pass reaches the fixpoint
    let once = rules.rewrite(&x);
    assert_eq!(once, y.clone());
    assert_eq!(rules.rewrite(&once), z.clone());

    // sequential single-rule sets behave the same way
    let first = rewrite_once(x.clone(), y.clone(), &x);
    assert_eq!(rewrite_once(y, z.clone(), &first), z);
}

#[test]
fn chained_rules_in_one_pass_when_allowed() {
    let (x, y, z) = (Expr::var("x"), Expr::var("y"), Expr::var("z"));
    let rules = RuleSet::compile_many(vec![(x.clone(), y), (Expr::var("y"), z.clone())], true)
        .unwrap();
    assert_eq!(rules.rewrite(&x), z);
}

#[test]
fn field_arguments_match_in_order() {
    let (x, y) = (Expr::var("x"), Expr::var("y"));
    let (a, b) = (Expr::var("a"), Expr::var("b"));

    // f[x, y] = x + 2y applied to f[b, a] substitutes by position
    let from = Expr::field("f", vec![], vec![x.clone(), y.clone()]);
    let to = x + Expr::num(2) * y;
    let target = Expr::field("f", vec![], vec![b.clone(), a.clone()]);

    let result = rewrite_once(from, to, &target);
    assert_eq!(result, b + Expr::num(2) * a);
}

#[test]
fn indexed_field_head_is_remapped() {
    // h_m[x] = x v_m applied to h_p[w]
    let (x, w) = (Expr::var("x"), Expr::var("w"));
    let from = Expr::field("h", vec![dn(0)], vec![x.clone()]);
    let to = Expr::product(vec![x, Expr::symbol("v", vec![dn(0)])]);
    let target = Expr::field("h", vec![dn(8)], vec![w.clone()]);

    let result = rewrite_once(from, to, &target);
    assert_eq!(result, Expr::product(vec![w, Expr::symbol("v", vec![dn(8)])]));
}

#[test]
fn zero_replacement_collapses_the_enclosing_product() {
    let from = Expr::symbol("A", vec![dn(0)]);
    let tree = Expr::product(vec![
        Expr::symbol("A", vec![dn(3)]),
        Expr::symbol("B", vec![up(3)]),
    ]) + Expr::var("k");
    let result = rewrite_once(from, Expr::num(0), &tree);
    assert_eq!(result, Expr::var("k"));
}

#[test]
fn compile_rejects_mismatched_free_indices() {
    let from = Expr::symbol("A", vec![dn(0)]);
    let to = Expr::symbol("B", vec![dn(2)]);
    assert!(matches!(compile(from, to), Err(RuleError::FreeIndexMismatch { .. })));
}

#[test]
fn repeated_passes_reach_a_fixpoint_under_a_cap() {
    let from = Expr::fun("sin", Expr::var("x"));
    let to = Expr::var("x");
    let rules = RuleSet::new(vec![compile(from, to).unwrap()], false);

    let mut tree = Expr::fun("sin", Expr::fun("sin", Expr::fun("sin", Expr::var("x"))));
    for _ in 0..10 {
        let next = rules.rewrite(&tree);
        if next == tree {
            break;
        }
        tree = next;
    }
    assert_eq!(tree, Expr::var("x"));
}

#[test]
fn even_power_pattern_absorbs_the_argument_sign() {
    // sin(a-b)^2 = c applied to sin(b-a)^2: the match acquires a sign in the base, but the
    // even power means the matched value is identical, so the result is c, not -c
    let (a, b, c) = (Expr::var("a"), Expr::var("b"), Expr::var("c"));
    let from = Expr::pow(Expr::fun("sin", a.clone() + -b.clone()), Expr::num(2));
    let target = Expr::pow(Expr::fun("sin", b.clone() + -a.clone()), Expr::num(2));
    assert_eq!(rewrite_once(from, c.clone(), &target), c.clone());

    // an odd power keeps it
    let from = Expr::pow(Expr::fun("sin", a.clone() + -b.clone()), Expr::num(3));
    let target = Expr::pow(Expr::fun("sin", b + -a), Expr::num(3));
    assert_eq!(rewrite_once(from, c.clone(), &target), -c);
}

#[test]
fn function_boundaries_isolate_freed_dummies() {
    // name 0 is contracted both at the top level and inside f's argument; a rewrite inside
    // the argument frees its own 0, which must not lift the protection on the outer one
    let tree = Expr::product(vec![
        Expr::symbol("A", vec![dn(0)]),
        Expr::symbol("B", vec![up(0)]),
        Expr::symbol("X", vec![dn(2)]),
        Expr::symbol("W", vec![dn(3)]),
        Expr::fun(
            "f",
            Expr::product(vec![Expr::symbol("C", vec![dn(0)]), Expr::symbol("D", vec![up(0)])]),
        ),
    ]);

    // C_a D^a = E_b F^b G_c H^c, firing inside the argument
    let inner = compile(
        Expr::product(vec![Expr::symbol("C", vec![dn(20)]), Expr::symbol("D", vec![up(20)])]),
        Expr::product(vec![
            Expr::symbol("E", vec![dn(21)]),
            Expr::symbol("F", vec![up(21)]),
            Expr::symbol("G", vec![dn(22)]),
            Expr::symbol("H", vec![up(22)]),
        ]),
    )
    .unwrap();
    // X_m W_n = V_mn^a_a, firing at the top level afterwards; its fresh trace name must not
    // reuse 0 while A_m B^m still contracts over it
    let outer = compile(
        Expr::product(vec![Expr::symbol("X", vec![dn(10)]), Expr::symbol("W", vec![dn(11)])]),
        Expr::symbol("V", vec![dn(10), dn(11), up(12), dn(12)]),
    )
    .unwrap();

    let result = RuleSet::new(vec![inner, outer], false).rewrite(&tree);
    assert_eq!(free_set(&result), free_set(&tree));
    // only A_m B^m carry name 0 afterwards
    assert_eq!(occurrences(&result, IndexName { ty: T, name: 0 }), 2);
}

#[test]
fn sum_rule_keeps_remainder_dummies_protected() {
    // two summands contract over the same name 0; the rule consumes only one of them, so 0
    // is not freed and a later replacement at the enclosing product must avoid it
    let e = Expr::var("e");
    let tree = Expr::product(vec![
        Expr::symbol("M", vec![dn(8)]),
        Expr::symbol("N", vec![dn(9)]),
        Expr::sum(vec![
            Expr::product(vec![Expr::symbol("A", vec![dn(0)]), Expr::symbol("B", vec![up(0)])]),
            Expr::product(vec![Expr::symbol("C", vec![dn(0)]), Expr::symbol("D", vec![up(0)])]),
            e.clone(),
        ]),
    ]);

    // (A_k B^k) + e = F_b G^b H_c K^c, matching the first summand and e
    let sum_rule = compile(
        Expr::sum(vec![
            Expr::product(vec![Expr::symbol("A", vec![dn(5)]), Expr::symbol("B", vec![up(5)])]),
            e,
        ]),
        Expr::product(vec![
            Expr::symbol("F", vec![dn(6)]),
            Expr::symbol("G", vec![up(6)]),
            Expr::symbol("H", vec![dn(7)]),
            Expr::symbol("K", vec![up(7)]),
        ]),
    )
    .unwrap();
    // M_m N_n = V_mn^a_a, firing at the product after the sum has been rewritten
    let product_rule = compile(
        Expr::product(vec![Expr::symbol("M", vec![dn(30)]), Expr::symbol("N", vec![dn(31)])]),
        Expr::symbol("V", vec![dn(30), dn(31), up(32), dn(32)]),
    )
    .unwrap();

    let result = RuleSet::new(vec![sum_rule, product_rule], false).rewrite(&tree);
    assert_eq!(free_set(&result), free_set(&tree));
    // only the surviving C_k D^k summand carries name 0
    assert_eq!(occurrences(&result, IndexName { ty: T, name: 0 }), 2);
}

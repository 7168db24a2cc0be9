use super::Expr;

/// An iterator that iteratively traverses the tree of expressions in left-to-right post-order
/// (i.e. depth-first).
///
/// This iterator is created by [`Expr::post_order_iter`].
pub struct ExprIter<'a> {
    stack: Vec<&'a Expr>,
    last_visited: Option<&'a Expr>,
}

/// The ordered children of a node, leftmost first.
fn children(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Num(_) | Expr::Symbol(_) => Vec::new(),
        Expr::Sum(terms) => terms.iter().collect(),
        Expr::Product(p) => p.children().collect(),
        Expr::Pow(base, exp) => vec![base, exp],
        Expr::Fun(_, arg) => vec![arg],
        Expr::Field(field) => field.args.iter().collect(),
    }
}

impl<'a> ExprIter<'a> {
    /// Creates a new iterator that traverses the tree of expressions in left-to-right post-order
    /// (i.e. depth-first).
    pub fn new(expr: &'a Expr) -> Self {
        Self {
            stack: vec![expr],
            last_visited: None,
        }
    }

    /// Pops the current expression in the stack and marks it as the last visited expression.
    fn visit(&mut self) -> Option<&'a Expr> {
        self.last_visited = Some(self.stack.pop()?);
        self.last_visited
    }

    /// Returns true if the given expression matches the last visited expression.
    fn is_last_visited(&self, expr: &'a Expr) -> bool {
        match self.last_visited {
            Some(last_visited) => std::ptr::eq(last_visited, expr),
            None => false,
        }
    }
}

impl<'a> Iterator for ExprIter<'a> {
    type Item = &'a Expr;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let expr = self.stack.last()?;
            let kids = children(expr);
            match kids.last() {
                None => return self.visit(),
                Some(last) if self.is_last_visited(last) => return self.visit(),
                Some(_) => {
                    for child in kids.into_iter().rev() {
                        self.stack.push(child);
                    }
                }
            }
        }
    }
}

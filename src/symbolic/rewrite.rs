//! Bottom-up rebuilding of expression DAGs, shared by substitution and simplification.

use super::expr::{Expr, LinearSystem, Node};
use super::simplify::{collect_product, collect_sum};
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;

/// Rebuilds an expression through the smart constructors. `replace` may short-circuit a node;
/// `collect` switches sums and products to like-term collection.
pub(crate) struct Rewriter<F>
where
    F: FnMut(&Expr) -> Option<Expr>,
{
    replace: F,
    collect: bool,
    cache: HashMap<usize, Expr>,
    systems: HashMap<usize, Arc<LinearSystem>>,
}

impl<F> Rewriter<F>
where
    F: FnMut(&Expr) -> Option<Expr>,
{
    pub(crate) fn new(replace: F, collect: bool) -> Self {
        Rewriter {
            replace,
            collect,
            cache: HashMap::new(),
            systems: HashMap::new(),
        }
    }

    pub(crate) fn rewrite(&mut self, expr: &Expr) -> Expr {
        if let Some(done) = self.cache.get(&expr.address()) {
            return done.clone();
        }
        let result = match (self.replace)(expr) {
            Some(replacement) => replacement,
            None => self.rebuild(expr),
        };
        self.cache.insert(expr.address(), result.clone());
        result
    }

    fn rebuild(&mut self, expr: &Expr) -> Expr {
        match expr.node() {
            Node::Number(_) | Node::Symbol(_) => expr.clone(),
            Node::Sum(terms) => {
                let terms = terms.iter().map(|t| self.rewrite(t)).collect_vec();
                if self.collect {
                    collect_sum(terms)
                } else {
                    Expr::sum(terms)
                }
            }
            Node::Product(factors) => {
                let factors = factors.iter().map(|f| self.rewrite(f)).collect_vec();
                if self.collect {
                    collect_product(factors)
                } else {
                    Expr::product(factors)
                }
            }
            Node::Power(base, exponent) => self.rewrite(base).powf(exponent.0),
            Node::Apply(function, argument) => self.rewrite(argument).apply(*function),
            Node::Atan2(y, x) => {
                let y = self.rewrite(y);
                let x = self.rewrite(x);
                Expr::atan2(&y, &x)
            }
            Node::Solve(system, row, col) => {
                let system = self.rewrite_system(system);
                Expr::solve_entry(system, *row, *col)
            }
        }
    }

    fn rewrite_system(&mut self, system: &Arc<LinearSystem>) -> Arc<LinearSystem> {
        let key = Arc::as_ptr(system) as usize;
        if let Some(done) = self.systems.get(&key) {
            return done.clone();
        }
        let matrix = system.matrix.map(|e| self.rewrite(e));
        let rhs = system.rhs.map(|e| self.rewrite(e));
        let result = Arc::new(LinearSystem { matrix, rhs });
        self.systems.insert(key, result.clone());
        result
    }
}

impl Expr {
    /// Replaces symbols by expressions
    pub fn substitute(&self, map: &HashMap<super::Symbol, Expr>) -> Expr {
        if map.is_empty() {
            return self.clone();
        }
        Rewriter::new(|e: &Expr| e.as_symbol().and_then(|s| map.get(s).cloned()), false).rewrite(self)
    }

    /// Constant folding plus collection of like terms (`x + 2x → 3x`) and powers (`x·x → x²`)
    pub fn simplify(&self) -> Expr {
        Rewriter::new(|_: &Expr| None, true).rewrite(self)
    }
}

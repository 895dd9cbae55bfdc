//! Symbolic differentiation.

use super::expr::{Expr, Function, LinearSystem, Node, Symbol};
use itertools::Itertools;
use ndarray::Array2;
use num_traits::Zero;
use std::collections::HashMap;
use std::sync::Arc;

/// Differentiates with respect to one symbol, memoizing shared nodes
pub(crate) struct Differentiator<'s> {
    var: &'s Symbol,
    cache: HashMap<usize, Expr>,
    contains: HashMap<usize, bool>,
    systems: HashMap<usize, Arc<LinearSystem>>,
}

impl<'s> Differentiator<'s> {
    pub(crate) fn new(var: &'s Symbol) -> Self {
        Differentiator {
            var,
            cache: HashMap::new(),
            contains: HashMap::new(),
            systems: HashMap::new(),
        }
    }

    fn contains(&mut self, expr: &Expr) -> bool {
        if let Some(&known) = self.contains.get(&expr.address()) {
            return known;
        }
        let found = match expr.node() {
            Node::Number(_) => false,
            Node::Symbol(symbol) => symbol == self.var,
            _ => {
                let mut found = false;
                expr.for_each_operand(|operand| {
                    if !found {
                        found = self.contains(operand);
                    }
                });
                found
            }
        };
        self.contains.insert(expr.address(), found);
        found
    }

    pub(crate) fn diff(&mut self, expr: &Expr) -> Expr {
        if !self.contains(expr) {
            return Expr::zero();
        }
        if let Some(done) = self.cache.get(&expr.address()) {
            return done.clone();
        }
        let result = match expr.node() {
            Node::Number(_) => Expr::zero(),
            Node::Symbol(_) => Expr::number(1.0),
            Node::Sum(terms) => Expr::sum(terms.iter().map(|t| self.diff(t)).collect_vec()),
            Node::Product(factors) => {
                let mut terms = Vec::new();
                for (i, factor) in factors.iter().enumerate() {
                    let derivative = self.diff(factor);
                    if derivative.is_zero() {
                        continue;
                    }
                    terms.push(Expr::product(factors.iter().enumerate().map(|(j, other)| {
                        if i == j {
                            derivative.clone()
                        } else {
                            other.clone()
                        }
                    })));
                }
                Expr::sum(terms)
            }
            Node::Power(base, exponent) => {
                let inner = self.diff(base);
                Expr::product([Expr::number(exponent.0), base.powf(exponent.0 - 1.0), inner])
            }
            Node::Apply(function, argument) => {
                let inner = self.diff(argument);
                outer_derivative(*function, argument) * inner
            }
            Node::Atan2(y, x) => {
                let dy = self.diff(y);
                let dx = self.diff(x);
                (x * dy - y * dx) / (x * x + y * y)
            }
            Node::Solve(system, row, col) => {
                let system = self.diff_system(system);
                Expr::solve_entry(system, *row, *col)
            }
        };
        self.cache.insert(expr.address(), result.clone());
        result
    }

    /// `d(A⁻¹B) = A⁻¹(dB − dA·A⁻¹B)`, so the derivative solves the same matrix for a new right-hand side
    fn diff_system(&mut self, system: &Arc<LinearSystem>) -> Arc<LinearSystem> {
        let key = Arc::as_ptr(system) as usize;
        if let Some(done) = self.systems.get(&key) {
            return done.clone();
        }
        let (n, k) = system.rhs.dim();
        let solution = Array2::from_shape_fn((n, k), |(r, c)| Expr::solve_entry(system.clone(), r, c));
        let d_matrix = system.matrix.map(|e| self.diff(e));
        let d_rhs = system.rhs.map(|e| self.diff(e));
        let rhs = Array2::from_shape_fn((n, k), |(r, c)| {
            let correction = Expr::sum((0..n).map(|m| &d_matrix[[r, m]] * &solution[[m, c]]));
            &d_rhs[[r, c]] - correction
        });
        let result = Arc::new(LinearSystem {
            matrix: system.matrix.clone(),
            rhs,
        });
        self.systems.insert(key, result.clone());
        result
    }
}

fn outer_derivative(function: Function, x: &Expr) -> Expr {
    match function {
        Function::Sin => x.cos(),
        Function::Cos => -x.sin(),
        Function::Tan => 1.0 + x.tan().powi(2),
        Function::Asin => (1.0 - x * x).sqrt().recip(),
        Function::Acos => -(1.0 - x * x).sqrt().recip(),
        Function::Atan => (1.0 + x * x).recip(),
        Function::Sqrt => 0.5 * x.sqrt().recip(),
        Function::Abs => x.sign(),
        Function::Sign => Expr::zero(),
        Function::Exp => x.exp(),
        Function::Ln => x.recip(),
    }
}

impl Expr {
    /// Partial derivative with respect to `var`
    pub fn diff(&self, var: &Symbol) -> Expr {
        Differentiator::new(var).diff(self)
    }

    /// Total time derivative, given the rate of every time-dependent symbol
    pub fn time_derivative(&self, rates: &HashMap<Symbol, Expr>) -> Expr {
        let symbols = self.symbols();
        Expr::sum(
            symbols
                .iter()
                .filter_map(|s| rates.get(s).map(|rate| self.diff(s) * rate))
                .collect_vec(),
        )
    }
}

//! Numeric evaluation of expressions.
//!
//! Evaluation is where degeneracy becomes visible: a non-finite intermediate, a singular linear
//! system or an implicit equation that does not converge all fail with
//! [MarionetteError::NumericDegeneracy].

use super::expr::{Expr, LinearSystem, Node, Symbol};
use super::matrix::{jacobian, SymMatrix};
use crate::MarionetteError;
use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use std::collections::HashMap;
use tracing::trace;

/// Numeric values of symbols
#[derive(Debug, Clone, Default)]
pub struct Environment {
    values: HashMap<Symbol, f64>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a scalar symbol
    pub fn set(&mut self, name: &str, value: f64) -> &mut Self {
        self.values.insert(Symbol::new(name), value);
        self
    }

    pub fn set_symbol(&mut self, symbol: Symbol, value: f64) -> &mut Self {
        self.values.insert(symbol, value);
        self
    }

    /// Sets the entries `name[i]` of a vector variable
    pub fn set_vector(&mut self, name: &str, values: &[f64]) -> &mut Self {
        for (i, &value) in values.iter().enumerate() {
            self.values.insert(Symbol::entry(name, i), value);
        }
        self
    }

    /// Sets the cells `name[i,j]` of a matrix variable
    pub fn set_matrix(&mut self, name: &str, values: &Array2<f64>) -> &mut Self {
        for ((i, j), &value) in values.indexed_iter() {
            self.values.insert(Symbol::cell(name, i, j), value);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(&Symbol::new(name)).copied()
    }

    pub fn get_symbol(&self, symbol: &Symbol) -> Option<f64> {
        self.values.get(symbol).copied()
    }

    pub fn vector(&self, name: &str, len: usize) -> Option<Vec<f64>> {
        (0..len).map(|i| self.get_symbol(&Symbol::entry(name, i))).collect()
    }

    pub fn matrix(&self, name: &str, rows: usize, cols: usize) -> Option<Array2<f64>> {
        let values = (0..rows)
            .cartesian_product(0..cols)
            .map(|(i, j)| self.get_symbol(&Symbol::cell(name, i, j)))
            .collect::<Option<Vec<_>>>()?;
        Array2::from_shape_vec((rows, cols), values).ok()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.values.contains_key(symbol)
    }
}

/// Memoizing evaluator for one environment
struct Evaluator<'e> {
    env: &'e Environment,
    cache: HashMap<usize, f64>,
    solutions: HashMap<usize, DMatrix<f64>>,
}

impl<'e> Evaluator<'e> {
    fn new(env: &'e Environment) -> Self {
        Evaluator {
            env,
            cache: HashMap::new(),
            solutions: HashMap::new(),
        }
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<f64, MarionetteError> {
        if let Some(&value) = self.cache.get(&expr.address()) {
            return Ok(value);
        }
        let value = match expr.node() {
            Node::Number(value) => value.0,
            Node::Symbol(symbol) => self
                .env
                .get_symbol(symbol)
                .ok_or_else(|| MarionetteError::Authoring(format!("no value for symbol {}", symbol)))?,
            Node::Sum(terms) => {
                let mut total = 0.0;
                for term in terms {
                    total += self.evaluate(term)?;
                }
                total
            }
            Node::Product(factors) => {
                let mut total = 1.0;
                for factor in factors {
                    total *= self.evaluate(factor)?;
                }
                total
            }
            Node::Power(base, exponent) => {
                let base = self.evaluate(base)?;
                if exponent.0.fract() == 0.0 && exponent.0.abs() < i32::MAX as f64 {
                    base.powi(exponent.0 as i32)
                } else {
                    base.powf(exponent.0)
                }
            }
            Node::Apply(function, argument) => function.apply(self.evaluate(argument)?),
            Node::Atan2(y, x) => {
                let y = self.evaluate(y)?;
                let x = self.evaluate(x)?;
                y.atan2(x)
            }
            Node::Solve(system, row, col) => {
                let solution = self.solve(system)?;
                solution[(*row, *col)]
            }
        };
        if !value.is_finite() {
            return Err(MarionetteError::NumericDegeneracy(format!("{} evaluates to {}", expr, value)));
        }
        self.cache.insert(expr.address(), value);
        Ok(value)
    }

    fn solve(&mut self, system: &std::sync::Arc<LinearSystem>) -> Result<&DMatrix<f64>, MarionetteError> {
        let key = std::sync::Arc::as_ptr(system) as usize;
        if !self.solutions.contains_key(&key) {
            let a = self.numeric(&system.matrix)?;
            let b = self.numeric(&system.rhs)?;
            let solution = solve_dense(a, &b)?;
            self.solutions.insert(key, solution);
        }
        self.solutions
            .get(&key)
            .ok_or_else(|| MarionetteError::NumericDegeneracy("linear system vanished from cache".to_string()))
    }

    fn numeric(&mut self, m: &SymMatrix) -> Result<DMatrix<f64>, MarionetteError> {
        let (rows, cols) = m.dim();
        let mut result = DMatrix::zeros(rows, cols);
        for ((i, j), e) in m.indexed_iter() {
            result[(i, j)] = self.evaluate(e)?;
        }
        Ok(result)
    }
}

/// LU solve that treats a vanishing pivot as degeneracy
fn solve_dense(a: DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>, MarionetteError> {
    let scale = a.amax().max(1.0);
    let lu = a.lu();
    let pivot = lu.u().diagonal().amin();
    if pivot <= 1e-12 * scale {
        return Err(MarionetteError::NumericDegeneracy(format!(
            "singular linear system (smallest pivot {:e})",
            pivot
        )));
    }
    lu.solve(b)
        .ok_or_else(|| MarionetteError::NumericDegeneracy("singular linear system".to_string()))
}

impl Expr {
    pub fn evaluate(&self, env: &Environment) -> Result<f64, MarionetteError> {
        Evaluator::new(env).evaluate(self)
    }
}

/// Evaluates every entry of a shaped value, sharing common nodes
pub fn evaluate_matrix(m: &SymMatrix, env: &Environment) -> Result<Array2<f64>, MarionetteError> {
    let mut evaluator = Evaluator::new(env);
    let values = m.iter().map(|e| evaluator.evaluate(e)).collect::<Result<Vec<_>, _>>()?;
    Array2::from_shape_vec(m.dim(), values).map_err(|e| MarionetteError::Authoring(e.to_string()))
}

/// Newton iteration for `residual(unknowns) = 0`, starting from the values already in `env`.
/// On success the unknowns in `env` hold the solution.
pub fn solve_implicit(
    residual: &SymMatrix,
    unknowns: &[Symbol],
    env: &mut Environment,
    max_iterations: usize,
    tolerance: f64,
) -> Result<(), MarionetteError> {
    if residual.len() != unknowns.len() {
        return Err(MarionetteError::shape("implicit equation", unknowns.len(), residual.len()));
    }
    let jac = jacobian(residual, unknowns);
    for iteration in 0..max_iterations {
        let r = evaluate_matrix(residual, env)?;
        let norm = r.iter().map(|v| v * v).sum::<f64>().sqrt();
        trace!(iteration, norm, "newton step");
        if norm < tolerance {
            return Ok(());
        }
        let j = evaluate_matrix(&jac, env)?;
        let j = DMatrix::from_fn(j.nrows(), j.ncols(), |r, c| j[[r, c]]);
        let rhs = DVector::from_iterator(r.len(), r.iter().map(|v| -v));
        let step = solve_dense(j, &DMatrix::from_column_slice(rhs.len(), 1, rhs.as_slice()))?;
        for (k, symbol) in unknowns.iter().enumerate() {
            let current = env.get_symbol(symbol).unwrap_or(0.0);
            env.set_symbol(symbol.clone(), current + step[(k, 0)]);
        }
    }
    let r = evaluate_matrix(residual, env)?;
    let norm = r.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm < tolerance {
        Ok(())
    } else {
        Err(MarionetteError::NumericDegeneracy(format!(
            "implicit equation did not converge (residual {:e})",
            norm
        )))
    }
}

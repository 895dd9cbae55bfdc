//! The ordered, immutable result of [Graph::build](super::Graph::build).

use super::{Equation, VarKind, Variable};
use crate::symbolic::{evaluate_matrix, solve_implicit, Environment, SymMatrix};
use crate::MarionetteError;
use std::collections::HashMap;
use tracing::trace;

/// Iterations of the Newton solve behind implicit equations
const MAX_NEWTON_ITERATIONS: usize = 50;
const NEWTON_TOLERANCE: f64 = 1e-10;

/// Equations in evaluation order together with every declared variable. This is the only
/// surface downstream emitters, visualizers and integrators consume.
#[derive(Debug, Clone)]
pub struct FinalizedGraph {
    variables: Vec<Variable>,
    initial: HashMap<String, SymMatrix>,
    equations: Vec<Equation>,
}

impl FinalizedGraph {
    pub(super) fn new(variables: Vec<Variable>, initial: HashMap<String, SymMatrix>, equations: Vec<Equation>) -> Self {
        FinalizedGraph {
            variables,
            initial,
            equations,
        }
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name() == name)
    }

    pub fn variables_by_kind(&self, kind: VarKind) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(move |v| v.kind() == kind)
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    /// The equation assigning `name`
    pub fn equation(&self, name: &str) -> Option<&Equation> {
        self.equations.iter().find(|e| e.lhs().iter().any(|v| v.name() == name))
    }

    /// Assignments of the given kind, in evaluation order
    pub fn query_by_kind(&self, kind: VarKind) -> Vec<&Equation> {
        self.equations.iter().filter(|e| e.kind() == kind).collect()
    }

    pub fn initial_value(&self, name: &str) -> Option<&SymMatrix> {
        self.initial.get(name)
    }

    /// Evaluates every equation in order. Free variables missing from `env` are seeded from
    /// their initial values; implicit equations start their Newton iteration from the values
    /// already known (initial values included) and from zero otherwise.
    pub fn evaluate(&self, env: &Environment) -> Result<Environment, MarionetteError> {
        let mut env = env.clone();
        for var in &self.variables {
            let Some(initial) = self.initial.get(var.name()) else {
                continue;
            };
            if var.symbols().iter().all(|s| env.contains(s)) {
                continue;
            }
            let values = evaluate_matrix(initial, &env)?;
            for (symbol, value) in var.symbols().into_iter().zip(values.iter()) {
                if !env.contains(&symbol) {
                    env.set_symbol(symbol, *value);
                }
            }
        }
        for equation in &self.equations {
            trace!(equation = %equation.name(), "evaluating");
            if equation.is_implicit() {
                let unknowns = equation.assigned_symbols();
                for symbol in &unknowns {
                    if !env.contains(symbol) {
                        env.set_symbol(symbol.clone(), 0.0);
                    }
                }
                solve_implicit(equation.rhs(), &unknowns, &mut env, MAX_NEWTON_ITERATIONS, NEWTON_TOLERANCE)?;
            } else {
                let values = evaluate_matrix(equation.rhs(), &env)?;
                for (symbol, value) in equation.assigned_symbols().into_iter().zip(values.iter()) {
                    env.set_symbol(symbol, *value);
                }
            }
        }
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{EquationOptions, Graph, Shape};
    use super::*;
    use crate::symbolic::matrix::{column, scalar};
    use crate::symbolic::Expr;
    use approx::assert_abs_diff_eq;

    #[test_log::test]
    fn test_evaluate_with_initial_values_and_implicit() {
        let mut graph = Graph::new();
        graph
            .declare_variable("a", Shape::Scalar, VarKind::Parameter, Some(scalar(2.0)))
            .unwrap();
        let y = graph
            .declare_variable("y", Shape::Vector(2), VarKind::Variable, Some(column([Expr::number(1.0), Expr::number(1.0)])))
            .unwrap();
        // y0² = a, y0 + y1 = 3
        let (y0, y1, a) = (y.at(0), y.at(1), Expr::symbol("a"));
        graph
            .add_equation(&y, column([&y0 * &y0 - &a, &y0 + &y1 - 3.0]), EquationOptions::default().implicit())
            .unwrap();
        graph
            .add_equation("out", scalar(&y0 * &y1), EquationOptions::kind(VarKind::Sensor))
            .unwrap();

        let finalized = graph.build(true).unwrap();
        assert!(finalized.equation("y").unwrap().is_implicit());

        let values = finalized.evaluate(&Environment::new()).unwrap();
        let root = 2f64.sqrt();
        assert_abs_diff_eq!(values.vector("y", 2).unwrap()[0], root, epsilon = 1e-9);
        assert_abs_diff_eq!(values.get("out").unwrap(), root * (3.0 - root), epsilon = 1e-9);

        // an explicit value wins over the initial value
        let mut env = Environment::new();
        env.set("a", 9.0);
        let values = finalized.evaluate(&env).unwrap();
        assert_abs_diff_eq!(values.vector("y", 2).unwrap()[0], 3.0, epsilon = 1e-9);
    }
}

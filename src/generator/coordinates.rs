//! Generalized coordinates, loop elimination and the chained loop Jacobian.

use super::GenerationContext;
use crate::canonical::ElementaryJoint;
use crate::graph::{EquationOptions, Shape, VarKind, Variable};
use crate::loops::{Closure, LoopSolution};
use crate::model::coordinate_name;
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use itertools::Itertools;
use ndarray::Axis;
use num_traits::One;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// All elementary joint coordinates of the tree and the subset kept independent.
///
/// `jacobian` and `bias` express every coordinate acceleration through the independent ones,
/// `q̈_all = J·q̈ + d`; rows of independent coordinates are unit rows with zero bias.
pub(crate) struct Coordinates {
    /// Elementary joint names, parents first
    pub names: Vec<String>,
    lookup: HashMap<String, usize>,
    /// Positions in `names` of the independent coordinates
    pub independent: Vec<usize>,
    pub jacobian: SymMatrix,
    pub bias: SymMatrix,
    pub qdd: Variable,
}

impl Coordinates {
    /// Declares the states, their derivatives and the per-joint coordinates, and closes the
    /// loops of `context` in dependency order
    pub fn declare(context: &mut GenerationContext) -> Result<Self, MarionetteError> {
        let joints = context
            .model
            .tree()
            .iter()
            .filter_map(|node| node.get().joint.clone())
            .collect_vec();
        let names = joints.iter().map(|j| j.name.clone()).collect_vec();
        let lookup: HashMap<String, usize> = names.iter().cloned().enumerate().map(|(i, n)| (n, i)).collect();
        let eliminated: HashSet<&str> = context.loops.iter().flat_map(|l| l.v.iter().map(String::as_str)).collect();
        let independent = (0..names.len())
            .filter(|&i| !eliminated.contains(names[i].as_str()))
            .collect_vec();
        if independent.is_empty() {
            return Err(MarionetteError::structural("world", "loops eliminate every coordinate"));
        }

        let n = independent.len();
        let graph = &mut context.graph;
        let initial = |f: fn(&ElementaryJoint) -> f64| matrix::numbers(&independent.iter().map(|&i| f(&joints[i])).collect_vec());
        let q = graph.declare_variable("q", Shape::Vector(n), VarKind::State, Some(initial(|j| j.q0)))?;
        let qd = graph.declare_variable("qd", Shape::Vector(n), VarKind::State, Some(initial(|j| j.qd0)))?;
        let qdd_kind = if context.config.kinematics_only {
            VarKind::Input
        } else {
            VarKind::Variable
        };
        let qdd = graph.declare_variable("qdd", Shape::Vector(n), qdd_kind, None)?;
        let derivative = EquationOptions::kind(VarKind::DerState).with_shape(Shape::Vector(n));
        graph.add_equation("der_q", qd.expr(), derivative)?;
        graph.add_equation("der_qd", qdd.expr(), derivative)?;
        for (k, &i) in independent.iter().enumerate() {
            for (order, state) in [&q, &qd, &qdd].into_iter().enumerate() {
                graph.add_equation(
                    coordinate_name(&names[i], order),
                    matrix::scalar(state.at(k)),
                    EquationOptions::default(),
                )?;
            }
        }

        let mut jacobian = matrix::zeros(names.len(), n);
        for (k, &i) in independent.iter().enumerate() {
            jacobian[[i, k]] = Expr::one();
        }
        let mut coordinates = Coordinates {
            names,
            lookup,
            independent,
            bias: matrix::zeros(jacobian.nrows(), 1),
            jacobian,
            qdd,
        };
        for solution in &context.loops {
            coordinates.eliminate(&mut context.graph, solution, &joints)?;
        }
        debug!(
            independent = coordinates.independent.len(),
            total = coordinates.len(),
            "declared coordinates"
        );
        Ok(coordinates)
    }

    /// Emits `q_v`, `qd_v` and `qdd_v` of one loop and extends the chained Jacobian
    fn eliminate(
        &mut self,
        graph: &mut crate::graph::Graph,
        solution: &LoopSolution,
        joints: &[ElementaryJoint],
    ) -> Result<(), MarionetteError> {
        let rows_u = solution.u.iter().map(|u| self.index(u)).collect::<Result<Vec<_>, _>>()?;
        let rows_v = solution.v.iter().map(|v| self.index(v)).collect::<Result<Vec<_>, _>>()?;

        match &solution.closure {
            Closure::Explicit(value) => {
                for (k, v) in solution.v.iter().enumerate() {
                    graph.add_equation(
                        coordinate_name(v, 0),
                        matrix::scalar(value[[k, 0]].clone()),
                        EquationOptions::default(),
                    )?;
                }
            }
            Closure::Implicit(residual) => {
                let unknowns = rows_v
                    .iter()
                    .map(|&i| {
                        let initial = Some(matrix::scalar(joints[i].q0));
                        graph.declare_variable(&coordinate_name(&self.names[i], 0), Shape::Scalar, VarKind::Variable, initial)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                graph.add_stacked_equation(&unknowns, residual.clone(), true)?;
            }
        }

        let symbols = |order: usize| matrix::column(solution.u.iter().map(|u| Expr::symbol(&coordinate_name(u, order))));
        let qd_v = matrix::matmul(&solution.bvu, &symbols(1))?;
        let qdd_v = &matrix::matmul(&solution.bvu, &symbols(2))? + &solution.b_prime;
        for (k, v) in solution.v.iter().enumerate() {
            graph.add_equation(coordinate_name(v, 1), matrix::scalar(qd_v[[k, 0]].clone()), EquationOptions::default())?;
            graph.add_equation(coordinate_name(v, 2), matrix::scalar(qdd_v[[k, 0]].clone()), EquationOptions::default())?;
        }

        let jacobian_v = matrix::matmul(&solution.bvu, &self.jacobian.select(Axis(0), &rows_u))?;
        let bias_v = &matrix::matmul(&solution.bvu, &self.bias.select(Axis(0), &rows_u))? + &solution.b_prime;
        for (k, &row) in rows_v.iter().enumerate() {
            self.jacobian.row_mut(row).assign(&jacobian_v.row(k));
            self.bias[[row, 0]] = bias_v[[k, 0]].clone();
        }
        Ok(())
    }

    /// Number of coordinates, eliminated ones included
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn index(&self, name: &str) -> Result<usize, MarionetteError> {
        self.lookup
            .get(name)
            .copied()
            .ok_or_else(|| MarionetteError::structural(name, "not a coordinate of the joint tree"))
    }

    pub fn has_loops(&self) -> bool {
        self.independent.len() != self.names.len()
    }

    /// `qd_<joint>` of every coordinate
    pub fn rates(&self) -> Vec<Expr> {
        self.names.iter().map(|n| Expr::symbol(&coordinate_name(n, 1))).collect()
    }

    /// `qdd_<joint>` of every coordinate
    pub fn accelerations(&self) -> Vec<Expr> {
        self.names.iter().map(|n| Expr::symbol(&coordinate_name(n, 2))).collect()
    }

    /// Coordinate accelerations for `q̈ = 0`, that is the bias `d`
    pub fn drift(&self) -> Vec<Expr> {
        matrix::entries(&self.bias)
    }

    /// `Jᵀ·full` for generalized forces
    pub fn reduce(&self, full: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
        if !self.has_loops() {
            return Ok(full.clone());
        }
        matrix::matmul(&matrix::transpose(&self.jacobian), full)
    }

    /// `rows·J` for Jacobians taken with respect to every coordinate
    pub fn project(&self, rows: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
        if !self.has_loops() {
            return Ok(rows.clone());
        }
        matrix::matmul(rows, &self.jacobian)
    }

    /// `Jᵀ·M·J`
    pub fn reduce_mass(&self, mass: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
        self.reduce(&self.project(mass)?)
    }
}

//! Articulated-body recursion.
//!
//! The tree is solved with every coordinate free, `q̈₀ = M⁻¹·(τ − h)`, in one inward and one
//! outward pass without forming `M`. Loop closures and constraints then enter as rows
//! `C·q̈_all = b` with multipliers `λ`: the same recursion applied to the columns of `Cᵀ`, with
//! velocities and gravity left out, gives `K = M⁻¹·Cᵀ` and
//!
//! ```text
//! (C·K)·λ = b − C·q̈₀,    q̈_all = q̈₀ + K·λ
//! ```

use super::constraints::ConstraintRows;
use super::coordinates::Coordinates;
use super::kinematics::Kinematics;
use super::loads::AppliedLoads;
use super::recursive::SpatialBodies;
use super::{spatial, GenerationContext};
use crate::graph::{EquationOptions, Shape, VarKind};
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use itertools::Itertools;
use num_traits::{One, Zero};
use tracing::{debug, instrument};

/// Articulated inertia projected on one joint
#[derive(Debug, Clone)]
struct Projection {
    coordinate: usize,
    /// `U = Iᴬ·s`
    u: SymMatrix,
    /// `D = sᵀ·Iᴬ·s`, bound as `rho_<joint>`
    d: Expr,
}

/// Joint projections of the inward pass, reused for the constraint columns
struct Articulated<'b> {
    kinematics: &'b Kinematics,
    bodies: &'b SpatialBodies,
    projections: Vec<Option<Projection>>,
}

impl Articulated<'_> {
    /// Coordinate accelerations for generalized forces `tau` on a tree at rest without gravity
    fn respond(&self, tau: &[Expr], n: usize) -> Result<Vec<Expr>, MarionetteError> {
        let count = self.kinematics.bodies.len();
        let mut bias = vec![matrix::zeros(6, 1); count];
        let mut u = vec![Expr::zero(); count];
        for i in (0..count).rev() {
            let (Some(p), Some(projection)) = (self.kinematics.bodies[i].parent, &self.projections[i]) else {
                continue;
            };
            u[i] = &tau[projection.coordinate] - &matrix::dot(&self.bodies.axes[i], &bias[i])?;
            let scale = &u[i] / &projection.d;
            let propagated = &bias[i] + &projection.u.mapv(|e| e * &scale);
            bias[p] = &bias[p] + &propagated;
        }
        let mut qdd = vec![Expr::zero(); n];
        let mut accelerations = vec![matrix::zeros(6, 1); count];
        for i in 0..count {
            let (Some(p), Some(projection)) = (self.kinematics.bodies[i].parent, &self.projections[i]) else {
                continue;
            };
            let value = (&u[i] - &matrix::dot(&projection.u, &accelerations[p])?) / &projection.d;
            accelerations[i] = &accelerations[p] + &self.bodies.axes[i].mapv(|e| e * &value);
            qdd[projection.coordinate] = value;
        }
        Ok(qdd)
    }
}

#[instrument(skip_all)]
pub(super) fn generate(
    context: &mut GenerationContext,
    coordinates: &Coordinates,
    kinematics: &Kinematics,
    loads: &AppliedLoads,
    constraints: &ConstraintRows,
) -> Result<(), MarionetteError> {
    let n = coordinates.len();
    let count = kinematics.bodies.len();
    let bodies = SpatialBodies::new(context, coordinates, kinematics, loads)?;

    // bias forces of the isolated bodies
    let mut articulated = bodies.inertias.clone();
    let mut bias = Vec::with_capacity(count);
    for i in 0..count {
        let momentum = matrix::matmul(&bodies.inertias[i], &bodies.velocities[i])?;
        let gyroscopic = matrix::matmul(&spatial::cross_force(&bodies.velocities[i])?, &momentum)?;
        bias.push(&gyroscopic - &bodies.external[i]);
    }

    // inward pass
    let mut projections: Vec<Option<Projection>> = vec![None; count];
    let mut residual = vec![Expr::zero(); count];
    for i in (0..count).rev() {
        let body = &kinematics.bodies[i];
        let (Some(p), Some(k), Some(joint)) = (body.parent, body.coordinate, &body.joint) else {
            continue;
        };
        let inertia = context.bind(&format!("IA_{}", body.name), articulated[i].clone())?;
        let pa = context.bind(&format!("pA_{}", body.name), bias[i].clone())?;
        let axis = &bodies.axes[i];

        let u = context.bind(&format!("U_{}", joint), matrix::matmul(&inertia, axis)?)?;
        let d = context.tidy(matrix::scalar(matrix::dot(axis, &u)?))[[0, 0]].clone();
        if d.is_zero() {
            return Err(MarionetteError::NumericDegeneracy(format!(
                "articulated inertia about joint {} is identically zero",
                joint
            )));
        }
        let d = context.graph.bind_scalar(&format!("rho_{}", joint), d)?;
        let torque = &loads.generalized[[k, 0]] - &matrix::dot(axis, &pa)?;
        residual[i] = context.graph.bind_scalar(&format!("u_{}", joint), torque)?;

        let ut = matrix::transpose(&u);
        let reduced = &inertia - &matrix::matmul(&u, &ut)?.mapv(|e| e / &d);
        let scale = &residual[i] / &d;
        let propagated = &(&pa + &matrix::matmul(&reduced, &bodies.coriolis[i])?) + &u.mapv(|e| e * &scale);
        articulated[p] = &articulated[p] + &reduced;
        bias[p] = &bias[p] + &propagated;
        projections[i] = Some(Projection { coordinate: k, u, d });
    }

    // outward pass
    let mut tree = vec![Expr::zero(); n];
    let mut accelerations = vec![SpatialBodies::base_acceleration(context)?; count];
    for (i, body) in kinematics.bodies.iter().enumerate() {
        let (Some(p), Some(projection)) = (body.parent, &projections[i]) else {
            continue;
        };
        let shifted = &accelerations[p] + &bodies.coriolis[i];
        let value = (&residual[i] - &matrix::dot(&projection.u, &shifted)?) / &projection.d;
        let value = context.tidy(matrix::scalar(value))[[0, 0]].clone();
        let acceleration = &shifted + &bodies.axes[i].mapv(|e| e * &value);
        accelerations[i] = context.bind(&format!("A_{}", body.name), acceleration)?;
        tree[projection.coordinate] = value;
    }
    let tree = context.bind("qdd_tree", matrix::column(tree))?;
    debug!(coordinates = n, "articulated-body recursion");

    // closure rows, loops first
    let mut rows = vec![];
    let mut targets = vec![];
    for solution in &context.loops {
        for (r, v) in solution.v.iter().enumerate() {
            let mut row = vec![Expr::zero(); n];
            row[coordinates.index(v)?] = Expr::one();
            for (c, u) in solution.u.iter().enumerate() {
                let k = coordinates.index(u)?;
                row[k] = &row[k] - &solution.bvu[[r, c]];
            }
            rows.push(row);
            targets.push(solution.b_prime[[r, 0]].clone());
        }
    }
    let loop_rows = rows.len();
    if !constraints.is_empty() {
        let rest = kinematics.accelerations(context, &vec![Expr::zero(); n], "rest_")?;
        let bias = constraints.relative_acceleration(kinematics, &rest)?;
        for (r, row) in constraints.jacobian().rows().into_iter().enumerate() {
            rows.push(row.to_vec());
            targets.push(-&bias[[r, 0]]);
        }
    }

    let independent = |all: &SymMatrix| matrix::column(coordinates.independent.iter().map(|&k| all[[k, 0]].clone()));
    if rows.is_empty() {
        context
            .graph
            .add_equation(&coordinates.qdd, independent(&tree), EquationOptions::default())?;
        return Ok(());
    }

    let closure = matrix::from_rows(rows)?;
    let closure = context.bind("C", closure)?;
    let response = Articulated {
        kinematics,
        bodies: &bodies,
        projections,
    };
    let columns = (0..closure.nrows())
        .map(|r| response.respond(&closure.row(r).to_vec(), n).map(matrix::column))
        .collect::<Result<Vec<_>, _>>()?;
    let gain = context.bind("K", matrix::hstack(&columns)?)?;

    let coupling = matrix::matmul(&closure, &gain)?;
    let rhs = &matrix::column(targets) - &matrix::matmul(&closure, &tree)?;
    let mut lhs = vec![];
    if loop_rows > 0 {
        lhs.push(context.graph.declare_variable(
            "lambda_loops",
            Shape::Vector(loop_rows),
            VarKind::Multiplier,
            None,
        )?);
    }
    lhs.extend(constraints.multipliers().iter().cloned());
    context
        .graph
        .add_stacked_equation(&lhs, matrix::solve(&coupling, &rhs)?, false)?;

    let multipliers = matrix::column(lhs.iter().flat_map(|v| matrix::entries(&v.expr())).collect_vec());
    let all = &tree + &matrix::matmul(&gain, &multipliers)?;
    context
        .graph
        .add_equation(&coordinates.qdd, independent(&all), EquationOptions::default())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::GenerationConfig;
    use crate::generator::tests::{accelerations, double_pendulum};
    use crate::generator::GeneratorKind;
    use crate::model::Dof;
    use crate::symbolic::matrix;
    use crate::MarionetteError;
    use approx::assert_abs_diff_eq;

    #[test_log::test]
    fn test_massless_branch_is_degenerate() {
        let (mut system, ..) = double_pendulum();
        let pivot = system.origin(system.world()).unwrap();
        let slider = system
            .add_body("slider", 0.0, matrix::zeros(3, 1), matrix::zeros(3, 3))
            .unwrap();
        system.add_joint("rail", pivot, slider, &[Dof::Tx]).unwrap();
        let err = system
            .generate(GeneratorKind::OrderN, &GenerationConfig::default())
            .unwrap_err();
        assert!(matches!(err, MarionetteError::NumericDegeneracy(_)));
    }

    #[test_log::test]
    fn test_unsimplified_recursion_matches() {
        let (system, ..) = double_pendulum();
        let reference = accelerations(&system, GeneratorKind::OrderN);
        let config = GenerationConfig::default().with_simplify(false);
        let graph = system.generate(GeneratorKind::OrderN, &config).unwrap();
        let env = graph.evaluate(&Default::default()).unwrap();
        for (a, b) in env.vector("qdd", 3).unwrap().iter().zip(reference.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }
}

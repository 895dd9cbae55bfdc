//! Mass matrix by Jacobian projection.
//!
//! With the partial velocities `Jt` of every center of gravity and `Jr` of every body
//! rotation,
//!
//! ```text
//! M = Σ Jtᵀ·m·Jt + Jrᵀ·I·Jr
//! h = Σ Jtᵀ·m·(a₀ − g) + Jrᵀ·(I·α₀ + ω × I·ω)
//! ```
//!
//! where `a₀` and `α₀` are the accelerations for `q̈ = 0`. Both are taken over every
//! coordinate and reduced to the independent ones with the loop Jacobian.

use super::constraints::ConstraintRows;
use super::coordinates::Coordinates;
use super::kinematics::Kinematics;
use super::loads::AppliedLoads;
use super::{Dynamics, GenerationContext};
use crate::symbolic::{matrix, SymMatrix};
use crate::MarionetteError;
use tracing::{debug, instrument};

#[instrument(skip_all)]
pub(super) fn generate(
    context: &mut GenerationContext,
    coordinates: &Coordinates,
    kinematics: &Kinematics,
    loads: &AppliedLoads,
    constraints: &ConstraintRows,
) -> Result<(), MarionetteError> {
    let n = coordinates.len();
    let drift = kinematics.accelerations(context, &coordinates.drift(), "drift_")?;
    let gravity = context.model.gravity().clone();

    let mut mass = matrix::zeros(n, n);
    let mut bias = matrix::zeros(n, 1);
    for (i, body) in kinematics.bodies.iter().enumerate() {
        if body.parent.is_none() || !kinematics.is_massive(i) {
            continue;
        }
        let center = kinematics.center(i)?;
        let inertia = kinematics.world_inertia(i)?;
        let (jt, jr) = (&center.jacobian, &body.jw);
        let (jtt, jrt) = (matrix::transpose(jt), matrix::transpose(jr));
        let m = |value: SymMatrix| value.mapv(|e| e * &body.mass);

        let translational = m(matrix::matmul(&jtt, jt)?);
        let rotational = matrix::matmul(&jrt, &matrix::matmul(&inertia, jr)?)?;
        mass = &(&mass + &translational) + &rotational;

        let acceleration = kinematics.point_acceleration(&drift, &center)?;
        let force = m(&acceleration - &gravity);
        let spin = matrix::matmul(&inertia, &body.omega)?;
        let moment = &matrix::matmul(&inertia, &drift.alpha[i])? + &matrix::cross(&body.omega, &spin)?;
        bias = &(&bias + &matrix::matmul(&jtt, &force)?) + &matrix::matmul(&jrt, &moment)?;
    }
    let force = loads.generalized_forces(kinematics)?;
    debug!(coordinates = n, "projected mass matrix");

    Dynamics {
        mass: coordinates.reduce_mass(&mass)?,
        bias: coordinates.reduce(&bias)?,
        force: coordinates.reduce(&force)?,
    }
    .solve(context, coordinates, constraints, kinematics, Some(&drift))
}

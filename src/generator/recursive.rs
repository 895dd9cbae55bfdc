//! Composite-rigid-body mass matrix and recursive Newton-Euler bias.
//!
//! Spatial quantities are taken about the world origin, so joint motion axes, body inertias
//! and forces can be summed along the tree without coordinate transforms. The bias `h` is the
//! inverse dynamics for `q̈_all = d` with the base accelerating at `−g`.

use super::constraints::ConstraintRows;
use super::coordinates::Coordinates;
use super::kinematics::Kinematics;
use super::loads::AppliedLoads;
use super::{spatial, Dynamics, GenerationContext};
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use tracing::{debug, instrument};

/// Spatial motion axes, inertias and velocities of every body. Entries of the inertial body
/// are zero.
pub(super) struct SpatialBodies {
    pub axes: Vec<SymMatrix>,
    pub inertias: Vec<SymMatrix>,
    pub velocities: Vec<SymMatrix>,
    /// Velocity-product accelerations `v × s·q̇`
    pub coriolis: Vec<SymMatrix>,
    /// Applied loads as force vectors about the origin
    pub external: Vec<SymMatrix>,
}

impl SpatialBodies {
    /// Binds `s_<joint>`, `I_<body>` and `V_<body>`
    pub fn new(
        context: &mut GenerationContext,
        coordinates: &Coordinates,
        kinematics: &Kinematics,
        loads: &AppliedLoads,
    ) -> Result<Self, MarionetteError> {
        let count = kinematics.bodies.len();
        let rates = coordinates.rates();
        let mut bodies = SpatialBodies {
            axes: vec![matrix::zeros(6, 1); count],
            inertias: vec![matrix::zeros(6, 6); count],
            velocities: vec![matrix::zeros(6, 1); count],
            coriolis: vec![matrix::zeros(6, 1); count],
            external: vec![matrix::zeros(6, 1); count],
        };
        for (i, body) in kinematics.bodies.iter().enumerate() {
            let (Some(p), Some(k), Some(joint)) = (body.parent, body.coordinate, &body.joint) else {
                continue;
            };
            let axis = spatial::motion_axis(&body.axis, &body.position, body.rotational)?;
            let axis = context.bind(&format!("s_{}", joint), axis)?;
            if kinematics.is_massive(i) {
                let center = kinematics.center(i)?;
                let inertia = spatial::inertia(&body.mass, &center.position, &kinematics.world_inertia(i)?)?;
                bodies.inertias[i] = context.bind(&format!("I_{}", body.name), inertia)?;
            }
            let spin = axis.mapv(|e| e * &rates[k]);
            let velocity = &bodies.velocities[p] + &spin;
            let velocity = context.bind(&format!("V_{}", body.name), velocity)?;
            bodies.coriolis[i] = matrix::matmul(&spatial::cross_motion(&velocity)?, &spin)?;
            bodies.velocities[i] = velocity;
            bodies.axes[i] = axis;
        }
        for wrench in &loads.wrenches {
            let force = spatial::wrench(&wrench.point.position, &wrench.force, &wrench.torque)?;
            let body = wrench.point.body;
            bodies.external[body] = &bodies.external[body] + &force;
        }
        Ok(bodies)
    }

    /// Base acceleration that stands in for gravity
    pub fn base_acceleration(context: &GenerationContext) -> Result<SymMatrix, MarionetteError> {
        spatial::motion(&matrix::zeros(3, 1), &context.model.gravity().mapv(|e| -e))
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
    let spatial_bodies = SpatialBodies::new(context, coordinates, kinematics, loads)?;
    let SpatialBodies {
        axes,
        inertias,
        velocities,
        coriolis,
        external,
    } = &spatial_bodies;
    let drift = coordinates.drift();

    // Newton-Euler, outward: accelerations for q̈_all = d and the forces they need
    let mut accelerations = vec![SpatialBodies::base_acceleration(context)?; count];
    let mut forces = vec![matrix::zeros(6, 1); count];
    for (i, body) in kinematics.bodies.iter().enumerate() {
        let (Some(p), Some(k)) = (body.parent, body.coordinate) else {
            continue;
        };
        let acceleration = &(&accelerations[p] + &axes[i].mapv(|e| e * &drift[k])) + &coriolis[i];
        accelerations[i] = context.bind(&format!("A_drift_{}", body.name), acceleration)?;
        let momentum = matrix::matmul(&inertias[i], &velocities[i])?;
        let force = &matrix::matmul(&inertias[i], &accelerations[i])?
            + &matrix::matmul(&spatial::cross_force(&velocities[i])?, &momentum)?;
        forces[i] = context.bind(&format!("F_drift_{}", body.name), force)?;
    }

    // inward: subtree forces, applied wrenches and composite inertias
    let mut composite = inertias.clone();
    let mut applied = external.clone();
    let mut bias = matrix::zeros(n, 1);
    let mut force = loads.generalized.clone();
    for i in (0..count).rev() {
        let body = &kinematics.bodies[i];
        let (Some(p), Some(k)) = (body.parent, body.coordinate) else {
            continue;
        };
        composite[i] = context.bind(&format!("Ic_{}", body.name), composite[i].clone())?;
        bias[[k, 0]] = matrix::dot(&axes[i], &forces[i])?;
        force[[k, 0]] = &force[[k, 0]] + &matrix::dot(&axes[i], &applied[i])?;
        composite[p] = &composite[p] + &composite[i];
        forces[p] = &forces[p] + &forces[i];
        applied[p] = &applied[p] + &applied[i];
    }

    // composite-rigid-body mass matrix, one column of ancestors per body
    let mut mass = matrix::zeros(n, n);
    for (i, body) in kinematics.bodies.iter().enumerate() {
        let Some(k) = body.coordinate else {
            continue;
        };
        let column = matrix::matmul(&composite[i], &axes[i])?;
        let mut ancestor = Some(i);
        while let Some(j) = ancestor {
            let Some(kj) = kinematics.bodies[j].coordinate else {
                break;
            };
            let entry: Expr = matrix::dot(&axes[j], &column)?;
            mass[[k, kj]] = entry.clone();
            mass[[kj, k]] = entry;
            ancestor = kinematics.bodies[j].parent;
        }
    }
    debug!(coordinates = n, "composite-rigid-body mass matrix");

    let drift_accelerations = if constraints.is_empty() {
        None
    } else {
        Some(kinematics.accelerations(context, &drift, "drift_")?)
    };
    Dynamics {
        mass: coordinates.reduce_mass(&mass)?,
        bias: coordinates.reduce(&bias)?,
        force: coordinates.reduce(&force)?,
    }
    .solve(context, coordinates, constraints, kinematics, drift_accelerations.as_ref())
}

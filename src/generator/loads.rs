//! Distribution of authored loads onto bodies and coordinates.

use super::coordinates::Coordinates;
use super::kinematics::{Kinematics, Point};
use super::GenerationContext;
use crate::graph::{EquationOptions, VarKind};
use crate::model::LoadKind;
use crate::symbolic::{matrix, SymMatrix};
use crate::MarionetteError;
use tracing::debug;

/// A world-frame force applied at a body point together with a free torque
#[derive(Debug, Clone)]
pub(crate) struct Wrench {
    pub point: Point,
    pub force: SymMatrix,
    pub torque: SymMatrix,
}

/// Loads as body wrenches plus generalized forces applied directly to coordinates
pub(crate) struct AppliedLoads {
    pub wrenches: Vec<Wrench>,
    /// One entry per coordinate, eliminated ones included
    pub generalized: SymMatrix,
}

impl AppliedLoads {
    /// Binds every load value as a [VarKind::UserExp] named after the load and resolves it in
    /// world coordinates. The child side receives the load, the parent side its reaction.
    pub fn new(
        context: &mut GenerationContext,
        coordinates: &Coordinates,
        kinematics: &Kinematics,
    ) -> Result<Self, MarionetteError> {
        let mut wrenches = vec![];
        let mut generalized = matrix::zeros(coordinates.len(), 1);
        let loads = context.model.loads().to_vec();
        let zero = matrix::zeros(3, 1);

        for load in &loads {
            let bind = |context: &mut GenerationContext, value: SymMatrix| -> Result<SymMatrix, MarionetteError> {
                let var = context
                    .graph
                    .add_equation(load.name(), value, EquationOptions::kind(VarKind::UserExp))?;
                Ok(var.expr())
            };
            match load.kind() {
                LoadKind::Joint { joint, value } => {
                    let value = bind(context, value.clone())?;
                    let elementary = context.model.elementary(*joint)?;
                    let indices = elementary
                        .iter()
                        .map(|e| coordinates.index(&e.name))
                        .collect::<Result<Vec<_>, _>>()?;
                    for (i, k) in indices.into_iter().enumerate() {
                        generalized[[k, 0]] = &generalized[[k, 0]] + &value[[i, 0]];
                    }
                }
                LoadKind::PtPForce { parent, child, value } => {
                    let value = bind(context, matrix::scalar(value.clone()))?[[0, 0]].clone();
                    let parent = kinematics.frame(context.model.frame(*parent)?)?;
                    let child = kinematics.frame(context.model.frame(*child)?)?;
                    let gap = &parent.position - &child.position;
                    let distance = matrix::norm(&gap);
                    let force = gap.mapv(|e| e * &value / &distance);
                    wrenches.push(Wrench {
                        force: force.mapv(|e| -e),
                        point: parent,
                        torque: zero.clone(),
                    });
                    wrenches.push(Wrench {
                        force,
                        point: child,
                        torque: zero.clone(),
                    });
                }
                LoadKind::CmpForce {
                    parent,
                    child,
                    reference,
                    value,
                } => {
                    let value = bind(context, value.clone())?;
                    let reference = kinematics.frame(context.model.frame(*reference)?)?;
                    let force = matrix::matmul(&reference.rotation, &value)?;
                    let parent = kinematics.frame(context.model.frame(*parent)?)?;
                    let child = kinematics.frame(context.model.frame(*child)?)?;
                    wrenches.push(Wrench {
                        force: force.mapv(|e| -e),
                        point: parent,
                        torque: zero.clone(),
                    });
                    wrenches.push(Wrench {
                        force,
                        point: child,
                        torque: zero.clone(),
                    });
                }
                LoadKind::CmpTorque {
                    parent,
                    child,
                    reference,
                    value,
                } => {
                    let value = bind(context, value.clone())?;
                    let reference = kinematics.frame(context.model.frame(*reference)?)?;
                    let torque = matrix::matmul(&reference.rotation, &value)?;
                    let parent = kinematics.frame(context.model.frame(*parent)?)?;
                    let child = kinematics.frame(context.model.frame(*child)?)?;
                    wrenches.push(Wrench {
                        force: zero.clone(),
                        point: parent,
                        torque: torque.mapv(|e| -e),
                    });
                    wrenches.push(Wrench {
                        force: zero.clone(),
                        point: child,
                        torque,
                    });
                }
            }
        }
        // the inertial body takes reactions without moving
        wrenches.retain(|w| kinematics.bodies[w.point.body].parent.is_some());
        debug!(loads = loads.len(), wrenches = wrenches.len(), "distributed loads");
        Ok(AppliedLoads { wrenches, generalized })
    }

    /// Generalized forces on every coordinate, `Σ Jvᵀ·F + Jwᵀ·T` plus the joint loads
    pub fn generalized_forces(&self, kinematics: &Kinematics) -> Result<SymMatrix, MarionetteError> {
        let mut total = self.generalized.clone();
        for wrench in &self.wrenches {
            let jw = &kinematics.bodies[wrench.point.body].jw;
            total = &total + &matrix::matmul(&matrix::transpose(&wrench.point.jacobian), &wrench.force)?;
            total = &total + &matrix::matmul(&matrix::transpose(jw), &wrench.torque)?;
        }
        Ok(total)
    }
}

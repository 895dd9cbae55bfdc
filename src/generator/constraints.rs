//! Constraint rows: residuals, the Jacobian `G` and the bias `Ġ·q̇`.
//!
//! A constraint locks relative translations and rotations of its child frame with respect to
//! its parent frame, resolved in the parent frame. At velocity and acceleration level the
//! rows are the locked components of the relative velocity `Rpᵀ·(ṗc − ṗp − ωp × (pc − pp))` and
//! of the relative angular velocity `Rpᵀ·(ωc − ωp)`.

use super::coordinates::Coordinates;
use super::kinematics::{Accelerations, Kinematics, Point};
use super::GenerationContext;
use crate::graph::{EquationOptions, Shape, VarKind, Variable};
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use itertools::Itertools;
use ndarray::Axis;
use tracing::debug;

struct Row {
    name: String,
    parent: Point,
    child: Point,
    trans: [bool; 3],
    rot: [bool; 3],
}

fn pick(value: &SymMatrix, locks: [bool; 3]) -> Vec<Expr> {
    (0..3).filter(|&i| locks[i]).map(|i| value[[i, 0]].clone()).collect()
}

pub(crate) struct ConstraintRows {
    rows: Vec<Row>,
    /// `∂(relative velocity)/∂q̇_all`, locked components only
    jacobian: SymMatrix,
    multipliers: Vec<Variable>,
}

impl ConstraintRows {
    /// Resolves the constraints against the kinematics and declares their multipliers
    /// `F_<name>` and `T_<name>`, which kinematics-only runs do not have
    pub fn new(context: &mut GenerationContext, kinematics: &Kinematics) -> Result<Self, MarionetteError> {
        let mut rows = vec![];
        let mut blocks = vec![];
        let mut multipliers = vec![];
        for constraint in context.model.constraints().to_vec() {
            let parent = kinematics.frame(context.model.frame(constraint.parent())?)?;
            let child = kinematics.frame(context.model.frame(constraint.child())?)?;
            let (trans, rot) = (constraint.translation_locks(), constraint.rotation_locks());

            let parent_state = &kinematics.bodies[parent.body];
            let child_state = &kinematics.bodies[child.body];
            let delta = &child.position - &parent.position;
            let rt = matrix::transpose(&parent.rotation);
            let translation = &(&child.jacobian - &parent.jacobian) + &matrix::matmul(&matrix::skew(&delta)?, &parent_state.jw)?;
            let translation = matrix::matmul(&rt, &translation)?;
            let rotation = matrix::matmul(&rt, &(&child_state.jw - &parent_state.jw))?;
            let selected = (0..3)
                .filter(|&i| trans[i])
                .map(|i| translation.row(i).to_owned())
                .chain((0..3).filter(|&i| rot[i]).map(|i| rotation.row(i).to_owned()))
                .collect_vec();
            for row in selected {
                blocks.push(row.insert_axis(Axis(0)));
            }

            if !context.config.kinematics_only {
                let counts = [
                    (constraint.force_multiplier(), trans.iter().filter(|&&l| l).count()),
                    (constraint.torque_multiplier(), rot.iter().filter(|&&l| l).count()),
                ];
                for (name, count) in counts.into_iter().filter(|(_, count)| *count > 0) {
                    multipliers.push(context.graph.declare_variable(
                        &name,
                        Shape::Vector(count),
                        VarKind::Multiplier,
                        None,
                    )?);
                }
            }
            rows.push(Row {
                name: constraint.name().to_string(),
                parent,
                child,
                trans,
                rot,
            });
        }
        let n = kinematics.bodies.first().map(|b| b.jw.ncols()).unwrap_or(0);
        let jacobian = if blocks.is_empty() {
            matrix::zeros(0, n)
        } else {
            let views = blocks.iter().map(|b| b.view()).collect_vec();
            ndarray::concatenate(Axis(0), &views).map_err(|e| MarionetteError::Authoring(e.to_string()))?
        };
        let jacobian = if rows.is_empty() {
            jacobian
        } else {
            context.bind("G_full", jacobian)?
        };
        debug!(constraints = rows.len(), equations = jacobian.nrows(), "resolved constraints");
        Ok(ConstraintRows {
            rows,
            jacobian,
            multipliers,
        })
    }

    /// Number of locked relative motions
    pub fn len(&self) -> usize {
        self.jacobian.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `G` with respect to every coordinate
    pub fn jacobian(&self) -> &SymMatrix {
        &self.jacobian
    }

    /// Multipliers in row order, empty in kinematics-only runs
    pub fn multipliers(&self) -> &[Variable] {
        &self.multipliers
    }

    /// The multiplier holding the force (`torque == false`) or torque of `constraint`, spread
    /// onto the three parent-frame axes with zeros on the free ones
    pub fn reaction(&self, constraint: &str, torque: bool) -> Result<SymMatrix, MarionetteError> {
        let row = self
            .rows
            .iter()
            .find(|r| r.name == constraint)
            .ok_or_else(|| MarionetteError::Authoring(format!("unknown constraint {}", constraint)))?;
        let (locks, prefix) = if torque { (row.rot, "T") } else { (row.trans, "F") };
        let name = format!("{}_{}", prefix, row.name);
        let mut reaction = matrix::zeros(3, 1);
        if let Some(var) = self.multipliers.iter().find(|v| v.name() == name) {
            let values = matrix::entries(&var.expr());
            for (k, axis) in (0..3).filter(|&i| locks[i]).enumerate() {
                reaction[[axis, 0]] = values[k].clone();
            }
        }
        Ok(reaction)
    }

    /// Locked components of the relative acceleration for the given body accelerations. With
    /// the accelerations of `q̈_all = d` this is the bias `G·d + Ġ·q̇`.
    pub fn relative_acceleration(&self, kinematics: &Kinematics, accelerations: &Accelerations) -> Result<SymMatrix, MarionetteError> {
        let mut entries = vec![];
        for row in &self.rows {
            let parent_state = &kinematics.bodies[row.parent.body];
            let child_state = &kinematics.bodies[row.child.body];
            let omega = &parent_state.omega;
            let alpha = &accelerations.alpha[row.parent.body];
            let rt = matrix::transpose(&row.parent.rotation);

            let delta = &row.child.position - &row.parent.position;
            let delta_rate = &row.child.velocity - &row.parent.velocity;
            let relative_velocity = &delta_rate - &matrix::cross(omega, &delta)?;
            let a_child = kinematics.point_acceleration(accelerations, &row.child)?;
            let a_parent = kinematics.point_acceleration(accelerations, &row.parent)?;
            let translation = &(&(&(&a_child - &a_parent) - &matrix::cross(alpha, &delta)?)
                - &matrix::cross(omega, &delta_rate)?)
                - &matrix::cross(omega, &relative_velocity)?;
            let translation = matrix::matmul(&rt, &translation)?;

            let spin = &child_state.omega - omega;
            let rotation = &(&accelerations.alpha[row.child.body] - alpha) - &matrix::cross(omega, &spin)?;
            let rotation = matrix::matmul(&rt, &rotation)?;
            entries.extend(pick(&translation, row.trans));
            entries.extend(pick(&rotation, row.rot));
        }
        Ok(matrix::column(entries))
    }

    /// Position residual: locked relative translations and the small-angle components of the
    /// relative rotation
    fn position_residual(&self) -> Result<SymMatrix, MarionetteError> {
        let mut entries = vec![];
        for row in &self.rows {
            let rt = matrix::transpose(&row.parent.rotation);
            let translation = matrix::matmul(&rt, &(&row.child.position - &row.parent.position))?;
            let relative = matrix::matmul(&rt, &row.child.rotation)?;
            let angles = matrix::column([
                relative[[2, 1]].clone(),
                relative[[0, 2]].clone(),
                relative[[1, 0]].clone(),
            ]);
            entries.extend(pick(&translation, row.trans));
            entries.extend(pick(&angles, row.rot));
        }
        Ok(matrix::column(entries))
    }

    /// Emits `Phi`, `Phid` and `Phidd` for the configured differentiation orders.
    /// `Phidd` needs the accelerations of the symbolic `q̈_all`.
    pub fn emit_residuals(
        &self,
        context: &mut GenerationContext,
        coordinates: &Coordinates,
        kinematics: &Kinematics,
        accelerations: Option<&Accelerations>,
    ) -> Result<(), MarionetteError> {
        if self.is_empty() {
            return Ok(());
        }
        let orders = context.config.differentiation_order.clone();
        let residual = EquationOptions::kind(VarKind::Residual).with_shape(Shape::Vector(self.len()));
        for order in orders {
            let (name, value) = match order {
                0 => ("Phi", self.position_residual()?),
                1 => ("Phid", matrix::matmul(&self.jacobian, &matrix::column(coordinates.rates()))?),
                _ => {
                    let accelerations = accelerations.ok_or_else(|| {
                        MarionetteError::Authoring("acceleration residual needs body accelerations".to_string())
                    })?;
                    ("Phidd", self.relative_acceleration(kinematics, accelerations)?)
                }
            };
            let value = context.tidy(value);
            context.graph.add_equation(name, value, residual)?;
        }
        Ok(())
    }
}

//! Inertial kinematics of the canonical tree.
//!
//! Every quantity is resolved in world coordinates. Body velocities are kept together with
//! their partial velocities, `ω = Jw·q̇_all` and `v = Jv·q̇_all`, so that Jacobian projections
//! never need to differentiate bound intermediates.

use super::coordinates::Coordinates;
use super::GenerationContext;
use crate::canonical::CanonicalFrame;
use crate::model::BodyId;
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use num_traits::Zero;
use std::collections::HashMap;
use tracing::debug;

/// World-frame state of one canonical body
#[derive(Debug, Clone)]
pub(crate) struct BodyState {
    pub body: BodyId,
    pub name: String,
    /// Index of the parent state, `None` for the inertial body
    pub parent: Option<usize>,
    /// Coordinate index of the incoming joint
    pub coordinate: Option<usize>,
    pub joint: Option<String>,
    pub rotational: bool,
    /// Joint axis
    pub axis: SymMatrix,
    pub rotation: SymMatrix,
    /// Body origin, which is also the location of the incoming joint
    pub position: SymMatrix,
    pub omega: SymMatrix,
    pub velocity: SymMatrix,
    /// `∂ω/∂q̇_all`
    pub jw: SymMatrix,
    /// `∂v/∂q̇_all` of the body origin
    pub jv: SymMatrix,
    pub mass: Expr,
    /// Center of gravity in body coordinates
    pub cg: SymMatrix,
    /// Inertia about the center of gravity in body coordinates
    pub inertia: SymMatrix,
}

/// Angular and origin accelerations of every body, for one choice of `q̈_all`
#[derive(Debug, Clone)]
pub(crate) struct Accelerations {
    pub alpha: Vec<SymMatrix>,
    pub linear: Vec<SymMatrix>,
}

/// A point fixed to a body, optionally with a frame orientation
#[derive(Debug, Clone)]
pub(crate) struct Point {
    pub body: usize,
    /// Offset from the body origin
    pub arm: SymMatrix,
    pub position: SymMatrix,
    pub velocity: SymMatrix,
    /// `∂v/∂q̇_all`
    pub jacobian: SymMatrix,
    pub rotation: SymMatrix,
}

pub(crate) struct Kinematics {
    pub bodies: Vec<BodyState>,
    lookup: HashMap<BodyId, usize>,
    rates: Vec<Expr>,
}

fn unit(axis: usize) -> SymMatrix {
    let mut e = matrix::zeros(3, 1);
    e[[axis, 0]] = Expr::from(1.0);
    e
}

fn scale(value: &SymMatrix, factor: &Expr) -> SymMatrix {
    value.mapv(|e| e * factor)
}

impl Kinematics {
    /// Positions and velocities of every body, parents first. Binds `R_<body>`, `r_<body>`,
    /// `omega_<body>`, `v_<body>`, `Jw_<body>` and `Jv_<body>`.
    pub fn new(context: &mut GenerationContext, coordinates: &Coordinates) -> Result<Self, MarionetteError> {
        let n = coordinates.len();
        let rates = coordinates.rates();
        let nodes = context.model.tree().iter().cloned().collect::<Vec<_>>();
        let mut bodies: Vec<BodyState> = Vec::with_capacity(nodes.len());

        for node in &nodes {
            let data = node.get();
            let body = &data.body;
            let mut state = BodyState {
                body: *node.id(),
                name: body.name.clone(),
                parent: None,
                coordinate: None,
                joint: None,
                rotational: false,
                axis: matrix::zeros(3, 1),
                rotation: matrix::identity(3),
                position: matrix::zeros(3, 1),
                omega: matrix::zeros(3, 1),
                velocity: matrix::zeros(3, 1),
                jw: matrix::zeros(3, n),
                jv: matrix::zeros(3, n),
                mass: body.mass.clone(),
                cg: body.cg.clone(),
                inertia: body.inertia.clone(),
            };
            let (Some(joint), Some(parent)) = (&data.joint, node.parent()) else {
                bodies.push(state);
                continue;
            };
            let p = &bodies[parent.0];
            let k = coordinates.index(&joint.name)?;
            let qd = &rates[k];

            let (local_position, local_rotation) = joint.transform()?;
            let rotation = matrix::matmul(&p.rotation, &local_rotation)?;
            let position = &p.position + &matrix::matmul(&p.rotation, &local_position)?;
            let axis = matrix::matmul(&matrix::matmul(&p.rotation, &joint.rotation)?, &unit(joint.dof.axis()))?;
            let delta = &position - &p.position;

            let mut omega = p.omega.clone();
            let mut velocity = &p.velocity + &matrix::cross(&p.omega, &delta)?;
            let mut jw = p.jw.clone();
            let mut jv = &p.jv - &matrix::matmul(&matrix::skew(&delta)?, &p.jw)?;
            let rotational = joint.dof.is_rotational();
            let (rate, partial) = if rotational {
                (&mut omega, &mut jw)
            } else {
                (&mut velocity, &mut jv)
            };
            *rate = &*rate + &scale(&axis, qd);
            for r in 0..3 {
                partial[[r, k]] = &partial[[r, k]] + &axis[[r, 0]];
            }

            let name = body.name.clone();
            state.parent = Some(parent.0);
            state.coordinate = Some(k);
            state.joint = Some(joint.name.clone());
            state.rotational = rotational;
            state.axis = context.bind(&format!("axis_{}", joint.name), axis)?;
            state.rotation = context.bind(&format!("R_{}", name), rotation)?;
            state.position = context.bind(&format!("r_{}", name), position)?;
            state.omega = context.bind(&format!("omega_{}", name), omega)?;
            state.velocity = context.bind(&format!("v_{}", name), velocity)?;
            state.jw = context.bind(&format!("Jw_{}", name), jw)?;
            state.jv = context.bind(&format!("Jv_{}", name), jv)?;
            bodies.push(state);
        }
        debug!(bodies = bodies.len(), "computed body velocities");
        let lookup = bodies.iter().enumerate().map(|(i, b)| (b.body, i)).collect();
        Ok(Kinematics { bodies, lookup, rates })
    }

    /// State index of a canonical body
    pub fn index(&self, body: BodyId) -> Result<usize, MarionetteError> {
        self.lookup
            .get(&body)
            .copied()
            .ok_or_else(|| MarionetteError::structural(format!("{:?}", body), "body is not part of the joint tree"))
    }

    /// Body accelerations for the coordinate accelerations `qdd` (one per coordinate). The
    /// bound names are prefixed with `prefix`.
    pub fn accelerations(
        &self,
        context: &mut GenerationContext,
        qdd: &[Expr],
        prefix: &str,
    ) -> Result<Accelerations, MarionetteError> {
        let mut alpha: Vec<SymMatrix> = Vec::with_capacity(self.bodies.len());
        let mut linear: Vec<SymMatrix> = Vec::with_capacity(self.bodies.len());
        for body in &self.bodies {
            let (Some(p), Some(k)) = (body.parent, body.coordinate) else {
                alpha.push(matrix::zeros(3, 1));
                linear.push(matrix::zeros(3, 1));
                continue;
            };
            let parent = &self.bodies[p];
            let delta = &body.position - &parent.position;
            let mut a = &(&linear[p] + &matrix::cross(&alpha[p], &delta)?)
                + &matrix::cross(&parent.omega, &matrix::cross(&parent.omega, &delta)?)?;
            let mut al = alpha[p].clone();
            let spin = scale(&body.axis, &self.rates[k]);
            if body.rotational {
                al = &(&al + &scale(&body.axis, &qdd[k])) + &matrix::cross(&parent.omega, &spin)?;
            } else {
                let coriolis = matrix::cross(&parent.omega, &spin)?.mapv(|e| e * 2.0);
                a = &(&a + &coriolis) + &scale(&body.axis, &qdd[k]);
            }
            alpha.push(context.bind(&format!("{}alpha_{}", prefix, body.name), al)?);
            linear.push(context.bind(&format!("{}a_{}", prefix, body.name), a)?);
        }
        Ok(Accelerations { alpha, linear })
    }

    /// A point at `local` (body coordinates) of the body with state index `body`
    pub fn point(&self, body: usize, local: &SymMatrix, orientation: &SymMatrix) -> Result<Point, MarionetteError> {
        let state = &self.bodies[body];
        let arm = matrix::matmul(&state.rotation, local)?;
        Ok(Point {
            body,
            position: &state.position + &arm,
            velocity: &state.velocity + &matrix::cross(&state.omega, &arm)?,
            jacobian: &state.jv - &matrix::matmul(&matrix::skew(&arm)?, &state.jw)?,
            rotation: matrix::matmul(&state.rotation, orientation)?,
            arm,
        })
    }

    pub fn frame(&self, frame: &CanonicalFrame) -> Result<Point, MarionetteError> {
        self.point(self.index(frame.body)?, &frame.position, &frame.rotation)
    }

    /// Center of gravity of a body
    pub fn center(&self, body: usize) -> Result<Point, MarionetteError> {
        self.point(body, &self.bodies[body].cg, &matrix::identity(3))
    }

    pub fn point_acceleration(&self, accelerations: &Accelerations, point: &Point) -> Result<SymMatrix, MarionetteError> {
        let state = &self.bodies[point.body];
        let tangential = matrix::cross(&accelerations.alpha[point.body], &point.arm)?;
        let centripetal = matrix::cross(&state.omega, &matrix::cross(&state.omega, &point.arm)?)?;
        Ok(&(&accelerations.linear[point.body] + &tangential) + &centripetal)
    }

    /// Inertia about the center of gravity in world coordinates
    pub fn world_inertia(&self, body: usize) -> Result<SymMatrix, MarionetteError> {
        let state = &self.bodies[body];
        matrix::matmul(
            &matrix::matmul(&state.rotation, &state.inertia)?,
            &matrix::transpose(&state.rotation),
        )
    }

    /// Whether the body contributes to the dynamics
    pub fn is_massive(&self, body: usize) -> bool {
        let state = &self.bodies[body];
        !(state.mass.is_zero() && state.inertia.iter().all(Zero::is_zero))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Canonicalizer;
    use crate::config::GenerationConfig;
    use crate::generator::tests::double_pendulum;
    use crate::symbolic::{evaluate_matrix, Environment};
    use approx::assert_abs_diff_eq;

    /// Finite-difference check of the recursive velocities and partial velocities
    #[test_log::test]
    fn test_velocities_match_position_derivatives() {
        let (system, ..) = double_pendulum();
        let config = GenerationConfig::default().with_simplify(false).with_kinematics_only(true);
        let model = Canonicalizer::new(&system).finish().unwrap();
        let mut context = GenerationContext::new(model, &config).unwrap();
        let coordinates = Coordinates::declare(&mut context).unwrap();
        let kinematics = Kinematics::new(&mut context, &coordinates).unwrap();
        let lower = kinematics.bodies.len() - 1;
        let tip = kinematics
            .point(lower, &matrix::numbers(&[0.4, 0.0, 0.1]), &matrix::identity(3))
            .unwrap();

        let graph = context.graph.build(false).unwrap();
        let (q, qd) = ([0.4, -0.7, 0.3], [1.2, 0.5, -0.9]);
        let state = |q: &[f64; 3]| {
            let mut env = Environment::new();
            env.set_vector("q", q).set_vector("qd", &qd);
            graph.evaluate(&env).unwrap()
        };
        let env = state(&q);
        let velocity = evaluate_matrix(&tip.velocity, &env).unwrap();
        let jacobian = evaluate_matrix(&tip.jacobian, &env).unwrap();

        let h = 1e-6;
        let step = |sign: f64| {
            let q = [q[0] + sign * h * qd[0], q[1] + sign * h * qd[1], q[2] + sign * h * qd[2]];
            evaluate_matrix(&tip.position, &state(&q)).unwrap()
        };
        let numeric = (step(1.0) - step(-1.0)) / (2.0 * h);
        for r in 0..3 {
            assert_abs_diff_eq!(velocity[[r, 0]], numeric[[r, 0]], epsilon = 1e-6);
            let projected: f64 = (0..3).map(|c| jacobian[[r, c]] * qd[c]).sum();
            assert_abs_diff_eq!(projected, velocity[[r, 0]], epsilon = 1e-12);
        }
    }
}

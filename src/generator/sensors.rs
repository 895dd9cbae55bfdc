//! Sensor equations, emitted with [VarKind::Sensor].
//!
//! Relative quantities compare world-frame values of the child frame with those of the parent
//! frame and are resolved in the reference frame, `R_refᵀ·(child − parent)`.

use super::constraints::ConstraintRows;
use super::kinematics::{Accelerations, Kinematics, Point};
use super::GenerationContext;
use crate::graph::{EquationOptions, Shape, VarKind};
use crate::model::{coordinate_name, FrameId, SensorKind};
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use num_traits::Zero;
use tracing::debug;

struct Sensing<'a> {
    kinematics: &'a Kinematics,
    accelerations: Option<&'a Accelerations>,
}

impl Sensing<'_> {
    fn point(&self, context: &GenerationContext, frame: FrameId) -> Result<Point, MarionetteError> {
        self.kinematics.frame(context.model.frame(frame)?)
    }

    /// `R_refᵀ·value`, the parent frame standing in for a missing reference
    fn resolve(
        &self,
        context: &GenerationContext,
        reference: Option<FrameId>,
        parent: FrameId,
        value: SymMatrix,
    ) -> Result<SymMatrix, MarionetteError> {
        let reference = self.point(context, reference.unwrap_or(parent))?;
        matrix::matmul(&matrix::transpose(&reference.rotation), &value)
    }

    fn accelerations(&self) -> Result<&Accelerations, MarionetteError> {
        self.accelerations
            .ok_or_else(|| MarionetteError::Authoring("sensor reads accelerations that were not computed".to_string()))
    }

    /// Kinetic plus potential energy of the body with state index `body`
    fn energy(&self, context: &GenerationContext, body: usize) -> Result<Expr, MarionetteError> {
        if !self.kinematics.is_massive(body) {
            return Ok(Expr::zero());
        }
        let state = &self.kinematics.bodies[body];
        let center = self.kinematics.center(body)?;
        let spin = matrix::matmul(&self.kinematics.world_inertia(body)?, &state.omega)?;
        let kinetic = &(&state.mass * &matrix::dot(&center.velocity, &center.velocity)?)
            + &matrix::dot(&state.omega, &spin)?;
        let potential = &state.mass * &matrix::dot(context.model.gravity(), &center.position)?;
        Ok(&(kinetic * 0.5) - &potential)
    }

    fn measure(
        &self,
        context: &GenerationContext,
        constraints: &ConstraintRows,
        kind: &SensorKind,
    ) -> Result<SymMatrix, MarionetteError> {
        let kinematics = self.kinematics;
        Ok(match kind {
            SensorKind::Distance { parent, child } => {
                let (p, c) = (self.point(context, *parent)?, self.point(context, *child)?);
                let gap = &c.position - &p.position;
                let distance = matrix::norm(&gap);
                let rate = matrix::dot(&gap, &(&c.velocity - &p.velocity))? / &distance;
                matrix::column([distance, rate])
            }
            SensorKind::Position { parent, child, reference } => {
                let (p, c) = (self.point(context, *parent)?, self.point(context, *child)?);
                self.resolve(context, *reference, *parent, &c.position - &p.position)?
            }
            SensorKind::Velocity { parent, child, reference } => {
                let (p, c) = (self.point(context, *parent)?, self.point(context, *child)?);
                self.resolve(context, *reference, *parent, &c.velocity - &p.velocity)?
            }
            SensorKind::Acceleration { parent, child, reference } => {
                let accelerations = self.accelerations()?;
                let (p, c) = (self.point(context, *parent)?, self.point(context, *child)?);
                let relative = &kinematics.point_acceleration(accelerations, &c)?
                    - &kinematics.point_acceleration(accelerations, &p)?;
                self.resolve(context, *reference, *parent, relative)?
            }
            SensorKind::Orientation { parent, child } => {
                let (p, c) = (self.point(context, *parent)?, self.point(context, *child)?);
                matrix::matmul(&matrix::transpose(&p.rotation), &c.rotation)?
            }
            SensorKind::AngularVelocity { parent, child, reference } => {
                let (p, c) = (self.point(context, *parent)?, self.point(context, *child)?);
                let relative = &kinematics.bodies[c.body].omega - &kinematics.bodies[p.body].omega;
                self.resolve(context, *reference, *parent, relative)?
            }
            SensorKind::AngularAcceleration { parent, child, reference } => {
                let accelerations = self.accelerations()?;
                let (p, c) = (self.point(context, *parent)?, self.point(context, *child)?);
                let relative = &accelerations.alpha[c.body] - &accelerations.alpha[p.body];
                self.resolve(context, *reference, *parent, relative)?
            }
            SensorKind::Joint { joint } => {
                let names = context
                    .model
                    .elementary(*joint)?
                    .iter()
                    .map(|e| e.name.clone())
                    .collect::<Vec<_>>();
                let positions = names.iter().map(|n| Expr::symbol(&coordinate_name(n, 0)));
                let rates = names.iter().map(|n| Expr::symbol(&coordinate_name(n, 1)));
                matrix::column(positions.chain(rates).collect::<Vec<_>>())
            }
            SensorKind::Energy { body } => {
                let energy = match body {
                    Some(body) => self.energy(context, kinematics.index(context.model.resolve_body(*body))?)?,
                    None => Expr::sum(
                        (0..kinematics.bodies.len())
                            .filter(|&i| kinematics.bodies[i].parent.is_some())
                            .map(|i| self.energy(context, i))
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                };
                matrix::scalar(energy)
            }
            SensorKind::ConstraintForce { constraint } | SensorKind::ConstraintTorque { constraint } => {
                if context.config.kinematics_only {
                    return Err(MarionetteError::Authoring(
                        "constraint reactions are not available in a kinematics-only run".to_string(),
                    ));
                }
                let name = context
                    .model
                    .constraints()
                    .get(constraint.index())
                    .ok_or_else(|| MarionetteError::Authoring(format!("unknown constraint {:?}", constraint)))?
                    .name()
                    .to_string();
                let torque = matches!(kind, SensorKind::ConstraintTorque { .. });
                constraints.reaction(&name, torque)?
            }
        })
    }
}

/// Emits one equation per sensor, named after the sensor
pub(super) fn emit(
    context: &mut GenerationContext,
    kinematics: &Kinematics,
    constraints: &ConstraintRows,
    accelerations: Option<&Accelerations>,
) -> Result<(), MarionetteError> {
    let sensing = Sensing {
        kinematics,
        accelerations,
    };
    let sensors = context.model.sensors().to_vec();
    for sensor in &sensors {
        let value = sensing.measure(context, constraints, sensor.kind())?;
        let value = context.tidy(value);
        let options = EquationOptions::kind(VarKind::Sensor).with_shape(Shape::from_dim(value.dim()));
        context.graph.add_equation(sensor.name(), value, options)?;
    }
    debug!(sensors = sensors.len(), "emitted sensors");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::GenerationConfig;
    use crate::generator::tests::{pendulum, KINDS};
    use crate::generator::GeneratorKind;
    use crate::graph::VarKind;
    use crate::model::{Dof, SensorKind, System};
    use crate::symbolic::{matrix, Environment};
    use crate::MarionetteError;
    use approx::assert_abs_diff_eq;

    /// The pendulum swinging at 2 rad/s with a frame at the end of a unit rod
    fn instrumented() -> System {
        let mut system = pendulum();
        let swing = system.joint_by_name("swing").unwrap();
        system.set_initial(swing, &[0.3], &[2.0]).unwrap();
        let rod = system.joint(swing).unwrap().child();
        let world = system.origin(system.world()).unwrap();
        let tip = system
            .add_frame("tip", system.origin(rod).unwrap(), matrix::numbers(&[0.0, -1.0, 0.0]), None)
            .unwrap();
        let (parent, child) = (world, tip);
        system
            .add_sensor("gap", SensorKind::Distance { parent, child })
            .unwrap();
        system
            .add_sensor("tip_position", SensorKind::Position { parent, child, reference: None })
            .unwrap();
        system
            .add_sensor("tip_velocity", SensorKind::Velocity { parent, child, reference: None })
            .unwrap();
        system
            .add_sensor("tip_acceleration", SensorKind::Acceleration { parent, child, reference: None })
            .unwrap();
        system
            .add_sensor("attitude", SensorKind::Orientation { parent, child })
            .unwrap();
        system
            .add_sensor("spin", SensorKind::AngularVelocity { parent, child, reference: Some(tip) })
            .unwrap();
        system.add_sensor("hinge", SensorKind::Joint { joint: swing }).unwrap();
        system.add_sensor("energy", SensorKind::Energy { body: None }).unwrap();
        system
    }

    #[test_log::test]
    fn test_pendulum_sensors() {
        let system = instrumented();
        let (s, c) = (0.3f64.sin(), 0.3f64.cos());
        let alpha = -2.0 * 9.81 * 0.5 * s / 0.6;
        for kind in KINDS {
            let graph = system.generate(kind, &GenerationConfig::default()).unwrap();
            assert_eq!(graph.query_by_kind(VarKind::Sensor).len(), 8);
            let env = graph.evaluate(&Environment::new()).unwrap();

            let gap = env.vector("gap", 2).unwrap();
            assert_abs_diff_eq!(gap[0], 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(gap[1], 0.0, epsilon = 1e-12);

            let position = env.vector("tip_position", 3).unwrap();
            assert_abs_diff_eq!(position[0], s, epsilon = 1e-12);
            assert_abs_diff_eq!(position[1], -c, epsilon = 1e-12);

            let velocity = env.vector("tip_velocity", 3).unwrap();
            assert_abs_diff_eq!(velocity[0], 2.0 * c, epsilon = 1e-12);
            assert_abs_diff_eq!(velocity[1], 2.0 * s, epsilon = 1e-12);

            let acceleration = env.vector("tip_acceleration", 3).unwrap();
            assert_abs_diff_eq!(acceleration[0], alpha * c - 4.0 * s, epsilon = 1e-9);
            assert_abs_diff_eq!(acceleration[1], alpha * s + 4.0 * c, epsilon = 1e-9);

            let attitude = env.matrix("attitude", 3, 3).unwrap();
            assert_abs_diff_eq!(attitude[[0, 0]], c, epsilon = 1e-12);
            assert_abs_diff_eq!(attitude[[1, 0]], s, epsilon = 1e-12);

            assert_abs_diff_eq!(env.vector("spin", 3).unwrap()[2], 2.0, epsilon = 1e-12);
            assert_eq!(env.vector("hinge", 2).unwrap(), vec![0.3, 2.0]);

            // ½·Iₒ·ω² with Iₒ = 0.6, minus m·g·0.5·cos q
            let energy = 0.5 * 0.6 * 4.0 - 9.81 * c;
            assert_abs_diff_eq!(env.get("energy").unwrap(), energy, epsilon = 1e-9);
        }
    }

    /// A point mass on a slide, held up by a constraint and sensing the reaction
    fn held() -> System {
        let mut system = System::new();
        system.set_gravity(matrix::numbers(&[0.0, -9.81, 0.0])).unwrap();
        let origin = system.origin(system.world()).unwrap();
        let block = system.add_body("block", 3.0, matrix::zeros(3, 1), matrix::identity(3)).unwrap();
        system.add_joint("slide", origin, block, &[Dof::Tx, Dof::Ty]).unwrap();
        let contact = system.origin(block).unwrap();
        let support = system
            .add_constraint("support", origin, contact, [false, true, false], [false; 3])
            .unwrap();
        system
            .add_sensor("reaction", SensorKind::ConstraintForce { constraint: support })
            .unwrap();
        system
    }

    #[test_log::test]
    fn test_constraint_reaction_sensor() {
        let system = held();
        let graph = system
            .generate(GeneratorKind::Recursive, &GenerationConfig::default())
            .unwrap();
        let env = graph.evaluate(&Environment::new()).unwrap();
        let reaction = env.vector("reaction", 3).unwrap();
        assert_abs_diff_eq!(reaction[0], 0.0);
        assert_abs_diff_eq!(reaction[1], 3.0 * 9.81, epsilon = 1e-9);

        let config = GenerationConfig::default().with_kinematics_only(true);
        assert!(matches!(
            system.generate(GeneratorKind::Recursive, &config),
            Err(MarionetteError::Authoring(_))
        ));
    }
}

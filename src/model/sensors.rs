use super::{BodyId, ConstraintId, FrameId, JointId, SensorId, System};
use crate::graph::Shape;
use crate::MarionetteError;

/// Measured quantity. Relative quantities describe `child` with respect to `parent`,
/// resolved in `reference` (the parent frame when `None`).
#[derive(Debug, Clone, PartialEq)]
pub enum SensorKind {
    /// Distance and its rate
    Distance { parent: FrameId, child: FrameId },
    Position {
        parent: FrameId,
        child: FrameId,
        reference: Option<FrameId>,
    },
    Velocity {
        parent: FrameId,
        child: FrameId,
        reference: Option<FrameId>,
    },
    Acceleration {
        parent: FrameId,
        child: FrameId,
        reference: Option<FrameId>,
    },
    /// Rotation matrix mapping child coordinates into parent coordinates
    Orientation { parent: FrameId, child: FrameId },
    AngularVelocity {
        parent: FrameId,
        child: FrameId,
        reference: Option<FrameId>,
    },
    AngularAcceleration {
        parent: FrameId,
        child: FrameId,
        reference: Option<FrameId>,
    },
    /// Positions followed by velocities of every elementary joint
    Joint { joint: JointId },
    /// Kinetic plus potential energy of one body, or of all bodies
    Energy { body: Option<BodyId> },
    /// Force held by a constraint, in its parent frame
    ConstraintForce { constraint: ConstraintId },
    ConstraintTorque { constraint: ConstraintId },
}

#[derive(Debug, Clone)]
pub struct Sensor {
    pub(crate) name: String,
    pub(crate) kind: SensorKind,
}

impl Sensor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &SensorKind {
        &self.kind
    }

    /// Whether the sensor reads accelerations, which only exist after the dynamics are solved
    pub fn needs_acceleration(&self) -> bool {
        matches!(
            self.kind,
            SensorKind::Acceleration { .. }
                | SensorKind::AngularAcceleration { .. }
                | SensorKind::ConstraintForce { .. }
                | SensorKind::ConstraintTorque { .. }
        )
    }
}

impl System {
    pub fn add_sensor<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        kind: SensorKind,
    ) -> Result<SensorId, MarionetteError> {
        let kind = self.validate_sensor(kind)?;
        let name = self.register(name, "sensor")?;
        let id = SensorId(self.sensors.len());
        self.sensors.push(Sensor { name, kind });
        Ok(id)
    }

    /// Shape of the value a sensor produces
    pub fn sensor_shape(&self, sensor: SensorId) -> Result<Shape, MarionetteError> {
        Ok(match &self.sensor(sensor)?.kind {
            SensorKind::Distance { .. } => Shape::Vector(2),
            SensorKind::Orientation { .. } => Shape::Matrix(3, 3),
            SensorKind::Joint { joint } => Shape::Vector(2 * self.joint(*joint)?.dofs.len()),
            SensorKind::Energy { .. } => Shape::Scalar,
            _ => Shape::Vector(3),
        })
    }

    fn validate_sensor(&self, kind: SensorKind) -> Result<SensorKind, MarionetteError> {
        let resolve = |parent: FrameId, child: FrameId, reference: Option<FrameId>| {
            self.frame(parent)?;
            self.frame(child)?;
            let reference = reference.unwrap_or(parent);
            self.frame(reference)?;
            Ok::<_, MarionetteError>((parent, child, Some(reference)))
        };
        Ok(match kind {
            SensorKind::Distance { parent, child } | SensorKind::Orientation { parent, child } => {
                resolve(parent, child, None)?;
                kind
            }
            SensorKind::Position { parent, child, reference } => {
                let (parent, child, reference) = resolve(parent, child, reference)?;
                SensorKind::Position { parent, child, reference }
            }
            SensorKind::Velocity { parent, child, reference } => {
                let (parent, child, reference) = resolve(parent, child, reference)?;
                SensorKind::Velocity { parent, child, reference }
            }
            SensorKind::Acceleration { parent, child, reference } => {
                let (parent, child, reference) = resolve(parent, child, reference)?;
                SensorKind::Acceleration { parent, child, reference }
            }
            SensorKind::AngularVelocity { parent, child, reference } => {
                let (parent, child, reference) = resolve(parent, child, reference)?;
                SensorKind::AngularVelocity { parent, child, reference }
            }
            SensorKind::AngularAcceleration { parent, child, reference } => {
                let (parent, child, reference) = resolve(parent, child, reference)?;
                SensorKind::AngularAcceleration { parent, child, reference }
            }
            SensorKind::Joint { joint } => {
                if self.joint(joint)?.is_fixed() {
                    return Err(MarionetteError::Authoring("a fixed joint has no coordinates to sense".to_string()));
                }
                kind
            }
            SensorKind::Energy { body } => {
                if let Some(body) = body {
                    self.body(body)?;
                }
                kind
            }
            SensorKind::ConstraintForce { constraint } | SensorKind::ConstraintTorque { constraint } => {
                self.constraint(constraint)?;
                kind
            }
        })
    }
}

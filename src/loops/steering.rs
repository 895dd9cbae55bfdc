use super::planar::{two_link, Plane, Vec2};
use super::{explicit, joint_above, require, require_aligned, LoopSolution};
use crate::canonical::{CanonicalModel, ElementaryJoint};
use crate::model::FrameId;
use crate::symbolic::{matrix, SymMatrix};
use crate::MarionetteError;

/// Rack-and-pinion steering: the rack slides on the ground, the tie rod is jointed to the
/// rack and to the steering arm, and the arm turns about the kingpin on the ground. The loop
/// is cut at the kingpin, one frame on the arm and one on the ground.
///
/// Independent: the rack stroke. Eliminated: the tie rod angle on the rack and the arm angle.
#[derive(Debug, Clone)]
pub struct Steering {
    name: String,
    posture: i8,
    plane: Plane,
    axis: Vec2,
    rack: ElementaryJoint,
    tie_rod: ElementaryJoint,
    arm: ElementaryJoint,
    /// Kingpin on the arm
    db: SymMatrix,
    /// Kingpin on the ground
    da: SymMatrix,
}

impl Steering {
    pub fn new(name: &str, first: FrameId, second: FrameId, posture: i8, model: &CanonicalModel) -> Result<Self, MarionetteError> {
        let (f1, f2) = (model.frame(first)?, model.frame(second)?);
        let ((arm_frame, ground_frame), arm) = match (model.joint_of(f1.body), model.joint_of(f2.body)) {
            (Some(arm), _) if model.joint_of(arm.parent).is_some() => ((f1, f2), arm),
            (_, Some(arm)) if model.joint_of(arm.parent).is_some() => ((f2, f1), arm),
            _ => {
                return Err(MarionetteError::structural(
                    name,
                    "one cut frame must sit on the steering arm",
                ))
            }
        };
        let tie_rod = joint_above(model, arm.parent, name)?;
        let rack = joint_above(model, tie_rod.parent, name)?;
        require(
            model.resolve_body(ground_frame.body) == rack.parent,
            name,
            "the kingpin frame must sit on the link carrying the rack",
        )?;

        let plane = Plane::about(arm.dof)
            .ok_or_else(|| MarionetteError::structural(name, format!("joint {} must be revolute", arm.name)))?;
        require(tie_rod.dof == arm.dof, name, format!("joint {} must turn about the axis of {}", tie_rod.name, arm.name))?;
        let axis = plane.direction(rack.dof).ok_or_else(|| {
            MarionetteError::structural(name, format!("joint {} must slide within the plane of motion", rack.name))
        })?;
        for joint in [rack, tie_rod, arm] {
            require_aligned(joint, name)?;
        }
        require(!plane.project(&arm.position).is_zero(), name, "tie rod has zero length")?;
        require(!plane.project(&arm_frame.position).is_zero(), name, "kingpin lies on the tie rod joint")?;
        let gap = plane.height(&rack.position)
            + plane.height(&tie_rod.position)
            + plane.height(&arm.position)
            + plane.height(&arm_frame.position)
            - plane.height(&ground_frame.position);
        if let Some(gap) = gap.simplify().as_number() {
            require(gap.abs() < 1e-9, name, format!("cut frames are {} apart along the joint axis", gap))?;
        }

        Ok(Steering {
            name: name.to_string(),
            posture,
            plane,
            axis,
            rack: rack.clone(),
            tie_rod: tie_rod.clone(),
            arm: arm.clone(),
            db: arm_frame.position.clone(),
            da: ground_frame.position.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solve(&self) -> Result<LoopSolution, MarionetteError> {
        let p = &self.plane;
        let s = self.rack.coordinate(0);
        let joint = p
            .project(&self.rack.position)
            .add(&self.axis.scale(&s))
            .add(&p.project(&self.tie_rod.position));
        let (rod, db) = (p.project(&self.arm.position), p.project(&self.db));
        let (phi, psi) = two_link(&joint, &p.project(&self.da), &rod.norm(), &db.norm(), self.posture);
        let q_rod = phi - rod.angle();
        // the arm vector points from the tie rod joint to the kingpin
        let q_arm = psi - &q_rod - db.angle();
        Ok(explicit(
            &self.name,
            &[&self.rack],
            &[&self.tie_rod, &self.arm],
            matrix::column([q_rod, q_arm]),
        ))
    }
}

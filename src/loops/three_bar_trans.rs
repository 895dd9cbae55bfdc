use super::planar::{slider, Plane, Vec2};
use super::{explicit, joint_above, require, require_aligned, LoopSolution};
use crate::canonical::{CanonicalModel, ElementaryJoint};
use crate::model::FrameId;
use crate::symbolic::{matrix, SymMatrix};
use crate::MarionetteError;

/// A crank turning about `A` drives a slider that turns about `C`; both pivots sit on the
/// ground link. Typical of hydraulic cylinders.
///
/// Independent: the crank angle. Eliminated: the stroke and the slider angle.
#[derive(Debug, Clone)]
pub struct ThreeBarTrans {
    name: String,
    plane: Plane,
    axis: Vec2,
    a: ElementaryJoint,
    c: ElementaryJoint,
    stroke: ElementaryJoint,
    /// Cut point on the crank
    b2: SymMatrix,
    /// Cut point on the slider
    b3: SymMatrix,
}

impl ThreeBarTrans {
    pub fn new(name: &str, first: FrameId, second: FrameId, model: &CanonicalModel) -> Result<Self, MarionetteError> {
        let (f1, f2) = (model.frame(first)?, model.frame(second)?);
        let (j1, j2) = (joint_above(model, f1.body, name)?, joint_above(model, f2.body, name)?);
        let (a, b2, stroke, b3) = match (j1.dof.is_rotational(), j2.dof.is_rotational()) {
            (true, false) => (j1, &f1.position, j2, &f2.position),
            (false, true) => (j2, &f2.position, j1, &f1.position),
            _ => {
                return Err(MarionetteError::structural(
                    name,
                    "exactly one cut frame must sit on a sliding link",
                ))
            }
        };
        let c = joint_above(model, stroke.parent, name)?;
        require(a.parent == c.parent, name, "crank and slider pivot must share the ground link")?;

        let plane = Plane::about(a.dof)
            .ok_or_else(|| MarionetteError::structural(name, format!("joint {} must be revolute", a.name)))?;
        require(c.dof == a.dof, name, format!("joint {} must turn about the axis of {}", c.name, a.name))?;
        let axis = plane.direction(stroke.dof).ok_or_else(|| {
            MarionetteError::structural(name, format!("joint {} must slide within the plane of motion", stroke.name))
        })?;
        for joint in [a, c, stroke] {
            require_aligned(joint, name)?;
        }
        let gap = plane.height(&a.position) + plane.height(b2)
            - plane.height(&c.position)
            - plane.height(&stroke.position)
            - plane.height(b3);
        if let Some(gap) = gap.simplify().as_number() {
            require(gap.abs() < 1e-9, name, format!("cut frames are {} apart along the joint axis", gap))?;
        }

        Ok(ThreeBarTrans {
            name: name.to_string(),
            plane,
            axis,
            a: a.clone(),
            c: c.clone(),
            stroke: stroke.clone(),
            b2: b2.clone(),
            b3: b3.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solve(&self) -> Result<LoopSolution, MarionetteError> {
        let p = &self.plane;
        let qa = self.a.coordinate(0);
        let target = p.project(&self.a.position).add(&p.project(&self.b2).rotate(&qa));
        let offset = p.project(&self.stroke.position).add(&p.project(&self.b3));
        let (s, angle) = slider(&p.project(&self.c.position), &target, &self.axis, &offset);
        Ok(explicit(&self.name, &[&self.a], &[&self.stroke, &self.c], matrix::column([s, angle])))
    }
}

use super::planar::{slider, Plane, Vec2};
use super::{explicit, joint_above, require, require_aligned, LoopSolution};
use crate::canonical::{CanonicalModel, ElementaryJoint};
use crate::model::FrameId;
use crate::symbolic::{matrix, SymMatrix};
use crate::MarionetteError;

/// A four-bar whose fourth link slides: the crank `A → B` and coupler `B → C` are driven, the
/// slider turns about `D` on the ground and extends until its cut frame meets `C`.
///
/// Independent: the angles at `A` and `B`. Eliminated: the stroke and the slider angle.
#[derive(Debug, Clone)]
pub struct FourBarTrans {
    name: String,
    plane: Plane,
    axis: Vec2,
    a: ElementaryJoint,
    b: ElementaryJoint,
    d: ElementaryJoint,
    stroke: ElementaryJoint,
    c3: SymMatrix,
    c4: SymMatrix,
}

impl FourBarTrans {
    pub fn new(name: &str, first: FrameId, second: FrameId, model: &CanonicalModel) -> Result<Self, MarionetteError> {
        let (f1, f2) = (model.frame(first)?, model.frame(second)?);
        let (j1, j2) = (joint_above(model, f1.body, name)?, joint_above(model, f2.body, name)?);
        let (coupler, c3, stroke, c4) = match (j1.dof.is_rotational(), j2.dof.is_rotational()) {
            (true, false) => (j1, &f1.position, j2, &f2.position),
            (false, true) => (j2, &f2.position, j1, &f1.position),
            _ => {
                return Err(MarionetteError::structural(
                    name,
                    "exactly one cut frame must sit on a sliding link",
                ))
            }
        };
        let a = joint_above(model, coupler.parent, name)?;
        let d = joint_above(model, stroke.parent, name)?;
        require(
            a.parent == d.parent,
            name,
            "crank and slider pivot must share the ground link",
        )?;

        let plane = Plane::about(a.dof)
            .ok_or_else(|| MarionetteError::structural(name, format!("joint {} must be revolute", a.name)))?;
        for joint in [coupler, d] {
            require(joint.dof == a.dof, name, format!("joint {} must turn about the axis of {}", joint.name, a.name))?;
        }
        let axis = plane.direction(stroke.dof).ok_or_else(|| {
            MarionetteError::structural(name, format!("joint {} must slide within the plane of motion", stroke.name))
        })?;
        for joint in [a, coupler, d, stroke] {
            require_aligned(joint, name)?;
        }

        let gap = plane.height(&a.position) + plane.height(&coupler.position) + plane.height(c3)
            - plane.height(&d.position)
            - plane.height(&stroke.position)
            - plane.height(c4);
        if let Some(gap) = gap.simplify().as_number() {
            require(gap.abs() < 1e-9, name, format!("cut frames are {} apart along the joint axis", gap))?;
        }

        Ok(FourBarTrans {
            name: name.to_string(),
            plane,
            axis,
            a: a.clone(),
            b: coupler.clone(),
            d: d.clone(),
            stroke: stroke.clone(),
            c3: c3.clone(),
            c4: c4.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solve(&self) -> Result<LoopSolution, MarionetteError> {
        let p = &self.plane;
        let (qa, qb) = (self.a.coordinate(0), self.b.coordinate(0));
        let coupler = p.project(&self.b.position).add(&p.project(&self.c3).rotate(&qb));
        let target = p.project(&self.a.position).add(&coupler.rotate(&qa));
        let offset = p.project(&self.stroke.position).add(&p.project(&self.c4));
        let (s, angle) = slider(&p.project(&self.d.position), &target, &self.axis, &offset);
        Ok(explicit(
            &self.name,
            &[&self.a, &self.b],
            &[&self.stroke, &self.d],
            matrix::column([s, angle]),
        ))
    }
}

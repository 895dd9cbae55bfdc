use super::planar::{Plane, Vec2};
use super::{explicit, joint_above, require, require_aligned, LoopSolution};
use crate::canonical::{CanonicalModel, ElementaryJoint};
use crate::model::FrameId;
use crate::symbolic::{matrix, SymMatrix};
use crate::MarionetteError;

/// Crank, connecting rod and a slider moving along a line fixed to the ground, as in a
/// piston engine. The rod is jointed to the slider; the loop is cut where the rod meets the
/// crank pin.
///
/// Independent: the crank angle. Eliminated: the slider stroke and the rod angle.
#[derive(Debug, Clone)]
pub struct CrankSlider {
    name: String,
    posture: i8,
    plane: Plane,
    axis: Vec2,
    crank: ElementaryJoint,
    slide: ElementaryJoint,
    rod: ElementaryJoint,
    /// Crank pin on the crank
    b1: SymMatrix,
    /// Crank pin on the rod
    b2: SymMatrix,
}

impl CrankSlider {
    pub fn new(name: &str, first: FrameId, second: FrameId, posture: i8, model: &CanonicalModel) -> Result<Self, MarionetteError> {
        let (f1, f2) = (model.frame(first)?, model.frame(second)?);
        let (j1, j2) = (joint_above(model, f1.body, name)?, joint_above(model, f2.body, name)?);
        let on_slider = |j: &ElementaryJoint| model.joint_of(j.parent).is_some_and(|s| !s.dof.is_rotational());
        let (crank, b1, rod, b2) = match (on_slider(j1), on_slider(j2)) {
            (false, true) => (j1, &f1.position, j2, &f2.position),
            (true, false) => (j2, &f2.position, j1, &f1.position),
            _ => {
                return Err(MarionetteError::structural(
                    name,
                    "exactly one cut frame must sit on a rod jointed to a slider",
                ))
            }
        };
        let slide = joint_above(model, rod.parent, name)?;
        require(crank.parent == slide.parent, name, "crank and slider must share the ground link")?;

        let plane = Plane::about(crank.dof)
            .ok_or_else(|| MarionetteError::structural(name, format!("joint {} must be revolute", crank.name)))?;
        require(rod.dof == crank.dof, name, format!("joint {} must turn about the axis of {}", rod.name, crank.name))?;
        let axis = plane.direction(slide.dof).ok_or_else(|| {
            MarionetteError::structural(name, format!("joint {} must slide within the plane of motion", slide.name))
        })?;
        for joint in [crank, slide, rod] {
            require_aligned(joint, name)?;
        }
        require(!plane.project(b2).is_zero(), name, "crank pin lies on the axis of the rod joint")?;
        let gap = plane.height(&crank.position) + plane.height(b1)
            - plane.height(&slide.position)
            - plane.height(&rod.position)
            - plane.height(b2);
        if let Some(gap) = gap.simplify().as_number() {
            require(gap.abs() < 1e-9, name, format!("cut frames are {} apart along the joint axis", gap))?;
        }

        Ok(CrankSlider {
            name: name.to_string(),
            posture,
            plane,
            axis,
            crank: crank.clone(),
            slide: slide.clone(),
            rod: rod.clone(),
            b1: b1.clone(),
            b2: b2.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solve(&self) -> Result<LoopSolution, MarionetteError> {
        let p = &self.plane;
        let q1 = self.crank.coordinate(0);
        let pin = p.project(&self.crank.position).add(&p.project(&self.b1).rotate(&q1));
        // pin relative to the rod joint at zero stroke
        let k = pin.sub(&p.project(&self.slide.position)).sub(&p.project(&self.rod.position));
        let b2 = p.project(&self.b2);
        let across = k.dot(&self.axis.perp());
        let s = k.dot(&self.axis) + f64::from(self.posture) * (b2.dot(&b2) - &across * &across).sqrt();
        let q2 = k.sub(&self.axis.scale(&s)).angle() - b2.angle();
        Ok(explicit(&self.name, &[&self.crank], &[&self.slide, &self.rod], matrix::column([s, q2])))
    }
}

#[cfg(test)]
mod tests {
    use crate::loops::tests::{assert_derivatives, link, point, solve_only};
    use crate::loops::Closure;
    use crate::model::{Dof, LoopKind, System};
    use crate::symbolic::{evaluate_matrix, Environment};
    use approx::assert_abs_diff_eq;

    /// Crank 0.2, rod 0.7, piston sliding along x with a 0.05 offset
    fn engine(posture: i8) -> System {
        let mut system = System::new();
        let world = system.world();
        let (crank, piston, rod) = (link(&mut system, "crank"), link(&mut system, "piston"), link(&mut system, "rod"));
        let origin = point(&mut system, world, [0.0, 0.0, 0.0]);
        let guide = point(&mut system, world, [0.0, 0.05, 0.0]);
        system.add_joint("jc", origin, crank, &[Dof::Rz]).unwrap();
        system.add_joint("js", guide, piston, &[Dof::Tx]).unwrap();
        let wrist = point(&mut system, piston, [0.0, 0.0, 0.0]);
        system.add_joint("jr", wrist, rod, &[Dof::Rz]).unwrap();
        let b1 = point(&mut system, crank, [0.2, 0.0, 0.0]);
        let b2 = point(&mut system, rod, [0.7, 0.0, 0.0]);
        system.add_loop("engine", LoopKind::CrankSlider { a: b2, b: b1, posture }).unwrap();
        system
    }

    #[test_log::test]
    fn test_both_postures_close() {
        let q1 = 1.1;
        let mut strokes = vec![];
        for posture in [1, -1] {
            let solution = solve_only(&engine(posture));
            assert_eq!(solution.u, ["jc"]);
            assert_eq!(solution.v, ["js", "jr"]);
            let Closure::Explicit(v) = &solution.closure else {
                panic!("closes explicitly")
            };
            let mut env = Environment::new();
            env.set("q_jc", q1);
            let v = evaluate_matrix(v, &env).unwrap();
            let (s, q2) = (v[[0, 0]], v[[1, 0]]);
            assert_abs_diff_eq!(0.2 * q1.cos(), s + 0.7 * q2.cos(), epsilon = 1e-10);
            assert_abs_diff_eq!(0.2 * q1.sin(), 0.05 + 0.7 * q2.sin(), epsilon = 1e-10);
            strokes.push(s);
        }
        // the positive posture puts the piston on the far side
        assert!(strokes[0] > 0.0 && strokes[1] < 0.0);
    }

    #[test_log::test]
    fn test_derivatives_match_finite_differences() {
        for posture in [1, -1] {
            let solution = solve_only(&engine(posture));
            let mut env = Environment::new();
            env.set("q_jc", 1.1).set("qd_jc", 2.5);
            assert_derivatives(&solution, &env, 1e-6);
        }
    }
}

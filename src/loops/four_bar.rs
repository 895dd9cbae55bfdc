use super::planar::{two_link, Plane};
use super::{explicit, joint_above, require, require_aligned, LoopSolution};
use crate::canonical::{CanonicalModel, ElementaryJoint};
use crate::model::FrameId;
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use std::f64::consts::PI;

/// Four links joined by revolute joints with parallel axes. `A` and `D` sit on the ground
/// link, the loop is cut between the cut frames on links 3 and 4.
///
/// ```text
///     B----3----C
///    /           \
///   2             4
///  /               \
/// A--------1--------D
/// ```
///
/// Independent: the angle at `A`. Eliminated: the angles at `B` and `D`.
#[derive(Debug, Clone)]
pub struct FourBar {
    name: String,
    posture: i8,
    plane: Plane,
    a: ElementaryJoint,
    b: ElementaryJoint,
    d: ElementaryJoint,
    /// Cut point on link 3, in link-3 coordinates
    c3: SymMatrix,
    /// Cut point on link 4, in link-4 coordinates
    c4: SymMatrix,
}

impl FourBar {
    pub fn new(name: &str, first: FrameId, second: FrameId, posture: i8, model: &CanonicalModel) -> Result<Self, MarionetteError> {
        let (f1, f2) = (model.frame(first)?, model.frame(second)?);
        let (j1, j2) = (joint_above(model, f1.body, name)?, joint_above(model, f2.body, name)?);

        // link 3 hangs from link 2, link 4 directly from the ground
        let hanging = |long: &ElementaryJoint, short: &ElementaryJoint| {
            model.joint_of(long.parent).filter(|a| a.parent == short.parent).cloned()
        };
        let (a, b, d, c3, c4) = if let Some(a) = hanging(j1, j2) {
            (a, j1.clone(), j2.clone(), f1.position.clone(), f2.position.clone())
        } else if let Some(a) = hanging(j2, j1) {
            (a, j2.clone(), j1.clone(), f2.position.clone(), f1.position.clone())
        } else {
            return Err(MarionetteError::structural(name, "cut frames do not close a four-bar linkage"));
        };

        let plane = Plane::about(a.dof)
            .ok_or_else(|| MarionetteError::structural(name, format!("joint {} must be revolute", a.name)))?;
        for joint in [&b, &d] {
            require(joint.dof == a.dof, name, format!("joint {} must turn about the axis of {}", joint.name, a.name))?;
        }
        for joint in [&a, &b, &d] {
            require_aligned(joint, name)?;
        }

        let four_bar = FourBar {
            name: name.to_string(),
            posture,
            plane,
            a,
            b,
            d,
            c3,
            c4,
        };
        four_bar.check_geometry()?;
        Ok(four_bar)
    }

    /// Cut points off the joint axes and in one plane, where that is decidable
    fn check_geometry(&self) -> Result<(), MarionetteError> {
        let p = &self.plane;
        require(!p.project(&self.c3).is_zero(), &self.name, "cut point of link 3 lies on the axis of its joint")?;
        require(!p.project(&self.c4).is_zero(), &self.name, "cut point of link 4 lies on the axis of its joint")?;
        let first = p.height(&self.a.position) + p.height(&self.b.position) + p.height(&self.c3);
        let second = p.height(&self.d.position) + p.height(&self.c4);
        if let Some(gap) = (first - second).simplify().as_number() {
            require(gap.abs() < 1e-9, &self.name, format!("cut frames are {} apart along the joint axis", gap))?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solve(&self) -> Result<LoopSolution, MarionetteError> {
        let p = &self.plane;
        let qa = self.a.coordinate(0);
        let joint_b = p.project(&self.a.position).add(&p.project(&self.b.position).rotate(&qa));
        let (c3, c4) = (p.project(&self.c3), p.project(&self.c4));
        let (phi, psi) = two_link(
            &joint_b,
            &p.project(&self.d.position),
            &c3.norm(),
            &c4.norm(),
            self.posture,
        );
        // φ is the absolute angle of B→C, ψ that of C→D
        let v_b = phi - &qa - c3.angle();
        let v_d = psi - Expr::number(PI) - c4.angle();
        Ok(explicit(&self.name, &[&self.a], &[&self.b, &self.d], matrix::column([v_b, v_d])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Canonicalizer;
    use crate::loops::tests::assert_derivatives;
    use crate::loops::{Closure, Loop};
    use crate::model::{Dof, LoopKind, System};
    use crate::symbolic::{evaluate_matrix, Environment};
    use approx::assert_abs_diff_eq;

    /// Ground 1.0, crank 0.4, coupler 1.1, rocker 0.8
    fn linkage(posture: i8) -> System {
        let mut system = System::new();
        let world = system.origin(system.world()).unwrap();
        let link = |system: &mut System, name: &str| {
            system
                .add_body(name, 1.0, matrix::zeros(3, 1), matrix::identity(3))
                .unwrap()
        };
        let (crank, coupler, rocker) = (link(&mut system, "crank"), link(&mut system, "coupler"), link(&mut system, "rocker"));
        let crank_end = system.add_frame("crank_end", system.origin(crank).unwrap(), matrix::numbers(&[0.4, 0.0, 0.0]), None).unwrap();
        let d = system.add_frame("d", world, matrix::numbers(&[1.0, 0.0, 0.0]), None).unwrap();
        system.add_joint("ja", world, crank, &[Dof::Rz]).unwrap();
        system.add_joint("jb", crank_end, coupler, &[Dof::Rz]).unwrap();
        system.add_joint("jd", d, rocker, &[Dof::Rz]).unwrap();
        let c3 = system.add_frame("c3", system.origin(coupler).unwrap(), matrix::numbers(&[1.1, 0.0, 0.0]), None).unwrap();
        let c4 = system.add_frame("c4", system.origin(rocker).unwrap(), matrix::numbers(&[0.8, 0.0, 0.0]), None).unwrap();
        system.add_loop("fb", LoopKind::FourBar { a: c4, b: c3, posture }).unwrap();
        system
    }

    fn solved(posture: i8, qa: f64) -> (f64, f64) {
        let system = linkage(posture);
        let model = Canonicalizer::new(&system).finish().unwrap();
        let solution = Loop::new(&model.loops()[0], &model).unwrap().solve().unwrap();
        assert_eq!(solution.u, ["ja"]);
        assert_eq!(solution.v, ["jb", "jd"]);
        let Closure::Explicit(v) = &solution.closure else {
            panic!("four-bar closes explicitly")
        };
        let mut env = Environment::new();
        env.set("q_ja", qa);
        let v = evaluate_matrix(v, &env).unwrap();
        (v[[0, 0]], v[[1, 0]])
    }

    #[test_log::test]
    fn test_postures_close_the_same_loop() {
        let qa = 0.7;
        let (b_up, d_up) = solved(1, qa);
        let (b_down, d_down) = solved(-1, qa);
        assert!((b_up - b_down).abs() > 1e-3);

        for (qb, qd) in [(b_up, d_up), (b_down, d_down)] {
            // A + l2·e(qa) + l3·e(qa + qb) = D + l4·e(qd)
            let x = 0.4 * qa.cos() + 1.1 * (qa + qb).cos();
            let y = 0.4 * qa.sin() + 1.1 * (qa + qb).sin();
            assert_abs_diff_eq!(x, 1.0 + 0.8 * qd.cos(), epsilon = 1e-10);
            assert_abs_diff_eq!(y, 0.8 * qd.sin(), epsilon = 1e-10);
        }
    }

    #[test_log::test]
    fn test_derivatives_match_finite_differences() {
        for posture in [1, -1] {
            let system = linkage(posture);
            let model = Canonicalizer::new(&system).finish().unwrap();
            let solution = Loop::new(&model.loops()[0], &model).unwrap().solve().unwrap();
            let mut env = Environment::new();
            env.set("q_ja", 0.9).set("qd_ja", -1.3);
            assert_derivatives(&solution, &env, 1e-6);
        }
    }

    #[test_log::test]
    fn test_misaligned_axes_are_structural() {
        let mut system = System::new();
        let world = system.origin(system.world()).unwrap();
        let crank = system.add_body("crank", 1.0, matrix::zeros(3, 1), matrix::identity(3)).unwrap();
        let coupler = system.add_body("coupler", 1.0, matrix::zeros(3, 1), matrix::identity(3)).unwrap();
        let rocker = system.add_body("rocker", 1.0, matrix::zeros(3, 1), matrix::identity(3)).unwrap();
        let crank_end = system.add_frame("crank_end", system.origin(crank).unwrap(), matrix::numbers(&[0.4, 0.0, 0.0]), None).unwrap();
        let d = system.add_frame("d", world, matrix::numbers(&[1.0, 0.0, 0.0]), None).unwrap();
        system.add_joint("ja", world, crank, &[Dof::Rz]).unwrap();
        system.add_joint("jb", crank_end, coupler, &[Dof::Ry]).unwrap();
        system.add_joint("jd", d, rocker, &[Dof::Rz]).unwrap();
        let c3 = system.add_frame("c3", system.origin(coupler).unwrap(), matrix::numbers(&[1.1, 0.0, 0.0]), None).unwrap();
        let c4 = system.add_frame("c4", system.origin(rocker).unwrap(), matrix::numbers(&[0.8, 0.0, 0.0]), None).unwrap();
        system.add_loop("fb", LoopKind::FourBar { a: c3, b: c4, posture: 1 }).unwrap();

        let model = Canonicalizer::new(&system).finish().unwrap();
        assert!(matches!(
            Loop::new(&model.loops()[0], &model),
            Err(MarionetteError::Structural { entity, .. }) if entity == "fb"
        ));
    }
}

use super::{explicit, LoopSolution};
use crate::canonical::{CanonicalModel, ElementaryJoint};
use crate::model::JointId;
use crate::symbolic::{matrix, Expr};
use crate::MarionetteError;
use num_traits::Zero;

/// A gear pair, belt or rack and pinion: `q_output = ratio · q_input`
///
/// Only a literal zero ratio is rejected. A ratio that evaluates to zero, such as a parameter
/// set to 0, locks the output joint (`Bvu = 0`) without an error.
#[derive(Debug, Clone)]
pub struct Transmission {
    name: String,
    input: ElementaryJoint,
    output: ElementaryJoint,
    ratio: Expr,
}

impl Transmission {
    pub fn new(name: &str, input: JointId, output: JointId, ratio: Expr, model: &CanonicalModel) -> Result<Self, MarionetteError> {
        let single = |joint: JointId| -> Result<ElementaryJoint, MarionetteError> {
            match model.elementary(joint)?.as_slice() {
                [j] => Ok((*j).clone()),
                _ => Err(MarionetteError::structural(name, "transmissions couple single-dof joints")),
            }
        };
        let (input, output) = (single(input)?, single(output)?);
        if ratio.is_zero() {
            return Err(MarionetteError::structural(name, "ratio is zero"));
        }
        Ok(Transmission {
            name: name.to_string(),
            input,
            output,
            ratio,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solve(&self) -> Result<LoopSolution, MarionetteError> {
        let v = &self.ratio * self.input.coordinate(0);
        Ok(explicit(&self.name, &[&self.input], &[&self.output], matrix::column([v])))
    }
}

#[cfg(test)]
mod tests {
    use crate::loops::tests::{link, point, solve_only};
    use crate::model::{Dof, LoopKind, System};
    use crate::symbolic::{evaluate_matrix, Environment, Expr};
    use approx::assert_abs_diff_eq;

    #[test_log::test]
    fn test_ratio_couples_velocities() {
        let mut system = System::new();
        let world = system.world();
        let (wheel, pinion) = (link(&mut system, "wheel"), link(&mut system, "pinion"));
        let (a, b) = (point(&mut system, world, [0.0; 3]), point(&mut system, world, [0.2, 0.0, 0.0]));
        let input = system.add_joint("jw", a, wheel, &[Dof::Rz]).unwrap();
        let output = system.add_joint("jp", b, pinion, &[Dof::Rz]).unwrap();
        let ratio = system.add_parameter("ratio", -3.0).unwrap();
        system.add_loop("gear", LoopKind::Transmission { input, output, ratio }).unwrap();

        let solution = solve_only(&system);
        assert_eq!(solution.u, ["jw"]);
        assert_eq!(solution.v, ["jp"]);
        let mut env = Environment::new();
        env.set("ratio", -3.0).set("qd_jw", 2.0);
        assert_abs_diff_eq!(evaluate_matrix(&solution.bvu, &env).unwrap()[[0, 0]], -3.0);
        assert_abs_diff_eq!(evaluate_matrix(&solution.b_prime, &env).unwrap()[[0, 0]], 0.0);

        let zero = LoopKind::Transmission { input, output, ratio: Expr::number(0.0) };
        system.add_loop("stuck", zero).unwrap();
        let model = crate::canonical::Canonicalizer::new(&system).finish().unwrap();
        assert!(crate::loops::Loop::new(&model.loops()[1], &model).is_err());
    }

    #[test_log::test]
    fn test_zero_valued_ratio_locks_the_output() {
        let mut system = System::new();
        let world = system.world();
        let (wheel, pinion) = (link(&mut system, "wheel"), link(&mut system, "pinion"));
        let (a, b) = (point(&mut system, world, [0.0; 3]), point(&mut system, world, [0.2, 0.0, 0.0]));
        let input = system.add_joint("jw", a, wheel, &[Dof::Rz]).unwrap();
        let output = system.add_joint("jp", b, pinion, &[Dof::Rz]).unwrap();
        let ratio = system.add_parameter("ratio", 0.0).unwrap();
        system.add_loop("gear", LoopKind::Transmission { input, output, ratio }).unwrap();

        let solution = solve_only(&system);
        let mut env = Environment::new();
        env.set("ratio", 0.0).set("q_jw", 0.7).set("qd_jw", 2.0);
        assert_abs_diff_eq!(evaluate_matrix(&solution.bvu, &env).unwrap()[[0, 0]], 0.0);
        assert_abs_diff_eq!(evaluate_matrix(&solution.b_prime, &env).unwrap()[[0, 0]], 0.0);
    }
}

//! Kinematic loop closures.
//!
//! A loop eliminates the coordinates `v` the joint tree cannot keep independent. Every
//! [Loop] is built (and structurally checked) against the [CanonicalModel] and answers
//! [Loop::calc] with a [LoopSolution]: the closure `v(u)` (or an implicit residual
//! `Φ(u, v) = 0` for the hexapods), the velocity map `Bvu = ∂v/∂u` and the acceleration bias
//! `b′` such that `v̈ = Bvu·ü + b′`.
//!
//! Loops may depend on each other when the `u` of one contains the `v` of another.
//! [order] sorts them so that every loop comes after the loops it reads from.

mod crank_slider;
mod exp_joint;
mod four_bar;
mod four_bar_trans;
mod hexapod;
mod planar;
mod steering;
mod three_bar_trans;
mod transmission;

pub use crank_slider::CrankSlider;
pub use exp_joint::ExpJoint;
pub use four_bar::FourBar;
pub use four_bar_trans::FourBarTrans;
pub use hexapod::{AxisOffsetHexapod, Hexapod};
pub use steering::Steering;
pub use three_bar_trans::ThreeBarTrans;
pub use transmission::Transmission;

use crate::canonical::{CanonicalModel, ElementaryJoint};
use crate::graph::Graph;
use crate::model::{BodyId, LoopDef, LoopKind};
use crate::symbolic::{matrix, Expr, Symbol, SymMatrix};
use crate::MarionetteError;
use itertools::Itertools;
use ndarray::Array2;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// How the dependent coordinates follow from the independent ones
#[derive(Debug, Clone)]
pub enum Closure {
    /// `v = v(u)`, one row per dependent coordinate
    Explicit(SymMatrix),
    /// `Φ(u, v) = 0`, solved numerically starting from the joints' initial values
    Implicit(SymMatrix),
}

#[derive(Debug, Clone)]
pub struct LoopSolution {
    pub name: String,
    /// Independent elementary joints
    pub u: Vec<String>,
    /// Eliminated elementary joints
    pub v: Vec<String>,
    pub closure: Closure,
    /// `∂v/∂u`
    pub bvu: SymMatrix,
    /// Acceleration bias, `v̈ = Bvu·ü + b′`
    pub b_prime: SymMatrix,
}

/// The closed set of loop types
#[derive(Debug, Clone)]
pub enum Loop {
    FourBar(FourBar),
    FourBarTrans(FourBarTrans),
    ThreeBarTrans(ThreeBarTrans),
    CrankSlider(CrankSlider),
    Steering(Steering),
    Transmission(Transmission),
    ExpJoint(ExpJoint),
    Hexapod(Hexapod),
    AxisOffsetHexapod(AxisOffsetHexapod),
}

impl Loop {
    /// Resolves the authored loop against the canonical tree and checks its structure
    pub fn new(def: &LoopDef, model: &CanonicalModel) -> Result<Loop, MarionetteError> {
        let name = def.name();
        let result = match def.kind().clone() {
            LoopKind::FourBar { a, b, posture } => Loop::FourBar(FourBar::new(name, a, b, posture, model)?),
            LoopKind::FourBarTrans { a, b } => Loop::FourBarTrans(FourBarTrans::new(name, a, b, model)?),
            LoopKind::ThreeBarTrans { a, b } => Loop::ThreeBarTrans(ThreeBarTrans::new(name, a, b, model)?),
            LoopKind::CrankSlider { a, b, posture } => Loop::CrankSlider(CrankSlider::new(name, a, b, posture, model)?),
            LoopKind::Steering { a, b, posture } => Loop::Steering(Steering::new(name, a, b, posture, model)?),
            LoopKind::Transmission { input, output, ratio } => {
                Loop::Transmission(Transmission::new(name, input, output, ratio, model)?)
            }
            LoopKind::ExpJoint { joint, expression } => Loop::ExpJoint(ExpJoint::new(name, joint, expression, model)?),
            LoopKind::Hexapod { platform, strut } => Loop::Hexapod(Hexapod::new(name, platform, strut, model)?),
            LoopKind::AxisOffsetHexapod { platform, strut } => {
                Loop::AxisOffsetHexapod(AxisOffsetHexapod::new(name, platform, strut, model)?)
            }
        };
        debug!(name, kind = def.kind().type_name(), "loop registered");
        Ok(result)
    }

    pub fn name(&self) -> &str {
        match self {
            Loop::FourBar(l) => l.name(),
            Loop::FourBarTrans(l) => l.name(),
            Loop::ThreeBarTrans(l) => l.name(),
            Loop::CrankSlider(l) => l.name(),
            Loop::Steering(l) => l.name(),
            Loop::Transmission(l) => l.name(),
            Loop::ExpJoint(l) => l.name(),
            Loop::Hexapod(l) => l.name(),
            Loop::AxisOffsetHexapod(l) => l.name(),
        }
    }

    /// The closure in terms of joint coordinates, without touching a graph
    pub fn solve(&self) -> Result<LoopSolution, MarionetteError> {
        match self {
            Loop::FourBar(l) => l.solve(),
            Loop::FourBarTrans(l) => l.solve(),
            Loop::ThreeBarTrans(l) => l.solve(),
            Loop::CrankSlider(l) => l.solve(),
            Loop::Steering(l) => l.solve(),
            Loop::Transmission(l) => l.solve(),
            Loop::ExpJoint(l) => l.solve(),
            Loop::Hexapod(l) => l.solve(),
            Loop::AxisOffsetHexapod(l) => l.solve(),
        }
    }

    /// Solves the loop and binds `Bvu_<loop>` and `b_prime_<loop>` in `graph`
    pub fn calc(&self, graph: &mut Graph, simplify: bool) -> Result<LoopSolution, MarionetteError> {
        let mut solution = self.solve()?;
        if simplify {
            solution.bvu = matrix::simplify(&solution.bvu);
            solution.b_prime = matrix::simplify(&solution.b_prime);
            solution.closure = match solution.closure {
                Closure::Explicit(v) => Closure::Explicit(matrix::simplify(&v)),
                Closure::Implicit(residual) => Closure::Implicit(matrix::simplify(&residual)),
            };
        }
        solution.bvu = graph.bind(&format!("Bvu_{}", solution.name), solution.bvu)?;
        solution.b_prime = graph.bind(&format!("b_prime_{}", solution.name), solution.b_prime)?;
        Ok(solution)
    }
}

/// Sorts loops so that each one follows the loops its independent coordinates come from.
/// A coordinate eliminated twice, or loops reading each other's coordinates, are structural errors.
pub fn order(solutions: Vec<LoopSolution>) -> Result<Vec<LoopSolution>, MarionetteError> {
    let mut owner: HashMap<&str, usize> = HashMap::new();
    for (i, solution) in solutions.iter().enumerate() {
        for v in &solution.v {
            if let Some(&other) = owner.get(v.as_str()) {
                return Err(MarionetteError::structural(
                    &solution.name,
                    format!("coordinate {} is already eliminated by loop {}", v, solutions[other].name),
                ));
            }
            owner.insert(v, i);
        }
    }
    let reads = solutions
        .iter()
        .map(|s| s.u.iter().filter_map(|u| owner.get(u.as_str()).copied()).unique().collect_vec())
        .collect_vec();

    let mut placed = vec![false; solutions.len()];
    let mut sequence = Vec::with_capacity(solutions.len());
    while sequence.len() < solutions.len() {
        let next = (0..solutions.len()).find(|&i| !placed[i] && reads[i].iter().all(|&k| placed[k]));
        match next {
            Some(i) => {
                placed[i] = true;
                sequence.push(i);
            }
            None => {
                let stuck = (0..solutions.len()).find(|&i| !placed[i]).unwrap_or_default();
                return Err(MarionetteError::structural(
                    &solutions[stuck].name,
                    "loops depend on each other's coordinates in a cycle",
                ));
            }
        }
    }
    let mut slots = solutions.into_iter().map(Some).collect_vec();
    Ok(sequence.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// `Bvu` and `b′` of an explicit closure by symbolic differentiation
pub(crate) fn explicit(
    name: &str,
    u: &[&ElementaryJoint],
    v: &[&ElementaryJoint],
    v_expr: SymMatrix,
) -> LoopSolution {
    let positions = symbols(u, 0);
    let rates = matrix::column(u.iter().map(|j| j.coordinate(1)));
    let bvu = matrix::jacobian(&v_expr, &positions);
    // d(Bvu)/dt·u̇ = ∂(Bvu·u̇)/∂u·u̇
    let b_prime = matvec(&matrix::jacobian(&matvec(&bvu, &rates), &positions), &rates);
    LoopSolution {
        name: name.to_string(),
        u: u.iter().map(|j| j.name.clone()).collect(),
        v: v.iter().map(|j| j.name.clone()).collect(),
        closure: Closure::Explicit(v_expr),
        bvu,
        b_prime,
    }
}

/// `Bvu = −Φv⁻¹·Φu` and `b′ = −Φv⁻¹·J̇q̇` of an implicit closure `Φ(u, v) = 0`
pub(crate) fn implicit(
    name: &str,
    u: &[&ElementaryJoint],
    v: &[&ElementaryJoint],
    residual: SymMatrix,
) -> Result<LoopSolution, MarionetteError> {
    if residual.len() != v.len() {
        return Err(MarionetteError::shape(name, v.len(), residual.len()));
    }
    let all = u.iter().chain(v.iter()).copied().collect_vec();
    let positions = symbols(&all, 0);
    let rates = matrix::column(all.iter().map(|j| j.coordinate(1)));
    let phi_u = matrix::jacobian(&residual, &symbols(u, 0));
    let phi_v = matrix::jacobian(&residual, &symbols(v, 0));
    let jacobian = matrix::hstack(&[phi_u.clone(), phi_v.clone()])?;
    let jdot_qdot = matvec(&matrix::jacobian(&matvec(&jacobian, &rates), &positions), &rates);

    let bvu = matrix::solve(&phi_v, &phi_u.mapv(|e| -e))?;
    let b_prime = matrix::solve(&phi_v, &jdot_qdot.mapv(|e| -e))?;
    Ok(LoopSolution {
        name: name.to_string(),
        u: u.iter().map(|j| j.name.clone()).collect(),
        v: v.iter().map(|j| j.name.clone()).collect(),
        closure: Closure::Implicit(residual),
        bvu,
        b_prime,
    })
}

fn symbols(joints: &[&ElementaryJoint], order: usize) -> Vec<Symbol> {
    joints
        .iter()
        .filter_map(|j| j.coordinate(order).as_symbol().cloned())
        .collect()
}

/// Product of a matrix and a column of matching height. Shapes are fixed by construction here.
fn matvec(a: &SymMatrix, x: &SymMatrix) -> SymMatrix {
    Array2::from_shape_fn((a.nrows(), 1), |(i, _)| {
        Expr::sum((0..a.ncols()).map(|k| &a[[i, k]] * &x[[k, 0]]).collect_vec())
    })
}

/// The elementary joint ending at `body`; a loop cannot cut at the inertial body
pub(crate) fn joint_above<'m>(
    model: &'m CanonicalModel,
    body: BodyId,
    entity: &str,
) -> Result<&'m ElementaryJoint, MarionetteError> {
    model.joint_of(body).ok_or_else(|| {
        MarionetteError::structural(entity, "a cut frame is attached to the inertial body")
    })
}

/// Joints from `body` up to, but excluding, `ancestor`, nearest first
pub(crate) fn chain_to<'m>(
    model: &'m CanonicalModel,
    body: BodyId,
    ancestor: BodyId,
    entity: &str,
) -> Result<Vec<&'m ElementaryJoint>, MarionetteError> {
    let mut chain = vec![];
    let mut current = model.resolve_body(body);
    while current != ancestor {
        let joint = joint_above(model, current, entity)?;
        chain.push(joint);
        current = joint.parent;
    }
    Ok(chain)
}

/// Nearest body both chains hang from
pub(crate) fn common_ancestor(
    model: &CanonicalModel,
    a: BodyId,
    b: BodyId,
    entity: &str,
) -> Result<BodyId, MarionetteError> {
    let above = |body: BodyId| -> Result<Vec<BodyId>, MarionetteError> {
        let mut bodies = vec![model.resolve_body(body)];
        for joint in model.path(body)?.iter().rev() {
            bodies.push(joint.parent);
        }
        Ok(bodies)
    };
    let from_b: HashSet<BodyId> = above(b)?.into_iter().collect();
    above(a)?
        .into_iter()
        .find(|body| from_b.contains(body))
        .ok_or_else(|| MarionetteError::structural(entity, "cut frames share no common body"))
}

pub(crate) fn require(condition: bool, entity: &str, reason: impl Into<String>) -> Result<(), MarionetteError> {
    if condition {
        Ok(())
    } else {
        Err(MarionetteError::structural(entity, reason))
    }
}

/// The joint frame must be aligned with its parent body
pub(crate) fn require_aligned(joint: &ElementaryJoint, entity: &str) -> Result<(), MarionetteError> {
    let identity = Array2::from_shape_fn((3, 3), |(i, j)| if i == j { 1.0 } else { 0.0 });
    require(
        matrix::is_literal(&matrix::simplify(&joint.rotation), &identity),
        entity,
        format!("joint {} must not rotate its frame", joint.name),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::symbolic::{evaluate_matrix, solve_implicit, Environment};
    use approx::assert_abs_diff_eq;

    const STEP: f64 = 1e-6;

    /// A unit-mass body
    pub(crate) fn link(system: &mut crate::model::System, name: &str) -> BodyId {
        system
            .add_body(name, 1.0, matrix::zeros(3, 1), matrix::identity(3))
            .unwrap()
    }

    /// A frame on `body` at `position`
    pub(crate) fn point(system: &mut crate::model::System, body: BodyId, position: [f64; 3]) -> crate::model::FrameId {
        let origin = system.origin(body).unwrap();
        system.add_frame(None, origin, matrix::numbers(&position), None).unwrap()
    }

    /// The single loop of `system`, solved
    pub(crate) fn solve_only(system: &crate::model::System) -> LoopSolution {
        let model = crate::canonical::Canonicalizer::new(system).finish().unwrap();
        Loop::new(&model.loops()[0], &model).unwrap().solve().unwrap()
    }

    fn solved(solution: &LoopSolution, env: &Environment) -> Environment {
        let mut env = env.clone();
        match &solution.closure {
            Closure::Explicit(v_expr) => {
                let values = evaluate_matrix(v_expr, &env).unwrap();
                for (name, value) in solution.v.iter().zip(values.iter()) {
                    env.set(&format!("q_{}", name), *value);
                }
            }
            Closure::Implicit(residual) => {
                let unknowns = solution.v.iter().map(|n| Symbol::new(&format!("q_{}", n))).collect_vec();
                solve_implicit(residual, &unknowns, &mut env, 50, 1e-12).unwrap();
            }
        }
        env
    }

    fn dependent(solution: &LoopSolution, env: &Environment) -> Vec<f64> {
        let env = solved(solution, env);
        solution
            .v
            .iter()
            .map(|n| env.get(&format!("q_{}", n)).unwrap())
            .collect()
    }

    /// Central differences of `v(u)` against `Bvu`, and of `Bvu(u(t))·u̇` against `b′`.
    /// `env` holds `q` and `qd` of every independent coordinate (and the initial guesses of
    /// implicit closures).
    pub(crate) fn assert_derivatives(solution: &LoopSolution, env: &Environment, epsilon: f64) {
        let mut at = solved(solution, env);
        let bvu = evaluate_matrix(&solution.bvu, &at).unwrap();
        let rates = solution
            .u
            .iter()
            .map(|n| at.get(&format!("qd_{}", n)).unwrap())
            .collect_vec();
        for (k, name) in solution.v.iter().enumerate() {
            let rate = (0..rates.len()).map(|j| bvu[[k, j]] * rates[j]).sum::<f64>();
            at.set(&format!("qd_{}", name), rate);
        }

        for (j, u) in solution.u.iter().enumerate() {
            let symbol = format!("q_{}", u);
            let value = env.get(&symbol).unwrap();
            let mut plus = at.clone();
            plus.set(&symbol, value + STEP);
            let mut minus = at.clone();
            minus.set(&symbol, value - STEP);
            let (vp, vm) = (dependent(solution, &plus), dependent(solution, &minus));
            for k in 0..solution.v.len() {
                assert_abs_diff_eq!(bvu[[k, j]], (vp[k] - vm[k]) / (2.0 * STEP), epsilon = epsilon);
            }
        }

        // move u along u̇ and difference the velocity map
        let shifted = |sign: f64| {
            let mut env = at.clone();
            for (u, rate) in solution.u.iter().zip(&rates) {
                let symbol = format!("q_{}", u);
                let value = at.get(&symbol).unwrap();
                env.set(&symbol, value + sign * STEP * rate);
            }
            let env = solved(solution, &env);
            evaluate_matrix(&solution.bvu, &env).unwrap()
        };
        let (bp, bm) = (shifted(1.0), shifted(-1.0));
        let b_prime = evaluate_matrix(&solution.b_prime, &at).unwrap();
        for k in 0..solution.v.len() {
            let expected = (0..rates.len())
                .map(|j| (bp[[k, j]] - bm[[k, j]]) / (2.0 * STEP) * rates[j])
                .sum::<f64>();
            assert_abs_diff_eq!(b_prime[[k, 0]], expected, epsilon = epsilon);
        }
    }

    fn solution(name: &str, u: &[&str], v: &[&str]) -> LoopSolution {
        LoopSolution {
            name: name.to_string(),
            u: u.iter().map(|s| s.to_string()).collect(),
            v: v.iter().map(|s| s.to_string()).collect(),
            closure: Closure::Explicit(matrix::zeros(v.len(), 1)),
            bvu: matrix::zeros(v.len(), u.len()),
            b_prime: matrix::zeros(v.len(), 1),
        }
    }

    #[test_log::test]
    fn test_order_chains_dependent_loops() {
        let loops = vec![
            solution("outer", &["b"], &["c"]),
            solution("inner", &["a"], &["b"]),
            solution("free", &["x"], &["y"]),
        ];
        let ordered = order(loops).unwrap();
        let names = ordered.iter().map(|s| s.name.as_str()).collect_vec();
        assert_eq!(names, ["inner", "outer", "free"]);
    }

    #[test_log::test]
    fn test_order_rejects_cycles_and_double_elimination() {
        let cyclic = vec![solution("one", &["b"], &["a"]), solution("two", &["a"], &["b"])];
        assert!(matches!(order(cyclic), Err(MarionetteError::Structural { .. })));

        let twice = vec![solution("one", &["x"], &["a"]), solution("two", &["y"], &["a"])];
        assert!(matches!(
            order(twice),
            Err(MarionetteError::Structural { entity, .. }) if entity == "two"
        ));
    }
}

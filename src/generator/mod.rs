//! Equation-of-motion generators.
//!
//! [System::generate] lowers the authored model into a [CanonicalModel], closes the loops and
//! emits the equations of motion into a [Graph] that is finally optimized into a
//! [FinalizedGraph]. All generators share the same phases:
//!
//! 1. user symbols (parameters, inputs and expressions),
//! 2. loop closures and the generalized coordinates `q`, `qd` and `qdd`,
//! 3. inertial kinematics of every body,
//! 4. load distribution and constraint rows,
//! 5. the dynamics proper, which is where [GeneratorKind]s differ,
//! 6. sensors.
//!
//! Coordinates eliminated by loops are expressed through the loop Jacobian
//! `q̈_all = J·q̈ + d`, so the dynamics are always stated in the independent coordinates.

mod constraints;
mod coordinates;
mod explicit;
mod kinematics;
mod loads;
mod order_n;
mod recursive;
mod sensors;
mod spatial;

use crate::canonical::{CanonicalModel, Canonicalizer};
use crate::config::GenerationConfig;
use crate::graph::{EquationOptions, FinalizedGraph, Graph, Shape, VarKind};
use crate::loops::{self, Loop, LoopSolution};
use crate::model::System;
use crate::symbolic::{matrix, SymMatrix};
use crate::MarionetteError;
use constraints::ConstraintRows;
use coordinates::Coordinates;
use itertools::Itertools;
use kinematics::{Accelerations, Kinematics};
use loads::AppliedLoads;
use num_traits::Zero;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument};

/// Formulation of the dynamics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneratorKind {
    /// Mass matrix by Jacobian projection, `M·q̈ = f − h`
    Explicit,
    /// Composite-rigid-body mass matrix and recursive Newton-Euler bias, `M·q̈ = f − h`
    Recursive,
    /// Articulated-body recursion, `q̈` without forming a mass matrix
    OrderN,
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeneratorKind::Explicit => "explicit",
            GeneratorKind::Recursive => "recursive",
            GeneratorKind::OrderN => "order_n",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for GeneratorKind {
    type Err = MarionetteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "explicit" => Ok(GeneratorKind::Explicit),
            "recursive" => Ok(GeneratorKind::Recursive),
            "order_n" | "ordern" => Ok(GeneratorKind::OrderN),
            other => Err(MarionetteError::Authoring(format!("unknown generator {}", other))),
        }
    }
}

/// State of one generation run. Created by [System::generate] and consumed by it.
pub struct GenerationContext<'c> {
    pub(crate) config: &'c GenerationConfig,
    pub(crate) model: CanonicalModel,
    pub(crate) graph: Graph,
    pub(crate) loops: Vec<LoopSolution>,
}

impl<'c> GenerationContext<'c> {
    fn new(model: CanonicalModel, config: &'c GenerationConfig) -> Result<Self, MarionetteError> {
        if model.len() < 2 {
            return Err(MarionetteError::structural("world", "the system has no moving body"));
        }
        if model.coordinates().is_empty() {
            return Err(MarionetteError::structural("world", "the system has no degree of freedom"));
        }
        Ok(GenerationContext {
            config,
            model,
            graph: Graph::new(),
            loops: vec![],
        })
    }

    /// Parameters, inputs and user expressions
    fn declare_symbols(&mut self) -> Result<(), MarionetteError> {
        for symbol in &self.model.symbols {
            match (symbol.kind, &symbol.value) {
                (VarKind::Parameter | VarKind::Input | VarKind::Constant, _) => {
                    self.graph
                        .declare_variable(&symbol.name, symbol.shape, symbol.kind, symbol.initial.clone())?;
                }
                (kind, Some(value)) => {
                    self.graph.add_equation(
                        symbol.name.as_str(),
                        value.clone(),
                        EquationOptions::kind(kind).with_shape(symbol.shape),
                    )?;
                }
                (kind, None) => {
                    return Err(MarionetteError::Authoring(format!(
                        "{:?} symbol {} has no value",
                        kind, symbol.name
                    )))
                }
            }
        }
        debug!(symbols = self.model.symbols.len(), "declared user symbols");
        Ok(())
    }

    fn close_loops(&mut self) -> Result<(), MarionetteError> {
        let built = self
            .model
            .loops()
            .iter()
            .map(|def| Loop::new(def, &self.model))
            .collect::<Result<Vec<_>, _>>()?;
        let solutions = built
            .iter()
            .map(|l| l.calc(&mut self.graph, self.config.simplify))
            .collect::<Result<Vec<_>, _>>()?;
        self.loops = loops::order(solutions)?;
        debug!(loops = %self.loops.iter().map(|l| l.name.as_str()).join(", "), "closed loops");
        Ok(())
    }

    /// Applies the simplifier when the configuration asks for it
    pub(crate) fn tidy(&self, value: SymMatrix) -> SymMatrix {
        if self.config.simplify {
            matrix::simplify(&value)
        } else {
            value
        }
    }

    /// Binds `value` as an intermediate, simplified first when configured
    pub(crate) fn bind(&mut self, name: &str, value: SymMatrix) -> Result<SymMatrix, MarionetteError> {
        let value = self.tidy(value);
        self.graph.bind(name, value)
    }

    /// Emits `name := value` even for literal values and returns the element symbols, so that
    /// the variable stays referenced through graph optimization
    pub(crate) fn publish(&mut self, name: &str, value: SymMatrix, shape: Shape) -> Result<SymMatrix, MarionetteError> {
        let options = EquationOptions::default().with_shape(shape);
        Ok(self.graph.add_equation(name, value, options)?.expr())
    }
}

/// `M`, `h` and `f` in independent coordinates, as produced by the mass-matrix generators
pub(crate) struct Dynamics {
    pub mass: SymMatrix,
    pub bias: SymMatrix,
    pub force: SymMatrix,
}

impl Dynamics {
    /// Emits `M`, `h` and `f` and solves for `qdd`, together with the constraint multipliers
    /// through `[[M, −Gᵀ], [G, 0]]` when there are constraints.
    pub(crate) fn solve(
        self,
        context: &mut GenerationContext,
        coordinates: &Coordinates,
        constraints: &ConstraintRows,
        kinematics: &Kinematics,
        drift: Option<&Accelerations>,
    ) -> Result<(), MarionetteError> {
        let mass = context.tidy(self.mass);
        if mass.dim() == (1, 1) && mass[[0, 0]].is_zero() {
            return Err(MarionetteError::NumericDegeneracy(
                "mass matrix is identically zero".to_string(),
            ));
        }
        let n = coordinates.independent.len();
        let mass = context.publish("M", mass, Shape::Matrix(n, n))?;
        let bias = context.tidy(self.bias);
        let bias = context.publish("h", bias, Shape::Vector(n))?;
        let force = context.tidy(self.force);
        let force = context.publish("f", force, Shape::Vector(n))?;
        let rhs = &force - &bias;

        if constraints.is_empty() {
            let qdd = matrix::solve(&mass, &rhs)?;
            context.graph.add_equation(&coordinates.qdd, qdd, EquationOptions::default())?;
            return Ok(());
        }

        let drift = drift.ok_or_else(|| {
            MarionetteError::Authoring("constraint bias needs the drift accelerations".to_string())
        })?;
        let g_full = constraints.jacobian();
        let g = coordinates.project(g_full)?;
        let g = context.bind("G", g)?;
        let gdqd = constraints.relative_acceleration(kinematics, drift)?;
        let gdqd = context.bind("Gdqd", gdqd)?;
        let m = constraints.len();
        let augmented = matrix::block(&[
            vec![mass, matrix::transpose(&g).mapv(|e| -e)],
            vec![g, matrix::zeros(m, m)],
        ])?;
        let rhs = matrix::vstack(&[rhs, gdqd.mapv(|e| -e)])?;
        let solution = matrix::solve(&augmented, &rhs)?;
        let mut lhs = vec![coordinates.qdd.clone()];
        lhs.extend(constraints.multipliers().iter().cloned());
        context.graph.add_stacked_equation(&lhs, solution, false)
    }
}

impl System {
    /// Generates the equations of motion of this system.
    ///
    /// The returned graph holds the states `q` and `qd` with their derivatives `der_q` and
    /// `der_qd`, the generalized accelerations `qdd`, the constraint residuals and
    /// multipliers, user expressions and sensors. Each call works on its own
    /// [GenerationContext]: the system itself is not modified.
    #[instrument(skip(self, config))]
    pub fn generate(&self, kind: GeneratorKind, config: &GenerationConfig) -> Result<FinalizedGraph, MarionetteError> {
        config.validate()?;
        let model = Canonicalizer::new(self).finish()?;
        let mut context = GenerationContext::new(model, config)?;
        context.declare_symbols()?;
        context.close_loops()?;

        let coordinates = Coordinates::declare(&mut context)?;
        let kinematics = Kinematics::new(&mut context, &coordinates)?;
        let loads = AppliedLoads::new(&mut context, &coordinates, &kinematics)?;
        let constraints = ConstraintRows::new(&mut context, &kinematics)?;

        let reads_accelerations = context.model.sensors().iter().any(|s| s.needs_acceleration())
            || (!constraints.is_empty() && config.differentiation_order.contains(&2));
        let accelerations = if reads_accelerations {
            Some(kinematics.accelerations(&mut context, &coordinates.accelerations(), "")?)
        } else {
            None
        };
        constraints.emit_residuals(&mut context, &coordinates, &kinematics, accelerations.as_ref())?;

        if config.kinematics_only {
            debug!("kinematics only, dynamics skipped");
        } else {
            match kind {
                GeneratorKind::Explicit => {
                    explicit::generate(&mut context, &coordinates, &kinematics, &loads, &constraints)?
                }
                GeneratorKind::Recursive => {
                    recursive::generate(&mut context, &coordinates, &kinematics, &loads, &constraints)?
                }
                GeneratorKind::OrderN => {
                    order_n::generate(&mut context, &coordinates, &kinematics, &loads, &constraints)?
                }
            }
        }
        sensors::emit(&mut context, &kinematics, &constraints, accelerations.as_ref())?;

        let graph = context.graph.build(config.graph_optimize)?;
        info!(
            %kind,
            coordinates = coordinates.independent.len(),
            eliminated = coordinates.len() - coordinates.independent.len(),
            equations = graph.equations().len(),
            "generated equations of motion"
        );
        Ok(graph)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{BodyId, Dof, FrameId};
    use crate::symbolic::{Environment, Expr};
    use approx::assert_abs_diff_eq;

    pub(crate) const KINDS: [GeneratorKind; 3] = [GeneratorKind::Explicit, GeneratorKind::Recursive, GeneratorKind::OrderN];

    /// Rod of mass 2 hanging 0.5 below a revolute joint about z, gravity along −y
    pub(crate) fn pendulum() -> System {
        let mut system = System::new();
        let world = system.world();
        system.set_gravity(matrix::numbers(&[0.0, -9.81, 0.0])).unwrap();
        let mut inertia = matrix::zeros(3, 3);
        inertia[[2, 2]] = Expr::number(0.1);
        let rod = system
            .add_body("rod", 2.0, matrix::numbers(&[0.0, -0.5, 0.0]), inertia)
            .unwrap();
        let pivot = system.origin(world).unwrap();
        let joint = system.add_joint("swing", pivot, rod, &[Dof::Rz]).unwrap();
        system.set_initial(joint, &[0.3], &[0.0]).unwrap();
        system
    }

    pub(crate) fn double_pendulum() -> (System, BodyId, FrameId) {
        let mut system = System::new();
        let world = system.world();
        system.set_gravity(matrix::numbers(&[0.0, -9.81, 0.0])).unwrap();
        let inertia = |ixx: f64, iyy: f64, izz: f64| {
            let mut i = matrix::zeros(3, 3);
            i[[0, 0]] = Expr::number(ixx);
            i[[1, 1]] = Expr::number(iyy);
            i[[2, 2]] = Expr::number(izz);
            i
        };
        let upper = system
            .add_body("upper", 1.5, matrix::numbers(&[0.3, 0.0, 0.0]), inertia(0.01, 0.05, 0.06))
            .unwrap();
        let lower = system
            .add_body("lower", 0.8, matrix::numbers(&[0.2, 0.05, 0.0]), inertia(0.02, 0.03, 0.04))
            .unwrap();
        let pivot = system.origin(world).unwrap();
        let shoulder = system.add_joint("shoulder", pivot, upper, &[Dof::Rz]).unwrap();
        let elbow_frame = system
            .add_frame("elbow_frame", system.origin(upper).unwrap(), matrix::numbers(&[0.6, 0.0, 0.0]), None)
            .unwrap();
        let elbow = system.add_joint("elbow", elbow_frame, lower, &[Dof::Rz, Dof::Ry]).unwrap();
        system.set_initial(shoulder, &[0.4], &[1.2]).unwrap();
        system.set_initial(elbow, &[-0.7, 0.3], &[0.5, -0.9]).unwrap();
        (system, lower, elbow_frame)
    }

    pub(crate) fn accelerations(system: &System, kind: GeneratorKind) -> Vec<f64> {
        let graph = system.generate(kind, &GenerationConfig::default()).unwrap();
        let env = graph.evaluate(&Environment::new()).unwrap();
        let n = graph.variable("qdd").unwrap().shape().len();
        env.vector("qdd", n).unwrap()
    }

    #[test_log::test]
    fn test_generator_kind_parses() {
        assert_eq!("Explicit".parse::<GeneratorKind>().unwrap(), GeneratorKind::Explicit);
        assert_eq!("order_n".parse::<GeneratorKind>().unwrap(), GeneratorKind::OrderN);
        assert_eq!(GeneratorKind::Recursive.to_string(), "recursive");
        assert!("lagrange".parse::<GeneratorKind>().is_err());
    }

    #[test_log::test]
    fn test_pendulum_in_every_formulation() {
        let system = pendulum();
        let expected = -2.0 * 9.81 * 0.5 * (0.3f64).sin() / (0.1 + 2.0 * 0.25);
        for kind in KINDS {
            let qdd = accelerations(&system, kind);
            assert_eq!(qdd.len(), 1);
            assert_abs_diff_eq!(qdd[0], expected, epsilon = 1e-10);
        }
    }

    #[test_log::test]
    fn test_mass_matrix_and_bias_are_published() {
        let system = pendulum();
        for kind in [GeneratorKind::Explicit, GeneratorKind::Recursive] {
            let graph = system.generate(kind, &GenerationConfig::default()).unwrap();
            let env = graph.evaluate(&Environment::new()).unwrap();
            assert_abs_diff_eq!(env.matrix("M", 1, 1).unwrap()[[0, 0]], 0.6, epsilon = 1e-12);
            assert_abs_diff_eq!(env.vector("h", 1).unwrap()[0], 2.0 * 9.81 * 0.5 * (0.3f64).sin(), epsilon = 1e-12);
            assert_abs_diff_eq!(env.vector("f", 1).unwrap()[0], 0.0);
        }
    }

    #[test_log::test]
    fn test_formulations_agree_on_a_spatial_chain() {
        let (system, ..) = double_pendulum();
        let reference = accelerations(&system, GeneratorKind::Explicit);
        assert_eq!(reference.len(), 3);
        for kind in [GeneratorKind::Recursive, GeneratorKind::OrderN] {
            let qdd = accelerations(&system, kind);
            for (a, b) in qdd.iter().zip(reference.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-9);
            }
        }
    }

    #[test_log::test]
    fn test_loads_agree_across_formulations() {
        let (mut system, lower, elbow_frame) = double_pendulum();
        let tip = system
            .add_frame("tip", system.origin(lower).unwrap(), matrix::numbers(&[0.4, 0.0, 0.1]), None)
            .unwrap();
        let world = system.origin(system.world()).unwrap();
        system
            .add_cmp_force("push", world, tip, matrix::numbers(&[1.0, -2.0, 0.5]), None)
            .unwrap();
        system
            .add_cmp_torque("twist", elbow_frame, tip, matrix::numbers(&[0.0, 0.3, -0.2]), Some(tip))
            .unwrap();
        system.add_ptp_force("spring", world, tip, Expr::number(3.0)).unwrap();
        let shoulder = system.joint_by_name("shoulder").unwrap();
        system.add_joint_load("motor", shoulder, matrix::numbers(&[0.7])).unwrap();

        let reference = accelerations(&system, GeneratorKind::Explicit);
        for kind in [GeneratorKind::Recursive, GeneratorKind::OrderN] {
            let qdd = accelerations(&system, kind);
            for (a, b) in qdd.iter().zip(reference.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-9);
            }
        }
    }

    #[test_log::test]
    fn test_kinematics_only_takes_accelerations_as_input() {
        let system = pendulum();
        let config = GenerationConfig::default().with_kinematics_only(true);
        let graph = system.generate(GeneratorKind::Explicit, &config).unwrap();
        let qdd = graph.variable("qdd").unwrap();
        assert_eq!(qdd.kind(), VarKind::Input);
        assert_eq!(qdd.shape(), Shape::Vector(1));
        assert!(graph.equation("M").is_none());
        let mut env = Environment::new();
        env.set_vector("qdd", &[1.5]);
        let env = graph.evaluate(&env).unwrap();
        assert_abs_diff_eq!(env.vector("der_qd", 1).unwrap()[0], 1.5);
    }

    #[test_log::test]
    fn test_states_and_derivatives() {
        let system = pendulum();
        let graph = system.generate(GeneratorKind::Explicit, &GenerationConfig::default()).unwrap();
        assert_eq!(graph.variable("q").unwrap().kind(), VarKind::State);
        assert_eq!(graph.variable("qd").unwrap().kind(), VarKind::State);
        assert_eq!(graph.query_by_kind(VarKind::DerState).len(), 2);
        let env = graph.evaluate(&Environment::new()).unwrap();
        assert_abs_diff_eq!(env.vector("q", 1).unwrap()[0], 0.3);
        assert_abs_diff_eq!(env.vector("der_q", 1).unwrap()[0], 0.0);
    }

    #[test_log::test]
    fn test_massless_chain_is_degenerate() {
        let mut system = System::new();
        let world = system.world();
        let ghost = system.add_body("ghost", 0.0, matrix::zeros(3, 1), matrix::zeros(3, 3)).unwrap();
        let pivot = system.origin(world).unwrap();
        system.add_joint("hinge", pivot, ghost, &[Dof::Rz]).unwrap();
        for kind in KINDS {
            assert!(matches!(
                system.generate(kind, &GenerationConfig::default()),
                Err(MarionetteError::NumericDegeneracy(_))
            ));
        }
    }

    #[test_log::test]
    fn test_empty_system_is_structural() {
        let system = System::new();
        assert!(matches!(
            system.generate(GeneratorKind::Explicit, &GenerationConfig::default()),
            Err(MarionetteError::Structural { .. })
        ));
    }

    #[test_log::test]
    fn test_invalid_config_is_rejected() {
        let system = pendulum();
        let config = GenerationConfig::default().with_differentiation_order([4]);
        assert!(matches!(
            system.generate(GeneratorKind::Explicit, &config),
            Err(MarionetteError::Authoring(_))
        ));
    }
}

//! ## About
//!
//! **Warning: still under heavy development**
//!
//! This crate compiles a declarative description of a rigid multibody system (bodies, joints,
//! loads, sensors, constraints and kinematic loops) into symbolic equations of motion. The
//! result is a [FinalizedGraph] of shaped, kind-tagged variables and ordered assignments that
//! downstream code generators, integrators and visualizers consume.
//!
//! See the [System] struct to get started:
//!
//! ```no_run
//! use marionette::{symbolic::matrix, Dof, GenerationConfig, GeneratorKind, System};
//!
//! let mut system = System::new();
//! system.set_gravity(matrix::numbers(&[0.0, -9.81, 0.0])).unwrap();
//! let rod = system
//!     .add_body("rod", 1.0, matrix::numbers(&[0.0, -0.5, 0.0]), matrix::identity(3))
//!     .unwrap();
//! let pivot = system.origin(system.world()).unwrap();
//! system.add_joint("swing", pivot, rod, &[Dof::Rz]).unwrap();
//! let graph = system
//!     .generate(GeneratorKind::Recursive, &GenerationConfig::default())
//!     .unwrap();
//! ```
//!
//! ## Pipeline
//!
//! [System] → [Canonicalizer] → loop closures ([loops]) and one [GeneratorKind], both driving a
//! [Graph] → [FinalizedGraph].
//!
//! ## Reading list
//!
//! * [Rigid Body Dynamics Algorithms](https://doi.org/10.1007/978-1-4899-7560-7) (Featherstone)
//! * [Dynamics of Multibody Systems](https://doi.org/10.1017/CBO9780511546358) (Shabana)
//!
//! ## Naming conventions
//! * Structs – substantives that indicate entities implementing a behavior
//! * Methods – imperative forms with the exception of getters and factories, which
//!             are uses substantives (i.e., omit a `get_` prefix) much like the standard library.
//! * Generated variables – `q_<joint>`, `qd_<joint>` and `qdd_<joint>` for coordinates,
//!             `<quantity>_<entity>` for intermediates

pub mod arena;
pub mod canonical;
pub mod config;
pub mod errors;
pub mod generator;
pub mod graph;
pub mod loops;
pub mod modal;
pub mod model;
pub mod symbolic;

pub use canonical::{CanonicalModel, Canonicalizer};
pub use config::GenerationConfig;
pub use errors::MarionetteError;
pub use generator::GeneratorKind;
pub use graph::{EquationOptions, FinalizedGraph, Graph, Shape, VarKind, Variable};
pub use modal::{ModalData, ModalNode, Taylor};
pub use model::{
    BodyId, ConstraintId, Dof, FrameId, JointId, LoadId, LoopId, LoopKind, SensorId, SensorKind, System,
};

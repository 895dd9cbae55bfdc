//! Minimal symbolic capability: expressions, differentiation, shaped values and numeric evaluation.
//!
//! This is not a computer algebra system. It provides exactly what the equation generators
//! consume: construction with constant folding, an optional like-term [Expr::simplify],
//! partial and total derivatives, linear-solve nodes and evaluation.

mod diff;
mod eval;
mod expr;
pub mod matrix;
mod rewrite;
mod simplify;

pub use eval::{evaluate_matrix, solve_implicit, Environment};
pub use expr::{Component, Expr, Function, LinearSystem, Symbol};
pub use matrix::SymMatrix;

pub(crate) use expr::Node;

//! Provides the error type used throughout this crate.
//!
//! Every error is final: the compiler runs once per call and the caller decides whether
//! to abort or to re-author the model.

use thiserror::Error;

/// The error type used throughout this crate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarionetteError {
    /// Invalid axis, shape, name or value passed to a creation call
    #[error("Authoring error: {0}")]
    Authoring(String),
    /// A model invariant is violated. Carries the name of the offending entity
    #[error("Structural error in '{entity}': {reason}")]
    Structural { entity: String, reason: String },
    /// Malformed external modal data. Carries the offending field
    #[error("Malformed modal data in field '{field}': {reason}")]
    Format { field: String, reason: String },
    /// Near-zero pivot, singular system or domain error
    #[error("Numeric degeneracy: {0}")]
    NumericDegeneracy(String),
    #[error("Name already in use: {0}")]
    NameCollision(String),
    #[error("Shape mismatch for '{name}': expected {expected}, found {found}")]
    ShapeMismatch { name: String, expected: String, found: String },
    #[error("Cyclic dependency involving '{0}'")]
    CyclicDependency(String),
    #[error("Joint already merged: {0}")]
    AlreadyMerged(String),
}

impl MarionetteError {
    pub(crate) fn structural(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        MarionetteError::Structural {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(name: impl Into<String>, expected: impl ToString, found: impl ToString) -> Self {
        MarionetteError::ShapeMismatch {
            name: name.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

//! Spatial (6D) vector algebra in Plücker coordinates about the world origin.
//!
//! Motion vectors are `[ω; v_O]`, where `v_O` is the velocity of the body point currently at
//! the world origin. Force vectors are `[n_O; f]` with the moment taken about the origin.

use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;

/// Motion subspace of an elementary joint with world `axis` located at `pivot`
pub(super) fn motion_axis(axis: &SymMatrix, pivot: &SymMatrix, rotational: bool) -> Result<SymMatrix, MarionetteError> {
    if rotational {
        matrix::vstack(&[axis.clone(), matrix::cross(pivot, axis)?])
    } else {
        matrix::vstack(&[matrix::zeros(3, 1), axis.clone()])
    }
}

/// Spatial inertia about the origin of a body with mass `mass`, world center of gravity `cg`
/// and world inertia `inertia` about the center of gravity
pub(super) fn inertia(mass: &Expr, cg: &SymMatrix, inertia: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
    let c = matrix::skew(cg)?;
    let ct = matrix::transpose(&c);
    let m = |value: &SymMatrix| value.mapv(|e| e * mass);
    let rotational = inertia + &m(&matrix::matmul(&c, &ct)?);
    matrix::block(&[vec![rotational, m(&c)], vec![m(&ct), m(&matrix::identity(3))]])
}

fn halves(v: &SymMatrix) -> (SymMatrix, SymMatrix) {
    let entries = matrix::entries(v);
    (
        matrix::column(entries[..3].iter().cloned()),
        matrix::column(entries[3..].iter().cloned()),
    )
}

/// `v×` acting on motion vectors
pub(super) fn cross_motion(v: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
    let (w, u) = halves(v);
    let (wx, ux) = (matrix::skew(&w)?, matrix::skew(&u)?);
    matrix::block(&[vec![wx.clone(), matrix::zeros(3, 3)], vec![ux, wx]])
}

/// `v×*` acting on force vectors
pub(super) fn cross_force(v: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
    let (w, u) = halves(v);
    let (wx, ux) = (matrix::skew(&w)?, matrix::skew(&u)?);
    matrix::block(&[vec![wx.clone(), ux], vec![matrix::zeros(3, 3), wx]])
}

/// Force vector of `force` acting at `point` plus a free `torque`
pub(super) fn wrench(point: &SymMatrix, force: &SymMatrix, torque: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
    let moment = &matrix::cross(point, force)? + torque;
    matrix::vstack(&[moment, force.clone()])
}

/// Spatial motion vector from angular and linear parts
pub(super) fn motion(angular: &SymMatrix, linear: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
    matrix::vstack(&[angular.clone(), linear.clone()])
}

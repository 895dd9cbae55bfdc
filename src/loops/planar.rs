//! In-plane geometry of the planar linkages.

use crate::model::Dof;
use crate::symbolic::{Expr, SymMatrix};
use num_traits::{One, Zero};

/// A vector in the plane of motion
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Vec2 {
    pub x: Expr,
    pub y: Expr,
}

impl Vec2 {
    pub fn new(x: Expr, y: Expr) -> Self {
        Vec2 { x, y }
    }

    /// `length·(cos angle, sin angle)`
    #[cfg(test)]
    pub fn polar(length: &Expr, angle: &Expr) -> Self {
        Vec2::new(length * angle.cos(), length * angle.sin())
    }

    pub fn add(&self, other: &Vec2) -> Vec2 {
        Vec2::new(&self.x + &other.x, &self.y + &other.y)
    }

    pub fn sub(&self, other: &Vec2) -> Vec2 {
        Vec2::new(&self.x - &other.x, &self.y - &other.y)
    }

    pub fn scale(&self, factor: &Expr) -> Vec2 {
        Vec2::new(&self.x * factor, &self.y * factor)
    }

    pub fn dot(&self, other: &Vec2) -> Expr {
        &self.x * &other.x + &self.y * &other.y
    }

    pub fn norm(&self) -> Expr {
        self.dot(self).sqrt()
    }

    pub fn angle(&self) -> Expr {
        Expr::atan2(&self.y, &self.x)
    }

    /// Counter-clockwise by `angle`
    pub fn rotate(&self, angle: &Expr) -> Vec2 {
        let (c, s) = (angle.cos(), angle.sin());
        Vec2::new(&c * &self.x - &s * &self.y, &s * &self.x + &c * &self.y)
    }

    /// Rotated by a quarter turn
    pub fn perp(&self) -> Vec2 {
        Vec2::new(-&self.y, self.x.clone())
    }

    pub fn is_zero(&self) -> bool {
        self.x.simplify().is_zero() && self.y.simplify().is_zero()
    }
}

/// The plane normal to a rotation axis. In-plane coordinates `(i, j)` are ordered so that a
/// positive rotation about the normal turns `i` into `j`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Plane {
    normal: usize,
    i: usize,
    j: usize,
}

impl Plane {
    /// `None` for translational degrees of freedom
    pub fn about(dof: Dof) -> Option<Plane> {
        if !dof.is_rotational() {
            return None;
        }
        Some(match dof.axis() {
            0 => Plane { normal: 0, i: 1, j: 2 },
            1 => Plane { normal: 1, i: 2, j: 0 },
            _ => Plane { normal: 2, i: 0, j: 1 },
        })
    }

    pub fn project(&self, p: &SymMatrix) -> Vec2 {
        Vec2::new(p[[self.i, 0]].clone(), p[[self.j, 0]].clone())
    }

    /// Coordinate along the normal
    pub fn height(&self, p: &SymMatrix) -> Expr {
        p[[self.normal, 0]].clone()
    }

    /// In-plane unit direction of a sliding degree of freedom, `None` unless it slides
    /// within the plane
    pub fn direction(&self, dof: Dof) -> Option<Vec2> {
        if dof.is_rotational() || dof.axis() == self.normal {
            return None;
        }
        Some(if dof.axis() == self.i {
            Vec2::new(Expr::one(), Expr::zero())
        } else {
            Vec2::new(Expr::zero(), Expr::one())
        })
    }
}

/// Solves `p + m·e(φ) + n·e(ψ) = q` for the link angles `(φ, ψ)`. `posture` picks the sign of
/// the relative angle `ψ − φ`.
pub(crate) fn two_link(p: &Vec2, q: &Vec2, m: &Expr, n: &Expr, posture: i8) -> (Expr, Expr) {
    let delta = q.sub(p);
    let cosine = (delta.dot(&delta) - m * m - n * n) / (2.0 * m * n);
    let relative = f64::from(posture) * cosine.acos();
    let phi = delta.angle() - Expr::atan2(&(n * relative.sin()), &(m + n * relative.cos()));
    let psi = &phi + &relative;
    (phi, psi)
}

/// A body turning about `pivot` carries a slider with unit direction `axis` whose point sits at
/// `offset + s·axis` in the turning body. Returns the stroke `s` and the turning angle that put
/// the point onto `target`.
pub(crate) fn slider(pivot: &Vec2, target: &Vec2, axis: &Vec2, offset: &Vec2) -> (Expr, Expr) {
    let reach = target.sub(pivot);
    let along = offset.dot(axis);
    let across = offset.dot(&axis.perp());
    let stroke = (reach.dot(&reach) - &across * &across).sqrt() - &along;
    let angle = reach.angle() - axis.angle() - Expr::atan2(&across, &(&stroke + &along));
    (stroke, angle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::{matrix, Environment};
    use approx::assert_abs_diff_eq;

    fn eval(v: &Vec2) -> (f64, f64) {
        let env = Environment::new();
        (v.x.evaluate(&env).unwrap(), v.y.evaluate(&env).unwrap())
    }

    fn point(x: f64, y: f64) -> Vec2 {
        Vec2::new(Expr::number(x), Expr::number(y))
    }

    #[test_log::test]
    fn test_two_link_closes_for_both_postures() {
        let (p, q) = (point(0.3, -0.2), point(1.4, 0.9));
        let (m, n) = (Expr::number(1.0), Expr::number(0.8));
        for posture in [1, -1] {
            let (phi, psi) = two_link(&p, &q, &m, &n, posture);
            let reached = p.add(&Vec2::polar(&m, &phi)).add(&Vec2::polar(&n, &psi));
            let (x, y) = eval(&reached);
            assert_abs_diff_eq!(x, 1.4, epsilon = 1e-12);
            assert_abs_diff_eq!(y, 0.9, epsilon = 1e-12);
        }
    }

    #[test_log::test]
    fn test_slider_with_offset() {
        let (pivot, target) = (point(0.0, 0.0), point(0.4, 1.1));
        let axis = point(1.0, 0.0);
        let offset = point(0.1, 0.2);
        let (stroke, angle) = slider(&pivot, &target, &axis, &offset);
        let reached = offset.add(&axis.scale(&stroke)).rotate(&angle);
        let (x, y) = eval(&reached);
        assert_abs_diff_eq!(x, 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(y, 1.1, epsilon = 1e-12);
    }

    #[test_log::test]
    fn test_plane_orientation() {
        // a quarter turn about each axis maps the first in-plane axis onto the second
        for dof in [Dof::Rx, Dof::Ry, Dof::Rz] {
            let plane = Plane::about(dof).unwrap();
            let turned = matrix::matmul(
                &matrix::rotation(dof.axis(), &Expr::number(std::f64::consts::FRAC_PI_2)),
                &matrix::numbers(&[1.0, 1.0, 1.0]),
            )
            .unwrap();
            let (x, y) = eval(&plane.project(&turned));
            assert_abs_diff_eq!(x, -1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(y, 1.0, epsilon = 1e-12);
        }
        assert!(Plane::about(Dof::Tx).is_none());
        assert!(Plane::about(Dof::Rz).unwrap().direction(Dof::Tz).is_none());
    }
}

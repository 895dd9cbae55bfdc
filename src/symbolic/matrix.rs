//! Shaped symbolic values. Scalars, vectors and matrices are all `Array2<Expr>`: a scalar is
//! `1×1`, a vector is a column `n×1`.
//!
//! `ndarray`'s `dot` requires `Copy` elements, so products are spelled out here.

use super::diff::Differentiator;
use super::expr::{Expr, LinearSystem, Symbol};
use crate::MarionetteError;
use itertools::Itertools;
use ndarray::{s, Array2};
use num_traits::{One, Zero};
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

pub type SymMatrix = Array2<Expr>;

pub fn scalar(value: impl Into<Expr>) -> SymMatrix {
    Array2::from_elem((1, 1), value.into())
}

/// Column vector
pub fn column(entries: impl IntoIterator<Item = Expr>) -> SymMatrix {
    let entries = entries.into_iter().collect_vec();
    let n = entries.len();
    Array2::from_shape_vec((n, 1), entries).unwrap_or_else(|_| Array2::zeros((0, 1)))
}

/// Column vector of literals
pub fn numbers(values: &[f64]) -> SymMatrix {
    column(values.iter().map(|&v| Expr::number(v)))
}

pub fn from_rows(rows: Vec<Vec<Expr>>) -> Result<SymMatrix, MarionetteError> {
    let n = rows.len();
    let m = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = rows.iter().find(|row| row.len() != m) {
        return Err(MarionetteError::shape("row", m, bad.len()));
    }
    Array2::from_shape_vec((n, m), rows.into_iter().flatten().collect_vec())
        .map_err(|e| MarionetteError::Authoring(e.to_string()))
}

pub fn zeros(rows: usize, cols: usize) -> SymMatrix {
    Array2::zeros((rows, cols))
}

pub fn identity(n: usize) -> SymMatrix {
    Array2::from_shape_fn((n, n), |(i, j)| if i == j { Expr::one() } else { Expr::zero() })
}

/// Rows of a vector-like value (`n×1` or `1×n`) as a flat list
pub fn entries(value: &SymMatrix) -> Vec<Expr> {
    value.iter().cloned().collect_vec()
}

fn check_vector(name: &str, value: &SymMatrix, len: usize) -> Result<(), MarionetteError> {
    let (rows, cols) = value.dim();
    if rows * cols != len || (rows != 1 && cols != 1) {
        return Err(MarionetteError::shape(name, format!("({},)", len), format!("({}, {})", rows, cols)));
    }
    Ok(())
}

pub fn matmul(a: &SymMatrix, b: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
    let (n, k) = a.dim();
    let (k2, m) = b.dim();
    if k != k2 {
        return Err(MarionetteError::shape(
            "matmul",
            format!("({}, _)", k),
            format!("({}, {})", k2, m),
        ));
    }
    Ok(Array2::from_shape_fn((n, m), |(i, j)| {
        Expr::sum((0..k).map(|l| &a[[i, l]] * &b[[l, j]]).collect_vec())
    }))
}

pub fn transpose(a: &SymMatrix) -> SymMatrix {
    a.t().to_owned()
}

/// `aᵀ·b` of two vectors
pub fn dot(a: &SymMatrix, b: &SymMatrix) -> Result<Expr, MarionetteError> {
    if a.len() != b.len() {
        return Err(MarionetteError::shape("dot", a.len(), b.len()));
    }
    Ok(Expr::sum(a.iter().zip(b.iter()).map(|(x, y)| x * y).collect_vec()))
}

pub fn norm(v: &SymMatrix) -> Expr {
    Expr::sum(v.iter().map(|x| x * x).collect_vec()).sqrt()
}

/// Cross-product matrix `ṽ` with `ṽ·w = v × w`
pub fn skew(v: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
    check_vector("skew", v, 3)?;
    let v = entries(v);
    let z = Expr::zero();
    from_rows(vec![
        vec![z.clone(), -&v[2], v[1].clone()],
        vec![v[2].clone(), z.clone(), -&v[0]],
        vec![-&v[1], v[0].clone(), z],
    ])
}

pub fn cross(a: &SymMatrix, b: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
    check_vector("cross", a, 3)?;
    check_vector("cross", b, 3)?;
    let (a, b) = (entries(a), entries(b));
    Ok(column([
        &a[1] * &b[2] - &a[2] * &b[1],
        &a[2] * &b[0] - &a[0] * &b[2],
        &a[0] * &b[1] - &a[1] * &b[0],
    ]))
}

/// Assembles a block matrix. Block rows must agree in height, block columns in width.
pub fn block(rows: &[Vec<SymMatrix>]) -> Result<SymMatrix, MarionetteError> {
    let stacked = rows.iter().map(|row| hstack(row)).collect::<Result<Vec<_>, _>>()?;
    vstack(&stacked)
}

pub fn vstack(parts: &[SymMatrix]) -> Result<SymMatrix, MarionetteError> {
    let cols = parts.iter().map(|p| p.ncols()).find(|&c| c > 0).unwrap_or(0);
    let parts = parts.iter().filter(|p| p.nrows() > 0).collect_vec();
    if let Some(bad) = parts.iter().find(|p| p.ncols() != cols) {
        return Err(MarionetteError::shape("vstack", cols, bad.ncols()));
    }
    let rows = parts.iter().map(|p| p.nrows()).sum();
    let mut result = zeros(rows, cols);
    let mut offset = 0;
    for part in parts {
        result.slice_mut(s![offset..offset + part.nrows(), ..]).assign(part);
        offset += part.nrows();
    }
    Ok(result)
}

pub fn hstack(parts: &[SymMatrix]) -> Result<SymMatrix, MarionetteError> {
    let transposed = parts.iter().map(transpose).collect_vec();
    Ok(transpose(&vstack(&transposed)?))
}

/// Elementary rotation mapping child coordinates into parent coordinates.
/// `axis` is 0, 1 or 2 for x, y or z.
pub fn rotation(axis: usize, angle: &Expr) -> SymMatrix {
    let (c, s) = (angle.cos(), angle.sin());
    let (o, l) = (Expr::zero(), Expr::one());
    let rows = match axis {
        0 => vec![
            vec![l.clone(), o.clone(), o.clone()],
            vec![o.clone(), c.clone(), -&s],
            vec![o, s, c],
        ],
        1 => vec![
            vec![c.clone(), o.clone(), s.clone()],
            vec![o.clone(), l, o.clone()],
            vec![-&s, o, c],
        ],
        _ => vec![
            vec![c.clone(), -&s, o.clone()],
            vec![s, c, o.clone()],
            vec![o.clone(), o, l],
        ],
    };
    Array2::from_shape_vec((3, 3), rows.into_iter().flatten().collect_vec()).unwrap_or_else(|_| identity(3))
}

/// `∂f/∂x` for a vector-like `f`; rows follow the entries of `f`, columns the symbols of `x`
pub fn jacobian(f: &SymMatrix, x: &[Symbol]) -> SymMatrix {
    let f = entries(f);
    let differentiate = |symbol: &Symbol| {
        let mut differentiator = Differentiator::new(symbol);
        f.iter().map(|e| differentiator.diff(e)).collect_vec()
    };
    #[cfg(feature = "rayon")]
    let columns = x.par_iter().map(differentiate).collect::<Vec<_>>();
    #[cfg(not(feature = "rayon"))]
    let columns = x.iter().map(differentiate).collect_vec();

    Array2::from_shape_fn((f.len(), x.len()), |(i, j)| columns[j][i].clone())
}

pub fn time_derivative(m: &SymMatrix, rates: &HashMap<Symbol, Expr>) -> SymMatrix {
    m.map(|e| e.time_derivative(rates))
}

pub fn substitute(m: &SymMatrix, map: &HashMap<Symbol, Expr>) -> SymMatrix {
    m.map(|e| e.substitute(map))
}

pub fn simplify(m: &SymMatrix) -> SymMatrix {
    m.map(Expr::simplify)
}

/// Whether every entry is a literal, and if so whether it equals `expected`
pub fn is_literal(m: &SymMatrix, expected: &Array2<f64>) -> bool {
    m.dim() == expected.dim() && m.iter().zip(expected.iter()).all(|(e, v)| e.is_literal(*v))
}

/// `A⁻¹·B` as solve nodes. `A` must be square with as many rows as `B`.
pub fn solve(a: &SymMatrix, b: &SymMatrix) -> Result<SymMatrix, MarionetteError> {
    let (n, m) = a.dim();
    if n != m {
        return Err(MarionetteError::shape("solve", format!("({}, {})", n, n), format!("({}, {})", n, m)));
    }
    if b.nrows() != n {
        return Err(MarionetteError::shape("solve", format!("({}, _)", n), format!("({}, {})", b.nrows(), b.ncols())));
    }
    let system = Arc::new(LinearSystem {
        matrix: a.clone(),
        rhs: b.clone(),
    });
    Ok(Array2::from_shape_fn(b.dim(), |(i, j)| Expr::solve_entry(system.clone(), i, j)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::Environment;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test_log::test]
    fn test_skew_matches_cross() {
        let a = column([Expr::symbol("a"), Expr::number(2.0), Expr::number(-1.0)]);
        let b = numbers(&[0.5, 1.0, 3.0]);
        let via_skew = matmul(&skew(&a).unwrap(), &b).unwrap();
        let via_cross = cross(&a, &b).unwrap();

        let mut env = Environment::new();
        env.set("a", 1.5);
        for (x, y) in via_skew.iter().zip(via_cross.iter()) {
            assert_abs_diff_eq!(x.evaluate(&env).unwrap(), y.evaluate(&env).unwrap(), epsilon = 1e-12);
        }
    }

    #[test_log::test]
    fn test_rotation_and_block() {
        let r = rotation(2, &Expr::number(std::f64::consts::FRAC_PI_2));
        let x = matmul(&r, &numbers(&[1.0, 0.0, 0.0])).unwrap();
        let x = crate::symbolic::evaluate_matrix(&x, &Environment::new()).unwrap();
        assert_abs_diff_eq!(x, array![[0.0], [1.0], [0.0]], epsilon = 1e-12);

        let m = block(&[vec![identity(2), zeros(2, 1)], vec![zeros(1, 2), scalar(3.0)]]).unwrap();
        assert_eq!(m.dim(), (3, 3));
        assert!(m[[2, 2]].is_literal(3.0));
        assert!(block(&[vec![identity(2), zeros(1, 1)]]).is_err());
    }

    #[test_log::test]
    fn test_jacobian() {
        let q = [Symbol::new("q0"), Symbol::new("q1")];
        let (a, b) = (Expr::from_symbol(q[0].clone()), Expr::from_symbol(q[1].clone()));
        let f = column([&a * &b, a.sin()]);
        let j = jacobian(&f, &q);
        assert_eq!(j.dim(), (2, 2));
        assert_eq!(j[[0, 0]], b);
        assert_eq!(j[[0, 1]], a);
        assert_eq!(j[[1, 0]], a.cos());
        assert!(j[[1, 1]].is_zero());
    }
}

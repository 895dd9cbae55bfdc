//! External modal data of flexible bodies.
//!
//! Flexible bodies themselves are not generated; this module only checks that data handed in by
//! a modal-data source is complete and consistent. Every quantity is a first-order Taylor
//! expansion in the `nq` elastic coordinates, `M(q) = M0 + Σ M1[k]·q[k]`.
//!
//! A [Taylor] block can also be read from its text form:
//!
//! ```text
//! order = 1
//! nrow = 3
//! ncol = 1
//! nq = 2
//! m0(1,1) = 1.5D+00
//! m1(2,1,1) = -0.25
//! end
//! ```
//!
//! Indices in the text form are 1-based, `m1(row, mode, col)`.

use crate::MarionetteError;
use ndarray::Array2;
use tracing::debug;

fn format_error(field: impl Into<String>, reason: impl Into<String>) -> MarionetteError {
    MarionetteError::Format {
        field: field.into(),
        reason: reason.into(),
    }
}

/// A matrix expanded to first order in the elastic coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Taylor {
    /// 0 for constant matrices, 1 when `m1` is present
    pub order: usize,
    pub m0: Array2<f64>,
    /// One matrix per elastic coordinate
    pub m1: Vec<Array2<f64>>,
}

impl Taylor {
    /// Constant matrix
    pub fn constant(m0: Array2<f64>) -> Self {
        Taylor {
            order: 0,
            m0,
            m1: vec![],
        }
    }

    pub fn first_order(m0: Array2<f64>, m1: Vec<Array2<f64>>) -> Self {
        Taylor { order: 1, m0, m1 }
    }

    /// Checks the expansion against the expected size. `modes` is the number of elastic
    /// coordinates of the body.
    pub fn validate(&self, field: &str, rows: usize, cols: usize, modes: usize) -> Result<(), MarionetteError> {
        if self.order > 1 {
            return Err(format_error(field, format!("order {} is not supported", self.order)));
        }
        if self.m0.dim() != (rows, cols) {
            return Err(format_error(
                field,
                format!("expected {}×{}, found {}×{}", rows, cols, self.m0.nrows(), self.m0.ncols()),
            ));
        }
        match (self.order, self.m1.len()) {
            (0, 0) => {}
            (0, _) => return Err(format_error(field, "constant expansion with first-order terms")),
            (_, found) if found != modes => {
                return Err(format_error(field, format!("expected {} first-order terms, found {}", modes, found)))
            }
            _ => {}
        }
        for (k, m1) in self.m1.iter().enumerate() {
            if m1.dim() != (rows, cols) {
                return Err(format_error(
                    format!("{}.m1[{}]", field, k),
                    format!("expected {}×{}, found {}×{}", rows, cols, m1.nrows(), m1.ncols()),
                ));
            }
        }
        if !self.m0.iter().chain(self.m1.iter().flatten()).all(|v| v.is_finite()) {
            return Err(format_error(field, "entries must be finite"));
        }
        Ok(())
    }

    /// Reads a block in text form. `field` names the block in errors.
    pub fn parse(field: &str, text: &str) -> Result<Self, MarionetteError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let mut header = |key: &str| -> Result<usize, MarionetteError> {
            let line = lines
                .next()
                .ok_or_else(|| format_error(field, format!("expected '{}', found the end of the block", key)))?;
            let (name, value) = split(field, line)?;
            if name != key {
                return Err(format_error(field, format!("expected '{}', found '{}'", key, name)));
            }
            value
                .parse()
                .map_err(|_| format_error(format!("{}.{}", field, key), format!("expected an integer, found '{}'", value)))
        };
        let order = header("order")?;
        let nrow = header("nrow")?;
        let ncol = header("ncol")?;
        let nq = header("nq")?;

        let mut m0 = Array2::zeros((nrow, ncol));
        let mut m1 = if order == 1 {
            vec![Array2::zeros((nrow, ncol)); nq]
        } else {
            vec![]
        };
        let mut closed = false;
        for line in lines {
            if line == "end" {
                closed = true;
                break;
            }
            let (name, value) = split(field, line)?;
            let value = number(field, name, value)?;
            let indices = indices(field, name)?;
            match (name.split('(').next(), indices.as_slice()) {
                (Some("m0"), &[r, c]) => {
                    let entry = m0
                        .get_mut((r, c))
                        .ok_or_else(|| format_error(format!("{}.{}", field, name), "index out of range"))?;
                    *entry = value;
                }
                (Some("m1"), &[r, k, c]) if order == 1 => {
                    let entry = m1
                        .get_mut(k)
                        .and_then(|m| m.get_mut((r, c)))
                        .ok_or_else(|| format_error(format!("{}.{}", field, name), "index out of range"))?;
                    *entry = value;
                }
                _ => return Err(format_error(field, format!("unexpected entry '{}'", name))),
            }
        }
        if !closed {
            return Err(format_error(field, "expected 'end'"));
        }
        Ok(Taylor { order, m0, m1 })
    }
}

fn split<'l>(field: &str, line: &'l str) -> Result<(&'l str, &'l str), MarionetteError> {
    line.split_once('=')
        .map(|(name, value)| (name.trim(), value.trim()))
        .ok_or_else(|| format_error(field, format!("expected 'key = value', found '{}'", line)))
}

/// Fortran-style exponents are accepted, `1.5D+03`
fn number(field: &str, name: &str, value: &str) -> Result<f64, MarionetteError> {
    value
        .replace(['D', 'd'], "e")
        .parse()
        .map_err(|_| format_error(format!("{}.{}", field, name), format!("expected a number, found '{}'", value)))
}

/// Zero-based indices of `m0(r,c)` or `m1(r,k,c)`
fn indices(field: &str, name: &str) -> Result<Vec<usize>, MarionetteError> {
    let inner = name
        .split_once('(')
        .and_then(|(_, rest)| rest.strip_suffix(')'))
        .ok_or_else(|| format_error(field, format!("malformed entry '{}'", name)))?;
    inner
        .split(',')
        .map(|i| match i.trim().parse::<usize>() {
            Ok(i) if i > 0 => Ok(i - 1),
            _ => Err(format_error(format!("{}.{}", field, name), format!("invalid index '{}'", i.trim()))),
        })
        .collect()
}

/// Deformation data at one node of the flexible body
#[derive(Debug, Clone, PartialEq)]
pub struct ModalNode {
    pub name: String,
    /// Node position, `3×1`
    pub origin: Taylor,
    /// Translational mode shapes, `3×nq`
    pub phi: Taylor,
    /// Rotational mode shapes, `3×nq`
    pub psi: Taylor,
    /// Node orientation, `3×3`
    pub ap: Taylor,
}

/// Reference-model data of one flexible body
#[derive(Debug, Clone, PartialEq)]
pub struct ModalData {
    pub name: String,
    pub mass: f64,
    /// Eigenfrequencies in Hz, one per elastic coordinate
    pub frequencies: Vec<f64>,
    pub nodes: Vec<ModalNode>,
    /// First moment of mass, `3×1`
    pub md_cm: Taylor,
    /// Inertia tensor entries `[Ixx, Iyy, Izz, Ixy, Iyz, Ixz]`, `6×1`
    pub j: Taylor,
    /// Translational coupling, `3×nq`
    pub ct: Taylor,
    /// Rotational coupling, `3×nq`
    pub cr: Taylor,
    /// Modal mass, `nq×nq`
    pub me: Taylor,
    /// Gyroscopic coupling, `3×3nq`
    pub gr: Taylor,
    /// Gyroscopic terms of the elastic coordinates, `nq×3nq`
    pub ge: Taylor,
    /// Centrifugal stiffening, `nq×6`
    pub oe: Taylor,
    /// Geometric stiffening, `nq×nq`
    pub ksigma: Taylor,
    /// Modal stiffness, `nq×nq`
    pub ke: Taylor,
    /// Modal damping, `nq×nq`
    pub de: Taylor,
}

impl ModalData {
    /// Number of elastic coordinates
    pub fn modes(&self) -> usize {
        self.frequencies.len()
    }

    /// Validates every field. Errors name the first offending field.
    pub fn validate(&self) -> Result<(), MarionetteError> {
        let nq = self.modes();
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(format_error("refmod.mass", format!("must be positive, found {}", self.mass)));
        }
        for (i, f) in self.frequencies.iter().enumerate() {
            if !(f.is_finite() && *f >= 0.0) {
                return Err(format_error(format!("refmod.ielastq[{}]", i), format!("invalid frequency {}", f)));
            }
        }
        if self.nodes.is_empty() {
            return Err(format_error("frame", "at least one node is required"));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            let field = |name: &str| format!("frame.node[{}].{}", i, name);
            node.origin.validate(&field("origin"), 3, 1, nq)?;
            node.phi.validate(&field("phi"), 3, nq, nq)?;
            node.psi.validate(&field("psi"), 3, nq, nq)?;
            node.ap.validate(&field("ap"), 3, 3, nq)?;
        }

        let fields = [
            ("md_cm", &self.md_cm, 3, 1),
            ("j", &self.j, 6, 1),
            ("ct", &self.ct, 3, nq),
            ("cr", &self.cr, 3, nq),
            ("me", &self.me, nq, nq),
            ("gr", &self.gr, 3, 3 * nq),
            ("ge", &self.ge, nq, 3 * nq),
            ("oe", &self.oe, nq, 6),
            ("ksigma", &self.ksigma, nq, nq),
            ("ke", &self.ke, nq, nq),
            ("de", &self.de, nq, nq),
        ];
        for (name, taylor, rows, cols) in fields {
            taylor.validate(name, rows, cols, nq)?;
        }

        for (name, matrix) in [("me", &self.me.m0), ("ke", &self.ke.m0), ("de", &self.de.m0)] {
            if !is_symmetric(matrix) {
                return Err(format_error(name, "must be symmetric"));
            }
        }
        if let Some(k) = (0..nq).find(|&k| self.me.m0[[k, k]] <= 0.0) {
            return Err(format_error("me", format!("modal mass of mode {} must be positive", k)));
        }
        debug!(name = %self.name, modes = nq, nodes = self.nodes.len(), "validated modal data");
        Ok(())
    }
}

fn is_symmetric(matrix: &Array2<f64>) -> bool {
    let scale = matrix.iter().fold(1.0f64, |m, v| m.max(v.abs()));
    let n = matrix.nrows();
    (0..n).all(|i| (0..i).all(|j| (matrix[[i, j]] - matrix[[j, i]]).abs() <= 1e-9 * scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn zeros(rows: usize, cols: usize) -> Taylor {
        Taylor::constant(Array2::zeros((rows, cols)))
    }

    /// A beam with two elastic coordinates and one node at its tip
    fn beam() -> ModalData {
        let nq = 2;
        ModalData {
            name: "beam".to_string(),
            mass: 1.2,
            frequencies: vec![4.5, 28.0],
            nodes: vec![ModalNode {
                name: "tip".to_string(),
                origin: Taylor::first_order(
                    array![[1.0], [0.0], [0.0]],
                    vec![array![[0.0], [1.0], [0.0]], array![[0.0], [0.0], [1.0]]],
                ),
                phi: zeros(3, nq),
                psi: zeros(3, nq),
                ap: Taylor::constant(Array2::eye(3)),
            }],
            md_cm: zeros(3, 1),
            j: zeros(6, 1),
            ct: zeros(3, nq),
            cr: zeros(3, nq),
            me: Taylor::constant(Array2::eye(nq)),
            gr: zeros(3, 3 * nq),
            ge: zeros(nq, 3 * nq),
            oe: zeros(nq, 6),
            ksigma: zeros(nq, nq),
            ke: Taylor::constant(array![[800.0, 0.0], [0.0, 31000.0]]),
            de: zeros(nq, nq),
        }
    }

    fn field_of(err: MarionetteError) -> String {
        match err {
            MarionetteError::Format { field, .. } => field,
            other => panic!("expected a format error, got {other}"),
        }
    }

    #[test_log::test]
    fn test_consistent_data_validates() {
        beam().validate().unwrap();
    }

    #[test_log::test]
    fn test_errors_name_the_field() {
        let mut data = beam();
        data.mass = 0.0;
        assert_eq!(field_of(data.validate().unwrap_err()), "refmod.mass");

        let mut data = beam();
        data.ke = zeros(2, 3);
        assert_eq!(field_of(data.validate().unwrap_err()), "ke");

        let mut data = beam();
        data.nodes[0].origin.m1.pop();
        assert_eq!(field_of(data.validate().unwrap_err()), "frame.node[0].origin");

        let mut data = beam();
        data.me = Taylor::constant(array![[1.0, 0.5], [0.0, 1.0]]);
        assert_eq!(field_of(data.validate().unwrap_err()), "me");

        let mut data = beam();
        data.frequencies[1] = f64::NAN;
        assert_eq!(field_of(data.validate().unwrap_err()), "refmod.ielastq[1]");
    }

    #[test_log::test]
    fn test_parse_first_order_block() {
        let text = "
            order = 1
            nrow = 3
            ncol = 1
            nq = 2
            m0(1,1) = 1.5D+00
            m1(2,1,1) = -0.25
            m1(3,2,1) = 2.0d-1
            end
        ";
        let taylor = Taylor::parse("origin", text).unwrap();
        taylor.validate("origin", 3, 1, 2).unwrap();
        assert_abs_diff_eq!(taylor.m0[[0, 0]], 1.5);
        assert_abs_diff_eq!(taylor.m1[0][[1, 0]], -0.25);
        assert_abs_diff_eq!(taylor.m1[1][[2, 0]], 0.2);
    }

    #[test_log::test]
    fn test_parse_reports_the_entry() {
        let text = "order = 0\nnrow = 2\nncol = 2\nnq = 0\nm0(1,1) = abc\nend";
        let err = Taylor::parse("ke", text).unwrap_err();
        assert_eq!(field_of(err), "ke.m0(1,1)");

        let text = "order = 0\nnrow = 2\nncol = 2\nnq = 0\nm0(3,1) = 1.0\nend";
        assert_eq!(field_of(Taylor::parse("ke", text).unwrap_err()), "ke.m0(3,1)");

        let text = "order = 0\nnrows = 2";
        assert_eq!(field_of(Taylor::parse("ke", text).unwrap_err()), "ke");

        let text = "order = 0\nnrow = 1\nncol = 1\nnq = 0\nm0(1,1) = 1.0";
        assert_eq!(field_of(Taylor::parse("ke", text).unwrap_err()), "ke");
    }
}

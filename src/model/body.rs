use super::{BodyId, FrameId, System};
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use ndarray::Array2;

/// A rigid, mass-bearing node of the system
#[derive(Debug, Clone)]
pub struct Body {
    pub(crate) name: String,
    pub(crate) mass: Expr,
    /// Center of gravity in body coordinates
    pub(crate) cg: SymMatrix,
    /// Inertia tensor about the center of gravity
    pub(crate) inertia: SymMatrix,
    pub(crate) origin: FrameId,
}

impl Body {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mass(&self) -> &Expr {
        &self.mass
    }

    pub fn cg(&self) -> &SymMatrix {
        &self.cg
    }

    pub fn inertia(&self) -> &SymMatrix {
        &self.inertia
    }

    pub fn origin(&self) -> FrameId {
        self.origin
    }
}

/// A positioned and oriented reference, attached to a body directly or through other frames
#[derive(Debug, Clone)]
pub struct Frame {
    pub(crate) name: String,
    pub(crate) body: BodyId,
    /// `None` for a body's origin frame
    pub(crate) parent: Option<FrameId>,
    /// Position relative to the parent frame, in parent coordinates
    pub(crate) position: SymMatrix,
    /// Maps frame coordinates into parent coordinates
    pub(crate) rotation: SymMatrix,
}

impl Frame {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    pub fn position(&self) -> &SymMatrix {
        &self.position
    }

    pub fn rotation(&self) -> &SymMatrix {
        &self.rotation
    }
}

impl System {
    /// Adds a body. `inertia` is either a symmetric `3×3` tensor or the six independent
    /// entries `[Ixx, Ixy, Iyy, Ixz, Iyz, Izz]`.
    pub fn add_body<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        mass: impl Into<Expr>,
        cg: SymMatrix,
        inertia: SymMatrix,
    ) -> Result<BodyId, MarionetteError> {
        let cg = vector3("cg", cg)?;
        let inertia = inertia_tensor(inertia)?;
        let mass = mass.into();
        if mass.as_number().is_some_and(|m| m < 0.0) {
            return Err(MarionetteError::Authoring("mass must not be negative".to_string()));
        }
        let name = self.register(name, "body")?;
        Ok(self.push_body(name, mass, cg, inertia))
    }

    pub(crate) fn push_body(&mut self, name: String, mass: Expr, cg: SymMatrix, inertia: SymMatrix) -> BodyId {
        let id = BodyId(self.bodies.len());
        let origin = FrameId(self.frames.len());
        self.frames.push(Frame {
            name: name.clone(),
            body: id,
            parent: None,
            position: matrix::zeros(3, 1),
            rotation: matrix::identity(3),
        });
        self.bodies.push(Body {
            name,
            mass,
            cg,
            inertia,
            origin,
        });
        id
    }

    /// The origin frame of `body`
    pub fn origin(&self, body: BodyId) -> Result<FrameId, MarionetteError> {
        Ok(self.body(body)?.origin)
    }

    /// Adds a frame below `parent`. `rotation` maps the new frame's coordinates into the
    /// parent's; `None` keeps the parent orientation.
    pub fn add_frame<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        parent: FrameId,
        position: SymMatrix,
        rotation: Option<SymMatrix>,
    ) -> Result<FrameId, MarionetteError> {
        let body = self.frame(parent)?.body;
        let position = vector3("position", position)?;
        let rotation = match rotation {
            Some(rotation) if rotation.dim() == (3, 3) => rotation,
            Some(rotation) => return Err(MarionetteError::shape("rotation", "(3, 3)", format!("{:?}", rotation.dim()))),
            None => matrix::identity(3),
        };
        if let Some(numeric) = literal(&rotation) {
            if !is_orthonormal(&numeric) {
                return Err(MarionetteError::Authoring("rotation is not orthonormal".to_string()));
            }
        }
        let name = self.register(name, "frame")?;
        let id = FrameId(self.frames.len());
        self.frames.push(Frame {
            name,
            body,
            parent: Some(parent),
            position,
            rotation,
        });
        Ok(id)
    }
}

/// Accepts a `3×1` column or a `1×3` row and returns a column
pub(crate) fn vector3(name: &str, value: SymMatrix) -> Result<SymMatrix, MarionetteError> {
    match value.dim() {
        (3, 1) => Ok(value),
        (1, 3) => Ok(matrix::transpose(&value)),
        found => Err(MarionetteError::shape(name, "(3,)", format!("{:?}", found))),
    }
}

fn inertia_tensor(value: SymMatrix) -> Result<SymMatrix, MarionetteError> {
    match value.dim() {
        (3, 3) => {
            let symmetric = (0..3).all(|i| (0..3).all(|j| value[[i, j]] == value[[j, i]]));
            if !symmetric {
                return Err(MarionetteError::Authoring("inertia tensor is not symmetric".to_string()));
            }
            Ok(value)
        }
        (6, 1) | (1, 6) => {
            let e = matrix::entries(&value);
            let rows = vec![
                vec![e[0].clone(), e[1].clone(), e[3].clone()],
                vec![e[1].clone(), e[2].clone(), e[4].clone()],
                vec![e[3].clone(), e[4].clone(), e[5].clone()],
            ];
            matrix::from_rows(rows)
        }
        found => Err(MarionetteError::Authoring(format!(
            "inertia must be a symmetric (3, 3) matrix or its six entries, found {:?}",
            found
        ))),
    }
}

fn literal(m: &SymMatrix) -> Option<Array2<f64>> {
    let values = m.iter().map(Expr::as_number).collect::<Option<Vec<_>>>()?;
    Array2::from_shape_vec(m.dim(), values).ok()
}

fn is_orthonormal(r: &Array2<f64>) -> bool {
    let product = r.t().dot(r);
    product.indexed_iter().all(|((i, j), v)| {
        let expected = if i == j { 1.0 } else { 0.0 };
        (v - expected).abs() < 1e-9
    })
}

//! Lowering of the authored [System](crate::model::System) into a canonical joint tree.
//!
//! The [Canonicalizer] expands multi-dof joints into chains of elementary joints, flattens
//! nested frames onto their bodies and merges bodies connected by fixed joints. The result,
//! a [CanonicalModel], is a depth-first arena tree rooted at the inertial body in which every
//! edge is exactly one elementary joint, plus the frame table that loads, sensors,
//! constraints and loops are resolved against.

mod canonicalizer;

pub use canonicalizer::Canonicalizer;

use crate::arena::{ArenaNode, DepthFirstArenaTree};
use crate::model::{BodyId, Constraint, Dof, FrameId, JointId, Load, LoopDef, Sensor, SymbolDef};
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CanonicalBody {
    pub name: String,
    pub mass: Expr,
    /// Center of gravity in body coordinates
    pub cg: SymMatrix,
    /// Inertia about the center of gravity, in body coordinates
    pub inertia: SymMatrix,
}

/// A joint with one degree of freedom between a parent body and the body owning it
#[derive(Debug, Clone)]
pub struct ElementaryJoint {
    pub name: String,
    /// The authored joint this one was expanded from
    pub source: JointId,
    pub dof: Dof,
    pub parent: BodyId,
    /// Joint frame in parent body coordinates
    pub position: SymMatrix,
    pub rotation: SymMatrix,
    pub q0: f64,
    pub qd0: f64,
}

impl ElementaryJoint {
    /// Position (0), velocity (1) or acceleration (2) symbol
    pub fn coordinate(&self, order: usize) -> Expr {
        Expr::symbol(&crate::model::coordinate_name(&self.name, order))
    }

    /// Position and rotation of the child body in parent body coordinates
    pub fn transform(&self) -> Result<(SymMatrix, SymMatrix), MarionetteError> {
        let q = self.coordinate(0);
        let axis = self.dof.axis();
        if self.dof.is_rotational() {
            let rotation = matrix::matmul(&self.rotation, &matrix::rotation(axis, &q))?;
            Ok((self.position.clone(), rotation))
        } else {
            let mut slide = matrix::zeros(3, 1);
            slide[[axis, 0]] = q;
            let position = &self.position + &matrix::matmul(&self.rotation, &slide)?;
            Ok((position, self.rotation.clone()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct CanonicalNode {
    pub body: CanonicalBody,
    /// Incoming joint, `None` for the inertial body
    pub joint: Option<ElementaryJoint>,
}

/// A frame fixed to a canonical body
#[derive(Debug, Clone)]
pub struct CanonicalFrame {
    pub name: String,
    pub body: BodyId,
    /// Relative to the body origin, in body coordinates
    pub position: SymMatrix,
    pub rotation: SymMatrix,
}

pub type JointTree = DepthFirstArenaTree<CanonicalNode, BodyId>;

/// The canonical model. See the [module documentation](self).
#[derive(Debug, Clone)]
pub struct CanonicalModel {
    pub(crate) tree: JointTree,
    pub(crate) frames: HashMap<FrameId, CanonicalFrame>,
    /// Child bodies of the elementary joints of every authored joint, in chain order
    pub(crate) joints: HashMap<JointId, Vec<BodyId>>,
    /// Merged body to the body it was merged into
    pub(crate) merged: HashMap<BodyId, BodyId>,
    pub(crate) loads: Vec<Load>,
    pub(crate) sensors: Vec<Sensor>,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) loops: Vec<LoopDef>,
    pub(crate) symbols: Vec<SymbolDef>,
    pub(crate) gravity: SymMatrix,
}

impl CanonicalModel {
    pub fn tree(&self) -> &JointTree {
        &self.tree
    }

    pub fn root(&self) -> BodyId {
        BodyId(0)
    }

    pub fn node(&self, body: BodyId) -> Result<&ArenaNode<CanonicalNode, BodyId>, MarionetteError> {
        let body = self.resolve_body(body);
        self.tree
            .node_by_id(&body)
            .ok_or_else(|| MarionetteError::structural(format!("{:?}", body), "body is not part of the joint tree"))
    }

    pub fn frame(&self, frame: FrameId) -> Result<&CanonicalFrame, MarionetteError> {
        self.frames
            .get(&frame)
            .ok_or_else(|| MarionetteError::Authoring(format!("unknown frame {:?}", frame)))
    }

    /// The live body a (possibly merged) body ended up in
    pub fn resolve_body(&self, body: BodyId) -> BodyId {
        let mut current = body;
        while let Some(&target) = self.merged.get(&current) {
            current = target;
        }
        current
    }

    /// Elementary joints of an authored joint, in chain order
    pub fn elementary(&self, joint: JointId) -> Result<Vec<&ElementaryJoint>, MarionetteError> {
        let bodies = self
            .joints
            .get(&joint)
            .ok_or_else(|| MarionetteError::Authoring(format!("unknown joint {:?}", joint)))?;
        bodies
            .iter()
            .map(|body| {
                self.node(*body)?
                    .get()
                    .joint
                    .as_ref()
                    .ok_or_else(|| MarionetteError::structural(format!("{:?}", joint), "joint has no elementary part"))
            })
            .collect()
    }

    /// The elementary joint ending at `body`
    pub fn joint_of(&self, body: BodyId) -> Option<&ElementaryJoint> {
        self.tree.node_by_id(&self.resolve_body(body))?.get().joint.as_ref()
    }

    /// Names of all elementary joints, parents first
    pub fn coordinates(&self) -> Vec<String> {
        self.tree
            .iter()
            .filter_map(|node| node.get().joint.as_ref().map(|j| j.name.clone()))
            .collect()
    }

    /// Elementary joints on the path from the root to `body`, root side first
    pub fn path(&self, body: BodyId) -> Result<Vec<&ElementaryJoint>, MarionetteError> {
        let node = self.node(body)?;
        let mut path = self
            .tree
            .ancestors(node)
            .filter_map(|n| n.get().joint.as_ref())
            .collect::<Vec<_>>();
        path.reverse();
        Ok(path)
    }

    pub fn gravity(&self) -> &SymMatrix {
        &self.gravity
    }

    pub fn loads(&self) -> &[Load] {
        &self.loads
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn loops(&self) -> &[LoopDef] {
        &self.loops
    }

    pub fn symbols(&self) -> &[SymbolDef] {
        &self.symbols
    }

    /// Number of bodies, the inertial body included
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

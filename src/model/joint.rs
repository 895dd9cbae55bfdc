use super::{BodyId, FrameId, JointId, System};
use crate::symbolic::Expr;
use crate::MarionetteError;
use std::fmt;
use std::str::FromStr;

/// One elementary degree of freedom along a canonical axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dof {
    Rx,
    Ry,
    Rz,
    Tx,
    Ty,
    Tz,
}

impl Dof {
    /// 0, 1 or 2 for x, y or z
    pub fn axis(self) -> usize {
        match self {
            Dof::Rx | Dof::Tx => 0,
            Dof::Ry | Dof::Ty => 1,
            Dof::Rz | Dof::Tz => 2,
        }
    }

    pub fn is_rotational(self) -> bool {
        matches!(self, Dof::Rx | Dof::Ry | Dof::Rz)
    }
}

impl fmt::Display for Dof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dof::Rx => "Rx",
            Dof::Ry => "Ry",
            Dof::Rz => "Rz",
            Dof::Tx => "Tx",
            Dof::Ty => "Ty",
            Dof::Tz => "Tz",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Dof {
    type Err = MarionetteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Rx" => Ok(Dof::Rx),
            "Ry" => Ok(Dof::Ry),
            "Rz" => Ok(Dof::Rz),
            "Tx" => Ok(Dof::Tx),
            "Ty" => Ok(Dof::Ty),
            "Tz" => Ok(Dof::Tz),
            _ => Err(MarionetteError::Authoring(format!("unknown degree of freedom '{}'", s))),
        }
    }
}

/// A kinematic connection from a frame to a body. Several degrees of freedom are chained
/// into elementary joints by the canonicalizer.
#[derive(Debug, Clone)]
pub struct Joint {
    pub(crate) name: String,
    pub(crate) parent: FrameId,
    pub(crate) child: BodyId,
    pub(crate) dofs: Vec<Dof>,
    pub(crate) q0: Vec<f64>,
    pub(crate) qd0: Vec<f64>,
}

impl Joint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> FrameId {
        self.parent
    }

    pub fn child(&self) -> BodyId {
        self.child
    }

    pub fn dofs(&self) -> &[Dof] {
        &self.dofs
    }

    pub fn is_fixed(&self) -> bool {
        self.dofs.is_empty()
    }

    /// Names of the elementary joints this joint expands to
    pub fn elementary_names(&self) -> Vec<String> {
        match self.dofs.as_slice() {
            [_] => vec![self.name.clone()],
            dofs => dofs.iter().map(|d| format!("{}_{}", self.name, d)).collect(),
        }
    }

    /// Names of the zero-mass bodies between the elementary joints
    pub(crate) fn intermediate_bodies(&self) -> Vec<String> {
        match self.dofs.as_slice() {
            [] | [_] => vec![],
            dofs => dofs[..dofs.len() - 1]
                .iter()
                .map(|d| format!("{}_{}_body", self.name, d))
                .collect(),
        }
    }
}

/// Name of the position (0), velocity (1) or acceleration (2) coordinate of an elementary joint
pub(crate) fn coordinate_name(joint: &str, order: usize) -> String {
    match order {
        0 => format!("q_{}", joint),
        1 => format!("qd_{}", joint),
        _ => format!("qdd_{}", joint),
    }
}

impl System {
    /// Connects `child` to `parent`. No degrees of freedom makes a fixed joint; several are
    /// applied in the given order.
    pub fn add_joint<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        parent: FrameId,
        child: BodyId,
        dofs: &[Dof],
    ) -> Result<JointId, MarionetteError> {
        let parent_body = self.frame(parent)?.body;
        let child_name = self.body(child)?.name.clone();
        if child == self.world() {
            return Err(MarionetteError::structural(child_name, "the inertial body cannot be a joint child"));
        }
        if parent_body == child {
            return Err(MarionetteError::structural(child_name, "joint connects a body to itself"));
        }
        if self.joints.iter().any(|j| j.child == child) {
            return Err(MarionetteError::structural(child_name, "body already terminates a joint"));
        }
        for (i, dof) in dofs.iter().enumerate() {
            if dofs[..i].contains(dof) {
                return Err(MarionetteError::Authoring(format!("degree of freedom {} repeated", dof)));
            }
        }

        let name = self.register(name, "joint")?;
        let joint = Joint {
            name,
            parent,
            child,
            dofs: dofs.to_vec(),
            q0: vec![0.0; dofs.len()],
            qd0: vec![0.0; dofs.len()],
        };
        if dofs.len() > 1 {
            let reserved = joint.elementary_names().into_iter().chain(joint.intermediate_bodies()).collect::<Vec<_>>();
            if let Some(taken) = reserved.iter().find(|n| self.is_registered(n)) {
                let taken = taken.clone();
                self.release(&joint.name);
                return Err(MarionetteError::NameCollision(taken));
            }
            for name in &reserved {
                self.reserve(name)?;
            }
        }
        let id = JointId(self.joints.len());
        self.joints.push(joint);
        Ok(id)
    }

    /// Initial positions and velocities, one per degree of freedom.
    ///
    /// For coordinates eliminated by an implicit loop (hexapod struts) the initial positions
    /// are also the starting guess of the Newton solve at evaluation. They are not checked at
    /// registration or generation: a posture that does not lead to the closed configuration
    /// surfaces as [`MarionetteError::NumericDegeneracy`] from the evaluation.
    pub fn set_initial(&mut self, joint: JointId, q0: &[f64], qd0: &[f64]) -> Result<(), MarionetteError> {
        let j = self.joint(joint)?;
        let n = j.dofs.len();
        for (label, values) in [("q0", q0), ("qd0", qd0)] {
            if values.len() != n {
                return Err(MarionetteError::shape(format!("{}.{}", j.name, label), n, values.len()));
            }
        }
        let j = &mut self.joints[joint.0];
        j.q0 = q0.to_vec();
        j.qd0 = qd0.to_vec();
        Ok(())
    }

    /// Position (`order` 0), velocity (1) or acceleration (2) symbol of a single-dof joint
    pub fn joint_coordinate(&self, joint: JointId, order: usize) -> Result<Expr, MarionetteError> {
        let j = self.joint(joint)?;
        if j.dofs.len() != 1 {
            return Err(MarionetteError::Authoring(format!(
                "joint {} has {} degrees of freedom, use joint_coordinates",
                j.name,
                j.dofs.len()
            )));
        }
        let mut coordinates = self.joint_coordinates(joint, order)?;
        Ok(coordinates.remove(0))
    }

    /// Symbols of every elementary joint of `joint`
    pub fn joint_coordinates(&self, joint: JointId, order: usize) -> Result<Vec<Expr>, MarionetteError> {
        if order > 2 {
            return Err(MarionetteError::Authoring(format!("coordinate order {} is not 0, 1 or 2", order)));
        }
        Ok(self
            .joint(joint)?
            .elementary_names()
            .iter()
            .map(|name| Expr::symbol(&coordinate_name(name, order)))
            .collect())
    }
}

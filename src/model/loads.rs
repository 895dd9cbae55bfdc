use super::{ConstraintId, FrameId, JointId, LoadId, System};
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;

/// What a load applies and where
#[derive(Debug, Clone)]
pub enum LoadKind {
    /// Generalized forces along the axes of a joint, one entry per degree of freedom
    Joint { joint: JointId, value: SymMatrix },
    /// Scalar force along the line between two frames. Positive values pull `child`
    /// towards `parent`.
    PtPForce { parent: FrameId, child: FrameId, value: Expr },
    /// Force acting on `child` with its reaction on `parent`, resolved in `reference`
    CmpForce {
        parent: FrameId,
        child: FrameId,
        reference: FrameId,
        value: SymMatrix,
    },
    /// Torque acting on `child` with its reaction on `parent`, resolved in `reference`
    CmpTorque {
        parent: FrameId,
        child: FrameId,
        reference: FrameId,
        value: SymMatrix,
    },
}

#[derive(Debug, Clone)]
pub struct Load {
    pub(crate) name: String,
    pub(crate) kind: LoadKind,
}

impl Load {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &LoadKind {
        &self.kind
    }
}

/// Locks relative translation and rotation between two frames, enforced by Lagrange
/// multipliers `F_<name>` and `T_<name>` resolved in the parent frame. Both multiplier
/// names are reserved when the constraint is created.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub(crate) name: String,
    pub(crate) parent: FrameId,
    pub(crate) child: FrameId,
    pub(crate) trans: [bool; 3],
    pub(crate) rot: [bool; 3],
}

impl Constraint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> FrameId {
        self.parent
    }

    pub fn child(&self) -> FrameId {
        self.child
    }

    pub fn translation_locks(&self) -> [bool; 3] {
        self.trans
    }

    pub fn rotation_locks(&self) -> [bool; 3] {
        self.rot
    }

    /// Number of locked relative motions
    pub fn len(&self) -> usize {
        self.trans.iter().chain(self.rot.iter()).filter(|&&l| l).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn force_multiplier(&self) -> String {
        format!("F_{}", self.name)
    }

    pub fn torque_multiplier(&self) -> String {
        format!("T_{}", self.name)
    }
}

impl System {
    pub fn add_joint_load<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        joint: JointId,
        value: SymMatrix,
    ) -> Result<LoadId, MarionetteError> {
        let j = self.joint(joint)?;
        if j.is_fixed() {
            return Err(MarionetteError::structural(&j.name, "a fixed joint cannot carry a load"));
        }
        let n = j.dofs.len();
        if value.len() != n || (value.nrows() != 1 && value.ncols() != 1) {
            return Err(MarionetteError::shape(
                format!("load on {}", j.name),
                format!("({},)", n),
                format!("{:?}", value.dim()),
            ));
        }
        let value = matrix::column(matrix::entries(&value));
        self.push_load(name, LoadKind::Joint { joint, value })
    }

    pub fn add_ptp_force<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        parent: FrameId,
        child: FrameId,
        value: Expr,
    ) -> Result<LoadId, MarionetteError> {
        self.distinct_frames(parent, child)?;
        self.push_load(name, LoadKind::PtPForce { parent, child, value })
    }

    /// A force vector on `child`, resolved in `reference` (`None`: the parent frame)
    pub fn add_cmp_force<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        parent: FrameId,
        child: FrameId,
        value: SymMatrix,
        reference: Option<FrameId>,
    ) -> Result<LoadId, MarionetteError> {
        let (reference, value) = self.component_load(parent, child, value, reference)?;
        self.push_load(
            name,
            LoadKind::CmpForce {
                parent,
                child,
                reference,
                value,
            },
        )
    }

    pub fn add_cmp_torque<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        parent: FrameId,
        child: FrameId,
        value: SymMatrix,
        reference: Option<FrameId>,
    ) -> Result<LoadId, MarionetteError> {
        let (reference, value) = self.component_load(parent, child, value, reference)?;
        self.push_load(
            name,
            LoadKind::CmpTorque {
                parent,
                child,
                reference,
                value,
            },
        )
    }

    /// Locks the relative motion of `child` with respect to `parent` along the flagged axes
    pub fn add_constraint<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        parent: FrameId,
        child: FrameId,
        trans: [bool; 3],
        rot: [bool; 3],
    ) -> Result<ConstraintId, MarionetteError> {
        self.distinct_frames(parent, child)?;
        if !trans.iter().chain(rot.iter()).any(|&l| l) {
            return Err(MarionetteError::Authoring("constraint locks nothing".to_string()));
        }
        let name = self.register(name, "constraint")?;
        let constraint = Constraint {
            name,
            parent,
            child,
            trans,
            rot,
        };
        for multiplier in [constraint.force_multiplier(), constraint.torque_multiplier()] {
            if self.is_registered(&multiplier) {
                self.release(&constraint.name);
                return Err(MarionetteError::NameCollision(multiplier));
            }
        }
        self.reserve(&constraint.force_multiplier())?;
        self.reserve(&constraint.torque_multiplier())?;
        let id = ConstraintId(self.constraints.len());
        self.constraints.push(constraint);
        Ok(id)
    }

    fn component_load(
        &self,
        parent: FrameId,
        child: FrameId,
        value: SymMatrix,
        reference: Option<FrameId>,
    ) -> Result<(FrameId, SymMatrix), MarionetteError> {
        self.distinct_frames(parent, child)?;
        let reference = reference.unwrap_or(parent);
        self.frame(reference)?;
        Ok((reference, super::body::vector3("load", value)?))
    }

    fn distinct_frames(&self, parent: FrameId, child: FrameId) -> Result<(), MarionetteError> {
        let (p, c) = (self.frame(parent)?, self.frame(child)?);
        if parent == child {
            return Err(MarionetteError::Authoring(format!("frame {} is used on both sides", p.name)));
        }
        if p.body == c.body {
            return Err(MarionetteError::Authoring(format!(
                "frames {} and {} belong to the same body",
                p.name, c.name
            )));
        }
        Ok(())
    }

    fn push_load<'a>(&mut self, name: impl Into<Option<&'a str>>, kind: LoadKind) -> Result<LoadId, MarionetteError> {
        let name = self.register(name, "load")?;
        let id = LoadId(self.loads.len());
        self.loads.push(Load { name, kind });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dof;

    #[test_log::test]
    fn test_load_validation() {
        let mut system = System::new();
        let world = system.origin(system.world()).unwrap();
        let b = system.add_body("b", 1.0, matrix::zeros(3, 1), matrix::identity(3)).unwrap();
        let b0 = system.origin(b).unwrap();
        let j = system.add_joint("j", world, b, &[Dof::Tx, Dof::Ty]).unwrap();

        let f = Expr::symbol("f");
        let load = system
            .add_joint_load(None, j, matrix::column([f.clone(), -&f]))
            .unwrap();
        assert_eq!(system.load(load).unwrap().name(), "load_1");
        assert!(matches!(
            system.add_joint_load(None, j, matrix::scalar(f.clone())),
            Err(MarionetteError::ShapeMismatch { .. })
        ));

        let cmp = system
            .add_cmp_force("push", world, b0, matrix::numbers(&[1.0, 0.0, 0.0]), None)
            .unwrap();
        assert!(matches!(
            system.load(cmp).unwrap().kind(),
            LoadKind::CmpForce { reference, .. } if *reference == world
        ));
        assert!(system.add_ptp_force("self", b0, b0, f).is_err());
    }

    #[test_log::test]
    fn test_constraint_multipliers() {
        let mut system = System::new();
        let world = system.origin(system.world()).unwrap();
        let b = system.add_body("b", 1.0, matrix::zeros(3, 1), matrix::identity(3)).unwrap();
        let b0 = system.origin(b).unwrap();
        assert!(system.add_constraint("none", world, b0, [false; 3], [false; 3]).is_err());

        let c = system
            .add_constraint("pin", world, b0, [true, true, false], [false, false, true])
            .unwrap();
        let constraint = system.constraint(c).unwrap();
        assert_eq!(constraint.len(), 3);
        assert_eq!(constraint.force_multiplier(), "F_pin");
    }
}

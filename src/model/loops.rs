use super::{BodyId, FrameId, JointId, LoopId, System};
use crate::symbolic::Expr;
use crate::MarionetteError;

/// A kinematic loop, cut at two frames (or between joints) and closed in the loop library.
/// Frames may be given in either order; the joint chain is recovered from the tree.
#[derive(Debug, Clone)]
pub enum LoopKind {
    /// Four revolute joints with parallel axes. `posture` selects the assembly branch.
    FourBar { a: FrameId, b: FrameId, posture: i8 },
    /// Four-bar whose fourth link is a slider. Both crank angles are independent.
    FourBarTrans { a: FrameId, b: FrameId },
    /// Three revolute joints and a slider
    ThreeBarTrans { a: FrameId, b: FrameId },
    /// Crank, rod and a slider moving along a line fixed to the ground
    CrankSlider { a: FrameId, b: FrameId, posture: i8 },
    /// Rack (`a` on the ground side), tie rod and steering arm (`b` on the arm)
    Steering { a: FrameId, b: FrameId, posture: i8 },
    /// `output = ratio · input`
    Transmission {
        input: JointId,
        output: JointId,
        ratio: Expr,
    },
    /// The coordinate of `joint` given as an explicit function of other coordinates
    ExpJoint { joint: JointId, expression: Expr },
    /// Platform on struts, closing the strut tip position onto the platform frame
    Hexapod { platform: FrameId, strut: FrameId },
    /// Platform on struts with offset axes, closing position and orientation
    AxisOffsetHexapod { platform: FrameId, strut: FrameId },
}

impl LoopKind {
    /// Short type name used in log messages and errors
    pub fn type_name(&self) -> &'static str {
        match self {
            LoopKind::FourBar { .. } => "FourBar",
            LoopKind::FourBarTrans { .. } => "FourBarTrans",
            LoopKind::ThreeBarTrans { .. } => "ThreeBarTrans",
            LoopKind::CrankSlider { .. } => "CrankSlider",
            LoopKind::Steering { .. } => "Steering",
            LoopKind::Transmission { .. } => "Transmission",
            LoopKind::ExpJoint { .. } => "ExpJoint",
            LoopKind::Hexapod { .. } => "Hexapod",
            LoopKind::AxisOffsetHexapod { .. } => "AxisOffsetHexapod",
        }
    }

    fn frames(&self) -> Vec<FrameId> {
        match *self {
            LoopKind::FourBar { a, b, .. }
            | LoopKind::FourBarTrans { a, b }
            | LoopKind::ThreeBarTrans { a, b }
            | LoopKind::CrankSlider { a, b, .. }
            | LoopKind::Steering { a, b, .. } => vec![a, b],
            LoopKind::Hexapod { platform, strut } | LoopKind::AxisOffsetHexapod { platform, strut } => {
                vec![platform, strut]
            }
            LoopKind::Transmission { .. } | LoopKind::ExpJoint { .. } => vec![],
        }
    }

    fn posture(&self) -> Option<i8> {
        match *self {
            LoopKind::FourBar { posture, .. }
            | LoopKind::CrankSlider { posture, .. }
            | LoopKind::Steering { posture, .. } => Some(posture),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopDef {
    pub(crate) name: String,
    pub(crate) kind: LoopKind,
}

impl LoopDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &LoopKind {
        &self.kind
    }
}

impl System {
    /// Registers a kinematic loop. Geometry (axes, cut-point coincidence) is checked when
    /// the loop is closed during generation.
    pub fn add_loop<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        kind: LoopKind,
    ) -> Result<LoopId, MarionetteError> {
        let label = name.into();
        let entity = label.unwrap_or(kind.type_name()).to_string();
        if let Some(posture) = kind.posture() {
            if posture != 1 && posture != -1 {
                return Err(MarionetteError::Authoring(format!("posture must be 1 or -1, found {}", posture)));
            }
        }
        for frame in kind.frames() {
            let body = self.frame(frame)?.body;
            if body == self.world() {
                return Err(MarionetteError::structural(
                    entity,
                    format!("frame {} is attached to the inertial body", self.frames[frame.0].name),
                ));
            }
            if !self.is_reachable(body) {
                return Err(MarionetteError::structural(
                    entity,
                    format!("body {} is not connected to the inertial body", self.bodies[body.0].name),
                ));
            }
        }
        match &kind {
            LoopKind::Transmission { input, output, .. } => {
                if input == output {
                    return Err(MarionetteError::structural(entity, "a transmission needs two different joints"));
                }
                for joint in [*input, *output] {
                    self.single_dof(joint, &entity)?;
                }
            }
            LoopKind::ExpJoint { joint, expression } => {
                let name = self.single_dof(*joint, &entity)?;
                for symbol in expression.symbols() {
                    let s = symbol.name();
                    if s.starts_with("qd_") || s.starts_with("qdd_") {
                        return Err(MarionetteError::structural(
                            entity,
                            format!("expression references the rate {}", s),
                        ));
                    }
                    if s == format!("q_{}", name) {
                        return Err(MarionetteError::structural(entity, "expression references its own joint"));
                    }
                }
            }
            _ => {}
        }
        let name = self.register(label, "loop")?;
        let id = LoopId(self.loops.len());
        self.loops.push(LoopDef { name, kind });
        Ok(id)
    }

    fn single_dof(&self, joint: JointId, entity: &str) -> Result<String, MarionetteError> {
        let j = self.joint(joint)?;
        if j.dofs.len() != 1 {
            return Err(MarionetteError::structural(
                entity,
                format!("joint {} must have exactly one degree of freedom", j.name),
            ));
        }
        Ok(j.name.clone())
    }

    /// Whether a chain of joints leads from the inertial body to `body`
    pub(crate) fn is_reachable(&self, body: BodyId) -> bool {
        let mut current = body;
        // every step moves to a different body; more steps than bodies means a cycle
        for _ in 0..=self.bodies.len() {
            if current == self.world() {
                return true;
            }
            match self.joints.iter().find(|j| j.child == current) {
                Some(joint) => current = self.frames[joint.parent.0].body,
                None => return false,
            }
        }
        false
    }
}

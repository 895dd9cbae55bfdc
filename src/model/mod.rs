//! The authored description of a mechanical system.
//!
//! A [System] owns index-addressed arenas of bodies, frames, joints, loads, sensors,
//! constraints and loops. Every creation call validates its arguments, registers the entity
//! name in one registry shared by all entity kinds and returns a `Copy` handle. Handles are
//! plain indices, so back-references (a joint to its parent frame, a loop to the joints it
//! cuts) never own anything.

mod body;
mod joint;
mod loads;
mod loops;
mod sensors;

pub use body::{Body, Frame};
pub use joint::{Dof, Joint};
pub(crate) use joint::coordinate_name;
pub use loads::{Constraint, Load, LoadKind};
pub use loops::{LoopDef, LoopKind};
pub use sensors::{Sensor, SensorKind};

use crate::graph::{Shape, VarKind, Variable};
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use std::collections::{HashMap, HashSet};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

handle!(
    /// Handle of a [Body]
    BodyId
);
handle!(
    /// Handle of a [Frame]
    FrameId
);
handle!(
    /// Handle of a [Joint]
    JointId
);
handle!(LoadId);
handle!(SensorId);
handle!(ConstraintId);
handle!(LoopId);

/// A user symbol: parameter, input or expression
#[derive(Debug, Clone)]
pub struct SymbolDef {
    pub(crate) name: String,
    pub(crate) shape: Shape,
    pub(crate) kind: VarKind,
    /// Default value of a parameter
    pub(crate) initial: Option<SymMatrix>,
    /// Right-hand side of an expression
    pub(crate) value: Option<SymMatrix>,
}

impl SymbolDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VarKind {
        self.kind
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }
}

/// A mechanical system under construction. See the [module documentation](self).
#[derive(Debug, Clone)]
pub struct System {
    pub(crate) bodies: Vec<Body>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) joints: Vec<Joint>,
    pub(crate) loads: Vec<Load>,
    pub(crate) sensors: Vec<Sensor>,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) loops: Vec<LoopDef>,
    pub(crate) symbols: Vec<SymbolDef>,
    pub(crate) gravity: SymMatrix,
    names: HashSet<String>,
    counters: HashMap<&'static str, usize>,
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

impl System {
    /// A system consisting of the inertial body `world`
    pub fn new() -> Self {
        let mut system = System {
            bodies: vec![],
            frames: vec![],
            joints: vec![],
            loads: vec![],
            sensors: vec![],
            constraints: vec![],
            loops: vec![],
            symbols: vec![],
            gravity: matrix::zeros(3, 1),
            names: HashSet::new(),
            counters: HashMap::new(),
        };
        system.names.insert("world".to_string());
        system.push_body("world".to_string(), Expr::number(0.0), matrix::zeros(3, 1), matrix::zeros(3, 3));
        system
    }

    /// Registers `name`, or an automatic `<prefix>_<n>` when none is given
    pub(crate) fn register<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        prefix: &'static str,
    ) -> Result<String, MarionetteError> {
        let name = match name.into() {
            Some(name) => {
                validate_name(name)?;
                name.to_string()
            }
            None => loop {
                let counter = self.counters.entry(prefix).or_insert(0);
                *counter += 1;
                let candidate = format!("{}_{}", prefix, counter);
                if !self.names.contains(&candidate) {
                    break candidate;
                }
            },
        };
        self.reserve(&name)?;
        Ok(name)
    }

    pub(crate) fn reserve(&mut self, name: &str) -> Result<(), MarionetteError> {
        if !self.names.insert(name.to_string()) {
            return Err(MarionetteError::NameCollision(name.to_string()));
        }
        Ok(())
    }

    pub(crate) fn release(&mut self, name: &str) {
        self.names.remove(name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn world(&self) -> BodyId {
        BodyId(0)
    }

    pub fn set_gravity(&mut self, gravity: SymMatrix) -> Result<(), MarionetteError> {
        self.gravity = body::vector3("gravity", gravity)?;
        Ok(())
    }

    pub fn gravity(&self) -> &SymMatrix {
        &self.gravity
    }

    /// Declares a parameter with a default value and returns its symbol
    pub fn add_parameter(&mut self, name: &str, default: f64) -> Result<Expr, MarionetteError> {
        let name = self.register(name, "param")?;
        self.symbols.push(SymbolDef {
            name: name.clone(),
            shape: Shape::Scalar,
            kind: VarKind::Parameter,
            initial: Some(matrix::scalar(default)),
            value: None,
        });
        Ok(Expr::symbol(&name))
    }

    /// Declares an external input and returns its element symbols
    pub fn add_input(&mut self, name: &str, shape: Shape) -> Result<SymMatrix, MarionetteError> {
        let name = self.register(name, "input")?;
        let var = self.push_symbol(name, shape, VarKind::Input, None, None);
        Ok(var.expr())
    }

    /// Declares a named expression, `kind` being [VarKind::UserExp], [VarKind::Sensor] or
    /// [VarKind::Controller]. Returns the symbols standing for it.
    pub fn add_expression<'a>(
        &mut self,
        name: impl Into<Option<&'a str>>,
        value: SymMatrix,
        kind: VarKind,
    ) -> Result<SymMatrix, MarionetteError> {
        if !matches!(kind, VarKind::UserExp | VarKind::Sensor | VarKind::Controller) {
            return Err(MarionetteError::Authoring(format!("expressions cannot be of kind {:?}", kind)));
        }
        let name = self.register(name, "exp")?;
        let shape = Shape::from_dim(value.dim());
        let var = self.push_symbol(name, shape, kind, None, Some(value));
        Ok(var.expr())
    }

    fn push_symbol(
        &mut self,
        name: String,
        shape: Shape,
        kind: VarKind,
        initial: Option<SymMatrix>,
        value: Option<SymMatrix>,
    ) -> Variable {
        self.symbols.push(SymbolDef {
            name: name.clone(),
            shape,
            kind,
            initial,
            value,
        });
        Variable::new(&name, shape, kind)
    }

    pub fn body(&self, id: BodyId) -> Result<&Body, MarionetteError> {
        self.bodies
            .get(id.0)
            .ok_or_else(|| MarionetteError::Authoring(format!("unknown body {:?}", id)))
    }

    pub fn frame(&self, id: FrameId) -> Result<&Frame, MarionetteError> {
        self.frames
            .get(id.0)
            .ok_or_else(|| MarionetteError::Authoring(format!("unknown frame {:?}", id)))
    }

    pub fn joint(&self, id: JointId) -> Result<&Joint, MarionetteError> {
        self.joints
            .get(id.0)
            .ok_or_else(|| MarionetteError::Authoring(format!("unknown joint {:?}", id)))
    }

    pub fn load(&self, id: LoadId) -> Result<&Load, MarionetteError> {
        self.loads
            .get(id.0)
            .ok_or_else(|| MarionetteError::Authoring(format!("unknown load {:?}", id)))
    }

    pub fn sensor(&self, id: SensorId) -> Result<&Sensor, MarionetteError> {
        self.sensors
            .get(id.0)
            .ok_or_else(|| MarionetteError::Authoring(format!("unknown sensor {:?}", id)))
    }

    pub fn constraint(&self, id: ConstraintId) -> Result<&Constraint, MarionetteError> {
        self.constraints
            .get(id.0)
            .ok_or_else(|| MarionetteError::Authoring(format!("unknown constraint {:?}", id)))
    }

    pub fn loop_def(&self, id: LoopId) -> Result<&LoopDef, MarionetteError> {
        self.loops
            .get(id.0)
            .ok_or_else(|| MarionetteError::Authoring(format!("unknown loop {:?}", id)))
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn symbols(&self) -> &[SymbolDef] {
        &self.symbols
    }

    /// Looks up a body by name
    pub fn body_by_name(&self, name: &str) -> Option<BodyId> {
        self.bodies.iter().position(|b| b.name == name).map(BodyId)
    }

    pub fn joint_by_name(&self, name: &str) -> Option<JointId> {
        self.joints.iter().position(|j| j.name == name).map(JointId)
    }

    pub fn frame_by_name(&self, name: &str) -> Option<FrameId> {
        self.frames.iter().position(|f| f.name == name).map(FrameId)
    }
}

fn validate_name(name: &str) -> Result<(), MarionetteError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    if !valid {
        return Err(MarionetteError::Authoring(format!("invalid name '{}'", name)));
    }
    Ok(())
}

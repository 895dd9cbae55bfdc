use super::{explicit, require, LoopSolution};
use crate::canonical::{CanonicalModel, ElementaryJoint};
use crate::model::JointId;
use crate::symbolic::{matrix, Expr};
use crate::MarionetteError;
use std::collections::HashSet;

/// A joint whose coordinate is an explicit function of other joint coordinates, such as a
/// cam follower or a measured kinematic coupling
#[derive(Debug, Clone)]
pub struct ExpJoint {
    name: String,
    joint: ElementaryJoint,
    expression: Expr,
    /// The coordinates the expression reads, in tree order
    inputs: Vec<ElementaryJoint>,
}

impl ExpJoint {
    pub fn new(name: &str, joint: JointId, expression: Expr, model: &CanonicalModel) -> Result<Self, MarionetteError> {
        let joint = match model.elementary(joint)?.as_slice() {
            [j] => (*j).clone(),
            _ => return Err(MarionetteError::structural(name, "the driven joint must have one degree of freedom")),
        };
        let read: HashSet<String> = expression.symbols().iter().map(|s| s.name().to_string()).collect();
        let inputs = model
            .tree()
            .iter()
            .filter_map(|node| node.get().joint.as_ref())
            .filter(|j| read.contains(&format!("q_{}", j.name)))
            .cloned()
            .collect::<Vec<_>>();
        require(!inputs.is_empty(), name, "expression reads no joint coordinate")?;
        require(
            inputs.iter().all(|j| j.name != joint.name),
            name,
            "expression references its own joint",
        )?;
        Ok(ExpJoint {
            name: name.to_string(),
            joint,
            expression,
            inputs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solve(&self) -> Result<LoopSolution, MarionetteError> {
        let u = self.inputs.iter().collect::<Vec<_>>();
        Ok(explicit(&self.name, &u, &[&self.joint], matrix::column([self.expression.clone()])))
    }
}

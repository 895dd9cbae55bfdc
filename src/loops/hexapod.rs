use super::{chain_to, common_ancestor, implicit, require, LoopSolution};
use crate::canonical::{CanonicalFrame, CanonicalModel, ElementaryJoint};
use crate::model::{BodyId, FrameId};
use crate::symbolic::{matrix, SymMatrix};
use crate::MarionetteError;
use itertools::Itertools;

/// Joints of the chain from `ancestor` to the frame's body, root side first, with the frame
/// position and rotation in `ancestor` coordinates
fn pose(
    model: &CanonicalModel,
    frame: &CanonicalFrame,
    ancestor: BodyId,
    entity: &str,
) -> Result<(Vec<ElementaryJoint>, SymMatrix, SymMatrix), MarionetteError> {
    let mut chain = chain_to(model, frame.body, ancestor, entity)?;
    chain.reverse();
    let (mut p, mut r) = (matrix::zeros(3, 1), matrix::identity(3));
    for joint in &chain {
        let (pj, rj) = joint.transform()?;
        p = &p + &matrix::matmul(&r, &pj)?;
        r = matrix::matmul(&r, &rj)?;
    }
    let p = &p + &matrix::matmul(&r, &frame.position)?;
    let r = matrix::matmul(&r, &frame.rotation)?;
    Ok((chain.into_iter().cloned().collect(), p, r))
}

/// Both chains of a platform loop, checked for the number of strut coordinates
struct Chains {
    platform: Vec<ElementaryJoint>,
    strut: Vec<ElementaryJoint>,
    /// Platform frame position and rotation in the common ancestor
    p_platform: SymMatrix,
    r_platform: SymMatrix,
    p_strut: SymMatrix,
    r_strut: SymMatrix,
}

impl Chains {
    fn new(name: &str, platform: FrameId, strut: FrameId, dofs: usize, model: &CanonicalModel) -> Result<Self, MarionetteError> {
        let (fp, fs) = (model.frame(platform)?, model.frame(strut)?);
        let ancestor = common_ancestor(model, fp.body, fs.body, name)?;
        let (platform, p_platform, r_platform) = pose(model, fp, ancestor, name)?;
        let (strut, p_strut, r_strut) = pose(model, fs, ancestor, name)?;
        require(!platform.is_empty(), name, "the platform frame does not move relative to the strut base")?;
        require(
            strut.len() == dofs,
            name,
            format!("strut chain has {} coordinates, expected {}", strut.len(), dofs),
        )?;
        Ok(Chains {
            platform,
            strut,
            p_platform,
            r_platform,
            p_strut,
            r_strut,
        })
    }

    fn position_gap(&self) -> SymMatrix {
        &self.p_strut - &self.p_platform
    }
}

/// A moving platform carried by struts. Each strut is its own loop: the tip of a three-dof
/// strut (typically a universal joint and a slider) is closed onto a point of the platform.
///
/// Independent: the platform coordinates. Eliminated: the strut coordinates, found by Newton
/// iteration from their initial values.
#[derive(Debug, Clone)]
pub struct Hexapod {
    name: String,
    platform: Vec<ElementaryJoint>,
    strut: Vec<ElementaryJoint>,
    residual: SymMatrix,
}

impl Hexapod {
    pub fn new(name: &str, platform: FrameId, strut: FrameId, model: &CanonicalModel) -> Result<Self, MarionetteError> {
        let chains = Chains::new(name, platform, strut, 3, model)?;
        Ok(Hexapod {
            name: name.to_string(),
            residual: chains.position_gap(),
            platform: chains.platform,
            strut: chains.strut,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solve(&self) -> Result<LoopSolution, MarionetteError> {
        implicit(
            &self.name,
            &self.platform.iter().collect_vec(),
            &self.strut.iter().collect_vec(),
            self.residual.clone(),
        )
    }
}

/// A hexapod strut whose joint axes do not intersect. Six strut coordinates are closed onto
/// the platform frame in position and orientation.
#[derive(Debug, Clone)]
pub struct AxisOffsetHexapod {
    name: String,
    platform: Vec<ElementaryJoint>,
    strut: Vec<ElementaryJoint>,
    residual: SymMatrix,
}

impl AxisOffsetHexapod {
    pub fn new(name: &str, platform: FrameId, strut: FrameId, model: &CanonicalModel) -> Result<Self, MarionetteError> {
        let chains = Chains::new(name, platform, strut, 6, model)?;
        // vanishes with the relative rotation to first order
        let relative = matrix::matmul(&matrix::transpose(&chains.r_platform), &chains.r_strut)?;
        let orientation = matrix::column([
            relative[[2, 1]].clone(),
            relative[[0, 2]].clone(),
            relative[[1, 0]].clone(),
        ]);
        let residual = matrix::vstack(&[chains.position_gap(), orientation])?;
        Ok(AxisOffsetHexapod {
            name: name.to_string(),
            platform: chains.platform,
            strut: chains.strut,
            residual,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn solve(&self) -> Result<LoopSolution, MarionetteError> {
        implicit(
            &self.name,
            &self.platform.iter().collect_vec(),
            &self.strut.iter().collect_vec(),
            self.residual.clone(),
        )
    }
}

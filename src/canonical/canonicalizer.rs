use super::{CanonicalBody, CanonicalFrame, CanonicalModel, CanonicalNode, ElementaryJoint};
use crate::arena::DirectedArenaTree;
use crate::model::{BodyId, Dof, FrameId, JointId, System};
use crate::symbolic::{matrix, Expr, SymMatrix};
use crate::MarionetteError;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
struct WorkBody {
    name: String,
    mass: Expr,
    cg: SymMatrix,
    inertia: SymMatrix,
    merged_into: Option<BodyId>,
}

#[derive(Debug, Clone)]
struct WorkFrame {
    name: String,
    body: BodyId,
    parent: Option<FrameId>,
    position: SymMatrix,
    rotation: SymMatrix,
}

/// One elementary (or fixed) joint of the expanded model
#[derive(Debug, Clone)]
struct WorkJoint {
    name: String,
    source: JointId,
    /// `None` for a fixed joint
    dof: Option<Dof>,
    parent: FrameId,
    child: BodyId,
    q0: f64,
    qd0: f64,
    merged: bool,
}

/// Runs the lowering passes. See the [module documentation](super).
#[derive(Debug, Clone)]
pub struct Canonicalizer<'s> {
    system: &'s System,
    bodies: Vec<WorkBody>,
    frames: Vec<WorkFrame>,
    joints: Vec<WorkJoint>,
}

impl<'s> Canonicalizer<'s> {
    /// Copies the system and expands every multi-dof joint into a chain of elementary joints
    /// through zero-mass bodies
    pub fn new(system: &'s System) -> Self {
        let bodies = system
            .bodies
            .iter()
            .map(|b| WorkBody {
                name: b.name.clone(),
                mass: b.mass.clone(),
                cg: b.cg.clone(),
                inertia: b.inertia.clone(),
                merged_into: None,
            })
            .collect();
        let frames = system
            .frames
            .iter()
            .map(|f| WorkFrame {
                name: f.name.clone(),
                body: f.body,
                parent: f.parent,
                position: f.position.clone(),
                rotation: f.rotation.clone(),
            })
            .collect();
        let mut canonicalizer = Canonicalizer {
            system,
            bodies,
            frames,
            joints: vec![],
        };

        for (index, joint) in system.joints.iter().enumerate() {
            let source = JointId(index);
            if joint.dofs.is_empty() {
                canonicalizer.joints.push(WorkJoint {
                    name: joint.name.clone(),
                    source,
                    dof: None,
                    parent: joint.parent,
                    child: joint.child,
                    q0: 0.0,
                    qd0: 0.0,
                    merged: false,
                });
                continue;
            }
            let names = joint.elementary_names();
            let intermediates = joint.intermediate_bodies();
            let mut parent = joint.parent;
            for (i, dof) in joint.dofs.iter().enumerate() {
                let (child, next) = match intermediates.get(i) {
                    Some(name) => {
                        let (body, origin) = canonicalizer.push_intermediate(name);
                        (body, Some(origin))
                    }
                    None => (joint.child, None),
                };
                canonicalizer.joints.push(WorkJoint {
                    name: names[i].clone(),
                    source,
                    dof: Some(*dof),
                    parent,
                    child,
                    q0: joint.q0[i],
                    qd0: joint.qd0[i],
                    merged: false,
                });
                if let Some(origin) = next {
                    parent = origin;
                }
            }
        }
        canonicalizer
    }

    fn push_intermediate(&mut self, name: &str) -> (BodyId, FrameId) {
        let body = BodyId(self.bodies.len());
        let origin = FrameId(self.frames.len());
        self.bodies.push(WorkBody {
            name: name.to_string(),
            mass: Expr::number(0.0),
            cg: matrix::zeros(3, 1),
            inertia: matrix::zeros(3, 3),
            merged_into: None,
        });
        self.frames.push(WorkFrame {
            name: name.to_string(),
            body,
            parent: None,
            position: matrix::zeros(3, 1),
            rotation: matrix::identity(3),
        });
        (body, origin)
    }

    /// Re-parents every nested frame directly onto its body, composing
    /// `p' = p_parent + R_parent·p` and `R' = R_parent·R`. Running it twice changes nothing.
    pub fn flatten(&mut self) -> Result<(), MarionetteError> {
        let mut resolved: Vec<Option<(SymMatrix, SymMatrix)>> = vec![None; self.frames.len()];
        let mut count = 0;
        for index in 0..self.frames.len() {
            if self.frames[index].parent.is_none() {
                continue;
            }
            // walk up to the first frame sitting directly on the body
            let mut chain = vec![];
            let mut current = Some(FrameId(index));
            while let Some(id) = current {
                if chain.len() > self.frames.len() {
                    return Err(MarionetteError::structural(&self.frames[index].name, "frame hierarchy is cyclic"));
                }
                chain.push(id);
                current = self.frames[id.0].parent;
            }
            let mut p = matrix::zeros(3, 1);
            let mut r = matrix::identity(3);
            for id in chain {
                let f = &self.frames[id.0];
                p = &f.position + &matrix::matmul(&f.rotation, &p)?;
                r = matrix::matmul(&f.rotation, &r)?;
            }
            resolved[index] = Some((p, r));
            count += 1;
        }
        for (frame, value) in self.frames.iter_mut().zip(resolved) {
            if let Some((p, r)) = value {
                frame.position = p;
                frame.rotation = r;
                frame.parent = None;
            }
        }
        if count > 0 {
            debug!(frames = count, "flattened nested frames");
        }
        Ok(())
    }

    /// Merges the child body of the fixed joint `joint` into its parent body
    pub fn merge_fixed_joint(&mut self, joint: JointId) -> Result<(), MarionetteError> {
        let system = self.system;
        let authored = system.joint(joint)?;
        if !authored.is_fixed() {
            return Err(MarionetteError::Authoring(format!("joint {} is not fixed", authored.name)));
        }
        let index = self
            .joints
            .iter()
            .position(|j| j.source == joint)
            .ok_or_else(|| MarionetteError::structural(&authored.name, "joint was not expanded"))?;
        if self.joints[index].merged {
            return Err(MarionetteError::AlreadyMerged(authored.name.clone()));
        }
        self.flatten()?;

        let (frame, child) = (self.joints[index].parent, self.joints[index].child);
        let parent = self.frames[frame.0].body;
        let (p_f, r_f) = (self.frames[frame.0].position.clone(), self.frames[frame.0].rotation.clone());

        // the child's frames now hang on the parent
        for f in self.frames.iter_mut().filter(|f| f.body == child) {
            f.position = &p_f + &matrix::matmul(&r_f, &f.position)?;
            f.rotation = matrix::matmul(&r_f, &f.rotation)?;
            f.body = parent;
        }

        let (a, b) = (&self.bodies[parent.0], &self.bodies[child.0]);
        let mass = &a.mass + &b.mass;
        let d = &p_f + &matrix::matmul(&r_f, &b.cg)?;
        let cg = match mass.as_number() {
            Some(m) if m == 0.0 => a.cg.clone(),
            _ => (a.cg.mapv(|e| e * &a.mass) + d.mapv(|e| e * &b.mass)).mapv(|e| e / &mass),
        };
        // parallel-axis term of the child's center of gravity
        let rotated = matrix::matmul(&matrix::matmul(&r_f, &b.inertia)?, &matrix::transpose(&r_f))?;
        let squared = matrix::dot(&d, &d)?;
        let offset = matrix::identity(3).mapv(|e| e * &squared) - matrix::matmul(&d, &matrix::transpose(&d))?;
        let inertia = &(&a.inertia + &rotated) + &offset.mapv(|e| e * &b.mass);

        debug!(joint = %authored.name, parent = %a.name, child = %b.name, "merged fixed joint");
        let body = &mut self.bodies[parent.0];
        body.mass = mass;
        body.cg = cg;
        body.inertia = inertia;
        self.bodies[child.0].merged_into = Some(parent);
        self.joints[index].merged = true;
        self.flatten()
    }

    /// Merges every fixed joint that is not merged yet
    pub fn apply_fixed_joints(&mut self) -> Result<(), MarionetteError> {
        let pending = self
            .joints
            .iter()
            .filter(|j| j.dof.is_none() && !j.merged)
            .map(|j| j.source)
            .collect::<Vec<_>>();
        for joint in pending {
            self.merge_fixed_joint(joint)?;
        }
        Ok(())
    }

    /// Builds the canonical joint tree rooted at the inertial body
    #[instrument(skip(self))]
    pub fn finish(mut self) -> Result<CanonicalModel, MarionetteError> {
        self.flatten()?;
        self.apply_fixed_joints()?;

        let world = self.system.world();
        let live = |b: &BodyId| self.bodies[b.0].merged_into.is_none();
        let mut incoming: HashMap<BodyId, usize> = HashMap::new();
        for (index, joint) in self.joints.iter().enumerate().filter(|(_, j)| !j.merged) {
            incoming.insert(joint.child, index);
        }

        let mut tree = DirectedArenaTree::new();
        tree.set_root(
            CanonicalNode {
                body: self.canonical_body(world),
                joint: None,
            },
            world,
        );
        let mut visited = HashSet::from([world]);
        let mut queue = VecDeque::from([world]);
        while let Some(body) = queue.pop_front() {
            let children = self
                .joints
                .iter()
                .filter(|j| !j.merged && self.frames[j.parent.0].body == body)
                .collect::<Vec<_>>();
            for joint in children {
                let Some(dof) = joint.dof else { continue };
                let frame = &self.frames[joint.parent.0];
                let node = CanonicalNode {
                    body: self.canonical_body(joint.child),
                    joint: Some(ElementaryJoint {
                        name: joint.name.clone(),
                        source: joint.source,
                        dof,
                        parent: body,
                        position: frame.position.clone(),
                        rotation: frame.rotation.clone(),
                        q0: joint.q0,
                        qd0: joint.qd0,
                    }),
                };
                tree.add(node, joint.child, &body)?;
                visited.insert(joint.child);
                queue.push_back(joint.child);
            }
        }

        let bodies = (0..self.bodies.len()).map(BodyId).filter(live).collect::<Vec<_>>();
        if let Some(lost) = bodies.iter().find(|b| !visited.contains(b)) {
            let reason = if incoming.contains_key(lost) {
                "body is part of a joint cycle"
            } else {
                "body is not connected to the inertial body"
            };
            return Err(MarionetteError::structural(&self.bodies[lost.0].name, reason));
        }

        let mut joints: HashMap<JointId, Vec<BodyId>> = HashMap::new();
        for joint in self.joints.iter().filter(|j| !j.merged) {
            joints.entry(joint.source).or_default().push(joint.child);
        }
        for (index, _) in self.system.joints.iter().enumerate() {
            joints.entry(JointId(index)).or_default();
        }

        let merged = self
            .bodies
            .iter()
            .enumerate()
            .filter_map(|(index, b)| b.merged_into.map(|target| (BodyId(index), target)))
            .collect::<HashMap<_, _>>();
        let frames = self
            .frames
            .iter()
            .enumerate()
            .map(|(index, f)| {
                (
                    FrameId(index),
                    CanonicalFrame {
                        name: f.name.clone(),
                        body: f.body,
                        position: f.position.clone(),
                        rotation: f.rotation.clone(),
                    },
                )
            })
            .collect();

        debug!(bodies = tree.len(), merged = merged.len(), "built canonical joint tree");
        Ok(CanonicalModel {
            tree: tree.depth_first(),
            frames,
            joints,
            merged,
            loads: self.system.loads.clone(),
            sensors: self.system.sensors.clone(),
            constraints: self.system.constraints.clone(),
            loops: self.system.loops.clone(),
            symbols: self.system.symbols.clone(),
            gravity: self.system.gravity.clone(),
        })
    }

    fn canonical_body(&self, body: BodyId) -> CanonicalBody {
        let b = &self.bodies[body.0];
        CanonicalBody {
            name: b.name.clone(),
            mass: b.mass.clone(),
            cg: b.cg.clone(),
            inertia: b.inertia.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::matrix::numbers;
    use crate::symbolic::{evaluate_matrix, Environment};
    use approx::assert_abs_diff_eq;

    fn values(m: &SymMatrix) -> ndarray::Array2<f64> {
        evaluate_matrix(m, &Environment::new()).unwrap()
    }

    #[test_log::test]
    fn test_merge_recombines_mass_properties() {
        let (m_a, m_b) = (2.0, 3.0);
        let d = [0.5, -0.2, 0.1];
        let mut system = System::new();
        let world = system.origin(system.world()).unwrap();
        let i_a = numbers(&[1.0, 0.0, 1.5, 0.0, 0.0, 2.0]);
        let i_b = numbers(&[0.3, 0.01, 0.4, 0.02, 0.03, 0.5]);
        let a = system.add_body("A", m_a, numbers(&[0.0, 0.0, 0.0]), i_a).unwrap();
        let b = system.add_body("B", m_b, numbers(&d), i_b).unwrap();
        let a0 = system.origin(a).unwrap();
        let b0 = system.origin(b).unwrap();
        let marker = system.add_frame("marker", b0, numbers(&[1.0, 0.0, 0.0]), None).unwrap();
        system.add_joint("hinge", world, a, &[Dof::Rz]).unwrap();
        let weld = system.add_joint("weld", a0, b, &[]).unwrap();

        let mut canonicalizer = Canonicalizer::new(&system);
        canonicalizer.merge_fixed_joint(weld).unwrap();
        assert!(matches!(
            canonicalizer.merge_fixed_joint(weld),
            Err(MarionetteError::AlreadyMerged(name)) if name == "weld"
        ));
        let model = canonicalizer.finish().unwrap();

        assert_eq!(model.len(), 2);
        assert_eq!(model.resolve_body(b), a);
        let merged = &model.node(b).unwrap().get().body;
        assert_eq!(merged.name, "A");
        assert_abs_diff_eq!(merged.mass.evaluate(&Environment::new()).unwrap(), m_a + m_b);

        let cg = values(&merged.cg);
        for i in 0..3 {
            assert_abs_diff_eq!(cg[[i, 0]], m_b * d[i] / (m_a + m_b), epsilon = 1e-12);
        }
        let inertia = values(&merged.inertia);
        let (ia, ib) = (values(&system.body(a).unwrap().inertia), values(&system.body(b).unwrap().inertia));
        let dd = d.iter().map(|x| x * x).sum::<f64>();
        for i in 0..3 {
            for j in 0..3 {
                let delta = if i == j { 1.0 } else { 0.0 };
                let expected = ia[[i, j]] + ib[[i, j]] + m_b * (dd * delta - d[i] * d[j]);
                assert_abs_diff_eq!(inertia[[i, j]], expected, epsilon = 1e-12);
            }
        }

        // frames of the merged body now sit on A
        let frame = model.frame(marker).unwrap();
        assert_eq!(frame.body, a);
        assert_abs_diff_eq!(values(&frame.position)[[0, 0]], 1.0);
    }

    #[test_log::test]
    fn test_flatten_is_idempotent() {
        let mut system = System::new();
        let b = system.add_body("b", 1.0, matrix::zeros(3, 1), matrix::identity(3)).unwrap();
        let origin = system.origin(b).unwrap();
        let quarter = matrix::rotation(2, &Expr::number(std::f64::consts::FRAC_PI_2));
        let f1 = system.add_frame("f1", origin, numbers(&[1.0, 0.0, 0.0]), Some(quarter)).unwrap();
        let f2 = system.add_frame("f2", f1, numbers(&[0.0, 2.0, 0.0]), None).unwrap();

        let mut canonicalizer = Canonicalizer::new(&system);
        canonicalizer.flatten().unwrap();
        let once = values(&canonicalizer.frames[f2.0].position);
        canonicalizer.flatten().unwrap();
        let twice = values(&canonicalizer.frames[f2.0].position);
        assert_eq!(once, twice);
        // (1, 0, 0) + Rz(90°)·(0, 2, 0)
        assert_abs_diff_eq!(once[[0, 0]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(once[[1, 0]], 0.0, epsilon = 1e-12);
        assert!(canonicalizer.frames[f2.0].parent.is_none());
    }

    #[test_log::test]
    fn test_expansion_and_connectivity() {
        let mut system = System::new();
        let world = system.origin(system.world()).unwrap();
        let b = system.add_body("b", 1.0, matrix::zeros(3, 1), matrix::identity(3)).unwrap();
        let free = system.add_joint("free", world, b, &[Dof::Tx, Dof::Ty, Dof::Rz]).unwrap();
        system.set_initial(free, &[1.0, 2.0, 0.5], &[0.0, 0.0, 0.1]).unwrap();

        let model = Canonicalizer::new(&system).finish().unwrap();
        assert_eq!(model.coordinates(), ["free_Tx", "free_Ty", "free_Rz"]);
        let chain = model.elementary(free).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2].dof, Dof::Rz);
        assert_abs_diff_eq!(chain[2].qd0, 0.1);
        assert_eq!(model.path(b).unwrap().len(), 3);
        assert_eq!(model.tree().get(crate::arena::ArenaIndex(1)).unwrap().get().body.name, "free_Tx_body");

        system.add_body("floating", 1.0, matrix::zeros(3, 1), matrix::identity(3)).unwrap();
        assert!(matches!(
            Canonicalizer::new(&system).finish(),
            Err(MarionetteError::Structural { entity, .. }) if entity == "floating"
        ));
    }
}

//! Test fixtures for the MetaDNA workspace: an in-memory DNA codec, a fixture
//! armature, a lookup-table evaluator, and a canned body rig document.
//!
//! The in-memory codec implements the full reader/writer contract over a
//! plain document, with writer mutations staged until `save` (transactional
//! replace), so the commit engine is exercisable end-to-end without the
//! binary format.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use metadna_api_core::dna::{
    output_row_index, ATTR_LOCATION, ATTR_ROTATION, ATTR_SCALE, DnaCodec, DnaError, DnaReader,
    DnaWriter, JointGroup, PoseTableEntry, SolverTableEntry,
};
use metadna_api_core::rbf::driver_bone_for_solver;
use metadna_api_core::value::{euler_to_quat, quat_angle_between, quat_to_euler, TransformDelta};
use metadna_api_core::{DriverRecord, DrivenDataType, DrivenRecord, Pose, Solver};
use metadna_pose_core::binding::{Armature, EvalError, Evaluator, EvaluatorProvider};
use metadna_pose_core::session::EditSession;

/// Everything the in-memory codec persists for one DNA file.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryDnaDoc {
    pub joints: Vec<String>,
    pub blend_shape_channels: Vec<String>,
    pub raw_control_count: u16,
    pub poses: Vec<PoseTableEntry>,
    pub solvers: Vec<SolverTableEntry>,
    pub joint_groups: Vec<JointGroup>,
}

static BODY_RIG: Lazy<MemoryDnaDoc> = Lazy::new(|| {
    let raw = include_str!("../fixtures/body_rig.json");
    serde_json::from_str(raw).expect("body rig fixture should parse")
});

/// The canned two-solver leg rig used across the test suites.
pub fn body_rig_doc() -> MemoryDnaDoc {
    BODY_RIG.clone()
}

// ---------------------------------------------------------------------------
// In-memory codec

/// Codec over a shared in-memory document. Clones share the document, so a
/// test can re-open readers after a commit and observe the written state.
#[derive(Clone)]
pub struct MemoryDnaCodec {
    doc: Arc<Mutex<MemoryDnaDoc>>,
}

impl MemoryDnaCodec {
    pub fn new(doc: MemoryDnaDoc) -> Self {
        Self {
            doc: Arc::new(Mutex::new(doc)),
        }
    }

    /// Current document contents (a copy).
    pub fn document(&self) -> MemoryDnaDoc {
        self.doc.lock().expect("fixture doc lock").clone()
    }
}

impl DnaCodec for MemoryDnaCodec {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn DnaReader>, DnaError> {
        if !path.exists() {
            return Err(DnaError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        Ok(Box::new(MemoryDnaReader {
            doc: self.document(),
        }))
    }

    fn open_writer(&self, path: &Path) -> Result<Box<dyn DnaWriter>, DnaError> {
        if !path.exists() {
            return Err(DnaError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        Ok(Box::new(MemoryDnaWriter {
            shared: Arc::clone(&self.doc),
            staged: self.document(),
        }))
    }
}

/// Read handle: a consistent view of the document at open time.
pub struct MemoryDnaReader {
    doc: MemoryDnaDoc,
}

fn read_cell(group: &JointGroup, column: usize, joint: u16, attribute_offset: u16) -> f32 {
    group
        .row_of_output(output_row_index(joint, attribute_offset))
        .map(|row| group.value_at(row, column))
        .unwrap_or(0.0)
}

fn solvers_from_doc(doc: &MemoryDnaDoc) -> Vec<Solver> {
    let mut solvers = Vec::with_capacity(doc.solvers.len());

    for (solver_position, entry) in doc.solvers.iter().enumerate() {
        let solver_index = solver_position as u16;
        let mut solver = Solver::new(solver_index, entry.name.clone());
        solver.mode = entry.mode;
        solver.radius = entry.radius;
        solver.weight_threshold = entry.weight_threshold;
        solver.distance_method = entry.distance_method;
        solver.normalize_method = entry.normalize_method;
        solver.function_type = entry.function_type;
        solver.twist_axis = entry.twist_axis;
        solver.automatic_radius = entry.automatic_radius;

        for &pose_position in &entry.pose_positions {
            let Some(pose_entry) = doc.poses.get(pose_position as usize) else {
                continue;
            };
            let mut pose = Pose::new(solver_index, pose_position, pose_entry.name.clone());
            pose.scale_factor = pose_entry.scale;

            let group_position = doc
                .joint_groups
                .iter()
                .position(|g| g.input_indices.contains(&pose_entry.control_index));
            pose.joint_group_index = group_position.map(|g| g as u16);

            let driver_name = pose_entry
                .driver_joint_index
                .and_then(|j| doc.joints.get(j as usize).cloned())
                .unwrap_or_else(|| driver_bone_for_solver(&entry.name).to_string());
            let mut driver = DriverRecord::new(solver_index, pose_position, driver_name);
            driver.joint_index = pose_entry.driver_joint_index;
            driver.quaternion_rotation = pose_entry.driver_value;
            driver.euler_rotation = quat_to_euler(pose_entry.driver_value);
            pose.drivers.push(driver);

            if let Some(group_position) = group_position {
                let group = &doc.joint_groups[group_position];
                if let Some(column) = group.column_of_control(pose_entry.control_index) {
                    for &joint in &group.joint_indices {
                        let name = doc
                            .joints
                            .get(joint as usize)
                            .cloned()
                            .unwrap_or_else(|| format!("joint_{joint}"));
                        let mut driven = DrivenRecord::new(pose_position, name);
                        driven.joint_index = Some(joint);
                        driven.joint_group_index = Some(group_position as u16);
                        for axis in 0..3u16 {
                            driven.location[axis as usize] =
                                read_cell(group, column, joint, ATTR_LOCATION + axis);
                            driven.euler_rotation[axis as usize] =
                                read_cell(group, column, joint, ATTR_ROTATION + axis);
                            driven.scale[axis as usize] =
                                read_cell(group, column, joint, ATTR_SCALE + axis);
                        }
                        driven.quaternion_rotation = euler_to_quat(driven.euler_rotation);
                        pose.driven.push(driven);
                    }
                }
            }

            for (position, &channel) in pose_entry.output_control_indices.iter().enumerate() {
                let name = doc
                    .blend_shape_channels
                    .get(channel as usize)
                    .cloned()
                    .unwrap_or_else(|| format!("channel_{channel}"));
                let mut driven = DrivenRecord::new(pose_position, name);
                driven.data_type = DrivenDataType::ShapeKey;
                driven.scalar_value = pose_entry
                    .output_control_weights
                    .get(position)
                    .copied()
                    .unwrap_or(0.0);
                pose.driven.push(driven);
            }

            solver.poses.push(pose);
        }

        solvers.push(solver);
    }

    solvers
}

impl DnaReader for MemoryDnaReader {
    fn joint_count(&self) -> u16 {
        self.doc.joints.len() as u16
    }

    fn joint_name(&self, joint_index: u16) -> Option<String> {
        self.doc.joints.get(joint_index as usize).cloned()
    }

    fn blend_shape_channel_count(&self) -> u16 {
        self.doc.blend_shape_channels.len() as u16
    }

    fn blend_shape_channel_name(&self, channel_index: u16) -> Option<String> {
        self.doc
            .blend_shape_channels
            .get(channel_index as usize)
            .cloned()
    }

    fn raw_control_count(&self) -> u16 {
        self.doc.raw_control_count
    }

    fn rbf_solver_count(&self) -> u16 {
        self.doc.solvers.len() as u16
    }

    fn rbf_pose_count(&self) -> u16 {
        self.doc.poses.len() as u16
    }

    fn rbf_pose_name(&self, pose_index: u16) -> Option<String> {
        self.doc.poses.get(pose_index as usize).map(|p| p.name.clone())
    }

    fn rbf_pose_scale(&self, pose_index: u16) -> Option<f32> {
        self.doc.poses.get(pose_index as usize).map(|p| p.scale)
    }

    fn rbf_pose_control_index(&self, pose_index: u16) -> Option<u16> {
        self.doc
            .poses
            .get(pose_index as usize)
            .map(|p| p.control_index)
    }

    fn rbf_solvers(&self) -> Vec<Solver> {
        solvers_from_doc(&self.doc)
    }

    fn joint_group_count(&self) -> u16 {
        self.doc.joint_groups.len() as u16
    }

    fn joint_group(&self, group_index: u16) -> Option<JointGroup> {
        self.doc.joint_groups.get(group_index as usize).cloned()
    }
}

/// Write handle: mutations are staged and only land in the shared document on
/// `save`, so an aborted commit leaves the prior state intact.
pub struct MemoryDnaWriter {
    shared: Arc<Mutex<MemoryDnaDoc>>,
    staged: MemoryDnaDoc,
}

impl DnaWriter for MemoryDnaWriter {
    fn set_raw_control_count(&mut self, count: u16) {
        self.staged.raw_control_count = count;
    }

    fn set_rbf_pose_table(&mut self, poses: &[PoseTableEntry]) {
        self.staged.poses = poses.to_vec();
    }

    fn set_rbf_solver_table(&mut self, solvers: &[SolverTableEntry]) {
        self.staged.solvers = solvers.to_vec();
    }

    fn create_joint_group(&mut self) -> u16 {
        self.staged.joint_groups.push(JointGroup::default());
        (self.staged.joint_groups.len() - 1) as u16
    }

    fn set_joint_group(&mut self, group_index: u16, group: &JointGroup) -> Result<(), DnaError> {
        let count = self.staged.joint_groups.len() as u16;
        match self.staged.joint_groups.get_mut(group_index as usize) {
            Some(slot) => {
                *slot = group.clone();
                Ok(())
            }
            None => Err(DnaError::OutOfRange {
                what: "joint group",
                index: group_index,
                count,
            }),
        }
    }

    fn save(&mut self) -> Result<(), DnaError> {
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| DnaError::Io("fixture doc lock poisoned".to_string()))?;
        *shared = self.staged.clone();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture armature

/// A flat bone table standing in for a host armature. Bones hold local pose
/// deltas; reset returns everything to rest.
pub struct FixtureArmature {
    bones: Vec<(String, TransformDelta)>,
}

impl FixtureArmature {
    pub fn new(bone_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            bones: bone_names
                .into_iter()
                .map(|name| (name, TransformDelta::identity()))
                .collect(),
        }
    }

    /// One armature bone per joint in the document.
    pub fn from_doc(doc: &MemoryDnaDoc) -> Self {
        Self::new(doc.joints.iter().cloned())
    }

    pub fn remove_bone(&mut self, name: &str) {
        self.bones.retain(|(bone, _)| bone != name);
    }
}

impl Armature for FixtureArmature {
    fn bone_names(&self) -> Vec<String> {
        self.bones.iter().map(|(name, _)| name.clone()).collect()
    }

    fn has_bone(&self, name: &str) -> bool {
        self.bones.iter().any(|(bone, _)| bone == name)
    }

    fn pose_delta(&self, name: &str) -> Option<TransformDelta> {
        self.bones
            .iter()
            .find(|(bone, _)| bone == name)
            .map(|(_, delta)| *delta)
    }

    fn set_pose_delta(&mut self, name: &str, delta: &TransformDelta) -> bool {
        match self.bones.iter_mut().find(|(bone, _)| bone == name) {
            Some((_, slot)) => {
                *slot = *delta;
                true
            }
            None => false,
        }
    }

    fn reset_pose(&mut self) {
        for (_, delta) in &mut self.bones {
            *delta = TransformDelta::identity();
        }
    }
}

// ---------------------------------------------------------------------------
// Lookup evaluator

const DRIVER_MATCH_TOLERANCE: f32 = 1e-3;

struct PoseSample {
    driver_bone: String,
    driver_value: [f32; 4],
    driven: Vec<(String, TransformDelta)>,
}

/// Stand-in for the native evaluator: an exact-match lookup from driver
/// rotations to the driven deltas recorded in the DNA. No interpolation —
/// when the driver sits on a calibration sample, the driven outputs are the
/// sample's outputs.
pub struct LookupEvaluator {
    samples: Vec<PoseSample>,
}

impl LookupEvaluator {
    pub fn from_reader(reader: &dyn DnaReader) -> Self {
        let mut samples = Vec::new();
        for solver in reader.rbf_solvers() {
            for pose in &solver.poses {
                if pose.is_default() {
                    continue;
                }
                let Some(driver) = pose.drivers.first() else {
                    continue;
                };
                let mut driven = Vec::new();
                for record in &pose.driven {
                    if record.data_type != DrivenDataType::Bone {
                        continue;
                    }
                    // Scale slots holding the pose scale factor are fill-ins.
                    let mut scale = record.scale;
                    for component in &mut scale {
                        if (*component - pose.scale_factor).abs() < 1e-5 {
                            *component = 0.0;
                        }
                    }
                    driven.push((
                        record.name.clone(),
                        TransformDelta {
                            location: record.location,
                            euler_rotation: record.euler_rotation,
                            quaternion_rotation: euler_to_quat(record.euler_rotation),
                            scale,
                        },
                    ));
                }
                samples.push(PoseSample {
                    driver_bone: driver.name.clone(),
                    driver_value: driver.quaternion_rotation,
                    driven,
                });
            }
        }
        Self { samples }
    }
}

impl Evaluator for LookupEvaluator {
    fn evaluate(&mut self, armature: &mut dyn Armature) -> Result<(), EvalError> {
        for sample in &self.samples {
            let Some(driver_delta) = armature.pose_delta(&sample.driver_bone) else {
                continue;
            };
            let angle =
                quat_angle_between(driver_delta.quaternion_rotation, sample.driver_value);
            if angle > DRIVER_MATCH_TOLERANCE {
                continue;
            }
            for (bone, delta) in &sample.driven {
                armature.set_pose_delta(bone, delta);
            }
        }
        Ok(())
    }
}

pub struct LookupEvaluatorProvider;

impl EvaluatorProvider for LookupEvaluatorProvider {
    fn create(&self, reader: &dyn DnaReader) -> Result<Box<dyn Evaluator>, EvalError> {
        Ok(Box::new(LookupEvaluator::from_reader(reader)))
    }
}

// ---------------------------------------------------------------------------
// Session bootstrap

/// Classify fixture bones the way the rig tooling does: solver driver bones
/// plus name-tagged swing/twist helpers.
fn classify_bones(session: &mut EditSession, doc: &MemoryDnaDoc) {
    for solver in &doc.solvers {
        session
            .driver_bone_names
            .insert(driver_bone_for_solver(&solver.name).to_string());
    }
    for joint in &doc.joints {
        if joint.contains("_twist_") {
            session.twist_bone_names.insert(joint.clone());
        }
        if joint.contains("_swing_") {
            session.swing_bone_names.insert(joint.clone());
        }
    }
}

/// Build a fully bound editing session over the canned body rig: a
/// placeholder DNA file at `dna_path`, an in-memory codec, a fixture
/// armature, and the lookup evaluator. Returns the codec too so tests can
/// inspect the document after commits.
pub fn build_session(dna_path: &Path) -> Result<(EditSession, MemoryDnaCodec)> {
    build_session_with_doc(dna_path, body_rig_doc())
}

pub fn build_session_with_doc(
    dna_path: &Path,
    doc: MemoryDnaDoc,
) -> Result<(EditSession, MemoryDnaCodec)> {
    std::fs::write(dna_path, b"MEMDNA\n")
        .with_context(|| format!("failed to create fixture DNA file at {}", dna_path.display()))?;

    let codec = MemoryDnaCodec::new(doc.clone());
    let mut session = EditSession::default();
    session.bind_armature(Box::new(FixtureArmature::from_doc(&doc)));
    session.bind_evaluator_provider(Box::new(LookupEvaluatorProvider));
    classify_bones(&mut session, &doc);
    session
        .bind_dna(Box::new(codec.clone()), dna_path)
        .context("failed to bind fixture DNA")?;
    Ok((session, codec))
}

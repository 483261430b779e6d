//! RBF solver graph model: solvers, poses, driver records, driven records.
//!
//! These are the records a DNA codec reads out of (and a commit writes back
//! into) the container's RBF sections, plus the editing state the pose editor
//! keeps alongside them (active indices, per-channel edit flags). Codecs
//! ignore the editing state.

use serde::{Deserialize, Serialize};

use crate::value::QUAT_IDENTITY;

/// Name reserved for the rest pose. Always present in a solver, never
/// removable or renamable.
pub const DEFAULT_POSE_NAME: &str = "default";

/// Fixed suffix tying a solver to its driver bone: solver name is the driver
/// bone name plus this suffix.
pub const RBF_SOLVER_SUFFIX: &str = "_UERBFSolver";

/// Solver name for a given driver bone.
pub fn solver_name_for_bone(bone_name: &str) -> String {
    format!("{bone_name}{RBF_SOLVER_SUFFIX}")
}

/// Driver bone name for a given solver name (strips the fixed suffix).
pub fn driver_bone_for_solver(solver_name: &str) -> &str {
    solver_name.strip_suffix(RBF_SOLVER_SUFFIX).unwrap_or(solver_name)
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverMode {
    Additive,
    #[default]
    Interpolative,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMethod {
    Quaternion,
    #[default]
    SwingAngle,
    TwistAngle,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizeMethod {
    OnlyNormalizeAboveOne,
    #[default]
    AlwaysNormalize,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionType {
    #[default]
    Gaussian,
    Exponential,
    Linear,
    Cubic,
    Quintic,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TwistAxis {
    #[default]
    X,
    Y,
    Z,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationMode {
    #[default]
    Quaternion,
    EulerXyz,
}

/// What a driven record drives on the host side.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrivenDataType {
    #[default]
    Bone,
    ShapeKey,
    Mask,
}

/// The driver bone's transform that triggers a pose.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DriverRecord {
    pub solver_index: u16,
    pub pose_index: u16,
    /// Joint index within the DNA definition, once resolved.
    pub joint_index: Option<u16>,
    pub name: String,
    pub rotation_mode: RotationMode,
    pub euler_rotation: [f32; 3],
    /// (w, x, y, z)
    pub quaternion_rotation: [f32; 4],
}

impl DriverRecord {
    pub fn new(solver_index: u16, pose_index: u16, name: impl Into<String>) -> Self {
        Self {
            solver_index,
            pose_index,
            joint_index: None,
            name: name.into(),
            rotation_mode: RotationMode::default(),
            euler_rotation: [0.0; 3],
            quaternion_rotation: QUAT_IDENTITY,
        }
    }
}

/// One output captured at a pose: a bone transform delta, or a scalar driving
/// a shape key or mask channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DrivenRecord {
    pub pose_index: u16,
    pub joint_group_index: Option<u16>,
    pub joint_index: Option<u16>,
    pub name: String,
    pub data_type: DrivenDataType,
    pub rotation_mode: RotationMode,
    pub location: [f32; 3],
    pub euler_rotation: [f32; 3],
    /// (w, x, y, z)
    pub quaternion_rotation: [f32; 4],
    pub scale: [f32; 3],
    /// Channel value in [0, 1] for shape key / mask records.
    pub scalar_value: f32,

    // Editing state, refreshed by the diff pass. Not persisted.
    #[serde(skip)]
    pub location_edited: bool,
    #[serde(skip)]
    pub rotation_edited: bool,
    #[serde(skip)]
    pub scale_edited: bool,
}

impl DrivenRecord {
    pub fn new(pose_index: u16, name: impl Into<String>) -> Self {
        Self {
            pose_index,
            joint_group_index: None,
            joint_index: None,
            name: name.into(),
            data_type: DrivenDataType::default(),
            rotation_mode: RotationMode::default(),
            location: [0.0; 3],
            euler_rotation: [0.0; 3],
            quaternion_rotation: QUAT_IDENTITY,
            scale: [0.0; 3],
            scalar_value: 0.0,
            location_edited: false,
            rotation_edited: false,
            scale_edited: false,
        }
    }
}

/// One calibration sample of a solver.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub solver_index: u16,
    /// Position in the DNA pose table for committed poses; session-created
    /// poses are assigned indices at or above the DNA-resident pose count so
    /// the commit step can tell append from overwrite.
    pub pose_index: u16,
    /// None means the commit step must find or create a joint group.
    pub joint_group_index: Option<u16>,
    pub name: String,
    pub scale_factor: f32,
    pub target_enable: bool,
    pub drivers: Vec<DriverRecord>,
    pub driven: Vec<DrivenRecord>,

    // Editing state. Not persisted.
    #[serde(skip)]
    pub driven_active_index: usize,
    #[serde(skip)]
    pub drivers_active_index: usize,
}

impl Pose {
    pub fn new(solver_index: u16, pose_index: u16, name: impl Into<String>) -> Self {
        Self {
            solver_index,
            pose_index,
            joint_group_index: None,
            name: name.into(),
            scale_factor: 1.0,
            target_enable: true,
            drivers: Vec::new(),
            driven: Vec::new(),
            driven_active_index: 0,
            drivers_active_index: 0,
        }
    }

    #[inline]
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_POSE_NAME
    }

    pub fn driven_by_name(&self, name: &str) -> Option<&DrivenRecord> {
        self.driven.iter().find(|d| d.name == name)
    }

    pub fn driven_by_name_mut(&mut self, name: &str) -> Option<&mut DrivenRecord> {
        self.driven.iter_mut().find(|d| d.name == name)
    }
}

/// A named RBF unit bound to one driver bone, holding an ordered pose list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Solver {
    pub solver_index: u16,
    pub name: String,
    pub mode: SolverMode,
    pub radius: f32,
    pub weight_threshold: f32,
    pub distance_method: DistanceMethod,
    pub normalize_method: NormalizeMethod,
    pub function_type: FunctionType,
    pub twist_axis: TwistAxis,
    pub automatic_radius: bool,
    pub poses: Vec<Pose>,

    // Editing state. Not persisted.
    #[serde(skip)]
    pub poses_active_index: usize,
}

impl Solver {
    pub fn new(solver_index: u16, name: impl Into<String>) -> Self {
        Self {
            solver_index,
            name: name.into(),
            mode: SolverMode::default(),
            radius: 50.0,
            weight_threshold: 0.001,
            distance_method: DistanceMethod::default(),
            normalize_method: NormalizeMethod::default(),
            function_type: FunctionType::default(),
            twist_axis: TwistAxis::default(),
            automatic_radius: false,
            poses: Vec::new(),
            poses_active_index: 0,
        }
    }

    /// The driver bone this solver is bound to (derived from the name).
    #[inline]
    pub fn driver_bone_name(&self) -> &str {
        driver_bone_for_solver(&self.name)
    }

    pub fn pose_by_name(&self, name: &str) -> Option<&Pose> {
        self.poses.iter().find(|p| p.name == name)
    }

    pub fn pose_position(&self, name: &str) -> Option<usize> {
        self.poses.iter().position(|p| p.name == name)
    }

    /// The solver's joint group: every bone driven by any pose, in first-seen
    /// order. All poses are kept referencing this same set by the editor.
    pub fn joint_group_bones(&self) -> Vec<String> {
        let mut seen = hashbrown::HashSet::new();
        let mut bones = Vec::new();
        for pose in &self.poses {
            for driven in &pose.driven {
                if driven.data_type == DrivenDataType::Bone && seen.insert(driven.name.clone()) {
                    bones.push(driven.name.clone());
                }
            }
        }
        bones
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_name_round_trip() {
        assert_eq!(solver_name_for_bone("calf_l"), "calf_l_UERBFSolver");
        assert_eq!(driver_bone_for_solver("calf_l_UERBFSolver"), "calf_l");
        // Names without the suffix pass through unchanged.
        assert_eq!(driver_bone_for_solver("calf_l"), "calf_l");
    }

    #[test]
    fn joint_group_is_first_seen_order_without_duplicates() {
        let mut solver = Solver::new(0, solver_name_for_bone("calf_l"));
        let mut a = Pose::new(0, 0, DEFAULT_POSE_NAME);
        a.driven.push(DrivenRecord::new(0, "calf_knee_l"));
        let mut b = Pose::new(0, 1, "calf_l_back_90");
        b.driven.push(DrivenRecord::new(1, "calf_knee_l"));
        b.driven.push(DrivenRecord::new(1, "calf_kneeBack_l"));
        solver.poses.push(a);
        solver.poses.push(b);
        assert_eq!(solver.joint_group_bones(), vec!["calf_knee_l", "calf_kneeBack_l"]);
    }
}

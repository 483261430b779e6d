//! Pose edit operations.
//!
//! Every operation validates its preconditions before touching the graph and
//! reports a structured result; on validation failure nothing is mutated.
//! Consistency warnings (a referenced bone missing from the armature) are
//! logged and reported but never fail the operation.

use hashbrown::HashSet;
use thiserror::Error;

use metadna_api_core::value::{euler_to_quat, quat_angle_between, TransformDelta, QUAT_IDENTITY};
use metadna_api_core::{
    solver_name_for_bone, DriverRecord, DrivenDataType, DrivenRecord, Pose, Solver,
    DEFAULT_POSE_NAME,
};

use crate::session::EditSession;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("No body rig found. Please assign a body rig.")]
    MissingRig,

    #[error("No RBF solvers, please add one.")]
    NoSolvers,

    #[error("Invalid solver index: {index}")]
    InvalidSolverIndex { index: usize },

    #[error("Invalid pose index: {index}")]
    InvalidPoseIndex { index: usize },

    #[error("No pose bones selected. Please select at least one driven bone in pose mode.")]
    NoSelection,

    #[error("Must provide either driven bones, driven transforms, or a source pose.")]
    MissingDrivenSource,

    #[error("The selected bone \"{bone}\" is assigned as a driver bone. Please select other bones.")]
    BoneIsDriver { bone: String },

    #[error("The selected bone \"{bone}\" is assigned as a swing bone. Please select other bones.")]
    BoneIsSwing { bone: String },

    #[error("The selected bone \"{bone}\" is assigned as a twist bone. Please select other bones.")]
    BoneIsTwist { bone: String },

    #[error("Bone \"{bone}\" not found in the body rig.")]
    BoneNotFound { bone: String },

    #[error("A pose with the name \"{name}\" already exists. Use a different name.")]
    DuplicatePoseName { name: String },

    #[error(
        "The driver bone \"{bone}\" for the solver \"{solver}\" is not found in the armature. \
         Please ensure the bone exists."
    )]
    DriverBoneMissing { bone: String, solver: String },

    #[error("A solver for bone \"{bone}\" already exists: \"{solver}\".")]
    SolverExists { bone: String, solver: String },

    #[error("The pose named \"default\" is reserved and cannot be removed or renamed.")]
    DefaultPoseProtected,

    #[error("Cannot remove all driven bones. At least one driven bone must remain in the solver.")]
    LastDrivenBone,

    #[error("None of the selected bones are in the solver's joint group.")]
    NotInJointGroup,

    #[error(
        "Poses '{pose_a}' and '{pose_b}' have a driver bone '{driver}' with the same rotation \
         values. Driver bone rotations must be unique across all poses in the solver."
    )]
    DuplicateDriverValues {
        pose_a: String,
        pose_b: String,
        driver: String,
    },

    #[error("The RBF solver '{solver}' must have at least one non-default pose.")]
    SolverNeedsNonDefaultPose { solver: String },

    #[error(
        "Pose \"{pose}\" in the RBF solver \"{solver}\" has no driven bones. Poses must have at \
         least one driven bone."
    )]
    PoseHasNoDriven { pose: String, solver: String },

    #[error("\"{name}\" does not match the mirror pattern and cannot be mirrored.")]
    MirrorPatternMismatch { name: String },

    #[error("Target solver \"{name}\" already exists. Delete it first or mirror individual poses instead.")]
    MirrorTargetExists { name: String },

    #[error("Target solver \"{name}\" does not exist. Mirror the solver first or create it manually.")]
    MirrorTargetMissing { name: String },

    #[error("Pose \"{pose}\" already exists in solver \"{solver}\". Delete it first or update it manually.")]
    MirrorPoseExists { pose: String, solver: String },

    #[error("Cannot mirror the default pose.")]
    CannotMirrorDefault,
}

/// Non-fatal findings from an update pass.
#[derive(Debug, Default, Clone)]
pub struct UpdateOutcome {
    /// Per-record "updated ..." messages for records that actually moved.
    pub messages: Vec<String>,
    /// Driver bones referenced by the pose but absent from the armature.
    pub missing_drivers: Vec<String>,
    /// Driven bones referenced by the pose but absent from the armature;
    /// these records drop from the pose at the next commit.
    pub missing_driven: Vec<String>,
}

/// Inputs for [`add_pose`]. Exactly one driven source is required: bone names
/// sampled from the armature, explicit transforms, or a source pose to
/// duplicate from.
#[derive(Debug, Default, Clone)]
pub struct AddPoseArgs {
    pub name: String,
    /// Target solver; the session's active solver when None.
    pub solver_index: Option<usize>,
    pub driven_bones: Option<Vec<String>>,
    pub driven_transforms: Option<Vec<(String, TransformDelta)>>,
    /// Explicit driver calibration (w, x, y, z); sampled from the armature
    /// when None.
    pub driver_quaternion: Option<[f32; 4]>,
    /// Position within the solver's pose list to duplicate from.
    pub from_pose: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableBone {
    pub name: String,
    pub joint_index: Option<u16>,
    pub in_joint_group: bool,
}

fn round5(v: f32) -> f32 {
    (v * 1e5).round() / 1e5
}

/// Reject bones already classified as driver, swing, or twist for this rig.
fn check_bone_classes(session: &EditSession, bone_names: &[String]) -> Result<(), EditError> {
    for name in bone_names {
        if session.driver_bone_names.contains(name) {
            return Err(EditError::BoneIsDriver { bone: name.clone() });
        }
        if session.swing_bone_names.contains(name) {
            return Err(EditError::BoneIsSwing { bone: name.clone() });
        }
        if session.twist_bone_names.contains(name) {
            return Err(EditError::BoneIsTwist { bone: name.clone() });
        }
    }
    Ok(())
}

/// Next free pose index: at least the DNA-resident pose count, and above any
/// index already allocated this session, so a session-created pose can never
/// collide with a committed one even across multiple adds.
pub fn next_pose_index(session: &EditSession) -> u16 {
    let max_existing = session
        .solvers
        .iter()
        .flat_map(|s| s.poses.iter())
        .map(|p| p.pose_index)
        .max();
    let dna_count = session.dna_pose_count();
    match max_existing {
        Some(max) => dna_count.max(max + 1),
        None => dna_count,
    }
}

fn next_solver_index(session: &EditSession) -> u16 {
    let max_existing = session.solvers.iter().map(|s| s.solver_index).max();
    let dna_count = session
        .reader()
        .map(|r| r.rbf_solver_count())
        .unwrap_or(0);
    match max_existing {
        Some(max) => dna_count.max(max + 1),
        None => dna_count,
    }
}

/// Write the armature's current driver rotation into a driver record.
/// Updates are threshold-gated to avoid floating point drift; `new` forces
/// the write.
fn sample_driver_record(
    driver: &mut DriverRecord,
    solver_index: u16,
    pose_index: u16,
    bone_name: &str,
    delta: &TransformDelta,
    joint_index: Option<u16>,
    threshold: f32,
    new: bool,
    pose_name: &str,
) -> Option<String> {
    driver.solver_index = solver_index;
    driver.pose_index = pose_index;
    driver.name = bone_name.to_string();
    if joint_index.is_some() {
        driver.joint_index = joint_index;
    }

    let moved = driver
        .quaternion_rotation
        .iter()
        .zip(delta.quaternion_rotation.iter())
        .any(|(a, b)| (a - b).abs() > threshold);
    if moved || new {
        driver.euler_rotation = delta.euler_rotation;
        driver.quaternion_rotation = delta.quaternion_rotation;
        log::debug!(
            "updated pose \"{pose_name}\" driver bone \"{bone_name}\" rotation to {:?}",
            driver.quaternion_rotation
        );
        return Some(format!(
            "Updated pose \"{pose_name}\" driver bone \"{bone_name}\" (rotation)"
        ));
    }
    None
}

/// Write the armature's current transform delta into a driven record.
/// Scale components with no real delta are filled with the pose scale factor,
/// matching what the container stores.
fn sample_driven_record(
    driven: &mut DrivenRecord,
    pose_index: u16,
    scale_factor: f32,
    bone_name: &str,
    delta: &TransformDelta,
    joint_index: Option<u16>,
    threshold: f32,
    new: bool,
    pose_name: &str,
) -> Option<String> {
    driven.name = bone_name.to_string();
    driven.pose_index = pose_index;
    driven.data_type = DrivenDataType::Bone;
    if joint_index.is_some() {
        driven.joint_index = joint_index;
    }

    let mut scale = [0.0f32; 3];
    for i in 0..3 {
        scale[i] = if round5(delta.scale[i]) != 0.0 {
            delta.scale[i]
        } else {
            scale_factor
        };
    }

    let mut updates: Vec<&str> = Vec::new();

    let rotation_delta = metadna_api_core::value::vec3_distance(
        delta.euler_rotation,
        driven.euler_rotation,
    );
    if rotation_delta > threshold || new {
        driven.euler_rotation = delta.euler_rotation;
        driven.quaternion_rotation = delta.quaternion_rotation;
        updates.push("rotation");
    }

    let location_delta =
        metadna_api_core::value::vec3_distance(delta.location, driven.location);
    if location_delta > threshold || new {
        driven.location = delta.location;
        updates.push("location");
    }

    // Only real deltas count for scale; fill-in components equal to the
    // scale factor are not edits.
    let scale_moved = (0..3).all(|i| {
        let d = round5((scale[i] - driven.scale[i]).abs());
        d != 0.0 && round5(scale_factor) != d
    });
    if scale_moved || new {
        driven.scale = scale;
        updates.push("scale");
    }

    if updates.is_empty() {
        None
    } else {
        Some(format!(
            "Updated pose \"{pose_name}\" driven bone \"{bone_name}\" ({})",
            updates.join(", ")
        ))
    }
}

/// Re-establish the solver-wide joint-group invariant: every pose references
/// the same driven-bone set, with zero/identity transforms backfilled into
/// poses that lacked a bone.
fn sync_solver_joint_group(session: &mut EditSession, solver_list_index: usize) {
    let group = match session.solvers.get(solver_list_index) {
        Some(solver) => solver.joint_group_bones(),
        None => return,
    };
    let joint_indices: Vec<Option<u16>> =
        group.iter().map(|name| session.joint_index(name)).collect();

    let Some(solver) = session.solvers.get_mut(solver_list_index) else {
        return;
    };
    for pose in &mut solver.poses {
        for (bone_name, joint_index) in group.iter().zip(joint_indices.iter()) {
            if pose.driven_by_name(bone_name).is_some() {
                continue;
            }
            let mut record = DrivenRecord::new(pose.pose_index, bone_name.clone());
            record.joint_index = *joint_index;
            record.scale = [pose.scale_factor; 3];
            pose.driven.push(record);
            log::debug!(
                "added bone '{bone_name}' to pose '{}' with rest pose transforms",
                pose.name
            );
        }
    }
}

/// Create a new solver for `driver_bone_name` with its reserved default pose.
/// Returns the new solver's position in the session list.
pub fn add_solver(
    session: &mut EditSession,
    driver_bone_name: &str,
    driver_quaternion: Option<[f32; 4]>,
) -> Result<usize, EditError> {
    let solver_name = solver_name_for_bone(driver_bone_name);

    {
        let armature = session.armature().ok_or(EditError::MissingRig)?;
        if !armature.has_bone(driver_bone_name) {
            return Err(EditError::BoneNotFound {
                bone: driver_bone_name.to_string(),
            });
        }
    }
    if session.swing_bone_names.contains(driver_bone_name) {
        return Err(EditError::BoneIsSwing {
            bone: driver_bone_name.to_string(),
        });
    }
    if session.twist_bone_names.contains(driver_bone_name) {
        return Err(EditError::BoneIsTwist {
            bone: driver_bone_name.to_string(),
        });
    }
    if session.solver_by_name(&solver_name).is_some() {
        return Err(EditError::SolverExists {
            bone: driver_bone_name.to_string(),
            solver: solver_name,
        });
    }

    let solver_index = next_solver_index(session);
    let pose_index = next_pose_index(session);
    let joint_index = session.joint_index(driver_bone_name);

    let mut solver = Solver::new(solver_index, solver_name.clone());
    let mut default_pose = Pose::new(solver_index, pose_index, DEFAULT_POSE_NAME);

    let mut driver = DriverRecord::new(solver_index, pose_index, driver_bone_name);
    driver.joint_index = joint_index;
    driver.quaternion_rotation = driver_quaternion.unwrap_or(QUAT_IDENTITY);
    default_pose.drivers.push(driver);
    solver.poses.push(default_pose);

    session.solvers.push(solver);
    session.active_solver_index = session.solvers.len() - 1;
    session.driver_bone_names.insert(driver_bone_name.to_string());

    log::info!(
        "created new RBF solver \"{solver_name}\" with driver bone \"{driver_bone_name}\""
    );
    Ok(session.active_solver_index)
}

/// Remove a solver (the active one when `solver_index` is None), re-clamping
/// the active solver index.
pub fn remove_solver(
    session: &mut EditSession,
    solver_index: Option<usize>,
) -> Result<String, EditError> {
    if session.solvers.is_empty() {
        return Err(EditError::NoSolvers);
    }
    let index = solver_index.unwrap_or(session.active_solver_index);
    if index >= session.solvers.len() {
        return Err(EditError::InvalidSolverIndex { index });
    }

    let solver = session.solvers.remove(index);
    session
        .driver_bone_names
        .remove(solver.driver_bone_name());
    session.active_solver_index = if session.solvers.is_empty() {
        0
    } else {
        index.min(session.solvers.len() - 1)
    };

    log::info!("removed RBF solver \"{}\"", solver.name);
    Ok(solver.name)
}

/// Add a new pose to a solver. Returns the new pose's global pose index.
pub fn add_pose(session: &mut EditSession, args: AddPoseArgs) -> Result<u16, EditError> {
    if !session.has_armature() {
        return Err(EditError::MissingRig);
    }
    if session.solvers.is_empty() {
        return Err(EditError::NoSolvers);
    }
    if args.driven_bones.is_none() && args.driven_transforms.is_none() && args.from_pose.is_none() {
        return Err(EditError::MissingDrivenSource);
    }

    let solver_list_index = args.solver_index.unwrap_or(session.active_solver_index);
    if solver_list_index >= session.solvers.len() {
        return Err(EditError::InvalidSolverIndex {
            index: solver_list_index,
        });
    }

    if let Some(bones) = &args.driven_bones {
        if bones.is_empty() {
            return Err(EditError::NoSelection);
        }
        check_bone_classes(session, bones)?;
    }
    if let Some(transforms) = &args.driven_transforms {
        let names: Vec<String> = transforms.iter().map(|(n, _)| n.clone()).collect();
        check_bone_classes(session, &names)?;
    }

    let (solver_index, solver_name, driver_bone, from_pose_data) = {
        let solver = &session.solvers[solver_list_index];
        if solver.pose_by_name(&args.name).is_some() {
            return Err(EditError::DuplicatePoseName {
                name: args.name.clone(),
            });
        }
        let from_pose_data = match args.from_pose {
            Some(position) => Some(
                solver
                    .poses
                    .get(position)
                    .cloned()
                    .ok_or(EditError::InvalidPoseIndex { index: position })?,
            ),
            None => None,
        };
        (
            solver.solver_index,
            solver.name.clone(),
            solver.driver_bone_name().to_string(),
            from_pose_data,
        )
    };

    let driver_delta = session
        .armature()
        .and_then(|a| a.pose_delta(&driver_bone));
    if driver_delta.is_none() {
        return Err(EditError::DriverBoneMissing {
            bone: driver_bone,
            solver: solver_name,
        });
    }
    let driver_joint = session.joint_index(&driver_bone);

    let pose_index = next_pose_index(session);
    let threshold = session.config.bone_delta_threshold;
    let local_pose_index = session.solvers[solver_list_index].poses.len();

    let mut pose = Pose::new(solver_index, pose_index, args.name.clone());
    if let Some(source) = &from_pose_data {
        pose.joint_group_index = source.joint_group_index;
        pose.target_enable = source.target_enable;
        pose.scale_factor = source.scale_factor;
    }

    // Driver record: explicit calibration or sampled from the armature.
    let mut driver = DriverRecord::new(solver_index, pose_index, &driver_bone);
    driver.joint_index = driver_joint;
    match args.driver_quaternion {
        Some(quaternion) => {
            driver.quaternion_rotation = quaternion;
            driver.euler_rotation = metadna_api_core::value::quat_to_euler(quaternion);
        }
        None => {
            if let Some(delta) = &driver_delta {
                sample_driver_record(
                    &mut driver,
                    solver_index,
                    pose_index,
                    &driver_bone,
                    delta,
                    driver_joint,
                    threshold,
                    true,
                    &args.name,
                );
            }
        }
    }
    pose.drivers.push(driver);

    // Driven records.
    if let Some(source) = &from_pose_data {
        let bone_names: Vec<String> = match &args.driven_bones {
            Some(bones) => bones.clone(),
            None => source
                .driven
                .iter()
                .filter(|d| {
                    session
                        .armature()
                        .map(|a| a.has_bone(&d.name))
                        .unwrap_or(false)
                })
                .map(|d| d.name.clone())
                .collect(),
        };
        for bone_name in bone_names {
            let mut driven = DrivenRecord::new(pose_index, bone_name.clone());
            if let Some(source_driven) = source.driven_by_name(&bone_name) {
                driven.joint_index = source_driven.joint_index;
                driven.data_type = source_driven.data_type;
                if source.is_default() {
                    // The default pose holds the rest pose; copied transforms
                    // reset to identity.
                    driven.location = [0.0; 3];
                    driven.euler_rotation = [0.0; 3];
                    driven.quaternion_rotation = QUAT_IDENTITY;
                    driven.scale = [1.0; 3];
                } else {
                    driven.location = source_driven.location;
                    driven.euler_rotation = source_driven.euler_rotation;
                    driven.quaternion_rotation = source_driven.quaternion_rotation;
                    driven.scale = source_driven.scale;
                }
            } else if let Some(delta) =
                session.armature().and_then(|a| a.pose_delta(&bone_name))
            {
                let joint_index = session.joint_index(&bone_name);
                sample_driven_record(
                    &mut driven,
                    pose_index,
                    pose.scale_factor,
                    &bone_name,
                    &delta,
                    joint_index,
                    threshold,
                    true,
                    &args.name,
                );
            }
            pose.driven.push(driven);
        }
    } else if let Some(bones) = &args.driven_bones {
        for bone_name in bones {
            let delta = session
                .armature()
                .and_then(|a| a.pose_delta(bone_name))
                .unwrap_or_default();
            let joint_index = session.joint_index(bone_name);
            let mut driven = DrivenRecord::new(pose_index, bone_name.clone());
            sample_driven_record(
                &mut driven,
                pose_index,
                pose.scale_factor,
                bone_name,
                &delta,
                joint_index,
                threshold,
                true,
                &args.name,
            );
            pose.driven.push(driven);
        }
    } else if let Some(transforms) = &args.driven_transforms {
        for (bone_name, delta) in transforms {
            let mut driven = DrivenRecord::new(pose_index, bone_name.clone());
            driven.joint_index = session.joint_index(bone_name);
            driven.location = delta.location;
            driven.euler_rotation = delta.euler_rotation;
            driven.quaternion_rotation = euler_to_quat(delta.euler_rotation);
            driven.scale = delta.scale;
            pose.driven.push(driven);
        }
    }

    let driven_count = pose.driven.len();
    {
        let solver = &mut session.solvers[solver_list_index];
        solver.poses.push(pose);
        solver.poses_active_index = local_pose_index;
    }

    // Keep every pose in the solver referencing the same joint group.
    sync_solver_joint_group(session, solver_list_index);

    log::info!(
        "created new RBF pose \"{}\" with {driven_count} driven bones",
        args.name
    );
    Ok(pose_index)
}

/// Duplicate a pose, generating a unique name by suffixing an incrementing
/// number. Returns the new pose's global pose index.
pub fn duplicate_pose(
    session: &mut EditSession,
    solver_list_index: usize,
    pose_position: usize,
) -> Result<u16, EditError> {
    let source_name = {
        let solver = session
            .solvers
            .get(solver_list_index)
            .ok_or(EditError::InvalidSolverIndex {
                index: solver_list_index,
            })?;
        let pose = solver
            .poses
            .get(pose_position)
            .ok_or(EditError::InvalidPoseIndex {
                index: pose_position,
            })?;
        pose.name.clone()
    };

    let solver = &session.solvers[solver_list_index];
    let mut suffix = 1usize;
    let new_name = loop {
        let candidate = format!("{source_name}_{suffix}");
        if solver.pose_by_name(&candidate).is_none() {
            break candidate;
        }
        suffix += 1;
    };

    add_pose(
        session,
        AddPoseArgs {
            name: new_name,
            solver_index: Some(solver_list_index),
            from_pose: Some(pose_position),
            ..AddPoseArgs::default()
        },
    )
}

/// Re-sample the driver and driven transforms of an existing pose from the
/// bound armature.
pub fn update_pose(
    session: &mut EditSession,
    solver_list_index: usize,
    pose_position: usize,
) -> Result<UpdateOutcome, EditError> {
    if !session.has_armature() {
        return Err(EditError::MissingRig);
    }
    let (solver_index, pose_index, pose_name, scale_factor, driver_names, driven_names) = {
        let solver = session
            .solvers
            .get(solver_list_index)
            .ok_or(EditError::InvalidSolverIndex {
                index: solver_list_index,
            })?;
        let pose = solver
            .poses
            .get(pose_position)
            .ok_or(EditError::InvalidPoseIndex {
                index: pose_position,
            })?;
        (
            solver.solver_index,
            pose.pose_index,
            pose.name.clone(),
            pose.scale_factor,
            pose.drivers.iter().map(|d| d.name.clone()).collect::<Vec<_>>(),
            pose.driven.iter().map(|d| d.name.clone()).collect::<Vec<_>>(),
        )
    };

    let threshold = session.config.bone_delta_threshold;
    let mut outcome = UpdateOutcome::default();

    for name in driver_names {
        let delta = session.armature().and_then(|a| a.pose_delta(&name));
        let joint_index = session.joint_index(&name);
        match delta {
            Some(delta) => {
                let pose = &mut session.solvers[solver_list_index].poses[pose_position];
                if let Some(driver) = pose.drivers.iter_mut().find(|d| d.name == name) {
                    if let Some(message) = sample_driver_record(
                        driver,
                        solver_index,
                        pose_index,
                        &name,
                        &delta,
                        joint_index,
                        threshold,
                        false,
                        &pose_name,
                    ) {
                        outcome.messages.push(message);
                    }
                }
            }
            None => {
                log::error!(
                    "driver bone \"{name}\" was not found in the armature when updating RBF pose \
                     \"{pose_name}\". Please ensure the bone exists or delete this pose and \
                     recreate it."
                );
                outcome.missing_drivers.push(name);
            }
        }
    }

    for name in driven_names {
        let delta = session.armature().and_then(|a| a.pose_delta(&name));
        let joint_index = session.joint_index(&name);
        match delta {
            Some(delta) => {
                let pose = &mut session.solvers[solver_list_index].poses[pose_position];
                if let Some(driven) = pose.driven_by_name_mut(&name) {
                    if driven.data_type != DrivenDataType::Bone {
                        continue;
                    }
                    if let Some(message) = sample_driven_record(
                        driven,
                        pose_index,
                        scale_factor,
                        &name,
                        &delta,
                        joint_index,
                        threshold,
                        false,
                        &pose_name,
                    ) {
                        outcome.messages.push(message);
                    }
                }
            }
            None => {
                log::warn!(
                    "driven bone \"{name}\" was not found in the armature when updating RBF pose \
                     \"{pose_name}\". It will be deleted from the pose when this data is \
                     committed to the dna."
                );
                outcome.missing_driven.push(name);
            }
        }
    }

    Ok(outcome)
}

/// Remove a pose. The reserved default pose cannot be removed; the solver's
/// active pose index is re-clamped into bounds.
pub fn remove_pose(
    session: &mut EditSession,
    solver_list_index: usize,
    pose_position: usize,
) -> Result<String, EditError> {
    let solver = session
        .solvers
        .get_mut(solver_list_index)
        .ok_or(EditError::InvalidSolverIndex {
            index: solver_list_index,
        })?;
    let pose = solver
        .poses
        .get(pose_position)
        .ok_or(EditError::InvalidPoseIndex {
            index: pose_position,
        })?;
    if pose.is_default() {
        return Err(EditError::DefaultPoseProtected);
    }

    let removed = solver.poses.remove(pose_position);
    solver.poses_active_index = solver
        .poses_active_index
        .min(solver.poses.len().saturating_sub(1));
    Ok(removed.name)
}

/// Rename a pose. The reserved default name is protected in both directions
/// and names stay unique within the solver.
pub fn rename_pose(
    session: &mut EditSession,
    solver_list_index: usize,
    pose_position: usize,
    new_name: &str,
) -> Result<(), EditError> {
    let solver = session
        .solvers
        .get_mut(solver_list_index)
        .ok_or(EditError::InvalidSolverIndex {
            index: solver_list_index,
        })?;
    {
        let pose = solver
            .poses
            .get(pose_position)
            .ok_or(EditError::InvalidPoseIndex {
                index: pose_position,
            })?;
        if pose.is_default() || new_name == DEFAULT_POSE_NAME {
            return Err(EditError::DefaultPoseProtected);
        }
        if solver
            .poses
            .iter()
            .enumerate()
            .any(|(i, p)| i != pose_position && p.name == new_name)
        {
            return Err(EditError::DuplicatePoseName {
                name: new_name.to_string(),
            });
        }
    }
    solver.poses[pose_position].name = new_name.to_string();
    Ok(())
}

/// Add bones to the active solver's joint group. The bones are appended to
/// every pose simultaneously with rest-pose transforms; optionally the active
/// pose is then re-sampled from the armature for the new bones. Returns how
/// many bones were actually new.
pub fn add_driven_bones(
    session: &mut EditSession,
    bone_names: &[String],
    update_active_pose_transforms: bool,
) -> Result<usize, EditError> {
    if !session.has_armature() {
        return Err(EditError::MissingRig);
    }
    if bone_names.is_empty() {
        return Err(EditError::NoSelection);
    }
    if session.solvers.is_empty() {
        return Err(EditError::NoSolvers);
    }
    check_bone_classes(session, bone_names)?;

    let solver_list_index = session.active_solver_index;
    let existing: HashSet<String> = session.solvers[solver_list_index]
        .joint_group_bones()
        .into_iter()
        .collect();
    let new_bones: Vec<String> = bone_names
        .iter()
        .filter(|name| !existing.contains(*name))
        .cloned()
        .collect();
    if new_bones.is_empty() {
        return Ok(0);
    }

    let joint_indices: Vec<Option<u16>> = new_bones
        .iter()
        .map(|name| session.joint_index(name))
        .collect();

    {
        let solver = &mut session.solvers[solver_list_index];
        for pose in &mut solver.poses {
            for (bone_name, joint_index) in new_bones.iter().zip(joint_indices.iter()) {
                if pose.driven_by_name(bone_name).is_some() {
                    continue;
                }
                let mut record = DrivenRecord::new(pose.pose_index, bone_name.clone());
                record.joint_index = *joint_index;
                record.scale = [pose.scale_factor; 3];
                pose.driven.push(record);
            }
        }
    }

    if update_active_pose_transforms && !session.solvers[solver_list_index].poses.is_empty() {
        let pose_position = session.solvers[solver_list_index]
            .poses_active_index
            .min(session.solvers[solver_list_index].poses.len() - 1);
        let (pose_index, pose_name, scale_factor) = {
            let pose = &session.solvers[solver_list_index].poses[pose_position];
            (pose.pose_index, pose.name.clone(), pose.scale_factor)
        };
        let threshold = session.config.bone_delta_threshold;
        for (bone_name, joint_index) in new_bones.iter().zip(joint_indices.iter()) {
            let Some(delta) = session.armature().and_then(|a| a.pose_delta(bone_name)) else {
                continue;
            };
            let pose = &mut session.solvers[solver_list_index].poses[pose_position];
            if let Some(driven) = pose.driven_by_name_mut(bone_name) {
                sample_driven_record(
                    driven,
                    pose_index,
                    scale_factor,
                    bone_name,
                    &delta,
                    *joint_index,
                    threshold,
                    true,
                    &pose_name,
                );
            }
        }
        // Focus the last added bone.
        let pose = &mut session.solvers[solver_list_index].poses[pose_position];
        if let Some(last) = new_bones.last() {
            if let Some(position) = pose.driven.iter().position(|d| &d.name == last) {
                pose.driven_active_index = position;
            }
        }
    }

    log::info!(
        "added {} bones to solver joint group: {:?}",
        new_bones.len(),
        new_bones
    );
    Ok(new_bones.len())
}

/// Remove bones from the active solver's joint group, across every pose.
/// Removing the last remaining driven bone is rejected.
pub fn remove_driven_bones(
    session: &mut EditSession,
    bone_names: &HashSet<String>,
) -> Result<usize, EditError> {
    if session.solvers.is_empty() {
        return Err(EditError::NoSolvers);
    }
    let solver_list_index = session.active_solver_index;
    let existing: HashSet<String> = session.solvers[solver_list_index]
        .joint_group_bones()
        .into_iter()
        .collect();

    let to_remove: HashSet<&String> = bone_names.iter().filter(|n| existing.contains(*n)).collect();
    if to_remove.is_empty() {
        return Err(EditError::NotInJointGroup);
    }
    if to_remove.len() == existing.len() {
        return Err(EditError::LastDrivenBone);
    }

    let mut removed_records = 0usize;
    let solver = &mut session.solvers[solver_list_index];
    for pose in &mut solver.poses {
        let before = pose.driven.len();
        pose.driven.retain(|d| !to_remove.contains(&d.name));
        removed_records += before - pose.driven.len();
        pose.driven_active_index = pose
            .driven_active_index
            .min(pose.driven.len().saturating_sub(1));
    }

    log::info!(
        "removed {} bones from solver joint group; {removed_records} driven entries removed \
         across all poses",
        to_remove.len()
    );
    Ok(to_remove.len())
}

/// Suggest a name for a new pose from the driver bone's current rotation,
/// e.g. "calf_l_x_40_z_-10". Falls back to the bare bone name at rest.
pub fn auto_pose_name(session: &EditSession) -> Option<String> {
    let solver = session.active_solver()?;
    let driver_bone = solver.driver_bone_name().to_string();
    let delta = session.armature()?.pose_delta(&driver_bone)?;

    let mut name = driver_bone;
    let degrees: Vec<i32> = delta
        .euler_rotation
        .iter()
        .map(|r| r.to_degrees().round() as i32)
        .collect();
    for (axis, value) in ["x", "y", "z"].iter().zip(degrees.iter()) {
        if *value != 0 {
            name.push_str(&format!("_{axis}_{value}"));
        }
    }
    Some(name)
}

/// Bones eligible to be driven by the active solver: every armature bone that
/// is not classified driver/swing/twist, annotated with its joint index and
/// whether it already belongs to the joint group. Existing joint-group bones
/// sort first, then alphabetical.
pub fn available_driven_bones(session: &EditSession) -> Vec<AvailableBone> {
    let Some(armature) = session.armature() else {
        return Vec::new();
    };
    let group: HashSet<String> = session
        .active_solver()
        .map(|s| s.joint_group_bones().into_iter().collect())
        .unwrap_or_default();

    let mut bones: Vec<AvailableBone> = armature
        .bone_names()
        .into_iter()
        .filter(|name| {
            !session.driver_bone_names.contains(name)
                && !session.swing_bone_names.contains(name)
                && !session.twist_bone_names.contains(name)
        })
        .map(|name| AvailableBone {
            joint_index: session.joint_index(&name),
            in_joint_group: group.contains(&name),
            name,
        })
        .collect();

    bones.sort_by(|a, b| {
        (!a.in_joint_group, &a.name).cmp(&(!b.in_joint_group, &b.name))
    });
    bones
}

/// Two poses in one solver with the same driver rotation are ambiguous for
/// the evaluator; reject before committing.
pub fn validate_no_duplicate_driver_values(
    solver: &Solver,
    threshold: f32,
) -> Result<(), EditError> {
    let mut samples: Vec<(&str, &str, [f32; 4])> = Vec::new();
    for pose in &solver.poses {
        for driver in &pose.drivers {
            samples.push((&pose.name, &driver.name, driver.quaternion_rotation));
        }
    }

    for i in 0..samples.len() {
        for j in (i + 1)..samples.len() {
            let (pose_a, driver_a, quat_a) = samples[i];
            let (pose_b, driver_b, quat_b) = samples[j];
            if driver_a != driver_b {
                continue;
            }
            if quat_angle_between(quat_a, quat_b) < threshold {
                return Err(EditError::DuplicateDriverValues {
                    pose_a: pose_a.to_string(),
                    pose_b: pose_b.to_string(),
                    driver: driver_a.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Every solver must hold at least one non-default pose, and every
/// non-default pose must drive at least one target.
pub fn validate_solver_poses_have_driven(session: &EditSession) -> Result<(), EditError> {
    if session.solvers.is_empty() {
        return Err(EditError::NoSolvers);
    }
    for solver in &session.solvers {
        if solver.poses.len() <= 1 {
            return Err(EditError::SolverNeedsNonDefaultPose {
                solver: solver.name.clone(),
            });
        }
        for pose in &solver.poses {
            if !pose.is_default() && pose.driven.is_empty() {
                return Err(EditError::PoseHasNoDriven {
                    pose: pose.name.clone(),
                    solver: solver.name.clone(),
                });
            }
        }
    }
    Ok(())
}

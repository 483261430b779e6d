//! Commit engine: the state-changing boundary between the editable pose graph
//! and the persisted DNA.
//!
//! The joint-group matrix encodes one row per joint attribute
//! (`joint_index * 9 + attribute_offset`: 0-2 location XYZ, 3-5 rotation XYZ,
//! 6-8 scale XYZ) and one column per pose, keyed by the pose's raw control
//! index. Columns are located by control index value, never by position:
//! poses already resident in the DNA overwrite their column in place, poses
//! created this session append one.

use std::path::PathBuf;

use hashbrown::HashMap;
use thiserror::Error;

use metadna_api_core::dna::{
    output_row_index, ATTR_LOCATION, ATTR_ROTATION, ATTR_SCALE, DnaError, DnaReader, DnaWriter,
    JointGroup, PoseTableEntry, SolverTableEntry,
};
use metadna_api_core::{DrivenDataType, Solver};

use crate::binding::Armature;
use crate::ops::{self, EditError};
use crate::session::EditSession;
use crate::tracker;

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Dependencies are not valid. Ensure the core dependencies are installed.")]
    MissingCodec,

    #[error("No body rig found. Please assign a body rig.")]
    MissingRig,

    #[error("No body .dna file. Please assign a body .dna file.")]
    MissingDnaPath,

    #[error("Body .dna file does not exist. Please check the file path.")]
    DnaFileMissing,

    #[error(transparent)]
    Validation(#[from] EditError),

    #[error(transparent)]
    Dna(#[from] DnaError),

    #[error("pose \"{pose}\" (index {pose_index}) has no control index in the DNA")]
    MissingControlIndex { pose: String, pose_index: u16 },
}

/// What a successful commit did.
#[derive(Debug, Default, Clone)]
pub struct CommitReport {
    /// Total poses written through (overwrites plus appends).
    pub poses_written: usize,
    /// Poses that did not yet exist in the DNA.
    pub poses_appended: usize,
    /// Joint groups whose matrices were rewritten, in touch order.
    pub joint_groups_touched: Vec<u16>,
    /// (pose name, bone name) driven records dropped because the bone no
    /// longer exists in the armature.
    pub dropped_driven: Vec<(String, String)>,
}

/// Deep-copy the live graph into plain data for the commit routine, dropping
/// driven bone records whose bone has vanished from the armature.
pub fn flatten(session: &EditSession) -> (Vec<Solver>, Vec<(String, String)>) {
    let mut solvers = session.solvers.clone();
    let mut dropped = Vec::new();

    if let Some(armature) = session.armature() {
        for solver in &mut solvers {
            for pose in &mut solver.poses {
                pose.driven.retain(|driven| {
                    if driven.data_type == DrivenDataType::Bone && !armature.has_bone(&driven.name)
                    {
                        log::warn!(
                            "dropping driven bone \"{}\" from pose \"{}\": bone no longer \
                             exists in the armature",
                            driven.name,
                            pose.name
                        );
                        dropped.push((pose.name.clone(), driven.name.clone()));
                        false
                    } else {
                        true
                    }
                });
            }
        }
    }

    (solvers, dropped)
}

/// Resolve the joint group a solver writes to: the group its poses already
/// reference, else an existing group covering the same joint set, else a
/// fresh one.
fn resolve_joint_group(
    reader: &dyn DnaReader,
    writer: &mut dyn DnaWriter,
    solver: &Solver,
    joints: &[u16],
) -> (u16, JointGroup) {
    let group_count = reader.joint_group_count();

    for pose in &solver.poses {
        if let Some(index) = pose.joint_group_index {
            if index < group_count {
                if let Some(group) = reader.joint_group(index) {
                    return (index, group);
                }
            }
        }
    }

    for index in 0..group_count {
        if let Some(group) = reader.joint_group(index) {
            let mut joint_set: Vec<u16> = group.joint_indices.clone();
            joint_set.sort_unstable();
            let mut wanted: Vec<u16> = joints.to_vec();
            wanted.sort_unstable();
            if joint_set == wanted {
                return (index, group);
            }
        }
    }

    let index = writer.create_joint_group();
    (index, JointGroup::default())
}

/// Write the flattened pose graph into the DNA through the codec handles.
/// This is the routine the commit operator delegates to; it raises on
/// malformed input and writes directly to the file backing `writer`.
pub fn commit_rbf_data(
    reader: &dyn DnaReader,
    writer: &mut dyn DnaWriter,
    solvers: &[Solver],
) -> Result<CommitReport, CommitError> {
    let dna_pose_count = reader.rbf_pose_count();
    let raw_control_count = reader.raw_control_count();

    // Global pose ordering: table position follows pose index, so unchanged
    // graphs keep their table layout and new poses land at the end.
    let mut ordered_poses: Vec<(usize, usize)> = Vec::new();
    for (solver_position, solver) in solvers.iter().enumerate() {
        for pose_position in 0..solver.poses.len() {
            ordered_poses.push((solver_position, pose_position));
        }
    }
    ordered_poses
        .sort_by_key(|&(s, p)| solvers[s].poses[p].pose_index);

    // Control index per pose: pre-existing poses keep the control recorded in
    // the DNA; session-created poses allocate the next raw control slots.
    let mut next_new_control = raw_control_count;
    let mut controls: HashMap<u16, u16> = HashMap::new();
    let mut poses_appended = 0usize;
    for &(solver_position, pose_position) in &ordered_poses {
        let pose = &solvers[solver_position].poses[pose_position];
        let control = if pose.pose_index < dna_pose_count {
            reader.rbf_pose_control_index(pose.pose_index).ok_or(
                CommitError::MissingControlIndex {
                    pose: pose.name.clone(),
                    pose_index: pose.pose_index,
                },
            )?
        } else {
            poses_appended += 1;
            let control = next_new_control;
            next_new_control += 1;
            control
        };
        controls.insert(pose.pose_index, control);
    }

    // New pose table, in the global order established above.
    let mut pose_table: Vec<PoseTableEntry> = Vec::with_capacity(ordered_poses.len());
    let mut table_position: HashMap<u16, u16> = HashMap::new();
    for &(solver_position, pose_position) in &ordered_poses {
        let pose = &solvers[solver_position].poses[pose_position];
        let driver = pose.drivers.first();
        let driver_joint_index = driver.and_then(|d| {
            d.joint_index.or_else(|| reader.joint_index(&d.name))
        });

        let mut output_control_indices = Vec::new();
        let mut output_control_weights = Vec::new();
        for driven in &pose.driven {
            if driven.data_type == DrivenDataType::Bone {
                continue;
            }
            let channel = (0..reader.blend_shape_channel_count()).find(|&i| {
                reader.blend_shape_channel_name(i).as_deref() == Some(driven.name.as_str())
            });
            match channel {
                Some(channel) => {
                    output_control_indices.push(channel);
                    output_control_weights.push(driven.scalar_value);
                }
                None => log::warn!(
                    "skipping scalar driven \"{}\" in pose \"{}\": no matching channel",
                    driven.name,
                    pose.name
                ),
            }
        }

        table_position.insert(pose.pose_index, pose_table.len() as u16);
        pose_table.push(PoseTableEntry {
            name: pose.name.clone(),
            scale: pose.scale_factor,
            control_index: controls[&pose.pose_index],
            driver_joint_index,
            driver_value: driver.map(|d| d.quaternion_rotation).unwrap_or([1.0, 0.0, 0.0, 0.0]),
            output_control_indices,
            output_control_weights,
        });
    }

    // New solver table.
    let solver_table: Vec<SolverTableEntry> = solvers
        .iter()
        .map(|solver| SolverTableEntry {
            name: solver.name.clone(),
            mode: solver.mode,
            radius: solver.radius,
            weight_threshold: solver.weight_threshold,
            distance_method: solver.distance_method,
            normalize_method: solver.normalize_method,
            function_type: solver.function_type,
            twist_axis: solver.twist_axis,
            automatic_radius: solver.automatic_radius,
            pose_positions: solver
                .poses
                .iter()
                .map(|p| table_position[&p.pose_index])
                .collect(),
        })
        .collect();

    // Joint-group matrices, one pass per solver.
    let mut report = CommitReport {
        poses_written: pose_table.len(),
        poses_appended,
        ..CommitReport::default()
    };

    for solver in solvers {
        // The solver's driven joint set, resolving joint indices by name
        // where records never got one.
        let mut joints: Vec<u16> = Vec::new();
        for pose in &solver.poses {
            for driven in &pose.driven {
                if driven.data_type != DrivenDataType::Bone {
                    continue;
                }
                let joint = driven
                    .joint_index
                    .or_else(|| reader.joint_index(&driven.name));
                match joint {
                    Some(joint) => {
                        if !joints.contains(&joint) {
                            joints.push(joint);
                        }
                    }
                    None => log::warn!(
                        "driven bone \"{}\" in pose \"{}\" has no joint in the DNA definition; \
                         skipping",
                        driven.name,
                        pose.name
                    ),
                }
            }
        }
        if joints.is_empty() {
            continue;
        }

        let (group_index, mut group) = resolve_joint_group(reader, writer, solver, &joints);

        for &joint in &joints {
            if !group.joint_indices.contains(&joint) {
                group.joint_indices.push(joint);
            }
            for attribute_offset in 0..metadna_api_core::dna::JOINT_ATTR_STRIDE {
                group.ensure_row(output_row_index(joint, attribute_offset));
            }
        }

        for pose in &solver.poses {
            let column = group.ensure_column(controls[&pose.pose_index]);
            for driven in &pose.driven {
                if driven.data_type != DrivenDataType::Bone {
                    continue;
                }
                let Some(joint) = driven
                    .joint_index
                    .or_else(|| reader.joint_index(&driven.name))
                else {
                    continue;
                };
                for axis in 0..3u16 {
                    let row = group
                        .row_of_output(output_row_index(joint, ATTR_LOCATION + axis))
                        .ok_or_else(|| DnaError::MalformedRecord(format!(
                            "missing location row for joint {joint}"
                        )))?;
                    group.set_value(row, column, driven.location[axis as usize]);

                    let row = group
                        .row_of_output(output_row_index(joint, ATTR_ROTATION + axis))
                        .ok_or_else(|| DnaError::MalformedRecord(format!(
                            "missing rotation row for joint {joint}"
                        )))?;
                    group.set_value(row, column, driven.euler_rotation[axis as usize]);

                    let row = group
                        .row_of_output(output_row_index(joint, ATTR_SCALE + axis))
                        .ok_or_else(|| DnaError::MalformedRecord(format!(
                            "missing scale row for joint {joint}"
                        )))?;
                    group.set_value(row, column, driven.scale[axis as usize]);
                }
            }
        }

        writer.set_joint_group(group_index, &group)?;
        report.joint_groups_touched.push(group_index);
    }

    writer.set_rbf_pose_table(&pose_table);
    writer.set_rbf_solver_table(&solver_table);
    writer.set_raw_control_count(next_new_control);
    writer.save()?;

    Ok(report)
}

/// Commit the session's pose graph to its DNA file.
///
/// Validates preconditions, opens a reader/writer pair, flattens the graph,
/// releases the session's own native handles (hard ordering requirement:
/// stale readers or evaluator instances must not outlive the write), then
/// delegates to [`commit_rbf_data`]. On success the session leaves edit mode,
/// re-enables automatic evaluation, and runs one evaluation pass so the rig
/// reflects committed state immediately.
pub fn commit(session: &mut EditSession) -> Result<CommitReport, CommitError> {
    if session.codec().is_none() {
        return Err(CommitError::MissingCodec);
    }
    if !session.has_armature() {
        return Err(CommitError::MissingRig);
    }
    let path: PathBuf = session
        .dna_path
        .clone()
        .ok_or(CommitError::MissingDnaPath)?;
    if !path.exists() {
        return Err(CommitError::DnaFileMissing);
    }

    let threshold = session.config.bone_delta_threshold;
    for solver in &session.solvers {
        ops::validate_no_duplicate_driver_values(solver, threshold)?;
    }

    let (reader, mut writer) = {
        let codec = session.codec().ok_or(CommitError::MissingCodec)?;
        (codec.open_reader(&path)?, codec.open_writer(&path)?)
    };

    let (solvers, dropped) = flatten(session);

    // Teardown before the write, never after.
    session.release_handles();

    let mut report = commit_rbf_data(reader.as_ref(), writer.as_mut(), &solvers)?;
    report.dropped_driven = dropped;
    drop(writer);
    drop(reader);

    log::info!("DNA exported successfully to: \"{}\"", path.display());

    session.editing = false;
    session.auto_evaluate = true;
    tracker::clear_tracking(session);
    session.reopen_reader()?;
    if let Err(err) = session.evaluate() {
        log::warn!("evaluation after commit failed: {err}");
    }

    Ok(report)
}

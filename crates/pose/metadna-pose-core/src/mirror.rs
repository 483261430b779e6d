//! Left/right mirroring of solvers and poses.
//!
//! Side tokens are extracted from solver/bone/pose names with a caller-supplied
//! regex carrying a named `side` capture group (e.g.
//! `(?P<side>_l(_|$)|_r(_|$))` conventions), swapped, and substituted back.
//! Mirrored driven transforms negate location and keep rotation and scale;
//! mirrored records clear their joint-group index so the commit step
//! allocates a fresh group for the opposite-side joints.

use regex::Regex;

use metadna_api_core::value::quat_to_euler;
use metadna_api_core::{DriverRecord, DrivenRecord, Pose, Solver, DEFAULT_POSE_NAME};

use crate::ops::{next_pose_index, EditError};
use crate::session::EditSession;

/// Patterns used to relocate a name onto the opposite side. Each must expose
/// a named `side` capture group.
#[derive(Debug, Clone)]
pub struct MirrorPatterns {
    pub solver: String,
    pub bone: String,
    pub pose: String,
}

/// Swap a matched side token: `_l_` <-> `_r_` anywhere, or a trailing
/// `_l` <-> `_r`.
pub fn side_replacement(source_side: &str) -> String {
    if source_side.contains("_l_") {
        return source_side.replace("_l_", "_r_");
    }
    if source_side.contains("_r_") {
        return source_side.replace("_r_", "_l_");
    }
    if let Some(stem) = source_side.strip_suffix("_l") {
        return format!("{stem}_r");
    }
    if let Some(stem) = source_side.strip_suffix("_r") {
        return format!("{stem}_l");
    }
    source_side.to_string()
}

/// Mirror `name` via the pattern's `side` capture group. Returns None when
/// the pattern does not match, has no side group, or the side has no
/// opposite. An invalid pattern is logged and treated as no match.
pub fn mirrored_name(name: &str, pattern: &str) -> Option<String> {
    let regex = match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(_) => {
            log::warn!("invalid mirror regex pattern: {pattern}");
            return None;
        }
    };
    let captures = regex.captures(name)?;
    let side = captures.name("side")?.as_str();
    let target = side_replacement(side);
    if target == side {
        return None;
    }
    Some(name.replace(side, &target))
}

pub fn can_mirror_name(name: &str, pattern: &str) -> bool {
    mirrored_name(name, pattern).is_some()
}

/// Mirror one driven transform across the rig's symmetry plane.
pub fn mirror_driven_transform(
    location: [f32; 3],
    euler_rotation: [f32; 3],
    scale: [f32; 3],
) -> ([f32; 3], [f32; 3], [f32; 3]) {
    (
        [-location[0], -location[1], -location[2]],
        euler_rotation,
        scale,
    )
}

fn mirror_driver_record(
    source: &DriverRecord,
    solver_index: u16,
    pose_index: u16,
    session: &EditSession,
    bone_pattern: &str,
) -> DriverRecord {
    let name = mirrored_name(&source.name, bone_pattern).unwrap_or_else(|| source.name.clone());
    let mut driver = DriverRecord::new(solver_index, pose_index, name.clone());
    driver.rotation_mode = source.rotation_mode;
    driver.joint_index = session.joint_index(&name);
    driver.quaternion_rotation = source.quaternion_rotation;
    driver.euler_rotation = quat_to_euler(source.quaternion_rotation);
    driver
}

fn mirror_driven_record(
    source: &DrivenRecord,
    pose_index: u16,
    session: &EditSession,
    bone_pattern: &str,
) -> DrivenRecord {
    let name = mirrored_name(&source.name, bone_pattern).unwrap_or_else(|| source.name.clone());
    let mut driven = DrivenRecord::new(pose_index, name.clone());
    driven.joint_group_index = None;
    driven.data_type = source.data_type;
    driven.rotation_mode = source.rotation_mode;
    driven.joint_index = session.joint_index(&name);
    driven.scalar_value = source.scalar_value;

    let (location, euler_rotation, scale) =
        mirror_driven_transform(source.location, source.euler_rotation, source.scale);
    driven.location = location;
    driven.euler_rotation = euler_rotation;
    driven.quaternion_rotation = metadna_api_core::value::euler_to_quat(euler_rotation);
    driven.scale = scale;
    driven
}

/// Check that the active solver can be mirrored into a fresh solver.
pub fn validate_mirror_solver(
    session: &EditSession,
    patterns: &MirrorPatterns,
) -> Result<(), EditError> {
    let armature = session.armature().ok_or(EditError::MissingRig)?;
    let solver = session.active_solver().ok_or(EditError::NoSolvers)?;

    let mirrored_solver = mirrored_name(&solver.name, &patterns.solver).ok_or_else(|| {
        EditError::MirrorPatternMismatch {
            name: solver.name.clone(),
        }
    })?;
    if session.solver_by_name(&mirrored_solver).is_some() {
        return Err(EditError::MirrorTargetExists {
            name: mirrored_solver,
        });
    }

    let driver_bone = solver.driver_bone_name();
    let mirrored_driver = mirrored_name(driver_bone, &patterns.bone).ok_or_else(|| {
        EditError::MirrorPatternMismatch {
            name: driver_bone.to_string(),
        }
    })?;
    if !armature.has_bone(&mirrored_driver) {
        return Err(EditError::BoneNotFound {
            bone: mirrored_driver,
        });
    }
    Ok(())
}

/// Mirror the active solver to the opposite side: a new solver with mirrored
/// driver/driven bone names and mirrored transform values for every pose.
/// Returns the new solver's position in the session list.
pub fn mirror_solver(
    session: &mut EditSession,
    patterns: &MirrorPatterns,
) -> Result<usize, EditError> {
    validate_mirror_solver(session, patterns)?;

    let source = session
        .active_solver()
        .cloned()
        .ok_or(EditError::NoSolvers)?;
    let mirrored_solver_name = mirrored_name(&source.name, &patterns.solver).ok_or_else(|| {
        EditError::MirrorPatternMismatch {
            name: source.name.clone(),
        }
    })?;

    let new_solver_index = session
        .solvers
        .iter()
        .map(|s| s.solver_index)
        .max()
        .map(|max| max + 1)
        .unwrap_or(0);

    let mut new_solver = Solver::new(new_solver_index, mirrored_solver_name.clone());
    new_solver.mode = source.mode;
    new_solver.radius = source.radius;
    new_solver.weight_threshold = source.weight_threshold;
    new_solver.distance_method = source.distance_method;
    new_solver.normalize_method = source.normalize_method;
    new_solver.function_type = source.function_type;
    new_solver.twist_axis = source.twist_axis;
    new_solver.automatic_radius = source.automatic_radius;

    let mut next_index = next_pose_index(session);
    for source_pose in &source.poses {
        let pose_name = if source_pose.is_default() {
            DEFAULT_POSE_NAME.to_string()
        } else {
            mirrored_name(&source_pose.name, &patterns.pose)
                .unwrap_or_else(|| source_pose.name.clone())
        };

        let mut pose = Pose::new(new_solver_index, next_index, pose_name);
        pose.joint_group_index = None;
        pose.target_enable = source_pose.target_enable;
        pose.scale_factor = source_pose.scale_factor;
        next_index += 1;

        for driver in &source_pose.drivers {
            pose.drivers.push(mirror_driver_record(
                driver,
                new_solver_index,
                pose.pose_index,
                session,
                &patterns.bone,
            ));
        }
        for driven in &source_pose.driven {
            pose.driven.push(mirror_driven_record(
                driven,
                pose.pose_index,
                session,
                &patterns.bone,
            ));
        }
        new_solver.poses.push(pose);
    }

    log::info!(
        "mirrored solver \"{}\" to \"{mirrored_solver_name}\"",
        source.name
    );
    session.solvers.push(new_solver);
    session.active_solver_index = session.solvers.len() - 1;
    Ok(session.active_solver_index)
}

/// Check that the active pose can be mirrored into the opposite-side solver.
pub fn validate_mirror_pose(
    session: &EditSession,
    patterns: &MirrorPatterns,
) -> Result<(), EditError> {
    session.armature().ok_or(EditError::MissingRig)?;
    let solver = session.active_solver().ok_or(EditError::NoSolvers)?;
    let pose = session.active_pose().ok_or(EditError::InvalidPoseIndex {
        index: solver.poses_active_index,
    })?;

    if pose.is_default() {
        return Err(EditError::CannotMirrorDefault);
    }

    let mirrored_solver = mirrored_name(&solver.name, &patterns.solver).ok_or_else(|| {
        EditError::MirrorPatternMismatch {
            name: solver.name.clone(),
        }
    })?;
    let Some(target) = session.solver_by_name(&mirrored_solver) else {
        return Err(EditError::MirrorTargetMissing {
            name: mirrored_solver,
        });
    };

    let mirrored_pose =
        mirrored_name(&pose.name, &patterns.pose).unwrap_or_else(|| pose.name.clone());
    if target.pose_by_name(&mirrored_pose).is_some() {
        return Err(EditError::MirrorPoseExists {
            pose: mirrored_pose,
            solver: mirrored_solver,
        });
    }
    Ok(())
}

/// Mirror the active pose into the opposite-side solver, which must already
/// exist. Returns the new pose's global pose index.
pub fn mirror_pose(session: &mut EditSession, patterns: &MirrorPatterns) -> Result<u16, EditError> {
    validate_mirror_pose(session, patterns)?;

    let source_solver_name = session
        .active_solver()
        .map(|s| s.name.clone())
        .ok_or(EditError::NoSolvers)?;
    let source_pose = session
        .active_pose()
        .cloned()
        .ok_or(EditError::NoSolvers)?;

    let mirrored_solver_name =
        mirrored_name(&source_solver_name, &patterns.solver).ok_or_else(|| {
            EditError::MirrorPatternMismatch {
                name: source_solver_name.clone(),
            }
        })?;
    let target_position = session
        .solvers
        .iter()
        .position(|s| s.name == mirrored_solver_name)
        .ok_or_else(|| EditError::MirrorTargetMissing {
            name: mirrored_solver_name.clone(),
        })?;
    let target_solver_index = session.solvers[target_position].solver_index;

    let mirrored_pose_name =
        mirrored_name(&source_pose.name, &patterns.pose).unwrap_or_else(|| source_pose.name.clone());
    let pose_index = next_pose_index(session);

    let mut pose = Pose::new(target_solver_index, pose_index, mirrored_pose_name.clone());
    pose.joint_group_index = None;
    pose.target_enable = source_pose.target_enable;
    pose.scale_factor = source_pose.scale_factor;

    for driver in &source_pose.drivers {
        pose.drivers.push(mirror_driver_record(
            driver,
            target_solver_index,
            pose_index,
            session,
            &patterns.bone,
        ));
    }
    for driven in &source_pose.driven {
        pose.driven
            .push(mirror_driven_record(driven, pose_index, session, &patterns.bone));
    }

    let target = &mut session.solvers[target_position];
    target.poses.push(pose);
    target.poses_active_index = target.poses.len() - 1;
    session.active_solver_index = target_position;

    log::info!(
        "mirrored pose \"{}\" to \"{mirrored_pose_name}\" in solver \"{mirrored_solver_name}\"",
        source_pose.name
    );
    Ok(pose_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BONE_PATTERN: &str = r"^(?:\w+?)(?P<side>_l|_r)$";

    #[test]
    fn side_tokens_swap_both_directions() {
        assert_eq!(side_replacement("_l_"), "_r_");
        assert_eq!(side_replacement("_r_"), "_l_");
        assert_eq!(side_replacement("_l"), "_r");
        assert_eq!(side_replacement("_r"), "_l");
        assert_eq!(side_replacement("_m"), "_m");
    }

    #[test]
    fn mirrored_name_swaps_trailing_side() {
        assert_eq!(
            mirrored_name("calf_l", BONE_PATTERN).as_deref(),
            Some("calf_r")
        );
        assert_eq!(
            mirrored_name("calf_r", BONE_PATTERN).as_deref(),
            Some("calf_l")
        );
        assert_eq!(mirrored_name("spine_01", BONE_PATTERN), None);
    }

    #[test]
    fn invalid_pattern_is_no_match() {
        assert_eq!(mirrored_name("calf_l", "(?P<side"), None);
    }

    #[test]
    fn driven_transform_negates_location_only() {
        let (location, rotation, scale) =
            mirror_driven_transform([1.0, -2.0, 3.0], [0.1, 0.2, 0.3], [1.0, 1.0, 1.0]);
        assert_eq!(location, [-1.0, 2.0, -3.0]);
        assert_eq!(rotation, [0.1, 0.2, 0.3]);
        assert_eq!(scale, [1.0, 1.0, 1.0]);
    }
}

//! Solver and pose mirroring against the fixture rig.

use metadna_pose_core::mirror::{self, MirrorPatterns};
use metadna_pose_core::ops::EditError;
use metadna_pose_core::session::EditSession;
use metadna_test_fixtures::{build_session_with_doc, body_rig_doc, MemoryDnaCodec};

/// One pattern fits solver, bone, and pose names in the fixture rig: the
/// side token is the shortest leading `*_l` / `*_r` run.
const SIDE_PATTERN: &str = r"^(?P<side>\w+?_(?:l|r))(?:_|$)";

fn patterns() -> MirrorPatterns {
    MirrorPatterns {
        solver: SIDE_PATTERN.to_string(),
        bone: SIDE_PATTERN.to_string(),
        pose: SIDE_PATTERN.to_string(),
    }
}

fn session() -> (tempfile::TempDir, EditSession, MemoryDnaCodec) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("body.dna");
    let (session, codec) = metadna_test_fixtures::build_session(&path).expect("fixture session");
    (dir, session, codec)
}

/// The fixture rig without its right-side solver, so left-to-right solver
/// mirroring has a free target.
fn left_only_session() -> (tempfile::TempDir, EditSession, MemoryDnaCodec) {
    let mut doc = body_rig_doc();
    doc.solvers.truncate(1);
    doc.poses.truncate(2);
    doc.joint_groups.truncate(1);
    doc.raw_control_count = 2;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("body.dna");
    let (session, codec) = build_session_with_doc(&path, doc).expect("fixture session");
    (dir, session, codec)
}

#[test]
fn mirroring_into_an_existing_solver_is_rejected() {
    let (_dir, mut session, _codec) = session();
    session.active_solver_index = 0;

    let result = mirror::mirror_solver(&mut session, &patterns());
    assert_eq!(
        result,
        Err(EditError::MirrorTargetExists {
            name: "calf_r_UERBFSolver".into()
        })
    );
}

#[test]
fn solver_mirrors_with_renamed_bones_and_negated_locations() {
    let (_dir, mut session, _codec) = left_only_session();

    let position = mirror::mirror_solver(&mut session, &patterns()).expect("mirror solver");
    assert_eq!(position, 1);

    let mirrored = &session.solvers[1];
    assert_eq!(mirrored.name, "calf_r_UERBFSolver");
    assert_eq!(mirrored.driver_bone_name(), "calf_r");
    assert_eq!(mirrored.poses.len(), 2);
    assert!(mirrored.poses[0].is_default());
    assert_eq!(mirrored.poses[1].name, "calf_r_back_90");

    // Mirrored poses allocate fresh pose indices and no joint group yet.
    assert_eq!(mirrored.poses[0].pose_index, 2);
    assert_eq!(mirrored.poses[1].pose_index, 3);
    assert!(mirrored.poses[1].joint_group_index.is_none());

    let driven = mirrored.poses[1]
        .driven_by_name("calf_knee_r")
        .expect("mirrored driven bone");
    // Location is negated; rotation and scale carry over.
    assert_eq!(driven.location, [0.0, -0.04, -0.09]);
    assert_eq!(driven.euler_rotation, [0.0; 3]);
    assert_eq!(driven.scale, [1.0; 3]);
    assert_eq!(driven.joint_index, Some(4));

    // Driver calibration is preserved.
    assert_eq!(
        mirrored.poses[1].drivers[0].quaternion_rotation,
        [0.7071068, 0.7071068, 0.0, 0.0]
    );
}

#[test]
fn mirrored_solver_commits_into_a_fresh_joint_group() {
    let (_dir, mut session, codec) = left_only_session();
    session.enter_edit_mode();

    mirror::mirror_solver(&mut session, &patterns()).expect("mirror solver");
    metadna_pose_core::commit::commit(&mut session).expect("commit");

    let doc = codec.document();
    assert_eq!(doc.solvers.len(), 2);
    assert_eq!(doc.poses.len(), 4);
    // A new group covering the right-side joints, keyed by the new controls.
    assert_eq!(doc.joint_groups.len(), 2);
    let group = &doc.joint_groups[1];
    assert_eq!(group.joint_indices, vec![4, 8]);
    assert_eq!(group.input_indices.len(), 2);
}

#[test]
fn pose_mirroring_requires_the_target_solver() {
    let (_dir, mut session, _codec) = left_only_session();
    session.solvers[0].poses_active_index = 1;

    let result = mirror::mirror_pose(&mut session, &patterns());
    assert_eq!(
        result,
        Err(EditError::MirrorTargetMissing {
            name: "calf_r_UERBFSolver".into()
        })
    );
}

#[test]
fn pose_mirrors_into_the_opposite_solver() {
    let (_dir, mut session, _codec) = session();

    // Give the right solver room by renaming its existing mirrored pose.
    metadna_pose_core::ops::rename_pose(&mut session, 1, 1, "calf_r_other").expect("rename");

    session.active_solver_index = 0;
    session.solvers[0].poses_active_index = 1;
    let pose_index = mirror::mirror_pose(&mut session, &patterns()).expect("mirror pose");
    assert_eq!(pose_index, 4);

    let target = session.solver_by_name("calf_r_UERBFSolver").expect("target");
    let mirrored = target.pose_by_name("calf_r_back_90").expect("mirrored pose");
    assert!(mirrored.joint_group_index.is_none());
    let driven = mirrored.driven_by_name("calf_knee_r").expect("driven");
    assert_eq!(driven.location, [0.0, -0.04, -0.09]);

    // The session focus moved to the target solver.
    assert_eq!(session.active_solver_index, 1);
}

#[test]
fn the_default_pose_is_never_mirrored() {
    let (_dir, mut session, _codec) = session();
    session.solvers[0].poses_active_index = 0;

    assert_eq!(
        mirror::mirror_pose(&mut session, &patterns()),
        Err(EditError::CannotMirrorDefault)
    );
}

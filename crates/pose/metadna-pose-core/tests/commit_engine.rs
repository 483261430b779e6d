//! Commit engine behavior: persistence of edits through the codec, column
//! append-vs-overwrite in the joint-group matrix, precondition validation,
//! and round-tripping through the evaluator.

use metadna_api_core::dna::output_row_index;
use metadna_api_core::value::{euler_to_quat, quat_to_euler, TransformDelta};
use metadna_pose_core::binding::Armature;
use metadna_pose_core::commit::{self, CommitError};
use metadna_pose_core::ops::{self, AddPoseArgs, EditError};
use metadna_pose_core::session::EditSession;
use metadna_test_fixtures::{body_rig_doc, FixtureArmature, MemoryDnaCodec};

const TOLERANCE: f32 = 1e-5;
const POSE_QUAT: [f32; 4] = [0.7071068, 0.7071068, 0.0, 0.0];

fn session() -> (tempfile::TempDir, EditSession, MemoryDnaCodec) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("body.dna");
    let (session, codec) = metadna_test_fixtures::build_session(&path).expect("fixture session");
    (dir, session, codec)
}

fn drive_pose(session: &mut EditSession, driver_bone: &str, quaternion: [f32; 4]) {
    let armature = session.armature_mut().expect("armature");
    armature.reset_pose();
    armature.set_pose_delta(
        driver_bone,
        &TransformDelta {
            location: [0.0; 3],
            euler_rotation: quat_to_euler(quaternion),
            quaternion_rotation: quaternion,
            scale: [0.0; 3],
        },
    );
}

fn assert_vec3_close(actual: [f32; 3], expected: [f32; 3]) {
    for i in 0..3 {
        assert!(
            (actual[i] - expected[i]).abs() <= TOLERANCE,
            "component {i}: {actual:?} vs {expected:?}"
        );
    }
}

#[test]
fn unmodified_commit_preserves_the_container_and_round_trips() {
    let (_dir, mut session, codec) = session();
    session.enter_edit_mode();

    commit::commit(&mut session).expect("commit");

    // Nothing changed, so the rewritten container equals the original.
    assert_eq!(codec.document(), body_rig_doc());

    // Re-evaluating the committed pose reproduces the captured transforms.
    drive_pose(&mut session, "calf_l", POSE_QUAT);
    session.evaluate().expect("evaluate");

    let armature = session.armature().expect("armature");
    let knee = armature.pose_delta("calf_knee_l").expect("knee");
    assert_vec3_close(knee.location, [0.0, 0.04, 0.09]);
    let knee_back = armature.pose_delta("calf_kneeBack_l").expect("knee back");
    assert_vec3_close(knee_back.location, [0.0, -0.02, 0.03]);
}

#[test]
fn scale_factor_edit_persists() {
    let (_dir, mut session, codec) = session();
    session.enter_edit_mode();

    let original_scale = codec.document().poses[1].scale;
    session.solvers[0].poses[1].scale_factor = 0.5;
    commit::commit(&mut session).expect("commit");

    let written = codec.document().poses[1].scale;
    assert!((written - 0.5).abs() <= TOLERANCE);
    assert!((written - original_scale).abs() > TOLERANCE);

    // The re-opened reader sees the committed value too.
    let reader_scale = session
        .reader()
        .expect("reader reopened")
        .rbf_pose_scale(1)
        .expect("pose scale");
    assert!((reader_scale - 0.5).abs() <= TOLERANCE);
}

#[test]
fn pose_rename_persists() {
    let (_dir, mut session, codec) = session();
    session.enter_edit_mode();

    ops::rename_pose(&mut session, 0, 1, "calf_l_bent_back").expect("rename");
    commit::commit(&mut session).expect("commit");

    let names: Vec<String> = codec.document().poses.iter().map(|p| p.name.clone()).collect();
    assert!(!names.contains(&"calf_l_back_90".to_string()));
    assert!(names.contains(&"calf_l_bent_back".to_string()));
}

#[test]
fn driven_location_edit_overwrites_the_column_in_place_and_round_trips() {
    let (_dir, mut session, codec) = session();
    session.enter_edit_mode();

    let moved = [0.0, 0.14, 0.09];
    session
        .armature_mut()
        .expect("armature")
        .set_pose_delta(
            "calf_knee_l",
            &TransformDelta::from_euler(moved, [0.0; 3], [0.0; 3]),
        );
    ops::update_pose(&mut session, 0, 1).expect("update");
    // Restore the driver calibration the update re-sampled away.
    session.solvers[0].poses[1].drivers[0].quaternion_rotation = POSE_QUAT;
    session.solvers[0].poses[1].drivers[0].euler_rotation = quat_to_euler(POSE_QUAT);

    commit::commit(&mut session).expect("commit");

    // Overwrite in place: no new column, and the cell holds the new value.
    let doc = codec.document();
    let group = &doc.joint_groups[0];
    assert_eq!(group.input_indices, vec![0, 1]);
    let row = group.row_of_output(output_row_index(2, 1)).expect("loc-y row");
    let column = group.column_of_control(1).expect("pose column");
    assert!((group.value_at(row, column) - 0.14).abs() <= TOLERANCE);

    // Reset, drive the pose, re-evaluate: the edit comes back exactly.
    drive_pose(&mut session, "calf_l", POSE_QUAT);
    session.evaluate().expect("evaluate");
    let knee = session
        .armature()
        .expect("armature")
        .pose_delta("calf_knee_l")
        .expect("knee");
    assert_vec3_close(knee.location, moved);
}

#[test]
fn new_pose_appends_a_column_keyed_by_a_fresh_control_index() {
    let (_dir, mut session, codec) = session();
    session.enter_edit_mode();

    let driver_quat = euler_to_quat([-1.5707964, 0.0, 0.0]);
    ops::add_pose(
        &mut session,
        AddPoseArgs {
            name: "calf_l_down_90".into(),
            solver_index: Some(0),
            driven_transforms: Some(vec![(
                "calf_knee_l".to_string(),
                TransformDelta::from_euler([0.0, -0.05, 0.02], [0.0; 3], [1.0; 3]),
            )]),
            driver_quaternion: Some(driver_quat),
            ..AddPoseArgs::default()
        },
    )
    .expect("add pose");

    let report = commit::commit(&mut session).expect("commit");
    assert_eq!(report.poses_written, 5);
    assert_eq!(report.poses_appended, 1);

    let doc = codec.document();
    assert_eq!(doc.poses.len(), 5);
    assert_eq!(doc.poses[4].name, "calf_l_down_90");
    assert_eq!(doc.poses[4].control_index, 4);
    assert_eq!(doc.raw_control_count, 5);
    assert_eq!(doc.solvers[0].pose_positions, vec![0, 1, 4]);

    let group = &doc.joint_groups[0];
    assert_eq!(group.input_indices, vec![0, 1, 4]);

    // Existing columns are untouched.
    let loc_y = group.row_of_output(output_row_index(2, 1)).expect("row");
    assert!((group.value_at(loc_y, 1) - 0.04).abs() <= TOLERANCE);

    // The appended column carries the new pose's outputs; the backfilled
    // bone wrote rest-pose values.
    let new_column = group.column_of_control(4).expect("new column");
    assert!((group.value_at(loc_y, new_column) + 0.05).abs() <= TOLERANCE);
    let back_loc_y = group.row_of_output(output_row_index(3, 1)).expect("row");
    assert!(group.value_at(back_loc_y, new_column).abs() <= TOLERANCE);

    // The session sees the enlarged pose table after its reader reopened.
    assert_eq!(session.dna_pose_count(), 5);
}

#[test]
fn duplicate_driver_values_are_rejected_before_any_write() {
    let (_dir, mut session, codec) = session();
    session.enter_edit_mode();

    // Duplicating with the driver at rest collides with the default pose's
    // identity calibration.
    ops::duplicate_pose(&mut session, 0, 1).expect("duplicate");

    let result = commit::commit(&mut session);
    assert!(matches!(
        result,
        Err(CommitError::Validation(EditError::DuplicateDriverValues { .. }))
    ));
    assert_eq!(codec.document(), body_rig_doc(), "no partial writes");
    assert!(session.editing, "failed commit stays in edit mode");
}

#[test]
fn commit_preconditions_produce_distinct_errors() {
    // No codec bound at all.
    let mut bare = EditSession::default();
    assert!(matches!(
        commit::commit(&mut bare),
        Err(CommitError::MissingCodec)
    ));

    // Codec bound but no rig.
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("body.dna");
    std::fs::write(&path, b"MEMDNA\n").expect("placeholder");
    let codec = MemoryDnaCodec::new(body_rig_doc());
    let mut rigless = EditSession::default();
    rigless.bind_dna(Box::new(codec), &path).expect("bind");
    assert!(matches!(
        commit::commit(&mut rigless),
        Err(CommitError::MissingRig)
    ));

    // No DNA path recorded.
    let (_dir2, mut session, _codec) = session();
    let saved_path = session.dna_path.take();
    assert!(matches!(
        commit::commit(&mut session),
        Err(CommitError::MissingDnaPath)
    ));

    // Path set but the file is gone.
    session.dna_path = saved_path;
    std::fs::remove_file(session.dna_path.as_ref().expect("path")).expect("remove");
    assert!(matches!(
        commit::commit(&mut session),
        Err(CommitError::DnaFileMissing)
    ));
}

#[test]
fn successful_commit_exits_edit_mode_and_reopens_handles() {
    let (_dir, mut session, _codec) = session();
    session.enter_edit_mode();
    assert!(session.editing);
    assert!(!session.auto_evaluate);
    assert!(session.initial_snapshot.is_some());

    commit::commit(&mut session).expect("commit");

    assert!(!session.editing);
    assert!(session.auto_evaluate);
    assert!(session.initial_snapshot.is_none());
    assert!(session.reader().is_some(), "reader reopened after commit");
}

#[test]
fn driven_records_for_vanished_bones_drop_at_commit() {
    let (_dir, mut session, _codec) = session();

    let mut armature = FixtureArmature::from_doc(&body_rig_doc());
    armature.remove_bone("calf_kneeBack_l");
    session.bind_armature(Box::new(armature));
    session.enter_edit_mode();

    let report = commit::commit(&mut session).expect("commit");
    assert!(report
        .dropped_driven
        .iter()
        .any(|(pose, bone)| pose == "calf_l_back_90" && bone == "calf_kneeBack_l"));
    // The live graph reloaded from the committed DNA.
    assert!(!session.editing);
}

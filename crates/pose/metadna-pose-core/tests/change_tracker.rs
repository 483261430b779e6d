//! Change tracker behavior over scripted edit sequences against the fixture
//! rig: exact change counts, ordering, truncation, and snapshot isolation.

use metadna_pose_core::ops::{self, AddPoseArgs};
use metadna_pose_core::session::EditSession;
use metadna_pose_core::tracker::{self, BoneChange, ChangeKind, ChangeTracker, StructuralChange};
use metadna_test_fixtures::MemoryDnaCodec;

const SOLVER: &str = "calf_l_UERBFSolver";

fn session() -> (tempfile::TempDir, EditSession, MemoryDnaCodec) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("body.dna");
    let (session, codec) = metadna_test_fixtures::build_session(&path).expect("fixture session");
    (dir, session, codec)
}

#[test]
fn no_edits_reports_no_changes() {
    let (_dir, mut session, _codec) = session();
    session.enter_edit_mode();

    let report = tracker::update_tracking(&mut session);
    assert!(!report.has_changes());
    assert_eq!(report.change_count(), 0);
    assert!(report.summary_lines(5).is_empty());
}

#[test]
fn scripted_edits_report_exact_counts() {
    let (_dir, mut session, _codec) = session();
    session.enter_edit_mode();

    // One structural edit: a new pose over the solver's existing joint group.
    ops::add_pose(
        &mut session,
        AddPoseArgs {
            name: "calf_l_custom".into(),
            solver_index: Some(0),
            driven_bones: Some(vec!["calf_knee_l".into(), "calf_kneeBack_l".into()]),
            ..AddPoseArgs::default()
        },
    )
    .expect("add pose");

    // Two transform edits on the pre-existing pose.
    {
        let pose = session.solvers[0]
            .poses
            .iter_mut()
            .find(|p| p.name == "calf_l_back_90")
            .expect("fixture pose");
        let driven = pose.driven_by_name_mut("calf_knee_l").expect("fixture driven");
        driven.location[1] += 0.2;
        pose.drivers[0].quaternion_rotation = [0.9238795, 0.3826834, 0.0, 0.0];
    }

    let report = tracker::update_tracking(&mut session);
    assert_eq!(report.structural_changes.len(), 1);
    assert_eq!(report.structural_changes[0].kind, ChangeKind::PoseAdded);
    assert_eq!(report.structural_changes[0].name, "calf_l_custom");
    assert_eq!(report.structural_changes[0].parent_name, SOLVER);

    assert_eq!(report.bone_changes.len(), 2);
    assert_eq!(report.bone_changes[0].kind, ChangeKind::DrivenLocation);
    assert_eq!(report.bone_changes[0].bone_name, "calf_knee_l");
    assert_eq!(report.bone_changes[1].kind, ChangeKind::DriverModified);
    assert_eq!(report.bone_changes[1].bone_name, "calf_l");

    // Edit flags follow the same comparison.
    let pose = session.solvers[0]
        .pose_by_name("calf_l_back_90")
        .expect("fixture pose");
    let driven = pose.driven_by_name("calf_knee_l").expect("fixture driven");
    assert!(driven.location_edited);
    assert!(!driven.rotation_edited);
    assert!(!driven.scale_edited);

    // The session-level summary renders the same changes, structural first.
    let summary = session.change_summary();
    assert_eq!(summary.len(), 3);
    assert_eq!(summary[0], format!("Added pose 'calf_l_custom' to {SOLVER}"));
}

#[test]
fn new_solver_default_pose_is_exempt_from_added_reporting() {
    let (_dir, mut session, _codec) = session();
    session.enter_edit_mode();

    ops::add_solver(&mut session, "thigh_l", None).expect("add solver");

    let report = tracker::update_tracking(&mut session);
    assert_eq!(report.structural_changes.len(), 1);
    assert_eq!(report.structural_changes[0].kind, ChangeKind::SolverAdded);
    assert_eq!(report.structural_changes[0].name, "thigh_l_UERBFSolver");
    assert!(report.bone_changes.is_empty());
}

#[test]
fn driven_bone_changes_are_reported_per_pose() {
    let (_dir, mut session, _codec) = session();
    session.enter_edit_mode();

    ops::add_driven_bones(&mut session, &["thigh_l".to_string()], false).expect("add driven");

    let report = tracker::update_tracking(&mut session);
    let added: Vec<&StructuralChange> = report
        .structural_changes
        .iter()
        .filter(|c| c.kind == ChangeKind::DrivenBoneAdded)
        .collect();
    assert_eq!(added.len(), 2);
    assert_eq!(added[0].parent_name, format!("{SOLVER}/default"));
    assert_eq!(added[1].parent_name, format!("{SOLVER}/calf_l_back_90"));
    assert!(added.iter().all(|c| c.name == "thigh_l"));
}

#[test]
fn removed_pose_is_reported() {
    let (_dir, mut session, _codec) = session();
    session.enter_edit_mode();

    ops::remove_pose(&mut session, 0, 1).expect("remove pose");

    let report = tracker::update_tracking(&mut session);
    assert_eq!(report.structural_changes.len(), 1);
    assert_eq!(report.structural_changes[0].kind, ChangeKind::PoseRemoved);
    assert_eq!(report.structural_changes[0].name, "calf_l_back_90");
}

#[test]
fn summary_lists_structural_changes_first_and_truncates() {
    let mut report = ChangeTracker::default();
    for i in 0..3 {
        report.structural_changes.push(StructuralChange {
            kind: ChangeKind::PoseAdded,
            name: format!("pose_{i}"),
            parent_name: SOLVER.into(),
        });
    }
    for i in 0..3 {
        report.bone_changes.push(BoneChange {
            bone_name: format!("bone_{i}"),
            pose_name: "pose_0".into(),
            solver_name: SOLVER.into(),
            kind: ChangeKind::DrivenLocation,
            old_value: None,
            new_value: None,
        });
    }

    let lines = report.summary_lines(4);
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], format!("Added pose 'pose_0' to {SOLVER}"));
    assert_eq!(lines[2], format!("Added pose 'pose_2' to {SOLVER}"));
    assert_eq!(lines[3], "bone_0: location modified");
    assert_eq!(lines[4], "... and 2 more changes");

    let json = report.export_summary_json(4);
    assert_eq!(json["total"], 6);
    assert_eq!(json["structural"], 3);
    assert_eq!(json["lines"].as_array().expect("lines array").len(), 5);
}

#[test]
fn recomputation_is_idempotent() {
    let (_dir, mut session, _codec) = session();
    session.enter_edit_mode();

    session.solvers[0].poses[1].driven[0].location[0] += 0.5;

    let first = tracker::update_tracking(&mut session);
    let second = tracker::update_tracking(&mut session);
    assert_eq!(first.structural_changes, second.structural_changes);
    assert_eq!(first.bone_changes, second.bone_changes);
}

#[test]
fn snapshot_does_not_alias_the_live_graph() {
    let (_dir, mut session, _codec) = session();
    session.enter_edit_mode();

    let original = session.solvers[0].poses[1].driven[0].location;
    session.solvers[0].poses[1].driven[0].location = [9.0, 9.0, 9.0];

    let snapshot = session.initial_snapshot.as_ref().expect("snapshot taken");
    let captured = snapshot
        .pose(SOLVER, "calf_l_back_90")
        .expect("pose snapshot")
        .driven
        .get("calf_knee_l")
        .expect("driven snapshot");
    assert_eq!(captured.location, original);
}

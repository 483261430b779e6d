use criterion::{black_box, criterion_group, criterion_main, Criterion};

use metadna_pose_core::config::Config;
use metadna_pose_core::session::EditSession;
use metadna_pose_core::snapshot::create_snapshot;
use metadna_pose_core::tracker::compute_changes;
use metadna_pose_core::{DriverRecord, DrivenRecord, Pose, Solver};
use metadna_test_fixtures::FixtureArmature;

fn synthetic_session(solver_count: usize, poses_per_solver: usize, driven_per_pose: usize) -> EditSession {
    let mut session = EditSession::default();
    let mut bone_names = Vec::new();

    for s in 0..solver_count {
        let driver_bone = format!("driver_{s}");
        bone_names.push(driver_bone.clone());
        let mut solver = Solver::new(s as u16, format!("{driver_bone}_UERBFSolver"));
        for p in 0..poses_per_solver {
            let pose_index = (s * poses_per_solver + p) as u16;
            let name = if p == 0 { "default".to_string() } else { format!("pose_{p}") };
            let mut pose = Pose::new(s as u16, pose_index, name);
            let mut driver = DriverRecord::new(s as u16, pose_index, driver_bone.clone());
            driver.quaternion_rotation = [1.0, 0.0, 0.001 * p as f32, 0.0];
            pose.drivers.push(driver);
            for d in 0..driven_per_pose {
                let bone = format!("driven_{s}_{d}");
                if p == 0 {
                    bone_names.push(bone.clone());
                }
                let mut driven = DrivenRecord::new(pose_index, bone);
                driven.location = [0.01 * d as f32, 0.0, 0.0];
                driven.scale = [1.0; 3];
                pose.driven.push(driven);
            }
            solver.poses.push(pose);
        }
        session.solvers.push(solver);
    }

    session.bind_armature(Box::new(FixtureArmature::new(bone_names)));
    session
}

fn bench_compute_changes(c: &mut Criterion) {
    let config = Config::default();
    let mut session = synthetic_session(16, 8, 12);
    let snapshot = create_snapshot(&session);

    // Touch a spread of records so the diff has real work to do.
    for solver in session.solvers.iter_mut().step_by(2) {
        for pose in solver.poses.iter_mut().skip(1).step_by(3) {
            pose.driven[0].location[1] += 0.25;
            pose.drivers[0].quaternion_rotation = [0.9238795, 0.3826834, 0.0, 0.0];
        }
    }

    c.bench_function("compute_changes 16x8x12", |b| {
        b.iter(|| {
            let tracker = compute_changes(black_box(&session), black_box(&snapshot), &config);
            black_box(tracker.change_count())
        })
    });
}

criterion_group!(benches, bench_compute_changes);
criterion_main!(benches);

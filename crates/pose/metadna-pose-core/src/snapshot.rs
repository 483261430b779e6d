//! Baseline snapshots of the solver graph.
//!
//! A snapshot is a deep copy of every solver, pose, driver, and driven record
//! taken when an editing session begins. It holds plain data only, never
//! references into the live graph, and is never mutated after creation; the
//! change tracker diffs the live graph against it on demand.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use metadna_api_core::DrivenDataType;

use crate::session::EditSession;

/// Captured transforms of one driven bone at one pose.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct DrivenSnapshot {
    pub location: [f32; 3],
    pub rotation: [f32; 3],
    pub scale: [f32; 3],
}

/// One pose: driven transforms and driver calibration quaternions, keyed and
/// ordered by bone name insertion order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PoseSnapshot {
    pub driven: IndexMap<String, DrivenSnapshot>,
    /// Driver bone name -> quaternion (w, x, y, z).
    pub drivers: IndexMap<String, [f32; 4]>,
}

/// One solver: pose name list (ordered) plus per-pose captures.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SolverSnapshot {
    pub pose_names: Vec<String>,
    pub poses: IndexMap<String, PoseSnapshot>,
}

/// The full baseline taken when entering edit mode.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub solvers: IndexMap<String, SolverSnapshot>,
}

impl Snapshot {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.solvers.is_empty()
    }

    pub fn solver(&self, name: &str) -> Option<&SolverSnapshot> {
        self.solvers.get(name)
    }

    pub fn pose(&self, solver_name: &str, pose_name: &str) -> Option<&PoseSnapshot> {
        self.solvers.get(solver_name)?.poses.get(pose_name)
    }
}

/// Capture the current solver graph. Returns an empty snapshot when the
/// session has no graph loaded.
pub fn create_snapshot(session: &EditSession) -> Snapshot {
    let mut snapshot = Snapshot::default();

    for solver in &session.solvers {
        let mut solver_snap = SolverSnapshot::default();

        for pose in &solver.poses {
            solver_snap.pose_names.push(pose.name.clone());
            let mut pose_snap = PoseSnapshot::default();

            for driven in &pose.driven {
                if driven.data_type != DrivenDataType::Bone {
                    continue;
                }
                pose_snap.driven.insert(
                    driven.name.clone(),
                    DrivenSnapshot {
                        location: driven.location,
                        rotation: driven.euler_rotation,
                        scale: driven.scale,
                    },
                );
            }

            for driver in &pose.drivers {
                pose_snap
                    .drivers
                    .insert(driver.name.clone(), driver.quaternion_rotation);
            }

            solver_snap.poses.insert(pose.name.clone(), pose_snap);
        }

        snapshot.solvers.insert(solver.name.clone(), solver_snap);
    }

    snapshot
}

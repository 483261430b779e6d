//! Change tracking for pose editing sessions.
//!
//! The tracker owns the baseline snapshot and two change lists, recomputed in
//! full on demand by diffing the live graph against the snapshot. It never
//! mutates the snapshot and computing changes twice in a row yields the same
//! result.

use serde::{Deserialize, Serialize};

use metadna_api_core::value::{quat_angle_between, vec3_distance};
use metadna_api_core::{DrivenDataType, Value, DEFAULT_POSE_NAME};

use crate::config::Config;
use crate::session::EditSession;
use crate::snapshot::{create_snapshot, PoseSnapshot, Snapshot};

/// Kinds of changes that can be tracked.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    PoseAdded,
    PoseRemoved,
    PoseRenamed,
    SolverAdded,
    SolverRemoved,
    DrivenBoneAdded,
    DrivenBoneRemoved,
    DriverModified,
    DrivenLocation,
    DrivenRotation,
    DrivenScale,
}

/// A change to a single bone's transform.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoneChange {
    pub bone_name: String,
    pub pose_name: String,
    pub solver_name: String,
    pub kind: ChangeKind,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl BoneChange {
    /// Human-readable one-liner for this change.
    pub fn summary(&self) -> String {
        let label = match self.kind {
            ChangeKind::DrivenLocation => "location",
            ChangeKind::DrivenRotation => "rotation",
            ChangeKind::DrivenScale => "scale",
            ChangeKind::DriverModified => "driver rotation",
            _ => "transform",
        };
        format!("{}: {} modified", self.bone_name, label)
    }
}

/// A structural change: pose/solver/driven-bone added or removed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StructuralChange {
    pub kind: ChangeKind,
    pub name: String,
    /// For poses: the solver name. For bones: "solver/pose".
    pub parent_name: String,
}

impl StructuralChange {
    /// Human-readable one-liner for this change.
    pub fn summary(&self) -> String {
        match self.kind {
            ChangeKind::PoseAdded => format!("Added pose '{}' to {}", self.name, self.parent_name),
            ChangeKind::PoseRemoved => {
                format!("Removed pose '{}' from {}", self.name, self.parent_name)
            }
            ChangeKind::SolverAdded => format!("Added solver '{}'", self.name),
            ChangeKind::SolverRemoved => format!("Removed solver '{}'", self.name),
            ChangeKind::DrivenBoneAdded => {
                format!("Added bone '{}' to {}", self.name, self.parent_name)
            }
            ChangeKind::DrivenBoneRemoved => {
                format!("Removed bone '{}' from {}", self.name, self.parent_name)
            }
            ChangeKind::PoseRenamed => format!("Renamed pose to '{}'", self.name),
            _ => format!("{:?}: {}", self.kind, self.name),
        }
    }
}

/// All changes made during a pose editing session, relative to the snapshot
/// taken when editing began.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChangeTracker {
    pub initial_snapshot: Snapshot,
    pub bone_changes: Vec<BoneChange>,
    pub structural_changes: Vec<StructuralChange>,
}

impl ChangeTracker {
    pub fn new(initial_snapshot: Snapshot) -> Self {
        Self {
            initial_snapshot,
            bone_changes: Vec::new(),
            structural_changes: Vec::new(),
        }
    }

    #[inline]
    pub fn has_changes(&self) -> bool {
        !self.bone_changes.is_empty() || !self.structural_changes.is_empty()
    }

    #[inline]
    pub fn change_count(&self) -> usize {
        self.bone_changes.len() + self.structural_changes.len()
    }

    /// Render up to `max_lines` change summaries, structural changes first,
    /// with an overflow marker when truncated.
    pub fn summary_lines(&self, max_lines: usize) -> Vec<String> {
        let mut lines: Vec<String> = self
            .structural_changes
            .iter()
            .take(max_lines)
            .map(|c| c.summary())
            .collect();

        let remaining = max_lines.saturating_sub(lines.len());
        lines.extend(self.bone_changes.iter().take(remaining).map(|c| c.summary()));

        let total = self.change_count();
        let shown = lines.len();
        if total > shown {
            lines.push(format!("... and {} more changes", total - shown));
        }

        lines
    }

    /// Group bone changes by pose name, preserving change order.
    pub fn bone_changes_by_pose(&self) -> indexmap::IndexMap<String, Vec<&BoneChange>> {
        let mut by_pose: indexmap::IndexMap<String, Vec<&BoneChange>> = indexmap::IndexMap::new();
        for change in &self.bone_changes {
            by_pose.entry(change.pose_name.clone()).or_default().push(change);
        }
        by_pose
    }

    /// Export the rendered summary as serde_json::Value (stable schema for
    /// overlays and HUDs).
    pub fn export_summary_json(&self, max_lines: usize) -> serde_json::Value {
        serde_json::json!({
            "total": self.change_count(),
            "structural": self.structural_changes.len(),
            "bones": self.bone_changes.len(),
            "lines": self.summary_lines(max_lines),
        })
    }

    pub fn clear(&mut self) {
        self.bone_changes.clear();
        self.structural_changes.clear();
        self.initial_snapshot = Snapshot::default();
    }
}

fn compare_pose_records(
    tracker: &mut ChangeTracker,
    pose: &metadna_api_core::Pose,
    solver_name: &str,
    initial_pose: &PoseSnapshot,
    threshold: f32,
) {
    // Driven-bone set differences against the baseline.
    for driven in &pose.driven {
        if driven.data_type == DrivenDataType::Bone && !initial_pose.driven.contains_key(&driven.name)
        {
            tracker.structural_changes.push(StructuralChange {
                kind: ChangeKind::DrivenBoneAdded,
                name: driven.name.clone(),
                parent_name: format!("{}/{}", solver_name, pose.name),
            });
        }
    }
    for bone_name in initial_pose.driven.keys() {
        if pose.driven_by_name(bone_name).is_none() {
            tracker.structural_changes.push(StructuralChange {
                kind: ChangeKind::DrivenBoneRemoved,
                name: bone_name.clone(),
                parent_name: format!("{}/{}", solver_name, pose.name),
            });
        }
    }

    // Transform deltas for driven bones present on both sides.
    for driven in &pose.driven {
        let Some(initial) = initial_pose.driven.get(&driven.name) else {
            continue;
        };

        if vec3_distance(driven.location, initial.location) > threshold {
            tracker.bone_changes.push(BoneChange {
                bone_name: driven.name.clone(),
                pose_name: pose.name.clone(),
                solver_name: solver_name.to_string(),
                kind: ChangeKind::DrivenLocation,
                old_value: Some(Value::Vec3(initial.location)),
                new_value: Some(Value::Vec3(driven.location)),
            });
        }
        if vec3_distance(driven.euler_rotation, initial.rotation) > threshold {
            tracker.bone_changes.push(BoneChange {
                bone_name: driven.name.clone(),
                pose_name: pose.name.clone(),
                solver_name: solver_name.to_string(),
                kind: ChangeKind::DrivenRotation,
                old_value: Some(Value::Vec3(initial.rotation)),
                new_value: Some(Value::Vec3(driven.euler_rotation)),
            });
        }
        if vec3_distance(driven.scale, initial.scale) > threshold {
            tracker.bone_changes.push(BoneChange {
                bone_name: driven.name.clone(),
                pose_name: pose.name.clone(),
                solver_name: solver_name.to_string(),
                kind: ChangeKind::DrivenScale,
                old_value: Some(Value::Vec3(initial.scale)),
                new_value: Some(Value::Vec3(driven.scale)),
            });
        }
    }

    // Driver calibration drift, measured as a rotation-difference angle.
    for driver in &pose.drivers {
        let Some(&initial_quat) = initial_pose.drivers.get(&driver.name) else {
            continue;
        };
        if quat_angle_between(initial_quat, driver.quaternion_rotation) > threshold {
            tracker.bone_changes.push(BoneChange {
                bone_name: driver.name.clone(),
                pose_name: pose.name.clone(),
                solver_name: solver_name.to_string(),
                kind: ChangeKind::DriverModified,
                old_value: Some(Value::Quat(initial_quat)),
                new_value: Some(Value::Quat(driver.quaternion_rotation)),
            });
        }
    }
}

/// Diff the session's live graph against `initial_snapshot`.
///
/// Changes are appended in solver-then-pose-then-bone iteration order and
/// never re-sorted. Returns an empty tracker when no rig is bound.
pub fn compute_changes(
    session: &EditSession,
    initial_snapshot: &Snapshot,
    config: &Config,
) -> ChangeTracker {
    let mut tracker = ChangeTracker::new(initial_snapshot.clone());

    if !session.has_armature() {
        return tracker;
    }

    let threshold = config.bone_delta_threshold;

    // Solver set differences.
    for solver in &session.solvers {
        if initial_snapshot.solver(&solver.name).is_none() {
            tracker.structural_changes.push(StructuralChange {
                kind: ChangeKind::SolverAdded,
                name: solver.name.clone(),
                parent_name: String::new(),
            });
        }
    }
    for solver_name in initial_snapshot.solvers.keys() {
        if session.solver_by_name(solver_name).is_none() {
            tracker.structural_changes.push(StructuralChange {
                kind: ChangeKind::SolverRemoved,
                name: solver_name.clone(),
                parent_name: String::new(),
            });
        }
    }

    // Pose differences and transform comparisons, per surviving solver.
    for solver in &session.solvers {
        let Some(initial_solver) = initial_snapshot.solver(&solver.name) else {
            continue;
        };

        for pose in &solver.poses {
            // "default" always pre-exists conceptually, so it is exempt from
            // added-pose reporting.
            if pose.name != DEFAULT_POSE_NAME && !initial_solver.poses.contains_key(&pose.name) {
                tracker.structural_changes.push(StructuralChange {
                    kind: ChangeKind::PoseAdded,
                    name: pose.name.clone(),
                    parent_name: solver.name.clone(),
                });
            }
        }
        for pose_name in &initial_solver.pose_names {
            if solver.pose_by_name(pose_name).is_none() {
                tracker.structural_changes.push(StructuralChange {
                    kind: ChangeKind::PoseRemoved,
                    name: pose_name.clone(),
                    parent_name: solver.name.clone(),
                });
            }
        }

        for pose in &solver.poses {
            if let Some(initial_pose) = initial_solver.poses.get(&pose.name) {
                compare_pose_records(&mut tracker, pose, &solver.name, initial_pose, threshold);
            }
        }
    }

    tracker
}

/// Refresh the per-driven `*_edited` flags from the baseline comparison.
/// Purely a display affordance; the tracker itself is authoritative.
pub fn refresh_edit_flags(session: &mut EditSession, initial_snapshot: &Snapshot, config: &Config) {
    let threshold = config.bone_delta_threshold;
    for solver in &mut session.solvers {
        let Some(initial_solver) = initial_snapshot.solvers.get(&solver.name) else {
            continue;
        };
        for pose in &mut solver.poses {
            let Some(initial_pose) = initial_solver.poses.get(&pose.name) else {
                continue;
            };
            for driven in &mut pose.driven {
                let Some(initial) = initial_pose.driven.get(&driven.name) else {
                    continue;
                };
                driven.location_edited =
                    vec3_distance(driven.location, initial.location) > threshold;
                driven.rotation_edited =
                    vec3_distance(driven.euler_rotation, initial.rotation) > threshold;
                driven.scale_edited = vec3_distance(driven.scale, initial.scale) > threshold;
            }
        }
    }
}

/// Take the baseline snapshot for a session that just entered edit mode and
/// return a fresh tracker over it.
pub fn initialize_tracking(session: &mut EditSession) -> ChangeTracker {
    let snapshot = create_snapshot(session);
    log::debug!(
        "initialized pose editor change tracking with {} solvers",
        snapshot.solvers.len()
    );
    let tracker = ChangeTracker::new(snapshot.clone());
    session.initial_snapshot = Some(snapshot);
    tracker
}

/// Recompute the tracker against the session's stored baseline, initializing
/// tracking first if it has not started yet.
pub fn update_tracking(session: &mut EditSession) -> ChangeTracker {
    let Some(snapshot) = session.initial_snapshot.clone() else {
        return initialize_tracking(session);
    };
    let config = session.config;
    let tracker = compute_changes(session, &snapshot, &config);
    refresh_edit_flags(session, &snapshot, &config);
    tracker
}

/// Drop all tracking state; called when an editing session ends.
pub fn clear_tracking(session: &mut EditSession) {
    session.initial_snapshot = None;
    log::debug!("cleared pose editor change tracking");
}

//! MetaDNA Pose Editing Core (host-agnostic)
//!
//! The RBF pose editing subsystem: an in-memory solver/pose graph, snapshot
//! and change tracking over it, validated edit operations, left/right
//! mirroring, and the commit engine that writes the graph back into the DNA
//! joint-group matrices. The host application, the native evaluator, and the
//! binary DNA codec live behind traits.

pub mod binding;
pub mod commit;
pub mod config;
pub mod mirror;
pub mod ops;
pub mod session;
pub mod snapshot;
pub mod tracker;

// Re-exports for consumers (hosts and fixtures)
pub use binding::{Armature, EvalError, Evaluator, EvaluatorProvider};
pub use commit::{commit, commit_rbf_data, CommitError, CommitReport};
pub use config::Config;
pub use mirror::{mirror_pose, mirror_solver, mirrored_name, MirrorPatterns};
pub use ops::{
    add_driven_bones, add_pose, add_solver, duplicate_pose, remove_driven_bones, remove_pose,
    remove_solver, rename_pose, update_pose, AddPoseArgs, AvailableBone, EditError, UpdateOutcome,
};
pub use session::EditSession;
pub use snapshot::{create_snapshot, Snapshot};
pub use tracker::{
    compute_changes, BoneChange, ChangeKind, ChangeTracker, StructuralChange,
};
pub use metadna_api_core::{
    DriverRecord, DrivenDataType, DrivenRecord, Pose, Solver, TransformDelta, Value,
    DEFAULT_POSE_NAME, RBF_SOLVER_SUFFIX,
};

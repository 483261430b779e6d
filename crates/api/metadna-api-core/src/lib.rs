//! metadna-api-core: transform math and the DNA codec contract (host-agnostic)

pub mod dna;
pub mod rbf;
pub mod value;

pub use dna::{DnaCodec, DnaError, DnaReader, DnaWriter, JointGroup, PoseTableEntry, SolverTableEntry};
pub use rbf::{
    driver_bone_for_solver, solver_name_for_bone, DistanceMethod, DriverRecord, DrivenDataType,
    DrivenRecord, FunctionType, NormalizeMethod, Pose, RotationMode, Solver, SolverMode, TwistAxis,
    DEFAULT_POSE_NAME, RBF_SOLVER_SUFFIX,
};
pub use value::{TransformDelta, Value, ValueKind};

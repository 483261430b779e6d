//! Host collaborator contracts: the armature the session edits against and
//! the native rig evaluator.
//!
//! The editor core never talks to a scene graph directly; hosts implement
//! `Armature` over whatever bone representation they have. Transforms are
//! exchanged as local deltas from the rest pose, which is the quantity DNA
//! stores.

use thiserror::Error;

use metadna_api_core::TransformDelta;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("rig evaluation failed: {0}")]
    Failed(String),

    #[error("evaluator is not bound to a rig")]
    NotBound,
}

/// A bound armature: bone lookup plus per-bone pose deltas.
pub trait Armature {
    fn bone_names(&self) -> Vec<String>;

    fn has_bone(&self, name: &str) -> bool {
        self.bone_names().iter().any(|b| b == name)
    }

    /// Current local pose delta of a bone, or None if the bone is absent.
    fn pose_delta(&self, name: &str) -> Option<TransformDelta>;

    /// Drive a bone to the given delta. Returns false if the bone is absent.
    fn set_pose_delta(&mut self, name: &str, delta: &TransformDelta) -> bool;

    /// Reset every bone to its rest pose.
    fn reset_pose(&mut self);
}

/// The native evaluator: reads driver inputs from the armature and writes
/// computed driven outputs back onto it. The evaluation math lives outside
/// this core.
pub trait Evaluator {
    fn evaluate(&mut self, armature: &mut dyn Armature) -> Result<(), EvalError>;
}

/// Creates evaluator instances from an open DNA reader. The session destroys
/// and lazily recreates evaluator instances around commits, so creation has
/// to be repeatable.
pub trait EvaluatorProvider {
    fn create(
        &self,
        reader: &dyn metadna_api_core::DnaReader,
    ) -> Result<Box<dyn Evaluator>, EvalError>;
}

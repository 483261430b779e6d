//! The editing session: authoritative in-memory state for one rig's RBF
//! solver graph while pose editing is active.
//!
//! One session per open rig-editing context, owned by the caller and passed
//! by reference; there is no global registry. All operations run
//! synchronously on the caller's thread. The session also scopes the native
//! handles (DNA reader, evaluator instance): `release_handles` must drop them
//! before a commit opens its own reader/writer pair, because the native layer
//! may hold memory-mapped or locked file state.

use std::path::{Path, PathBuf};

use hashbrown::HashSet;

use metadna_api_core::value::TransformDelta;
use metadna_api_core::{
    DnaCodec, DnaError, DnaReader, DrivenDataType, DrivenRecord, Pose, Solver,
};

use crate::binding::{Armature, EvalError, Evaluator, EvaluatorProvider};
use crate::config::Config;
use crate::snapshot::Snapshot;
use crate::tracker;

pub struct EditSession {
    /// The live solver graph, mirroring (but independent of) the DNA's RBF
    /// tables.
    pub solvers: Vec<Solver>,
    pub active_solver_index: usize,

    /// Bone-class sets; driver/swing/twist bones can never be driven targets.
    pub driver_bone_names: HashSet<String>,
    pub swing_bone_names: HashSet<String>,
    pub twist_bone_names: HashSet<String>,

    pub dna_path: Option<PathBuf>,
    pub editing: bool,
    pub auto_evaluate: bool,
    pub config: Config,

    /// Baseline for change tracking, set when edit mode is entered.
    pub initial_snapshot: Option<Snapshot>,

    armature: Option<Box<dyn Armature>>,
    codec: Option<Box<dyn DnaCodec>>,
    reader: Option<Box<dyn DnaReader>>,
    evaluator_provider: Option<Box<dyn EvaluatorProvider>>,
    evaluator: Option<Box<dyn Evaluator>>,
}

impl Default for EditSession {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl EditSession {
    pub fn new(config: Config) -> Self {
        Self {
            solvers: Vec::new(),
            active_solver_index: 0,
            driver_bone_names: HashSet::new(),
            swing_bone_names: HashSet::new(),
            twist_bone_names: HashSet::new(),
            dna_path: None,
            editing: false,
            auto_evaluate: true,
            config,
            initial_snapshot: None,
            armature: None,
            codec: None,
            reader: None,
            evaluator_provider: None,
            evaluator: None,
        }
    }

    // ------------------------------------------------------------------
    // Bindings

    pub fn bind_armature(&mut self, armature: Box<dyn Armature>) {
        self.armature = Some(armature);
    }

    #[inline]
    pub fn has_armature(&self) -> bool {
        self.armature.is_some()
    }

    pub fn armature(&self) -> Option<&dyn Armature> {
        self.armature.as_deref()
    }

    pub fn armature_mut(&mut self) -> Option<&mut (dyn Armature + 'static)> {
        self.armature.as_deref_mut()
    }

    pub fn bind_evaluator_provider(&mut self, provider: Box<dyn EvaluatorProvider>) {
        self.evaluator_provider = Some(provider);
    }

    /// Bind a codec and DNA file path, open a reader, and load the solver
    /// graph from it.
    pub fn bind_dna(&mut self, codec: Box<dyn DnaCodec>, path: &Path) -> Result<(), DnaError> {
        let reader = codec.open_reader(path)?;
        self.codec = Some(codec);
        self.dna_path = Some(path.to_path_buf());
        self.reader = Some(reader);
        self.reload_solvers();
        Ok(())
    }

    pub fn codec(&self) -> Option<&dyn DnaCodec> {
        self.codec.as_deref()
    }

    pub fn reader(&self) -> Option<&dyn DnaReader> {
        self.reader.as_deref()
    }

    /// Pose count currently resident in the DNA file; zero without a reader.
    pub fn dna_pose_count(&self) -> u16 {
        self.reader.as_deref().map(|r| r.rbf_pose_count()).unwrap_or(0)
    }

    pub fn joint_index(&self, bone_name: &str) -> Option<u16> {
        self.reader.as_deref().and_then(|r| r.joint_index(bone_name))
    }

    /// Rebuild the solver list from the bound reader, preserving the active
    /// solver/pose/record indices where they are still in range.
    pub fn reload_solvers(&mut self) {
        let Some(reader) = self.reader.as_deref() else {
            return;
        };

        let last_solver = self.active_solver_index;
        let last_pose = self
            .solvers
            .get(last_solver)
            .map(|s| s.poses_active_index)
            .unwrap_or(0);
        let (last_driven, last_driver) = self
            .solvers
            .get(last_solver)
            .and_then(|s| s.poses.get(last_pose))
            .map(|p| (p.driven_active_index, p.drivers_active_index))
            .unwrap_or((0, 0));

        self.solvers = reader.rbf_solvers();

        if last_solver < self.solvers.len() {
            self.active_solver_index = last_solver;
            let solver = &mut self.solvers[last_solver];
            if last_pose < solver.poses.len() {
                solver.poses_active_index = last_pose;
                let pose = &mut solver.poses[last_pose];
                if last_driven < pose.driven.len() {
                    pose.driven_active_index = last_driven;
                }
                if last_driver < pose.drivers.len() {
                    pose.drivers_active_index = last_driver;
                }
            }
        } else {
            self.active_solver_index = 0;
        }
    }

    // ------------------------------------------------------------------
    // Graph accessors

    pub fn solver_by_name(&self, name: &str) -> Option<&Solver> {
        self.solvers.iter().find(|s| s.name == name)
    }

    pub fn active_solver(&self) -> Option<&Solver> {
        self.solvers.get(self.active_solver_index)
    }

    pub fn active_solver_mut(&mut self) -> Option<&mut Solver> {
        self.solvers.get_mut(self.active_solver_index)
    }

    pub fn active_pose(&self) -> Option<&Pose> {
        let solver = self.active_solver()?;
        solver.poses.get(solver.poses_active_index)
    }

    pub fn active_pose_mut(&mut self) -> Option<&mut Pose> {
        let solver = self.solvers.get_mut(self.active_solver_index)?;
        let index = solver.poses_active_index;
        solver.poses.get_mut(index)
    }

    pub fn active_driven(&self) -> Option<&DrivenRecord> {
        let pose = self.active_pose()?;
        pose.driven.get(pose.driven_active_index)
    }

    // ------------------------------------------------------------------
    // Edit mode lifecycle

    /// Enter editing mode: automatic evaluation is suspended so the evaluator
    /// cannot race uncommitted edits, and the tracking baseline is captured.
    pub fn enter_edit_mode(&mut self) {
        self.editing = true;
        self.auto_evaluate = false;
        tracker::initialize_tracking(self);
    }

    /// Leave editing mode and drop tracking state.
    pub fn exit_edit_mode(&mut self) {
        self.editing = false;
        self.auto_evaluate = true;
        tracker::clear_tracking(self);
    }

    /// Abandon uncommitted edits: reset the armature pose, reload the graph
    /// from the DNA, leave edit mode, and run one evaluation pass.
    pub fn revert(&mut self) {
        if let Some(armature) = self.armature_mut() {
            armature.reset_pose();
        }
        self.reload_solvers();
        self.exit_edit_mode();
        if let Err(err) = self.evaluate() {
            log::warn!("evaluation after revert failed: {err}");
        }
    }

    /// Recompute tracking against the session baseline and render the
    /// configured number of summary lines (empty outside edit mode).
    pub fn change_summary(&self) -> Vec<String> {
        let Some(snapshot) = &self.initial_snapshot else {
            return Vec::new();
        };
        let tracker = tracker::compute_changes(self, snapshot, &self.config);
        tracker.summary_lines(self.config.summary_max_lines)
    }

    // ------------------------------------------------------------------
    // Native handle lifecycle

    /// Drop the session's reader and evaluator instances. Must be called
    /// before a commit opens its own handles on the same file.
    pub fn release_handles(&mut self) {
        drop(self.evaluator.take());
        drop(self.reader.take());
    }

    /// Re-open the reader on the bound DNA path (after a commit replaced the
    /// file contents) and reload the graph.
    pub fn reopen_reader(&mut self) -> Result<(), DnaError> {
        let (Some(codec), Some(path)) = (self.codec.as_deref(), self.dna_path.as_deref()) else {
            return Ok(());
        };
        self.reader = Some(codec.open_reader(path)?);
        self.reload_solvers();
        Ok(())
    }

    /// Run one evaluation pass, lazily recreating the evaluator instance from
    /// the bound provider if it was released.
    pub fn evaluate(&mut self) -> Result<(), EvalError> {
        if self.evaluator.is_none() {
            let (Some(provider), Some(reader)) =
                (self.evaluator_provider.as_deref(), self.reader.as_deref())
            else {
                return Err(EvalError::NotBound);
            };
            self.evaluator = Some(provider.create(reader)?);
        }
        let armature = self.armature.as_deref_mut().ok_or(EvalError::NotBound)?;
        match self.evaluator.as_deref_mut() {
            Some(evaluator) => evaluator.evaluate(armature),
            None => Err(EvalError::NotBound),
        }
    }

    // ------------------------------------------------------------------
    // Pose preview

    /// Drive the armature to display a pose: reset, apply the driver
    /// calibration rotations, then apply the driven deltas directly (edit
    /// mode bypasses the evaluator). The default pose is the rest pose.
    pub fn apply_pose(&mut self, solver_index: usize, pose_index: usize) {
        let Some(pose) = self
            .solvers
            .get(solver_index)
            .and_then(|s| s.poses.get(pose_index))
            .cloned()
        else {
            return;
        };
        let scale_factor = pose.scale_factor;
        let Some(armature) = self.armature_mut() else {
            return;
        };

        armature.reset_pose();
        if pose.name == metadna_api_core::DEFAULT_POSE_NAME {
            return;
        }

        for driver in &pose.drivers {
            let delta = TransformDelta {
                location: [0.0; 3],
                euler_rotation: driver.euler_rotation,
                quaternion_rotation: driver.quaternion_rotation,
                scale: [0.0; 3],
            };
            armature.set_pose_delta(&driver.name, &delta);
        }

        for driven in &pose.driven {
            if driven.data_type != DrivenDataType::Bone {
                continue;
            }
            // Scale components equal to the pose scale factor are fill-ins,
            // not real deltas.
            let mut scale = driven.scale;
            for component in &mut scale {
                if (*component - scale_factor).abs() < 1e-5 {
                    *component = 0.0;
                }
            }
            let delta = TransformDelta {
                location: driven.location,
                euler_rotation: driven.euler_rotation,
                quaternion_rotation: driven.quaternion_rotation,
                scale,
            };
            armature.set_pose_delta(&driven.name, &delta);
        }
    }
}

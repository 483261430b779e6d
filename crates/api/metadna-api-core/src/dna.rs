//! DNA codec contract: reader/writer traits over the binary container plus
//! the plain record types they exchange.
//!
//! The binary format itself is owned by the codec implementation; this core
//! treats the container as opaque except for the joint-group matrix encoding:
//! rows are `joint_index * 9 + attribute_offset` (0-2 location XYZ, 3-5
//! rotation XYZ, 6-8 scale XYZ) and columns are keyed by a pose's raw control
//! index. Releasing a handle's native resources is `Drop`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rbf::{
    DistanceMethod, FunctionType, NormalizeMethod, Solver, SolverMode, TwistAxis,
};

/// Output rows per joint in a joint-group matrix: location, rotation, and
/// scale XYZ triples.
pub const JOINT_ATTR_STRIDE: u16 = 9;

/// Attribute offset of the first location component.
pub const ATTR_LOCATION: u16 = 0;
/// Attribute offset of the first rotation component.
pub const ATTR_ROTATION: u16 = 3;
/// Attribute offset of the first scale component.
pub const ATTR_SCALE: u16 = 6;

/// Row key for one joint attribute within a joint-group matrix.
#[inline]
pub fn output_row_index(joint_index: u16, attribute_offset: u16) -> u16 {
    joint_index * JOINT_ATTR_STRIDE + attribute_offset
}

#[derive(Debug, Error)]
pub enum DnaError {
    #[error("DNA file not found: {path}")]
    FileNotFound { path: String },

    #[error("DNA io error: {0}")]
    Io(String),

    #[error("malformed DNA record: {0}")]
    MalformedRecord(String),

    #[error("{what} index {index} out of range (count: {count})")]
    OutOfRange {
        what: &'static str,
        index: u16,
        count: u16,
    },
}

/// One joint group from the behavior section: a sparse, column-indexed matrix
/// of driven-joint output values.
///
/// `values` is row-major with `output_indices.len()` rows and
/// `input_indices.len()` columns. Each row is keyed by an output index
/// (`joint_index * 9 + attribute_offset`); each column by the raw control
/// index of the pose that produces it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct JointGroup {
    pub joint_indices: Vec<u16>,
    pub input_indices: Vec<u16>,
    pub output_indices: Vec<u16>,
    pub values: Vec<f32>,
}

impl JointGroup {
    #[inline]
    pub fn row_count(&self) -> usize {
        self.output_indices.len()
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.input_indices.len()
    }

    /// Locate a column by the control index it is keyed on (by value, never
    /// by position).
    pub fn column_of_control(&self, control_index: u16) -> Option<usize> {
        self.input_indices.iter().position(|&c| c == control_index)
    }

    /// Locate a row by output index.
    pub fn row_of_output(&self, output_index: u16) -> Option<usize> {
        self.output_indices.iter().position(|&o| o == output_index)
    }

    #[inline]
    pub fn value_at(&self, row: usize, column: usize) -> f32 {
        self.values[row * self.column_count() + column]
    }

    pub fn set_value(&mut self, row: usize, column: usize, value: f32) {
        let cols = self.column_count();
        self.values[row * cols + column] = value;
    }

    /// Append a zero-filled column keyed by `control_index`, returning its
    /// position.
    pub fn push_column(&mut self, control_index: u16) -> usize {
        let old_cols = self.column_count();
        let rows = self.row_count();
        let mut values = Vec::with_capacity(rows * (old_cols + 1));
        for row in 0..rows {
            values.extend_from_slice(&self.values[row * old_cols..(row + 1) * old_cols]);
            values.push(0.0);
        }
        self.values = values;
        self.input_indices.push(control_index);
        old_cols
    }

    /// Append a zero-filled row keyed by `output_index`, returning its
    /// position.
    pub fn push_row(&mut self, output_index: u16) -> usize {
        let row = self.row_count();
        self.output_indices.push(output_index);
        self.values.extend(std::iter::repeat(0.0).take(self.column_count()));
        row
    }

    /// Ensure a column exists for `control_index`, appending one if absent.
    pub fn ensure_column(&mut self, control_index: u16) -> usize {
        match self.column_of_control(control_index) {
            Some(col) => col,
            None => self.push_column(control_index),
        }
    }

    /// Ensure a row exists for `output_index`, appending one if absent.
    pub fn ensure_row(&mut self, output_index: u16) -> usize {
        match self.row_of_output(output_index) {
            Some(row) => row,
            None => self.push_row(output_index),
        }
    }
}

/// One pose in the container's RBF pose table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PoseTableEntry {
    pub name: String,
    pub scale: f32,
    /// Raw control index keying this pose's joint-group matrix column.
    pub control_index: u16,
    pub driver_joint_index: Option<u16>,
    /// Driver calibration value (w, x, y, z).
    pub driver_value: [f32; 4],
    /// Scalar outputs (shape key / mask channels) driven by this pose.
    pub output_control_indices: Vec<u16>,
    pub output_control_weights: Vec<f32>,
}

/// One solver in the container's RBF solver table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SolverTableEntry {
    pub name: String,
    pub mode: SolverMode,
    pub radius: f32,
    pub weight_threshold: f32,
    pub distance_method: DistanceMethod,
    pub normalize_method: NormalizeMethod,
    pub function_type: FunctionType,
    pub twist_axis: TwistAxis,
    pub automatic_radius: bool,
    /// Positions into the pose table of the poses belonging to this solver.
    pub pose_positions: Vec<u16>,
}

/// Read handle over an opened DNA file.
pub trait DnaReader {
    fn joint_count(&self) -> u16;
    fn joint_name(&self, joint_index: u16) -> Option<String>;

    /// Reverse lookup; the default implementation scans the joint table.
    fn joint_index(&self, name: &str) -> Option<u16> {
        (0..self.joint_count()).find(|&i| self.joint_name(i).as_deref() == Some(name))
    }

    fn blend_shape_channel_count(&self) -> u16;
    fn blend_shape_channel_name(&self, channel_index: u16) -> Option<String>;

    fn raw_control_count(&self) -> u16;

    fn rbf_solver_count(&self) -> u16;
    fn rbf_pose_count(&self) -> u16;
    fn rbf_pose_name(&self, pose_index: u16) -> Option<String>;
    fn rbf_pose_scale(&self, pose_index: u16) -> Option<f32>;
    fn rbf_pose_control_index(&self, pose_index: u16) -> Option<u16>;

    /// The full solver graph reconstructed from the RBF sections.
    fn rbf_solvers(&self) -> Vec<Solver>;

    fn joint_group_count(&self) -> u16;
    fn joint_group(&self, group_index: u16) -> Option<JointGroup>;
}

/// Write handle over an opened DNA file. Mutations are staged until `save`;
/// whether `save` is transactional (replace-on-write) is codec-defined and
/// must not be assumed by callers.
pub trait DnaWriter {
    fn set_raw_control_count(&mut self, count: u16);

    /// Replace the RBF pose table.
    fn set_rbf_pose_table(&mut self, poses: &[PoseTableEntry]);

    /// Replace the RBF solver table.
    fn set_rbf_solver_table(&mut self, solvers: &[SolverTableEntry]);

    /// Append an empty joint group, returning its index.
    fn create_joint_group(&mut self) -> u16;

    fn set_joint_group(&mut self, group_index: u16, group: &JointGroup) -> Result<(), DnaError>;

    fn save(&mut self) -> Result<(), DnaError>;
}

/// Factory over reader/writer handles for a DNA file path.
pub trait DnaCodec {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn DnaReader>, DnaError>;
    fn open_writer(&self, path: &Path) -> Result<Box<dyn DnaWriter>, DnaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_2x2() -> JointGroup {
        JointGroup {
            joint_indices: vec![4, 7],
            input_indices: vec![10, 11],
            output_indices: vec![36, 37],
            values: vec![1.0, 2.0, 3.0, 4.0],
        }
    }

    #[test]
    fn locates_columns_by_control_index_not_position() {
        let g = group_2x2();
        assert_eq!(g.column_of_control(11), Some(1));
        assert_eq!(g.column_of_control(10), Some(0));
        assert_eq!(g.column_of_control(12), None);
    }

    #[test]
    fn push_column_preserves_existing_cells() {
        let mut g = group_2x2();
        let col = g.push_column(12);
        assert_eq!(col, 2);
        assert_eq!(g.column_count(), 3);
        assert_eq!(g.value_at(0, 0), 1.0);
        assert_eq!(g.value_at(0, 1), 2.0);
        assert_eq!(g.value_at(0, 2), 0.0);
        assert_eq!(g.value_at(1, 0), 3.0);
        assert_eq!(g.value_at(1, 1), 4.0);
        assert_eq!(g.value_at(1, 2), 0.0);
    }

    #[test]
    fn push_row_appends_zeroes() {
        let mut g = group_2x2();
        let row = g.push_row(38);
        assert_eq!(row, 2);
        assert_eq!(g.value_at(2, 0), 0.0);
        assert_eq!(g.value_at(2, 1), 0.0);
    }

    #[test]
    fn output_rows_follow_the_nine_attribute_stride() {
        assert_eq!(output_row_index(0, ATTR_LOCATION), 0);
        assert_eq!(output_row_index(4, ATTR_LOCATION), 36);
        assert_eq!(output_row_index(4, ATTR_ROTATION), 39);
        assert_eq!(output_row_index(4, ATTR_SCALE), 42);
    }
}

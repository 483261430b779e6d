//! Editor configuration.

use serde::{Deserialize, Serialize};

/// Tunables for change detection and summary rendering. Defaults match the
/// calibration thresholds the rig tooling has always shipped with; tests
/// depend on these magnitudes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Minimum transform delta (vector distance, or driver rotation angle in
    /// radians) that counts as a significant change.
    pub bone_delta_threshold: f32,
    /// Maximum lines rendered by change summaries before truncation.
    pub summary_max_lines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bone_delta_threshold: 1e-3,
            summary_max_lines: 5,
        }
    }
}

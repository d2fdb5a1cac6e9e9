//! Pipeline stages and their progress bands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stage of the generation pipeline.
///
/// The five working stages always run in [`GenerationStage::PIPELINE`]
/// order. `Complete`, `Error` and `Cancelled` are terminal markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    /// Layout grid generation.
    Grid,
    /// Per-unit dispatch to the external render service.
    ExternalRender,
    /// Per-unit promotion of rendered artifacts.
    Promotion,
    /// Quality scoring of all promoted artifacts.
    QualityAnalysis,
    /// Final export of the project.
    Export,
    /// All stages succeeded.
    Complete,
    /// The run aborted on a failure.
    Error,
    /// The run was cancelled.
    Cancelled,
}

impl GenerationStage {
    /// The fixed execution order of the working stages.
    pub const PIPELINE: [Self; 5] = [
        Self::Grid,
        Self::ExternalRender,
        Self::Promotion,
        Self::QualityAnalysis,
        Self::Export,
    ];

    /// Returns the `(start, end)` percentage band owned by this stage.
    ///
    /// Bands are disjoint and together cover 0..=100. Terminal markers have
    /// no band.
    #[must_use]
    pub fn progress_band(&self) -> Option<(f64, f64)> {
        match self {
            Self::Grid => Some((0.0, 20.0)),
            Self::ExternalRender => Some((20.0, 60.0)),
            Self::Promotion => Some((60.0, 75.0)),
            Self::QualityAnalysis => Some((75.0, 90.0)),
            Self::Export => Some((90.0, 100.0)),
            Self::Complete | Self::Error | Self::Cancelled => None,
        }
    }

    /// Returns true for `Complete`, `Error` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    /// Returns true if the stage processes units one at a time.
    #[must_use]
    pub fn is_per_unit(&self) -> bool {
        matches!(self, Self::ExternalRender | Self::Promotion)
    }

    /// Returns the snake_case name used in logs and persisted records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::ExternalRender => "external_render",
            Self::Promotion => "promotion",
            Self::QualityAnalysis => "quality_analysis",
            Self::Export => "export",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

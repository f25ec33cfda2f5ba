//! Error types for sampling and estimation.

use thiserror::Error;

use crate::eigen::EigenError;
use talus_spatial::SpatialError;

/// Errors from surface sampling and the estimation pipeline.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The mesh has no triangles or zero total surface area.
    #[error("mesh has no sampleable surface area")]
    DegenerateMesh,

    /// A configured neighbourhood size exceeds the cloud size.
    #[error(transparent)]
    Spatial(#[from] SpatialError),

    /// PCA eigendecomposition failed to converge.
    #[error(transparent)]
    Eigen(#[from] EigenError),

    /// Density weights sum to zero, so hypotheses cannot be drawn.
    #[error("point {index} has an all-zero density neighbourhood")]
    DegenerateDensities {
        /// Index of the point whose neighbourhood failed.
        index: usize,
    },

    /// The sample rate selected zero points for estimation.
    #[error("sample rate selected zero points")]
    EmptySelection,

    /// Every drawn point triple was colinear within the retry budget.
    #[error("point {index} has a degenerate (colinear) neighbourhood")]
    DegenerateNeighbourhood {
        /// Index of the point whose neighbourhood failed.
        index: usize,
    },

    /// Failed to write a diagnostic histogram image.
    #[error("failed to export histogram: {0}")]
    Export(#[from] image::ImageError),

    /// Failed to create the export directory.
    #[error("failed to create export directory: {0}")]
    Io(#[from] std::io::Error),
}

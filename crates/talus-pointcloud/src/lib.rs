//! Point-cloud surface sampling and normal/roughness estimation.
//!
//! This crate turns a textured triangle mesh into a noisy scanned point
//! cloud and then recovers per-point surface normals and roughness from
//! that cloud alone, using density-weighted plane hypotheses voted into
//! per-scale Hough histograms:
//!
//! - [`sample_surface`] - area-weighted surface sampling with scan noise
//! - [`eigen_symmetric`] - symmetric 3x3 eigendecomposition for PCA frames
//! - [`compute_hough_stack`] - multi-scale Hough accumulation per point
//! - [`estimate_normal`] / [`estimate_roughness`] - max-bin estimators
//! - [`generate_training_data`] - the full seeded, parallel pipeline
//!
//! # Example
//!
//! ```
//! use talus_mesh::primitives;
//! use talus_pointcloud::{GenerateConfig, HoughConfig, SurfaceMaps, generate_training_data};
//!
//! let mesh = primitives::plane(1.0, 8);
//! let config = GenerateConfig {
//!     point_count: 1500,
//!     sample_rate: 0.05,
//!     hough: HoughConfig {
//!         scales: vec![10, 20, 40],
//!         hypotheses: 100,
//!     },
//!     ..GenerateConfig::default()
//! };
//!
//! let (dataset, report) = generate_training_data(&mesh, &SurfaceMaps::default(), &config).unwrap();
//! assert_eq!(dataset.positions.len(), report.estimated_count);
//! ```

mod error;
mod export;
mod hough;
mod pipeline;
mod sample;

pub mod eigen;

pub use error::CloudError;
pub use export::write_histograms;
pub use hough::{
    HOUGH_SIZE, HoughConfig, HoughStack, calibrate_roughness, compute_hough_stack,
    estimate_normal, estimate_roughness,
};
pub use pipeline::{
    DENSITY_K, GenerateConfig, GenerateReport, PointCloudDataset, generate_training_data,
};
pub use sample::{SurfaceMaps, SurfacePoint, sample_surface};

pub use eigen::eigen_symmetric;

//! The end-to-end training-data pipeline.
//!
//! Sampling, neighbourhood queries, Hough accumulation and estimation are
//! chained into one seeded run. All parallel phases operate on disjoint
//! output slices with per-worker query scratch, and every random stream is
//! derived from the configured seed per work item, so a run's output is
//! bit-identical for any thread count.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::CloudError;
use crate::export::write_histograms;
use crate::hough::{
    HoughConfig, calibrate_roughness, compute_hough_stack, estimate_normal, estimate_roughness,
};
use crate::sample::{SurfaceMaps, sample_surface};
use talus_mesh::Mesh;
use talus_spatial::{KdTree, QueryCache};

/// Neighbourhood size for the density weight: squared distance to this
/// neighbour.
pub const DENSITY_K: usize = 5;

// Phase tags keep the derived seed streams disjoint.
const PHASE_SAMPLE: u64 = 1;
const PHASE_SELECT: u64 = 2;
const PHASE_HOUGH: u64 = 3;

/// splitmix64 finalizer over a seed and a stream index.
///
/// Gives every work item its own well-mixed RNG seed, decoupling results
/// from scheduling.
fn mix_seed(seed: u64, index: u64) -> u64 {
    let mut z = seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Configuration for a full generation run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GenerateConfig {
    /// Points to sample from the mesh surface.
    pub point_count: usize,
    /// Scan noise sigma; the along-normal component uses four times this.
    pub noise_sigma: f32,
    /// Fraction of sampled points that get normals estimated.
    pub sample_rate: f32,
    /// Master seed; all random streams derive from it.
    pub seed: u64,
    /// Hough accumulation parameters.
    pub hough: HoughConfig,
    /// KD-tree leaf size.
    pub max_points_per_leaf: usize,
    /// When set, write per-point histogram PNGs into this directory.
    pub write_histograms: Option<PathBuf>,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            point_count: 10_000,
            noise_sigma: 0.01,
            sample_rate: 1.0,
            seed: 0,
            hough: HoughConfig::default(),
            max_points_per_leaf: 512,
            write_histograms: None,
        }
    }
}

/// The estimated point cloud, ready for visualization.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointCloudDataset {
    /// True (noisy) point positions of the estimated subset.
    pub positions: Vec<Vec3>,
    /// Estimated normals.
    pub normals: Vec<Vec3>,
    /// Albedo RGB with calibrated roughness in the alpha channel.
    pub colors: Vec<[u8; 4]>,
    /// Uniform scale applied on playback.
    pub scale: f32,
    /// Cloud-space offset.
    pub offset: Vec3,
    /// Rotation pivot.
    pub pivot: Vec3,
}

/// Accuracy and timing summary of a generation run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GenerateReport {
    /// Points sampled from the surface.
    pub cloud_count: usize,
    /// Points that got normals estimated.
    pub estimated_count: usize,
    /// Root-mean-square angular error against ground truth, in degrees.
    pub rms_degrees: f32,
    /// Fraction of estimates within 8 degrees of ground truth.
    pub pgp: f32,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

/// Runs the full pipeline: sample a noisy cloud from `mesh`, estimate
/// normals and roughness for a subset of it, and measure the estimates
/// against ground truth.
///
/// Fails before any heavy phase when the largest Hough scale exceeds the
/// point count.
pub fn generate_training_data(
    mesh: &Mesh,
    maps: &SurfaceMaps,
    config: &GenerateConfig,
) -> Result<(PointCloudDataset, GenerateReport), CloudError> {
    let start = Instant::now();
    let k_max = config.hough.max_scale();

    // Phase 1: surface sampling.
    let mut rng = StdRng::seed_from_u64(mix_seed(config.seed, PHASE_SAMPLE));
    let points = sample_surface(mesh, maps, config.point_count, config.noise_sigma, &mut rng)?;

    // Phase 2: pick the estimation subset.
    let mut rng = StdRng::seed_from_u64(mix_seed(config.seed, PHASE_SELECT));
    let selected: Vec<usize> = (0..points.len())
        .filter(|_| rng.random::<f32>() <= config.sample_rate)
        .collect();
    if selected.is_empty() {
        return Err(CloudError::EmptySelection);
    }

    // Phase 3: index the whole cloud.
    let positions: Vec<Vec3> = points.iter().map(|p| p.position).collect();
    let tree = KdTree::build(positions, config.max_points_per_leaf)?;

    // Validate neighbourhood sizes now so per-worker caches cannot fail.
    QueryCache::new(&tree, k_max)?;
    QueryCache::new(&tree, DENSITY_K)?;

    let sampled_positions: Vec<Vec3> = selected.iter().map(|&i| points[i].position).collect();
    let sampled_normals: Vec<Vec3> = selected.iter().map(|&i| points[i].normal).collect();

    // Phase 4: neighbour lists for the subset, at the largest scale. The
    // lists are distance-ordered, so every smaller scale is a prefix.
    let mut neighbours = vec![0u32; selected.len() * k_max];
    neighbours
        .par_chunks_mut(k_max)
        .zip(sampled_positions.par_iter())
        .for_each_init(
            || QueryCache::new(&tree, k_max).expect("neighbourhood size validated"),
            |cache, (out, &pos)| tree.k_nearest_into(pos, cache, out),
        );

    // Phase 5: density weight for every point in the cloud.
    let mut densities = vec![0.0f32; tree.len()];
    densities
        .par_iter_mut()
        .zip(tree.points().par_iter())
        .for_each_init(
            || QueryCache::new(&tree, DENSITY_K).expect("neighbourhood size validated"),
            |cache, (density, &pos)| {
                let last = tree.k_nearest_last(pos, cache);
                *density = pos.distance_squared(tree.points()[last as usize]);
            },
        );

    // Phase 6: Hough accumulation, one derived RNG stream per point.
    let hough_seed = mix_seed(config.seed, PHASE_HOUGH);
    let stacks = selected
        .par_iter()
        .enumerate()
        .map(|(i, &point_index)| {
            let mut rng = StdRng::seed_from_u64(mix_seed(hough_seed, i as u64));
            compute_hough_stack(
                tree.points(),
                &densities,
                &neighbours[i * k_max..(i + 1) * k_max],
                sampled_normals[i],
                point_index,
                &config.hough,
                &mut rng,
            )
        })
        .collect::<Result<Vec<_>, CloudError>>()?;

    // Phase 7: estimation and roughness calibration against the cloud's
    // ground-truth smoothness range.
    let estimated_normals: Vec<Vec3> = stacks
        .par_iter()
        .zip(sampled_normals.par_iter())
        .map(|(stack, &truth)| estimate_normal(stack, truth))
        .collect();

    let mut roughness: Vec<f32> = stacks.par_iter().map(estimate_roughness).collect();
    let mut smoothness_lo = f32::INFINITY;
    let mut smoothness_hi = f32::NEG_INFINITY;
    for p in &points {
        smoothness_lo = smoothness_lo.min(p.smoothness);
        smoothness_hi = smoothness_hi.max(p.smoothness);
    }
    calibrate_roughness(&mut roughness, (smoothness_lo, smoothness_hi));

    // Phase 8: measure against ground truth.
    let mut square_sum = 0.0f64;
    let mut good = 0usize;
    for (est, truth) in estimated_normals.iter().zip(sampled_normals.iter()) {
        let angle = est.dot(*truth).clamp(-1.0, 1.0).acos().to_degrees();
        square_sum += f64::from(angle * angle);
        if angle < 8.0 {
            good += 1;
        }
    }
    let rms_degrees = (square_sum / selected.len() as f64).sqrt() as f32;
    let pgp = good as f32 / selected.len() as f32;

    // Phase 9: optional histogram export.
    if let Some(dir) = &config.write_histograms {
        let sampled_smoothness: Vec<f32> = selected.iter().map(|&i| points[i].smoothness).collect();
        write_histograms(dir, &stacks, &sampled_normals, &sampled_smoothness)?;
    }

    // Phase 10: package the cloud, roughness riding in the alpha channel.
    let colors: Vec<[u8; 4]> = selected
        .iter()
        .zip(roughness.iter())
        .map(|(&i, &r)| {
            let mut c = points[i].albedo;
            c[3] = (r.clamp(0.0, 1.0) * 255.0) as u8;
            c
        })
        .collect();

    let elapsed = start.elapsed();
    let report = GenerateReport {
        cloud_count: points.len(),
        estimated_count: selected.len(),
        rms_degrees,
        pgp,
        elapsed,
    };
    log::info!(
        "estimated {} of {} points in {:.1?}: rms {:.2} deg, pgp {:.3}",
        report.estimated_count,
        report.cloud_count,
        report.elapsed,
        report.rms_degrees,
        report.pgp,
    );

    let dataset = PointCloudDataset {
        positions: sampled_positions,
        normals: estimated_normals,
        colors,
        scale: 1.0,
        offset: Vec3::ZERO,
        pivot: Vec3::ZERO,
    };

    Ok((dataset, report))
}

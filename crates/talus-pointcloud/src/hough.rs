//! Hough-space accumulation and max-bin estimation.
//!
//! For each query point, random density-weighted triples of neighbours
//! hypothesize tangent planes. Each hypothesis normal, expressed in a local
//! PCA frame, votes into a 2D histogram; one histogram per neighbourhood
//! scale. The histogram stack is the feature from which normals and
//! roughness are read back.

use glam::{Mat3, Vec2, Vec3};
use rand::Rng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::CloudError;
use crate::eigen::eigen_symmetric;

/// Histogram side length. Odd, so cardinal directions land on exact bins.
pub const HOUGH_SIZE: usize = 33;

/// Attempts allowed per accepted hypothesis before a neighbourhood is
/// declared degenerate.
const RETRY_FACTOR: usize = 16;

/// Configuration for Hough accumulation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HoughConfig {
    /// Neighbourhood sizes, ascending. Each gets its own histogram layer.
    pub scales: Vec<usize>,
    /// Plane hypotheses drawn per histogram layer.
    pub hypotheses: usize,
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            scales: vec![25, 50, 100, 200, 400],
            hypotheses: 1000,
        }
    }
}

impl HoughConfig {
    /// The scale used to build the PCA frame: the middle one.
    pub fn basis_scale_index(&self) -> usize {
        self.scales.len() / 2
    }

    /// The largest configured neighbourhood.
    pub fn max_scale(&self) -> usize {
        self.scales.last().copied().unwrap_or(0)
    }
}

/// Per-point stack of Hough histograms, one `HOUGH_SIZE`-squared layer per
/// scale, plus the two PCA frames the votes were expressed in.
///
/// Counts saturate at 255; with hypothesis counts well under `255 * M * M`
/// saturation is rare and harmless.
#[derive(Debug, Clone, PartialEq)]
pub struct HoughStack {
    counts: Box<[u8]>,
    /// World-to-PCA rotation from the positional covariance (rows are
    /// eigenvectors, descending eigenvalue order).
    pub normals_basis: Mat3,
    /// Extra in-plane rotation from the 2D hypothesis covariance.
    pub tex_basis: Mat3,
}

impl HoughStack {
    fn new(levels: usize) -> Self {
        Self {
            counts: vec![0; HOUGH_SIZE * HOUGH_SIZE * levels].into_boxed_slice(),
            normals_basis: Mat3::IDENTITY,
            tex_basis: Mat3::IDENTITY,
        }
    }

    /// Number of scale layers.
    pub fn levels(&self) -> usize {
        self.counts.len() / (HOUGH_SIZE * HOUGH_SIZE)
    }

    /// One scale's histogram, row-major `HOUGH_SIZE * HOUGH_SIZE`.
    pub fn layer(&self, level: usize) -> &[u8] {
        let size = HOUGH_SIZE * HOUGH_SIZE;
        &self.counts[level * size..(level + 1) * size]
    }

    /// A layer remapped to [0, 1] against its own maximum count.
    pub fn scaled_layer(&self, level: usize) -> Vec<f32> {
        let layer = self.layer(level);
        let max = layer.iter().copied().max().unwrap_or(0) as f32;
        if max == 0.0 {
            return vec![0.0; layer.len()];
        }
        layer.iter().map(|&c| c as f32 / max).collect()
    }

    fn vote(&mut self, level: usize, x: usize, y: usize) {
        let index = level * HOUGH_SIZE * HOUGH_SIZE + y * HOUGH_SIZE + x;
        self.counts[index] = self.counts[index].saturating_add(1);
    }

    /// Projects a world-space direction into this stack's 2D Hough space.
    pub fn to_hough_space(&self, direction: Vec3) -> Vec2 {
        let local = self.tex_basis * (self.normals_basis * direction);
        Vec2::new(local.x, local.y)
    }
}

/// Draws an index in `[0, k)` with probability proportional to the density
/// weights, via binary search on the cumulative table. Callers validate up
/// front that every used prefix carries positive mass.
fn pick_weighted(cumulative: &[f32], k: usize, rng: &mut impl Rng) -> usize {
    let max_val = cumulative[k - 1];
    debug_assert!(max_val > 0.0, "zero-mass cumulative prefix");
    let value = rng.random_range(0.0..max_val);
    cumulative[..k].partition_point(|&c| c < value).min(k - 1)
}

/// Hypothesis normal from three neighbour positions. `None` when the
/// points are colinear and the cross product vanishes.
fn plane_normal(p0: Vec3, p1: Vec3, p2: Vec3) -> Option<Vec3> {
    let normal = (p2 - p0).cross(p1 - p0);
    if normal.length_squared() < f32::MIN_POSITIVE {
        return None;
    }
    Some(normal.normalize())
}

/// Covariance of the first `k` neighbour positions, normalized by `k`.
fn neighbourhood_covariance(positions: &[Vec3], neighbours: &[u32], k: usize) -> Mat3 {
    let mut mean = Vec3::ZERO;
    for &n in &neighbours[..k] {
        mean += positions[n as usize];
    }
    mean /= k as f32;

    let mut cov = [[0.0f32; 3]; 3];
    for &n in &neighbours[..k] {
        let d = positions[n as usize] - mean;
        for i in 0..3 {
            for j in 0..3 {
                cov[i][j] += d[i] * d[j];
            }
        }
    }
    for row in &mut cov {
        for v in row {
            *v /= k as f32;
        }
    }
    // Symmetric, so column-major and row-major coincide.
    Mat3::from_cols_array_2d(&cov)
}

/// Accumulates the multi-scale Hough histogram stack for one query point.
///
/// `neighbours` lists the query point's nearest neighbour indices in
/// ascending distance order and must cover the largest configured scale.
/// `densities` holds the per-point density weight (squared distance to the
/// K-th neighbour) for every point in the cloud. `true_normal` resolves the
/// orientation ambiguity of hypothesis normals.
pub fn compute_hough_stack<R: Rng>(
    positions: &[Vec3],
    densities: &[f32],
    neighbours: &[u32],
    true_normal: Vec3,
    point_index: usize,
    config: &HoughConfig,
    rng: &mut R,
) -> Result<HoughStack, CloudError> {
    let k_max = config.max_scale();
    assert!(k_max > 0 && neighbours.len() >= k_max, "neighbour list too short");

    let mut stack = HoughStack::new(config.scales.len());

    // PCA frame from the middle scale's covariance. The smallest-eigenvalue
    // axis approximates the surface normal, so hypothesis normals cluster
    // around the frame's z axis and their xy spread carries the signal.
    let k_basis = config.scales[config.basis_scale_index()];
    let covariance = neighbourhood_covariance(positions, neighbours, k_basis);
    let (normals_basis, _) = eigen_symmetric(covariance)?;
    stack.normals_basis = normals_basis;

    // Cumulative density table over the full neighbourhood; prefixes of it
    // serve the smaller scales.
    let mut total_density = 0.0f32;
    let cumulative: Vec<f32> = neighbours[..k_max]
        .iter()
        .map(|&n| {
            total_density += densities[n as usize];
            total_density
        })
        .collect();
    // Densities are nonnegative, so the table is nondecreasing and the
    // smallest scale's prefix is the binding mass check.
    let k_min = config.scales.iter().copied().min().unwrap_or(k_max);
    if cumulative[k_min - 1] <= 0.0 {
        return Err(CloudError::DegenerateDensities { index: point_index });
    }

    let draw_hypothesis = |k: usize, rng: &mut R| -> Option<Vec3> {
        let n0 = neighbours[pick_weighted(&cumulative, k, rng)] as usize;
        let n1 = neighbours[pick_weighted(&cumulative, k, rng)] as usize;
        let n2 = neighbours[pick_weighted(&cumulative, k, rng)] as usize;

        let mut normal = plane_normal(positions[n0], positions[n1], positions[n2])?;
        if true_normal.dot(normal) < 0.0 {
            normal = -normal;
        }
        Some(normal)
    };

    // First pass: hypotheses at the basis scale, projected into the PCA
    // frame, to find the in-plane orientation of the vote distribution.
    let budget = config.hypotheses * RETRY_FACTOR;
    let mut hough_normals = Vec::with_capacity(config.hypotheses);
    let mut attempts = 0;
    while hough_normals.len() < config.hypotheses {
        attempts += 1;
        if attempts > budget {
            return Err(CloudError::DegenerateNeighbourhood { index: point_index });
        }
        if let Some(normal) = draw_hypothesis(k_basis, rng) {
            let local = normals_basis * normal;
            hough_normals.push(Vec2::new(local.x, local.y));
        }
    }

    // 2D PCA over the projected hypotheses. Pinning the zz entry to the
    // smallest positive float keeps z as the smallest eigenvalue, so the
    // resulting rotation only turns the xy plane.
    let mean: Vec2 = hough_normals.iter().sum::<Vec2>() / config.hypotheses as f32;
    let mut cxx = 0.0f32;
    let mut cxy = 0.0f32;
    let mut cyy = 0.0f32;
    for h in &hough_normals {
        let d = *h - mean;
        cxx += d.x * d.x;
        cxy += d.x * d.y;
        cyy += d.y * d.y;
    }
    let n = config.hypotheses as f32;
    let tex_cov = Mat3::from_cols(
        Vec3::new(cxx / n, cxy / n, 0.0),
        Vec3::new(cxy / n, cyy / n, 0.0),
        Vec3::new(0.0, 0.0, f32::MIN_POSITIVE),
    );
    let (tex_basis, _) = eigen_symmetric(tex_cov)?;
    stack.tex_basis = tex_basis;

    // Voting passes: one layer per scale, fresh hypotheses each.
    for (level, &k) in config.scales.iter().enumerate() {
        let mut completed = 0;
        let mut attempts = 0;
        while completed < config.hypotheses {
            attempts += 1;
            if attempts > budget {
                return Err(CloudError::DegenerateNeighbourhood { index: point_index });
            }
            let Some(normal) = draw_hypothesis(k, rng) else {
                continue;
            };
            completed += 1;

            let local = tex_basis * (normals_basis * normal);
            let uv = (Vec2::new(local.x, local.y) + 1.0) / 2.0;

            // floor() hits HOUGH_SIZE exactly at uv == 1, hence the clamp.
            let bx = ((uv.x * HOUGH_SIZE as f32).floor() as isize)
                .clamp(0, HOUGH_SIZE as isize - 1) as usize;
            let by = ((uv.y * HOUGH_SIZE as f32).floor() as isize)
                .clamp(0, HOUGH_SIZE as isize - 1) as usize;
            stack.vote(level, bx, by);
        }
    }

    Ok(stack)
}

/// Lifts a 2D max-bin prediction back to a world-space unit normal.
fn normal_from_prediction(
    prediction: Vec2,
    normals_basis: Mat3,
    tex_basis: Mat3,
    true_normal: Vec3,
) -> Vec3 {
    let z = (1.0 - prediction.length_squared()).clamp(0.0, 1.0).sqrt();
    let mut normal = Vec3::new(prediction.x, prediction.y, z).normalize();

    // The histogram is sign-blind in z; take the hemisphere agreeing with
    // the reference normal expressed in the same frame.
    let reference = tex_basis * (normals_basis * true_normal);
    if normal.dot(reference) < 0.0 {
        normal.z = -normal.z;
    }

    // Both bases are rotations; transposes invert them.
    normals_basis.transpose() * (tex_basis.transpose() * normal)
}

/// Estimates a world-space normal from a histogram stack.
///
/// Each scale contributes the direction of its fullest bin; the per-scale
/// normals are summed and the sum normalized, averaging out scales that
/// disagree.
pub fn estimate_normal(stack: &HoughStack, true_normal: Vec3) -> Vec3 {
    let mut sum = Vec3::ZERO;

    for level in 0..stack.levels() {
        let layer = stack.layer(level);

        let mut max_bin = (0usize, 0usize);
        let mut max_count = 0u8;
        for y in 0..HOUGH_SIZE {
            for x in 0..HOUGH_SIZE {
                let count = layer[y * HOUGH_SIZE + x];
                if count > max_count {
                    max_count = count;
                    max_bin = (x, y);
                }
            }
        }

        // Dividing by M-1 undoes the floor() bias of vote encoding, so an
        // exactly-centered vote decodes to exactly (0, 0).
        let uv = Vec2::new(max_bin.0 as f32, max_bin.1 as f32) / (HOUGH_SIZE as f32 - 1.0);
        let prediction = uv * 2.0 - 1.0;

        sum += normal_from_prediction(prediction, stack.normals_basis, stack.tex_basis, true_normal);
    }

    sum.normalize()
}

/// Estimates raw roughness as the mean over scales of the determinant of
/// each layer's mass covariance.
///
/// A tight vote cluster (flat, clean surface) has a near-zero determinant;
/// scattered votes (rough or noisy surface) a large one. The value is on an
/// arbitrary scale; see [`calibrate_roughness`].
pub fn estimate_roughness(stack: &HoughStack) -> f32 {
    let mut sum = 0.0f32;

    for level in 0..stack.levels() {
        let layer = stack.layer(level);

        let mut total = 0.0f32;
        let mut mean = Vec2::ZERO;
        for y in 0..HOUGH_SIZE {
            for x in 0..HOUGH_SIZE {
                let count = layer[y * HOUGH_SIZE + x] as f32;
                let pos = Vec2::new(x as f32, y as f32) / HOUGH_SIZE as f32;
                total += count;
                mean += count * pos;
            }
        }
        if total == 0.0 {
            continue;
        }
        mean /= total;

        let mut cxx = 0.0f32;
        let mut cxy = 0.0f32;
        let mut cyy = 0.0f32;
        for y in 0..HOUGH_SIZE {
            for x in 0..HOUGH_SIZE {
                let count = layer[y * HOUGH_SIZE + x] as f32;
                let d = Vec2::new(x as f32, y as f32) / HOUGH_SIZE as f32 - mean;
                cxx += count * d.x * d.x;
                cxy += count * d.x * d.y;
                cyy += count * d.y * d.y;
            }
        }
        cxx = cxx.clamp(0.0, 1e6);
        cxy = cxy.clamp(0.0, 1e6);
        cyy = cyy.clamp(0.0, 1e6);

        sum += cxx * cyy - cxy * cxy;
    }

    sum / stack.levels() as f32
}

/// Remaps raw roughness determinants onto an empirical smoothness range.
///
/// The raw scale is arbitrary, so values are min-max normalized over the
/// batch and mapped *inverted* onto `smoothness_range`: the most dispersed
/// histogram gets the low end, the tightest the high end.
pub fn calibrate_roughness(values: &mut [f32], smoothness_range: (f32, f32)) {
    let Some(&first) = values.first() else {
        return;
    };
    let (mut lo, mut hi) = (first, first);
    for &v in values.iter() {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    let span = hi - lo;

    for v in values.iter_mut() {
        let t = if span > 0.0 { 1.0 - (*v - lo) / span } else { 0.5 };
        *v = smoothness_range.0 + (smoothness_range.1 - smoothness_range.0) * t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// A jittered grid of points on the z = 0 plane, with index 0 at the
    /// center, plus uniform densities and a distance-ordered neighbour list.
    fn planar_neighbourhood(count: usize, jitter: f32, seed: u64) -> (Vec<Vec3>, Vec<f32>, Vec<u32>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let side = (count as f32).sqrt().ceil() as i32;
        let mut positions = vec![Vec3::ZERO];
        let mut rand_offset = |rng: &mut StdRng| {
            if jitter > 0.0 {
                rng.random_range(-jitter..jitter)
            } else {
                0.0
            }
        };
        for i in 0..side {
            for j in 0..side {
                if positions.len() > count {
                    break;
                }
                let p = Vec3::new(
                    i as f32 * 0.1 - side as f32 * 0.05 + rand_offset(&mut rng),
                    j as f32 * 0.1 - side as f32 * 0.05 + rand_offset(&mut rng),
                    rand_offset(&mut rng),
                );
                positions.push(p);
            }
        }

        let densities = vec![1.0; positions.len()];
        let mut neighbours: Vec<u32> = (0..positions.len() as u32).collect();
        neighbours.sort_by(|&a, &b| {
            positions[a as usize]
                .length_squared()
                .total_cmp(&positions[b as usize].length_squared())
        });
        (positions, densities, neighbours)
    }

    fn small_config() -> HoughConfig {
        HoughConfig {
            scales: vec![16, 32, 64],
            hypotheses: 400,
        }
    }

    #[test]
    fn test_stack_layout_and_voting() {
        let mut stack = HoughStack::new(3);
        assert_eq!(stack.levels(), 3);

        stack.vote(1, 5, 7);
        stack.vote(1, 5, 7);
        assert_eq!(stack.layer(1)[7 * HOUGH_SIZE + 5], 2);
        assert_eq!(stack.layer(0).iter().map(|&c| c as u32).sum::<u32>(), 0);
        assert_eq!(stack.layer(2).iter().map(|&c| c as u32).sum::<u32>(), 0);

        // Saturates instead of wrapping.
        for _ in 0..300 {
            stack.vote(0, 0, 0);
        }
        assert_eq!(stack.layer(0)[0], 255);
    }

    #[test]
    fn test_scaled_layer_normalizes_to_unit_max() {
        let mut stack = HoughStack::new(1);
        stack.vote(0, 1, 1);
        stack.vote(0, 1, 1);
        stack.vote(0, 2, 2);
        let scaled = stack.scaled_layer(0);
        assert_eq!(scaled[HOUGH_SIZE + 1], 1.0);
        assert_eq!(scaled[2 * HOUGH_SIZE + 2], 0.5);
    }

    #[test]
    fn test_pick_weighted_respects_cumulative_table() {
        let cumulative = [1.0, 1.0, 1.0, 5.0];
        let mut rng = StdRng::seed_from_u64(4);
        let mut hits = [0usize; 4];
        for _ in 0..10_000 {
            hits[pick_weighted(&cumulative, 4, &mut rng)] += 1;
        }
        // Entries 1 and 2 have zero incremental weight.
        assert_eq!(hits[1], 0);
        assert_eq!(hits[2], 0);
        // Entry 3 holds 4/5 of the mass.
        assert!((hits[3] as f32 / 10_000.0 - 0.8).abs() < 0.02);
    }

    #[test]
    fn test_flat_neighbourhood_recovers_plane_normal() {
        let (positions, densities, neighbours) = planar_neighbourhood(100, 0.0, 1);
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(42);

        let stack = compute_hough_stack(
            &positions,
            &densities,
            &neighbours,
            Vec3::Z,
            0,
            &config,
            &mut rng,
        )
        .unwrap();

        let normal = estimate_normal(&stack, Vec3::Z);
        let angle = normal.dot(Vec3::Z).clamp(-1.0, 1.0).acos().to_degrees();
        assert!(angle < 3.0, "estimated normal {angle} degrees off");
    }

    #[test]
    fn test_noisy_neighbourhood_is_rougher() {
        let config = small_config();

        let (positions, densities, neighbours) = planar_neighbourhood(100, 0.0, 1);
        let mut rng = StdRng::seed_from_u64(42);
        let flat = compute_hough_stack(
            &positions, &densities, &neighbours, Vec3::Z, 0, &config, &mut rng,
        )
        .unwrap();

        let (positions, densities, neighbours) = planar_neighbourhood(100, 0.04, 2);
        let mut rng = StdRng::seed_from_u64(42);
        let noisy = compute_hough_stack(
            &positions, &densities, &neighbours, Vec3::Z, 0, &config, &mut rng,
        )
        .unwrap();

        assert!(estimate_roughness(&noisy) > estimate_roughness(&flat));
    }

    #[test]
    fn test_same_seed_same_stack() {
        let (positions, densities, neighbours) = planar_neighbourhood(100, 0.02, 9);
        let config = small_config();

        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        let a = compute_hough_stack(
            &positions, &densities, &neighbours, Vec3::Z, 0, &config, &mut rng_a,
        )
        .unwrap();
        let b = compute_hough_stack(
            &positions, &densities, &neighbours, Vec3::Z, 0, &config, &mut rng_b,
        )
        .unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_colinear_neighbourhood_fails() {
        // All points on a line: every triple is colinear.
        let positions: Vec<Vec3> = (0..64).map(|i| Vec3::new(i as f32 * 0.1, 0.0, 0.0)).collect();
        let densities = vec![1.0; positions.len()];
        let neighbours: Vec<u32> = (0..64).collect();

        let config = HoughConfig {
            scales: vec![8, 16, 32],
            hypotheses: 50,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let result = compute_hough_stack(
            &positions, &densities, &neighbours, Vec3::Z, 5, &config, &mut rng,
        );
        assert!(matches!(
            result,
            Err(CloudError::DegenerateNeighbourhood { index: 5 })
        ));
    }

    #[test]
    fn test_zero_densities_fail() {
        let (positions, _, neighbours) = planar_neighbourhood(100, 0.0, 1);
        let densities = vec![0.0; positions.len()];
        let mut rng = StdRng::seed_from_u64(3);
        let result = compute_hough_stack(
            &positions,
            &densities,
            &neighbours,
            Vec3::Z,
            2,
            &small_config(),
            &mut rng,
        );
        assert!(matches!(
            result,
            Err(CloudError::DegenerateDensities { index: 2 })
        ));
    }

    #[test]
    fn test_zero_density_prefix_fails() {
        // The full neighbourhood carries mass, but the smallest scale's
        // prefix is all zeros, so no hypothesis can be drawn there.
        let (positions, mut densities, neighbours) = planar_neighbourhood(100, 0.0, 1);
        for &n in &neighbours[..16] {
            densities[n as usize] = 0.0;
        }

        let mut rng = StdRng::seed_from_u64(3);
        let result = compute_hough_stack(
            &positions,
            &densities,
            &neighbours,
            Vec3::Z,
            4,
            &small_config(),
            &mut rng,
        );
        assert!(matches!(
            result,
            Err(CloudError::DegenerateDensities { index: 4 })
        ));
    }

    #[test]
    fn test_calibrate_roughness_inverts_and_remaps() {
        let mut values = vec![0.0, 5.0, 10.0];
        calibrate_roughness(&mut values, (0.2, 0.8));
        // Lowest dispersion maps to the top of the smoothness range.
        assert!((values[0] - 0.8).abs() < 1e-6);
        assert!((values[1] - 0.5).abs() < 1e-6);
        assert!((values[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_calibrate_roughness_flat_batch() {
        let mut values = vec![3.0; 4];
        calibrate_roughness(&mut values, (0.0, 1.0));
        for v in values {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }
}

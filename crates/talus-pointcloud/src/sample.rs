//! Surface sampling with simulated scan noise.

use glam::{Vec2, Vec3, Vec4};
use rand::Rng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::CloudError;
use talus_mesh::{Mesh, Texture};

/// A point sampled from a mesh surface, with its ground-truth attributes.
///
/// `position` carries the scan noise; the other fields are the true surface
/// values at the undisturbed sample location.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SurfacePoint {
    /// Noisy sampled position.
    pub position: Vec3,
    /// True surface normal at the sample.
    pub normal: Vec3,
    /// Texture coordinate at the sample.
    pub uv: Vec2,
    /// True albedo as RGBA bytes.
    pub albedo: [u8; 4],
    /// True smoothness in [0, 1].
    pub smoothness: f32,
}

/// Optional surface attribute maps, sampled at each point's UV.
///
/// Absent maps fall back to a white surface: albedo white, smoothness 1,
/// normals interpolated from the mesh vertices.
#[derive(Debug, Clone, Default)]
pub struct SurfaceMaps {
    /// Albedo color map.
    pub albedo: Option<Texture>,
    /// Smoothness map; the alpha channel holds smoothness.
    pub smoothness: Option<Texture>,
    /// Tangent-space normal map overriding interpolated vertex normals.
    pub normal: Option<Texture>,
}

/// Standard normal draw via the polar Box-Muller transform.
fn gaussian(rng: &mut impl Rng) -> f32 {
    loop {
        let v = Vec2::new(rng.random::<f32>(), rng.random::<f32>()) * 2.0 - Vec2::ONE;
        let s = v.length_squared();
        if s > 0.0 && s < 1.0 {
            return v.x * (-2.0 * s.ln() / s).sqrt();
        }
    }
}

fn gaussian_vec3(rng: &mut impl Rng, sigma: f32) -> Vec3 {
    Vec3::new(gaussian(rng), gaussian(rng), gaussian(rng)) * sigma
}

/// Samples `count` points uniformly over a mesh surface by area.
///
/// Triangles are chosen by binary search over a cumulative area table, the
/// position inside a triangle by uniform barycentric coordinates (reflected
/// into the valid half when `r + s >= 1`). Each position is then perturbed
/// like a scanner return: a Gaussian offset along the surface normal with
/// sigma `4 * noise_sigma` plus an isotropic Gaussian offset with sigma
/// `noise_sigma`.
///
/// Fails with [`CloudError::DegenerateMesh`] when the mesh has no triangles
/// or zero total area.
pub fn sample_surface(
    mesh: &Mesh,
    maps: &SurfaceMaps,
    count: usize,
    noise_sigma: f32,
    rng: &mut impl Rng,
) -> Result<Vec<SurfacePoint>, CloudError> {
    let areas = mesh.triangle_areas();
    let mut total = 0.0f32;
    let cdf: Vec<f32> = areas
        .iter()
        .map(|a| {
            total += a;
            total
        })
        .collect();

    if cdf.is_empty() || total <= 0.0 {
        return Err(CloudError::DegenerateMesh);
    }

    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        let pick = rng.random_range(0.0..total);
        let tri_index = cdf.partition_point(|&c| c < pick).min(cdf.len() - 1);
        let tri = mesh.triangle(tri_index);

        let mut r = rng.random::<f32>();
        let mut s = rng.random::<f32>();
        if r + s >= 1.0 {
            r = 1.0 - r;
            s = 1.0 - s;
        }

        let uv = tri.uv_at(r, s);
        let normal = match &maps.normal {
            Some(map) => map.sample_normal(uv),
            None => tri.normal_at(r, s),
        };

        let albedo = match &maps.albedo {
            Some(map) => {
                let c = (map.sample(uv) * 255.0).clamp(Vec4::ZERO, Vec4::splat(255.0));
                [c.x as u8, c.y as u8, c.z as u8, c.w as u8]
            }
            None => [255; 4],
        };
        let smoothness = match &maps.smoothness {
            Some(map) => map.sample(uv).w,
            None => 1.0,
        };

        let mut position = tri.point_at(r, s);
        position += normal * (gaussian(rng) * noise_sigma * 4.0);
        position += gaussian_vec3(rng, noise_sigma);

        points.push(SurfacePoint {
            position,
            normal,
            uv,
            albedo,
            smoothness,
        });
    }

    Ok(points)
}

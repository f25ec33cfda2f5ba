//! Generators for test surfaces.
//!
//! These meshes exist to exercise surface sampling and normal estimation:
//! a flat plane whose true normal is known everywhere, and a grid of
//! randomized pyramid peaks that mixes sharp creases with planar faces.

use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Mesh;

/// Creates a square plane in the XZ plane, centered at the origin.
///
/// The plane spans `[-half_extent, half_extent]` on X and Z with
/// `subdivisions` cells per side (two triangles each), shared vertices,
/// +Y normals and UVs covering [0, 1].
pub fn plane(half_extent: f32, subdivisions: u32) -> Mesh {
    assert!(subdivisions >= 1, "plane needs at least one cell");
    let verts_per_side = subdivisions + 1;
    let vertex_count = (verts_per_side * verts_per_side) as usize;

    let mut mesh = Mesh::with_capacity(vertex_count, (subdivisions * subdivisions * 2) as usize);

    for zi in 0..verts_per_side {
        for xi in 0..verts_per_side {
            let u = xi as f32 / subdivisions as f32;
            let v = zi as f32 / subdivisions as f32;
            mesh.positions.push(Vec3::new(
                (u * 2.0 - 1.0) * half_extent,
                0.0,
                (v * 2.0 - 1.0) * half_extent,
            ));
            mesh.normals.push(Vec3::Y);
            mesh.uvs.push(Vec2::new(u, v));
        }
    }

    for zi in 0..subdivisions {
        for xi in 0..subdivisions {
            let i0 = zi * verts_per_side + xi;
            let i1 = i0 + 1;
            let i2 = i0 + verts_per_side;
            let i3 = i2 + 1;
            // Both triangles wound counter-clockwise seen from +Y.
            mesh.indices.extend_from_slice(&[i0, i2, i1, i1, i2, i3]);
        }
    }

    mesh
}

/// Creates a grid of four-sided pyramid peaks with randomized apex heights.
///
/// Each cell is a 2x2 base in the XZ plane with an apex offset to
/// `(0.5, h, 0.5)` from the cell center, `h` drawn uniformly from
/// [-2, 2]. Triangles do not share vertices, so flat normals reflect each
/// face exactly. UVs span the cell base.
pub fn peak_grid(cells_x: u32, cells_z: u32, seed: u64) -> Mesh {
    let mut rng = StdRng::seed_from_u64(seed);
    let cells = (cells_x * cells_z) as usize;
    let mut mesh = Mesh::with_capacity(cells * 12, cells * 4);

    for x in 0..cells_x {
        for z in 0..cells_z {
            let base = Vec3::new(x as f32 * 2.0, 0.0, z as f32 * 2.0);
            let height = rng.random_range(-2.0..2.0);

            let mut push = |dx: f32, dy: f32, dz: f32| {
                mesh.indices.push(mesh.positions.len() as u32);
                mesh.positions.push(base + Vec3::new(dx, dy, dz));
                mesh.uvs.push(Vec2::new(dx * 0.5 + 0.5, dz * 0.5 + 0.5));
            };

            // Four faces fanning out from the apex, wound so each flat
            // normal has a positive Y component.
            push(0.5, height, 0.5);
            push(1.0, 0.0, -1.0);
            push(-1.0, 0.0, -1.0);

            push(0.5, height, 0.5);
            push(1.0, 0.0, 1.0);
            push(1.0, 0.0, -1.0);

            push(0.5, height, 0.5);
            push(-1.0, 0.0, 1.0);
            push(1.0, 0.0, 1.0);

            push(0.5, height, 0.5);
            push(-1.0, 0.0, -1.0);
            push(-1.0, 0.0, 1.0);
        }
    }

    mesh.compute_flat_normals();
    mesh
}

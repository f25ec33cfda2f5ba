//! Core mesh types.

use glam::{Vec2, Vec3};

/// One triangle of a mesh with its vertex attributes resolved.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    /// Vertex positions.
    pub positions: [Vec3; 3],
    /// Per-vertex normals.
    pub normals: [Vec3; 3],
    /// Per-vertex texture coordinates.
    pub uvs: [Vec2; 3],
}

impl Triangle {
    /// Area of the triangle, half the cross product magnitude.
    pub fn area(&self) -> f32 {
        let [a, b, c] = self.positions;
        0.5 * (b - a).cross(c - a).length()
    }

    /// Interpolates position at barycentric coordinates `(r, s)` relative to
    /// the first vertex.
    pub fn point_at(&self, r: f32, s: f32) -> Vec3 {
        let [a, b, c] = self.positions;
        a + r * (b - a) + s * (c - a)
    }

    /// Interpolates the vertex normal at barycentric coordinates `(r, s)`.
    pub fn normal_at(&self, r: f32, s: f32) -> Vec3 {
        let [a, b, c] = self.normals;
        (a + r * (b - a) + s * (c - a)).normalize_or_zero()
    }

    /// Interpolates the texture coordinate at barycentric coordinates `(r, s)`.
    pub fn uv_at(&self, r: f32, s: f32) -> Vec2 {
        let [a, b, c] = self.uvs;
        a + r * (b - a) + s * (c - a)
    }
}

/// A 3D mesh with indexed triangle topology.
///
/// Normals and UVs are per-vertex and optional; accessors that need them
/// substitute zeroed attributes when they are absent.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Vertex positions.
    pub positions: Vec<Vec3>,
    /// Vertex normals (per-vertex, not per-face).
    pub normals: Vec<Vec3>,
    /// Texture coordinates.
    pub uvs: Vec<Vec2>,
    /// Triangle indices (every 3 indices form a triangle).
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Creates an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mesh with pre-allocated capacity.
    pub fn with_capacity(vertices: usize, triangles: usize) -> Self {
        Self {
            positions: Vec::with_capacity(vertices),
            normals: Vec::with_capacity(vertices),
            uvs: Vec::with_capacity(vertices),
            indices: Vec::with_capacity(triangles * 3),
        }
    }

    /// Returns the number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Returns the number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Returns true if the mesh has normals.
    pub fn has_normals(&self) -> bool {
        self.normals.len() == self.positions.len()
    }

    /// Returns true if the mesh has UVs.
    pub fn has_uvs(&self) -> bool {
        self.uvs.len() == self.positions.len()
    }

    /// Resolves triangle `index` into its vertex attributes.
    ///
    /// Missing normals or UVs come back zeroed.
    pub fn triangle(&self, index: usize) -> Triangle {
        let i = [
            self.indices[index * 3] as usize,
            self.indices[index * 3 + 1] as usize,
            self.indices[index * 3 + 2] as usize,
        ];

        let attr = |data: &[Vec3], j: usize| data.get(j).copied().unwrap_or(Vec3::ZERO);
        let uv = |j: usize| self.uvs.get(j).copied().unwrap_or(Vec2::ZERO);

        Triangle {
            positions: [
                self.positions[i[0]],
                self.positions[i[1]],
                self.positions[i[2]],
            ],
            normals: [
                attr(&self.normals, i[0]),
                attr(&self.normals, i[1]),
                attr(&self.normals, i[2]),
            ],
            uvs: [uv(i[0]), uv(i[1]), uv(i[2])],
        }
    }

    /// Per-triangle areas, in triangle order.
    pub fn triangle_areas(&self) -> Vec<f32> {
        (0..self.triangle_count())
            .map(|t| self.triangle(t).area())
            .collect()
    }

    /// Total surface area of the mesh.
    pub fn surface_area(&self) -> f32 {
        self.triangle_areas().iter().sum()
    }

    /// Computes flat normals from triangle geometry.
    ///
    /// Each vertex gets the normal of its triangle. Vertices shared between
    /// triangles end up with the normal of the last triangle touching them;
    /// meshes meant for flat shading should not share vertices.
    pub fn compute_flat_normals(&mut self) {
        self.normals.clear();
        self.normals.resize(self.positions.len(), Vec3::ZERO);

        for tri in self.indices.chunks(3) {
            let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let v0 = self.positions[i0];
            let v1 = self.positions[i1];
            let v2 = self.positions[i2];

            let normal = (v1 - v0).cross(v2 - v0).normalize_or_zero();

            self.normals[i0] = normal;
            self.normals[i1] = normal;
            self.normals[i2] = normal;
        }
    }

    /// Computes smooth normals by averaging adjacent face normals.
    pub fn compute_smooth_normals(&mut self) {
        self.normals.clear();
        self.normals.resize(self.positions.len(), Vec3::ZERO);

        // Accumulate face normals at each vertex
        for tri in self.indices.chunks(3) {
            let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let v0 = self.positions[i0];
            let v1 = self.positions[i1];
            let v2 = self.positions[i2];

            let normal = (v1 - v0).cross(v2 - v0); // unnormalized = area-weighted

            self.normals[i0] += normal;
            self.normals[i1] += normal;
            self.normals[i2] += normal;
        }

        // Normalize accumulated normals
        for normal in &mut self.normals {
            *normal = normal.normalize_or_zero();
        }
    }
}

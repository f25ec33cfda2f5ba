//! Indexed triangle meshes, texture sampling and test geometry.
//!
//! This crate provides the surface representation that point clouds are
//! sampled from:
//!
//! - [`Mesh`] - indexed triangle mesh with per-vertex normals and UVs
//! - [`Texture`] - bilinear-filtered RGBA texture for surface attributes
//! - [`primitives`] - generators for test surfaces (planes, peak grids)
//!
//! # Example
//!
//! ```
//! use talus_mesh::primitives;
//!
//! let mesh = primitives::plane(1.0, 4);
//! assert_eq!(mesh.triangle_count(), 32);
//! assert!(mesh.surface_area() > 3.9);
//! ```

mod mesh;
pub mod primitives;
mod texture;

pub use mesh::{Mesh, Triangle};
pub use texture::{Texture, TextureError, WrapMode};

//! Bilinear texture sampling for surface attributes.
//!
//! Point-cloud sampling reads albedo, smoothness and tangent-space normal
//! maps at arbitrary UV coordinates, so [`Texture`] stores decoded RGBA
//! floats and always filters bilinearly.

use std::path::Path;

use glam::{Vec2, Vec3, Vec4};
use image::ImageError;
use thiserror::Error;

/// Errors that can occur when loading textures.
#[derive(Debug, Error)]
pub enum TextureError {
    /// Failed to decode the image file.
    #[error("failed to load texture: {0}")]
    Image(#[from] ImageError),
    /// The decoded image had no pixels.
    #[error("texture has zero size")]
    ZeroSize,
}

/// How to handle UV coordinates outside [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    /// Repeat the texture (fract of coordinate).
    #[default]
    Repeat,
    /// Clamp coordinates to the edge texel.
    Clamp,
}

/// An RGBA texture sampled bilinearly.
///
/// UV coordinates go from (0, 0) at the top-left to (1, 1) at the
/// bottom-right. Channels are linear floats in [0, 1].
#[derive(Clone)]
pub struct Texture {
    data: Vec<[f32; 4]>,
    width: u32,
    height: u32,
    /// How to handle coordinates outside [0, 1].
    pub wrap_mode: WrapMode,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("wrap_mode", &self.wrap_mode)
            .finish()
    }
}

impl Texture {
    /// Loads a texture from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        Self::from_image(&image::open(path)?)
    }

    /// Creates a texture from a decoded image.
    pub fn from_image(img: &image::DynamicImage) -> Result<Self, TextureError> {
        let rgba = img.to_rgba32f();
        let (width, height) = (rgba.width(), rgba.height());
        if width == 0 || height == 0 {
            return Err(TextureError::ZeroSize);
        }
        let data = rgba.pixels().map(|p| p.0).collect();
        Ok(Self {
            data,
            width,
            height,
            wrap_mode: WrapMode::default(),
        })
    }

    /// Creates a 1x1 texture of a single color.
    ///
    /// Sampling it returns `color` everywhere; the default surface
    /// attributes when no map is bound.
    pub fn solid(color: Vec4) -> Self {
        Self {
            data: vec![color.to_array()],
            width: 1,
            height: 1,
            wrap_mode: WrapMode::default(),
        }
    }

    /// Texture width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Texture height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    fn texel(&self, x: i64, y: i64) -> Vec4 {
        let (w, h) = (self.width as i64, self.height as i64);
        let (x, y) = match self.wrap_mode {
            WrapMode::Repeat => (x.rem_euclid(w), y.rem_euclid(h)),
            WrapMode::Clamp => (x.clamp(0, w - 1), y.clamp(0, h - 1)),
        };
        Vec4::from_array(self.data[(y * w + x) as usize])
    }

    /// Samples the texture at `uv` with bilinear filtering.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        // Texel centers sit at half-integer coordinates.
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;

        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), fx);
        let bottom = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }

    /// Samples a tangent-space normal map at `uv`.
    ///
    /// Channels are decoded from [0, 1] to [-1, 1] and the result is
    /// renormalized after filtering.
    pub fn sample_normal(&self, uv: Vec2) -> Vec3 {
        let raw = self.sample(uv);
        let n = Vec3::new(raw.x, raw.y, raw.z) * 2.0 - Vec3::ONE;
        n.normalize_or(Vec3::Z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2x2 checkerboard: white top-left and bottom-right, black otherwise.
    fn checkerboard() -> Texture {
        Texture {
            data: vec![
                [1.0; 4],
                [0.0, 0.0, 0.0, 1.0],
                [0.0, 0.0, 0.0, 1.0],
                [1.0; 4],
            ],
            width: 2,
            height: 2,
            wrap_mode: WrapMode::Repeat,
        }
    }

    #[test]
    fn test_solid_is_constant() {
        let tex = Texture::solid(Vec4::new(0.25, 0.5, 0.75, 1.0));
        for uv in [Vec2::ZERO, Vec2::splat(0.5), Vec2::new(3.7, -2.1)] {
            let c = tex.sample(uv);
            assert!((c - Vec4::new(0.25, 0.5, 0.75, 1.0)).length() < 1e-6);
        }
    }

    #[test]
    fn test_texel_centers_are_exact() {
        let tex = checkerboard();
        // Centers of a 2x2 texture sit at 0.25 and 0.75 in UV space.
        assert!((tex.sample(Vec2::new(0.25, 0.25)).x - 1.0).abs() < 1e-6);
        assert!((tex.sample(Vec2::new(0.75, 0.25)).x - 0.0).abs() < 1e-6);
        assert!((tex.sample(Vec2::new(0.75, 0.75)).x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilinear_midpoint_blends() {
        let tex = checkerboard();
        // Halfway between a white and a black texel.
        let c = tex.sample(Vec2::new(0.5, 0.25));
        assert!((c.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_repeat_wraps_coordinates() {
        let tex = checkerboard();
        let inside = tex.sample(Vec2::new(0.25, 0.25));
        let wrapped = tex.sample(Vec2::new(1.25, -0.75));
        assert!((inside - wrapped).length() < 1e-6);
    }

    #[test]
    fn test_clamp_holds_edge_texel() {
        let mut tex = checkerboard();
        tex.wrap_mode = WrapMode::Clamp;
        let corner = tex.sample(Vec2::new(-5.0, -5.0));
        assert!((corner.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sample_normal_decodes_and_normalizes() {
        // Encoded +Z normal: (0.5, 0.5, 1.0).
        let tex = Texture::solid(Vec4::new(0.5, 0.5, 1.0, 1.0));
        let n = tex.sample_normal(Vec2::splat(0.3));
        assert!((n - Vec3::Z).length() < 1e-6);
    }
}

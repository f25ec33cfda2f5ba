//! Diagnostic export of Hough histograms as grayscale images.

use std::path::Path;

use glam::Vec3;
use image::GrayImage;

use crate::error::CloudError;
use crate::hough::{HOUGH_SIZE, HoughStack};

/// Writes every histogram layer of every stack as an 8-bit grayscale PNG.
///
/// Each layer is remapped against its own maximum count. The filename
/// carries the labels a training consumer needs: the ground-truth normal's
/// Hough-space coordinates and the ground-truth smoothness, as
/// `{point}_k_{scale}_x_{x:.3}_y_{y:.3}_r_{r:.3}.png`.
pub fn write_histograms(
    dir: &Path,
    stacks: &[HoughStack],
    true_normals: &[Vec3],
    smoothness: &[f32],
) -> Result<(), CloudError> {
    std::fs::create_dir_all(dir)?;

    let side = HOUGH_SIZE as u32;
    for (point, stack) in stacks.iter().enumerate() {
        let label = stack.to_hough_space(true_normals[point]);

        for level in 0..stack.levels() {
            let pixels: Vec<u8> = stack
                .scaled_layer(level)
                .iter()
                .map(|&v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
                .collect();
            let img = GrayImage::from_raw(side, side, pixels)
                .expect("layer length matches histogram dimensions");

            let name = format!(
                "{point}_k_{level}_x_{:.3}_y_{:.3}_r_{:.3}.png",
                label.x, label.y, smoothness[point],
            );
            img.save(dir.join(name))?;
        }
    }

    Ok(())
}

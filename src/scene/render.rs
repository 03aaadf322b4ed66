//! Minimal top-down renderer writing binary PPM (P6) images.
//!
//! Objects are projected orthographically onto the XY plane and drawn as
//! square markers over a vertical gradient. Cost is bounded by the image
//! size plus one marker per object.

use super::{ObjectKind, Scene};
use std::fs;
use std::io;
use std::path::Path;

/// Largest accepted width or height.
pub const MAX_DIMENSION: u32 = 4096;

/// Smallest half-extent of the viewed area, in scene units
const MIN_HALF_EXTENT: f64 = 5.0;

const DEFAULT_MESH_COLOR: [f64; 3] = [0.8, 0.8, 0.8];
const LIGHT_COLOR: [f64; 3] = [1.0, 0.85, 0.2];
const CAMERA_COLOR: [f64; 3] = [0.2, 0.4, 1.0];

struct Image {
    width: usize,
    height: usize,
    pixels: Vec<[u8; 3]>,
}

impl Image {
    fn background(width: usize, height: usize) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            let t = y as f64 / height.max(2).saturating_sub(1) as f64;
            let shade = to_byte(0.25 + 0.2 * (1.0 - t));
            pixels.extend(std::iter::repeat([shade, shade, to_byte(0.35 + 0.2 * (1.0 - t))]).take(width));
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    fn fill_square(&mut self, cx: i64, cy: i64, half: i64, color: [u8; 3]) {
        let x0 = (cx - half).max(0);
        let y0 = (cy - half).max(0);
        let x1 = (cx + half).min(self.width as i64 - 1);
        let y1 = (cy + half).min(self.height as i64 - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                self.pixels[y as usize * self.width + x as usize] = color;
            }
        }
    }

    fn to_ppm(&self) -> Vec<u8> {
        let header = format!("P6\n{} {}\n255\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.pixels.len() * 3);
        out.extend_from_slice(header.as_bytes());
        for pixel in &self.pixels {
            out.extend_from_slice(pixel);
        }
        out
    }
}

fn to_byte(channel: f64) -> u8 {
    (channel.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Render the scene to PPM bytes.
pub fn render(scene: &Scene, width: u32, height: u32) -> Vec<u8> {
    let (width, height) = (width as usize, height as usize);
    let mut image = Image::background(width, height);

    let half_extent = scene
        .objects()
        .iter()
        .flat_map(|o| [o.location[0].abs(), o.location[1].abs()])
        .fold(MIN_HALF_EXTENT, f64::max)
        * 1.1;
    let pixels_per_unit = width.min(height) as f64 / (2.0 * half_extent);
    let marker = (width.min(height) / 64).max(1) as i64;

    for object in scene.objects() {
        let color = match &object.kind {
            ObjectKind::Mesh(_) => object
                .materials
                .first()
                .and_then(|name| scene.material(name))
                .map(|m| [m.color[0], m.color[1], m.color[2]])
                .unwrap_or(DEFAULT_MESH_COLOR),
            ObjectKind::Light { .. } => LIGHT_COLOR,
            ObjectKind::Camera => CAMERA_COLOR,
        };
        let cx = width as f64 / 2.0 + object.location[0] * pixels_per_unit;
        // Image rows grow downwards, scene Y grows upwards
        let cy = height as f64 / 2.0 - object.location[1] * pixels_per_unit;
        image.fill_square(
            cx.round() as i64,
            cy.round() as i64,
            marker,
            color.map(to_byte),
        );
    }

    image.to_ppm()
}

/// Render the scene and write it to `path`.
pub fn render_to_file(scene: &Scene, path: &Path, width: u32, height: u32) -> io::Result<()> {
    fs::write(path, render(scene, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Primitive;

    fn pixel(ppm: &[u8], header_len: usize, width: usize, x: usize, y: usize) -> [u8; 3] {
        let i = header_len + (y * width + x) * 3;
        [ppm[i], ppm[i + 1], ppm[i + 2]]
    }

    #[test]
    fn test_empty_scene_header_and_size() {
        let ppm = render(&Scene::new(), 8, 4);
        let header = b"P6\n8 4\n255\n";
        assert!(ppm.starts_with(header));
        assert_eq!(ppm.len(), header.len() + 8 * 4 * 3);
    }

    #[test]
    fn test_object_marker_drawn_at_origin() {
        let mut scene = Scene::new();
        scene.add_object("Cube", ObjectKind::Mesh(Primitive::Cube { size: 1.0 }), [0.0; 3], [0.0; 3]);
        let ppm = render(&scene, 64, 64);
        let header_len = b"P6\n64 64\n255\n".len();
        assert_eq!(pixel(&ppm, header_len, 64, 32, 32), [204, 204, 204]);
        assert_ne!(pixel(&ppm, header_len, 64, 0, 0), [204, 204, 204]);
    }

    #[test]
    fn test_far_objects_stay_in_frame() {
        let mut scene = Scene::new();
        scene.add_object("Cube", ObjectKind::Mesh(Primitive::Cube { size: 1.0 }), [1000.0, -1000.0, 0.0], [0.0; 3]);
        // Must not index out of bounds
        let ppm = render(&scene, 16, 16);
        assert_eq!(ppm.len(), b"P6\n16 16\n255\n".len() + 16 * 16 * 3);
    }
}

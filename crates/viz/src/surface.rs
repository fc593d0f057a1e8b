//! RGBA raster surface addressed in CSS pixels.
//!
//! The backing image is `round(css * dpr)` pixels on each axis; every drawing
//! call takes CSS-pixel coordinates and applies the device-pixel scale itself.
//! Shapes are rasterised by sampling pixel centres and composited source-over
//! onto non-premultiplied RGBA.

use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{ImageFormat, Rgba, RgbaImage};
use thiserror::Error;

use crate::projection::PixelPoint;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::hex(0xffffff);

    /// Build a colour from `0xRRGGBB`.
    pub const fn hex(rgb: u32) -> Self {
        Self {
            r: ((rgb >> 16) & 0xff) as u8,
            g: ((rgb >> 8) & 0xff) as u8,
            b: (rgb & 0xff) as u8,
        }
    }
}

/// Line style for [`Surface::stroke_path`]. Caps and joins are round.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub alpha: f64,
    /// CSS pixels.
    pub width: f64,
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("failed to encode PNG at {path}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to move {from} into place")]
    Persist {
        from: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Surface {
    image: RgbaImage,
    css_width: f64,
    css_height: f64,
    dpr: f64,
}

impl Surface {
    pub fn new(css_width: f64, css_height: f64, dpr: f64) -> Self {
        let mut surface = Self {
            image: RgbaImage::new(0, 0),
            css_width: 0.0,
            css_height: 0.0,
            dpr: 1.0,
        };
        surface.resize(css_width, css_height, dpr);
        surface
    }

    /// Reallocate the backing image for a new CSS box and pixel density.
    /// Contents are cleared.
    pub fn resize(&mut self, css_width: f64, css_height: f64, dpr: f64) {
        self.css_width = css_width.max(0.0);
        self.css_height = css_height.max(0.0);
        self.dpr = if dpr.is_finite() && dpr > 0.0 { dpr } else { 1.0 };
        let width = (self.css_width * self.dpr).round() as u32;
        let height = (self.css_height * self.dpr).round() as u32;
        self.image = RgbaImage::new(width, height);
    }

    pub fn css_size(&self) -> (f64, f64) {
        (self.css_width, self.css_height)
    }

    pub fn dpr(&self) -> f64 {
        self.dpr
    }

    pub fn backing_size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Pixel under a CSS-space point, if inside the backing image.
    pub fn pixel_at(&self, point: PixelPoint) -> Option<Rgba<u8>> {
        let x = (point.x * self.dpr).floor();
        let y = (point.y * self.dpr).floor();
        if x < 0.0 || y < 0.0 {
            return None;
        }
        self.image.get_pixel_checked(x as u32, y as u32).copied()
    }

    pub fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    pub fn fill_circle(&mut self, center: PixelPoint, radius: f64, color: Color, alpha: f64) {
        self.paint(center, center, radius, color, |p| {
            (distance(p, center) <= radius).then_some(alpha)
        });
    }

    /// Radial gradient from `inner_alpha` at the centre to transparent at
    /// `radius`.
    pub fn radial_glow(&mut self, center: PixelPoint, radius: f64, color: Color, inner_alpha: f64) {
        if radius <= 0.0 {
            return;
        }
        self.paint(center, center, radius, color, |p| {
            let d = distance(p, center);
            (d < radius).then(|| inner_alpha * (1.0 - d / radius))
        });
    }

    pub fn stroke_ring(&mut self, center: PixelPoint, radius: f64, width: f64, color: Color) {
        let half = width / 2.0;
        self.paint(center, center, radius + half, color, |p| {
            ((distance(p, center) - radius).abs() <= half).then_some(1.0)
        });
    }

    /// Stroke every subpath as one shape: overlapping segments are covered
    /// once, so a translucent stroke has uniform opacity.
    ///
    /// Each segment is rasterised only inside its own padded bounds into a
    /// shared coverage mask, which is then blended in one pass.
    pub fn stroke_path(&mut self, subpaths: &[Vec<PixelPoint>], stroke: &Stroke) {
        let segments: Vec<(PixelPoint, PixelPoint)> = subpaths
            .iter()
            .flat_map(|path| match path.as_slice() {
                [single] => vec![(*single, *single)],
                points => points.windows(2).map(|pair| (pair[0], pair[1])).collect(),
            })
            .collect();
        let Some(&(first, _)) = segments.first() else {
            return;
        };

        let (mut min, mut max) = (first, first);
        for &(a, b) in &segments {
            for point in [a, b] {
                min = PixelPoint::new(min.x.min(point.x), min.y.min(point.y));
                max = PixelPoint::new(max.x.max(point.x), max.y.max(point.y));
            }
        }
        let half = stroke.width / 2.0;
        let Some(bounds) = self.device_bounds(min, max, half) else {
            return;
        };

        let mut mask = CoverageMask::new(bounds);
        for &(a, b) in &segments {
            let seg_min = PixelPoint::new(a.x.min(b.x), a.y.min(b.y));
            let seg_max = PixelPoint::new(a.x.max(b.x), a.y.max(b.y));
            let Some(seg_bounds) = self.device_bounds(seg_min, seg_max, half) else {
                continue;
            };
            for y in seg_bounds.y0..seg_bounds.y1 {
                for x in seg_bounds.x0..seg_bounds.x1 {
                    if !mask.is_set(x, y) && distance_to_segment(self.sample(x, y), a, b) <= half {
                        mask.set(x, y);
                    }
                }
            }
        }

        for (x, y) in mask.covered() {
            blend(self.image.get_pixel_mut(x, y), stroke.color, stroke.alpha);
        }
    }

    /// Write the backing image as PNG, replacing `path` atomically.
    pub fn save_png(&self, path: &Path) -> Result<(), SurfaceError> {
        let staging = staging_path(path);
        self.image
            .save_with_format(&staging, ImageFormat::Png)
            .map_err(|source| SurfaceError::Encode {
                path: staging.clone(),
                source,
            })?;
        fs::rename(&staging, path).map_err(|source| SurfaceError::Persist {
            from: staging,
            source,
        })
    }

    /// Composite `color` over every device pixel in the CSS box
    /// `[min - pad, max + pad]` for which `coverage` yields an alpha.
    fn paint<F>(&mut self, min: PixelPoint, max: PixelPoint, pad: f64, color: Color, coverage: F)
    where
        F: Fn(PixelPoint) -> Option<f64>,
    {
        let Some(bounds) = self.device_bounds(min, max, pad) else {
            return;
        };
        for y in bounds.y0..bounds.y1 {
            for x in bounds.x0..bounds.x1 {
                if let Some(alpha) = coverage(self.sample(x, y)) {
                    blend(self.image.get_pixel_mut(x, y), color, alpha);
                }
            }
        }
    }

    /// Device pixels touched by the CSS box `[min - pad, max + pad]`, clipped
    /// to the image. `None` when nothing is visible.
    fn device_bounds(&self, min: PixelPoint, max: PixelPoint, pad: f64) -> Option<DeviceBounds> {
        let (width, height) = self.image.dimensions();
        let dpr = self.dpr;
        let bounds = DeviceBounds {
            x0: device_floor((min.x - pad) * dpr, width),
            y0: device_floor((min.y - pad) * dpr, height),
            x1: device_ceil((max.x + pad) * dpr, width),
            y1: device_ceil((max.y + pad) * dpr, height),
        };
        (bounds.x0 < bounds.x1 && bounds.y0 < bounds.y1).then_some(bounds)
    }

    /// CSS position of a device pixel's centre.
    fn sample(&self, x: u32, y: u32) -> PixelPoint {
        PixelPoint::new((x as f64 + 0.5) / self.dpr, (y as f64 + 0.5) / self.dpr)
    }
}

/// Half-open device pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DeviceBounds {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// Per-stroke record of covered device pixels within `bounds`.
struct CoverageMask {
    bounds: DeviceBounds,
    covered: Vec<bool>,
}

impl CoverageMask {
    fn new(bounds: DeviceBounds) -> Self {
        let len = ((bounds.x1 - bounds.x0) * (bounds.y1 - bounds.y0)) as usize;
        Self {
            bounds,
            covered: vec![false; len],
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        ((y - self.bounds.y0) * (self.bounds.x1 - self.bounds.x0) + (x - self.bounds.x0)) as usize
    }

    fn is_set(&self, x: u32, y: u32) -> bool {
        self.covered[self.index(x, y)]
    }

    fn set(&mut self, x: u32, y: u32) {
        let index = self.index(x, y);
        self.covered[index] = true;
    }

    fn covered(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.bounds.x1 - self.bounds.x0;
        self.covered
            .iter()
            .enumerate()
            .filter(|(_, covered)| **covered)
            .map(move |(index, _)| {
                let index = index as u32;
                (self.bounds.x0 + index % width, self.bounds.y0 + index / width)
            })
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn device_floor(value: f64, limit: u32) -> u32 {
    value.floor().clamp(0.0, limit as f64) as u32
}

fn device_ceil(value: f64, limit: u32) -> u32 {
    value.ceil().clamp(0.0, limit as f64) as u32
}

fn distance(a: PixelPoint, b: PixelPoint) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn distance_to_segment(p: PixelPoint, a: PixelPoint, b: PixelPoint) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length_sq = dx * dx + dy * dy;
    if length_sq == 0.0 {
        return distance(p, a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / length_sq).clamp(0.0, 1.0);
    distance(p, PixelPoint::new(a.x + t * dx, a.y + t * dy))
}

/// Source-over on straight (non-premultiplied) alpha.
fn blend(dst: &mut Rgba<u8>, color: Color, alpha: f64) {
    let src_a = alpha.clamp(0.0, 1.0);
    if src_a == 0.0 {
        return;
    }
    let dst_a = dst[3] as f64 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    let mix = |src: u8, dst: u8| {
        let value = (src as f64 * src_a + dst as f64 * dst_a * (1.0 - src_a)) / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };
    *dst = Rgba([
        mix(color.r, dst[0]),
        mix(color.g, dst[1]),
        mix(color.b, dst[2]),
        (out_a * 255.0).round() as u8,
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::hex(0xff0000);

    #[test]
    fn backing_size_follows_device_pixel_ratio() {
        let mut surface = Surface::new(100.0, 50.0, 2.0);
        assert_eq!(surface.backing_size(), (200, 100));
        surface.resize(33.3, 10.0, 1.5);
        assert_eq!(surface.backing_size(), (50, 15));
        assert_eq!(surface.css_size(), (33.3, 10.0));
    }

    #[test]
    fn drawing_uses_css_coordinates() {
        let mut surface = Surface::new(20.0, 20.0, 2.0);
        surface.fill_circle(PixelPoint::new(10.0, 10.0), 2.0, RED, 1.0);
        assert_eq!(surface.image().get_pixel(20, 20), &Rgba([255, 0, 0, 255]));
        assert_eq!(surface.image().get_pixel(2, 2)[3], 0);
    }

    #[test]
    fn clear_makes_everything_transparent() {
        let mut surface = Surface::new(10.0, 10.0, 1.0);
        surface.fill_circle(PixelPoint::new(5.0, 5.0), 10.0, RED, 1.0);
        surface.clear();
        assert!(surface.image().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn overlapping_segments_are_covered_once() {
        let mut surface = Surface::new(40.0, 40.0, 1.0);
        let path = vec![
            PixelPoint::new(5.0, 20.5),
            PixelPoint::new(35.0, 20.5),
            PixelPoint::new(5.0, 20.5),
        ];
        surface.stroke_path(
            &[path],
            &Stroke {
                color: RED,
                alpha: 0.5,
                width: 3.0,
            },
        );
        let alpha = surface.image().get_pixel(20, 20)[3];
        assert!((127..=128).contains(&alpha), "{alpha}");
    }

    #[test]
    fn long_zigzag_trail_is_covered_once() {
        let mut surface = Surface::new(100.0, 100.0, 2.0);
        let trail: Vec<PixelPoint> = (0..200)
            .map(|i| {
                let x = if i % 2 == 0 { 10.0 } else { 90.0 };
                PixelPoint::new(x, 50.0 + (i % 3) as f64 * 0.25)
            })
            .collect();
        surface.stroke_path(
            &[trail],
            &Stroke {
                color: RED,
                alpha: 0.5,
                width: 3.0,
            },
        );

        let alphas: Vec<u8> = surface
            .image()
            .pixels()
            .map(|p| p[3])
            .filter(|a| *a != 0)
            .collect();
        assert!(!alphas.is_empty());
        assert!(alphas.iter().all(|a| (127..=128).contains(a)), "{alphas:?}");
    }

    #[test]
    fn stroke_leaves_the_bounding_box_interior_untouched() {
        let mut surface = Surface::new(50.0, 50.0, 1.0);
        let corner = vec![
            PixelPoint::new(5.0, 5.0),
            PixelPoint::new(45.0, 5.0),
            PixelPoint::new(45.0, 45.0),
        ];
        surface.stroke_path(
            &[corner],
            &Stroke {
                color: RED,
                alpha: 1.0,
                width: 2.0,
            },
        );
        assert_eq!(surface.image().get_pixel(25, 5)[3], 255);
        assert_eq!(surface.image().get_pixel(45, 25)[3], 255);
        assert_eq!(surface.image().get_pixel(10, 40)[3], 0);
    }

    #[test]
    fn glow_fades_toward_the_edge() {
        let mut surface = Surface::new(60.0, 60.0, 1.0);
        surface.radial_glow(PixelPoint::new(30.0, 30.0), 24.0, RED, 0.25);
        let centre = surface.image().get_pixel(30, 30)[3];
        let rim = surface.image().get_pixel(52, 30)[3];
        assert!(centre > rim);
        assert_eq!(surface.image().get_pixel(58, 30)[3], 0);
    }

    #[test]
    fn shapes_outside_the_surface_are_clipped() {
        let mut surface = Surface::new(10.0, 10.0, 1.0);
        surface.fill_circle(PixelPoint::new(-50.0, -50.0), 5.0, RED, 1.0);
        surface.stroke_path(
            &[vec![PixelPoint::new(-10.0, 5.0), PixelPoint::new(100.0, 5.0)]],
            &Stroke {
                color: RED,
                alpha: 1.0,
                width: 1.0,
            },
        );
        assert_eq!(surface.image().get_pixel(9, 5)[3], 255);
    }

    #[test]
    fn save_png_replaces_target() {
        let dir = std::env::temp_dir().join(format!("viz-surface-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let target = dir.join("frame.png");

        let mut surface = Surface::new(8.0, 4.0, 1.0);
        surface.fill_circle(PixelPoint::new(4.0, 2.0), 1.0, RED, 1.0);
        surface.save_png(&target).unwrap();

        let decoded = image::open(&target).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (8, 4));
        assert!(!staging_path(&target).exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}

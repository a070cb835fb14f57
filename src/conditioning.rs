use std::io::Cursor;

use image::{
    imageops, imageops::FilterType, DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage,
};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_TARGET_SIZE: (u32, u32) = (1024, 1024);
pub const CANNY_LOW_THRESHOLD: i32 = 100;
pub const CANNY_HIGH_THRESHOLD: i32 = 200;

#[derive(Debug, Error)]
pub enum ConditioningError {
    #[error("could not decode product image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("product image has no pixels")]
    EmptyImage,
    #[error("invalid target size {0}x{1}")]
    InvalidTargetSize(u32, u32),
    #[error("conditioning worker stopped: {0}")]
    Interrupted(String),
}

/// Edge map of a letterboxed product photo, three identical channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditioningImage {
    image: RgbImage,
}

impl ConditioningImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[cfg(test)]
    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    /// True when the pixel at (x, y) lies on an edge.
    pub fn is_edge(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y)[0] > 0
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut bytes = Vec::new();
        self.image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConditioningBuilder {
    target_size: (u32, u32),
    low_threshold: i32,
    high_threshold: i32,
}

impl Default for ConditioningBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_SIZE)
    }
}

impl ConditioningBuilder {
    pub fn new(target_size: (u32, u32)) -> Self {
        Self {
            target_size,
            low_threshold: CANNY_LOW_THRESHOLD,
            high_threshold: CANNY_HIGH_THRESHOLD,
        }
    }

    /// Decode an encoded photo (PNG, JPEG, WebP, BMP) and build its edge map.
    pub fn build_from_bytes(&self, encoded: &[u8]) -> Result<ConditioningImage, ConditioningError> {
        let image = image::load_from_memory(encoded)?;
        self.build(&image)
    }

    pub fn build(&self, image: &DynamicImage) -> Result<ConditioningImage, ConditioningError> {
        let (target_w, target_h) = self.target_size;
        if target_w == 0 || target_h == 0 {
            return Err(ConditioningError::InvalidTargetSize(target_w, target_h));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(ConditioningError::EmptyImage);
        }

        let letterboxed = letterbox(image, self.target_size);
        let gray = imageops::grayscale(&letterboxed);
        let edges = canny(&gray, self.low_threshold, self.high_threshold);

        let image = RgbImage::from_fn(target_w, target_h, |x, y| {
            let v = edges.get_pixel(x, y)[0];
            Rgb([v, v, v])
        });
        info!("Control image prepared: {}x{}", image.width(), image.height());
        Ok(ConditioningImage { image })
    }
}

/// Shrink to fit (never enlarge) and centre on a white canvas.
fn letterbox(image: &DynamicImage, (target_w, target_h): (u32, u32)) -> RgbImage {
    let rgb = if image.width() <= target_w && image.height() <= target_h {
        image.to_rgb8()
    } else {
        image.resize(target_w, target_h, FilterType::Lanczos3).to_rgb8()
    };

    let mut canvas = RgbImage::from_pixel(target_w, target_h, Rgb([255, 255, 255]));
    let x = (target_w - rgb.width().min(target_w)) / 2;
    let y = (target_h - rgb.height().min(target_h)) / 2;
    imageops::overlay(&mut canvas, &rgb, i64::from(x), i64::from(y));
    canvas
}

/// Canny edge detection: 3x3 Sobel with L1 magnitude, non-maximum suppression
/// over four quantised directions, then hysteresis between the two thresholds.
/// Output pixels are 255 on edges and 0 elsewhere.
pub fn canny(gray: &GrayImage, low: i32, high: i32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let (wi, hi) = (w as i64, h as i64);
    let mut out = GrayImage::new(w, h);
    if w == 0 || h == 0 {
        return out;
    }

    // Replicated border.
    let px = |x: i64, y: i64| -> i32 {
        let cx = x.clamp(0, wi - 1) as u32;
        let cy = y.clamp(0, hi - 1) as u32;
        i32::from(gray.get_pixel(cx, cy)[0])
    };

    let len = (w as usize) * (h as usize);
    let mut gx = vec![0i32; len];
    let mut gy = vec![0i32; len];
    let mut mag = vec![0i32; len];
    for y in 0..hi {
        for x in 0..wi {
            let dx = (px(x + 1, y - 1) + 2 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2 * px(x - 1, y) + px(x - 1, y + 1));
            let dy = (px(x - 1, y + 1) + 2 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2 * px(x, y - 1) + px(x + 1, y - 1));
            let i = (y * wi + x) as usize;
            gx[i] = dx;
            gy[i] = dy;
            mag[i] = dx.abs() + dy.abs();
        }
    }

    let mag_at = |x: i64, y: i64| -> i32 {
        if x < 0 || y < 0 || x >= wi || y >= hi { 0 } else { mag[(y * wi + x) as usize] }
    };

    // 0 = suppressed, 1 = weak candidate, 2 = strong edge
    let mut class = vec![0u8; len];
    let mut stack: Vec<(i64, i64)> = Vec::new();
    for y in 0..hi {
        for x in 0..wi {
            let i = (y * wi + x) as usize;
            let m = mag[i];
            if m <= low {
                continue;
            }
            let (dx, dy) = (gx[i], gy[i]);
            let (ax, ay) = (f64::from(dx.abs()), f64::from(dy.abs()));
            let (n1, n2) = if ay <= ax * 0.414_213_56 {
                (mag_at(x - 1, y), mag_at(x + 1, y))
            } else if ay >= ax * 2.414_213_56 {
                (mag_at(x, y - 1), mag_at(x, y + 1))
            } else if (dx > 0) == (dy > 0) {
                (mag_at(x - 1, y - 1), mag_at(x + 1, y + 1))
            } else {
                (mag_at(x + 1, y - 1), mag_at(x - 1, y + 1))
            };
            if m > n1 && m >= n2 {
                if m > high {
                    class[i] = 2;
                    stack.push((x, y));
                } else {
                    class[i] = 1;
                }
            }
        }
    }

    while let Some((x, y)) = stack.pop() {
        out.put_pixel(x as u32, y as u32, Luma([255]));
        for ny in (y - 1)..=(y + 1) {
            for nx in (x - 1)..=(x + 1) {
                if nx < 0 || ny < 0 || nx >= wi || ny >= hi {
                    continue;
                }
                let j = (ny * wi + nx) as usize;
                if class[j] == 1 {
                    class[j] = 2;
                    stack.push((nx, ny));
                }
            }
        }
    }
    out
}

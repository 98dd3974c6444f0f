//! Grayscale frames and sub-pixel sampling.

use crate::types::Point;

/// Read access to an 8-bit grayscale raster.
pub trait ImageAccess {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Intensity at an in-bounds pixel.
    fn pixel(&self, x: u32, y: u32) -> u8;

    /// Intensity with coordinates clamped to the nearest edge pixel.
    fn pixel_clamped(&self, x: i32, y: i32) -> u8 {
        let cx = x.clamp(0, self.width().saturating_sub(1) as i32) as u32;
        let cy = y.clamp(0, self.height().saturating_sub(1) as i32) as u32;
        self.pixel(cx, cy)
    }

    /// True if `p` is at least `margin` pixels inside the image.
    fn contains(&self, p: Point, margin: f32) -> bool {
        let max_x = self.width() as f32 - 1.0 - margin;
        let max_y = self.height() as f32 - 1.0 - margin;
        (margin..=max_x).contains(&p.x) && (margin..=max_y).contains(&p.y)
    }
}

/// An owned, row-major 8-bit grayscale frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl GrayImage {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize);
        Self { width, height, pixels }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Self {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self { width, height, pixels }
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.pixels
    }

    /// Next pyramid level: each output pixel is the rounded mean of a 2x2
    /// block. A trailing odd row or column is dropped.
    pub fn downsample(&self) -> GrayImage {
        let w = (self.width / 2).max(1);
        let h = (self.height / 2).max(1);
        GrayImage::from_fn(w, h, |x, y| {
            let (sx, sy) = (2 * x as i32, 2 * y as i32);
            let block: u32 = [(0, 0), (1, 0), (0, 1), (1, 1)]
                .iter()
                .map(|&(dx, dy)| self.pixel_clamped(sx + dx, sy + dy) as u32)
                .sum();
            ((block + 2) / 4) as u8
        })
    }
}

impl From<image::GrayImage> for GrayImage {
    fn from(img: image::GrayImage) -> Self {
        let (width, height) = img.dimensions();
        GrayImage::new(img.into_raw(), width, height)
    }
}

impl ImageAccess for GrayImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel(&self, x: u32, y: u32) -> u8 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }
}

/// Bilinear intensity at a sub-pixel location, edge-clamped outside the image.
#[inline]
pub fn sample_bilinear<I: ImageAccess>(image: &I, x: f32, y: f32) -> f32 {
    // Past one pixel outside the image every tap reads the edge, so clamping
    // there keeps the integer taps far from overflow.
    let x = x.clamp(-1.0, image.width() as f32);
    let y = y.clamp(-1.0, image.height() as f32);
    let (fx, fy) = (x.floor(), y.floor());
    let (tx, ty) = (x - fx, y - fy);
    let (ix, iy) = (fx as i32, fy as i32);

    let at = |dx: i32, dy: i32| image.pixel_clamped(ix + dx, iy + dy) as f32;
    let upper = at(0, 0) + (at(1, 0) - at(0, 0)) * tx;
    let lower = at(0, 1) + (at(1, 1) - at(0, 1)) * tx;
    upper + (lower - upper) * ty
}

/// Central-difference gradient `(d/dx, d/dy)` at a sub-pixel location.
#[inline]
pub fn gradient<I: ImageAccess>(image: &I, x: f32, y: f32) -> (f32, f32) {
    let dx = sample_bilinear(image, x + 1.0, y) - sample_bilinear(image, x - 1.0, y);
    let dy = sample_bilinear(image, x, y + 1.0) - sample_bilinear(image, x, y - 1.0);
    (dx * 0.5, dy * 0.5)
}

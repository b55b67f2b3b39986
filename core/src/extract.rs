//! Local feature extraction.
//!
//! The store, matcher and ranker only ever see `Vec<Descriptor>`; which
//! detector produced them is decided by whoever builds the [`Extractor`].

use image::GrayImage;

use crate::descriptor::Descriptor;

/// Turns a preprocessed image into descriptors of a fixed length.
pub trait Extractor: Send + Sync {
    /// Stable name, recorded in store metadata.
    fn name(&self) -> &str;

    /// Length of every descriptor this instance produces.
    fn dimension(&self) -> usize;

    /// May return no descriptors (blank or tiny images).
    fn extract(&self, image: &GrayImage) -> Vec<Descriptor>;
}

const CELLS: usize = 4;
const BINS: usize = 8;
const CLIP: f32 = 0.2;

/// Dense grid of SIFT-style gradient orientation histograms.
///
/// Every `stride` pixels a `cell_size * 4` square patch is split into 4x4
/// cells, each contributing an 8-bin histogram of gradient orientations
/// weighted by magnitude, giving 128 components. Patches whose mean gradient
/// magnitude is below `min_contrast` are dropped.
#[derive(Debug, Clone)]
pub struct GradientGridExtractor {
    pub cell_size: u32,
    pub stride: u32,
    pub min_contrast: f32,
}

impl Default for GradientGridExtractor {
    fn default() -> Self {
        Self { cell_size: 4, stride: 8, min_contrast: 4.0 }
    }
}

impl GradientGridExtractor {
    fn patch_size(&self) -> u32 {
        self.cell_size * CELLS as u32
    }

    fn describe(&self, grads: &Gradients, x0: u32, y0: u32) -> Option<Descriptor> {
        let mut hist = vec![0.0f32; CELLS * CELLS * BINS];
        let mut energy = 0.0f32;
        let patch = self.patch_size();
        for py in 0..patch {
            for px in 0..patch {
                let (mag, angle) = grads.at(x0 + px, y0 + py);
                energy += mag;
                let cell = (py / self.cell_size) as usize * CELLS + (px / self.cell_size) as usize;
                let bin = ((angle / std::f32::consts::TAU * BINS as f32) as usize).min(BINS - 1);
                hist[cell * BINS + bin] += mag;
            }
        }
        if energy / ((patch * patch) as f32) < self.min_contrast {
            return None;
        }
        normalize(&mut hist)?;
        for h in hist.iter_mut() {
            *h = h.min(CLIP);
        }
        normalize(&mut hist)?;
        Some(hist)
    }
}

impl Extractor for GradientGridExtractor {
    fn name(&self) -> &str {
        "gradient-grid-128"
    }

    fn dimension(&self) -> usize {
        CELLS * CELLS * BINS
    }

    fn extract(&self, image: &GrayImage) -> Vec<Descriptor> {
        let (w, h) = image.dimensions();
        let patch = self.patch_size();
        if w < patch || h < patch || self.stride == 0 {
            return Vec::new();
        }
        let grads = Gradients::new(image);
        let mut out = Vec::new();
        let mut y = 0;
        while y + patch <= h {
            let mut x = 0;
            while x + patch <= w {
                if let Some(d) = self.describe(&grads, x, y) {
                    out.push(d);
                }
                x += self.stride;
            }
            y += self.stride;
        }
        out
    }
}

fn normalize(v: &mut [f32]) -> Option<()> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return None;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Some(())
}

/// Central-difference gradient magnitude and orientation in `[0, TAU)`.
struct Gradients {
    width: u32,
    mag: Vec<f32>,
    angle: Vec<f32>,
}

impl Gradients {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = img.dimensions();
        let px = |x: i64, y: i64| -> f32 {
            let cx = x.clamp(0, w as i64 - 1) as u32;
            let cy = y.clamp(0, h as i64 - 1) as u32;
            img.get_pixel(cx, cy)[0] as f32
        };
        let n = (w * h) as usize;
        let mut mag = Vec::with_capacity(n);
        let mut angle = Vec::with_capacity(n);
        for y in 0..h as i64 {
            for x in 0..w as i64 {
                let gx = px(x + 1, y) - px(x - 1, y);
                let gy = px(x, y + 1) - px(x, y - 1);
                mag.push((gx * gx + gy * gy).sqrt());
                let mut a = gy.atan2(gx);
                if a < 0.0 {
                    a += std::f32::consts::TAU;
                }
                angle.push(a);
            }
        }
        Self { width: w, mag, angle }
    }

    #[inline]
    fn at(&self, x: u32, y: u32) -> (f32, f32) {
        let i = (y * self.width + x) as usize;
        (self.mag[i], self.angle[i])
    }
}

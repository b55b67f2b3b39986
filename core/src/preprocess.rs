//! Decoding and normalisation applied to every image before extraction:
//! grayscale, denoise, then contrast-limited adaptive histogram equalisation
//! (CLAHE).

use std::path::Path;

use image::{DynamicImage, GrayImage, Luma};

use crate::config::{BlurMethod, PreprocessConfig};
use crate::error::Result;

const GAUSSIAN_SIGMA: f32 = 1.1;
const MEDIAN_RADIUS: u32 = 2;
const LEVELS: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    pub blur: BlurMethod,
    pub clip_limit: f32,
    pub tile_grid: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::from_config(&PreprocessConfig::default())
    }
}

impl Preprocessor {
    pub fn from_config(config: &PreprocessConfig) -> Self {
        Self { blur: config.blur, clip_limit: config.clip_limit, tile_grid: config.tile_grid }
    }

    pub fn from_path(&self, path: &Path) -> Result<GrayImage> {
        let img = image::open(path)?;
        Ok(self.normalize(img))
    }

    pub fn from_bytes(&self, bytes: &[u8]) -> Result<GrayImage> {
        let img = image::load_from_memory(bytes)?;
        Ok(self.normalize(img))
    }

    pub fn normalize(&self, img: DynamicImage) -> GrayImage {
        let gray = img.to_luma8();
        let gray = match self.blur {
            BlurMethod::Gaussian => image::imageops::blur(&gray, GAUSSIAN_SIGMA),
            BlurMethod::Median => median_filter(&gray, MEDIAN_RADIUS),
            BlurMethod::None => gray,
        };
        clahe(&gray, self.clip_limit, self.tile_grid)
    }
}

fn median_filter(src: &GrayImage, radius: u32) -> GrayImage {
    let (w, h) = src.dimensions();
    let r = radius as i64;
    let mut window: Vec<u8> = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
    GrayImage::from_fn(w, h, |x, y| {
        window.clear();
        for dy in -r..=r {
            for dx in -r..=r {
                let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                window.push(src.get_pixel(sx, sy)[0]);
            }
        }
        window.sort_unstable();
        Luma([window[window.len() / 2]])
    })
}

/// Contrast-limited adaptive histogram equalisation.
///
/// The image is split into a `grid` x `grid` layout of tiles (fewer when the
/// image is smaller than that). Each tile gets its own equalisation table,
/// built from a histogram clipped at `clip_limit` times the mean bin height
/// with the excess spread evenly over all bins. Output pixels blend the
/// tables of the four nearest tile centres bilinearly.
fn clahe(src: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let tiles_x = grid.clamp(1, w);
    let tiles_y = grid.clamp(1, h);
    let bounds = |i: u32, tiles: u32, len: u32| (i * len / tiles, (i + 1) * len / tiles);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        let (y0, y1) = bounds(ty, tiles_y, h);
        for tx in 0..tiles_x {
            let (x0, x1) = bounds(tx, tiles_x, w);
            let mut hist = [0u32; LEVELS];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[src.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            luts.push(tile_lut(&mut hist, area, clip_limit));
        }
    }

    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;
    let lut = |tx: u32, ty: u32, v: u8| luts[(ty * tiles_x + tx) as usize][v as usize] as f32;
    GrayImage::from_fn(w, h, |x, y| {
        let (tx1, tx2, xa) = neighbours(x, tile_w, tiles_x);
        let (ty1, ty2, ya) = neighbours(y, tile_h, tiles_y);
        let v = src.get_pixel(x, y)[0];
        let top = lut(tx1, ty1, v) * (1.0 - xa) + lut(tx2, ty1, v) * xa;
        let bottom = lut(tx1, ty2, v) * (1.0 - xa) + lut(tx2, ty2, v) * xa;
        Luma([(top * (1.0 - ya) + bottom * ya).round().clamp(0.0, 255.0) as u8])
    })
}

/// The two tiles whose centres bracket `pos` and the weight of the second.
fn neighbours(pos: u32, tile: f32, tiles: u32) -> (u32, u32, f32) {
    let t = (pos as f32 + 0.5) / tile - 0.5;
    let lower = t.floor();
    let weight = t - lower;
    let last = tiles as i64 - 1;
    let first = (lower as i64).clamp(0, last) as u32;
    let second = (lower as i64 + 1).clamp(0, last) as u32;
    (first, second, weight)
}

fn tile_lut(hist: &mut [u32; LEVELS], area: u32, clip_limit: f32) -> [u8; LEVELS] {
    let clip = ((clip_limit * area as f32 / LEVELS as f32) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let batch = excess / LEVELS as u32;
    let residual = (excess % LEVELS as u32) as usize;
    for bin in hist.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (LEVELS / residual).max(1);
        for bin in hist.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; LEVELS];
    let mut acc = 0u32;
    for (slot, count) in lut.iter_mut().zip(hist.iter()) {
        acc += count;
        *slot = (acc as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

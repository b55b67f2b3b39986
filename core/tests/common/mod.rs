#![allow(dead_code)]

use image::{GrayImage, Luma};
use simcore::Descriptor;
use std::path::Path;

pub const DIM: usize = 32;

/// `scale * e_i`, plus `0.05 * e_{i+1}` when `nudge` is set.
pub fn axis(i: usize, nudge: bool) -> Descriptor {
    let mut v = vec![0.0f32; DIM];
    v[i] = 10.0;
    if nudge {
        v[(i + 1) % DIM] = 0.05;
    }
    v
}

/// Query of 30 axis vectors; any set holding nudged copies of the first `n`
/// scores exactly `n` against it.
pub fn query() -> Vec<Descriptor> {
    (0..30).map(|i| axis(i, false)).collect()
}

pub fn shared(n: usize) -> Vec<Descriptor> {
    (0..n).map(|i| axis(i, true)).collect()
}

/// Two vectors equidistant from every query vector.
pub fn unrelated() -> Vec<Descriptor> {
    vec![axis(30, false), axis(31, false)]
}

pub fn noise_image(w: u32, h: u32, seed: u32) -> GrayImage {
    let mut s = seed;
    GrayImage::from_fn(w, h, |_, _| {
        s = s.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        Luma([(s >> 24) as u8])
    })
}

pub fn write_noise_png(path: &Path, seed: u32) {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }
    noise_image(64, 64, seed).save(path).unwrap();
}

pub fn write_blank_png(path: &Path) {
    GrayImage::from_pixel(64, 64, Luma([200])).save(path).unwrap();
}

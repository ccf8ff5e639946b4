//! Phash module - Perceptual image fingerprinting
//!
//! Part of stage S5. Resizes an image to a fixed 32x32 grayscale matrix,
//! applies a separable 2D type-II DCT, and folds the low-frequency 8x8
//! block into a 64-bit hash whose Hamming distance approximates visual
//! similarity. Every step is fully deterministic — same pixels in, same
//! hash out, regardless of platform.

use std::f64::consts::PI;
use std::path::Path;

use image::imageops::FilterType;
use image::GenericImageView;

use crate::error::{Result, TagmetryError};

const MATRIX_SIZE: usize = 32;
const BLOCK_SIZE: usize = 8;

/// A 64-bit perceptual hash. The DC bit (row 0, col 0 of the 8x8 block) is
/// always forced to zero, since it carries average brightness rather than
/// structure and would otherwise dominate Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    pub fn hamming_distance(self, other: PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Computes the perceptual hash of the image at `path`.
///
/// The image is stretched (not letterboxed) to 32x32 using a bicubic
/// (Catmull-Rom) filter, converted to grayscale, DCT-transformed, and
/// folded into the top-left 8x8 frequency block.
pub fn compute_phash(path: &Path) -> Result<PerceptualHash> {
    if !path.exists() {
        return Err(TagmetryError::ImageFileMissing {
            message: format!("{} no longer exists", path.display()),
        });
    }
    let img = image::open(path)?;
    Ok(phash_from_image(&img))
}

fn phash_from_image(img: &image::DynamicImage) -> PerceptualHash {
    let resized = img.resize_exact(MATRIX_SIZE as u32, MATRIX_SIZE as u32, FilterType::CatmullRom);
    let gray = resized.grayscale();

    let mut matrix = [[0f64; MATRIX_SIZE]; MATRIX_SIZE];
    for y in 0..MATRIX_SIZE {
        for x in 0..MATRIX_SIZE {
            let pixel = gray.get_pixel(x as u32, y as u32);
            matrix[y][x] = pixel.0[0] as f64;
        }
    }

    let dct = dct_2d(&matrix);
    hash_from_dct(&dct)
}

/// Separable 2D type-II DCT with orthonormal scaling, applied to rows then
/// columns.
fn dct_2d(matrix: &[[f64; MATRIX_SIZE]; MATRIX_SIZE]) -> [[f64; MATRIX_SIZE]; MATRIX_SIZE] {
    let mut after_rows = [[0f64; MATRIX_SIZE]; MATRIX_SIZE];
    for y in 0..MATRIX_SIZE {
        after_rows[y] = dct_1d(&matrix[y]);
    }

    let mut result = [[0f64; MATRIX_SIZE]; MATRIX_SIZE];
    for x in 0..MATRIX_SIZE {
        let column: [f64; MATRIX_SIZE] = std::array::from_fn(|y| after_rows[y][x]);
        let transformed = dct_1d(&column);
        for y in 0..MATRIX_SIZE {
            result[y][x] = transformed[y];
        }
    }
    result
}

/// Orthonormal 1D type-II DCT: `alpha(0) = sqrt(1/N)`, `alpha(u) = sqrt(2/N)`
/// otherwise.
fn dct_1d(input: &[f64; MATRIX_SIZE]) -> [f64; MATRIX_SIZE] {
    let n = MATRIX_SIZE as f64;
    let mut output = [0f64; MATRIX_SIZE];
    for u in 0..MATRIX_SIZE {
        let alpha = if u == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        let mut sum = 0.0;
        for (x, &value) in input.iter().enumerate() {
            let angle = PI * (2.0 * x as f64 + 1.0) * u as f64 / (2.0 * n);
            sum += value * angle.cos();
        }
        output[u] = alpha * sum;
    }
    output
}

/// Takes the top-left 8x8 block, computes the median of the 63 non-DC
/// coefficients, and sets each bit iff its coefficient exceeds that median.
/// Bits are assigned in row-major order; the DC bit is always zero.
fn hash_from_dct(dct: &[[f64; MATRIX_SIZE]; MATRIX_SIZE]) -> PerceptualHash {
    let mut block = Vec::with_capacity(BLOCK_SIZE * BLOCK_SIZE);
    for y in 0..BLOCK_SIZE {
        for x in 0..BLOCK_SIZE {
            block.push(dct[y][x]);
        }
    }

    let mut non_dc: Vec<f64> = block.iter().skip(1).copied().collect();
    non_dc.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = median_of_sorted(&non_dc);

    let mut hash: u64 = 0;
    for (i, &value) in block.iter().enumerate() {
        if i == 0 {
            continue;
        }
        if value > median {
            hash |= 1u64 << (63 - i);
        }
    }
    PerceptualHash(hash)
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn solid(width: u32, height: u32, r: u8, g: u8, b: u8) -> DynamicImage {
        let mut img = RgbImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = image::Rgb([r, g, b]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn identical_solid_images_hash_identically() {
        let a = phash_from_image(&solid(64, 64, 120, 120, 120));
        let b = phash_from_image(&solid(64, 64, 120, 120, 120));
        assert_eq!(a.hamming_distance(b), 0);
    }

    #[test]
    fn dc_bit_is_always_zero() {
        let hash = phash_from_image(&solid(64, 64, 200, 10, 10));
        assert_eq!(hash.0 & (1u64 << 63), 0);
    }

    #[test]
    fn very_different_images_have_nonzero_distance() {
        let mut checker = RgbImage::new(64, 64);
        for (x, y, pixel) in checker.enumerate_pixels_mut() {
            let on = (x / 8 + y / 8) % 2 == 0;
            *pixel = if on { image::Rgb([255, 255, 255]) } else { image::Rgb([0, 0, 0]) };
        }
        let a = phash_from_image(&DynamicImage::ImageRgb8(checker));
        let b = phash_from_image(&solid(64, 64, 128, 128, 128));
        assert!(a.hamming_distance(b) > 0);
    }

    #[test]
    fn median_of_sorted_handles_even_and_odd() {
        assert_eq!(median_of_sorted(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(median_of_sorted(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median_of_sorted(&[]), 0.0);
    }
}

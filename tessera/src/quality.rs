use average::{Estimate, Mean};
use tessera_core::image::{DynamicImage, GrayImage};
use tessera_core::{Error, Result};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Returned by [`psnr`] for identical images, whose error is exactly zero.
pub const PSNR_IDENTICAL: f64 = 100.0;

const SSIM_WINDOW: u32 = 11;
const SSIM_STRIDE: u32 = 5;
/// `(0.01 * 255)^2`
const SSIM_C1: f64 = 6.5025;
/// `(0.03 * 255)^2`
const SSIM_C2: f64 = 58.5225;

/// Figures describing one reconstruction.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QualityMetrics {
    /// Peak signal to noise ratio in dB.
    pub psnr: f64,
    /// Structural similarity in `[0, 1]` for natural images.
    pub ssim: f64,
    pub processing_seconds: f64,
    /// Growth of the resident set over the run in bytes, zero where it cannot be measured.
    pub memory_delta_bytes: u64,
    /// Points in the filtered dense cloud.
    pub point_count: usize,
    pub triangle_count: usize,
    /// Side of the square texture atlas, zero without a texture.
    pub texture_resolution: u32,
    /// Soft conditions met during the run.
    pub warnings: Vec<String>,
}

fn check_dimensions(a: &GrayImage, b: &GrayImage) -> Result<()> {
    if a.dimensions() != b.dimensions() {
        return Err(Error::SizeMismatch {
            expected: a.dimensions(),
            actual: b.dimensions(),
        });
    }
    if a.width() == 0 || a.height() == 0 {
        return Err(Error::InsufficientData {
            stage: "quality evaluation",
            required: 1,
            found: 0,
        });
    }
    Ok(())
}

/// Peak signal to noise ratio of two equally sized 8-bit images.
///
/// ```
/// use tessera::quality::psnr;
/// use tessera::image::{GrayImage, Luma};
///
/// let a = GrayImage::from_pixel(8, 8, Luma([10]));
/// let b = GrayImage::from_pixel(8, 8, Luma([20]));
/// assert_eq!(psnr(&a, &a).unwrap(), 100.0);
/// assert!((psnr(&a, &b).unwrap() - 28.13).abs() < 0.01);
/// ```
pub fn psnr(a: &GrayImage, b: &GrayImage) -> Result<f64> {
    check_dimensions(a, b)?;
    let mse: Mean = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| (f64::from(pa.0[0]) - f64::from(pb.0[0])).powi(2))
        .collect();
    let mse = mse.mean();
    if mse == 0.0 {
        return Ok(PSNR_IDENTICAL);
    }
    Ok(10.0 * (255.0 * 255.0 / mse).log10())
}

/// Structural similarity of two equally sized 8-bit images, averaged over 11x11 windows placed
/// every 5 pixels. Images smaller than a window are compared as a single window.
pub fn ssim(a: &GrayImage, b: &GrayImage) -> Result<f64> {
    check_dimensions(a, b)?;
    let (width, height) = a.dimensions();
    let window_w = SSIM_WINDOW.min(width);
    let window_h = SSIM_WINDOW.min(height);
    let mut mean = Mean::new();
    for y in (0..=height - window_h).step_by(SSIM_STRIDE as usize) {
        for x in (0..=width - window_w).step_by(SSIM_STRIDE as usize) {
            mean.add(window_ssim(a, b, x, y, window_w, window_h));
        }
    }
    Ok(mean.mean())
}

fn window_ssim(a: &GrayImage, b: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> f64 {
    let n = f64::from(w * h);
    let (mut sa, mut sb, mut saa, mut sbb, mut sab) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let va = f64::from(a.get_pixel(x, y).0[0]);
            let vb = f64::from(b.get_pixel(x, y).0[0]);
            sa += va;
            sb += vb;
            saa += va * va;
            sbb += vb * vb;
            sab += va * vb;
        }
    }
    let (mu_a, mu_b) = (sa / n, sb / n);
    let var_a = (saa / n - mu_a * mu_a).max(0.0);
    let var_b = (sbb / n - mu_b * mu_b).max(0.0);
    let covariance = sab / n - mu_a * mu_b;
    ((2.0 * mu_a * mu_b + SSIM_C1) * (2.0 * covariance + SSIM_C2))
        / ((mu_a * mu_a + mu_b * mu_b + SSIM_C1) * (var_a + var_b + SSIM_C2))
}

/// PSNR and SSIM of two images compared in luma.
pub fn evaluate(reference: &DynamicImage, derived: &DynamicImage) -> Result<(f64, f64)> {
    let (a, b) = (reference.to_luma8(), derived.to_luma8());
    Ok((psnr(&a, &b)?, ssim(&a, &b)?))
}

/// Mean PSNR and SSIM over every pair of adjacent images.
pub fn evaluate_sequence(images: &[DynamicImage]) -> Result<(f64, f64)> {
    let luma: Vec<GrayImage> = images.iter().map(DynamicImage::to_luma8).collect();
    let mut psnr_mean = Mean::new();
    let mut ssim_mean = Mean::new();
    for pair in luma.windows(2) {
        psnr_mean.add(psnr(&pair[0], &pair[1])?);
        ssim_mean.add(ssim(&pair[0], &pair[1])?);
    }
    if psnr_mean.is_empty() {
        return Err(Error::InsufficientData {
            stage: "quality evaluation",
            required: 2,
            found: images.len(),
        });
    }
    Ok((psnr_mean.mean(), ssim_mean.mean()))
}

/// Resident set size of this process in bytes, where the platform exposes it.
pub fn resident_memory() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

use crate::extrema::parabola_peak;
use crate::Sift;
use std::f32::consts::TAU;
use tessera_core::{Descriptor, GrayFloatImage, DESCRIPTOR_LEN};

/// Side of the descriptor grid in cells.
const CELLS: usize = 4;
/// Samples per cell side.
const CELL_SAMPLES: usize = 4;
const ORIENTATION_BINS: usize = 8;
/// No component of a normalized descriptor may exceed this before renormalization.
const CLAMP: f32 = 0.2;

impl Sift {
    /// The dominant gradient orientation around `(x, y)` in radians in `[0, 2π)`.
    ///
    /// Gradients in a square window of `orientation_window` pixels are accumulated into
    /// `orientation_bins` bins weighted by magnitude and a Gaussian falloff. The peak bin is refined
    /// with a parabola through its neighbors.
    pub fn dominant_orientation(&self, image: &GrayFloatImage, x: f32, y: f32) -> f32 {
        let bins = self.orientation_bins.max(1);
        let mut histogram = vec![0f32; bins];
        let radius = (self.orientation_window / 2) as isize;
        let weight_sigma = (radius as f32 / 2.0).max(1.0);
        let (cx, cy) = (x.round() as isize, y.round() as isize);
        for j in -radius..radius {
            for i in -radius..radius {
                let (px, py) = (cx + i, cy + j);
                let gx = image.get_clamped(px + 1, py) - image.get_clamped(px - 1, py);
                let gy = image.get_clamped(px, py + 1) - image.get_clamped(px, py - 1);
                let magnitude = gx.hypot(gy);
                if magnitude == 0.0 {
                    continue;
                }
                let weight =
                    (-((i * i + j * j) as f32) / (2.0 * weight_sigma * weight_sigma)).exp();
                let angle = gy.atan2(gx).rem_euclid(TAU);
                let bin = (angle / TAU * bins as f32).round() as usize % bins;
                histogram[bin] += weight * magnitude;
            }
        }
        let (peak, &peak_value) = histogram
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap_or((0, &0.0));
        if peak_value <= 0.0 {
            return 0.0;
        }
        let offset = parabola_peak(
            histogram[(peak + bins - 1) % bins],
            peak_value,
            histogram[(peak + 1) % bins],
        );
        ((peak as f32 + offset) / bins as f32 * TAU).rem_euclid(TAU)
    }

    /// Builds the 4x4x8 gradient histogram descriptor of the patch centered on `(x, y)`.
    ///
    /// Samples are taken on a 16x16 grid with a spacing of `spacing` pixels rotated by `angle`,
    /// and the gradients are expressed in that rotated frame so the result does not depend on the
    /// orientation of the patch in the image.
    pub fn descriptor(
        &self,
        image: &GrayFloatImage,
        x: f32,
        y: f32,
        spacing: f32,
        angle: f32,
    ) -> Descriptor {
        let side = CELLS * CELL_SAMPLES;
        let center = (side as f32 - 1.0) / 2.0;
        let weight_sigma = side as f32 / 2.0;
        let (sin, cos) = angle.sin_cos();
        let mut values = [0f32; DESCRIPTOR_LEN];
        for j in 0..side {
            for i in 0..side {
                let u = (i as f32 - center) * spacing;
                let v = (j as f32 - center) * spacing;
                let sx = x + cos * u - sin * v;
                let sy = y + sin * u + cos * v;
                let gx = image.sample(sx + 1.0, sy) - image.sample(sx - 1.0, sy);
                let gy = image.sample(sx, sy + 1.0) - image.sample(sx, sy - 1.0);
                let rx = cos * gx + sin * gy;
                let ry = -sin * gx + cos * gy;
                let magnitude = rx.hypot(ry);
                if magnitude == 0.0 {
                    continue;
                }
                let (di, dj) = (i as f32 - center, j as f32 - center);
                let weight = (-(di * di + dj * dj) / (2.0 * weight_sigma * weight_sigma)).exp();
                let bin = ry.atan2(rx).rem_euclid(TAU) / TAU * ORIENTATION_BINS as f32;
                let lower = bin.floor();
                let fraction = bin - lower;
                let o0 = lower as usize % ORIENTATION_BINS;
                let o1 = (o0 + 1) % ORIENTATION_BINS;
                let cell = (j / CELL_SAMPLES) * CELLS + i / CELL_SAMPLES;
                values[cell * ORIENTATION_BINS + o0] += weight * magnitude * (1.0 - fraction);
                values[cell * ORIENTATION_BINS + o1] += weight * magnitude * fraction;
            }
        }
        normalize_descriptor(values)
    }
}

/// L2-normalizes, clamps every component to [`CLAMP`] and normalizes again.
///
/// A patch without any gradient has no direction to normalize, so it gets the uniform descriptor.
pub fn normalize_descriptor(mut values: [f32; DESCRIPTOR_LEN]) -> Descriptor {
    let uniform = Descriptor([(DESCRIPTOR_LEN as f32).sqrt().recip(); DESCRIPTOR_LEN]);
    let norm = Descriptor(values).norm();
    if norm <= f32::EPSILON {
        return uniform;
    }
    for value in values.iter_mut() {
        *value = (*value / norm).min(CLAMP);
    }
    let norm = Descriptor(values).norm();
    if norm <= f32::EPSILON {
        return uniform;
    }
    for value in values.iter_mut() {
        *value /= norm;
    }
    Descriptor(values)
}

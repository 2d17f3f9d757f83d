use log::*;
use tessera_core::{Error, GrayFloatImage, Result};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Per-pixel disparities of the left image of a rectified pair. `None` marks pixels without a
/// reliable match.
#[derive(Debug, Clone, PartialEq)]
pub struct DisparityMap {
    pub width: usize,
    pub height: usize,
    pub data: Vec<Option<f32>>,
}

impl DisparityMap {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![None; width * height],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        self.data[y * self.width + x]
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|d| d.is_some()).count()
    }
}

/// Fixed window sum of squared differences block matching along image rows.
///
/// For every left pixel the right image is searched at `x - d` for `d` in
/// `min_disparity..=max_disparity`, and the disparity with the lowest cost wins. A match is
/// rejected when its window has no texture, when the winner is zero or touches the end of the
/// range, or when another disparity more than one step away scores almost as well.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockMatcher {
    /// Side of the square window. Odd.
    pub window: usize,
    pub min_disparity: usize,
    pub max_disparity: usize,
    /// The winning cost must not exceed this fraction of the lowest cost more than one step away.
    pub uniqueness_ratio: f32,
    /// Minimum intensity variance inside the left window.
    pub min_texture: f32,
}

impl Default for BlockMatcher {
    fn default() -> Self {
        Self {
            window: 7,
            min_disparity: 0,
            max_disparity: 64,
            uniqueness_ratio: 0.95,
            min_texture: 1e-5,
        }
    }
}

impl BlockMatcher {
    pub fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub fn window(self, window: usize) -> Self {
        Self {
            window: window | 1,
            ..self
        }
    }

    #[must_use]
    pub fn disparity_range(self, min_disparity: usize, max_disparity: usize) -> Self {
        Self {
            min_disparity,
            max_disparity: max_disparity.max(min_disparity),
            ..self
        }
    }

    #[must_use]
    pub fn uniqueness_ratio(self, uniqueness_ratio: f32) -> Self {
        Self {
            uniqueness_ratio,
            ..self
        }
    }

    /// Computes the disparity of every left pixel. Fails if the images differ in size.
    pub fn compute(&self, left: &GrayFloatImage, right: &GrayFloatImage) -> Result<DisparityMap> {
        if left.dimensions() != right.dimensions() {
            return Err(Error::SizeMismatch {
                expected: left.dimensions(),
                actual: right.dimensions(),
            });
        }
        let (width, height) = (left.width(), left.height());
        let mut disparity = DisparityMap::new(width, height);
        if width == 0 || height == 0 {
            return Ok(disparity);
        }
        debug!(
            "Block matching {}x{} with a {}x{} window over disparities {}..={}",
            width, height, self.window, self.window, self.min_disparity, self.max_disparity
        );

        let match_row = |(y, row): (usize, &mut [Option<f32>])| {
            for (x, out) in row.iter_mut().enumerate() {
                *out = self.best_disparity(left, right, x, y);
            }
        };
        #[cfg(not(feature = "rayon"))]
        disparity
            .data
            .chunks_mut(width)
            .enumerate()
            .for_each(match_row);
        #[cfg(feature = "rayon")]
        disparity
            .data
            .par_chunks_mut(width)
            .enumerate()
            .for_each(match_row);

        info!(
            "Block matching found {} of {} disparities",
            disparity.valid_count(),
            width * height
        );
        Ok(disparity)
    }

    fn best_disparity(
        &self,
        left: &GrayFloatImage,
        right: &GrayFloatImage,
        x: usize,
        y: usize,
    ) -> Option<f32> {
        let half = self.window / 2;
        let (width, height) = (left.width(), left.height());
        if x < half || y < half || x + half >= width || y + half >= height {
            return None;
        }
        if self.texture(left, x, y) < self.min_texture {
            return None;
        }
        // Keep every right-image access inside the image.
        let max = self.max_disparity.min(x - half);
        if self.min_disparity > max {
            return None;
        }
        let costs: Vec<f32> = (self.min_disparity..=max)
            .map(|d| self.ssd(left, right, x, y, d))
            .collect();
        let (best_ix, best) = costs
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::INFINITY), |acc, (ix, cost)| {
                if cost < acc.1 {
                    (ix, cost)
                } else {
                    acc
                }
            });
        let second = costs
            .iter()
            .enumerate()
            .filter(|&(ix, _)| ix + 1 < best_ix || ix > best_ix + 1)
            .map(|(_, &cost)| cost)
            .fold(f32::INFINITY, f32::min);
        if best > self.uniqueness_ratio * second {
            trace!("Ambiguous disparity at ({}, {})", x, y);
            return None;
        }
        let d = self.min_disparity + best_ix;
        // The true minimum may lie beyond an end of the searched range.
        if d == 0 || best_ix == 0 || best_ix + 1 == costs.len() {
            return None;
        }
        let offset = parabola_offset(costs[best_ix - 1], best, costs[best_ix + 1]);
        Some(d as f32 + offset)
    }

    fn ssd(
        &self,
        left: &GrayFloatImage,
        right: &GrayFloatImage,
        x: usize,
        y: usize,
        d: usize,
    ) -> f32 {
        let half = self.window / 2;
        let mut cost = 0.0;
        for wy in y - half..=y + half {
            for wx in x - half..=x + half {
                let delta = left.get(wx, wy) - right.get(wx - d, wy);
                cost += delta * delta;
            }
        }
        cost
    }

    fn texture(&self, image: &GrayFloatImage, x: usize, y: usize) -> f32 {
        let half = self.window / 2;
        let n = (self.window * self.window) as f32;
        let (mut sum, mut sum_sq) = (0.0, 0.0);
        for wy in y - half..=y + half {
            for wx in x - half..=x + half {
                let v = image.get(wx, wy);
                sum += v;
                sum_sq += v * v;
            }
        }
        let mean = sum / n;
        sum_sq / n - mean * mean
    }
}

/// Sub-step offset of the minimum of the parabola through three equally spaced costs.
fn parabola_offset(before: f32, at: f32, after: f32) -> f32 {
    let curvature = before - 2.0 * at + after;
    if curvature <= f32::EPSILON {
        return 0.0;
    }
    (0.5 * (before - after) / curvature).clamp(-0.5, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A random-looking texture and the same texture shifted right by `shift` pixels.
    fn pair(shift: usize) -> (GrayFloatImage, GrayFloatImage) {
        let texture = |x: usize, y: usize| {
            let h = (x as u32).wrapping_mul(73_856_093) ^ (y as u32).wrapping_mul(19_349_663);
            (h % 1000) as f32 / 1000.0
        };
        let (width, height) = (96, 40);
        let mut left = GrayFloatImage::new(width, height);
        let mut right = GrayFloatImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                left.put(x, y, texture(x + 100, y));
                right.put(x, y, texture(x + 100 + shift, y));
            }
        }
        (left, right)
    }

    #[test]
    fn recovers_a_constant_shift() {
        let (left, right) = pair(9);
        let disparity = BlockMatcher::new()
            .disparity_range(0, 20)
            .compute(&left, &right)
            .unwrap();
        assert!(disparity.valid_count() > 1000);
        assert!(disparity
            .data
            .iter()
            .flatten()
            .all(|&d| (d - 9.0).abs() < 0.5));
    }

    #[test]
    fn flat_images_have_no_disparity() {
        let left = GrayFloatImage::new(40, 30);
        let disparity = BlockMatcher::new().compute(&left, &left).unwrap();
        assert_eq!(disparity.valid_count(), 0);
    }

    #[test]
    fn identical_images_give_zero_which_is_invalid() {
        let (left, _) = pair(0);
        let disparity = BlockMatcher::new().compute(&left, &left).unwrap();
        assert_eq!(disparity.valid_count(), 0);
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let a = GrayFloatImage::new(10, 10);
        let b = GrayFloatImage::new(12, 10);
        assert!(matches!(
            BlockMatcher::new().compute(&a, &b),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn parabola_offset_is_bounded() {
        assert_eq!(parabola_offset(1.0, 0.0, 1.0), 0.0);
        assert!((parabola_offset(2.0, 0.0, 1.0) - (0.5 / 3.0)).abs() < 1e-6);
        assert_eq!(parabola_offset(1.0, 1.0, 1.0), 0.0);
    }
}

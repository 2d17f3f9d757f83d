use crate::scale_space::ScaleSpace;
use crate::Sift;
use log::*;
use tessera_core::GrayFloatImage;

/// A location in the scale space that still needs an orientation and a descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub octave: usize,
    /// Index of the blurred level the descriptor is sampled from.
    pub level: usize,
    /// Position in octave pixels.
    pub x: f32,
    pub y: f32,
    pub response: f32,
}

/// Offset of the vertex of the parabola through `(-1, a)`, `(0, b)` and `(1, c)`.
pub(crate) fn parabola_peak(a: f32, b: f32, c: f32) -> f32 {
    let denominator = a - 2.0 * b + c;
    if denominator.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (a - c) / denominator).clamp(-0.5, 0.5)
}

fn is_extremum(dogs: &[GrayFloatImage], d: usize, x: usize, y: usize, value: f32) -> bool {
    let maximum = value > 0.0;
    for (layer, image) in dogs[d - 1..=d + 1].iter().enumerate() {
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if layer == 1 && nx == x && ny == y {
                    continue;
                }
                let neighbor = image.get(nx, ny);
                if (maximum && neighbor >= value) || (!maximum && neighbor <= value) {
                    return false;
                }
            }
        }
    }
    true
}

impl Sift {
    /// Finds strict local extrema of the difference of Gaussians among their 26 neighbors in
    /// `(x, y, scale)` whose magnitude reaches the response threshold.
    pub fn find_extrema(&self, space: &ScaleSpace) -> Vec<Candidate> {
        let mut candidates = vec![];
        for octave in &space.octaves {
            let dogs = &octave.dogs;
            let (width, height) = (dogs[0].width(), dogs[0].height());
            if dogs.len() < 3 || width < 3 || height < 3 {
                continue;
            }
            for d in 1..dogs.len() - 1 {
                let before = candidates.len();
                let current = &dogs[d];
                for y in 1..height - 1 {
                    for x in 1..width - 1 {
                        let value = current.get(x, y);
                        if value.abs() < self.threshold || !is_extremum(dogs, d, x, y, value) {
                            continue;
                        }
                        let dx = parabola_peak(
                            current.get(x - 1, y),
                            value,
                            current.get(x + 1, y),
                        );
                        let dy = parabola_peak(
                            current.get(x, y - 1),
                            value,
                            current.get(x, y + 1),
                        );
                        candidates.push(Candidate {
                            octave: octave.index,
                            level: d,
                            x: x as f32 + dx,
                            y: y as f32 + dy,
                            response: value,
                        });
                    }
                }
                trace!(
                    "Octave {} difference {} produced {} extrema",
                    octave.index,
                    d,
                    candidates.len() - before
                );
            }
        }
        debug!("Found {} scale space extrema", candidates.len());
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parabola_vertex() {
        assert_relative_eq!(parabola_peak(1.0, 2.0, 1.0), 0.0);
        assert!(parabola_peak(1.0, 2.0, 1.5) > 0.0);
        assert_eq!(parabola_peak(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn bright_blob_is_detected_near_its_center() {
        let mut image = GrayFloatImage::new(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                let r2 = (x as f32 - 32.0).powi(2) + (y as f32 - 32.0).powi(2);
                image.put(x, y, (-r2 / (2.0 * 2.5 * 2.5)).exp());
            }
        }
        let sift = Sift::default();
        let space = sift.build_scale_space(&image);
        let candidates = sift.find_extrema(&space);
        assert!(!candidates.is_empty());
        let strongest = candidates
            .iter()
            .max_by(|a, b| a.response.abs().total_cmp(&b.response.abs()))
            .unwrap();
        let ratio = (1u32 << strongest.octave) as f32;
        assert!((strongest.x * ratio - 32.0).abs() < 2.0 * ratio);
        assert!((strongest.y * ratio - 32.0).abs() < 2.0 * ratio);
    }
}

use crate::Sift;
use log::*;
use tessera_core::{gaussian_blur, GrayFloatImage};

/// Octaves stop once either side of the image would drop below this many pixels.
const MIN_OCTAVE_SIZE: usize = 8;

/// One octave of the Gaussian pyramid.
#[derive(Debug, Clone)]
pub struct Octave {
    pub index: usize,
    /// Blurred copies, level `s` has a blur of `2^(s / scales)` octave pixels.
    pub levels: Vec<GrayFloatImage>,
    /// `dogs[s] = levels[s + 1] - levels[s]`.
    pub dogs: Vec<GrayFloatImage>,
}

impl Octave {
    /// Factor from octave pixels to input pixels.
    pub fn ratio(&self) -> f32 {
        (1u32 << self.index) as f32
    }
}

#[derive(Debug, Clone)]
pub struct ScaleSpace {
    pub octaves: Vec<Octave>,
    pub scales: usize,
}

impl ScaleSpace {
    /// Blur of level `scale` measured in the pixels of its own octave.
    pub fn relative_sigma(&self, scale: usize) -> f32 {
        2f32.powf(scale as f32 / self.scales as f32)
    }

    /// Blur of level `scale` of `octave` measured in input pixels, `2^(octave + scale / scales)`.
    pub fn absolute_sigma(&self, octave: usize, scale: usize) -> f32 {
        2f32.powf(octave as f32 + scale as f32 / self.scales as f32)
    }
}

impl Sift {
    /// Builds `octaves` x `scales` progressively blurred copies of `image` and their
    /// differences. Every level is blurred incrementally from the previous one.
    pub fn build_scale_space(&self, image: &GrayFloatImage) -> ScaleSpace {
        let scales = self.scales.max(2);
        let relative = |s: usize| 2f32.powf(s as f32 / scales as f32);
        let mut octaves: Vec<Octave> = Vec::with_capacity(self.octaves);
        let mut base = image.clone();
        let mut current_sigma = self.assumed_blur;
        for index in 0..self.octaves.max(1) {
            if index > 0 {
                let previous = &octaves[index - 1].levels[scales - 1];
                if previous.width() / 2 < MIN_OCTAVE_SIZE || previous.height() / 2 < MIN_OCTAVE_SIZE
                {
                    debug!("Stopping the pyramid after {} octaves", index);
                    break;
                }
                base = previous.half_size();
                current_sigma = relative(scales - 1) / 2.0;
            }
            let mut levels = Vec::with_capacity(scales);
            for s in 0..scales {
                let target = relative(s);
                let source = levels.last().unwrap_or(&base);
                let increment = (target * target - current_sigma * current_sigma).max(0.0).sqrt();
                trace!(
                    "Octave {} level {} blurred by {} to reach sigma {}",
                    index,
                    s,
                    increment,
                    target
                );
                let blurred = gaussian_blur(source, increment);
                levels.push(blurred);
                current_sigma = target;
            }
            let dogs = levels
                .windows(2)
                .map(|pair| pair[1].difference(&pair[0]))
                .collect();
            debug!(
                "Octave {} is {}x{}",
                index,
                levels[0].width(),
                levels[0].height()
            );
            octaves.push(Octave {
                index,
                levels,
                dogs,
            });
        }
        ScaleSpace { octaves, scales }
    }
}

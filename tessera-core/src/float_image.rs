use derive_more::{Deref, DerefMut};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use ndarray::{azip, s, Array2, ArrayView2};
use wide::f32x4;

type GrayImageBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A single channel image with samples in `[0, 1]`.
///
/// Every stage that reasons about intensities (the scale pyramid, block matching, quality metrics)
/// works on this type. Colour input is reduced to luma once, when it enters the pipeline.
/// The `image` crate is still used for decoding, encoding and colour data.
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct GrayFloatImage(pub GrayImageBuffer);

impl GrayFloatImage {
    /// Create a unit float image from any decoded image.
    pub fn from_dynamic(input_image: &DynamicImage) -> Self {
        Self::from_luma8(&input_image.to_luma8())
    }

    /// Create a unit float image from an 8-bit grayscale image.
    pub fn from_luma8(gray: &GrayImage) -> Self {
        Self(ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([f32::from(gray[(x, y)][0]) / 255.0])
        }))
    }

    /// Converts back into an 8-bit grayscale image, clamping out of range samples.
    pub fn to_luma8(&self) -> GrayImage {
        ImageBuffer::from_fn(self.0.width(), self.0.height(), |x, y| {
            Luma([(self.0[(x, y)][0].clamp(0.0, 1.0) * 255.0).round() as u8])
        })
    }

    pub fn new(width: usize, height: usize) -> Self {
        Self(ImageBuffer::from_pixel(
            width as u32,
            height as u32,
            Luma([0.0]),
        ))
    }

    /// Wraps a row-major buffer. Returns `None` if the buffer does not hold `width * height` samples.
    pub fn from_raw(width: usize, height: usize, data: Vec<f32>) -> Option<Self> {
        ImageBuffer::from_raw(width as u32, height as u32, data).map(Self)
    }

    fn from_array2(arr: Array2<f32>) -> Self {
        let (height, width) = arr.dim();
        let data = if arr.is_standard_layout() {
            arr.into_raw_vec()
        } else {
            arr.iter().copied().collect()
        };
        Self(GrayImageBuffer::from_vec(width as u32, height as u32, data).unwrap_or_else(|| {
            ImageBuffer::from_pixel(width as u32, height as u32, Luma([0.0]))
        }))
    }

    /// Row-major view of the samples with shape `(height, width)`.
    pub fn view(&self) -> ArrayView2<f32> {
        ArrayView2::from_shape((self.height(), self.width()), self.0.as_raw())
            .expect("image buffer always holds width * height samples")
    }

    pub fn width(&self) -> usize {
        self.0.width() as usize
    }

    pub fn height(&self) -> usize {
        self.0.height() as usize
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.0.as_raw()[y * self.width() + x]
    }

    pub fn put(&mut self, x: usize, y: usize, pixel_value: f32) {
        let width = self.width();
        let samples: &mut [f32] = &mut self.0;
        samples[y * width + x] = pixel_value;
    }

    /// Sample with coordinates clamped to the image border.
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width() as isize - 1) as usize;
        let y = y.clamp(0, self.height() as isize - 1) as usize;
        self.get(x, y)
    }

    /// Bilinear sample at a sub-pixel location, clamped to the border.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);
        let top = self.get_clamped(x0, y0) * (1.0 - fx) + self.get_clamped(x0 + 1, y0) * fx;
        let bottom =
            self.get_clamped(x0, y0 + 1) * (1.0 - fx) + self.get_clamped(x0 + 1, y0 + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Pixel-wise `self - other`. Both images must share dimensions.
    pub fn difference(&self, other: &Self) -> Self {
        debug_assert_eq!(self.dimensions(), other.dimensions());
        let data = self
            .0
            .as_raw()
            .iter()
            .zip(other.0.as_raw())
            .map(|(a, b)| a - b)
            .collect();
        Self(
            GrayImageBuffer::from_raw(self.0.width(), self.0.height(), data)
                .unwrap_or_else(|| GrayImageBuffer::new(self.0.width(), self.0.height())),
        )
    }

    /// Downsample by averaging 2x2 tiles. Odd trailing rows and columns are averaged on their own.
    pub fn half_size(&self) -> Self {
        let width = self.width() / 2;
        let height = self.height() / 2;
        let mut half = Array2::zeros((height, width));
        let source = self.view();

        azip!((
            out in &mut half,
            window in source.slice(s![..height * 2, ..width * 2]).exact_chunks((2, 2)),
        ) {
            *out = window.sum() * 0.25;
        });

        if height * 2 != self.height() && height > 0 {
            azip!((
                out in half.slice_mut(s![-1.., ..]),
                window in source.slice(s![-1.., ..width * 2]).exact_chunks((1, 2)),
            ) {
                *out = 0.5 * (*out + window.sum() * 0.5);
            });
        }

        if width * 2 != self.width() && width > 0 {
            azip!((
                out in half.slice_mut(s![.., -1..]),
                window in source.slice(s![..height * 2, -1..]).exact_chunks((2, 1)),
            ) {
                *out = 0.5 * (*out + window.sum() * 0.5);
            });
        }

        Self::from_array2(half)
    }
}

/// Convolve every row with `kernel`, replicating the edge samples.
fn filter_rows(data: &[f32], width: usize, height: usize, kernel: &[f32]) -> Vec<f32> {
    debug_assert!(kernel.len() % 2 == 1);
    let half = kernel.len() / 2;
    let lanes = (kernel.len() + 3) / 4;
    let padded_kernel: Vec<f32x4> = (0..lanes)
        .map(|lane| {
            let mut chunk = [0.0f32; 4];
            for (i, value) in chunk.iter_mut().enumerate() {
                *value = kernel.get(lane * 4 + i).copied().unwrap_or(0.0);
            }
            f32x4::new(chunk)
        })
        .collect();
    let mut output = vec![0.0; width * height];
    let mut scratch = vec![0.0f32; width + 2 * half + lanes * 4];
    for (row_in, row_out) in data.chunks_exact(width).zip(output.chunks_exact_mut(width)) {
        scratch[..half].fill(row_in[0]);
        scratch[half..half + width].copy_from_slice(row_in);
        scratch[half + width..2 * half + width].fill(row_in[width - 1]);
        scratch[2 * half + width..].fill(0.0);
        for (x, out) in row_out.iter_mut().enumerate() {
            *out = scratch[x..x + lanes * 4]
                .chunks_exact(4)
                .zip(&padded_kernel)
                .fold(f32x4::splat(0.0), |acc, (chunk, k)| {
                    f32x4::new([chunk[0], chunk[1], chunk[2], chunk[3]]).mul_add(*k, acc)
                })
                .reduce_add();
        }
    }
    output
}

fn transpose(data: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut out = vec![0.0; data.len()];
    for y in 0..height {
        for x in 0..width {
            out[x * height + y] = data[y * width + x];
        }
    }
    out
}

/// Applies `kernel` horizontally then vertically.
pub fn separable_filter(image: &GrayFloatImage, kernel: &[f32]) -> GrayFloatImage {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return image.clone();
    }
    let rows = filter_rows(image.0.as_raw(), width, height, kernel);
    let columns = filter_rows(&transpose(&rows, width, height), height, width, kernel);
    GrayFloatImage::from_raw(width, height, transpose(&columns, height, width))
        .unwrap_or_else(|| image.clone())
}

fn gaussian(x: f32, r: f32) -> f32 {
    ((2.0 * std::f32::consts::PI).sqrt() * r).recip() * (-x.powi(2) / (2.0 * r.powi(2))).exp()
}

/// Normalised Gaussian kernel of odd length `kernel_size` and standard deviation `r`.
pub fn gaussian_kernel(r: f32, kernel_size: usize) -> Vec<f32> {
    assert!(kernel_size % 2 == 1, "kernel_size must be odd");
    let half_width = (kernel_size / 2) as i32;
    let mut kernel: Vec<f32> = (-half_width..=half_width)
        .map(|i| gaussian(i as f32, r))
        .collect();
    let sum: f32 = kernel.iter().sum();
    for val in kernel.iter_mut() {
        *val /= sum;
    }
    kernel
}

/// Gaussian blur with standard deviation `r` (in pixels) and a kernel radius of `ceil(2r)`.
pub fn gaussian_blur(image: &GrayFloatImage, r: f32) -> GrayFloatImage {
    if r <= 0.0 {
        return image.clone();
    }
    let kernel_radius = (2.0 * r).ceil() as usize;
    let kernel = gaussian_kernel(r, kernel_radius * 2 + 1);
    separable_filter(image, &kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(width: usize, height: usize) -> GrayFloatImage {
        let data = (0..width * height)
            .map(|i| (i % width) as f32 / width as f32)
            .collect();
        GrayFloatImage::from_raw(width, height, data).unwrap()
    }

    #[test]
    fn gaussian_kernel_correct() {
        let kernel = gaussian_kernel(3.0, 7);
        let known_correct_kernel = [
            0.1062_8852,
            0.1403_2133,
            0.1657_7007,
            0.1752_4014,
            0.1657_7007,
            0.1403_2133,
            0.1062_8852,
        ];
        for (i, j) in kernel.iter().zip(known_correct_kernel.iter()) {
            assert_abs_diff_eq!(*i, *j, epsilon = 0.0001);
        }
    }

    #[test]
    fn blur_preserves_constant_image() {
        let image = GrayFloatImage::from_raw(9, 5, vec![0.25; 45]).unwrap();
        let blurred = gaussian_blur(&image, 1.6);
        for &v in blurred.as_raw() {
            assert_abs_diff_eq!(v, 0.25, epsilon = 1e-5);
        }
    }

    #[test]
    fn blur_keeps_linear_ramp_in_interior() {
        let image = ramp(32, 4);
        let blurred = gaussian_blur(&image, 1.0);
        for x in 4..28 {
            assert_abs_diff_eq!(blurred.get(x, 2), image.get(x, 2), epsilon = 1e-4);
        }
    }

    #[test]
    fn half_size_averages_tiles() {
        let image = GrayFloatImage::from_raw(4, 2, vec![0.0, 1.0, 0.5, 0.5, 1.0, 0.0, 0.5, 0.5])
            .unwrap();
        let half = image.half_size();
        assert_eq!((half.width(), half.height()), (2, 1));
        assert_abs_diff_eq!(half.get(0, 0), 0.5);
        assert_abs_diff_eq!(half.get(1, 0), 0.5);
    }

    #[test]
    fn bilinear_sample_interpolates() {
        let image = ramp(8, 2);
        assert_abs_diff_eq!(image.sample(2.5, 0.5), 2.5 / 8.0, epsilon = 1e-6);
        assert_abs_diff_eq!(image.sample(-3.0, 0.0), 0.0);
    }
}

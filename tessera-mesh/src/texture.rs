use image::{Rgb, RgbImage};
use log::*;
use tessera_core::nalgebra::{Point2, Point3, Vector3};
use tessera_core::{Camera, Error, Mesh, Result};

/// Bakes a texture atlas for a mesh with per-corner texture coordinates.
///
/// Every triangle is painted from the single view that faces it most directly and sees all of its
/// corners. Texels are sampled with nearest neighbor lookups at the projection of the surface
/// point under the texel. Texels that no triangle covers get the mean baked color.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TextureProjector {
    /// Width and height of the square atlas in pixels.
    pub texture_size: u32,
}

impl Default for TextureProjector {
    fn default() -> Self {
        Self { texture_size: 512 }
    }
}

/// Summary of a bake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bake {
    pub textured: usize,
    pub untextured: usize,
}

impl TextureProjector {
    pub fn new(texture_size: u32) -> Self {
        Self { texture_size }
    }

    /// The view whose direction to the triangle best matches its normal, among the views that
    /// see every corner of the triangle from its front side.
    pub fn best_view(
        &self,
        mesh: &Mesh,
        triangle: usize,
        views: &[(&RgbImage, Camera)],
    ) -> Option<usize> {
        let normal = mesh.face_normal(triangle);
        let centroid = mesh.centroid(triangle);
        let corners = mesh.corners(triangle);
        views
            .iter()
            .enumerate()
            .filter_map(|(ix, (image, camera))| {
                let facing = (camera.position - centroid)
                    .try_normalize(f64::EPSILON)?
                    .dot(&normal);
                let visible = corners.iter().all(|&corner| {
                    camera
                        .project(corner)
                        .map_or(false, |pixel| inside(image, pixel))
                });
                (facing > 0.0 && visible).then(|| (ix, facing))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(ix, _)| ix)
    }

    /// Bakes `mesh.texture` from `images` seen by `cameras`.
    pub fn bake(&self, mesh: &mut Mesh, images: &[RgbImage], cameras: &[Camera]) -> Result<Bake> {
        let views: Vec<(&RgbImage, Camera)> =
            images.iter().zip(cameras.iter().copied()).collect();
        if views.is_empty() {
            return Err(Error::InsufficientData {
                stage: "texture projection",
                required: 1,
                found: 0,
            });
        }
        if mesh.uvs.len() != 3 * mesh.triangle_count() {
            return Err(Error::InsufficientData {
                stage: "texture projection",
                required: 3 * mesh.triangle_count(),
                found: mesh.uvs.len(),
            });
        }
        let size = self.texture_size.max(1);
        let mut atlas = RgbImage::new(size, size);
        let mut covered = vec![false; (size * size) as usize];
        let mut bake = Bake {
            textured: 0,
            untextured: 0,
        };
        for t in 0..mesh.triangle_count() {
            let (image, camera) = match self.best_view(mesh, t, &views) {
                Some(ix) => views[ix],
                None => {
                    bake.untextured += 1;
                    continue;
                }
            };
            let corners = mesh.corners(t);
            if let Some(uvs) = mesh.corner_uvs(t) {
                let texels = uvs.map(|uv| uv * f64::from(size - 1));
                rasterize(texels, size, |x, y, weights| {
                    let point = Point3::from(
                        corners[0].coords * weights.x
                            + corners[1].coords * weights.y
                            + corners[2].coords * weights.z,
                    );
                    if let Some(color) = camera.project(point).and_then(|p| sample(image, p)) {
                        atlas.put_pixel(x, y, color);
                        covered[(y * size + x) as usize] = true;
                    }
                });
                bake.textured += 1;
            }
        }
        fill_uncovered(&mut atlas, &covered);
        if bake.textured == 0 {
            warn!(
                "No view sees any of the {} triangles, the texture is blank",
                mesh.triangle_count()
            );
        } else {
            info!(
                "Baked a {}x{} texture, {} triangles textured and {} without a view",
                size, size, bake.textured, bake.untextured
            );
        }
        mesh.texture = Some(atlas);
        Ok(bake)
    }
}

fn inside(image: &RgbImage, pixel: Point2<f64>) -> bool {
    pixel.x >= -0.5
        && pixel.y >= -0.5
        && pixel.x < f64::from(image.width()) - 0.5
        && pixel.y < f64::from(image.height()) - 0.5
}

fn sample(image: &RgbImage, pixel: Point2<f64>) -> Option<Rgb<u8>> {
    if !inside(image, pixel) {
        return None;
    }
    let x = (pixel.x.round().max(0.0) as u32).min(image.width() - 1);
    let y = (pixel.y.round().max(0.0) as u32).min(image.height() - 1);
    Some(*image.get_pixel(x, y))
}

/// Calls `paint` with the barycentric weights of every texel whose center lies in the triangle.
/// A small tolerance closes the seams between neighboring triangles.
fn rasterize(texels: [Point2<f64>; 3], size: u32, mut paint: impl FnMut(u32, u32, Vector3<f64>)) {
    let [a, b, c] = texels;
    let area = (b - a).perp(&(c - a));
    if area.abs() <= f64::EPSILON {
        return;
    }
    let lo = a.inf(&b).inf(&c);
    let hi = a.sup(&b).sup(&c);
    let max = f64::from(size - 1);
    let (x0, x1) = (lo.x.floor().max(0.0) as u32, hi.x.ceil().min(max) as u32);
    let (y0, y1) = (lo.y.floor().max(0.0) as u32, hi.y.ceil().min(max) as u32);
    const TOLERANCE: f64 = 1e-3;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = Point2::new(f64::from(x), f64::from(y));
            let wa = (b - p).perp(&(c - p)) / area;
            let wb = (c - p).perp(&(a - p)) / area;
            let wc = 1.0 - wa - wb;
            if wa >= -TOLERANCE && wb >= -TOLERANCE && wc >= -TOLERANCE {
                paint(x, y, Vector3::new(wa, wb, wc));
            }
        }
    }
}

fn fill_uncovered(atlas: &mut RgbImage, covered: &[bool]) {
    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for (pixel, _) in atlas.pixels().zip(covered).filter(|(_, c)| **c) {
        for (s, &channel) in sum.iter_mut().zip(pixel.0.iter()) {
            *s += u64::from(channel);
        }
        count += 1;
    }
    let mean = if count == 0 {
        Rgb([128, 128, 128])
    } else {
        Rgb(sum.map(|s| (s / count) as u8))
    };
    for (pixel, _) in atlas.pixels_mut().zip(covered).filter(|(_, c)| !**c) {
        *pixel = mean;
    }
}

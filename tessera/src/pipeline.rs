use crate::accelerator::{Accelerator, CpuAccelerator};
use crate::progress::{CancellationToken, Progress, Stage};
use crate::quality::{self, QualityMetrics};
use crate::sfm::StructureFromMotion;
use crate::Settings;
use log::*;
use std::borrow::Cow;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tessera_core::image::{DynamicImage, GenericImageView, RgbImage};
use tessera_core::{
    Camera, Error, Feature, FeatureMatch, GrayFloatImage, Mesh, PointCloud, Result,
};
use tessera_stereo::StereoRig;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// The output of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub mesh: Mesh,
    pub metrics: QualityMetrics,
    /// The refined camera of every input image, in input order.
    pub cameras: Vec<Camera>,
}

type ProgressCallback = Box<dyn FnMut(Progress) + Send>;

/// Photographs in, textured mesh out.
///
/// A pipeline is consumed by [`Pipeline::run`], so concurrent reconstructions never share state.
/// Progress is pushed to an optional callback after every stage and the run stops with
/// [`Error::Cancelled`] at the first stage boundary after its [`CancellationToken`] is cancelled.
///
/// ```no_run
/// use tessera::{Pipeline, Settings};
///
/// let images = ["a.jpg", "b.jpg", "c.jpg"]
///     .iter()
///     .map(|path| tessera::image::open(path))
///     .collect::<Result<Vec<_>, _>>()
///     .unwrap();
/// let reconstruction = Pipeline::new(Settings::default())
///     .on_progress(|p| println!("{:?} {:.0}%", p.stage, 100.0 * p.fraction))
///     .run(&images)
///     .unwrap();
/// println!("{} triangles", reconstruction.mesh.triangle_count());
/// ```
pub struct Pipeline {
    settings: Settings,
    accelerator: Arc<dyn Accelerator>,
    progress: Option<ProgressCallback>,
    token: CancellationToken,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            accelerator: Arc::new(CpuAccelerator),
            progress: None,
            token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn accelerator(self, accelerator: Arc<dyn Accelerator>) -> Self {
        Self {
            accelerator,
            ..self
        }
    }

    /// Called on the running thread after every stage.
    #[must_use]
    pub fn on_progress(self, callback: impl FnMut(Progress) + Send + 'static) -> Self {
        Self {
            progress: Some(Box::new(callback)),
            ..self
        }
    }

    /// Uses an existing token instead of a fresh one.
    #[must_use]
    pub fn cancellation_token(self, token: CancellationToken) -> Self {
        Self { token, ..self }
    }

    /// A token cancelling this pipeline.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stops on cancellation, otherwise reports the stage as done.
    fn finish(&mut self, stage: Stage) -> Result<()> {
        if self.token.is_cancelled() {
            info!("Cancelled after {:?}", stage);
            return Err(Error::Cancelled);
        }
        debug!("Finished {:?}", stage);
        if let Some(callback) = &mut self.progress {
            callback(stage.into());
        }
        Ok(())
    }

    /// Runs every stage on `images` and returns the textured, decimated mesh with its metrics.
    pub fn run(mut self, images: &[DynamicImage]) -> Result<Reconstruction> {
        let start = Instant::now();
        let memory_before = quality::resident_memory();
        if images.len() < 2 {
            return Err(Error::InsufficientData {
                stage: "pipeline",
                required: 2,
                found: images.len(),
            });
        }
        info!(
            "Reconstructing from {} images on the {} accelerator",
            images.len(),
            self.accelerator.name()
        );
        let mut warnings = Vec::new();
        let working = self.enhance(images, &mut warnings)?;

        let features = self.extract_features(&working)?;
        self.finish(Stage::Features)?;

        let matches = self.match_features(&features);
        self.finish(Stage::Matching)?;

        let intrinsics = working
            .iter()
            .map(|image| self.settings.intrinsics(image.width(), image.height()))
            .collect::<Vec<_>>();
        let sparse = StructureFromMotion::new(&self.settings, &features, &matches, &intrinsics)
            .reconstruct()?;
        warnings.extend(sparse.warnings.iter().cloned());
        let cameras = sparse.cameras.clone();
        self.finish(Stage::StructureFromMotion)?;

        let mut cloud = PointCloud::new(cameras.clone());
        for (point, origin) in sparse.points_with_origins() {
            cloud.push(point, origin);
        }
        drop(sparse);
        self.dense_stereo(&working, &mut cloud)?;
        let removed = self.settings.outlier_filter().filter(&mut cloud);
        info!(
            "Dense cloud has {} points after removing {} outliers",
            cloud.len(),
            removed
        );
        self.finish(Stage::DenseStereo)?;

        let surface = self.settings.surface_reconstructor().reconstruct(&cloud)?;
        if let Some(warning) = surface.warning {
            warn!("{}", warning);
            warnings.push(warning.to_string());
        }
        let point_count = cloud.len();
        drop(cloud);
        let mut mesh = surface.mesh;
        self.finish(Stage::Surface)?;

        self.settings.unwrapper().unwrap(&mut mesh);
        let colors: Vec<RgbImage> = working.iter().map(|image| image.to_rgb8()).collect();
        let bake = self
            .settings
            .texture_projector()
            .bake(&mut mesh, &colors, &cameras)?;
        if bake.textured == 0 {
            warnings.push("no camera sees the surface, the texture is a flat color".into());
        }
        self.finish(Stage::Texture)?;

        let decimation = self.settings.decimator().decimate(&mesh);
        if decimation.shortfall() > 0 {
            warnings.push(format!(
                "decimation stopped {} triangles above its target of {}",
                decimation.shortfall(),
                decimation.target
            ));
        }
        let mesh = decimation.mesh;
        self.finish(Stage::Decimation)?;

        let (psnr, ssim) = quality::evaluate_sequence(images)?;
        let memory_after = quality::resident_memory();
        let metrics = QualityMetrics {
            psnr,
            ssim,
            processing_seconds: start.elapsed().as_secs_f64(),
            memory_delta_bytes: match (memory_before, memory_after) {
                (Some(before), Some(after)) => after.saturating_sub(before),
                _ => 0,
            },
            point_count,
            triangle_count: mesh.triangle_count(),
            texture_resolution: mesh.texture.as_ref().map_or(0, |texture| texture.width()),
            warnings,
        };
        info!(
            "Reconstructed {} triangles from {} points in {:.2}s, PSNR {:.2} dB, SSIM {:.3}",
            metrics.triangle_count,
            metrics.point_count,
            metrics.processing_seconds,
            metrics.psnr,
            metrics.ssim
        );
        self.finish(Stage::Complete)?;
        Ok(Reconstruction {
            mesh,
            metrics,
            cameras,
        })
    }

    /// Runs the pipeline on a worker thread. Progress arrives on the returned handle.
    pub fn spawn(mut self, images: Vec<DynamicImage>) -> PipelineHandle {
        let (sender, progress) = mpsc::channel();
        let mut forward = self.progress.take();
        self = self.on_progress(move |p| {
            if let Some(callback) = &mut forward {
                callback(p);
            }
            // The receiver may be gone already, progress is advisory.
            let _ = sender.send(p);
        });
        let token = self.token();
        let thread = thread::spawn(move || self.run(&images));
        PipelineHandle {
            progress,
            token,
            thread,
        }
    }

    /// Applies the accelerator's enhancement when enabled. A missing model keeps the originals.
    fn enhance<'a>(
        &self,
        images: &'a [DynamicImage],
        warnings: &mut Vec<String>,
    ) -> Result<Vec<Cow<'a, DynamicImage>>> {
        if !self.settings.enhance {
            return Ok(images.iter().map(Cow::Borrowed).collect());
        }
        let mut enhanced = Vec::with_capacity(images.len());
        for image in images {
            match self.accelerator.enhance(image) {
                Ok(better) => enhanced.push(Cow::Owned(better)),
                Err(error) if error.is_soft() => {
                    warn!("{}, using the original images", error);
                    warnings.push(error.to_string());
                    return Ok(images.iter().map(Cow::Borrowed).collect());
                }
                Err(error) => return Err(error),
            }
        }
        Ok(enhanced)
    }

    fn extract_features(&self, images: &[Cow<'_, DynamicImage>]) -> Result<Vec<Vec<Feature>>> {
        let sift = self.settings.sift();
        #[cfg(not(feature = "rayon"))]
        let features = images
            .iter()
            .map(|image| sift.extract(image))
            .collect::<Result<Vec<_>>>()?;
        #[cfg(feature = "rayon")]
        let features = images
            .par_iter()
            .map(|image| sift.extract(image))
            .collect::<Result<Vec<_>>>()?;
        Ok(features)
    }

    fn match_features(&self, features: &[Vec<Feature>]) -> Vec<Vec<FeatureMatch>> {
        let matcher = self.settings.matcher();
        features
            .windows(2)
            .enumerate()
            .map(|(ix, pair)| {
                let distances = self.accelerator.descriptor_distances(&pair[0], &pair[1]);
                let matches = matcher.match_distances_between(&distances, &pair[0], &pair[1]);
                info!("Matched {} features of views {} and {}", matches.len(), ix, ix + 1);
                matches
            })
            .collect()
    }

    /// Adds the back-projected depth of every adjacent image pair to the cloud.
    fn dense_stereo(
        &self,
        images: &[Cow<'_, DynamicImage>],
        cloud: &mut PointCloud,
    ) -> Result<()> {
        let gray: Vec<GrayFloatImage> = images
            .iter()
            .map(|image| GrayFloatImage::from_dynamic(image))
            .collect();
        let matcher = self.settings.block_matcher();
        for a in 0..images.len() - 1 {
            let b = a + 1;
            let rig = match StereoRig::new(cloud.cameras[a], cloud.cameras[b]) {
                Some(rig) => rig,
                None => {
                    warn!("Views {} and {} share an optical center, no stereo", a, b);
                    continue;
                }
            };
            let (left, right) = if rig.swapped { (b, a) } else { (a, b) };
            let disparity = self
                .accelerator
                .block_match(&matcher, &gray[left], &gray[right])?;
            let depth = rig.depth_map(&disparity);
            let points = rig.back_project(&depth, self.settings.stereo_stride);
            info!(
                "Views {} and {} contributed {} dense points",
                left,
                right,
                points.len()
            );
            for point in points {
                cloud.push(point, left);
            }
        }
        Ok(())
    }
}

/// A reconstruction running on its own thread.
pub struct PipelineHandle {
    /// Progress of the run. Disconnects when the run ends.
    pub progress: Receiver<Progress>,
    token: CancellationToken,
    thread: JoinHandle<Result<Reconstruction>>,
}

impl PipelineHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for the run to end.
    pub fn join(self) -> Result<Reconstruction> {
        self.thread.join().unwrap_or_else(|_| {
            Err(Error::ReconstructionFailed(
                "the pipeline thread panicked".into(),
            ))
        })
    }
}

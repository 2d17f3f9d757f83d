use log::*;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use tessera::{export, Pipeline, Settings};

#[derive(StructOpt, Clone)]
#[structopt(name = "tessera", about = "Reconstructs a textured mesh from photographs")]
struct Opt {
    /// The file where settings are specified.
    ///
    /// This is in the format of `tessera::Settings`. Missing fields, or a missing file, use the
    /// defaults.
    #[structopt(short, long, default_value = "tessera-settings.json")]
    settings: PathBuf,
    /// Focal length in pixels, overriding the settings
    #[structopt(long)]
    focal: Option<f64>,
    /// Output PLY file to deposit the mesh
    #[structopt(short, long, default_value = "mesh.ply")]
    output: PathBuf,
    /// Output PNG file for the baked texture
    #[structopt(short, long)]
    texture: Option<PathBuf>,
    /// Output JSON file for the quality metrics
    #[structopt(short, long)]
    metrics: Option<PathBuf>,
    /// List of image files, in capture order
    #[structopt(parse(from_os_str))]
    images: Vec<PathBuf>,
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();
    if let Err(e) = run(opt) {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Reads the settings file. A missing file gives the defaults, a malformed one a warning too.
fn load_settings(path: &Path) -> Settings {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => {
            info!("used default settings");
            return Settings::default();
        }
    };
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(settings) => {
            info!("loaded settings from {}", path.display());
            settings
        }
        Err(e) => {
            warn!(
                "failed to parse settings {}, using defaults: {}",
                path.display(),
                e
            );
            Settings::default()
        }
    }
}

fn run(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = load_settings(&opt.settings);
    if let Some(focal) = opt.focal {
        settings.focal_length = Some(focal);
    }

    let images = opt
        .images
        .iter()
        .map(|path| {
            info!("loading {}", path.display());
            image::open(path)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let handle = Pipeline::new(settings).spawn(images);
    for progress in handle.progress.iter() {
        info!(
            "{:?} done, {:.0}% complete",
            progress.stage,
            100.0 * progress.fraction
        );
    }
    let reconstruction = handle.join()?;

    info!("exporting the mesh to {}", opt.output.display());
    export::export_mesh(BufWriter::new(File::create(&opt.output)?), &reconstruction.mesh)?;

    if let Some(path) = opt.texture {
        match &reconstruction.mesh.texture {
            Some(texture) => {
                info!("saving the texture to {}", path.display());
                texture.save(&path)?;
            }
            None => warn!("the mesh has no texture, not writing {}", path.display()),
        }
    }

    if let Some(path) = opt.metrics {
        info!("saving the metrics to {}", path.display());
        serde_json::to_writer_pretty(File::create(path)?, &reconstruction.metrics)?;
    }

    for warning in &reconstruction.metrics.warnings {
        warn!("{}", warning);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn settings_file(name: &str, contents: &str) -> PathBuf {
        let file = format!("tessera-{}-{}.json", name, std::process::id());
        let path = std::env::temp_dir().join(file);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn partial_settings_keep_other_defaults() {
        let path = settings_file("partial", r#"{ "max_features": 120 }"#);
        let settings = load_settings(&path);
        fs::remove_file(&path).unwrap();
        assert_eq!(settings.max_features, 120);
        assert_eq!(settings.octree_depth, Settings::default().octree_depth);
    }

    #[test]
    fn malformed_settings_fall_back_to_defaults() {
        let path = settings_file("malformed", "{ max_features: ");
        let settings = load_settings(&path);
        fs::remove_file(&path).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn missing_settings_use_defaults() {
        let settings = load_settings(Path::new("/nonexistent/tessera-settings.json"));
        assert_eq!(settings, Settings::default());
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facewatch_core::recognizer::prepare_face;
use facewatch_core::storage::validate_identity;
use facewatch_core::{
    DirectoryStore, DistanceMetric, EmbeddingExtractor, EmbeddingModel, FaceDetector,
    FaceLocalizer, FaceRecognizer, SampleStore,
};
use facewatch_hw::Camera;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Detector file the daemon uses unless configured otherwise.
const DEFAULT_DETECTOR: &str = "det_10g.onnx";

#[derive(Parser)]
#[command(name = "facewatch", about = "facewatch gallery and diagnostics CLI")]
struct Cli {
    /// Gallery directory
    /// (default: $FACEWATCH_GALLERY_DIR or ~/.local/share/facewatch/faces_database)
    #[arg(long, global = true)]
    gallery_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or extend the stored gallery
    Gallery {
        #[command(subcommand)]
        command: GalleryCommand,
    },
    /// Print the built-in match thresholds
    Thresholds,
    /// List V4L2 capture devices
    Devices,
}

#[derive(Subcommand)]
enum GalleryCommand {
    /// List enrolled identities and their sample counts
    List {
        #[arg(long)]
        json: bool,
    },
    /// Add a face image to an identity
    Enroll {
        /// Identity name
        #[arg(short, long)]
        name: String,
        /// Image containing one face
        image: PathBuf,
        /// Embedding model used to check that the face is usable
        #[arg(long, default_value = "VGG-Face")]
        model: String,
        /// Directory containing ONNX model files
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Face detector file, relative to the model directory
        /// (default: $FACEWATCH_DETECTOR_MODEL or det_10g.onnx)
        #[arg(long)]
        detector_model: Option<String>,
        /// Treat the image as an already-cropped face
        #[arg(long)]
        cropped: bool,
    },
}

#[derive(Serialize)]
struct IdentityRow {
    identity: String,
    samples: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let gallery_dir = cli.gallery_dir.unwrap_or_else(default_gallery_dir);

    match cli.command {
        Commands::Gallery { command } => match command {
            GalleryCommand::List { json } => list(&gallery_dir, json),
            GalleryCommand::Enroll {
                name,
                image,
                model,
                model_dir,
                detector_model,
                cropped,
            } => {
                let model: EmbeddingModel = model.parse()?;
                let model_dir = model_dir.unwrap_or_else(facewatch_core::default_model_dir);
                let models = Models {
                    detector: detector_path(
                        &model_dir,
                        detector_model,
                        std::env::var("FACEWATCH_DETECTOR_MODEL").ok(),
                    ),
                    recognizer: model_dir.join(model.file_name()),
                    model,
                };
                enroll(&gallery_dir, &models, &name, &image, cropped)
            }
        },
        Commands::Thresholds => {
            thresholds();
            Ok(())
        }
        Commands::Devices => {
            devices();
            Ok(())
        }
    }
}

/// Model files used by `gallery enroll`.
struct Models {
    detector: PathBuf,
    recognizer: PathBuf,
    model: EmbeddingModel,
}

/// The flag wins over the environment, which wins over the daemon's default.
fn detector_path(model_dir: &Path, flag: Option<String>, env: Option<String>) -> PathBuf {
    let file = flag
        .or(env)
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DETECTOR.to_string());
    model_dir.join(file)
}

fn default_gallery_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FACEWATCH_GALLERY_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewatch/faces_database")
}

fn list(gallery_dir: &Path, json: bool) -> Result<()> {
    let store = DirectoryStore::open(gallery_dir)?;
    let rows: Vec<IdentityRow> = store
        .identities()?
        .into_iter()
        .map(|(identity, samples)| IdentityRow { identity, samples })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("No identities enrolled in {}", gallery_dir.display());
    } else {
        for row in &rows {
            println!("{:<24} {} sample(s)", row.identity, row.samples);
        }
    }
    Ok(())
}

fn enroll(
    gallery_dir: &Path,
    models: &Models,
    name: &str,
    image: &Path,
    cropped: bool,
) -> Result<()> {
    let model = models.model;
    let identity = validate_identity(name)?;
    let frame = image::open(image)
        .with_context(|| format!("reading {}", image.display()))?
        .to_luma8();

    let face = if cropped {
        let (w, h) = model.input_size();
        image::imageops::resize(&frame, w, h, image::imageops::FilterType::Triangle)
    } else {
        let mut detector = FaceDetector::load(&models.detector)
            .with_context(|| format!("loading detector from {}", models.detector.display()))?;
        let boxes = detector.detect(&frame)?;
        let Some(best) = boxes.first() else {
            bail!("no face found in {}", image.display());
        };
        if boxes.len() > 1 {
            tracing::warn!(faces = boxes.len(), "several faces found, using the most confident");
        }
        prepare_face(&frame, best, model.input_size()).context("face box lies outside the image")?
    };

    let mut recognizer = FaceRecognizer::load(&models.recognizer, model)
        .with_context(|| format!("loading {model} from {}", models.recognizer.display()))?;
    let embedding = recognizer.embed(&face)?;
    tracing::debug!(dim = embedding.dim(), "embedding ok");

    let mut store = DirectoryStore::open(gallery_dir)?;
    let path = store.persist(identity, &face)?;
    println!("Enrolled {identity}: {}", path.display());
    Ok(())
}

fn thresholds() {
    print!("{:<10}", "model");
    for metric in DistanceMetric::ALL {
        print!(" {:>13}", metric.as_str());
    }
    println!();
    for model in EmbeddingModel::ALL {
        print!("{:<10}", model.name());
        for metric in DistanceMetric::ALL {
            print!(" {:>13}", model.threshold(metric));
        }
        println!();
    }
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

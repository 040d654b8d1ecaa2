use anyhow::{Context, Result};
use facewatch_core::{DirectoryStore, FaceDetector, FaceRecognizer, GalleryStore, Session};
use facewatch_hw::Camera;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod render;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facewatchd starting");

    let config = config::Config::load()?;
    let session_config = config.session_config()?;

    // Models and camera are opened up front so misconfiguration fails fast.
    let detector_path = config.detector_model_path();
    let detector = FaceDetector::load(&detector_path)
        .with_context(|| format!("loading detector from {}", detector_path.display()))?;
    let recognizer_path = config.recognizer_model_path()?;
    let model = session_config.model;
    let mut recognizer = FaceRecognizer::load(&recognizer_path, model)
        .with_context(|| format!("loading {model} from {}", recognizer_path.display()))?;

    let store = DirectoryStore::open(&config.gallery_dir)
        .with_context(|| format!("opening gallery {}", config.gallery_dir.display()))?;
    let gallery = Arc::new(GalleryStore::new(session_config.metric));
    store.rebuild_gallery(&gallery, &mut recognizer)?;

    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        format = ?camera.pixel_format(),
        "camera opened"
    );

    let session = Session::new(session_config, gallery, Box::new(store))?;
    let mut handle = engine::spawn(engine::Engine {
        session,
        source: Box::new(camera),
        localizer: Box::new(detector),
        extractor: Box::new(recognizer),
        renderer: Box::new(render::LogRenderer::default()),
        prompt: Box::new(engine::StdinPrompt),
        prompt_mode: config.prompt_mode,
        skip_dark_frames: config.skip_dark_frames,
    })?;

    tracing::info!("facewatchd ready");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("facewatchd shutting down");
        }
        _ = handle.exited() => {
            tracing::warn!("frame loop exited on its own");
        }
    }

    handle.stop();
    let stats = tokio::task::spawn_blocking(move || handle.join()).await??;
    tracing::info!(frames = stats.frames, enrolled = stats.enrolled, "facewatchd stopped");

    Ok(())
}

use anyhow::{bail, Context, Result};
use facewatch_core::{
    DistanceMetric, EmbeddingModel, EnrollmentConfig, FreezePolicy, SessionConfig, TrackerConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// How enrollment naming requests reach a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// The frame loop waits for the answer.
    Blocking,
    /// Requests go to a prompt thread; frames keep flowing.
    Queued,
}

impl FromStr for PromptMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blocking" => Ok(Self::Blocking),
            "queued" => Ok(Self::Queued),
            other => bail!("unknown prompt mode: {other} (expected blocking or queued)"),
        }
    }
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by
/// `FACEWATCH_CONFIG`, then `FACEWATCH_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// One sub-directory of sample images per identity.
    pub gallery_dir: PathBuf,
    /// SCRFD detector file name inside `model_dir`.
    pub detector_model: String,
    /// Embedding model name, e.g. "VGG-Face" or "ArcFace".
    pub model: String,
    /// cosine, euclidean or euclidean_l2.
    pub metric: String,
    /// Replaces the built-in threshold for (model, metric).
    pub threshold: Option<f32>,
    pub enrollment_threshold: u32,
    pub frame_threshold: u32,
    pub freeze_secs: f32,
    pub min_face_width: f32,
    pub freeze_policy: String,
    pub prompt_mode: PromptMode,
    pub collect_known_samples: bool,
    /// Drop frames that are almost entirely black before detection.
    pub skip_dark_frames: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facewatch");

        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            model_dir: facewatch_core::default_model_dir(),
            gallery_dir: data_dir.join("faces_database"),
            detector_model: "det_10g.onnx".to_string(),
            model: EmbeddingModel::VggFace.name().to_string(),
            metric: DistanceMetric::Cosine.as_str().to_string(),
            threshold: None,
            enrollment_threshold: 20,
            frame_threshold: 5,
            freeze_secs: 5.0,
            min_face_width: 130.0,
            freeze_policy: "global".to_string(),
            prompt_mode: PromptMode::Queued,
            collect_known_samples: false,
            skip_dark_frames: true,
        }
    }
}

impl Config {
    /// Load the full configuration stack from the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os("FACEWATCH_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Overlay `FACEWATCH_*` variables found through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(&format!("FACEWATCH_{key}"));

        if let Some(v) = var("CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = var("DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = var("MODEL") {
            self.model = v;
        }
        if let Some(v) = var("METRIC") {
            self.metric = v;
        }
        if let Some(v) = var("FREEZE_POLICY") {
            self.freeze_policy = v;
        }
        if let Some(v) = var("THRESHOLD") {
            self.threshold = Some(parse_var("FACEWATCH_THRESHOLD", &v)?);
        }
        if let Some(v) = var("CAMERA_WIDTH") {
            self.camera_width = parse_var("FACEWATCH_CAMERA_WIDTH", &v)?;
        }
        if let Some(v) = var("CAMERA_HEIGHT") {
            self.camera_height = parse_var("FACEWATCH_CAMERA_HEIGHT", &v)?;
        }
        if let Some(v) = var("ENROLLMENT_THRESHOLD") {
            self.enrollment_threshold = parse_var("FACEWATCH_ENROLLMENT_THRESHOLD", &v)?;
        }
        if let Some(v) = var("FRAME_THRESHOLD") {
            self.frame_threshold = parse_var("FACEWATCH_FRAME_THRESHOLD", &v)?;
        }
        if let Some(v) = var("FREEZE_SECS") {
            self.freeze_secs = parse_var("FACEWATCH_FREEZE_SECS", &v)?;
        }
        if let Some(v) = var("MIN_FACE_WIDTH") {
            self.min_face_width = parse_var("FACEWATCH_MIN_FACE_WIDTH", &v)?;
        }
        if let Some(v) = var("PROMPT_MODE") {
            self.prompt_mode = v.parse()?;
        }
        if let Some(v) = var("COLLECT_KNOWN_SAMPLES") {
            self.collect_known_samples = v != "0";
        }
        if let Some(v) = var("SKIP_DARK_FRAMES") {
            self.skip_dark_frames = v != "0";
        }
        Ok(())
    }

    pub fn embedding_model(&self) -> Result<EmbeddingModel> {
        Ok(self.model.parse()?)
    }

    pub fn distance_metric(&self) -> Result<DistanceMetric> {
        Ok(self.metric.parse()?)
    }

    /// Validate and convert into the core session configuration.
    pub fn session_config(&self) -> Result<SessionConfig> {
        if !self.freeze_secs.is_finite() || self.freeze_secs <= 0.0 {
            bail!("freeze_secs must be positive, got {}", self.freeze_secs);
        }
        let freeze_duration = Duration::try_from_secs_f32(self.freeze_secs)
            .with_context(|| format!("freeze_secs out of range: {}", self.freeze_secs))?;
        let config = SessionConfig {
            model: self.embedding_model()?,
            metric: self.distance_metric()?,
            threshold_override: self.threshold,
            min_face_width: self.min_face_width,
            tracker: TrackerConfig {
                frame_threshold: self.frame_threshold,
                freeze_duration,
                policy: self.freeze_policy.parse::<FreezePolicy>()?,
                ..TrackerConfig::default()
            },
            enrollment: EnrollmentConfig {
                threshold: self.enrollment_threshold,
                collect_known_samples: self.collect_known_samples,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the configured embedding model.
    pub fn recognizer_model_path(&self) -> Result<PathBuf> {
        Ok(self.model_dir.join(self.embedding_model()?.file_name()))
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {value:?}"))
}

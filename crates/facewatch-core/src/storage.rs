//! Sample image persistence: one directory per identity.
//!
//! Layout: `<root>/<identity>/<identity><n>.jpg`, with `n` cycling through
//! `1..=MAX_SAMPLES_PER_IDENTITY` so a long-running session overwrites its
//! oldest crops instead of growing without bound. There is no index file;
//! the gallery is rebuilt from the images at startup.

use crate::gallery::{GalleryError, GalleryStore};
use crate::recognizer::EmbeddingExtractor;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAX_SAMPLES_PER_IDENTITY: usize = 30;

const SAMPLE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("gallery path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("invalid identity name: {0:?}")]
    InvalidIdentity(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Where enrolled face crops are written.
pub trait SampleStore: Send {
    fn persist(&mut self, identity: &str, face: &GrayImage) -> Result<PathBuf, StorageError>;
}

/// A stored sample image found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSample {
    pub identity: String,
    pub path: PathBuf,
}

/// Result of re-embedding the stored gallery at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub identities: usize,
    pub samples: usize,
    pub skipped: usize,
}

/// Reject names that would escape or nest inside the gallery root.
pub fn validate_identity(name: &str) -> Result<&str, StorageError> {
    let trimmed = name.trim();
    let bad = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidIdentity(name.to_string()));
    }
    Ok(trimmed)
}

/// Directory-tree sample store rooted at one gallery path.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open (creating if missing) the gallery directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        if root.exists() && !root.is_dir() {
            return Err(StorageError::NotADirectory(root));
        }
        std::fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every sample image, grouped by identity directory, in name order.
    pub fn scan(&self) -> Result<Vec<StoredSample>, StorageError> {
        let mut samples = Vec::new();
        for dir in sorted_entries(&self.root)? {
            if !dir.is_dir() {
                continue;
            }
            let Some(identity) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            for path in sorted_entries(&dir)? {
                if is_sample_image(&path) {
                    samples.push(StoredSample {
                        identity: identity.clone(),
                        path,
                    });
                }
            }
        }
        Ok(samples)
    }

    /// `(identity, image count)` for every identity directory.
    pub fn identities(&self) -> Result<Vec<(String, usize)>, StorageError> {
        let mut out: Vec<(String, usize)> = Vec::new();
        for sample in self.scan()? {
            match out.last_mut() {
                Some((name, count)) if *name == sample.identity => *count += 1,
                _ => out.push((sample.identity, 1)),
            }
        }
        Ok(out)
    }

    /// Re-embed every stored image into `gallery`.
    ///
    /// Stored images are face crops already, so they are only resized to the
    /// extractor's input. Unreadable or unembeddable images are skipped.
    pub fn rebuild_gallery<E>(
        &self,
        gallery: &GalleryStore,
        extractor: &mut E,
    ) -> Result<RebuildSummary, StorageError>
    where
        E: EmbeddingExtractor + ?Sized,
    {
        let (w, h) = extractor.input_size();
        let mut summary = RebuildSummary::default();

        for sample in self.scan()? {
            let face = match image::open(&sample.path) {
                Ok(img) => imageops::resize(&img.to_luma8(), w, h, FilterType::Triangle),
                Err(e) => {
                    tracing::warn!(
                        path = %sample.path.display(),
                        error = %e,
                        "unreadable gallery image, skipping"
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            let added = extractor
                .embed(&face)
                .map_err(|e| e.to_string())
                .and_then(|emb| {
                    gallery
                        .add_sample(&sample.identity, emb)
                        .map_err(|e: GalleryError| e.to_string())
                });
            match added {
                Ok(1) => {
                    summary.identities += 1;
                    summary.samples += 1;
                }
                Ok(_) => summary.samples += 1,
                Err(e) => {
                    tracing::warn!(
                        path = %sample.path.display(),
                        error = %e,
                        "could not embed gallery image, skipping"
                    );
                    summary.skipped += 1;
                }
            }
        }

        tracing::info!(
            root = %self.root.display(),
            identities = summary.identities,
            samples = summary.samples,
            skipped = summary.skipped,
            "gallery rebuilt"
        );
        Ok(summary)
    }

    fn next_path(&self, dir: &Path, identity: &str) -> Result<PathBuf, StorageError> {
        let existing = sorted_entries(dir)?.len();
        let n = existing % MAX_SAMPLES_PER_IDENTITY + 1;
        Ok(dir.join(format!("{identity}{n}.jpg")))
    }
}

impl SampleStore for DirectoryStore {
    fn persist(&mut self, identity: &str, face: &GrayImage) -> Result<PathBuf, StorageError> {
        let identity = validate_identity(identity)?;
        let dir = self.root.join(identity);
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = self.next_path(&dir, identity)?;
        face.save(&path).map_err(|source| StorageError::Image {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(identity, path = %path.display(), "face sample saved");
        Ok(path)
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let io_err = |source| StorageError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = std::fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    paths.sort();
    Ok(paths)
}

fn is_sample_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SAMPLE_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use thiserror::Error;

use crate::models::GenerationParams;

pub const MANIFEST_FILE: &str = "manifest.json";

/// URL prefix under which the output root is served.
pub const PUBLIC_PREFIX: &str = "/outputs";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("could not encode PNG: {0}")]
    Encode(#[from] image::ImageError),
    #[error("could not serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes generated images under `{root}/{request_id}/` and hands back the
/// public path each one is served from.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn request_dir(&self, request_id: &str) -> PathBuf {
        self.root.join(request_id)
    }

    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::Io { path: self.root.clone(), source })
    }

    pub async fn create_request_dir(&self, request_id: &str) -> Result<PathBuf, StorageError> {
        let dir = self.request_dir(request_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Io { path: dir.clone(), source })?;
        Ok(dir)
    }

    /// Encode as PNG and write `{request_id}/{filename}`; returns
    /// `/outputs/{request_id}/{filename}`.
    pub async fn save_png(
        &self,
        image: &RgbImage,
        request_id: &str,
        filename: &str,
    ) -> Result<String, StorageError> {
        let mut bytes = Vec::new();
        image.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)?;
        let path = self.request_dir(request_id).join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError::Io { path: path.clone(), source })?;
        Ok(public_path(request_id, filename))
    }

    pub async fn write_manifest(&self, manifest: &Manifest) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(manifest)?;
        let path = self.request_dir(&manifest.request_id).join(MANIFEST_FILE);
        tokio::fs::write(&path, json).await.map_err(|source| StorageError::Io { path, source })
    }

    pub async fn remove_request_dir(&self, request_id: &str) -> Result<(), StorageError> {
        let dir = self.request_dir(request_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path: dir, source }),
        }
    }
}

pub fn public_path(request_id: &str, filename: &str) -> String {
    format!("{PUBLIC_PREFIX}/{request_id}/{filename}")
}

/// Record of one generation call, written next to its images.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub industry: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    pub base_prompt: String,
    pub negative_prompt: String,
    pub params: GenerationParams,
    pub variants: Vec<VariantRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantRecord {
    pub index: usize,
    pub prompt: String,
    pub seed: Option<u64>,
    #[serde(flatten)]
    pub outcome: VariantOutcome,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VariantOutcome {
    Saved(String),
    Error(String),
}

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conditioning::ConditioningImage;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("engine returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode engine output: {0}")]
    Decode(String),
    #[error("conditioning network not loaded")]
    NotLoaded,
    #[error("{0}")]
    Other(String),
}

/// Compute device the engine runs on, as reported once at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub accelerated: bool,
}

impl DeviceInfo {
    pub fn cpu() -> Self {
        Self { name: "cpu".to_string(), accelerated: false }
    }
}

/// Device memory counters in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub allocated_bytes: u64,
    pub reserved_bytes: u64,
    pub total_bytes: u64,
}

/// Opaque handle to a constructed base-model pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: String,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Per-sample knobs. `seed == None` means non-reproducible sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub controlnet_conditioning_scale: f32,
    pub seed: Option<u64>,
    pub width: u32,
    pub height: u32,
}

/// A text-to-image diffusion model with an edge-map conditioning network.
///
/// Implementations are not expected to handle concurrent `sample` calls; the
/// orchestrator serialises every call behind its engine guard.
#[async_trait]
pub trait GenerativeEngine: Send + Sync {
    /// Human readable backend name for logs.
    fn name(&self) -> &str;

    async fn probe_device(&self) -> Result<DeviceInfo, EngineError>;

    /// Load the companion conditioning network.
    async fn load(&self) -> Result<(), EngineError>;

    async fn create_session(&self, base_model_id: &str) -> Result<SessionHandle, EngineError>;

    async fn sample(
        &self,
        session: &SessionHandle,
        conditioning: &ConditioningImage,
        params: &SampleParams,
    ) -> Result<RgbImage, EngineError>;

    async fn memory_stats(&self) -> Result<MemoryStats, EngineError>;

    /// Release the session (if any) and the conditioning network, and ask the
    /// device to reclaim memory.
    async fn unload(&self, session: Option<&SessionHandle>) -> Result<(), EngineError>;
}

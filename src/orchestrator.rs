use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::conditioning::{ConditioningBuilder, ConditioningError, ConditioningImage};
use crate::engine::{DeviceInfo, EngineError, GenerativeEngine, SampleParams, SessionHandle};
use crate::error::GenerationError;
use crate::models::{
    prompt_preview, GenerationRequest, GenerationResult, OUTPUT_HEIGHT, OUTPUT_WIDTH,
};
use crate::prompt::PromptComposer;
use crate::storage::{Manifest, OutputStore, StorageError, VariantOutcome, VariantRecord};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Lifecycle of the single engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Loading,
    Ready(SessionHandle),
}

impl EngineState {
    pub fn label(&self) -> &'static str {
        match self {
            EngineState::Unloaded => "unloaded",
            EngineState::Loading => "loading",
            EngineState::Ready(_) => "ready",
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("output directory unavailable: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReport {
    pub device: String,
    pub has_accelerator: bool,
    pub initialized: bool,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_allocated: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_reserved: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Owns the engine lifecycle and turns one request into a batch of ad variants.
///
/// `initialize`, `generate` and `cleanup` all run under one engine guard, so at
/// most one of them is in flight and a load sequence is never raced. A
/// `generate` call runs on its own task and completes even if its caller goes away.
/// `is_ready` and `memory_usage` only read the published state.
pub struct GenerationOrchestrator {
    engine: Arc<dyn GenerativeEngine>,
    store: OutputStore,
    conditioning: ConditioningBuilder,
    composer: PromptComposer,
    base_model_id: String,
    state: RwLock<EngineState>,
    device: RwLock<Option<DeviceInfo>>,
    guard: Mutex<()>,
}

impl GenerationOrchestrator {
    pub fn new(
        engine: Arc<dyn GenerativeEngine>,
        store: OutputStore,
        base_model_id: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            store,
            conditioning: ConditioningBuilder::default(),
            composer: PromptComposer::new(),
            base_model_id: base_model_id.into(),
            state: RwLock::new(EngineState::Unloaded),
            device: RwLock::new(None),
            guard: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn with_conditioning(mut self, conditioning: ConditioningBuilder) -> Self {
        self.conditioning = conditioning;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.read(), EngineState::Ready(_))
    }

    fn session(&self) -> Option<SessionHandle> {
        match &*self.state.read() {
            EngineState::Ready(session) => Some(session.clone()),
            _ => None,
        }
    }

    /// Load the conditioning network and base pipeline. Returns `false` and
    /// leaves the engine unloaded on failure so a later call can retry.
    pub async fn initialize(&self) -> bool {
        let _guard = self.guard.lock().await;
        if self.is_ready() {
            info!("Generator already initialized");
            return true;
        }

        info!(
            "Initializing generator ({} engine, base model {})...",
            self.engine.name(),
            self.base_model_id
        );
        *self.state.write() = EngineState::Loading;
        match self.load_engine().await {
            Ok(session) => {
                *self.state.write() = EngineState::Ready(session);
                info!("Generator initialization completed successfully");
                true
            }
            Err(e) => {
                *self.state.write() = EngineState::Unloaded;
                error!("Generator initialization failed: {}", e);
                false
            }
        }
    }

    async fn load_engine(&self) -> Result<SessionHandle, LoadError> {
        self.store.ensure_root().await?;
        info!("Output directory: {}", self.store.root().display());

        let device = self.engine.probe_device().await?;
        info!("Generator device: {} (accelerated: {})", device.name, device.accelerated);
        *self.device.write() = Some(device);

        self.engine.load().await?;
        match self.engine.create_session(&self.base_model_id).await {
            Ok(session) => Ok(session),
            Err(e) => {
                // Conditioning network is loaded but useless without a pipeline.
                if let Err(unload) = self.engine.unload(None).await {
                    warn!("Could not release conditioning network after failed load: {}", unload);
                }
                Err(e.into())
            }
        }
    }

    /// Generate one batch of ad variants. The work runs on a spawned task, so
    /// dropping this future never leaves a half-written request directory.
    pub async fn generate(
        self: &Arc<Self>,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run_generation(request).await })
            .await
            .map_err(|e| GenerationError::Interrupted(e.to_string()))?
    }

    async fn run_generation(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let _guard = self.guard.lock().await;
        let session = self.session().ok_or(GenerationError::NotInitialized)?;

        let params = request.params.clamped();
        let num_images = params.num_images;
        let request_id = Uuid::new_v4().to_string();
        info!("Starting ad generation (request: {}, images: {})", request_id, num_images);

        self.store
            .create_request_dir(&request_id)
            .await
            .map_err(GenerationError::OutputDirectory)?;

        let conditioning = match self.build_conditioning(&request).await {
            Ok(conditioning) => conditioning,
            Err(e) => {
                error!("Failed to prepare control image: {}", e);
                self.discard(&request_id).await;
                return Err(e.into());
            }
        };

        let prompts = self.composer.compose(
            &request.trend_profile,
            request.brand_name.as_deref(),
            request.headline.as_deref(),
            num_images,
        );

        let mut images = Vec::with_capacity(num_images);
        let mut records = Vec::with_capacity(num_images);
        for i in 0..num_images {
            let seed = params.seed_for(i);
            let prompt = prompts.variants.get(i).unwrap_or(&prompts.base_prompt).clone();
            info!("Generating image {}/{} (seed: {:?})", i + 1, num_images, seed);

            let started = Instant::now();
            let sample = SampleParams {
                prompt: prompt.clone(),
                negative_prompt: prompts.negative_prompt.clone(),
                num_inference_steps: params.num_inference_steps,
                guidance_scale: params.guidance_scale,
                controlnet_conditioning_scale: params.controlnet_conditioning_scale,
                seed,
                width: OUTPUT_WIDTH,
                height: OUTPUT_HEIGHT,
            };
            let outcome = match self.engine.sample(&session, &conditioning, &sample).await {
                Ok(image) => {
                    let filename = format!("ad_{}.png", i + 1);
                    match self.store.save_png(&image, &request_id, &filename).await {
                        Ok(path) => {
                            info!("Generated and saved: {}", path);
                            images.push(path.clone());
                            VariantOutcome::Saved(path)
                        }
                        Err(e) => {
                            error!("Error saving image {}: {}", i + 1, e);
                            VariantOutcome::Error(e.to_string())
                        }
                    }
                }
                Err(e) => {
                    error!("Error generating image {}: {}", i + 1, e);
                    VariantOutcome::Error(e.to_string())
                }
            };
            records.push(VariantRecord {
                index: i,
                prompt,
                seed,
                outcome,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        if images.is_empty() {
            self.discard(&request_id).await;
            return Err(GenerationError::NoImagesGenerated { requested: num_images });
        }

        let manifest = Manifest {
            request_id: request_id.clone(),
            created_at: Utc::now(),
            industry: request.trend_profile.industry.clone(),
            platform: request.trend_profile.platform.clone(),
            brand_name: request.brand_name.clone(),
            headline: request.headline.clone(),
            base_prompt: prompts.base_prompt.clone(),
            negative_prompt: prompts.negative_prompt.clone(),
            params,
            variants: records,
        };
        if let Err(e) = self.store.write_manifest(&manifest).await {
            warn!("Could not write manifest for {}: {}", request_id, e);
        }

        info!("Ad generation completed: {}/{} images", images.len(), num_images);
        Ok(GenerationResult {
            request_id,
            num_generated: images.len(),
            images,
            prompt: prompt_preview(&prompts.base_prompt),
        })
    }

    async fn build_conditioning(
        &self,
        request: &GenerationRequest,
    ) -> Result<ConditioningImage, ConditioningError> {
        let builder = self.conditioning;
        let photo = request.product_image.clone();
        tokio::task::spawn_blocking(move || builder.build_from_bytes(&photo))
            .await
            .map_err(|e| ConditioningError::Interrupted(e.to_string()))?
    }

    async fn discard(&self, request_id: &str) {
        if let Err(e) = self.store.remove_request_dir(request_id).await {
            warn!("Could not remove output directory for {}: {}", request_id, e);
        }
    }

    /// Device and memory snapshot. Never fails; introspection errors land in `error`.
    pub async fn memory_usage(&self) -> MemoryReport {
        let device = self.device.read().clone();
        let state = self.state();
        let mut report = MemoryReport {
            device: device
                .as_ref()
                .map(|d| d.name.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            has_accelerator: device.as_ref().is_some_and(|d| d.accelerated),
            initialized: matches!(state, EngineState::Ready(_)),
            state: state.label(),
            gpu_memory_allocated: None,
            gpu_memory_reserved: None,
            gpu_memory_total: None,
            error: None,
        };

        if report.has_accelerator {
            match self.engine.memory_stats().await {
                Ok(stats) => {
                    report.gpu_memory_allocated = Some(stats.allocated_bytes as f64 / BYTES_PER_GB);
                    report.gpu_memory_reserved = Some(stats.reserved_bytes as f64 / BYTES_PER_GB);
                    report.gpu_memory_total = Some(stats.total_bytes as f64 / BYTES_PER_GB);
                }
                Err(e) => {
                    warn!("Could not get GPU memory info: {}", e);
                    report.error = Some(e.to_string());
                }
            }
        }
        report
    }

    /// Release the engine. Idempotent; errors are logged, never returned.
    pub async fn cleanup(&self) {
        let _guard = self.guard.lock().await;
        let previous = std::mem::replace(&mut *self.state.write(), EngineState::Unloaded);
        let EngineState::Ready(session) = previous else {
            debug!("Generator not loaded, nothing to clean up");
            return;
        };

        info!("Cleaning up generator...");
        match self.engine.unload(Some(&session)).await {
            Ok(()) => info!("Generator cleanup completed"),
            Err(e) => error!("Error during generator cleanup: {}", e),
        }
    }
}

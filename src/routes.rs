use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::ApiError,
    models::{
        GenerationParams, GenerationRequest, GenerationResult, TrendProfile,
        DEFAULT_CONTROLNET_SCALE, DEFAULT_GUIDANCE, DEFAULT_IMAGES, DEFAULT_STEPS,
    },
    orchestrator::{GenerationOrchestrator, MemoryReport},
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<GenerationOrchestrator>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub industry: String,
    pub platform: String,
    pub trend_profile: TrendProfile,
    /// Base64 of the encoded product photo; `data:` URLs are accepted.
    pub product_image: String,
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub num_images: Option<usize>,
    #[serde(default)]
    pub num_inference_steps: Option<u32>,
    #[serde(default)]
    pub guidance_scale: Option<f32>,
    #[serde(default)]
    pub controlnet_conditioning_scale: Option<f32>,
    #[serde(default)]
    pub base_seed: Option<u64>,
}

impl GenerateBody {
    pub fn into_request(self) -> Result<GenerationRequest, ApiError> {
        if self.industry.trim().is_empty() || self.platform.trim().is_empty() {
            return Err(ApiError::BadRequest("industry and platform are required".into()));
        }
        let product_image = decode_image_payload(&self.product_image)?;

        let mut trend_profile = self.trend_profile;
        trend_profile.platform = self.platform.trim().to_string();
        if trend_profile.industry.trim().is_empty() {
            trend_profile.industry = self.industry.trim().to_string();
        }

        let params = GenerationParams {
            num_images: self.num_images.unwrap_or(DEFAULT_IMAGES),
            num_inference_steps: self.num_inference_steps.unwrap_or(DEFAULT_STEPS),
            guidance_scale: self.guidance_scale.unwrap_or(DEFAULT_GUIDANCE),
            controlnet_conditioning_scale: self
                .controlnet_conditioning_scale
                .unwrap_or(DEFAULT_CONTROLNET_SCALE),
            base_seed: self.base_seed,
        }
        .clamped();

        Ok(GenerationRequest {
            product_image,
            trend_profile,
            brand_name: self.brand_name.filter(|b| !b.trim().is_empty()),
            headline: self.headline.filter(|h| !h.trim().is_empty()),
            params,
        })
    }
}

fn decode_image_payload(payload: &str) -> Result<Bytes, ApiError> {
    let data = payload.split_once("base64,").map(|(_, rest)| rest).unwrap_or(payload).trim();
    if data.is_empty() {
        return Err(ApiError::BadRequest("productImage is required".into()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map(Bytes::from)
        .map_err(|e| ApiError::BadRequest(format!("productImage is not valid base64: {e}")))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "ready": state.orchestrator.is_ready() }))
}

pub async fn memory(State(state): State<AppState>) -> Json<MemoryReport> {
    Json(state.orchestrator.memory_usage().await)
}

pub async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Json<GenerationResult>, ApiError> {
    let Json(body) = body?;
    let request = body.into_request()?;
    tracing::info!(
        "Generating {} ads for {}/{}",
        request.params.num_images,
        request.trend_profile.industry,
        request.trend_profile.platform
    );
    let result = state.orchestrator.generate(request).await?;
    Ok(Json(result))
}

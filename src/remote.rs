use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use image::RgbImage;
use parking_lot::RwLock;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::conditioning::ConditioningImage;
use crate::engine::{
    DeviceInfo, EngineError, GenerativeEngine, MemoryStats, SampleParams, SessionHandle,
};

/// Client for an external SDXL + ControlNet worker speaking JSON over HTTP.
/// Images travel as base64 PNG.
pub struct RemoteEngine {
    client: Client,
    base_url: String,
    controlnet_model_id: String,
    controlnet_loaded: RwLock<bool>,
}

impl RemoteEngine {
    pub fn new(
        base_url: &str,
        controlnet_model_id: &str,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder().timeout(timeout).build().map_err(http_error)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            controlnet_model_id: controlnet_model_id.to_string(),
            controlnet_loaded: RwLock::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn check(response: Response) -> Result<Response, EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("Engine error response ({}): {}", status, truncate(&body, 300));
        Err(EngineError::Status { status: status.as_u16(), body })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, EngineError> {
        let response = self.client.get(self.url(path)).send().await.map_err(http_error)?;
        Self::check(response).await?.json::<T>().await.map_err(decode_error)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, EngineError> {
        let response =
            self.client.post(self.url(path)).json(body).send().await.map_err(http_error)?;
        Self::check(response).await
    }

    async fn delete_pipeline(&self, session: &SessionHandle) -> Result<(), EngineError> {
        let url = self.url(&format!("pipelines/{}", session.id));
        let response = self.client.delete(url).send().await.map_err(http_error)?;
        Self::check(response).await.map(|_| ())
    }
}

#[async_trait]
impl GenerativeEngine for RemoteEngine {
    fn name(&self) -> &str {
        "remote"
    }

    async fn probe_device(&self) -> Result<DeviceInfo, EngineError> {
        let device: DeviceResponse = self.get_json("device").await?;
        let kind = if device.accelerated { "accelerated" } else { "cpu only" };
        info!("Engine device: {} ({})", device.name, kind);
        Ok(DeviceInfo { name: device.name, accelerated: device.accelerated })
    }

    async fn load(&self) -> Result<(), EngineError> {
        info!("Loading ControlNet model {}...", self.controlnet_model_id);
        let body = LoadControlnetBody { model: &self.controlnet_model_id };
        self.post_json("controlnet/load", &body).await?;
        *self.controlnet_loaded.write() = true;
        info!("ControlNet loaded");
        Ok(())
    }

    async fn create_session(&self, base_model_id: &str) -> Result<SessionHandle, EngineError> {
        if !*self.controlnet_loaded.read() {
            return Err(EngineError::NotLoaded);
        }
        info!("Creating pipeline for {}...", base_model_id);
        let body =
            CreatePipelineBody { base_model: base_model_id, controlnet: &self.controlnet_model_id };
        let created: CreatePipelineResponse =
            self.post_json("pipelines", &body).await?.json().await.map_err(decode_error)?;
        info!("Pipeline {} created", created.session_id);
        Ok(SessionHandle::new(created.session_id))
    }

    async fn sample(
        &self,
        session: &SessionHandle,
        conditioning: &ConditioningImage,
        params: &SampleParams,
    ) -> Result<RgbImage, EngineError> {
        let control_png =
            conditioning.to_png_bytes().map_err(|e| EngineError::Other(e.to_string()))?;
        let control_image = base64::engine::general_purpose::STANDARD.encode(control_png);
        let body = SampleBody::new(params, control_image);
        info!(
            "Sampling (steps: {}, guidance: {}, seed: {:?})",
            params.num_inference_steps, params.guidance_scale, params.seed
        );
        let sampled: SampleResponse = self
            .post_json(&format!("pipelines/{}/sample", session.id), &body)
            .await?
            .json()
            .await
            .map_err(decode_error)?;
        info!("Received image: {}", truncate(&sampled.image, 50));
        decode_png_base64(&sampled.image)
    }

    async fn memory_stats(&self) -> Result<MemoryStats, EngineError> {
        self.get_json("memory").await
    }

    /// Deletes the pipeline, then always drops the ControlNet and asks the
    /// worker to release device memory. Returns the first failure.
    async fn unload(&self, session: Option<&SessionHandle>) -> Result<(), EngineError> {
        let mut first_error = None;
        if let Some(session) = session {
            if let Err(e) = self.delete_pipeline(session).await {
                warn!("Could not delete pipeline {}: {}", session.id, e);
                first_error = Some(e);
            }
        }
        *self.controlnet_loaded.write() = false;
        if let Err(e) = self.post_json("memory/release", &serde_json::json!({})).await {
            warn!("Engine did not release device memory: {}", e);
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn http_error(e: reqwest::Error) -> EngineError {
    EngineError::Http(e.to_string())
}

fn decode_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Decode(e.to_string())
}

fn decode_png_base64(data: &str) -> Result<RgbImage, EngineError> {
    // Tolerate data URLs.
    let payload = data.split_once("base64,").map(|(_, rest)| rest).unwrap_or(data);
    let bytes =
        base64::engine::general_purpose::STANDARD.decode(payload.trim()).map_err(decode_error)?;
    let image = image::load_from_memory(&bytes).map_err(decode_error)?;
    Ok(image.to_rgb8())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...[{} chars total]", head, s.len())
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct DeviceResponse {
    name: String,
    #[serde(default)]
    accelerated: bool,
}

#[derive(Debug, Serialize)]
struct LoadControlnetBody<'a> {
    model: &'a str,
}

#[derive(Debug, Serialize)]
struct CreatePipelineBody<'a> {
    base_model: &'a str,
    controlnet: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatePipelineResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct SampleBody<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    control_image: String,
    num_inference_steps: u32,
    guidance_scale: f32,
    controlnet_conditioning_scale: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    width: u32,
    height: u32,
}

impl<'a> SampleBody<'a> {
    fn new(params: &'a SampleParams, control_image: String) -> Self {
        Self {
            prompt: &params.prompt,
            negative_prompt: &params.negative_prompt,
            control_image,
            num_inference_steps: params.num_inference_steps,
            guidance_scale: params.guidance_scale,
            controlnet_conditioning_scale: params.controlnet_conditioning_scale,
            seed: params.seed,
            width: params.width,
            height: params.height,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SampleResponse {
    image: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::StatusCode,
        routing::{delete, post},
        Json, Router,
    };
    use image::Rgb;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const CONTROLNET: &str = "diffusers/controlnet-canny-sdxl-1.0";

    fn engine() -> RemoteEngine {
        RemoteEngine::new("http://worker:9000/", CONTROLNET, Duration::from_secs(5)).unwrap()
    }

    fn params(seed: Option<u64>) -> SampleParams {
        SampleParams {
            prompt: "ad".into(),
            negative_prompt: "blurry".into(),
            num_inference_steps: 30,
            guidance_scale: 7.5,
            controlnet_conditioning_scale: 1.0,
            seed,
            width: 1024,
            height: 1024,
        }
    }

    /// Local worker that answers DELETE /pipelines/:id with `delete_status` and
    /// counts POST /memory/release calls.
    async fn mock_worker(delete_status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);
        let app = Router::new()
            .route("/controlnet/load", post(|| async { Json(json!({ "status": "loaded" })) }))
            .route("/pipelines/:id", delete(move || async move { (delete_status, "device busy") }))
            .route(
                "/memory/release",
                post(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(json!({}))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), releases)
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let engine = engine();
        assert_eq!(engine.url("device"), "http://worker:9000/device");
        assert_eq!(
            engine.url("/pipelines/abc/sample"),
            "http://worker:9000/pipelines/abc/sample"
        );
    }

    #[test]
    fn sample_body_omits_missing_seed() {
        let p = params(None);
        let value = serde_json::to_value(SampleBody::new(&p, "AAAA".into())).unwrap();
        assert!(value.get("seed").is_none());
        assert_eq!(value["control_image"], "AAAA");
        assert_eq!(value["num_inference_steps"], 30);

        let p = params(Some(43));
        let value = serde_json::to_value(SampleBody::new(&p, String::new())).unwrap();
        assert_eq!(value["seed"], 43);
    }

    #[test]
    fn decodes_base64_png_and_data_urls() {
        let img = RgbImage::from_pixel(4, 3, Rgb([1, 2, 3]));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png).unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(&png);

        assert_eq!(decode_png_base64(&b64).unwrap(), img);
        assert_eq!(decode_png_base64(&format!("data:image/png;base64,{b64}")).unwrap(), img);
        assert!(matches!(decode_png_base64("not base64!"), Err(EngineError::Decode(_))));
    }

    #[test]
    fn memory_stats_parse_from_worker_json() {
        let raw = json!({
            "allocated_bytes": 1073741824u64,
            "reserved_bytes": 2147483648u64,
            "total_bytes": 25769803776u64,
        });
        let stats: MemoryStats = serde_json::from_value(raw).unwrap();
        assert_eq!(stats.allocated_bytes, 1 << 30);
        assert_eq!(stats.total_bytes, 24 << 30);
    }

    #[tokio::test]
    async fn session_requires_loaded_controlnet() {
        let err = engine()
            .create_session("stabilityai/stable-diffusion-xl-base-1.0")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotLoaded));
    }

    #[tokio::test]
    async fn unload_releases_memory_even_when_pipeline_delete_fails() {
        let (url, releases) = mock_worker(StatusCode::INTERNAL_SERVER_ERROR).await;
        let engine = RemoteEngine::new(&url, CONTROLNET, Duration::from_secs(5)).unwrap();
        engine.load().await.unwrap();
        assert!(*engine.controlnet_loaded.read());

        let err = engine.unload(Some(&SessionHandle::new("abc"))).await.unwrap_err();
        assert!(matches!(err, EngineError::Status { status: 500, .. }));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!*engine.controlnet_loaded.read());
    }

    #[tokio::test]
    async fn unload_succeeds_when_worker_cooperates() {
        let (url, releases) = mock_worker(StatusCode::NO_CONTENT).await;
        let engine = RemoteEngine::new(&url, CONTROLNET, Duration::from_secs(5)).unwrap();
        engine.load().await.unwrap();

        engine.unload(Some(&SessionHandle::new("abc"))).await.unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!*engine.controlnet_loaded.read());
    }
}

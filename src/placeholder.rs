use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::RwLock;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::info;
use uuid::Uuid;

use crate::conditioning::ConditioningImage;
use crate::engine::{
    DeviceInfo, EngineError, GenerativeEngine, MemoryStats, SampleParams, SessionHandle,
};

const PALETTE: [[u8; 3]; 5] = [
    [0x3B, 0x82, 0xF6],
    [0xEF, 0x44, 0x44],
    [0x10, 0xB9, 0x81],
    [0xF5, 0x9E, 0x0B],
    [0x8B, 0x5C, 0xF6],
];

/// Demo-mode engine used when no inference worker is configured. Paints the
/// conditioning edges over a seeded gradient so the rest of the pipeline can
/// run end to end without a model.
#[derive(Default)]
pub struct PlaceholderEngine {
    loaded: RwLock<bool>,
}

impl PlaceholderEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GenerativeEngine for PlaceholderEngine {
    fn name(&self) -> &str {
        "placeholder"
    }

    async fn probe_device(&self) -> Result<DeviceInfo, EngineError> {
        Ok(DeviceInfo::cpu())
    }

    async fn load(&self) -> Result<(), EngineError> {
        info!("Using demo mode - no real images generated");
        *self.loaded.write() = true;
        Ok(())
    }

    async fn create_session(&self, base_model_id: &str) -> Result<SessionHandle, EngineError> {
        if !*self.loaded.read() {
            return Err(EngineError::NotLoaded);
        }
        Ok(SessionHandle::new(format!("placeholder-{}-{}", base_model_id, Uuid::new_v4())))
    }

    async fn sample(
        &self,
        _session: &SessionHandle,
        conditioning: &ConditioningImage,
        params: &SampleParams,
    ) -> Result<RgbImage, EngineError> {
        if !*self.loaded.read() {
            return Err(EngineError::NotLoaded);
        }
        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(render(conditioning, params.width, params.height, &mut rng))
    }

    async fn memory_stats(&self) -> Result<MemoryStats, EngineError> {
        Ok(MemoryStats { allocated_bytes: 0, reserved_bytes: 0, total_bytes: 0 })
    }

    async fn unload(&self, _session: Option<&SessionHandle>) -> Result<(), EngineError> {
        *self.loaded.write() = false;
        Ok(())
    }
}

fn render(conditioning: &ConditioningImage, width: u32, height: u32, rng: &mut StdRng) -> RgbImage {
    let from = PALETTE[rng.gen_range(0..PALETTE.len())];
    let to = PALETTE[rng.gen_range(0..PALETTE.len())];
    let ink: Rgb<u8> = Rgb([rng.gen(), rng.gen(), rng.gen()]);
    let (cw, ch) = (conditioning.width(), conditioning.height());

    RgbImage::from_fn(width, height, |x, y| {
        // Nearest-neighbour lookup so the output size need not match the edge map.
        let cx = (u64::from(x) * u64::from(cw) / u64::from(width.max(1))) as u32;
        let cy = (u64::from(y) * u64::from(ch) / u64::from(height.max(1))) as u32;
        if cx < cw && cy < ch && conditioning.is_edge(cx, cy) {
            return ink;
        }
        let t = (x + y) as f32 / (width + height).max(1) as f32;
        let mix = |a: u8, b: u8| (f32::from(a) * (1.0 - t) + f32::from(b) * t).round() as u8;
        Rgb([mix(from[0], to[0]), mix(from[1], to[1]), mix(from[2], to[2])])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditioning::ConditioningBuilder;
    use image::DynamicImage;
    use pretty_assertions::assert_eq;

    fn conditioning() -> ConditioningImage {
        let photo = RgbImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        ConditioningBuilder::new((32, 32)).build(&DynamicImage::ImageRgb8(photo)).unwrap()
    }

    fn params(seed: Option<u64>) -> SampleParams {
        SampleParams {
            prompt: "p".into(),
            negative_prompt: "n".into(),
            num_inference_steps: 10,
            guidance_scale: 7.5,
            controlnet_conditioning_scale: 1.0,
            seed,
            width: 64,
            height: 64,
        }
    }

    async fn ready_engine() -> (PlaceholderEngine, SessionHandle) {
        let engine = PlaceholderEngine::new();
        engine.load().await.unwrap();
        let session = engine.create_session("base").await.unwrap();
        (engine, session)
    }

    #[tokio::test]
    async fn same_seed_gives_same_image() {
        let (engine, session) = ready_engine().await;
        let cond = conditioning();
        let a = engine.sample(&session, &cond, &params(Some(42))).await.unwrap();
        let b = engine.sample(&session, &cond, &params(Some(42))).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.dimensions(), (64, 64));
    }

    #[tokio::test]
    async fn sampling_requires_load() {
        let engine = PlaceholderEngine::new();
        assert!(matches!(engine.create_session("base").await, Err(EngineError::NotLoaded)));
        let (engine, session) = ready_engine().await;
        engine.unload(Some(&session)).await.unwrap();
        let err = engine.sample(&session, &conditioning(), &params(None)).await.unwrap_err();
        assert!(matches!(err, EngineError::NotLoaded));
    }

    #[tokio::test]
    async fn reports_cpu_device() {
        let engine = PlaceholderEngine::new();
        assert_eq!(engine.probe_device().await.unwrap(), DeviceInfo::cpu());
    }
}

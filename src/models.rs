use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const MIN_IMAGES: usize = 3;
pub const MAX_IMAGES: usize = 5;
pub const DEFAULT_IMAGES: usize = 4;

pub const MIN_STEPS: u32 = 10;
pub const MAX_STEPS: u32 = 50;
pub const DEFAULT_STEPS: u32 = 30;

pub const MIN_GUIDANCE: f32 = 1.0;
pub const MAX_GUIDANCE: f32 = 20.0;
pub const DEFAULT_GUIDANCE: f32 = 7.5;

pub const MIN_CONTROLNET_SCALE: f32 = 0.1;
pub const MAX_CONTROLNET_SCALE: f32 = 2.0;
pub const DEFAULT_CONTROLNET_SCALE: f32 = 1.0;

/// Output resolution handed to the engine for every variant.
pub const OUTPUT_WIDTH: u32 = 1024;
pub const OUTPUT_HEIGHT: u32 = 1024;

fn default_platform() -> String {
    "instagram".to_string()
}

/// Aggregated advertising trends for one industry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendProfile {
    #[serde(default)]
    pub industry: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub top_colors: Vec<String>,
    #[serde(default)]
    pub dominant_layouts: Vec<String>,
    #[serde(default)]
    pub creative_types: Vec<String>,
    #[serde(default)]
    pub top_keywords: Vec<String>,
    #[serde(default)]
    pub avg_engagement_score: Option<f64>,
}

impl Default for TrendProfile {
    fn default() -> Self {
        Self {
            industry: String::new(),
            platform: default_platform(),
            top_colors: Vec::new(),
            dominant_layouts: Vec::new(),
            creative_types: Vec::new(),
            top_keywords: Vec::new(),
            avg_engagement_score: None,
        }
    }
}

/// Numeric knobs of one generation call.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub num_images: usize,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub controlnet_conditioning_scale: f32,
    pub base_seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            num_images: DEFAULT_IMAGES,
            num_inference_steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE,
            controlnet_conditioning_scale: DEFAULT_CONTROLNET_SCALE,
            base_seed: None,
        }
    }
}

impl GenerationParams {
    /// Force every field into its supported range. NaN floats fall back to the default.
    pub fn clamped(self) -> Self {
        Self {
            num_images: clamp_num_images(self.num_images),
            num_inference_steps: self.num_inference_steps.clamp(MIN_STEPS, MAX_STEPS),
            guidance_scale: clamp_f32(
                self.guidance_scale,
                MIN_GUIDANCE,
                MAX_GUIDANCE,
                DEFAULT_GUIDANCE,
            ),
            controlnet_conditioning_scale: clamp_f32(
                self.controlnet_conditioning_scale,
                MIN_CONTROLNET_SCALE,
                MAX_CONTROLNET_SCALE,
                DEFAULT_CONTROLNET_SCALE,
            ),
            base_seed: self.base_seed,
        }
    }

    /// Seed for variant `index`, contiguous from the base seed.
    pub fn seed_for(&self, index: usize) -> Option<u64> {
        self.base_seed.map(|base| base.wrapping_add(index as u64))
    }
}

pub fn clamp_num_images(n: usize) -> usize {
    n.clamp(MIN_IMAGES, MAX_IMAGES)
}

fn clamp_f32(v: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if v.is_nan() { fallback } else { v.clamp(min, max) }
}

/// One call into the orchestrator. The photo is kept encoded; decoding happens
/// while building the conditioning image.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub product_image: Bytes,
    pub trend_profile: TrendProfile,
    pub brand_name: Option<String>,
    pub headline: Option<String>,
    pub params: GenerationParams,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub request_id: String,
    pub images: Vec<String>,
    pub num_generated: usize,
    pub prompt: String,
}

const PROMPT_PREVIEW_CHARS: usize = 200;

/// Preview of a prompt for the result record: first 200 chars plus `...` when cut.
pub fn prompt_preview(prompt: &str) -> String {
    if prompt.chars().count() > PROMPT_PREVIEW_CHARS {
        let head: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        prompt.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn num_images_is_clamped_into_range() {
        assert_eq!(clamp_num_images(10), 5);
        assert_eq!(clamp_num_images(1), 3);
        assert_eq!(clamp_num_images(0), 3);
        assert_eq!(clamp_num_images(4), 4);
    }

    #[test]
    fn params_clamp_every_field() {
        let params = GenerationParams {
            num_images: 9,
            num_inference_steps: 200,
            guidance_scale: 0.2,
            controlnet_conditioning_scale: f32::NAN,
            base_seed: Some(7),
        }
        .clamped();
        assert_eq!(params.num_images, 5);
        assert_eq!(params.num_inference_steps, 50);
        assert_eq!(params.guidance_scale, 1.0);
        assert_eq!(params.controlnet_conditioning_scale, 1.0);
        assert_eq!(params.base_seed, Some(7));
    }

    #[test]
    fn seeds_are_contiguous_from_base() {
        let params = GenerationParams { base_seed: Some(42), ..Default::default() };
        let seeds: Vec<_> = (0..3).map(|i| params.seed_for(i)).collect();
        assert_eq!(seeds, vec![Some(42), Some(43), Some(44)]);
        assert_eq!(GenerationParams::default().seed_for(2), None);
    }

    #[test]
    fn long_prompt_preview_is_truncated() {
        let prompt = "a".repeat(250);
        let preview = prompt_preview(&prompt);
        assert_eq!(preview.len(), 203);
        assert!(preview.ends_with("..."));
        assert_eq!(prompt_preview("short"), "short");
        assert_eq!(prompt_preview(&"b".repeat(200)).len(), 200);
    }

    #[test]
    fn trend_profile_deserializes_with_defaults() {
        let raw = r##"{"industry":"food","topColors":["#FF0000"]}"##;
        let profile: TrendProfile = serde_json::from_str(raw).unwrap();
        assert_eq!(profile.platform, "instagram");
        assert_eq!(profile.top_colors, vec!["#FF0000".to_string()]);
        assert!(profile.dominant_layouts.is_empty());
        assert_eq!(profile.avg_engagement_score, None);
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = GenerationResult {
            request_id: "abc".into(),
            images: vec!["/outputs/abc/ad_1.png".into()],
            num_generated: 1,
            prompt: "p".into(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["requestId"], "abc");
        assert_eq!(value["numGenerated"], 1);
    }
}

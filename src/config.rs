use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Service configuration loaded from environment variables.
///
/// | Env Var                | Default                                    |
/// |------------------------|--------------------------------------------|
/// | `HOST`                 | `0.0.0.0`                                  |
/// | `PORT`                 | `8000`                                     |
/// | `OUTPUT_DIR`           | `outputs`                                  |
/// | `ENGINE_URL`           | unset (demo placeholder engine)            |
/// | `BASE_MODEL_ID`        | `stabilityai/stable-diffusion-xl-base-1.0` |
/// | `CONTROLNET_MODEL_ID`  | `diffusers/controlnet-canny-sdxl-1.0`      |
/// | `ENGINE_TIMEOUT_SECS`  | `300`                                      |
/// | `BODY_LIMIT_BYTES`     | `26214400`                                 |
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub output_dir: PathBuf,
    /// Inference worker base URL. `None` runs the placeholder engine.
    pub engine_url: Option<String>,
    pub base_model_id: String,
    pub controlnet_model_id: String,
    pub engine_timeout: Duration,
    pub body_limit_bytes: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| {
            non_empty(lookup(key)).unwrap_or_else(|| default.to_string())
        };

        Self {
            host: string("HOST", "0.0.0.0"),
            port: parse_or(&lookup, "PORT", 8000),
            output_dir: PathBuf::from(string("OUTPUT_DIR", "outputs")),
            engine_url: non_empty(lookup("ENGINE_URL")),
            base_model_id: string("BASE_MODEL_ID", "stabilityai/stable-diffusion-xl-base-1.0"),
            controlnet_model_id: string(
                "CONTROLNET_MODEL_ID",
                "diffusers/controlnet-canny-sdxl-1.0",
            ),
            engine_timeout: Duration::from_secs(parse_or(&lookup, "ENGINE_TIMEOUT_SECS", 300)),
            body_limit_bytes: parse_or(&lookup, "BODY_LIMIT_BYTES", 25 * 1024 * 1024),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {} value '{}', using {}", key, raw, default);
            default
        }),
    }
}

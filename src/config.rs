use argh::FromArgs;

use crate::model::{ModelSpec, SamplingParams};

// defaults for the server
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MODEL_ID: &str = "google/paligemma-3b-mix-224";
pub const DEFAULT_MAX_IMAGE_SIZE: u32 = 512;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Environment variable holding the optional hub credential.
pub const TOKEN_ENV_VAR: &str = "HF_TOKEN";

#[derive(FromArgs, Debug)]
/// Serves a vision-language model over HTTP.
pub struct ServeArgs {
    /// the host to run the server on
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    pub host: String,

    /// the port to run the server on
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    pub port: u16,

    /// the hub identifier of the model to load
    #[argh(option, default = "DEFAULT_MODEL_ID.to_string()")]
    pub model_id: String,

    /// bound on the longest side of an image before inference
    #[argh(option, default = "DEFAULT_MAX_IMAGE_SIZE")]
    pub max_image_size: u32,

    /// largest accepted image upload in bytes
    #[argh(option, default = "DEFAULT_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: usize,

    /// maximum number of generated tokens
    #[argh(option, default = "SamplingParams::default().max_new_tokens")]
    pub max_new_tokens: usize,

    /// sampling temperature
    #[argh(option, default = "SamplingParams::default().temperature")]
    pub temperature: f64,

    /// nucleus sampling threshold
    #[argh(option, default = "SamplingParams::default().top_p")]
    pub top_p: f64,

    /// sampling seed
    #[argh(option, default = "SamplingParams::default().seed")]
    pub seed: u64,
}

/// Resolved service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub model_id: String,
    pub token: Option<String>,
    pub max_image_size: u32,
    pub max_upload_bytes: usize,
    pub sampling: SamplingParams,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model_id: DEFAULT_MODEL_ID.to_string(),
            token: None,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            sampling: SamplingParams::default(),
        }
    }
}

impl ServiceConfig {
    /// Combines launch arguments with the credential found in the environment.
    pub fn from_args(args: ServeArgs) -> Self {
        Self::from_parts(args, std::env::var(TOKEN_ENV_VAR).ok())
    }

    fn from_parts(args: ServeArgs, token: Option<String>) -> Self {
        Self {
            host: args.host,
            port: args.port,
            model_id: args.model_id,
            token: token.filter(|t| !t.trim().is_empty()),
            max_image_size: args.max_image_size,
            max_upload_bytes: args.max_upload_bytes,
            sampling: SamplingParams {
                max_new_tokens: args.max_new_tokens,
                temperature: args.temperature,
                top_p: args.top_p,
                seed: args.seed,
            },
        }
    }

    /// The `host:port` pair to bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn model_spec(&self) -> ModelSpec {
        ModelSpec {
            model_id: self.model_id.clone(),
            token: self.token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServeArgs {
        ServeArgs::from_args(&["vlm-serve"], args).unwrap()
    }

    #[test]
    fn test_argument_defaults_match_default_config() {
        let config = ServiceConfig::from_parts(parse(&[]), None);
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.addr(), "0.0.0.0:8000");
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_parts(
            parse(&["-p", "9000", "--max-image-size", "256", "--top-p", "0.5"]),
            Some("hf_abc".to_string()),
        );
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_image_size, 256);
        assert_eq!(config.sampling.top_p, 0.5);
        assert_eq!(config.token.as_deref(), Some("hf_abc"));
    }

    #[test]
    fn test_blank_token_is_absent() {
        let config = ServiceConfig::from_parts(parse(&[]), Some("  ".to_string()));
        assert!(config.token.is_none());
        assert!(config.model_spec().token.is_none());
    }
}

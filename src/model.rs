use image::RgbImage;
use serde::Serialize;

use crate::error::LoadError;
use crate::prompt::PromptFormat;

/// Compute unit the model runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl Device {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

impl Serialize for Device {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Numeric precision of the model weights.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F16,
    F32,
}

impl Precision {
    /// Half precision on an accelerator, full precision on general-purpose compute.
    pub fn for_device(device: Device) -> Self {
        if device.is_accelerator() {
            Precision::F16
        } else {
            Precision::F32
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device: Device,
    pub precision: Precision,
}

impl DeviceInfo {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            precision: Precision::for_device(device),
        }
    }
}

/// Generation-time controls, fixed for the lifetime of the process.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingParams {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            seed: 299_792_458,
        }
    }
}

/// A fully rendered prompt plus the image it refers to.
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub image: &'a RgbImage,
    pub params: &'a SamplingParams,
}

/// Raw text decoded by the model, before the orchestrator cleans it up.
pub struct GenerationOutput {
    pub text: String,
}

/// A pretrained vision-language model that turns a prompt and an image into text.
///
/// Implementations wrap a specific model library; everything above this trait is
/// independent of which library is used.
pub trait VisionLanguageModel {
    /// The error type that can be returned during generation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The prompt convention this model was trained with.
    fn prompt_format(&self) -> PromptFormat;

    /// Runs one generation pass. No gradients are tracked.
    fn generate(&mut self, request: GenerationRequest<'_>) -> Result<GenerationOutput, Self::Error>;
}

/// What to load: a model identifier and an optional hub credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    pub model_id: String,
    pub token: Option<String>,
}

/// A loaded model handle together with the device it was placed on.
pub struct LoadedModel<M> {
    pub model: M,
    pub device: DeviceInfo,
}

/// Resolves a [`ModelSpec`] into a ready-to-run model. Called once at startup.
pub trait ModelLoader {
    type Model: VisionLanguageModel + Send + 'static;

    fn load(&self, spec: &ModelSpec) -> Result<LoadedModel<Self::Model>, LoadError>;
}

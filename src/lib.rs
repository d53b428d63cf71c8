//! Serves a pretrained vision-language model behind a small HTTP API.
//!
//! A model library is plugged in through [`ModelLoader`] and [`VisionLanguageModel`];
//! the rest of the crate (image normalization, prompt rendering, the inference worker
//! and the HTTP surface) does not depend on which library that is.
//!
//! Provides:
//! - `GET /health` — status and load flag
//! - `GET /status` — full status snapshot
//! - `POST /process` — multipart `text` + `image`, returns the generated text

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod orchestrator;
#[cfg(feature = "paligemma")]
pub mod paligemma;
pub mod preprocess;
pub mod prompt;
pub mod server;
pub mod state;

pub use config::ServiceConfig;
pub use engine::{EngineRequest, EngineResponse, EngineState, InferenceEngine};
pub use error::{DecodeError, Error, InferenceError, LoadError};
pub use model::{
    Device, DeviceInfo, GenerationOutput, GenerationRequest, LoadedModel, ModelLoader, ModelSpec,
    Precision, SamplingParams, VisionLanguageModel,
};
pub use state::{AppState, ServiceStatus, StatusSnapshot};

use thiserror::Error;

/// Failures while resolving, downloading or constructing the model.
///
/// Any of these leaves the service in the `error` status until restart.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported model identifier: {0}")]
    UnsupportedModel(String),

    #[error("failed to fetch {file} from the hub: {message}")]
    Hub { file: String, message: String },

    #[error("model backend failed to initialize: {0}")]
    Backend(String),

    #[error("model loading panicked: {0}")]
    Panicked(String),
}

/// Failures while turning uploaded bytes into pixels.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image data is empty")]
    EmptyData,

    #[error("image data is too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: usize, max: usize },

    /// The upload was cut off by the request body limit before it was fully read.
    #[error("image data is too large: upload exceeds {max} bytes")]
    UploadTooLarge { max: usize },

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Failures between a decoded request and the generated text.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("prompt text is empty")]
    EmptyPrompt,

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("model produced no text")]
    EmptyOutput,

    #[error("inference engine is not running")]
    EngineStopped,

    #[error("inference panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Renders a panic payload caught with `catch_unwind` as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

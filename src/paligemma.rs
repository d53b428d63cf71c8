//! Paligemma backend built on `kornia-vlm`.

use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use image::RgbImage;
use kornia_image::{Image, ImageSize, allocator::CpuAllocator};
use kornia_vlm::paligemma::{Paligemma, PaligemmaConfig, PaligemmaError};
use std::collections::BTreeSet;

use crate::error::LoadError;
use crate::model::{
    Device, DeviceInfo, GenerationOutput, GenerationRequest, LoadedModel, ModelLoader, ModelSpec,
    SamplingParams, VisionLanguageModel,
};
use crate::prompt::PromptFormat;

/// The checkpoint `Paligemma::new` builds; the loader cannot be pointed at another one.
pub const SUPPORTED_MODEL_ID: &str = "google/paligemma-3b-mix-224";
const METADATA_FILES: &[&str] = &["config.json", "tokenizer.json"];
const WEIGHT_INDEX: &str = "model.safetensors.index.json";

#[derive(Debug, thiserror::Error)]
pub enum PaligemmaBackendError {
    #[error("invalid input image: {0}")]
    Image(#[from] kornia_image::ImageError),

    #[error(transparent)]
    Model(#[from] PaligemmaError),
}

// custom model that uses Paligemma to run inference
pub struct PaligemmaModel(Paligemma);

impl VisionLanguageModel for PaligemmaModel {
    type Error = PaligemmaBackendError;

    fn prompt_format(&self) -> PromptFormat {
        PromptFormat::Plain
    }

    fn generate(&mut self, request: GenerationRequest<'_>) -> Result<GenerationOutput, Self::Error> {
        let image = to_kornia_image(request.image)?;
        let text =
            self.0
                .inference(&image, request.prompt, request.params.max_new_tokens, false)?;
        Ok(GenerationOutput { text })
    }
}

fn to_kornia_image(image: &RgbImage) -> Result<Image<u8, 3, CpuAllocator>, kornia_image::ImageError> {
    let size = ImageSize {
        width: image.width() as usize,
        height: image.height() as usize,
    };
    Image::new(size, image.as_raw().clone(), CpuAllocator)
}

/// Loads Paligemma with fixed sampling parameters.
#[derive(Debug, Clone)]
pub struct PaligemmaLoader {
    sampling: SamplingParams,
}

impl PaligemmaLoader {
    pub fn new(sampling: SamplingParams) -> Self {
        Self { sampling }
    }

    /// Downloads metadata and every weight shard into the shared hub cache.
    fn prefetch(&self, spec: &ModelSpec) -> Result<usize, LoadError> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(token) = &spec.token {
            builder = builder.with_token(Some(token.clone()));
        } else {
            log::warn!("No hub token set, gated checkpoints will fail to download");
        }
        let api = builder.build().map_err(|e| LoadError::Hub {
            file: spec.model_id.clone(),
            message: e.to_string(),
        })?;
        let repo = api.model(spec.model_id.clone());

        for file in METADATA_FILES {
            fetch(&repo, file)?;
        }

        let index_path = fetch(&repo, WEIGHT_INDEX)?;
        let index = std::fs::read_to_string(&index_path).map_err(|e| LoadError::Hub {
            file: WEIGHT_INDEX.to_string(),
            message: e.to_string(),
        })?;
        let shards = shard_names(&index)?;
        for shard in &shards {
            fetch(&repo, shard)?;
        }

        Ok(METADATA_FILES.len() + 1 + shards.len())
    }

    fn build(&self, device: Device) -> Result<Paligemma, LoadError> {
        Paligemma::new(PaligemmaConfig {
            seed: self.sampling.seed,
            temp: Some(self.sampling.temperature),
            top_p: Some(self.sampling.top_p),
            use_cuda: device.is_accelerator(),
            ..Default::default()
        })
        .map_err(|e| LoadError::Backend(e.to_string()))
    }
}

impl ModelLoader for PaligemmaLoader {
    type Model = PaligemmaModel;

    fn load(&self, spec: &ModelSpec) -> Result<LoadedModel<PaligemmaModel>, LoadError> {
        validate_model_id(&spec.model_id)?;

        log::info!("Loading {} ...", spec.model_id);
        let files = self.prefetch(spec)?;
        log::info!("Fetched {files} files for {}", spec.model_id);

        let mut last_error = None;
        for device in candidate_devices() {
            match self.build(device) {
                Ok(model) => {
                    return Ok(LoadedModel {
                        model: PaligemmaModel(model),
                        device: DeviceInfo::new(device),
                    });
                }
                Err(e) => {
                    log::warn!("Could not load the model on {device}: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LoadError::Backend("no device available".to_string())))
    }
}

fn fetch(repo: &ApiRepo, file: &str) -> Result<std::path::PathBuf, LoadError> {
    log::debug!("Fetching {file}");
    repo.get(file).map_err(|e| LoadError::Hub {
        file: file.to_string(),
        message: e.to_string(),
    })
}

/// Accelerator first when compiled in, then general-purpose compute.
pub fn candidate_devices() -> Vec<Device> {
    if cfg!(feature = "cuda") {
        vec![Device::Cuda(0), Device::Cpu]
    } else {
        vec![Device::Cpu]
    }
}

pub fn validate_model_id(model_id: &str) -> Result<(), LoadError> {
    if model_id == SUPPORTED_MODEL_ID {
        Ok(())
    } else {
        Err(LoadError::UnsupportedModel(model_id.to_string()))
    }
}

/// Unique shard file names listed in a safetensors index `weight_map`.
pub fn shard_names(index_json: &str) -> Result<Vec<String>, LoadError> {
    let malformed = |message: String| LoadError::Hub {
        file: WEIGHT_INDEX.to_string(),
        message,
    };

    let index: serde_json::Value =
        serde_json::from_str(index_json).map_err(|e| malformed(e.to_string()))?;
    let weight_map = index
        .get("weight_map")
        .and_then(|v| v.as_object())
        .ok_or_else(|| malformed("missing `weight_map`".to_string()))?;

    let shards: BTreeSet<&str> = weight_map.values().filter_map(|v| v.as_str()).collect();
    if shards.is_empty() {
        return Err(malformed("`weight_map` lists no shards".to_string()));
    }
    Ok(shards.into_iter().map(str::to_owned).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_names_are_unique_and_sorted() {
        let index = r#"{
            "metadata": {"total_size": 1},
            "weight_map": {
                "a.weight": "model-00002-of-00002.safetensors",
                "b.weight": "model-00001-of-00002.safetensors",
                "c.weight": "model-00002-of-00002.safetensors"
            }
        }"#;
        assert_eq!(
            shard_names(index).unwrap(),
            vec![
                "model-00001-of-00002.safetensors",
                "model-00002-of-00002.safetensors"
            ]
        );
    }

    #[test]
    fn test_shard_names_rejects_bad_index() {
        assert!(shard_names("{}").is_err());
        assert!(shard_names(r#"{"weight_map": {}}"#).is_err());
        assert!(shard_names("not json").is_err());
    }

    #[test]
    fn test_only_the_built_in_checkpoint_is_accepted() {
        assert!(validate_model_id(SUPPORTED_MODEL_ID).is_ok());
        assert_eq!(SUPPORTED_MODEL_ID, crate::config::DEFAULT_MODEL_ID);
        for id in [
            "google/paligemma2-3b-pt-224",
            "google/paligemma-3b-pt-224",
            "google/paligemma-3b-mix-224-extra",
            "Qwen/Qwen2.5-VL-3B-Instruct",
        ] {
            assert!(
                matches!(validate_model_id(id), Err(LoadError::UnsupportedModel(_))),
                "{id} should be rejected"
            );
        }
    }

    #[test]
    fn test_cpu_is_always_a_candidate() {
        let devices = candidate_devices();
        assert_eq!(devices.last(), Some(&Device::Cpu));
        assert_eq!(devices.len(), if cfg!(feature = "cuda") { 2 } else { 1 });
    }

    #[test]
    fn test_unsupported_model_fails_before_download() {
        let loader = PaligemmaLoader::new(SamplingParams::default());
        let spec = ModelSpec {
            model_id: "google/paligemma2-3b-pt-224".to_string(),
            token: None,
        };
        assert!(matches!(
            loader.load(&spec),
            Err(LoadError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_rgb_image_converts_to_kornia() {
        let rgb = RgbImage::from_pixel(4, 2, image::Rgb([1, 2, 3]));
        let converted = to_kornia_image(&rgb).unwrap();
        let size = converted.size();
        assert_eq!((size.width, size.height), (4, 2));
    }
}

use image::RgbImage;

use crate::error::InferenceError;
use crate::model::{GenerationRequest, SamplingParams, VisionLanguageModel};
use crate::prompt::{Conversation, PromptFormat};

/// Runs one text+image request through `model` and returns the cleaned-up answer.
pub fn process_multimodal_input<M: VisionLanguageModel>(
    model: &mut M,
    text: &str,
    image: &RgbImage,
    params: &SamplingParams,
) -> Result<String, InferenceError> {
    if text.trim().is_empty() {
        return Err(InferenceError::EmptyPrompt);
    }

    log::info!("Processing multimodal input: {text}");

    let format = model.prompt_format();
    let conversation = Conversation::single_turn(text);
    let prompt = format.render(&conversation, true);

    let output = model
        .generate(GenerationRequest {
            prompt: &prompt,
            image,
            params,
        })
        .map_err(|e| {
            log::error!("Error processing multimodal input: {e}");
            InferenceError::Generation(e.to_string())
        })?;

    let response = decode_response(&output.text, &prompt, format);
    if response.is_empty() {
        return Err(InferenceError::EmptyOutput);
    }

    log::info!("Response generated successfully");
    Ok(response)
}

/// Keeps only the newly generated span: drops an echoed prompt, special markers and
/// surrounding whitespace.
pub fn decode_response(raw: &str, prompt: &str, format: PromptFormat) -> String {
    let generated = raw.strip_prefix(prompt).unwrap_or(raw);

    let mut text = generated.to_string();
    for token in format.special_tokens() {
        text = text.replace(token, "");
    }
    text.trim().to_string()
}

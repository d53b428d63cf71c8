//! Chat-style conversation structure and its rendering into model prompts.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One piece of a message. The image part is a placeholder; pixels travel separately.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    /// A single user turn pairing `text` with the request image, text first.
    pub fn single_turn(text: &str) -> Self {
        Self {
            messages: vec![Message {
                role: Role::User,
                content: vec![ContentPart::Text(text.to_string()), ContentPart::Image],
            }],
        }
    }
}

/// Prompt convention a model expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptFormat {
    /// Bare text; the model's processor injects the image tokens itself (Paligemma).
    Plain,
    /// `<|im_start|>` chat markup with inline vision placeholders (Qwen-VL).
    ChatMl,
}

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";
const VISION_PLACEHOLDER: &str = "<|vision_start|><|image_pad|><|vision_end|>";

impl PromptFormat {
    /// Renders the conversation. With `add_generation_prompt` the output ends where the
    /// assistant's reply should begin.
    pub fn render(&self, conversation: &Conversation, add_generation_prompt: bool) -> String {
        match self {
            PromptFormat::Plain => conversation
                .messages
                .iter()
                .flat_map(|m| m.content.iter())
                .filter_map(|part| match part {
                    ContentPart::Text(text) => Some(text.as_str()),
                    ContentPart::Image => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            PromptFormat::ChatMl => {
                let mut prompt = String::new();
                for message in &conversation.messages {
                    prompt.push_str(IM_START);
                    prompt.push_str(message.role.as_str());
                    prompt.push('\n');
                    for part in &message.content {
                        match part {
                            ContentPart::Text(text) => prompt.push_str(text),
                            ContentPart::Image => prompt.push_str(VISION_PLACEHOLDER),
                        }
                    }
                    prompt.push_str(IM_END);
                    prompt.push('\n');
                }
                if add_generation_prompt {
                    prompt.push_str(IM_START);
                    prompt.push_str(Role::Assistant.as_str());
                    prompt.push('\n');
                }
                prompt
            }
        }
    }

    /// Markers that may leak into decoded output and are never part of the answer.
    pub fn special_tokens(&self) -> &'static [&'static str] {
        match self {
            PromptFormat::Plain => &["<eos>", "<bos>", "<pad>"],
            PromptFormat::ChatMl => &[
                IM_START,
                IM_END,
                "<|endoftext|>",
                "<|vision_start|>",
                "<|vision_end|>",
                "<|image_pad|>",
            ],
        }
    }
}

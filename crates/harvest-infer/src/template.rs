use std::fmt;
use std::str::FromStr;

use crate::error::InferenceError;

/// Chat formats understood by the fine-tuned adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatTemplate {
    #[default]
    Llama3,
    ChatMl,
}

impl ChatTemplate {
    /// Wrap a single user turn and open the assistant turn so the model
    /// continues with its reply.
    pub fn render(&self, prompt: &str) -> String {
        match self {
            ChatTemplate::Llama3 => format!(
                "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n{prompt}<|eot_id|>\
                 <|start_header_id|>assistant<|end_header_id|>\n\n"
            ),
            ChatTemplate::ChatMl => {
                format!("<|im_start|>user\n{prompt}<|im_end|>\n<|im_start|>assistant\n")
            }
        }
    }

    /// Special tokens that end an assistant turn in this format.
    pub fn stop_tokens(&self) -> &'static [&'static str] {
        match self {
            ChatTemplate::Llama3 => &["<|eot_id|>", "<|end_of_text|>"],
            ChatTemplate::ChatMl => &["<|im_end|>", "<|endoftext|>"],
        }
    }
}

impl FromStr for ChatTemplate {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "llama-3" | "llama3" => Ok(ChatTemplate::Llama3),
            "chatml" => Ok(ChatTemplate::ChatMl),
            other => Err(InferenceError::UnknownTemplate(other.to_string())),
        }
    }
}

impl fmt::Display for ChatTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatTemplate::Llama3 => write!(f, "llama-3"),
            ChatTemplate::ChatMl => write!(f, "chatml"),
        }
    }
}

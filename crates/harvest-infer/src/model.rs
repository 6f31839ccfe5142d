use anyhow::Result;
use std::path::Path;

use crate::error::InferenceError;

/// A causal language model that scores the next token.
pub trait CausalLm {
    /// Switch to inference mode. Called once right after loading.
    fn prepare_for_inference(&mut self) -> Result<()> {
        Ok(())
    }

    /// Logits over the vocabulary for the token following `tokens`.
    fn next_token_logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>>;
}

pub trait TextTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    fn decode(&self, tokens: &[u32]) -> Result<String>;
    /// Token ids that end generation.
    fn eos_token_ids(&self) -> Vec<u32>;

    /// Id of a single special token, if the vocabulary has it.
    fn token_id(&self, _token: &str) -> Option<u32> {
        None
    }
}

/// A model paired with its tokenizer, ready for generation.
pub struct LoadedModel {
    pub model: Box<dyn CausalLm>,
    pub tokenizer: Box<dyn TextTokenizer>,
}

/// Builds a [`LoadedModel`] from an extracted adapter directory.
pub trait ModelLoader {
    fn load(&self, dir: &Path) -> Result<LoadedModel>;
}

/// Loader used when the binary has no model runtime compiled in.
pub struct UnavailableLoader;

impl ModelLoader for UnavailableLoader {
    fn load(&self, _dir: &Path) -> Result<LoadedModel> {
        Err(InferenceError::BackendUnavailable.into())
    }
}

/// The loader for this build: ONNX Runtime when the `onnx` feature is on.
pub fn default_loader() -> Box<dyn ModelLoader> {
    #[cfg(feature = "onnx")]
    {
        Box::new(crate::onnx::OnnxLoader::default())
    }
    #[cfg(not(feature = "onnx"))]
    {
        Box::new(UnavailableLoader)
    }
}

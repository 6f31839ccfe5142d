use anyhow::{anyhow, Result};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::Tensor;
use std::path::Path;

use crate::archive::locate;
use crate::model::{CausalLm, LoadedModel, ModelLoader, TextTokenizer};

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// End-of-sequence markers used by common tokenizers. Turn terminators
/// come from the chat template.
const EOS_TOKENS: [&str; 4] = ["<|end_of_text|>", "<|endoftext|>", "</s>", "<eos>"];

/// Loads an exported decoder (`model.onnx`) and its `tokenizer.json`.
///
/// The graph must take `input_ids` and `attention_mask` and return `logits`
/// shaped `[batch, seq, vocab]`.
#[derive(Debug, Clone, Default)]
pub struct OnnxLoader;

impl ModelLoader for OnnxLoader {
    fn load(&self, dir: &Path) -> Result<LoadedModel> {
        let model_path = locate(dir, MODEL_FILE)?;
        let tokenizer_path = locate(dir, TOKENIZER_FILE)?;

        ort::init()
            .with_name("harvest-infer")
            .commit()
            .map_err(|e| anyhow!("Failed to initialize ONNX Runtime: {}", e))?;

        tracing::info!(model = %model_path.display(), "Loading ONNX model");
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&model_path)
            .map_err(|e| anyhow!("Failed to load {}: {}", model_path.display(), e))?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load {}: {}", tokenizer_path.display(), e))?;

        Ok(LoadedModel {
            model: Box::new(OnnxCausalLm { session }),
            tokenizer: Box::new(HfTokenizer { inner: tokenizer }),
        })
    }
}

pub struct OnnxCausalLm {
    session: Session,
}

impl CausalLm for OnnxCausalLm {
    fn next_token_logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>> {
        let length = tokens.len();
        let ids: Vec<i64> = tokens.iter().map(|&t| t as i64).collect();
        let mask = vec![1i64; length];

        let ids = Tensor::from_array(([1, length], ids.into_boxed_slice()))?;
        let mask = Tensor::from_array(([1, length], mask.into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs![
            "input_ids" => ids,
            "attention_mask" => mask
        ])?;

        last_position_logits(&outputs)
    }
}

fn last_position_logits(outputs: &SessionOutputs<'_>) -> Result<Vec<f32>> {
    let logits = outputs.get("logits").ok_or_else(|| {
        anyhow!(
            "No logits output - available outputs: {:?}",
            outputs.keys().collect::<Vec<_>>()
        )
    })?;

    let (shape, data) = logits.try_extract_tensor::<f32>()?;
    let vocab = shape.last().copied().unwrap_or(0) as usize;
    if vocab == 0 || data.len() < vocab {
        return Err(anyhow!("Unexpected logits shape {:?}", shape));
    }
    Ok(data[data.len() - vocab..].to_vec())
}

pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        // The chat template already spells out the special tokens.
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.inner
            .decode(tokens, true)
            .map_err(|e| anyhow!("Detokenization failed: {}", e))
    }

    fn eos_token_ids(&self) -> Vec<u32> {
        EOS_TOKENS
            .iter()
            .filter_map(|t| self.inner.token_to_id(t))
            .collect()
    }

    fn token_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }
}

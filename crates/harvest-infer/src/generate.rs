use anyhow::Result;
use std::io::Write;
use std::path::Path;

use crate::error::InferenceError;
use crate::model::{LoadedModel, ModelLoader};
use crate::sampling::{Sampler, SamplingConfig};
use crate::template::ChatTemplate;

pub const DEFAULT_MAX_NEW_TOKENS: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub sampling: SamplingConfig,
    pub template: ChatTemplate,
    /// Fixed seed for reproducible sampling; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            sampling: SamplingConfig::default(),
            template: ChatTemplate::default(),
            seed: None,
        }
    }
}

/// Receives text as soon as it is decoded.
pub trait TokenSink {
    fn emit(&mut self, text: &str) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Streams generated text to stdout, flushing after every piece.
pub struct StdoutSink;

impl TokenSink for StdoutSink {
    fn emit(&mut self, text: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        println!();
        Ok(())
    }
}

impl TokenSink for String {
    fn emit(&mut self, text: &str) -> Result<()> {
        self.push_str(text);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    EndOfSequence,
    MaxTokens,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub tokens: Vec<u32>,
    pub finish: FinishReason,
}

/// Holds the loaded model between generations.
#[derive(Default)]
pub struct InferenceSession {
    loaded: Option<LoadedModel>,
}

impl InferenceSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the adapter in `dir` and put it in inference mode.
    pub fn load(&mut self, loader: &dyn ModelLoader, dir: &Path) -> Result<()> {
        let mut loaded = loader.load(dir)?;
        loaded.model.prepare_for_inference()?;
        tracing::info!(dir = %dir.display(), "Model ready for inference");
        self.loaded = Some(loaded);
        Ok(())
    }

    /// Install an already constructed model.
    pub fn set_model(&mut self, mut loaded: LoadedModel) -> Result<()> {
        loaded.model.prepare_for_inference()?;
        self.loaded = Some(loaded);
        Ok(())
    }

    /// Generate a reply to `prompt`, streaming decoded text to `sink`.
    ///
    /// At most `max_new_tokens` tokens are produced. Generation also stops
    /// at the tokenizer's end-of-sequence tokens or the template's turn
    /// terminators; the stop token itself is not emitted.
    pub fn generate(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        sink: &mut dyn TokenSink,
    ) -> Result<Generation> {
        let loaded = self.loaded.as_mut().ok_or(InferenceError::ModelNotLoaded)?;

        let rendered = config.template.render(prompt);
        let mut context = loaded.tokenizer.encode(&rendered)?;
        let mut eos = loaded.tokenizer.eos_token_ids();
        eos.extend(
            config
                .template
                .stop_tokens()
                .iter()
                .filter_map(|t| loaded.tokenizer.token_id(t)),
        );
        let mut sampler = Sampler::new(config.sampling, config.seed);
        let mut stream = TextStream::default();
        let mut generated = Vec::with_capacity(config.max_new_tokens);
        let mut finish = FinishReason::MaxTokens;

        tracing::debug!(
            prompt_tokens = context.len(),
            max_new_tokens = config.max_new_tokens,
            temperature = config.sampling.temperature,
            min_p = config.sampling.min_p,
            "Starting generation"
        );

        while generated.len() < config.max_new_tokens {
            let logits = loaded.model.next_token_logits(&context)?;
            let token = sampler.sample(&logits)?;
            if eos.contains(&token) {
                finish = FinishReason::EndOfSequence;
                break;
            }
            context.push(token);
            generated.push(token);

            let text = loaded.tokenizer.decode(&generated)?;
            if let Some(piece) = stream.advance(&text) {
                sink.emit(piece)?;
            }
        }

        let text = loaded.tokenizer.decode(&generated)?;
        if let Some(rest) = stream.flush(&text) {
            sink.emit(rest)?;
        }
        sink.finish()?;

        tracing::debug!(new_tokens = generated.len(), ?finish, "Generation finished");
        Ok(Generation {
            text,
            tokens: generated,
            finish,
        })
    }
}

/// Tracks how much of the decoded text has already been emitted.
#[derive(Default)]
struct TextStream {
    emitted: usize,
}

impl TextStream {
    /// New text since the last call, held back while the tail is an
    /// incomplete multi-byte sequence.
    fn advance<'a>(&mut self, text: &'a str) -> Option<&'a str> {
        if text.ends_with('\u{FFFD}') {
            return None;
        }
        self.take(text)
    }

    fn flush<'a>(&mut self, text: &'a str) -> Option<&'a str> {
        self.take(text)
    }

    fn take<'a>(&mut self, text: &'a str) -> Option<&'a str> {
        if text.len() <= self.emitted || !text.is_char_boundary(self.emitted) {
            return None;
        }
        let piece = &text[self.emitted..];
        self.emitted = text.len();
        Some(piece)
    }
}

/// Run a prompt against an already extracted adapter directory.
pub fn generate_from_dir(
    loader: &dyn ModelLoader,
    dir: &Path,
    prompt: &str,
    config: &GenerationConfig,
    sink: &mut dyn TokenSink,
) -> Result<Generation> {
    let mut session = InferenceSession::new();
    session.load(loader, dir)?;
    session.generate(prompt, config, sink)
}

//! Prompting a fine-tuned adapter bundle.
//!
//! The bundle arrives as a zip archive holding the exported model and its
//! tokenizer. It is extracted, loaded through a [`ModelLoader`], and
//! prompted through a chat template with temperature and min-p sampling
//! while the reply streams to a [`TokenSink`].

use anyhow::Result;
use std::path::Path;

pub mod archive;
pub mod error;
pub mod generate;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod sampling;
pub mod template;
#[cfg(test)]
mod testing;

pub use archive::{archive_path, extract_archive};
pub use error::InferenceError;
pub use generate::{
    FinishReason, Generation, GenerationConfig, InferenceSession, StdoutSink, TokenSink,
    DEFAULT_MAX_NEW_TOKENS,
};
pub use model::{default_loader, CausalLm, LoadedModel, ModelLoader, TextTokenizer};
pub use sampling::{SamplingConfig, DEFAULT_MIN_P, DEFAULT_TEMPERATURE};
pub use template::ChatTemplate;

/// Extract `<workdir>/<name>.zip`, load the model inside, and answer `prompt`.
pub fn run(
    workdir: &Path,
    archive_name: &str,
    loader: &dyn ModelLoader,
    prompt: &str,
    config: &GenerationConfig,
    sink: &mut dyn TokenSink,
) -> Result<Generation> {
    let model_dir = extract_archive(workdir, archive_name)?;
    generate::generate_from_dir(loader, &model_dir, prompt, config, sink)
}

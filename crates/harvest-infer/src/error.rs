use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("archive not found: {0}")]
    ArchiveNotFound(PathBuf),

    #[error("failed to extract {archive}: {message}")]
    ExtractionFailed { archive: PathBuf, message: String },

    #[error("{file} not found under {dir}")]
    MissingModelFile { dir: PathBuf, file: &'static str },

    #[error("no model loaded; load a model before generating")]
    ModelNotLoaded,

    #[error("model returned no usable logits")]
    EmptyLogits,

    #[error("built without a model runtime; rebuild with `--features onnx`")]
    BackendUnavailable,

    #[error("unknown chat template '{0}' (expected llama-3 or chatml)")]
    UnknownTemplate(String),
}

//! Scripted model and byte tokenizer for exercising generation without a runtime.

use anyhow::Result;
use std::cell::Cell;
use std::rc::Rc;

use crate::model::{CausalLm, TextTokenizer};

pub const EOS: u32 = 0;
pub const IM_END: u32 = 300;

/// Byte-level token ids, offset by one so zero stays free for EOS.
pub fn tokens(text: &str) -> Vec<u32> {
    text.bytes().map(|b| b as u32 + 1).collect()
}

pub struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(tokens(text))
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = tokens.iter().map(|&t| (t - 1) as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token_ids(&self) -> Vec<u32> {
        vec![EOS]
    }

    fn token_id(&self, token: &str) -> Option<u32> {
        (token == "<|im_end|>").then_some(IM_END)
    }
}

/// Puts all probability on the next token of `script`, then on EOS.
pub struct ScriptedModel {
    script: Vec<u32>,
    prompt_len: Option<usize>,
    prepared: Rc<Cell<bool>>,
}

impl ScriptedModel {
    pub fn new(reply: &str, prepared: Rc<Cell<bool>>) -> Self {
        Self::from_tokens(tokens(reply), prepared)
    }

    pub fn from_tokens(script: Vec<u32>, prepared: Rc<Cell<bool>>) -> Self {
        Self {
            script,
            prompt_len: None,
            prepared,
        }
    }
}

impl CausalLm for ScriptedModel {
    fn prepare_for_inference(&mut self) -> Result<()> {
        self.prepared.set(true);
        Ok(())
    }

    fn next_token_logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>> {
        let start = *self.prompt_len.get_or_insert(tokens.len());
        let step = tokens.len() - start;
        let next = self.script.get(step).copied().unwrap_or(EOS);
        let mut logits = vec![-10.0; 512];
        logits[next as usize] = 10.0;
        Ok(logits)
    }
}

/// Write `files` under a `bundle/` folder and zip it as `<workdir>/<name>.zip`.
///
/// Returns `false` when `zip` or `unzip` is not installed.
pub fn zip_fixture(workdir: &std::path::Path, name: &str, files: &[(&str, &str)]) -> bool {
    let unzip = std::process::Command::new("unzip")
        .arg("-v")
        .stdout(std::process::Stdio::null())
        .status();
    if unzip.is_err() {
        eprintln!("unzip not installed, skipping archive fixture");
        return false;
    }

    let staging = workdir.join(format!("staging-{name}"));
    let bundle = staging.join("bundle");
    std::fs::create_dir_all(&bundle).unwrap();
    for (file, contents) in files {
        std::fs::write(bundle.join(file), contents).unwrap();
    }

    let archive = workdir.join(format!("{name}.zip"));
    let _ = std::fs::remove_file(&archive);
    match std::process::Command::new("zip")
        .arg("-qr")
        .arg(&archive)
        .arg("bundle")
        .current_dir(&staging)
        .status()
    {
        Ok(status) => {
            assert!(status.success(), "zip failed for {}", archive.display());
            true
        }
        Err(_) => {
            eprintln!("zip not installed, skipping archive fixture");
            false
        }
    }
}

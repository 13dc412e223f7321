use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::native::{NativeModel, SamplingParams, RANDOM_SEED};
use crate::textutil::render_template;

/// Prompt format of T5 paraphrase checkpoints fine-tuned on PAWS.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "paraphrase: {{text}} </s>";

static SPECIAL_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?s>|<pad>|<unk>|<\|endoftext\|>").expect("special tokens"));
static ECHOED_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(paraphrase|paraphrased)\s*:\s*").expect("echo prefix"));

#[derive(Clone, Debug, PartialEq)]
pub struct ParaphraseSettings {
    pub prompt_template: String,
    pub sampling: SamplingParams,
}

impl Default for ParaphraseSettings {
    fn default() -> Self {
        Self {
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            sampling: SamplingParams {
                max_tokens: 256,
                temperature: 1.0,
                top_k: Some(120),
                top_p: 0.95,
                repeat_penalty: None,
                seed: RANDOM_SEED,
            },
        }
    }
}

/// One model call: what was sent, what came back, and the cleaned replacement text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub prompt: String,
    pub raw: String,
    pub text: String,
}

pub trait Paraphraser {
    fn name(&self) -> &str;

    /// Produce one rewritten variant of `text`. Calls are independent; the same input may
    /// yield different output.
    fn paraphrase(&mut self, text: &str) -> anyhow::Result<Generation>;
}

pub struct ModelParaphraser {
    model: NativeModel,
    settings: ParaphraseSettings,
}

impl ModelParaphraser {
    pub fn new(model: NativeModel, settings: ParaphraseSettings) -> Self {
        Self { model, settings }
    }
}

impl Paraphraser for ModelParaphraser {
    fn name(&self) -> &str {
        &self.model.name
    }

    fn paraphrase(&mut self, text: &str) -> anyhow::Result<Generation> {
        let prompt = render_prompt(&self.settings.prompt_template, text);
        let raw = self
            .model
            .complete(&prompt, &self.settings.sampling)
            .with_context(|| format!("generate paraphrase with {}", self.model.name))?;
        let text = clean_generated(&raw)?;
        Ok(Generation { prompt, raw, text })
    }
}

/// The paragraph is inserted exactly as extracted, surrounding whitespace included.
pub fn render_prompt(template: &str, text: &str) -> String {
    render_template(template, &[("text", text)])
}

/// Strip sequence markers and an echoed task prefix from raw model output.
pub fn clean_generated(raw: &str) -> anyhow::Result<String> {
    let without_tokens = SPECIAL_TOKEN_RE.replace_all(raw, "");
    let cleaned = ECHOED_PREFIX_RE.replace(without_tokens.trim(), "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(anyhow!("model returned an empty paraphrase (raw={raw:?})"));
    }
    Ok(cleaned.to_string())
}

use std::num::NonZeroU32;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use encoding_rs::UTF_8;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::DecodeError;

/// llama.cpp picks a fresh random seed when handed this value.
pub const RANDOM_SEED: u32 = u32::MAX;

#[derive(Clone, Debug)]
pub struct NativeModelConfig {
    pub name: String,
    pub model_path: PathBuf,
    pub ctx_size: u32,
    pub threads: i32,
    pub gpu_layers: i32,
    pub batch_size: Option<u32>,
    pub ubatch_size: Option<u32>,
    pub offload_kqv: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_k: Option<u32>,
    pub top_p: f32,
    pub repeat_penalty: Option<f32>,
    pub seed: u32,
}

pub struct NativeModel {
    pub name: String,
    pub model_path: PathBuf,
    pub ctx_size: u32,
    has_encoder: bool,
    model: Option<Box<LlamaModel>>,
    ctx: Option<LlamaContext<'static>>,
}

impl NativeModel {
    pub fn load(backend: &LlamaBackend, cfg: NativeModelConfig) -> anyhow::Result<Self> {
        if !cfg.model_path.exists() {
            return Err(anyhow!(
                "{} model not found: {}",
                cfg.name,
                cfg.model_path.display()
            ));
        }

        let mut model_params = LlamaModelParams::default();
        if cfg.gpu_layers == -1 {
            // Values above n_layer offload every layer.
            model_params = model_params.with_n_gpu_layers(9999);
        } else if cfg.gpu_layers >= 0 {
            model_params = model_params.with_n_gpu_layers(cfg.gpu_layers as u32);
        }

        let model = Box::new(
            LlamaModel::load_from_file(backend, &cfg.model_path, &model_params)
                .with_context(|| format!("load model {}", cfg.model_path.display()))?,
        );
        // `LlamaContext` borrows `LlamaModel`. The model lives in a `Box` (stable address) and
        // the borrow is widened to `'static` for the context.
        // SAFETY:
        // - The model allocation remains valid as long as `self.model` is `Some`.
        // - `Drop` takes `ctx` before `model`.
        let model_ptr: *const LlamaModel = &*model;
        let model_ref: &'static LlamaModel = unsafe { &*model_ptr };

        let has_encoder = model_ref
            .meta_val_str("general.architecture")
            .map(|arch| is_encoder_arch(&arch))
            .unwrap_or(false);

        let ctx_train = model_ref.n_ctx_train();
        let mut ctx_size = if cfg.ctx_size == 0 {
            ctx_train.max(2048)
        } else {
            cfg.ctx_size
        };
        if ctx_train > 0 && ctx_size > ctx_train {
            ctx_size = ctx_train;
        }
        ctx_size = ctx_size.max(256);

        let n_batch: u32 = cfg.batch_size.unwrap_or(512).clamp(8, 65536);
        let n_ubatch: u32 = cfg.ubatch_size.unwrap_or(n_batch).clamp(1, n_batch);
        let mut ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(ctx_size))
            .with_n_batch(n_batch)
            .with_n_ubatch(n_ubatch);
        if let Some(offload) = cfg.offload_kqv {
            ctx_params = ctx_params.with_offload_kqv(offload);
        }
        if cfg.threads > 0 {
            ctx_params = ctx_params
                .with_n_threads(cfg.threads)
                .with_n_threads_batch(cfg.threads);
        }
        let ctx = model_ref
            .new_context(backend, ctx_params)
            .context("create model context")?;

        Ok(Self {
            name: cfg.name,
            model_path: cfg.model_path,
            ctx_size,
            has_encoder,
            model: Some(model),
            ctx: Some(ctx),
        })
    }

    /// Generate from `prompt` verbatim (no chat template) and return the generated text.
    /// Encoder-decoder models encode the prompt and decode from the decoder start token;
    /// decoder-only models continue the prompt.
    pub fn complete(&mut self, prompt: &str, params: &SamplingParams) -> anyhow::Result<String> {
        self.ctx_mut()?.clear_kv_cache();

        let prompt_tokens = self
            .model_ref()?
            .str_to_token(prompt, decide_add_bos(prompt))
            .context("tokenize prompt")?;
        let model = self.model_ref()?;
        let feed = plan_prompt_feed(
            prompt_tokens,
            self.has_encoder,
            model.decode_start_token(),
            model.token_bos(),
        )?;

        let n_ctx = self.ctx_ref()?.n_ctx() as usize;
        let available = n_ctx.saturating_sub(feed.decoder_positions() + 1);
        if available == 0 {
            return Err(anyhow!(
                "prompt_too_long: prompt_tokens={} n_ctx={}",
                feed.prompt_len(),
                n_ctx
            ));
        }
        let max_tokens = (params.max_tokens as usize).min(available);

        self.feed_prompt(&feed)?;

        let mut sampler = build_sampler(params);
        sampler.accept_many(feed.history());

        let mut decoder = UTF_8.new_decoder();
        let mut out = String::new();
        let mut batch = LlamaBatch::new(512, 1);
        let mut n_cur = feed.decoder_positions() as i32;
        for _ in 0..max_tokens {
            let token = sampler.sample(self.ctx_ref()?, -1);
            if self.model_ref()?.is_eog_token(token) {
                break;
            }

            let bytes = self
                .model_ref()?
                .token_to_bytes(token, Special::Tokenize)
                .context("token_to_bytes")?;
            let mut piece = String::with_capacity(
                decoder.max_utf8_buffer_length(bytes.len()).unwrap_or(64),
            );
            let _ = decoder.decode_to_string(&bytes, &mut piece, false);
            out.push_str(&piece);

            batch.clear();
            batch.add(token, n_cur, &[0], true).context("batch.add(gen)")?;
            n_cur += 1;
            self.decode_checked(&mut batch, "decode(gen)")?;
        }

        let mut tail = String::with_capacity(decoder.max_utf8_buffer_length(0).unwrap_or(8));
        let _ = decoder.decode_to_string(&[], &mut tail, true);
        out.push_str(&tail);

        Ok(out.trim().to_string())
    }

    /// Run the prompt through the model so the next sample is the first generated token.
    fn feed_prompt(&mut self, feed: &PromptFeed) -> anyhow::Result<()> {
        match feed {
            PromptFeed::Decoder(tokens) => {
                let n_batch = self.ctx_ref()?.n_batch() as usize;
                if n_batch == 0 {
                    return Err(anyhow!("invalid n_batch=0"));
                }
                let last_index = tokens.len() - 1;
                for (chunk_no, chunk) in tokens.chunks(n_batch).enumerate() {
                    let chunk_start = chunk_no * n_batch;
                    let mut batch = LlamaBatch::new(chunk.len().max(512), 1);
                    for (i, token) in chunk.iter().copied().enumerate() {
                        let pos = chunk_start + i;
                        batch
                            .add(token, pos as i32, &[0], pos == last_index)
                            .context("batch.add(prompt)")?;
                    }
                    self.decode_checked(&mut batch, "decode prompt")?;
                }
            }
            PromptFeed::EncoderDecoder { encoder, start } => {
                // The encoder needs the whole prompt in a single ubatch.
                let n_ubatch = self.ctx_ref()?.n_ubatch() as usize;
                if encoder.len() > n_ubatch {
                    return Err(anyhow!(
                        "prompt_too_long: prompt_tokens={} n_ubatch={}",
                        encoder.len(),
                        n_ubatch
                    ));
                }
                let mut batch = LlamaBatch::new(encoder.len().max(512), 1);
                let last_index = encoder.len() - 1;
                for (pos, token) in encoder.iter().copied().enumerate() {
                    batch
                        .add(token, pos as i32, &[0], pos == last_index)
                        .context("batch.add(encode)")?;
                }
                let name = self.name.clone();
                self.ctx_mut()?
                    .encode(&mut batch)
                    .with_context(|| format!("llama_encode failed (model={name})"))?;

                let mut start_batch = LlamaBatch::new(512, 1);
                start_batch
                    .add(*start, 0, &[0], true)
                    .context("batch.add(decoder start)")?;
                self.decode_checked(&mut start_batch, "decode(start)")?;
            }
        }
        Ok(())
    }

    fn decode_checked(&mut self, batch: &mut LlamaBatch, stage: &str) -> anyhow::Result<()> {
        let name = self.name.clone();
        self.ctx_mut()?.decode(batch).map_err(|err| match err {
            DecodeError::Unknown(-2) => anyhow!(
                "llama_decode threw a foreign exception (likely OOM) (model={name}, stage={stage})"
            ),
            other => anyhow!(other),
        })
    }

    fn model_ref(&self) -> anyhow::Result<&LlamaModel> {
        Ok(self.ctx_ref()?.model)
    }

    fn ctx_ref(&self) -> anyhow::Result<&LlamaContext<'static>> {
        self.ctx
            .as_ref()
            .ok_or_else(|| anyhow!("{} context already released", self.name))
    }

    fn ctx_mut(&mut self) -> anyhow::Result<&mut LlamaContext<'static>> {
        let name = &self.name;
        self.ctx
            .as_mut()
            .ok_or_else(|| anyhow!("{name} context already released"))
    }
}

impl Drop for NativeModel {
    fn drop(&mut self) {
        let _ = self.ctx.take();
        let _ = self.model.take();
    }
}

/// llama.cpp architectures that run an encoder before decoding.
const ENCODER_ARCHS: &[&str] = &["t5", "t5encoder"];

/// llama.cpp's `LLAMA_TOKEN_NULL`.
const TOKEN_NULL: i32 = -1;

fn is_encoder_arch(arch: &str) -> bool {
    ENCODER_ARCHS.contains(&arch.trim().to_ascii_lowercase().as_str())
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum PromptFeed {
    /// Prompt is decoded; generation continues after its last token.
    Decoder(Vec<LlamaToken>),
    /// Prompt is encoded; the decoder starts from `start` at position 0.
    EncoderDecoder {
        encoder: Vec<LlamaToken>,
        start: LlamaToken,
    },
}

impl PromptFeed {
    fn prompt_len(&self) -> usize {
        match self {
            Self::Decoder(tokens) => tokens.len(),
            Self::EncoderDecoder { encoder, .. } => encoder.len(),
        }
    }

    /// Decoder positions taken before the first generated token.
    fn decoder_positions(&self) -> usize {
        match self {
            Self::Decoder(tokens) => tokens.len(),
            Self::EncoderDecoder { .. } => 1,
        }
    }

    /// Tokens the sampler has already seen on the decoder side.
    fn history(&self) -> &[LlamaToken] {
        match self {
            Self::Decoder(tokens) => tokens,
            Self::EncoderDecoder { start, .. } => std::slice::from_ref(start),
        }
    }
}

fn plan_prompt_feed(
    tokens: Vec<LlamaToken>,
    has_encoder: bool,
    decoder_start: LlamaToken,
    bos: LlamaToken,
) -> anyhow::Result<PromptFeed> {
    if tokens.is_empty() {
        return Err(anyhow!("empty prompt tokens"));
    }
    if !has_encoder {
        return Ok(PromptFeed::Decoder(tokens));
    }
    let start = [decoder_start, bos]
        .into_iter()
        .find(|t| t.0 != TOKEN_NULL)
        .ok_or_else(|| anyhow!("encoder-decoder model has no decoder start token"))?;
    Ok(PromptFeed::EncoderDecoder {
        encoder: tokens,
        start,
    })
}

fn build_sampler(params: &SamplingParams) -> LlamaSampler {
    let mut samplers: Vec<LlamaSampler> = Vec::new();
    if let Some(rp) = params.repeat_penalty {
        samplers.push(LlamaSampler::penalties(64, rp, 0.0, 0.0));
    }
    samplers.push(LlamaSampler::temp(params.temperature));
    if let Some(k) = params.top_k {
        samplers.push(LlamaSampler::top_k(k as i32));
    }
    samplers.push(LlamaSampler::top_p(params.top_p, 1));
    samplers.push(if params.temperature <= 0.0 {
        LlamaSampler::greedy()
    } else {
        LlamaSampler::dist(params.seed)
    });
    LlamaSampler::chain_simple(samplers)
}

fn decide_add_bos(prompt: &str) -> AddBos {
    let p = prompt.trim_start();
    if p.starts_with("<s>")
        || p.starts_with("<|begin_of_text|>")
        || p.starts_with("<bos>")
        || p.starts_with("<|startoftext|>")
    {
        AddBos::Never
    } else {
        AddBos::Always
    }
}

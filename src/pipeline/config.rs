use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::{
    find_default_config, load_config, resolve_backend, AppConfig, ResolvedBackend, CONFIG_ENV,
    CONFIG_FILENAME,
};
use crate::models::native::{NativeModelConfig, RANDOM_SEED};
use crate::paraphrase::ParaphraseSettings;
use crate::similarity::{DetectionParams, DEFAULT_MIN_LENGTH, DEFAULT_THRESHOLD};

pub const DEFAULT_BACKEND: &str = "t5_paraphrase";
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_parafrase";
const DEFAULT_CTX: u32 = 1024;
const DEFAULT_TRACE_DIR: &str = "_trace";

/// Command-line values that take precedence over the config file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub report_json: Option<PathBuf>,
    pub threshold: Option<u8>,
    pub min_length: Option<usize>,
    pub backend: Option<String>,
    pub model: Option<PathBuf>,
    pub threads: Option<i32>,
    pub gpu_layers: Option<i32>,
    pub ctx_size: Option<u32>,
    pub seed: Option<u32>,
    pub detect_only: bool,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub workdir: PathBuf,
    pub config_path: Option<PathBuf>,
    pub output: PathBuf,
    pub report_json: Option<PathBuf>,

    pub detection: DetectionParams,
    pub paraphrase: ParaphraseSettings,
    pub detect_only: bool,

    /// Unset in detect-only runs, where no model is ever loaded.
    pub backend: Option<ResolvedBackend>,
    pub threads: i32,
    pub gpu_layers: i32,

    pub trace_dir: PathBuf,
    pub trace_prompts: bool,
    pub log_max_chars: usize,
}

impl PipelineConfig {
    /// Built-in defaults for processing `input`, with no config file and no model.
    pub fn with_defaults(input: &Path) -> Self {
        let workdir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let output = default_output_for(input, DEFAULT_OUTPUT_SUFFIX);
        Self {
            trace_dir: trace_dir_for(&output, DEFAULT_TRACE_DIR),
            workdir,
            config_path: None,
            output,
            report_json: None,
            detection: DetectionParams::default(),
            paraphrase: ParaphraseSettings::default(),
            detect_only: false,
            backend: None,
            threads: -1,
            gpu_layers: -1,
            trace_prompts: false,
            log_max_chars: 240,
        }
    }

    pub fn from_paths_and_args(input: &Path, args: CliOverrides) -> anyhow::Result<Self> {
        let mut cfg = Self::with_defaults(input);
        cfg.workdir = cfg.workdir.canonicalize().unwrap_or(cfg.workdir);

        let cfg_file = args
            .config
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&cfg.workdir, CONFIG_FILENAME));
        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
                cfg.config_path = Some(p.clone());
            } else if args.config.is_some() {
                return Err(anyhow::anyhow!("config file not found: {}", p.display()));
            }
        }

        let threshold = args
            .threshold
            .or(file_cfg.detection.threshold)
            .unwrap_or(DEFAULT_THRESHOLD);
        let min_length = args
            .min_length
            .or(file_cfg.detection.min_length)
            .unwrap_or(DEFAULT_MIN_LENGTH);
        cfg.detection = DetectionParams::new(threshold, min_length).context("detection settings")?;

        let p = &file_cfg.paraphrase;
        let defaults = ParaphraseSettings::default();
        cfg.paraphrase = ParaphraseSettings {
            prompt_template: p
                .prompt_template
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(defaults.prompt_template),
            sampling: crate::models::native::SamplingParams {
                max_tokens: p.max_tokens.unwrap_or(defaults.sampling.max_tokens).max(1),
                temperature: p.temperature.unwrap_or(defaults.sampling.temperature),
                top_k: p.top_k.or(defaults.sampling.top_k).filter(|k| *k > 0),
                top_p: p.top_p.unwrap_or(defaults.sampling.top_p).clamp(0.0, 1.0),
                repeat_penalty: p.repeat_penalty.or(defaults.sampling.repeat_penalty),
                seed: args.seed.or(p.seed).unwrap_or(RANDOM_SEED),
            },
        };
        if !cfg.paraphrase.prompt_template.contains("{{text}}") {
            return Err(anyhow::anyhow!(
                "paraphrase.prompt_template must contain {{{{text}}}}"
            ));
        }
        cfg.detect_only = args.detect_only;

        let suffix = file_cfg
            .pipeline
            .output_suffix
            .clone()
            .unwrap_or_else(|| DEFAULT_OUTPUT_SUFFIX.to_string());
        cfg.output = args
            .output
            .clone()
            .unwrap_or_else(|| default_output_for(input, &suffix));
        cfg.report_json = args.report_json.clone();

        let trace_dir = file_cfg
            .pipeline
            .trace_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_TRACE_DIR.to_string());
        cfg.trace_dir = trace_dir_for(&cfg.output, &trace_dir);
        cfg.trace_prompts = file_cfg.pipeline.trace_prompts.unwrap_or(false);
        cfg.log_max_chars = file_cfg.pipeline.log_max_chars.unwrap_or(240).max(16);
        cfg.threads = args.threads.or(file_cfg.pipeline.threads).unwrap_or(-1);
        cfg.gpu_layers = args.gpu_layers.or(file_cfg.pipeline.gpu_layers).unwrap_or(-1);

        if !cfg.detect_only {
            let name = args
                .backend
                .clone()
                .or_else(|| file_cfg.paraphrase.backend.clone())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
            let mut backend = match args.model.clone() {
                Some(path) => ResolvedBackend::from_model_path(&name, path, DEFAULT_CTX),
                None => {
                    let cfg_path = cfg
                        .config_path
                        .clone()
                        .unwrap_or_else(|| cfg.workdir.join(CONFIG_FILENAME));
                    let model_dir = file_cfg
                        .models
                        .model_dir
                        .clone()
                        .unwrap_or_else(|| cfg.workdir.clone());
                    resolve_backend(&file_cfg, &cfg_path, &name, &model_dir, DEFAULT_CTX)?
                }
            };
            if let Some(ctx) = args.ctx_size {
                backend.ctx_size = ctx;
            }
            // Flags given on the command line beat per-backend settings.
            if args.threads.is_some() {
                backend.threads = args.threads;
            }
            if args.gpu_layers.is_some() {
                backend.gpu_layers = args.gpu_layers;
            }
            cfg.backend = Some(backend);
        }

        Ok(cfg)
    }

    pub fn model_config(&self) -> Option<NativeModelConfig> {
        let b = self.backend.as_ref()?;
        Some(NativeModelConfig {
            name: b.name.clone(),
            model_path: b.model_path.clone(),
            ctx_size: b.ctx_size,
            threads: b.threads.unwrap_or(self.threads),
            gpu_layers: b.gpu_layers.unwrap_or(self.gpu_layers),
            batch_size: b.batch_size,
            ubatch_size: b.ubatch_size,
            offload_kqv: b.offload_kqv,
        })
    }
}

pub fn default_output_for(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    input.with_file_name(format!("{stem}{suffix}.docx"))
}

/// Relative trace dirs live next to the output document.
fn trace_dir_for(output: &Path, trace_dir: &str) -> PathBuf {
    let trace_dir = PathBuf::from(trace_dir);
    if trace_dir.is_absolute() {
        return trace_dir;
    }
    output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(trace_dir)
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[detection]
# Sensitivity (50-100). A paragraph is flagged when its partial-match score is above it.
threshold = 70
# Paragraphs of this many characters or fewer (after trimming) are never flagged.
min_length = 30

[paraphrase]
backend = "t5_paraphrase"
prompt_template = "paraphrase: {{text}} </s>"
max_tokens = 256
top_k = 120
top_p = 0.95
temperature = 1.0
# seed = 42
# repeat_penalty = 1.1

[pipeline]
threads = -1
gpu_layers = -1
trace_dir = "_trace"
trace_prompts = false
log_max_chars = 240
output_suffix = "_parafrase"

[models]
model_dir = "."

[models.backends.t5_paraphrase]
path = "t5-paraphrase-paws-q8_0.gguf"
ctx_size = 1024
gpu_layers = -1
batch_size = 512
ubatch_size = 512
offload_kqv = true
"#;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

pub const CONFIG_FILENAME: &str = "thesis-paraphraser.toml";
pub const CONFIG_ENV: &str = "THESIS_PARAPHRASER_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub detection: DetectionSection,
    #[serde(default)]
    pub paraphrase: ParaphraseSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub models: ModelsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct DetectionSection {
    /// Sensitivity in 50..=100; a paragraph must score strictly above it.
    #[serde(default)]
    pub threshold: Option<u8>,
    /// Paragraphs whose trimmed length does not exceed this are never flagged.
    #[serde(default)]
    pub min_length: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ParaphraseSection {
    #[serde(default)]
    pub backend: Option<String>,
    /// Prompt sent to the model; `{{text}}` is replaced with the paragraph.
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub repeat_penalty: Option<f32>,
    /// Fixed sampler seed. Unset means a fresh seed per run.
    #[serde(default)]
    pub seed: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub threads: Option<i32>,
    #[serde(default)]
    pub gpu_layers: Option<i32>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
    #[serde(default)]
    pub log_max_chars: Option<usize>,

    /// Appended to the input stem when no output path is given.
    #[serde(default)]
    pub output_suffix: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelsSection {
    #[serde(default)]
    pub backends: HashMap<String, ModelBackend>,

    /// Preferred directory to locate model files when backend paths are relative.
    /// Can be absolute or relative to the config file directory.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelBackend {
    pub path: PathBuf,
    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub threads: Option<i32>,
    #[serde(default)]
    pub gpu_layers: Option<i32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub ubatch_size: Option<u32>,
    #[serde(default)]
    pub offload_kqv: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct ResolvedBackend {
    pub name: String,
    pub model_path: PathBuf,
    pub ctx_size: u32,
    pub threads: Option<i32>,
    pub gpu_layers: Option<i32>,
    pub batch_size: Option<u32>,
    pub ubatch_size: Option<u32>,
    pub offload_kqv: Option<bool>,
}

impl ResolvedBackend {
    /// A backend given directly by model path, with no config entry behind it.
    pub fn from_model_path(name: &str, model_path: PathBuf, ctx_size: u32) -> Self {
        Self {
            name: name.to_string(),
            model_path,
            ctx_size,
            threads: None,
            gpu_layers: None,
            batch_size: None,
            ubatch_size: None,
            offload_kqv: None,
        }
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

/// Search the working directory, the input's directory and the executable's directory (each
/// upwards) for `filename`.
pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    let exe = std::env::current_exe().ok()?;
    find_file_upwards(exe.parent()?, filename, 10)
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text).with_context(|| format!("parse config: {}", path.display()))
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    toml::from_str(text).context("parse config toml")
}

pub fn resolve_backend(
    cfg: &AppConfig,
    config_path: &Path,
    name: &str,
    fallback_search_dir: &Path,
    default_ctx: u32,
) -> anyhow::Result<ResolvedBackend> {
    let backend = cfg.models.backends.get(name).ok_or_else(|| {
        anyhow!(
            "backend not configured: {name} (add [models.backends.{name}] to {} or pass --model)",
            config_path.display()
        )
    })?;
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let mut search_dirs: Vec<PathBuf> = Vec::new();
    if let Some(md) = cfg.models.model_dir.as_ref() {
        search_dirs.push(if md.is_relative() {
            config_dir.join(md)
        } else {
            md.clone()
        });
    }
    if let Ok(cwd) = std::env::current_dir() {
        search_dirs.push(cwd);
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        search_dirs.push(dir);
    }
    search_dirs.push(config_dir.to_path_buf());
    search_dirs.push(fallback_search_dir.to_path_buf());

    let mut seen = std::collections::HashSet::new();
    search_dirs.retain(|d| d.is_dir() && seen.insert(d.clone()));

    let model_path = if backend.path.is_relative() {
        search_dirs
            .iter()
            .map(|dir| dir.join(&backend.path))
            .find(|cand| cand.exists())
            .ok_or_else(|| {
                anyhow!(
                    "backend {name} model not found: {} (searched: {}) (config={})",
                    backend.path.display(),
                    search_dirs
                        .iter()
                        .map(|d| d.display().to_string())
                        .collect::<Vec<_>>()
                        .join("; "),
                    config_path.display()
                )
            })?
    } else if backend.path.exists() {
        backend.path.clone()
    } else {
        return Err(anyhow!(
            "backend {name} model not found: {} (config={})",
            backend.path.display(),
            config_path.display()
        ));
    };

    Ok(ResolvedBackend {
        name: name.to_string(),
        model_path,
        ctx_size: backend.ctx_size.unwrap_or(default_ctx),
        threads: backend.threads,
        gpu_layers: backend.gpu_layers,
        batch_size: backend.batch_size,
        ubatch_size: backend.ubatch_size,
        offload_kqv: backend.offload_kqv,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{find_file_upwards, parse_config, resolve_backend};

    #[test]
    fn parses_partial_config() {
        let cfg = parse_config(
            r#"
[detection]
threshold = 80

[paraphrase]
backend = "t5_paws"
top_k = 50

[models.backends.t5_paws]
path = "t5-paraphrase.gguf"
ctx_size = 1024
"#,
        )
        .expect("parse");

        assert_eq!(cfg.detection.threshold, Some(80));
        assert_eq!(cfg.detection.min_length, None);
        assert_eq!(cfg.paraphrase.backend.as_deref(), Some("t5_paws"));
        assert_eq!(cfg.paraphrase.top_k, Some(50));
        assert_eq!(cfg.models.backends["t5_paws"].ctx_size, Some(1024));
        assert!(cfg.pipeline.trace_dir.is_none());
    }

    #[test]
    fn rejects_out_of_type_values() {
        assert!(parse_config("[detection]\nthreshold = 300\n").is_err());
    }

    #[test]
    fn resolves_relative_model_next_to_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("m.gguf"), b"gguf").expect("write model");
        let cfg_path = dir.path().join("thesis-paraphraser.toml");
        let cfg = parse_config("[models.backends.local]\npath = \"m.gguf\"\n").expect("parse");

        let b = resolve_backend(&cfg, &cfg_path, "local", dir.path(), 2048).expect("resolve");
        assert_eq!(b.model_path, dir.path().join("m.gguf"));
        assert_eq!(b.ctx_size, 2048);

        assert!(resolve_backend(&cfg, &cfg_path, "missing", dir.path(), 2048).is_err());
    }

    #[test]
    fn upward_search_stops_at_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let deep = dir.path().join("a/b/c");
        std::fs::create_dir_all(&deep).expect("mkdir");
        std::fs::write(dir.path().join("marker.toml"), b"").expect("write");

        assert_eq!(
            find_file_upwards(&deep, "marker.toml", 3),
            Some(dir.path().join("marker.toml"))
        );
        assert_eq!(find_file_upwards(&deep, "marker.toml", 2), None);
        assert_eq!(find_file_upwards(Path::new("/"), "surely-not-here.toml", 2), None);
    }
}

use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::similarity::{DetectionParams, FlaggedParagraph};

pub const SUMMARY_VERSION: u32 = 1;

/// Machine-readable record of one scan, written with `--report-json`.
#[derive(Clone, Debug, Serialize)]
pub struct ScanSummary {
    pub version: u32,
    pub document: String,
    pub document_sha256: String,
    pub report: String,
    pub report_sha256: String,
    pub threshold: u8,
    pub min_length: usize,
    pub paragraph_count: usize,
    pub flagged: Vec<FlaggedEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FlaggedEntry {
    pub index: usize,
    pub score: u8,
    pub original: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paraphrase: Option<String>,
}

impl ScanSummary {
    pub fn new(
        document: &Path,
        report: &Path,
        params: &DetectionParams,
        paragraph_count: usize,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            version: SUMMARY_VERSION,
            document: document.display().to_string(),
            document_sha256: sha256_file(document)?,
            report: report.display().to_string(),
            report_sha256: sha256_file(report)?,
            threshold: params.threshold,
            min_length: params.min_length,
            paragraph_count,
            flagged: Vec::new(),
            output: None,
        })
    }

    /// `replacements[i]` belongs to `flagged[i]`; missing entries leave `paraphrase` unset.
    pub fn set_flagged(&mut self, flagged: &[FlaggedParagraph], replacements: &[String]) {
        self.flagged = flagged
            .iter()
            .enumerate()
            .map(|(i, f)| FlaggedEntry {
                index: f.index,
                score: f.score,
                original: f.text.clone(),
                paraphrase: replacements.get(i).cloned(),
            })
            .collect();
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        std::fs::write(
            path,
            serde_json::to_vec_pretty(self).context("serialize scan summary json")?,
        )
        .with_context(|| format!("write scan summary: {}", path.display()))?;
        Ok(())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(sha256_hex(&bytes))
}

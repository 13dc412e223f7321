use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use llama_cpp_2::llama_backend::LlamaBackend;
use once_cell::sync::OnceCell;

use crate::docx::DocxDocument;
use crate::models::native::NativeModel;
use crate::paraphrase::{ModelParaphraser, Paraphraser};
use crate::progress::ConsoleProgress;
use crate::report::load_report_text;
use crate::similarity::{detect_with, FlaggedParagraph, PartialMatcher};
use crate::textutil::preview;

use super::summary::ScanSummary;
use super::trace::TraceWriter;
use super::PipelineConfig;

static LLAMA_BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

const SCAN_PROGRESS_EVERY: usize = 50;

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub paragraph_count: usize,
    pub flagged: Vec<FlaggedParagraph>,
    /// Aligned with `flagged`; empty when nothing was paraphrased.
    pub replacements: Vec<String>,
    /// Set only when a document was written.
    pub output: Option<PathBuf>,
}

pub struct ParaphrasePipeline {
    cfg: PipelineConfig,
    progress: ConsoleProgress,
    trace: TraceWriter,
}

impl ParaphrasePipeline {
    pub fn new(cfg: PipelineConfig, progress: ConsoleProgress) -> Self {
        let trace = match TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_prompts) {
            Ok(t) if cfg.trace_prompts => {
                progress.info(format!("Trace dir: {}", t.dir().display()));
                t
            }
            Ok(t) => t,
            Err(err) => {
                progress.warn(format!("tracing disabled: {err:#}"));
                TraceWriter::disabled()
            }
        };
        Self {
            cfg,
            progress,
            trace,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn run(&mut self, input: &Path, report: &Path) -> anyhow::Result<RunOutcome> {
        self.run_with(input, report, load_model_paraphraser)
    }

    /// Full run with a caller-supplied paraphraser factory. The factory is only called when at
    /// least one paragraph is flagged and the run is not detect-only.
    pub fn run_with<F>(
        &mut self,
        input: &Path,
        report: &Path,
        make_paraphraser: F,
    ) -> anyhow::Result<RunOutcome>
    where
        F: FnOnce(&PipelineConfig) -> anyhow::Result<Box<dyn Paraphraser>>,
    {
        self.progress.info(format!("Read DOCX: {}", input.display()));
        let mut doc = DocxDocument::open(input)?;
        let texts = doc.paragraph_texts();
        self.progress.info(format!("Paragraphs: {}", texts.len()));

        self.progress.info(format!("Read report: {}", report.display()));
        let report_text = load_report_text(report)?;
        self.progress
            .info(format!("Report text: {} chars", report_text.chars().count()));
        if report_text.trim().is_empty() {
            self.progress
                .warn("report has no extractable text; no paragraph can match");
        }

        let flagged = self.detect(&texts, &report_text);
        let mut summary = match self.cfg.report_json.as_ref() {
            Some(_) => Some(ScanSummary::new(
                input,
                report,
                &self.cfg.detection,
                texts.len(),
            )?),
            None => None,
        };
        let mut outcome = RunOutcome {
            paragraph_count: texts.len(),
            flagged,
            replacements: Vec::new(),
            output: None,
        };

        if outcome.flagged.is_empty() {
            self.progress.info(format!(
                "No paragraph scored above {}; no document written",
                self.cfg.detection.threshold
            ));
            self.finish_summary(summary.as_mut(), &outcome)?;
            return Ok(outcome);
        }

        self.progress
            .info(format!("Flagged paragraphs: {}", outcome.flagged.len()));
        for f in &outcome.flagged {
            self.progress.info(format!(
                "  #{} score={} | {}",
                f.index + 1,
                f.score,
                preview(&f.text, self.cfg.log_max_chars)
            ));
        }

        if self.cfg.detect_only {
            self.progress.info("Detect only: skipping paraphrase");
            self.finish_summary(summary.as_mut(), &outcome)?;
            return Ok(outcome);
        }

        if let Some(b) = self.cfg.backend.as_ref() {
            self.progress
                .info(format!("Load model {}: {}", b.name, b.model_path.display()));
        }
        let mut paraphraser = make_paraphraser(&self.cfg)?;
        self.progress
            .info(format!("Paraphrase model: {}", paraphraser.name()));

        outcome.replacements = self.paraphrase_flagged(&outcome.flagged, paraphraser.as_mut())?;
        apply_replacements(&mut doc, &outcome.flagged, &outcome.replacements)?;

        self.progress
            .info(format!("Write DOCX: {}", self.cfg.output.display()));
        doc.save(&self.cfg.output)?;
        outcome.output = Some(self.cfg.output.clone());

        self.finish_summary(summary.as_mut(), &outcome)?;
        self.progress.info("Done");
        Ok(outcome)
    }

    pub fn detect(&self, paragraphs: &[String], report_text: &str) -> Vec<FlaggedParagraph> {
        self.progress.info(format!(
            "Scan: threshold={} min_length={}",
            self.cfg.detection.threshold, self.cfg.detection.min_length
        ));
        let matcher = PartialMatcher::new(report_text);
        detect_with(&matcher, paragraphs, &self.cfg.detection, |cur, total| {
            self.progress
                .progress_every("Scan", cur, total, SCAN_PROGRESS_EVERY)
        })
    }

    /// One model call per flagged paragraph, in order. The first failure aborts the run.
    pub fn paraphrase_flagged(
        &self,
        flagged: &[FlaggedParagraph],
        paraphraser: &mut dyn Paraphraser,
    ) -> anyhow::Result<Vec<String>> {
        let mut out = Vec::with_capacity(flagged.len());
        for (i, f) in flagged.iter().enumerate() {
            self.progress.progress("Paraphrase", i + 1, flagged.len());
            let generation = paraphraser
                .paraphrase(&f.text)
                .with_context(|| format!("paraphrase paragraph #{}", f.index + 1))?;

            self.write_trace(f.index, "prompt", &generation.prompt);
            self.write_trace(f.index, "raw", &generation.raw);
            self.write_trace(f.index, "out", &generation.text);
            self.progress.info(format!(
                "  #{} -> {}",
                f.index + 1,
                preview(&generation.text, self.cfg.log_max_chars)
            ));
            out.push(generation.text);
        }
        Ok(out)
    }

    fn write_trace(&self, index: usize, kind: &str, text: &str) {
        if let Err(err) = self.trace.write_para_text(index, kind, text) {
            self.progress.warn(format!("trace write failed: {err:#}"));
        }
    }

    fn finish_summary(
        &self,
        summary: Option<&mut ScanSummary>,
        outcome: &RunOutcome,
    ) -> anyhow::Result<()> {
        let (Some(summary), Some(path)) = (summary, self.cfg.report_json.as_ref()) else {
            return Ok(());
        };
        summary.set_flagged(&outcome.flagged, &outcome.replacements);
        summary.output = outcome.output.as_ref().map(|p| p.display().to_string());
        summary.write_json(path)?;
        self.progress
            .info(format!("Scan report: {}", path.display()));
        Ok(())
    }
}

/// Substitute `replacements[i]` into the paragraph of `flagged[i]`. A shorter replacement list
/// leaves the remaining flagged paragraphs untouched.
pub fn apply_replacements(
    doc: &mut DocxDocument,
    flagged: &[FlaggedParagraph],
    replacements: &[String],
) -> anyhow::Result<()> {
    if replacements.len() > flagged.len() {
        return Err(anyhow!(
            "{} replacements for {} flagged paragraphs",
            replacements.len(),
            flagged.len()
        ));
    }
    let by_index: BTreeMap<usize, String> = flagged
        .iter()
        .zip(replacements)
        .map(|(f, text)| (f.index, text.clone()))
        .collect();
    doc.replace_paragraphs(&by_index)
}

fn llama_backend() -> anyhow::Result<&'static LlamaBackend> {
    LLAMA_BACKEND.get_or_try_init(|| LlamaBackend::init().context("init llama backend"))
}

fn load_model_paraphraser(cfg: &PipelineConfig) -> anyhow::Result<Box<dyn Paraphraser>> {
    let model_cfg = cfg
        .model_config()
        .ok_or_else(|| anyhow!("no paraphrase model configured (pass --model or --backend)"))?;
    let model = NativeModel::load(llama_backend()?, model_cfg)?;
    Ok(Box::new(ModelParaphraser::new(
        model,
        cfg.paraphrase.clone(),
    )))
}

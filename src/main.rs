use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use thesis_paraphraser::pipeline::{
    init_default_config, CliOverrides, ParaphrasePipeline, PipelineConfig,
};
use thesis_paraphraser::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "thesis-paraphraser")]
#[command(about = "Flag DOCX paragraphs that match a plagiarism report and paraphrase them with a local model", long_about = None)]
struct Args {
    /// Generate a default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file to (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Thesis document (.docx)
    #[arg(value_name = "DOCX")]
    input: Option<PathBuf>,

    /// Plagiarism report (.pdf; .docx and plain text also accepted)
    #[arg(value_name = "REPORT")]
    report: Option<PathBuf>,

    /// Output .docx (default: <input_stem>_parafrase.docx)
    #[arg(short, long, value_name = "DOCX")]
    output: Option<PathBuf>,

    /// Detection sensitivity, 50-100 (default: 70)
    #[arg(short, long, value_name = "N")]
    threshold: Option<u8>,

    /// Paragraphs with at most this many characters are never flagged (default: 30)
    #[arg(long, value_name = "N")]
    min_length: Option<usize>,

    /// Config file path (default: search for thesis-paraphraser.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Paraphrase backend name from config
    #[arg(long)]
    backend: Option<String>,

    /// Paraphrase model GGUF (overrides --backend lookup)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Threads for llama.cpp (default: -1 = auto)
    #[arg(long)]
    threads: Option<i32>,

    /// GPU layers for llama.cpp (default: -1 = offload as much as possible)
    #[arg(long)]
    gpu_layers: Option<i32>,

    /// Context size for the paraphrase model
    #[arg(long)]
    ctx_size: Option<u32>,

    /// Fixed sampling seed (default: random per run)
    #[arg(long)]
    seed: Option<u32>,

    /// Only scan and list flagged paragraphs (no model, no output document)
    #[arg(long)]
    detect_only: bool,

    /// Write the scan result (and paraphrases) as JSON
    #[arg(long, value_name = "JSON")]
    report_json: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let (input, report) = match (args.input, args.report) {
        (Some(input), Some(report)) => (input, report),
        (Some(_), None) => {
            return Err(anyhow::anyhow!(
                "missing REPORT: pass the plagiarism report after the document"
            ));
        }
        _ => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  thesis-paraphraser <thesis.docx> <report.pdf> [-t 70]\n\nTIPS:\n  - Lower thresholds flag more paragraphs (range 50-100).\n  - Use --detect-only to list matches without loading a model.\n  - Default config search: thesis-paraphraser.toml (upwards), or set THESIS_PARAPHRASER_CONFIG.\n  - Run --init-config to write a starter config.\n"
            );
            return Ok(());
        }
    };

    let cfg = PipelineConfig::from_paths_and_args(
        &input,
        CliOverrides {
            config: args.config,
            output: args.output,
            report_json: args.report_json,
            threshold: args.threshold,
            min_length: args.min_length,
            backend: args.backend,
            model: args.model,
            threads: args.threads,
            gpu_layers: args.gpu_layers,
            ctx_size: args.ctx_size,
            seed: args.seed,
            detect_only: args.detect_only,
        },
    )
    .context("build config")?;
    if let Some(path) = cfg.config_path.as_ref() {
        progress.info(format!("Config: {}", path.display()));
    }

    let mut pipeline = ParaphrasePipeline::new(cfg, progress);
    let outcome = pipeline.run(&input, &report)?;
    if let Some(output) = outcome.output {
        println!("{}", output.display());
    }
    Ok(())
}

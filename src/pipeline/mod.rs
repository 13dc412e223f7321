mod config;
mod runner;
mod summary;
mod trace;

pub use config::{default_output_for, init_default_config, CliOverrides, PipelineConfig};
pub use runner::{apply_replacements, ParaphrasePipeline, RunOutcome};
pub use summary::{sha256_hex, FlaggedEntry, ScanSummary};
pub use trace::TraceWriter;

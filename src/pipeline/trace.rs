use std::path::{Path, PathBuf};

use anyhow::Context;

/// Per-paragraph text dumps for inspecting what the model was given and what it returned.
pub struct TraceWriter {
    dir: PathBuf,
    enabled: bool,
}

impl TraceWriter {
    pub fn new(dir: PathBuf, enabled: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create trace dir: {}", dir.display()))?;
        }
        Ok(Self { dir, enabled })
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_named_text(&self, name: &str, text: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.dir.join(sanitize_filename(name));
        std::fs::write(&path, text).with_context(|| format!("write trace: {}", path.display()))?;
        Ok(())
    }

    /// `index` is the 0-based body paragraph index; file names use the 1-based number.
    pub fn write_para_text(&self, index: usize, kind: &str, text: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let name = format!("para_{:05}.{kind}.txt", index + 1);
        self.write_named_text(&name, text)
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => ch,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{sanitize_filename, TraceWriter};

    #[test]
    fn paragraph_files_are_numbered_from_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let trace = TraceWriter::new(dir.path().join("_trace"), true).expect("trace");
        trace.write_para_text(0, "prompt", "paraphrase: x </s>").expect("write");

        let written = std::fs::read_to_string(trace.dir().join("para_00001.prompt.txt"))
            .expect("read");
        assert_eq!(written, "paraphrase: x </s>");
    }

    #[test]
    fn disabled_writer_touches_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let trace = TraceWriter::new(dir.path().join("_trace"), false).expect("trace");
        trace.write_para_text(3, "raw", "text").expect("write");

        assert!(!dir.path().join("_trace").exists());
    }

    #[test]
    fn reserved_characters_are_replaced() {
        assert_eq!(sanitize_filename("a/b:c?.txt"), "a_b_c_.txt");
    }
}

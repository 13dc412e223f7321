use std::path::Path;

use anyhow::{anyhow, Context};
use encoding_rs::UTF_8;

use crate::docx::DocxDocument;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Pdf,
    Docx,
    Text,
}

impl ReportFormat {
    /// Sniff the container from its leading bytes, falling back to the file extension.
    pub fn detect(path: &Path, bytes: &[u8]) -> Self {
        if bytes.starts_with(b"%PDF") {
            return Self::Pdf;
        }
        if bytes.starts_with(b"PK\x03\x04") {
            return Self::Docx;
        }
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => Self::Pdf,
            Some("docx") => Self::Docx,
            _ => Self::Text,
        }
    }
}

/// Flat text of the plagiarism report used as the comparison target.
pub fn load_report_text(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read report: {}", path.display()))?;
    report_text_from_bytes(path, &bytes)
}

pub fn report_text_from_bytes(path: &Path, bytes: &[u8]) -> anyhow::Result<String> {
    match ReportFormat::detect(path, bytes) {
        ReportFormat::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| anyhow!("extract pdf text from {}: {e}", path.display())),
        ReportFormat::Docx => {
            let doc = DocxDocument::from_bytes(bytes)
                .with_context(|| format!("read report docx: {}", path.display()))?;
            Ok(doc.paragraph_texts().join("\n"))
        }
        ReportFormat::Text => {
            let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
            if had_errors {
                return Err(anyhow!(
                    "report is neither PDF, DOCX nor UTF-8 text: {}",
                    path.display()
                ));
            }
            Ok(text.into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{report_text_from_bytes, ReportFormat};
    use crate::docx::testutil::docx_bytes;

    #[test]
    fn sniffs_magic_before_extension() {
        assert_eq!(ReportFormat::detect(Path::new("r.txt"), b"%PDF-1.7"), ReportFormat::Pdf);
        assert_eq!(ReportFormat::detect(Path::new("r.pdf"), b"PK\x03\x04"), ReportFormat::Docx);
        assert_eq!(ReportFormat::detect(Path::new("r.PDF"), b""), ReportFormat::Pdf);
        assert_eq!(ReportFormat::detect(Path::new("r.md"), b"# x"), ReportFormat::Text);
    }

    #[test]
    fn plain_text_strips_bom() {
        let text = report_text_from_bytes(Path::new("r.txt"), b"\xEF\xBB\xBFsimilarity 34%").expect("text");
        assert_eq!(text, "similarity 34%");
    }

    #[test]
    fn invalid_utf8_text_is_an_error() {
        assert!(report_text_from_bytes(Path::new("r.txt"), b"plain \xff\xfa text").is_err());
    }

    #[test]
    fn docx_report_joins_paragraphs() {
        let bytes = docx_bytes(&["Sumber 1", "", "Sumber 2"]);
        let text = report_text_from_bytes(Path::new("report.docx"), &bytes).expect("text");
        assert_eq!(text, "Sumber 1\n\nSumber 2");
    }
}

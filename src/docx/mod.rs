pub mod package;
pub mod paragraphs;
pub mod rewrite;
pub mod xml;

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::Path;

use anyhow::{anyhow, Context};

use self::package::DocxPackage;
use self::paragraphs::{scan_body_paragraphs, BodyParagraph};
use self::rewrite::rewrite_paragraphs;
use self::xml::XmlPart;

pub const MAIN_PART: &str = "word/document.xml";

/// A .docx opened for paragraph-level editing. Only the main document part is parsed; every
/// other zip entry is carried through unchanged.
pub struct DocxDocument {
    package: DocxPackage,
    main: XmlPart,
    paragraphs: Vec<BodyParagraph>,
    dirty: bool,
}

impl DocxDocument {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let package = DocxPackage::read(path)?;
        Self::from_package(package).with_context(|| format!("load docx: {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Self::from_package(DocxPackage::from_bytes(bytes)?)
    }

    fn from_package(package: DocxPackage) -> anyhow::Result<Self> {
        let entry = package
            .entry(MAIN_PART)
            .ok_or_else(|| anyhow!("not a Word document: missing {MAIN_PART}"))?;
        let main = XmlPart::parse(MAIN_PART, &entry.data)?;
        let paragraphs = scan_body_paragraphs(&main);
        Ok(Self {
            package,
            main,
            paragraphs,
            dirty: false,
        })
    }

    pub fn paragraph_texts(&self) -> Vec<String> {
        self.paragraphs.iter().map(|p| p.text.clone()).collect()
    }

    /// Replace the text of the given body paragraphs. Indices refer to the current paragraph
    /// list; the paragraph count never changes, so indices stay valid across calls.
    pub fn replace_paragraphs(&mut self, replacements: &BTreeMap<usize, String>) -> anyhow::Result<()> {
        if replacements.is_empty() {
            return Ok(());
        }
        let events = rewrite_paragraphs(&self.main.events, &self.paragraphs, replacements)?;
        self.main.events = events;
        let rescanned = scan_body_paragraphs(&self.main);
        if rescanned.len() != self.paragraphs.len() {
            return Err(anyhow!(
                "paragraph count changed while rewriting ({} -> {})",
                self.paragraphs.len(),
                rescanned.len()
            ));
        }
        self.paragraphs = rescanned;
        self.dirty = true;
        Ok(())
    }

    fn part_replacements(&self) -> anyhow::Result<HashMap<String, Vec<u8>>> {
        let mut replacements = HashMap::new();
        if self.dirty {
            replacements.insert(MAIN_PART.to_string(), self.main.to_bytes()?);
        }
        Ok(replacements)
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let cursor = self
            .package
            .write_with_replacements(Cursor::new(Vec::new()), &self.part_replacements()?)?;
        Ok(cursor.into_inner())
    }

    /// Write through a temporary file in the destination directory, then move it into place.
    /// The temporary file is removed if anything fails before the rename.
    pub fn save(&self, output: &Path) -> anyhow::Result<()> {
        let dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let replacements = self.part_replacements()?;
        let tmp = tempfile::Builder::new()
            .prefix(".paraphrase-")
            .suffix(".docx")
            .tempfile_in(dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        let tmp = self.package.write_with_replacements(tmp, &replacements)?;
        tmp.as_file().sync_all().context("flush temp docx")?;
        tmp.persist(output)
            .with_context(|| format!("write output docx: {}", output.display()))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Minimal Word package whose body holds one `w:p` per entry of `paragraphs`.
    pub fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
        let mut body = String::new();
        for p in paragraphs {
            if p.is_empty() {
                body.push_str("<w:p/>");
            } else {
                body.push_str(&format!(
                    r#"<w:p><w:r><w:rPr><w:sz w:val="24"/></w:rPr><w:t xml:space="preserve">{p}</w:t></w:r></w:p>"#
                ));
            }
        }
        let document = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}<w:sectPr/></w:body></w:document>"#
        );
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        zout.start_file("[Content_Types].xml", opts).expect("start");
        zout.write_all(br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#)
            .expect("write");
        zout.start_file("word/document.xml", opts).expect("start");
        zout.write_all(document.as_bytes()).expect("write");
        zout.finish().expect("finish").into_inner()
    }
}

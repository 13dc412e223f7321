use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Every entry of an OOXML zip container, kept in archive order so an unmodified package
/// serializes back with the same layout.
pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
}

pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl DocxPackage {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("open docx: {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("read docx: {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).context("read zip")?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).context("zip entry")?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .with_context(|| format!("read zip entry: {}", file.name()))?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entry(&self, name: &str) -> Option<&DocxEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Serialize the package, substituting the bytes of any entry named in `replacements`.
    pub fn write_with_replacements<W: Write + Seek>(
        &self,
        writer: W,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> anyhow::Result<W> {
        let mut zout = ZipWriter::new(writer);
        for ent in &self.entries {
            let data = replacements.get(&ent.name).unwrap_or(&ent.data);
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(ent.name.as_str(), opts)
                    .with_context(|| format!("add zip dir: {}", ent.name))?;
            } else {
                zout.start_file(ent.name.as_str(), opts)
                    .with_context(|| format!("start zip file: {}", ent.name))?;
                zout.write_all(data)
                    .with_context(|| format!("write zip file: {}", ent.name))?;
            }
        }
        zout.finish().context("finish zip")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::DocxPackage;

    fn tiny_zip() -> Vec<u8> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        zout.start_file("[Content_Types].xml", opts).expect("start");
        zout.write_all(b"<Types/>").expect("write");
        zout.start_file("word/document.xml", opts).expect("start");
        zout.write_all(b"<w:document/>").expect("write");
        zout.finish().expect("finish").into_inner()
    }

    #[test]
    fn replacement_swaps_only_named_entry() {
        let pkg = DocxPackage::from_bytes(&tiny_zip()).expect("read");
        let mut replacements = HashMap::new();
        replacements.insert("word/document.xml".to_string(), b"<w:document>x</w:document>".to_vec());

        let bytes = pkg
            .write_with_replacements(Cursor::new(Vec::new()), &replacements)
            .expect("write")
            .into_inner();
        let again = DocxPackage::from_bytes(&bytes).expect("reread");

        assert_eq!(again.entries.len(), 2);
        assert_eq!(again.entries[0].name, "[Content_Types].xml");
        assert_eq!(again.entries[0].data, b"<Types/>");
        assert_eq!(
            again.entry("word/document.xml").expect("doc").data,
            b"<w:document>x</w:document>"
        );
    }
}

use super::xml::{find_attr, XmlEvent, XmlPart};

/// A `w:p` that is a direct child of `w:body`, located by event indices in `word/document.xml`.
/// Table cells, headers and text boxes are not body paragraphs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BodyParagraph {
    pub index: usize,
    /// Index of the `<w:p>` (or `<w:p/>`) event.
    pub start: usize,
    /// Index of the matching `</w:p>`; equal to `start` for an empty element.
    pub end: usize,
    pub text: String,
}

// Relative element paths (below `w:p`) whose content contributes to paragraph text.
const RUN_PATHS: [&[&str]; 2] = [&["w:r"], &["w:hyperlink", "w:r"]];

fn is_run_path(rel: &[String]) -> bool {
    RUN_PATHS
        .iter()
        .any(|p| p.len() == rel.len() && p.iter().zip(rel).all(|(a, b)| *a == b.as_str()))
}

fn is_text_path(rel: &[String]) -> bool {
    match rel.split_last() {
        Some((last, run)) => last == "w:t" && is_run_path(run),
        None => false,
    }
}

fn control_append(buf: &mut String, name: &str, attrs: &[(String, String)]) {
    match name {
        "w:tab" | "w:ptab" => buf.push('\t'),
        "w:cr" => buf.push('\n'),
        "w:br" => {
            if find_attr(attrs, "w:type").unwrap_or("textWrapping") == "textWrapping" {
                buf.push('\n');
            }
        }
        "w:noBreakHyphen" => buf.push('-'),
        _ => {}
    }
}

struct Capture {
    start: usize,
    depth: usize,
    text: String,
}

pub fn scan_body_paragraphs(part: &XmlPart) -> Vec<BodyParagraph> {
    let mut out = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut capturing: Option<Capture> = None;

    for (idx, ev) in part.events.iter().enumerate() {
        match ev {
            XmlEvent::Start { name, attrs } => {
                let parent = stack.last().map(String::as_str).unwrap_or("");
                if capturing.is_none() && name == "w:p" && parent == "w:body" {
                    capturing = Some(Capture {
                        start: idx,
                        depth: stack.len() + 1,
                        text: String::new(),
                    });
                } else if let Some(cap) = capturing.as_mut() {
                    if is_run_path(&stack[cap.depth..]) {
                        control_append(&mut cap.text, name, attrs);
                    }
                }
                stack.push(name.clone());
            }
            XmlEvent::Empty { name, attrs } => {
                let parent = stack.last().map(String::as_str).unwrap_or("");
                if capturing.is_none() && name == "w:p" && parent == "w:body" {
                    out.push(BodyParagraph {
                        index: out.len(),
                        start: idx,
                        end: idx,
                        text: String::new(),
                    });
                } else if let Some(cap) = capturing.as_mut() {
                    if is_run_path(&stack[cap.depth..]) {
                        control_append(&mut cap.text, name, attrs);
                    }
                }
            }
            XmlEvent::Text { text } | XmlEvent::CData { text } => {
                if let Some(cap) = capturing.as_mut() {
                    if is_text_path(&stack[cap.depth..]) {
                        cap.text.push_str(text);
                    }
                }
            }
            XmlEvent::End { name } => {
                let closes_capture = capturing
                    .as_ref()
                    .is_some_and(|cap| name == "w:p" && stack.len() == cap.depth);
                if closes_capture {
                    if let Some(cap) = capturing.take() {
                        out.push(BodyParagraph {
                            index: out.len(),
                            start: cap.start,
                            end: idx,
                            text: cap.text,
                        });
                    }
                }
                stack.pop();
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::scan_body_paragraphs;
    use crate::docx::xml::XmlPart;

    fn body(inner: &str) -> XmlPart {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="urn:w"><w:body>{inner}<w:sectPr/></w:body></w:document>"#
        );
        XmlPart::parse("word/document.xml", xml.as_bytes()).expect("parse")
    }

    #[test]
    fn collects_runs_hyperlinks_and_controls() {
        let part = body(
            r#"<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Bab</w:t><w:tab/><w:t xml:space="preserve"> I </w:t></w:r><w:hyperlink r:id="rId4"><w:r><w:t>link</w:t></w:r></w:hyperlink><w:r><w:br/><w:t>end</w:t></w:r></w:p>"#,
        );
        let paras = scan_body_paragraphs(&part);

        assert_eq!(paras.len(), 1);
        assert_eq!(paras[0].text, "Bab\t I link\nend");
    }

    #[test]
    fn skips_table_cells_but_keeps_empty_paragraphs() {
        let part = body(
            r#"<w:p><w:r><w:t>one</w:t></w:r></w:p><w:p/><w:tbl><w:tr><w:tc><w:p><w:r><w:t>cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl><w:p><w:r><w:t>two</w:t></w:r></w:p>"#,
        );
        let paras = scan_body_paragraphs(&part);
        let texts: Vec<&str> = paras.iter().map(|p| p.text.as_str()).collect();

        assert_eq!(texts, vec!["one", "", "two"]);
        assert_eq!(paras[1].start, paras[1].end);
        assert_eq!(paras[2].index, 2);
    }

    #[test]
    fn page_breaks_and_deleted_text_do_not_contribute() {
        let part = body(
            r#"<w:p><w:r><w:t>kept</w:t><w:br w:type="page"/></w:r><w:del><w:r><w:delText>gone</w:delText></w:r></w:del></w:p>"#,
        );
        let paras = scan_body_paragraphs(&part);

        assert_eq!(paras[0].text, "kept");
    }
}

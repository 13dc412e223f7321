use std::collections::BTreeMap;

use anyhow::{anyhow, Context};

use super::paragraphs::BodyParagraph;
use super::xml::XmlEvent;

/// Index of the event that closes the element opened at `start`.
fn element_end(events: &[XmlEvent], start: usize) -> anyhow::Result<usize> {
    match events.get(start) {
        Some(XmlEvent::Empty { .. }) => return Ok(start),
        Some(XmlEvent::Start { .. }) => {}
        _ => return Err(anyhow!("no element starts at event {start}")),
    }
    let mut depth = 0usize;
    for (i, ev) in events.iter().enumerate().skip(start) {
        match ev {
            XmlEvent::Start { .. } => depth += 1,
            XmlEvent::End { .. } => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(anyhow!("unclosed element at event {start}"))
}

/// Child elements of the element at `start` as inclusive `(first, last)` event ranges.
fn child_elements(events: &[XmlEvent], start: usize, end: usize) -> anyhow::Result<Vec<(usize, usize)>> {
    let mut children = Vec::new();
    let mut i = start + 1;
    while i < end {
        match &events[i] {
            XmlEvent::Start { .. } | XmlEvent::Empty { .. } => {
                let last = element_end(events, i)?;
                children.push((i, last));
                i = last + 1;
            }
            _ => i += 1,
        }
    }
    Ok(children)
}

fn run_properties(events: &[XmlEvent], run: (usize, usize)) -> anyhow::Result<Option<(usize, usize)>> {
    let first = child_elements(events, run.0, run.1)?.into_iter().next();
    Ok(first.filter(|(i, _)| events[*i].name() == Some("w:rPr")))
}

/// Properties of the first run in the paragraph, looking through hyperlinks.
fn first_run_properties(
    events: &[XmlEvent],
    children: &[(usize, usize)],
) -> anyhow::Result<Option<(usize, usize)>> {
    for &(first, last) in children {
        match events[first].name() {
            Some("w:r") => return run_properties(events, (first, last)),
            Some("w:hyperlink") => {
                for (rf, rl) in child_elements(events, first, last)? {
                    if events[rf].name() == Some("w:r") {
                        return run_properties(events, (rf, rl));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

fn push_text_run(out: &mut Vec<XmlEvent>, rpr: &[XmlEvent], text: &str) {
    if text.is_empty() {
        return;
    }
    out.push(XmlEvent::start("w:r", &[]));
    out.extend_from_slice(rpr);
    let mut segment = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\t' => {
                flush_segment(out, &mut segment);
                out.push(XmlEvent::empty("w:tab", &[]));
            }
            '\r' | '\n' => {
                if ch == '\r' {
                    chars.next_if_eq(&'\n');
                }
                flush_segment(out, &mut segment);
                out.push(XmlEvent::empty("w:br", &[]));
            }
            _ if is_xml_char(ch) => segment.push(ch),
            _ => {}
        }
    }
    flush_segment(out, &mut segment);
    out.push(XmlEvent::end("w:r"));
}

/// XML 1.0 `Char`; anything else makes the part unreadable for Word.
fn is_xml_char(ch: char) -> bool {
    matches!(
        ch,
        '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'
    )
}

fn flush_segment(out: &mut Vec<XmlEvent>, segment: &mut String) {
    if segment.is_empty() {
        return;
    }
    out.push(XmlEvent::start("w:t", &[("xml:space", "preserve")]));
    out.push(XmlEvent::text(segment));
    out.push(XmlEvent::end("w:t"));
    segment.clear();
}

/// New events for one paragraph whose text becomes `text`: the `w:p` element and its `w:pPr`
/// survive, every other child is dropped, and a single run carrying the first original run's
/// `w:rPr` holds the new text.
pub fn paragraph_with_text(
    events: &[XmlEvent],
    para: &BodyParagraph,
    text: &str,
) -> anyhow::Result<Vec<XmlEvent>> {
    let mut out = Vec::new();
    match &events[para.start] {
        XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } if name == "w:p" => {
            out.push(XmlEvent::Start {
                name: name.clone(),
                attrs: attrs.clone(),
            });
        }
        other => {
            return Err(anyhow!(
                "paragraph {} does not start with w:p: {other:?}",
                para.index
            ))
        }
    }

    if para.start != para.end {
        let children = child_elements(events, para.start, para.end)?;
        for &(first, last) in &children {
            if events[first].name() == Some("w:pPr") {
                out.extend_from_slice(&events[first..=last]);
            }
        }
        let rpr = first_run_properties(events, &children)?
            .map(|(first, last)| &events[first..=last])
            .unwrap_or(&[]);
        push_text_run(&mut out, rpr, text);
    } else {
        push_text_run(&mut out, &[], text);
    }

    out.push(XmlEvent::end("w:p"));
    Ok(out)
}

/// Rebuild `events` with the listed paragraphs rewritten. Keys are paragraph indices into
/// `paragraphs`; paragraphs not listed keep their events untouched.
pub fn rewrite_paragraphs(
    events: &[XmlEvent],
    paragraphs: &[BodyParagraph],
    replacements: &BTreeMap<usize, String>,
) -> anyhow::Result<Vec<XmlEvent>> {
    let mut out = Vec::with_capacity(events.len());
    let mut cursor = 0usize;
    for (&index, text) in replacements {
        let para = paragraphs
            .get(index)
            .with_context(|| format!("paragraph index {index} out of range ({} paragraphs)", paragraphs.len()))?;
        out.extend_from_slice(&events[cursor..para.start]);
        out.extend(paragraph_with_text(events, para, text)?);
        cursor = para.end + 1;
    }
    out.extend_from_slice(&events[cursor..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::rewrite_paragraphs;
    use crate::docx::paragraphs::scan_body_paragraphs;
    use crate::docx::xml::XmlPart;

    fn body(inner: &str) -> XmlPart {
        let xml = format!(r#"<w:document><w:body>{inner}</w:body></w:document>"#);
        XmlPart::parse("word/document.xml", xml.as_bytes()).expect("parse")
    }

    fn rewritten(part: &XmlPart, replacements: &[(usize, &str)]) -> String {
        let paras = scan_body_paragraphs(part);
        let map: BTreeMap<usize, String> = replacements
            .iter()
            .map(|(i, t)| (*i, t.to_string()))
            .collect();
        let events = rewrite_paragraphs(&part.events, &paras, &map).expect("rewrite");
        let out = XmlPart {
            name: part.name.clone(),
            events,
        };
        String::from_utf8(out.to_bytes().expect("write")).expect("utf8")
    }

    #[test]
    fn keeps_paragraph_and_first_run_properties() {
        let part = body(
            r#"<w:p w:rsidR="00A1"><w:pPr><w:jc w:val="both"/></w:pPr><w:bookmarkStart w:id="0"/><w:r><w:rPr><w:b/></w:rPr><w:t>old</w:t></w:r><w:r><w:t> text</w:t></w:r></w:p>"#,
        );
        let xml = rewritten(&part, &[(0, "new\ttext")]);

        assert_eq!(
            xml,
            r#"<w:document><w:body><w:p w:rsidR="00A1"><w:pPr><w:jc w:val="both"/></w:pPr><w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">new</w:t><w:tab/><w:t xml:space="preserve">text</w:t></w:r></w:p></w:body></w:document>"#
        );
    }

    #[test]
    fn control_characters_are_dropped_and_crlf_is_one_break() {
        let part = body(r#"<w:p><w:r><w:t>old</w:t></w:r></w:p>"#);
        let xml = rewritten(&part, &[(0, "a\u{0}b\u{1b}\r\nc\rd\u{c}")]);

        assert_eq!(
            xml,
            r#"<w:document><w:body><w:p><w:r><w:t xml:space="preserve">ab</w:t><w:br/><w:t xml:space="preserve">c</w:t><w:br/><w:t xml:space="preserve">d</w:t></w:r></w:p></w:body></w:document>"#
        );
    }

    #[test]
    fn untouched_paragraphs_serialize_identically() {
        let inner = r#"<w:p><w:r><w:t>first</w:t></w:r></w:p><w:p><w:r><w:t>second</w:t></w:r></w:p><w:p/>"#;
        let part = body(inner);
        let xml = rewritten(&part, &[(1, "changed")]);

        assert!(xml.starts_with(r#"<w:document><w:body><w:p><w:r><w:t>first</w:t></w:r></w:p>"#));
        assert!(xml.contains(r#"<w:t xml:space="preserve">changed</w:t>"#));
        assert!(xml.ends_with(r#"<w:p/></w:body></w:document>"#));

        let reparsed = XmlPart::parse("d", xml.as_bytes()).expect("reparse");
        let texts: Vec<String> = scan_body_paragraphs(&reparsed)
            .into_iter()
            .map(|p| p.text)
            .collect();
        assert_eq!(texts, vec!["first", "changed", ""]);
    }

    #[test]
    fn empty_replacement_map_is_identity() {
        let inner = r#"<w:p><w:pPr/><w:r><w:t>same</w:t></w:r></w:p>"#;
        let part = body(inner);

        assert_eq!(
            rewritten(&part, &[]),
            format!("<w:document><w:body>{inner}</w:body></w:document>")
        );
    }

    #[test]
    fn hyperlink_run_properties_are_reused() {
        let part = body(
            r#"<w:p><w:hyperlink><w:r><w:rPr><w:i/></w:rPr><w:t>see</w:t></w:r></w:hyperlink></w:p>"#,
        );
        let xml = rewritten(&part, &[(0, "look")]);

        assert!(xml.contains(r#"<w:p><w:r><w:rPr><w:i/></w:rPr><w:t xml:space="preserve">look</w:t></w:r></w:p>"#));
        assert!(!xml.contains("w:hyperlink"));
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let part = body(r#"<w:p/>"#);
        let paras = scan_body_paragraphs(&part);
        let mut map = BTreeMap::new();
        map.insert(3usize, "x".to_string());

        assert!(rewrite_paragraphs(&part.events, &paras, &map).is_err());
    }
}

use anyhow::Context;
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;

/// Flat, lossless view of one XML part. Paragraph scanning and rewriting work on indices into
/// `events`, so the serializer must reproduce everything it did not touch byte-for-byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlEvent {
    Decl {
        version: String,
        encoding: Option<String>,
        standalone: Option<String>,
    },
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Empty {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text {
        text: String,
    },
    CData {
        text: String,
    },
    Comment {
        text: String,
    },
    PI {
        content: String,
    },
    DocType {
        text: String,
    },
}

impl XmlEvent {
    pub fn start(name: &str, attrs: &[(&str, &str)]) -> Self {
        XmlEvent::Start {
            name: name.to_string(),
            attrs: owned_attrs(attrs),
        }
    }

    pub fn empty(name: &str, attrs: &[(&str, &str)]) -> Self {
        XmlEvent::Empty {
            name: name.to_string(),
            attrs: owned_attrs(attrs),
        }
    }

    pub fn end(name: &str) -> Self {
        XmlEvent::End {
            name: name.to_string(),
        }
    }

    pub fn text(text: &str) -> Self {
        XmlEvent::Text {
            text: text.to_string(),
        }
    }

    /// Element name for `Start`, `Empty` and `End` events.
    pub fn name(&self) -> Option<&str> {
        match self {
            XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. } | XmlEvent::End { name } => {
                Some(name.as_str())
            }
            _ => None,
        }
    }
}

fn owned_attrs(attrs: &[(&str, &str)]) -> Vec<(String, String)> {
    attrs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn find_attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[derive(Clone, Debug)]
pub struct XmlPart {
    pub name: String,
    pub events: Vec<XmlEvent>,
}

impl XmlPart {
    pub fn parse(name: &str, xml_bytes: &[u8]) -> anyhow::Result<Self> {
        let mut reader = Reader::from_reader(xml_bytes);
        reader.config_mut().trim_text(false);

        let mut events = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let ev = reader
                .read_event_into(&mut buf)
                .with_context(|| format!("read xml event in {name}"))?;
            let converted = match ev {
                Event::Eof => break,
                Event::Decl(d) => XmlEvent::Decl {
                    version: lossy(d.version().context("decl version")?),
                    encoding: d.encoding().and_then(|r| r.ok()).map(lossy),
                    standalone: d.standalone().and_then(|r| r.ok()).map(lossy),
                },
                Event::Start(s) => XmlEvent::Start {
                    name: lossy(s.name().as_ref()),
                    attrs: raw_attrs(&s)?,
                },
                Event::End(e) => XmlEvent::End {
                    name: lossy(e.name().as_ref()),
                },
                Event::Empty(s) => XmlEvent::Empty {
                    name: lossy(s.name().as_ref()),
                    attrs: raw_attrs(&s)?,
                },
                Event::Text(t) => XmlEvent::Text {
                    text: t.unescape().context("unescape text")?.into_owned(),
                },
                Event::CData(t) => XmlEvent::CData {
                    text: lossy(t.into_inner()),
                },
                Event::Comment(t) => XmlEvent::Comment {
                    text: lossy(t.into_inner()),
                },
                Event::PI(t) => XmlEvent::PI {
                    content: format!("{}{}", lossy(t.target()), lossy(t.content())),
                },
                Event::DocType(t) => XmlEvent::DocType {
                    text: lossy(t.into_inner()),
                },
            };
            events.push(converted);
        }

        Ok(Self {
            name: name.to_string(),
            events,
        })
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut out: Vec<u8> = Vec::new();
        for ev in &self.events {
            match ev {
                XmlEvent::Decl {
                    version,
                    encoding,
                    standalone,
                } => {
                    let decl =
                        BytesDecl::new(version.as_str(), encoding.as_deref(), standalone.as_deref());
                    let mut writer = quick_xml::Writer::new(Vec::new());
                    writer
                        .write_event(Event::Decl(decl))
                        .with_context(|| format!("write decl in {}", self.name))?;
                    out.extend_from_slice(&writer.into_inner());
                }
                XmlEvent::Start { name, attrs } => write_tag(&mut out, name, attrs, false),
                XmlEvent::Empty { name, attrs } => write_tag(&mut out, name, attrs, true),
                XmlEvent::End { name } => {
                    out.extend_from_slice(b"</");
                    out.extend_from_slice(name.as_bytes());
                    out.push(b'>');
                }
                XmlEvent::Text { text } => escape_text_into(&mut out, text),
                XmlEvent::CData { text } => {
                    out.extend_from_slice(b"<![CDATA[");
                    out.extend_from_slice(text.as_bytes());
                    out.extend_from_slice(b"]]>");
                }
                XmlEvent::Comment { text } => {
                    out.extend_from_slice(b"<!--");
                    out.extend_from_slice(text.as_bytes());
                    out.extend_from_slice(b"-->");
                }
                XmlEvent::PI { content } => {
                    out.extend_from_slice(b"<?");
                    out.extend_from_slice(content.as_bytes());
                    out.extend_from_slice(b"?>");
                }
                XmlEvent::DocType { text } => {
                    out.extend_from_slice(b"<!DOCTYPE");
                    out.extend_from_slice(text.as_bytes());
                    out.push(b'>');
                }
            }
        }
        Ok(out)
    }
}

// Attribute values stay in their escaped form (VML `o:gfxdata` carries `&#13;&#10;` that must
// survive untouched), so the writer emits them verbatim.
fn raw_attrs(s: &BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for a in s.attributes() {
        let a = a.context("attr")?;
        attrs.push((lossy(a.key.as_ref()), lossy(a.value.as_ref())));
    }
    Ok(attrs)
}

fn lossy(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

fn write_tag(out: &mut Vec<u8>, name: &str, attrs: &[(String, String)], empty: bool) {
    out.push(b'<');
    out.extend_from_slice(name.as_bytes());
    for (k, v) in attrs {
        out.push(b' ');
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(b"=\"");
        out.extend_from_slice(v.as_bytes());
        out.push(b'"');
    }
    if empty {
        out.extend_from_slice(b"/>");
    } else {
        out.push(b'>');
    }
}

fn escape_text_into(out: &mut Vec<u8>, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '>' => out.extend_from_slice(b"&gt;"),
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{XmlEvent, XmlPart};

    #[test]
    fn keeps_escaped_attribute_values() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?><root xmlns:o="urn:test" o:gfxdata="A&#xD;&#xA;B"/>"#;
        let part = XmlPart::parse("test.xml", xml).expect("parse xml");
        let s = String::from_utf8(part.to_bytes().expect("write xml")).expect("utf8");

        assert!(s.contains(r#"o:gfxdata="A&#xD;&#xA;B""#));
        assert!(!s.contains("&amp;#xD;"));
    }

    #[test]
    fn text_is_unescaped_on_read_and_escaped_on_write() {
        let xml = b"<w:t>Smith &amp; Jones &lt;2020&gt;</w:t>";
        let part = XmlPart::parse("t.xml", xml).expect("parse xml");

        assert_eq!(part.events[1], XmlEvent::text("Smith & Jones <2020>"));
        assert_eq!(part.to_bytes().expect("write xml"), xml.to_vec());
    }
}

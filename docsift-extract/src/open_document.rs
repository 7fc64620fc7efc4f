//! Native readers for zipped XML document formats.
//!
//! Office Open XML (docx, pptx, xlsx) and OpenDocument (odt, ods, odp) are
//! zip containers of XML parts. The file is read once into memory through a
//! shared read-only handle and parsed from there, so the original is never
//! held open during parsing.
//!
//! An encrypted OOXML file is not a zip at all but an OLE compound document
//! wrapping the encrypted package; those are reported as
//! [`SkipReason::PasswordProtected`] instead of [`SkipReason::Corrupted`].

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::{ExtractError, Result, SkipReason};
use crate::registry::Extractor;
use crate::text::read_shared;

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

type Archive = zip::ZipArchive<Cursor<Vec<u8>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDocumentKind {
    Docx,
    Pptx,
    Xlsx,
    OpenDocument,
}

impl OpenDocumentKind {
    pub const ALL: [OpenDocumentKind; 4] = [
        OpenDocumentKind::Docx,
        OpenDocumentKind::Pptx,
        OpenDocumentKind::Xlsx,
        OpenDocumentKind::OpenDocument,
    ];

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            OpenDocumentKind::Docx => &["docx"],
            OpenDocumentKind::Pptx => &["pptx"],
            OpenDocumentKind::Xlsx => &["xlsx"],
            OpenDocumentKind::OpenDocument => &["odt", "ods", "odp"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenDocumentExtractor {
    kind: OpenDocumentKind,
}

impl OpenDocumentExtractor {
    pub fn new(kind: OpenDocumentKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Extractor for OpenDocumentExtractor {
    fn name(&self) -> &'static str {
        match self.kind {
            OpenDocumentKind::Docx => "docx",
            OpenDocumentKind::Pptx => "pptx",
            OpenDocumentKind::Xlsx => "xlsx",
            OpenDocumentKind::OpenDocument => "opendocument",
        }
    }

    async fn extract(&self, path: &Path) -> Result<String> {
        let bytes = read_shared(path).await?;
        let kind = self.kind;
        tokio::task::spawn_blocking(move || extract_bytes(kind, bytes)).await?
    }
}

/// Extract text from an in-memory document container.
pub fn extract_bytes(kind: OpenDocumentKind, bytes: Vec<u8>) -> Result<String> {
    if bytes.starts_with(&OLE_MAGIC) {
        return Err(ExtractError::skipped(
            SkipReason::PasswordProtected,
            "encrypted document package",
        ));
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    match kind {
        OpenDocumentKind::Docx => {
            let xml = read_part(&mut archive, "word/document.xml")?;
            flatten_xml(&xml, &WORD_MARKUP)
        }
        OpenDocumentKind::Pptx => {
            let mut slides = Vec::new();
            for name in numbered_parts(&archive, "ppt/slides/slide") {
                let xml = read_part(&mut archive, &name)?;
                slides.push(flatten_xml(&xml, &DRAWING_MARKUP)?);
            }
            Ok(slides.join("\n"))
        }
        OpenDocumentKind::Xlsx => {
            let shared = match read_part(&mut archive, "xl/sharedStrings.xml") {
                Ok(xml) => shared_strings(&xml)?,
                Err(ExtractError::Zip {
                    source: zip::result::ZipError::FileNotFound,
                }) => Vec::new(),
                Err(e) => return Err(e),
            };
            let mut out = String::new();
            for name in numbered_parts(&archive, "xl/worksheets/sheet") {
                let xml = read_part(&mut archive, &name)?;
                out.push_str(&sheet_text(&xml, &shared)?);
            }
            Ok(out)
        }
        OpenDocumentKind::OpenDocument => {
            let xml = read_part(&mut archive, "content.xml")?;
            flatten_xml(&xml, &ODF_MARKUP)
        }
    }
}

fn read_part(archive: &mut Archive, name: &str) -> Result<String> {
    let mut part = archive.by_name(name)?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| ExtractError::skipped(SkipReason::Corrupted, format!("{name}: {e}")))?;
    Ok(xml)
}

/// Part names like `prefix1.xml`, `prefix2.xml`, ... in numeric order.
fn numbered_parts(archive: &Archive, prefix: &str) -> Vec<String> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name.strip_prefix(prefix)?.strip_suffix(".xml")?;
            Some((number.parse().ok()?, name.to_string()))
        })
        .collect();
    parts.sort();
    parts.into_iter().map(|(_, name)| name).collect()
}

/// Element local names that carry text structure in a given format.
struct Markup {
    /// Element whose character data is document text; `None` means any text
    /// inside a paragraph counts
    text: Option<&'static [u8]>,
    paragraphs: &'static [&'static [u8]],
    tab: &'static [u8],
    line_break: &'static [u8],
}

impl Markup {
    fn is_paragraph(&self, name: &[u8]) -> bool {
        self.paragraphs.iter().any(|p| *p == name)
    }
}

const WORD_MARKUP: Markup = Markup {
    text: Some(b"t"),
    paragraphs: &[b"p"],
    tab: b"tab",
    line_break: b"br",
};

const DRAWING_MARKUP: Markup = Markup {
    text: Some(b"t"),
    paragraphs: &[b"p"],
    tab: b"tab",
    line_break: b"br",
};

const ODF_MARKUP: Markup = Markup {
    text: None,
    paragraphs: &[b"p", b"h"],
    tab: b"tab",
    line_break: b"line-break",
};

fn flatten_xml(xml: &str, markup: &Markup) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;
    let mut paragraph_depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name();
                if markup.text == Some(name.as_ref()) {
                    in_text = true;
                } else if markup.is_paragraph(name.as_ref()) {
                    paragraph_depth += 1;
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                if markup.text == Some(name.as_ref()) {
                    in_text = false;
                } else if markup.is_paragraph(name.as_ref()) {
                    paragraph_depth = paragraph_depth.saturating_sub(1);
                    out.push('\n');
                }
            }
            Event::Empty(e) => {
                let name = e.local_name();
                if name.as_ref() == markup.tab {
                    out.push('\t');
                } else if name.as_ref() == markup.line_break
                    || markup.is_paragraph(name.as_ref())
                {
                    out.push('\n');
                } else if markup.text.is_none() && name.as_ref() == b"s" && paragraph_depth > 0 {
                    out.push(' ');
                }
            }
            Event::Text(t) => {
                let capture = match markup.text {
                    Some(_) => in_text,
                    None => paragraph_depth > 0,
                };
                if capture {
                    out.push_str(&t.unescape()?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

fn shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    // Phonetic guide runs repeat the text in another script
    let mut in_phonetic = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_t && !in_phonetic => current.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(strings)
}

fn sheet_text(xml: &str, shared: &[String]) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type = String::new();
    let mut value = String::new();
    let mut in_value = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    value.clear();
                    cell_type.clear();
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"t" {
                            cell_type = String::from_utf8_lossy(&attr.value).into_owned();
                        }
                    }
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let resolved = if cell_type == "s" {
                        value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i))
                            .cloned()
                            .unwrap_or_default()
                    } else {
                        std::mem::take(&mut value)
                    };
                    if !resolved.is_empty() {
                        row.push(resolved);
                    }
                }
                b"row" => {
                    if !row.is_empty() {
                        out.push_str(&row.join("\t"));
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Event::Text(t) if in_value => value.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn build_zip(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_docx_paragraphs_and_tabs() {
        let doc = r#"<w:document xmlns:w="x"><w:body>
            <w:p><w:r><w:t>Quarterly</w:t></w:r><w:r><w:tab/><w:t xml:space="preserve">report &amp; notes</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second line</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let bytes = build_zip(&[("word/document.xml", doc)]);

        let text = extract_bytes(OpenDocumentKind::Docx, bytes).unwrap();
        assert_eq!(text, "Quarterly\treport & notes\nSecond line\n");
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let slide = |s: &str| format!(r#"<p:sld xmlns:p="x" xmlns:a="y"><a:p><a:r><a:t>{s}</a:t></a:r></a:p></p:sld>"#);
        let (s1, s2, s10) = (slide("one"), slide("two"), slide("ten"));
        let bytes = build_zip(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
            ("ppt/slides/_rels/slide1.xml.rels", "<r/>"),
        ]);

        let text = extract_bytes(OpenDocumentKind::Pptx, bytes).unwrap();
        assert_eq!(text, "one\n\ntwo\n\nten\n");
    }

    #[test]
    fn test_xlsx_shared_and_inline_values() {
        let shared = r#"<sst><si><t>Name</t></si><si><r><t>Ali</t></r><r><t>ce</t></r></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="inlineStr"><is><t>Score</t></is></c></row>
            <row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2"><v>42</v></c><c r="C2"/></row>
        </sheetData></worksheet>"#;
        let bytes = build_zip(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);

        let text = extract_bytes(OpenDocumentKind::Xlsx, bytes).unwrap();
        assert_eq!(text, "Name\tScore\nAlice\t42\n");
    }

    #[test]
    fn test_odt_content() {
        let content = r#"<office:document-content xmlns:office="o" xmlns:text="t"><office:body><office:text>
            <text:h>Title</text:h><text:p>Body<text:s/>text <text:span>here</text:span></text:p>
        </office:text></office:body></office:document-content>"#;
        let bytes = build_zip(&[("content.xml", content)]);

        let text = extract_bytes(OpenDocumentKind::OpenDocument, bytes).unwrap();
        assert_eq!(text, "Title\nBody text here\n");
    }

    #[test]
    fn test_encrypted_package_is_password_protected() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 512]);
        let err = extract_bytes(OpenDocumentKind::Docx, bytes).unwrap_err();
        assert_eq!(err.skip_reason(), Some(SkipReason::PasswordProtected));
    }

    #[test]
    fn test_garbage_is_corrupted() {
        let err = extract_bytes(OpenDocumentKind::Docx, b"not a zip at all".to_vec()).unwrap_err();
        assert_eq!(err.skip_reason(), Some(SkipReason::Corrupted));
    }

    #[test]
    fn test_missing_part_is_corrupted() {
        let bytes = build_zip(&[("other.xml", "<x/>")]);
        let err = extract_bytes(OpenDocumentKind::Docx, bytes).unwrap_err();
        assert_eq!(err.skip_reason(), Some(SkipReason::Corrupted));
    }

    #[tokio::test]
    async fn test_extractor_reads_from_disk() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("memo.docx");
        let doc = r#"<w:document xmlns:w="x"><w:body><w:p><w:r><w:t>memo</w:t></w:r></w:p></w:body></w:document>"#;
        tokio::fs::write(&path, build_zip(&[("word/document.xml", doc)])).await?;

        let text = OpenDocumentExtractor::new(OpenDocumentKind::Docx).extract(&path).await?;
        assert_eq!(text, "memo\n");
        Ok(())
    }
}

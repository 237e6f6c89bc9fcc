//! Plain-text extraction for the document formats found in a corpus.
//!
//! The format is chosen by file extension:
//!
//! | Extension | Handling |
//! |-----------|----------|
//! | `.txt`, `.md` | UTF-8 (lossy) |
//! | `.html`, `.htm` | visible body text via `scraper` |
//! | `.pdf` | `pdf-extract`; line breaks removed, NBSP → space |
//! | `.docx` | `word/document.xml` text runs, one line per paragraph |
//! | `.pptx` | slide text runs in slide order, one line per paragraph |
//!
//! Anything else is [`ExtractError::Unsupported`]; sources skip such objects
//! before download.

use std::io::Read;

use scraper::{ElementRef, Html, Node, Selector};

/// Maximum decompressed bytes to read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported document type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("HTML extraction failed: {0}")]
    Html(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Markdown,
    Html,
    Pdf,
    Docx,
    Pptx,
}

impl DocumentFormat {
    /// Detect the format from a key or path. `None` when unsupported.
    pub fn from_name(name: &str) -> Option<Self> {
        let file = name.rsplit('/').next().unwrap_or(name);
        let (_, ext) = file.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(DocumentFormat::Text),
            "md" | "markdown" => Some(DocumentFormat::Markdown),
            "html" | "htm" => Some(DocumentFormat::Html),
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "pptx" => Some(DocumentFormat::Pptx),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentFormat::Text => "text/plain",
            DocumentFormat::Markdown => "text/markdown",
            DocumentFormat::Html => "text/html",
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }
    }
}

/// Extract text from an object, detecting the format from its name.
pub fn extract_named(name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let format =
        DocumentFormat::from_name(name).ok_or_else(|| ExtractError::Unsupported(name.to_string()))?;
    extract_text(bytes, format)
}

pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    match format {
        DocumentFormat::Text | DocumentFormat::Markdown => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        DocumentFormat::Html => extract_html(&String::from_utf8_lossy(bytes)),
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::Pptx => extract_pptx(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(text
        .replace(['\n', '\r'], "")
        .replace('\u{00A0}', " "))
}

fn extract_html(html: &str) -> Result<String, ExtractError> {
    let document = Html::parse_document(html);
    let body = Selector::parse("body").map_err(|e| ExtractError::Html(format!("{:?}", e)))?;

    let mut parts = Vec::new();
    match document.select(&body).next() {
        Some(el) => collect_visible_text(el, &mut parts),
        None => collect_visible_text(document.root_element(), &mut parts),
    }
    Ok(parts.join("\n"))
}

fn collect_visible_text(element: ElementRef<'_>, parts: &mut Vec<String>) {
    if matches!(
        element.value().name(),
        "script" | "style" | "noscript" | "iframe" | "svg" | "head" | "template"
    ) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_visible_text(child_el, parts);
                }
            }
            _ => {}
        }
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    ooxml_paragraph_text(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slides.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for name in slides {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        out.push_str(&ooxml_paragraph_text(&xml)?);
    }
    Ok(out)
}

/// Concatenate `<*:t>` runs, ending each `<*:p>` paragraph with a newline.
/// Works for both WordprocessingML (`w:`) and DrawingML (`a:`).
fn ooxml_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    let mut para_has_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
                para_has_text = true;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if para_has_text => {
                    out.push('\n');
                    para_has_text = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

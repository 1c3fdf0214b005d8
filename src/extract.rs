//! Text extraction for uploaded documents (PDF, DOCX, plain text).
//!
//! The pipeline supplies raw bytes plus the kind inferred from the filename;
//! this module returns plain UTF-8 text. Page and paragraph caps are
//! enforced here because only the parsed document exposes them.

use std::io::Read;

use crate::error::CoreError;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Paragraph cap multiplier for DOCX: a "page" is roughly three paragraphs.
const DOCX_PARAGRAPHS_PER_PAGE: usize = 3;

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    Text,
}

impl FileKind {
    /// Infer the kind from the filename extension. `None` means the upload
    /// must be rejected as an unsupported type.
    pub fn from_filename(name: &str) -> Option<FileKind> {
        let ext = name.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "doc" | "docx" => Some(FileKind::Docx),
            "txt" => Some(FileKind::Text),
            _ => None,
        }
    }
}

/// Extract plain text from uploaded bytes.
///
/// Fails with [`CoreError::Validation`] when the document exceeds
/// `max_pages`, and [`CoreError::Extraction`] when parsing fails.
pub fn extract_text(bytes: &[u8], kind: FileKind, max_pages: usize) -> Result<String, CoreError> {
    match kind {
        FileKind::Pdf => extract_pdf(bytes, max_pages),
        FileKind::Docx => extract_docx(bytes, max_pages),
        FileKind::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn extract_pdf(bytes: &[u8], max_pages: usize) -> Result<String, CoreError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| CoreError::Extraction(format!("PDF parse failed: {e}")))?;
    let pages = doc.get_pages().len();
    if pages > max_pages {
        return Err(CoreError::Validation(format!(
            "PDF has {pages} pages, limit is {max_pages}"
        )));
    }

    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| CoreError::Extraction(format!("PDF extraction failed: {e}")))
}

fn extract_docx(bytes: &[u8], max_pages: usize) -> Result<String, CoreError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| CoreError::Extraction(format!("DOCX open failed: {e}")))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| CoreError::Extraction("word/document.xml not found".into()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| CoreError::Extraction(format!("DOCX read failed: {e}")))?;
    }
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(CoreError::Extraction(
            "word/document.xml exceeds size limit".into(),
        ));
    }

    extract_docx_paragraphs(&doc_xml, max_pages * DOCX_PARAGRAPHS_PER_PAGE)
}

/// Walk the OOXML body collecting `w:t` text runs, emitting a newline at
/// each paragraph (`w:p`) end.
fn extract_docx_paragraphs(xml: &[u8], max_paragraphs: usize) -> Result<String, CoreError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut paragraphs = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" {
                    out.push('\n');
                    paragraphs += 1;
                    if paragraphs > max_paragraphs {
                        return Err(CoreError::Validation(format!(
                            "document exceeds {max_paragraphs} paragraphs"
                        )));
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(CoreError::Extraction(format!("DOCX XML error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kind_from_extension() {
        assert_eq!(FileKind::from_filename("report.PDF"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_filename("notes.docx"), Some(FileKind::Docx));
        assert_eq!(FileKind::from_filename("old.doc"), Some(FileKind::Docx));
        assert_eq!(FileKind::from_filename("plain.txt"), Some(FileKind::Text));
        assert_eq!(FileKind::from_filename("image.png"), None);
        assert_eq!(FileKind::from_filename("noext"), None);
    }

    #[test]
    fn plain_text_passes_through() {
        let text = extract_text(b"hello world", FileKind::Text, 1000).unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn invalid_utf8_is_lossy_not_fatal() {
        let text = extract_text(&[0x68, 0x69, 0xff], FileKind::Text, 1000).unwrap();
        assert!(text.starts_with("hi"));
    }

    #[test]
    fn invalid_pdf_returns_extraction_error() {
        let err = extract_text(b"not a pdf", FileKind::Pdf, 1000).unwrap_err();
        assert!(matches!(err, CoreError::Extraction(_)));
    }

    #[test]
    fn invalid_zip_returns_extraction_error_for_docx() {
        let err = extract_text(b"not a zip", FileKind::Docx, 1000).unwrap_err();
        assert!(matches!(err, CoreError::Extraction(_)));
    }

    #[test]
    fn docx_paragraphs_become_newlines() {
        let xml = br#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>first paragraph</w:t></w:r></w:p>
                <w:p><w:r><w:t>second paragraph</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;
        let text = extract_docx_paragraphs(xml, 100).unwrap();
        assert_eq!(text, "first paragraph\nsecond paragraph\n");
    }

    #[test]
    fn docx_paragraph_cap_rejects() {
        let xml = br#"<w:document xmlns:w="http://x">
            <w:p><w:t>a</w:t></w:p>
            <w:p><w:t>b</w:t></w:p>
            <w:p><w:t>c</w:t></w:p>
        </w:document>"#;
        let err = extract_docx_paragraphs(xml, 2).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}

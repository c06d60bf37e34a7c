//! Text extraction by mime type.

use std::io::{Cursor, Read};

use once_cell::sync::Lazy;
use regex::Regex;

use super::DocumentError;

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";

static PARAGRAPH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>|<w:p/>").unwrap());
static RUN_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:tab/>").unwrap());

pub trait TextExtractor: Send + Sync + 'static {
    /// Plain text of `bytes`. Unsupported formats yield a bracketed placeholder, not an error.
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, DocumentError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardExtractor;

impl TextExtractor for StandardExtractor {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, DocumentError> {
        let mime = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            DOCX_MIME => extract_docx(bytes),
            PDF_MIME => Ok("[PDF text extraction is not supported]".to_string()),
            GOOGLE_DOC_MIME | "application/json" => Ok(decode_utf8(bytes)),
            m if m.starts_with("text/") => Ok(decode_utf8(bytes)),
            other => Ok(format!("[Unsupported document type: {other}]")),
        }
    }
}

fn decode_utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_start_matches('\u{feff}')
        .to_string()
}

fn extract_docx(bytes: &[u8]) -> Result<String, DocumentError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DocumentError::Extraction(format!("not a docx archive: {e}")))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| DocumentError::Extraction(format!("missing document body: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| DocumentError::Extraction(e.to_string()))?;

    let paragraphs: Vec<String> = PARAGRAPH_RE
        .find_iter(&xml)
        .map(|para| {
            RUN_TEXT_RE
                .captures_iter(para.as_str())
                .map(|run| match run.get(1) {
                    Some(text) => unescape_xml(text.as_str()),
                    None => "\t".to_string(),
                })
                .collect::<String>()
        })
        .collect();

    Ok(paragraphs.join("\n").trim().to_string())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx(body: &str) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut out);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("[Content_Types].xml", options).unwrap();
            zip.write_all(b"<Types/>").unwrap();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn reads_docx_paragraphs() {
        let body = r#"<w:document><w:body>
            <w:p><w:r><w:t>1. Payment</w:t></w:r></w:p>
            <w:p w:rsidR="00A1"><w:r><w:t xml:space="preserve">Fees are due </w:t></w:r><w:r><w:t>in 30 days &amp; net.</w:t></w:r></w:p>
        </w:body></w:document>"#;

        let text = StandardExtractor.extract(&docx(body), DOCX_MIME).unwrap();
        assert_eq!(text, "1. Payment\nFees are due in 30 days & net.");
    }

    #[test]
    fn corrupt_docx_is_an_error() {
        let err = StandardExtractor
            .extract(b"definitely not a zip", DOCX_MIME)
            .unwrap_err();
        assert!(matches!(err, DocumentError::Extraction(_)));
    }

    #[test]
    fn text_like_types_decode_as_utf8() {
        let extractor = StandardExtractor;
        assert_eq!(
            extractor.extract("Clause 1".as_bytes(), "text/plain; charset=utf-8").unwrap(),
            "Clause 1"
        );
        assert_eq!(
            extractor.extract("exported".as_bytes(), GOOGLE_DOC_MIME).unwrap(),
            "exported"
        );
    }

    #[test]
    fn unsupported_types_degrade_to_placeholder() {
        let pdf = StandardExtractor.extract(b"%PDF-1.7", PDF_MIME).unwrap();
        assert!(pdf.starts_with('['));
        let img = StandardExtractor.extract(b"\x89PNG", "image/png").unwrap();
        assert_eq!(img, "[Unsupported document type: image/png]");
    }
}

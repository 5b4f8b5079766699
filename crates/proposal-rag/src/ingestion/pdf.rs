//! PDF page extraction and layout analysis

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Object};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{LayoutStyle, PageFormatting, TextSpan};

/// Text and layout of one page, before OCR and pattern detection
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// Page number (1-indexed)
    pub page_number: u32,
    pub text: String,
    pub formatting: PageFormatting,
}

/// Direct extraction result for a whole PDF
#[derive(Debug, Clone, Default)]
pub struct RawPdf {
    pub total_pages: u32,
    pub pages: Vec<RawPage>,
}

/// Source of per-page text and formatting. Implementations may block.
pub trait PdfBackend: Send + Sync {
    fn extract(&self, filename: &str, data: &[u8]) -> Result<RawPdf>;

    fn name(&self) -> &str;
}

/// Backend built on `lopdf`, with `pdf-extract` as a whole-document fallback
pub struct LopdfBackend {
    fallback_timeout: Duration,
}

impl Default for LopdfBackend {
    fn default() -> Self {
        Self {
            fallback_timeout: Duration::from_secs(60),
        }
    }
}

impl LopdfBackend {
    pub fn new(fallback_timeout: Duration) -> Self {
        Self { fallback_timeout }
    }

    /// Run pdf-extract on a separate thread so a pathological font cannot hang the caller
    fn extract_with_timeout(&self, filename: &str, data: &[u8]) -> Result<String> {
        let data = data.to_vec();
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let result = pdf_extract::extract_text_from_mem(&data);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.fallback_timeout) {
            Ok(Ok(text)) => {
                let _ = handle.join();
                Ok(text)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(Error::file_parse(filename, format!("pdf-extract failed: {}", e)))
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // The thread cannot be killed; it is left to finish on its own
                tracing::error!(
                    "[{}] pdf-extract timed out after {}s",
                    filename,
                    self.fallback_timeout.as_secs()
                );
                Err(Error::Timeout(format!("pdf-extract on '{}'", filename)))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(Error::file_parse(filename, "pdf-extract thread crashed"))
            }
        }
    }

    fn extract_page(doc: &lopdf::Document, filename: &str, page_number: u32, page_id: lopdf::ObjectId) -> RawPage {
        let content = match doc.get_page_content(page_id) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("[{}] No content stream for page {}: {}", filename, page_number, e);
                return RawPage {
                    page_number,
                    ..RawPage::default()
                };
            }
        };

        let operations = match Content::decode(&content) {
            Ok(decoded) => decoded.operations,
            Err(e) => {
                tracing::debug!("[{}] Could not decode page {}: {}", filename, page_number, e);
                Vec::new()
            }
        };

        let text = match doc.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(
                    "[{}] lopdf text extraction failed on page {} ({}); using content stream",
                    filename,
                    page_number,
                    e
                );
                text_from_operations(&operations)
            }
        };

        RawPage {
            page_number,
            text: clean_page_text(&text),
            formatting: analyze_operations(&operations, &image_xobjects(doc, page_id)),
        }
    }
}

impl PdfBackend for LopdfBackend {
    fn extract(&self, filename: &str, data: &[u8]) -> Result<RawPdf> {
        let doc = match lopdf::Document::load_mem(data) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("[{}] lopdf could not load PDF ({}); trying pdf-extract", filename, e);
                let text = self.extract_with_timeout(filename, data)?;
                return Ok(RawPdf {
                    total_pages: 1,
                    pages: vec![RawPage {
                        page_number: 1,
                        text: clean_page_text(&text),
                        formatting: PageFormatting::default(),
                    }],
                });
            }
        };

        let page_ids = doc.get_pages();
        let total_pages = page_ids.len() as u32;
        let mut pages: Vec<RawPage> = page_ids
            .into_iter()
            .map(|(page_number, page_id)| Self::extract_page(&doc, filename, page_number, page_id))
            .collect();

        if !pages.is_empty() && pages.iter().all(|p| p.text.trim().is_empty()) {
            match self.extract_with_timeout(filename, data) {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::info!("[{}] Recovered text with pdf-extract", filename);
                    assign_fallback_text(&mut pages, &text);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("[{}] pdf-extract fallback failed: {}", filename, e),
            }
        }

        tracing::debug!("[{}] Extracted {} pages", filename, total_pages);
        Ok(RawPdf { total_pages, pages })
    }

    fn name(&self) -> &str {
        "lopdf"
    }
}

/// Spread whole-document text over pages using form feeds when they line up
fn assign_fallback_text(pages: &mut [RawPage], text: &str) {
    let parts: Vec<&str> = text.split('\u{c}').collect();
    if parts.len() == pages.len() {
        for (page, part) in pages.iter_mut().zip(parts) {
            page.text = clean_page_text(part);
        }
    } else if let Some(first) = pages.first_mut() {
        first.text = clean_page_text(text);
    }
}

/// Normalize extracted text: strip NULs, expand ligatures, drop blank lines
pub fn clean_page_text(text: &str) -> String {
    text.replace('\0', "")
        .replace('\u{00A0}', " ")
        .replace('\u{FB00}', "ff")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB03}', "ffi")
        .replace('\u{FB04}', "ffl")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn string_operand(object: &Object) -> Option<String> {
    match object {
        Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Object::Array(items) => {
            let joined: String = items.iter().filter_map(string_operand).collect();
            Some(joined)
        }
        _ => None,
    }
}

/// Text shown by a content stream, one line per text object
pub fn text_from_operations(operations: &[Operation]) -> String {
    let mut lines = Vec::new();
    let mut line = String::new();
    for op in operations {
        match op.operator.as_str() {
            "Tj" | "TJ" | "'" | "\"" => {
                if let Some(shown) = op.operands.last().and_then(string_operand) {
                    line.push_str(&shown);
                }
            }
            "ET" | "T*" | "Td" | "TD" if !line.trim().is_empty() => {
                lines.push(line.trim().to_string());
                line.clear();
            }
            _ => {}
        }
    }
    if !line.trim().is_empty() {
        lines.push(line.trim().to_string());
    }
    lines.join("\n")
}

/// Fonts, positions and image usage of a decoded page content stream.
///
/// A page counts as tabular when it has more than five text spans laid out
/// in at least two columns (x positions shared by more than three spans)
/// with at least one row holding several spans.
///
/// `Do` only marks an image when its XObject name is in `image_names`;
/// inline images (`BI`) always do.
pub fn analyze_operations(operations: &[Operation], image_names: &HashSet<Vec<u8>>) -> PageFormatting {
    let mut spans = Vec::new();
    let mut positions: Vec<(i64, i64)> = Vec::new();
    let mut has_images = false;
    let mut font = String::new();
    let mut size = 0.0f32;
    let (mut x, mut y) = (0.0f32, 0.0f32);

    for op in operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => {
                x = 0.0;
                y = 0.0;
            }
            "Tf" => {
                if let Some(Object::Name(name)) = operands.first() {
                    font = String::from_utf8_lossy(name).into_owned();
                }
                if let Some(value) = operands.get(1).and_then(number) {
                    size = value;
                }
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (
                    operands.first().and_then(number),
                    operands.get(1).and_then(number),
                ) {
                    x += tx;
                    y += ty;
                }
            }
            "Tm" => {
                if let (Some(e), Some(f)) = (
                    operands.get(4).and_then(number),
                    operands.get(5).and_then(number),
                ) {
                    x = e;
                    y = f;
                }
            }
            "Tj" | "TJ" | "'" | "\"" => {
                if let Some(text) = operands.last().and_then(string_operand) {
                    if !text.trim().is_empty() {
                        spans.push(TextSpan {
                            text,
                            font: font.clone(),
                            size,
                        });
                        positions.push((x.round() as i64, y.round() as i64));
                    }
                }
            }
            "Do" => {
                if let Some(Object::Name(name)) = operands.first() {
                    has_images |= image_names.contains(name);
                }
            }
            "BI" => has_images = true,
            _ => {}
        }
    }

    let has_tables = spans.len() > 5 && looks_tabular(&positions);
    let layout_style = if has_images && spans.len() > 10 {
        LayoutStyle::Mixed
    } else if has_images {
        LayoutStyle::Image
    } else if has_tables {
        LayoutStyle::Table
    } else {
        LayoutStyle::Text
    };

    PageFormatting {
        text_blocks: spans,
        has_tables,
        has_images,
        layout_style,
    }
}

fn resolve<'a>(doc: &'a lopdf::Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn dictionary_of(object: &Object) -> Option<&Dictionary> {
    match object {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Names of the page's XObjects whose `/Subtype` is `/Image`.
/// Resources are inherited from the nearest ancestor that declares them.
pub fn image_xobjects(doc: &lopdf::Document, page_id: lopdf::ObjectId) -> HashSet<Vec<u8>> {
    let mut node = doc.get_object(page_id).ok().and_then(dictionary_of);
    let mut resources = None;
    // Page trees are shallow; the bound stops reference cycles
    for _ in 0..32 {
        let Some(dict) = node else { break };
        if let Some(found) = dict.get(b"Resources").ok().and_then(|r| resolve(doc, r)).and_then(dictionary_of) {
            resources = Some(found);
            break;
        }
        node = dict
            .get(b"Parent")
            .ok()
            .and_then(|parent| resolve(doc, parent))
            .and_then(dictionary_of);
    }

    let Some(xobjects) = resources
        .and_then(|r| r.get(b"XObject").ok())
        .and_then(|x| resolve(doc, x))
        .and_then(dictionary_of)
    else {
        return HashSet::new();
    };

    xobjects
        .iter()
        .filter(|(_, object)| {
            resolve(doc, object)
                .and_then(dictionary_of)
                .and_then(|dict| dict.get(b"Subtype").ok())
                .and_then(|subtype| subtype.as_name().ok())
                == Some(b"Image".as_slice())
        })
        .map(|(name, _)| name.clone())
        .collect()
}

fn looks_tabular(positions: &[(i64, i64)]) -> bool {
    let mut columns: HashMap<i64, usize> = HashMap::new();
    let mut rows: HashMap<i64, usize> = HashMap::new();
    for (x, y) in positions {
        *columns.entry(*x).or_default() += 1;
        *rows.entry(*y).or_default() += 1;
    }
    let aligned_columns = columns.values().filter(|&&count| count > 3).count();
    let shared_rows = rows.values().any(|&count| count > 1);
    aligned_columns >= 2 && shared_rows
}

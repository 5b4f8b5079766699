//! OCR fallback for pages without a text layer

use std::process::Command;

use crate::error::{Error, Result};

/// Recognizes the text of one PDF page. Implementations may block.
pub trait OcrEngine: Send + Sync {
    /// Text of `page_number` (1-indexed) of the PDF in `pdf`
    fn recognize(&self, pdf: &[u8], page_number: u32) -> Result<String>;

    /// Whether recognition can run at all
    fn is_enabled(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}

/// OCR via the `pdftoppm` and `tesseract` command-line tools
pub struct TesseractOcr {
    language: String,
}

impl TesseractOcr {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    /// Whether both tools are on the PATH
    pub fn is_available() -> bool {
        command_available("pdftoppm") && command_available("tesseract")
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, pdf: &[u8], page_number: u32) -> Result<String> {
        let workdir = tempfile::tempdir()?;
        let pdf_path = workdir.path().join("source.pdf");
        std::fs::write(&pdf_path, pdf)?;

        let output_root = workdir.path().join(format!("page_{}", page_number));
        let png_path = workdir.path().join(format!("page_{}.png", page_number));

        let rasterized = Command::new("pdftoppm")
            .arg("-f")
            .arg(page_number.to_string())
            .arg("-l")
            .arg(page_number.to_string())
            .arg("-singlefile")
            .arg("-png")
            .arg(&pdf_path)
            .arg(&output_root)
            .output()
            .map_err(|e| Error::Ocr(format!("failed to execute pdftoppm: {}", e)))?;

        if !rasterized.status.success() {
            let stderr = String::from_utf8_lossy(&rasterized.stderr);
            return Err(Error::Ocr(format!(
                "pdftoppm failed on page {}: {}",
                page_number,
                stderr.trim()
            )));
        }
        if !png_path.exists() {
            return Err(Error::Ocr(format!(
                "pdftoppm produced no image for page {}",
                page_number
            )));
        }

        let recognized = Command::new("tesseract")
            .arg(&png_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|e| Error::Ocr(format!("failed to execute tesseract: {}", e)))?;

        if !recognized.status.success() {
            let stderr = String::from_utf8_lossy(&recognized.stderr);
            return Err(Error::Ocr(format!(
                "tesseract failed on page {}: {}",
                page_number,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&recognized.stdout)
            .replace('\0', "")
            .trim()
            .to_string())
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

/// Engine used when OCR is turned off
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn recognize(&self, _pdf: &[u8], _page_number: u32) -> Result<String> {
        Ok(String::new())
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

fn command_available(program: &str) -> bool {
    Command::new(program).arg("-v").output().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_engine_returns_nothing() {
        let engine = DisabledOcr;
        assert!(!engine.is_enabled());
        assert_eq!(engine.recognize(b"%PDF-1.5", 1).unwrap(), "");
    }

    #[test]
    fn test_tesseract_rejects_garbage_input() {
        let engine = TesseractOcr::new("eng");
        assert!(engine.is_enabled());
        // Either the tools are missing or pdftoppm cannot read the bytes
        assert!(matches!(engine.recognize(b"not a pdf", 1), Err(Error::Ocr(_))));
    }
}

//! Text extraction from image bytes.
//!
//! The engine is a seam so worker tests can inject doubles. The default
//! implementation shells out to a tesseract binary; each call writes the
//! image to a temp file that is removed on every exit path.

use std::io::Write;
use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("ocr engine unavailable: {0}")]
    Unavailable(String),

    #[error("ocr extraction failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait OcrEngine: Send + Sync {
    fn extract_text(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Shells out to tesseract with stdout output.
pub struct TesseractOcr {
    binary: String,
}

impl TesseractOcr {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn extract_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let mut file = tempfile::Builder::new()
            .prefix("stash-ocr-")
            .suffix(".png")
            .tempfile()?;
        file.write_all(image)?;
        file.flush()?;

        let output = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    OcrError::Unavailable(format!("{} not found", self.binary))
                }
                _ => OcrError::Io(e),
            })?;

        if !output.status.success() {
            return Err(OcrError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(text)
    }
}

/// Used when OCR is disabled in config.
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn extract_text(&self, _image: &[u8]) -> Result<String, OcrError> {
        Err(OcrError::Unavailable("ocr disabled".to_string()))
    }
}

//! Office-format conversion: PPTX/XLSX → PDF via an external converter.
//!
//! The converter is a capability boundary with exactly one method. The
//! default implementation shells out to LibreOffice in headless mode, which
//! is portable and license-clean, but anything that turns office bytes into
//! PDF bytes can stand behind the trait (a conversion microservice, a test
//! stub).
//!
//! Conversion failure is fatal to the run: there is no partial document to
//! proceed with. All scratch files live in a `TempDir` so they are removed
//! on every exit path, including timeout and panic.

use crate::error::SharemapError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

/// Office formats accepted for conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfficeFormat {
    Pptx,
    Xlsx,
}

impl OfficeFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OfficeFormat::Pptx => "pptx",
            OfficeFormat::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for OfficeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Converts an office-format byte stream into a PDF byte stream, or fails.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, bytes: &[u8], format: OfficeFormat) -> Result<Vec<u8>, SharemapError>;
}

/// Default converter: LibreOffice in headless mode.
///
/// Runs `soffice --headless --norestore --convert-to pdf --outdir <tmp>`
/// against the input written to a scratch directory, then reads the PDF
/// back. The child is killed if it outlives the deadline.
pub struct SofficeConverter {
    program: PathBuf,
    timeout: Duration,
}

impl SofficeConverter {
    pub fn new(program: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    async fn convert(&self, bytes: &[u8], format: OfficeFormat) -> Result<Vec<u8>, SharemapError> {
        let workdir = tempfile::tempdir().map_err(|e| SharemapError::Internal(e.to_string()))?;
        let input_path = workdir.path().join(format!("input.{}", format.extension()));

        tokio::fs::write(&input_path, bytes)
            .await
            .map_err(|e| SharemapError::Internal(format!("failed to write scratch file: {}", e)))?;

        debug!(
            "converting {} via {} in {}",
            format,
            self.program.display(),
            workdir.path().display()
        );

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("--headless")
            .arg("--norestore")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(workdir.path())
            .arg(&input_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Ensure the child dies with the timeout instead of holding
            // file handles on the scratch directory.
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!("{} conversion timed out after {:?}", format, self.timeout);
                SharemapError::ConversionTimeout {
                    format: format.to_string(),
                    secs: self.timeout.as_secs(),
                }
            })?
            .map_err(|e| SharemapError::ConversionFailed {
                format: format.to_string(),
                detail: format!("failed to run '{}': {}", self.program.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SharemapError::ConversionFailed {
                format: format.to_string(),
                detail: format!("{} exited with {}: {}", self.program.display(), output.status, stderr.trim()),
            });
        }

        // soffice names the output after the input stem.
        let pdf_path = workdir.path().join("input.pdf");
        let pdf = tokio::fs::read(&pdf_path)
            .await
            .map_err(|_| SharemapError::ConversionFailed {
                format: format.to_string(),
                detail: "converter reported success but produced no PDF".to_string(),
            })?;

        if !pdf.starts_with(b"%PDF") {
            return Err(SharemapError::ConversionFailed {
                format: format.to_string(),
                detail: "converter output is not a PDF".to_string(),
            });
        }

        debug!("converted {} → {} PDF bytes", format, pdf.len());
        Ok(pdf)
        // workdir drops here: scratch input and output are removed.
    }
}

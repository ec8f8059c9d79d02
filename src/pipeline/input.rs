//! Input resolution: normalise a user-supplied path or URL to a local file
//! and classify it by declared extension.
//!
//! The pipeline does not sniff document formats: the caller's declared
//! extension decides the route (image → single-page run, PDF → rasterise,
//! PPTX/XLSX → convert then rasterise). The only magic-byte check is the
//! `%PDF` header on declared PDFs, which turns a pdfium crash deep in the
//! render stage into a meaningful error up front.
//!
//! URL inputs download to a `TempDir` so cleanup happens automatically when
//! `ResolvedInput` is dropped, even on early failure.

use crate::error::SharemapError;
use crate::pipeline::convert::OfficeFormat;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Input routing by declared extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A page-oriented document, rasterised directly.
    Pdf,
    /// A single image, analysed as a one-page run without rasterisation.
    Image(ImageFormat),
    /// An office format, converted to PDF before rasterisation.
    Office(OfficeFormat),
}

impl InputKind {
    /// Classify a file extension (without the dot, any case).
    pub fn from_extension(ext: &str) -> Result<Self, SharemapError> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Ok(InputKind::Pdf),
            "png" => Ok(InputKind::Image(ImageFormat::Png)),
            "jpg" | "jpeg" => Ok(InputKind::Image(ImageFormat::Jpeg)),
            "pptx" => Ok(InputKind::Office(OfficeFormat::Pptx)),
            "xlsx" => Ok(InputKind::Office(OfficeFormat::Xlsx)),
            other => Err(SharemapError::UnsupportedExtension {
                extension: other.to_string(),
            }),
        }
    }

    /// Classify a path by its extension.
    pub fn from_path(path: &Path) -> Result<Self, SharemapError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| SharemapError::UnsupportedExtension {
                extension: String::new(),
            })?;
        Self::from_extension(ext)
    }
}

/// The resolved input — either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the file was downloaded to a temp directory.
    /// The `TempDir` is kept alive to defer cleanup until the run completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path to the file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local file and its routing kind.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
) -> Result<(ResolvedInput, InputKind), SharemapError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Resolve a local file path, validating existence, readability, and the
/// PDF magic when the extension declares a PDF.
fn resolve_local(path_str: &str) -> Result<(ResolvedInput, InputKind), SharemapError> {
    let path = PathBuf::from(path_str);
    let kind = InputKind::from_path(&path)?;

    if !path.exists() {
        return Err(SharemapError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            if kind == InputKind::Pdf {
                use std::io::Read;
                let mut magic = [0u8; 4];
                if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                    return Err(SharemapError::NotAPdf { path, magic });
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(SharemapError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(SharemapError::FileNotFound { path });
        }
    }

    debug!("resolved local input: {} ({:?})", path.display(), kind);
    Ok((ResolvedInput::Local(path), kind))
}

/// Download a URL to a temporary directory.
///
/// The routing kind comes from the URL path's extension, same as local
/// files; a URL with no usable extension is rejected rather than sniffed.
async fn download_url(
    url: &str,
    timeout_secs: u64,
) -> Result<(ResolvedInput, InputKind), SharemapError> {
    let filename = filename_from_url(url).ok_or_else(|| SharemapError::InvalidInput {
        input: url.to_string(),
    })?;
    let kind = InputKind::from_path(Path::new(&filename))?;

    info!("downloading input from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SharemapError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            SharemapError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            SharemapError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(SharemapError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| SharemapError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let temp_dir = TempDir::new().map_err(|e| SharemapError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| SharemapError::Internal(format!("failed to write temp file: {}", e)))?;

    if kind == InputKind::Pdf && bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(SharemapError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    info!("downloaded to: {}", file_path.display());

    Ok((
        ResolvedInput::Downloaded {
            path: file_path,
            _temp_dir: temp_dir,
        },
        kind,
    ))
}

/// Extract the final path segment of a URL, with its extension.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if !last.is_empty() && last.contains('.') {
        Some(last.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/deck.pptx"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn extension_routing() {
        assert_eq!(InputKind::from_extension("pdf").unwrap(), InputKind::Pdf);
        assert_eq!(
            InputKind::from_extension("PNG").unwrap(),
            InputKind::Image(ImageFormat::Png)
        );
        assert_eq!(
            InputKind::from_extension("jpg").unwrap(),
            InputKind::Image(ImageFormat::Jpeg)
        );
        assert_eq!(
            InputKind::from_extension("jpeg").unwrap(),
            InputKind::Image(ImageFormat::Jpeg)
        );
        assert_eq!(
            InputKind::from_extension("pptx").unwrap(),
            InputKind::Office(OfficeFormat::Pptx)
        );
        assert_eq!(
            InputKind::from_extension("xlsx").unwrap(),
            InputKind::Office(OfficeFormat::Xlsx)
        );
        assert!(matches!(
            InputKind::from_extension("docx"),
            Err(SharemapError::UnsupportedExtension { .. })
        ));
    }

    #[test]
    fn path_without_extension_is_rejected() {
        assert!(matches!(
            InputKind::from_path(Path::new("/tmp/noext")),
            Err(SharemapError::UnsupportedExtension { .. })
        ));
    }

    #[test]
    fn filename_from_url_extraction() {
        assert_eq!(
            filename_from_url("https://example.com/reports/q3.pdf"),
            Some("q3.pdf".to_string())
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
        assert_eq!(filename_from_url("https://example.com/noext"), None);
    }

    #[test]
    fn declared_pdf_with_wrong_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();
        let result = resolve_local(path.to_str().unwrap());
        assert!(matches!(result, Err(SharemapError::NotAPdf { .. })));
    }

    #[test]
    fn missing_file_is_reported() {
        let result = resolve_local("/definitely/not/here.pdf");
        assert!(matches!(result, Err(SharemapError::FileNotFound { .. })));
    }
}

//! Image <-> data-URI conversion.
//!
//! Pure over bytes. The only side effects are reading a source file in
//! [`encode_path`] and the scoped write in [`write_decoded`].

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{EngineError, Result};

/// Image containers the codec accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Webp,
    Tiff,
}

const EXTENSIONS: &[(&str, ImageFormat)] = &[
    ("png", ImageFormat::Png),
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("gif", ImageFormat::Gif),
    ("bmp", ImageFormat::Bmp),
    ("webp", ImageFormat::Webp),
    ("tiff", ImageFormat::Tiff),
];

impl ImageFormat {
    pub const ALL: [ImageFormat; 6] = [
        Self::Png,
        Self::Jpeg,
        Self::Gif,
        Self::Bmp,
        Self::Webp,
        Self::Tiff,
    ];

    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Webp => "image/webp",
            Self::Tiff => "image/tiff",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Webp => "webp",
            Self::Tiff => "tiff",
        }
    }

    pub fn from_extension(ext: &str) -> Result<Self> {
        let lowered = ext.trim_start_matches('.').to_ascii_lowercase();
        EXTENSIONS
            .iter()
            .find(|(candidate, _)| *candidate == lowered)
            .map(|(_, format)| *format)
            .ok_or_else(|| {
                EngineError::UnsupportedFormat(format!(
                    ".{lowered} (supported: {})",
                    EXTENSIONS
                        .iter()
                        .map(|(ext, _)| *ext)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|value| value.to_str())
            .unwrap_or_default();
        Self::from_extension(ext)
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let lowered = mime.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|format| format.mime() == lowered)
    }

    /// Detects the container from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Result<Self> {
        let guessed = image::guess_format(bytes)
            .map_err(|err| EngineError::UnsupportedFormat(err.to_string()))?;
        match guessed {
            image::ImageFormat::Png => Ok(Self::Png),
            image::ImageFormat::Jpeg => Ok(Self::Jpeg),
            image::ImageFormat::Gif => Ok(Self::Gif),
            image::ImageFormat::Bmp => Ok(Self::Bmp),
            image::ImageFormat::WebP => Ok(Self::Webp),
            image::ImageFormat::Tiff => Ok(Self::Tiff),
            other => Err(EngineError::UnsupportedFormat(format!("{other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// `None` when the input was bare base64 without a data-URI header.
    pub format: Option<ImageFormat>,
    pub bytes: Vec<u8>,
}

pub fn encode_bytes(bytes: &[u8], format: ImageFormat) -> String {
    format!("data:{};base64,{}", format.mime(), BASE64.encode(bytes))
}

/// Encodes raw bytes, detecting the container from their content.
pub fn encode_sniffed(bytes: &[u8]) -> Result<String> {
    let format = ImageFormat::sniff(bytes)?;
    Ok(encode_bytes(bytes, format))
}

/// Encodes a file, taking the container from its extension.
pub fn encode_path(path: &Path) -> Result<String> {
    let format = ImageFormat::from_path(path)?;
    let bytes = fs::read(path)?;
    Ok(encode_bytes(&bytes, format))
}

/// Accepts either a `data:<mime>;base64,<payload>` URI or bare base64.
pub fn decode(encoded: &str) -> Result<DecodedImage> {
    let trimmed = encoded.trim();
    let (format, payload) = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| EngineError::InvalidDataUri("missing ',' separator".to_string()))?;
            let Some(mime) = header.strip_suffix(";base64") else {
                return Err(EngineError::InvalidDataUri(format!(
                    "expected base64 payload, got header '{header}'"
                )));
            };
            let format = ImageFormat::from_mime(mime)
                .ok_or_else(|| EngineError::UnsupportedFormat(mime.to_string()))?;
            (Some(format), payload)
        }
        None => (None, trimmed),
    };
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|err| EngineError::InvalidDataUri(err.to_string()))?;
    Ok(DecodedImage { format, bytes })
}

/// Decodes and writes to `path`, creating parent directories first.
pub fn write_decoded(encoded: &str, path: &Path) -> Result<PathBuf> {
    let decoded = decode(encoded)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &decoded.bytes)?;
    Ok(path.to_path_buf())
}

/// Format name (or `"unknown"`) and approximate decoded size in bytes,
/// computed from the header and payload length without decoding.
pub fn image_info(encoded: &str) -> (String, usize) {
    let trimmed = encoded.trim();
    let (format_name, payload) = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').unwrap_or((rest, ""));
            let mime = header.split(';').next().unwrap_or_default();
            let name = ImageFormat::from_mime(mime)
                .map(|format| format.extension().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            (name, payload)
        }
        None => ("unknown".to_string(), trimmed),
    };
    (format_name, payload.len() * 3 / 4)
}

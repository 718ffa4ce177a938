use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, ImageReader};
use sha2::{Digest, Sha256};

/// One generated image: raw encoded bytes plus their mime type.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl ImageArtifact {
    /// Wraps encoded bytes. Without an explicit mime type it is sniffed.
    pub fn new(bytes: Vec<u8>, mime_type: Option<&str>) -> Self {
        let mime_type = mime_type
            .map(str::trim)
            .filter(|value| value.starts_with("image/"))
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_else(|| sniff_mime(&bytes).to_string());
        Self {
            bytes: bytes.into(),
            mime_type,
        }
    }

    /// Accepts bare base64 or a `data:image/...;base64,` URL.
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        let trimmed = encoded.trim();
        let (declared_mime, payload) = match trimmed.split_once(";base64,") {
            Some((head, payload)) => (head.strip_prefix("data:"), payload),
            None => (None, trimmed),
        };
        let bytes = BASE64.decode(payload.as_bytes())?;
        let sniffed = image::guess_format(&bytes).ok().map(mime_for_format);
        Ok(Self::new(bytes, sniffed.or(declared_mime)))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }

    /// Pixel size read from the image header, when the bytes decode.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        ImageReader::new(Cursor::new(self.bytes()))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }

    pub fn sha256_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(mime_for_format)
        .unwrap_or("image/png")
}

fn mime_for_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Gif => "image/gif",
        _ => "image/png",
    }
}

pub(crate) fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}

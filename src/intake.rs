use base64::Engine;
use image::ImageFormat;
use thiserror::Error;
use tracing::debug;

use crate::models::SourceImage;

#[derive(Debug, Error, PartialEq)]
pub enum IntakeError {
    #[error("image data is empty")]
    Empty,
    #[error("image data is not valid base64: {0}")]
    Encoding(String),
    #[error("unsupported or unrecognised image format")]
    UnknownFormat,
}

/// Strips an optional `data:<mime>;base64,` prefix as sent by browsers.
fn strip_data_url(raw: &str) -> (&str, Option<&str>) {
    if let Some(rest) = raw.strip_prefix("data:") {
        if let Some((header, payload)) = rest.split_once(',') {
            let mime = header.split(';').next().filter(|m| !m.is_empty());
            return (payload, mime);
        }
    }
    (raw, None)
}

/// Detects the MIME type of base64 image data from its magic bytes.
pub fn sniff_mime_type(image_b64: &str) -> Option<&'static str> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(image_b64.trim()).ok()?;
    match image::guess_format(&bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

/// Turns an uploaded photo into a [`SourceImage`]. The MIME type always comes
/// from the bytes; a declared type that disagrees is ignored.
pub fn accept_upload(raw: &str, declared_mime: Option<&str>) -> Result<SourceImage, IntakeError> {
    let (payload, url_mime) = strip_data_url(raw.trim());
    if payload.is_empty() {
        return Err(IntakeError::Empty);
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| IntakeError::Encoding(e.to_string()))?;
    let sniffed = match image::guess_format(&bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::WebP) => "image/webp",
        _ => return Err(IntakeError::UnknownFormat),
    };
    if let Some(claimed) = declared_mime.or(url_mime).filter(|m| !m.eq_ignore_ascii_case(sniffed)) {
        debug!("Upload declared {} but contains {}; using {}", claimed, sniffed, sniffed);
    }
    Ok(SourceImage::new(payload, sniffed))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 8-byte PNG signature followed by padding; enough for format sniffing.
    fn png_b64() -> String {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0u8; 16]);
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn infers_png_when_mime_missing() {
        let img = accept_upload(&png_b64(), None).unwrap();
        assert_eq!(img.mime_type, "image/png");
        assert_eq!(sniff_mime_type(&img.image_data), Some("image/png"));
    }

    #[test]
    fn accepts_data_urls() {
        let raw = format!("data:image/png;base64,{}", png_b64());
        let img = accept_upload(&raw, None).unwrap();
        assert_eq!(img.image_data, png_b64());
        assert_eq!(img.mime_type, "image/png");
    }

    #[test]
    fn sniffed_format_wins_over_declared_type() {
        let img = accept_upload(&png_b64(), Some("image/gif")).unwrap();
        assert_eq!(img.mime_type, "image/png");
        let raw = format!("data:image/jpeg;base64,{}", png_b64());
        assert_eq!(accept_upload(&raw, None).unwrap().mime_type, "image/png");
    }

    #[test]
    fn rejects_non_images() {
        let text = base64::engine::general_purpose::STANDARD.encode(b"hello there, not an image");
        assert_eq!(accept_upload(&text, Some("image/png")), Err(IntakeError::UnknownFormat));
        assert_eq!(accept_upload("", None), Err(IntakeError::Empty));
        assert!(matches!(accept_upload("***", None), Err(IntakeError::Encoding(_))));
    }
}

// ABOUTME: Content sniffing from magic bytes, plus pixel dimensions for common image formats.
// ABOUTME: Used to validate archived <img> resources and to size extracted pictures.

use std::path::Path;

/// MIME types accepted for resources referenced from an `<img>` element.
pub const IMAGE_TYPES: &[&str] = &[
    "image/bmp",
    "image/gif",
    "image/jpeg",
    "image/png",
    "image/svg+xml",
    "image/tiff",
    "image/webp",
    "image/x-icon",
];

/// Magic byte signatures, checked in order.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"II*\x00", "image/tiff"),
    (b"MM\x00*", "image/tiff"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"%PDF-", "application/pdf"),
    (b"\x1f\x8b", "application/gzip"),
    (b"PK\x03\x04", "application/zip"),
    (b"OggS", "audio/ogg"),
    (b"ID3", "audio/mpeg"),
    (b"\x1a\x45\xdf\xa3", "video/webm"),
];

/// Detect a MIME type from the leading bytes of `data`.
pub fn detect_mime(data: &[u8]) -> Option<&'static str> {
    for (sig, mime) in SIGNATURES {
        if data.starts_with(sig) {
            return Some(*mime);
        }
    }

    if data.len() >= 12 && &data[0..4] == b"RIFF" {
        match &data[8..12] {
            b"WEBP" => return Some("image/webp"),
            b"WAVE" => return Some("audio/wav"),
            _ => {}
        }
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return Some(match &data[8..12] {
            b"avif" | b"avis" => "image/avif",
            _ => "video/mp4",
        });
    }

    detect_markup(data)
}

/// SVG, HTML and XML are recognized by their first tag.
fn detect_markup(data: &[u8]) -> Option<&'static str> {
    let head = &data[..data.len().min(1024)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start().to_lowercase();

    if text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg")) {
        return Some("image/svg+xml");
    }
    if text.starts_with("<!doctype html")
        || text.starts_with("<html")
        || text.starts_with("<head")
        || text.starts_with("<body")
    {
        return Some("text/html");
    }
    if text.starts_with("<?xml") {
        return Some("text/xml");
    }
    None
}

/// Guess a MIME type from a file name or URL path.
pub fn detect_by_extension(path: &str) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

/// File extension for a resource of type `mime` found at `path`. The path's
/// own extension is kept when it is registered for that type.
pub fn extension_for(path: &str, mime: &str) -> String {
    let known = mime_guess::get_mime_extensions_str(mime).unwrap_or(&[]);
    let own = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match own {
        Some(ext) if known.iter().any(|k| *k == ext) => ext,
        _ => known.first().copied().unwrap_or("bin").to_string(),
    }
}

/// Returns true when `data` sniffs as one of [`IMAGE_TYPES`].
pub fn is_valid_image(data: &[u8]) -> bool {
    detect_mime(data).is_some_and(|mime| IMAGE_TYPES.contains(&mime))
}

fn be_u16(b: &[u8], at: usize) -> Option<u32> {
    Some(u16::from_be_bytes([*b.get(at)?, *b.get(at + 1)?]) as u32)
}

fn le_u16(b: &[u8], at: usize) -> Option<u32> {
    Some(u16::from_le_bytes([*b.get(at)?, *b.get(at + 1)?]) as u32)
}

fn be_u32(b: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(b.get(at..at + 4)?.try_into().ok()?))
}

fn le_u24(b: &[u8], at: usize) -> Option<u32> {
    let s = b.get(at..at + 3)?;
    Some(s[0] as u32 | (s[1] as u32) << 8 | (s[2] as u32) << 16)
}

/// Pixel size of a PNG, GIF, BMP, WebP or JPEG image.
pub fn image_size(data: &[u8]) -> Option<(u32, u32)> {
    match detect_mime(data)? {
        "image/png" => Some((be_u32(data, 16)?, be_u32(data, 20)?)),
        "image/gif" => Some((le_u16(data, 6)?, le_u16(data, 8)?)),
        "image/bmp" => {
            let w = i32::from_le_bytes(data.get(18..22)?.try_into().ok()?);
            let h = i32::from_le_bytes(data.get(22..26)?.try_into().ok()?);
            Some((w.unsigned_abs(), h.unsigned_abs()))
        }
        "image/webp" => webp_size(data),
        "image/jpeg" => jpeg_size(data),
        _ => None,
    }
}

fn webp_size(data: &[u8]) -> Option<(u32, u32)> {
    match data.get(12..16)? {
        b"VP8 " => Some((le_u16(data, 26)? & 0x3fff, le_u16(data, 28)? & 0x3fff)),
        b"VP8L" => {
            let b = data.get(21..25)?;
            let w = 1 + (((b[1] as u32 & 0x3f) << 8) | b[0] as u32);
            let h = 1 + (((b[3] as u32 & 0x0f) << 10) | ((b[2] as u32) << 2) | ((b[1] as u32 & 0xc0) >> 6));
            Some((w, h))
        }
        b"VP8X" => Some((1 + le_u24(data, 24)?, 1 + le_u24(data, 27)?)),
        _ => None,
    }
}

fn jpeg_size(data: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 9 < data.len() {
        if data[i] != 0xff {
            return None;
        }
        let marker = data[i + 1];
        // SOF0..SOF15 except DHT, JPG and DAC
        if (0xc0..=0xcf).contains(&marker) && !matches!(marker, 0xc4 | 0xc8 | 0xcc) {
            return Some((be_u16(data, i + 7)?, be_u16(data, i + 5)?));
        }
        i += 2 + be_u16(data, i + 2)? as usize;
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A 1x1 transparent PNG.
    pub(crate) const PNG_1X1: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
        0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
    ];

    #[test]
    fn detects_common_images() {
        assert_eq!(detect_mime(PNG_1X1), Some("image/png"));
        assert_eq!(detect_mime(b"GIF89a\x02\x00\x03\x00"), Some("image/gif"));
        assert_eq!(detect_mime(b"\xff\xd8\xff\xe0"), Some("image/jpeg"));
        assert_eq!(detect_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some("image/webp"));
        assert_eq!(
            detect_mime(b"<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\"/>"),
            Some("image/svg+xml")
        );
    }

    #[test]
    fn html_is_not_an_image() {
        let html = b"<!DOCTYPE html><html><body>Not found</body></html>";
        assert_eq!(detect_mime(html), Some("text/html"));
        assert!(!is_valid_image(html));
        assert!(!is_valid_image(b"plain text"));
        assert!(is_valid_image(PNG_1X1));
    }

    #[test]
    fn sizes() {
        assert_eq!(image_size(PNG_1X1), Some((1, 1)));
        assert_eq!(image_size(b"GIF89a\x02\x00\x03\x00"), Some((2, 3)));

        let jpeg: &[u8] = &[
            0xff, 0xd8, 0xff, 0xe0, 0x00, 0x04, 0x00, 0x00, 0xff, 0xc0, 0x00, 0x11, 0x08, 0x00,
            0x20, 0x00, 0x40, 0x03, 0x00, 0x00,
        ];
        assert_eq!(image_size(jpeg), Some((64, 32)));
    }

    #[test]
    fn types_from_extensions() {
        assert_eq!(detect_by_extension("/a/b/style.CSS").as_deref(), Some("text/css"));
        assert_eq!(detect_by_extension("/img/photo.png").as_deref(), Some("image/png"));
        assert_eq!(detect_by_extension("/noext"), None);
    }

    #[test]
    fn extensions_for_types() {
        assert_eq!(extension_for("/photos/cat.JPG", "image/jpeg"), "jpg");
        assert_eq!(extension_for("/photos/cat.jpeg", "image/jpeg"), "jpeg");
        assert_eq!(extension_for("/image?id=4", "image/png"), "png");
        assert_eq!(extension_for("/pic.png", "image/gif"), "gif");
        assert_eq!(extension_for("/blob", "application/x-unknown"), "bin");
    }
}

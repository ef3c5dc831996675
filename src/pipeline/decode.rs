//! Image decoding: base64 payloads from the extraction service → [`ExtractedImage`].
//!
//! Docling embeds figures directly in the Markdown as
//! `![alt](data:image/png;base64,....)`. The archive needs real files, so each
//! data URI is decoded, given a stable per-document name (`image_001.png`,
//! `image_002.jpg`, …) and the link is replaced by that bare name. Relinking
//! later turns the bare name into the archive path.
//!
//! Older Docling releases instead returned a side map `{name: base64}` next to
//! the Markdown; [`decode_named`] handles that shape.

use crate::document::ExtractedImage;
use crate::error::ExtractionError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashSet;
use tracing::debug;

static RE_DATA_URI_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[([^\]]*)\]\(\s*data:(image/[A-Za-z0-9.+-]+);base64,([A-Za-z0-9+/=\s]*?)\s*\)"#)
        .unwrap()
});

/// Replace every embedded data-URI image with a numbered file name.
///
/// Names already present in `taken` are skipped so the result never collides
/// with images delivered through the legacy side map. Returns the rewritten
/// Markdown and the decoded images in order of appearance.
pub fn extract_data_uri_images(
    markdown: &str,
    taken: &HashSet<String>,
) -> Result<(String, Vec<ExtractedImage>), ExtractionError> {
    let mut images = Vec::new();
    let mut used: HashSet<String> = taken.clone();
    let mut counter = 0usize;
    let mut failure = None;

    let rewritten = RE_DATA_URI_IMAGE.replace_all(markdown, |caps: &Captures| {
        if failure.is_some() {
            return caps[0].to_string();
        }
        let alt = &caps[1];
        let declared = &caps[2];
        let payload: String = caps[3].chars().filter(|c| !c.is_whitespace()).collect();

        let data = match STANDARD.decode(payload.as_bytes()) {
            Ok(data) => data,
            Err(e) => {
                failure = Some(ExtractionError::MalformedResponse {
                    detail: format!("embedded image #{} is not valid base64: {e}", images.len() + 1),
                });
                return caps[0].to_string();
            }
        };

        let (content_type, ext) = sniff(&data, declared);
        let filename = loop {
            counter += 1;
            let candidate = format!("image_{counter:03}.{ext}");
            if used.insert(candidate.clone()) {
                break candidate;
            }
        };

        let link = format!("![{alt}]({filename})");
        images.push(ExtractedImage {
            filename,
            data,
            content_type,
        });
        link
    });

    if let Some(e) = failure {
        return Err(e);
    }

    debug!("Decoded {} embedded image(s)", images.len());
    Ok((rewritten.into_owned(), images))
}

/// Decode one image from the legacy `{name: base64}` map.
///
/// The payload may carry its own `data:...;base64,` prefix. The name is cut
/// down to its last path segment so it matches what the Markdown links to.
pub fn decode_named(name: &str, payload: &str) -> Result<ExtractedImage, ExtractionError> {
    let filename = basename(name);
    if filename.is_empty() {
        return Err(ExtractionError::MalformedResponse {
            detail: format!("image entry '{name}' has no file name"),
        });
    }

    let (declared, body) = match payload.split_once(";base64,") {
        Some((prefix, body)) => (prefix.trim_start_matches("data:"), body),
        None => ("", payload),
    };
    let body: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let data = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| ExtractionError::MalformedResponse {
            detail: format!("image '{filename}' is not valid base64: {e}"),
        })?;

    let declared = if declared.is_empty() {
        mime_from_name(filename)
    } else {
        declared
    };
    let (content_type, _) = sniff(&data, declared);

    Ok(ExtractedImage {
        filename: filename.to_string(),
        data,
        content_type,
    })
}

/// Last `/`-separated segment of a link or name.
pub(crate) fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim()
}

/// Content type and file extension for decoded bytes.
///
/// The bytes win over the declared type; unknown formats fall back to the
/// declared type, then to PNG.
fn sniff(data: &[u8], declared: &str) -> (String, &'static str) {
    if let Ok(format) = image::guess_format(data) {
        let ext = match format {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::WebP => "webp",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
            _ => extension_for_mime(declared),
        };
        return (format.to_mime_type().to_string(), ext);
    }

    let ext = extension_for_mime(declared);
    let content_type = if declared.starts_with("image/") {
        declared.to_string()
    } else {
        "image/png".to_string()
    };
    (content_type, ext)
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        _ => "png",
    }
}

fn mime_from_name(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/png",
    }
}

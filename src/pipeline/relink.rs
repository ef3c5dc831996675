//! Image relinking: point every Markdown image link at the file bundled next
//! to the document in the archive.
//!
//! Links are matched to extracted images by file name only, so
//! `image_001.png`, `./image_001.png` and `old/dir/image_001.png` all resolve
//! to the same image. Remote (`http`/`https`) links are left untouched.
//!
//! The module also owns archive naming: [`plan_targets`] decides the
//! directory stem each document lives under.

use crate::document::{ExtractedImage, UploadedDocument};
use crate::error::RelinkError;
use crate::pipeline::decode::basename;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use tracing::debug;

static RE_IMAGE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[(?P<alt>[^\]]*)\]\(\s*(?:<(?P<angled>[^>]+)>|(?P<bare>[^)\s]+))(?P<title>\s+"[^"]*")?\s*\)"#)
        .unwrap()
});

/// Document Markdown and images after relinking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relinked {
    pub markdown: String,
    /// Images with `filename` replaced by the link target, e.g.
    /// `report/images/image_001.png`. Order follows the input image set.
    pub images: Vec<ExtractedImage>,
}

fn link_target<'a>(caps: &'a Captures<'_>) -> &'a str {
    caps.name("angled")
        .or_else(|| caps.name("bare"))
        .map_or("", |m| m.as_str())
}

fn is_remote(target: &str) -> bool {
    let lower = target.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// File name a local link refers to, without query string or fragment.
fn reference_name(target: &str) -> &str {
    let end = target.find(['?', '#']).unwrap_or(target.len());
    basename(&target[..end])
}

/// File names of all local image links, in order of first appearance.
pub fn image_references(markdown: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    RE_IMAGE_LINK
        .captures_iter(markdown)
        .map(|caps| link_target(&caps).to_string())
        .filter(|target| !is_remote(target))
        .map(|target| reference_name(&target).to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Names referenced in `before` that no longer appear in `after`.
pub fn missing_references(before: &str, after: &str) -> Vec<String> {
    let kept: HashSet<String> = image_references(after).into_iter().collect();
    image_references(before)
        .into_iter()
        .filter(|name| !kept.contains(name))
        .collect()
}

/// Rewrite every local image link to `{target_dir}/images/{name}`.
///
/// Fails on the first link whose name matches no image in `images`, or when
/// two images share a file name and would overwrite each other in the
/// archive. Images the Markdown never links to are still carried along. Running the result
/// through `relink` again with the relocated images yields the same output.
pub fn relink(
    markdown: &str,
    images: &[ExtractedImage],
    target_dir: &str,
) -> Result<Relinked, RelinkError> {
    let mut known: HashMap<&str, String> = HashMap::with_capacity(images.len());
    for img in images {
        let name = basename(&img.filename);
        if known
            .insert(name, format!("{target_dir}/images/{name}"))
            .is_some()
        {
            return Err(RelinkError::DuplicateImageName {
                name: name.to_string(),
            });
        }
    }

    for caps in RE_IMAGE_LINK.captures_iter(markdown) {
        let target = link_target(&caps);
        if is_remote(target) {
            continue;
        }
        if !known.contains_key(reference_name(target)) {
            return Err(RelinkError::UnresolvedReference {
                reference: target.to_string(),
            });
        }
    }

    let rewritten = RE_IMAGE_LINK.replace_all(markdown, |caps: &Captures| {
        let target = link_target(caps);
        match known.get(reference_name(target)) {
            Some(path) if !is_remote(target) => {
                let title = caps.name("title").map_or("", |m| m.as_str());
                format!("![{}]({}{title})", &caps["alt"], link_destination(path))
            }
            _ => caps[0].to_string(),
        }
    });

    let relocated = images
        .iter()
        .map(|img| ExtractedImage {
            filename: format!("{target_dir}/images/{}", basename(&img.filename)),
            data: img.data.clone(),
            content_type: img.content_type.clone(),
        })
        .collect::<Vec<_>>();

    debug!(
        "Relinked {} image(s) under '{}'",
        relocated.len(),
        target_dir
    );

    Ok(Relinked {
        markdown: rewritten.into_owned(),
        images: relocated,
    })
}

/// A Markdown link destination for `path`; paths with whitespace are wrapped
/// in angle brackets.
pub(crate) fn link_destination(path: &str) -> String {
    if path.chars().any(char::is_whitespace) {
        format!("<{path}>")
    } else {
        path.to_string()
    }
}

/// Reduce a file stem to a name safe for archive paths and Markdown links.
pub fn slugify(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Archive stem for each document, in input order.
///
/// A stem already used by an earlier document (compared case-insensitively)
/// gets the 1-based input position appended, e.g. `report-3`.
pub fn plan_targets(documents: &[UploadedDocument]) -> Vec<String> {
    let mut used = HashSet::new();
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let base = slugify(doc.stem());
            let mut candidate = base.clone();
            let mut attempt = 0;
            while !used.insert(candidate.to_lowercase()) {
                attempt += 1;
                candidate = if attempt == 1 {
                    format!("{base}-{}", i + 1)
                } else {
                    format!("{base}-{}-{attempt}", i + 1)
                };
            }
            candidate
        })
        .collect()
}

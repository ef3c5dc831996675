//! Post-processing: deterministic cleanup of extracted and refined Markdown.
//!
//! Two passes exist because the two producers misbehave differently:
//!
//! - **Extraction output** carries converter artefacts: YAML front matter,
//!   `<!-- image -->` placeholders, stray layout tags, HTML entities, ordered
//!   lists flattened into `1. 1. 1.` and no top-level heading. The import
//!   target refuses pages without an H1, so one is added from the file name.
//! - **Model output** is mostly clean but sometimes wraps the whole answer in
//!   a ` ```markdown ` fence or mangles table separators.
//!
//! Every rule is a pure `&str → String` function. None of them removes or
//! rewrites an image link: the relinker depends on every `![alt](file)`
//! surviving both passes. Rules that reason about Markdown structure skip
//! fenced code blocks, where a leading `#` is a shell comment, not a heading.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean raw extraction output before it is sent for refinement.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip YAML front matter
/// 3. Strip HTML comments
/// 4. Strip structural HTML tags (div, span, script, …)
/// 5. Decode common HTML entities
/// 6. Trim trailing whitespace per line
/// 7. Insert the missing space in `#Heading`
/// 8. Put a blank line before images
/// 9. Renumber ordered lists flattened to `1.`
/// 10. Ensure a `# title` heading exists
/// 11. Collapse runs of blank lines
/// 12. Strip invisible Unicode
/// 13. End with exactly one newline
pub fn clean_extracted(input: &str, title: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_front_matter(&s);
    let s = strip_html_comments(&s);
    let s = strip_layout_tags(&s);
    let s = decode_entities(&s);
    let s = trim_trailing_whitespace(&s);
    let s = fix_heading_markers(&s);
    let s = space_before_images(&s);
    let s = renumber_ordered_lists(&s);
    let s = ensure_title(&s, title);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

/// Clean model output after refinement.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences (models sometimes disobey the prompt)
/// 2. Normalise line endings
/// 3. Trim trailing whitespace per line
/// 4. Ensure heading lines have a blank line before them
/// 5. Fix GFM tables missing a separator row
/// 6. Remove spurious mid-table separator rows
/// 7. Ensure a `# title` heading exists
/// 8. Collapse runs of blank lines
/// 9. Strip invisible Unicode
/// 10. End with exactly one newline
pub fn clean_refined(input: &str, title: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = normalise_heading_spacing(&s);
    let s = fix_broken_tables(&s);
    let s = remove_mid_table_separators(&s);
    let s = ensure_title(&s, title);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Fenced code detection ────────────────────────────────────────────────────

/// `true` for every line that is part of a fenced code block, fences included.
fn code_mask(lines: &[&str]) -> Vec<bool> {
    let mut in_code = false;
    lines
        .iter()
        .map(|line| {
            let t = line.trim_start();
            if t.starts_with("```") || t.starts_with("~~~") {
                in_code = !in_code;
                true
            } else {
                in_code
            }
        })
        .collect()
}

// ── Outer fences ─────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Line endings and whitespace ──────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Converter artefacts ──────────────────────────────────────────────────────

static RE_FRONT_MATTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\A---\n.*?\n---\n").unwrap());

fn strip_front_matter(input: &str) -> String {
    RE_FRONT_MATTER.replace(input, "").to_string()
}

static RE_HTML_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

fn strip_html_comments(input: &str) -> String {
    RE_HTML_COMMENT.replace_all(input, "").to_string()
}

// Only block/layout tags are removed; text such as `<Value>` in prose stays.
static RE_LAYOUT_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(?:div|span|html|body|head|script|style|iframe|link|meta)\b[^>]*>").unwrap()
});

fn strip_layout_tags(input: &str) -> String {
    RE_LAYOUT_TAGS.replace_all(input, "").to_string()
}

fn decode_entities(input: &str) -> String {
    // `&amp;` last so `&amp;lt;` decodes to the literal text `&lt;`.
    input
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

// ── Headings ─────────────────────────────────────────────────────────────────

static RE_HEADING_NO_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})([^#\s])").unwrap());

fn fix_heading_markers(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mask = code_mask(&lines);
    lines
        .iter()
        .zip(mask)
        .map(|(line, in_code)| {
            if in_code {
                line.to_string()
            } else {
                RE_HEADING_NO_SPACE.replace(line, "$1 $2").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

fn normalise_heading_spacing(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mask = code_mask(&lines);
    let mut result = String::with_capacity(input.len() + 64);
    for (i, (line, in_code)) in lines.iter().zip(mask).enumerate() {
        if !in_code && is_heading(line) && i > 0 {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

/// Prepend `# title` unless the first non-blank line already is an H1.
fn ensure_title(input: &str, title: &str) -> String {
    let first = input.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if first.starts_with("# ") || title.trim().is_empty() {
        input.to_string()
    } else {
        format!("# {}\n\n{}", title.trim(), input.trim_start_matches('\n'))
    }
}

// ── Images ───────────────────────────────────────────────────────────────────

fn space_before_images(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mask = code_mask(&lines);
    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 8);
    for (i, (line, in_code)) in lines.iter().zip(&mask).enumerate() {
        let prev_is_text = i > 0 && !lines[i - 1].trim().is_empty() && !mask[i - 1];
        if !in_code && line.trim_start().starts_with("![") && prev_is_text {
            out.push("");
        }
        out.push(line);
    }
    out.join("\n")
}

// ── Ordered lists ────────────────────────────────────────────────────────────

static RE_ORDERED_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\.\s(.*)$").unwrap());

/// Renumber top-level ordered lists the extractor emitted as `1. 1. 1.`.
///
/// A `1.` following an item of the same list becomes the next number; an
/// explicit number other than 1 is trusted and resyncs the counter. Blank
/// lines, images and indented continuation lines keep the list open;
/// headings and plain paragraphs close it.
fn renumber_ordered_lists(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mask = code_mask(&lines);
    let mut counter = 0u64;
    let mut out = Vec::with_capacity(lines.len());

    for (line, in_code) in lines.iter().zip(mask) {
        if in_code {
            out.push(line.to_string());
            continue;
        }
        if let Some(caps) = RE_ORDERED_ITEM.captures(line) {
            let n: u64 = caps[1].parse().unwrap_or(1);
            counter = if n == 1 { counter + 1 } else { n };
            out.push(format!("{}. {}", counter, &caps[2]));
            continue;
        }

        let keeps_list_open = line.trim().is_empty()
            || line.starts_with(' ')
            || line.starts_with('\t')
            || line.trim_start().starts_with("![");
        if !keeps_list_open {
            counter = 0;
        }
        out.push(line.to_string());
    }

    out.join("\n")
}

// ── Tables ───────────────────────────────────────────────────────────────────

/// Insert a separator row after a table's first row when it is missing.
fn fix_broken_tables(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut result = Vec::with_capacity(lines.len() + 10);
    let mut prev_is_row = false;

    for (i, line) in lines.iter().enumerate() {
        result.push(line.to_string());
        let starts_table = is_table_row(line) && !is_separator_row(line) && !prev_is_row;
        if starts_table {
            let next = lines.get(i + 1).copied().unwrap_or("");
            if is_table_row(next) && !is_separator_row(next) {
                let col_count = line.matches('|').count().saturating_sub(1).max(1);
                let sep: String = std::iter::once("|")
                    .chain(std::iter::repeat_n(" --- |", col_count))
                    .collect();
                result.push(sep);
            }
        }
        prev_is_row = is_table_row(line);
    }

    result.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') {
        return false;
    }
    trimmed
        .chars()
        .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

/// Keep only the separator in position 2 of each table.
fn remove_mid_table_separators(input: &str) -> String {
    let mut result: Vec<&str> = Vec::new();
    let mut table_line_count = 0usize;

    for line in input.lines() {
        if is_table_row(line) {
            table_line_count += 1;
            if is_separator_row(line) && table_line_count != 2 {
                continue;
            }
        } else {
            table_line_count = 0;
        }
        result.push(line);
    }

    result.join("\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────

//! Instructions sent to the refinement model.
//!
//! Callers can override the default via
//! [`crate::config::ConverterConfig::system_prompt`]; the constant here is
//! used only when no override is provided.

/// Default instruction for cleaning extracted Markdown for the wiki.
pub const DEFAULT_REFINEMENT_PROMPT: &str = r#"You are a technical editor. Rework this raw Markdown for an IT wiki (Docmost).

Follow these rules precisely:

1. CODE
   - Recognise shell commands, JSON or YAML configuration and scripts
   - Wrap them in ``` fences with a language identifier

2. INLINE TECH
   - Put file paths, IP addresses and host names in `backticks`

3. CLEANUP
   - Remove page numbers, repeated company headers and footers

4. STRUCTURE
   - Produce a clean heading hierarchy starting with #
   - Keep tables as GFM pipe tables

5. IMAGES
   - Keep every image placeholder ![...](image_xxx.png) EXACTLY at its semantic position
   - Do NOT change, rename or drop image paths

6. OUTPUT FORMAT
   - Output ONLY the corrected Markdown
   - Do NOT wrap the answer in ```markdown fences
   - No introduction, no comments"#;

/// Assemble the single-shot generate prompt from the instruction and raw Markdown.
pub fn refinement_prompt(instruction: &str, raw_markdown: &str) -> String {
    format!("{instruction}\n\nRaw data:\n{raw_markdown}")
}

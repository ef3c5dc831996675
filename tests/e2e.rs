//! End-to-end tests against live Docling and Ollama services.
//!
//! These tests use real documents in `./test_cases/` and call the services
//! configured through `DOCLING_SERVER_URL`, `OLLAMA_SERVER_URL` and
//! `OLLAMA_MODEL`. They are gated behind the `E2E_ENABLED` environment
//! variable so they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture

use docmost_convert::{check_services, convert_files, ConverterConfig, Stage};
use std::io::{Cursor, Read};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip this test if E2E_ENABLED is not set *or* no file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP — test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Assert the markdown passes basic quality checks.
fn assert_markdown_quality(md: &str, context: &str) {
    assert!(!md.trim().is_empty(), "[{context}] Markdown is empty");
    assert!(
        md.ends_with('\n'),
        "[{context}] Markdown must end with a newline"
    );

    let first_line = md.lines().next().unwrap_or("");
    assert!(
        !first_line.starts_with("```"),
        "[{context}] Output must not start with a code fence, got: {first_line:?}"
    );
    assert!(
        !md.contains("\n\n\n"),
        "[{context}] Output has runs of blank lines"
    );
    assert!(
        !md.contains("data:image/"),
        "[{context}] Output still embeds base64 images"
    );
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_services_are_reachable() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let config = ConverterConfig::from_env().unwrap();
    let health = check_services(&config).await.unwrap();
    assert!(health.docling, "Docling not reachable at {}", config.docling_url);
    assert!(health.ollama, "Ollama not reachable at {}", config.ollama_url);
}

#[tokio::test]
async fn test_convert_sample_pdf() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.pdf"));
    let config = ConverterConfig::from_env().unwrap();

    let inputs = [path.to_string_lossy().to_string()];
    let output = convert_files(&inputs, &config).await.unwrap();

    let doc = &output.report.documents[0];
    assert_eq!(doc.stage(), Stage::Ready, "failed: {:?}", doc.error());
    let entry = doc.entry().unwrap();
    assert_markdown_quality(&entry.markdown, "sample.pdf");

    // Every bundled image must be reachable from the page.
    for image in &entry.images {
        let rel = image.path.trim_start_matches("Import/");
        assert!(
            entry.markdown.contains(rel),
            "image {} is not linked from the page",
            image.path
        );
    }

    let mut zip = zip::ZipArchive::new(Cursor::new(output.archive.bytes())).unwrap();
    let mut index = String::new();
    zip.by_name("Import.md")
        .unwrap()
        .read_to_string(&mut index)
        .unwrap();
    assert!(index.contains("(Import/sample.md)"));
}

#[tokio::test]
async fn test_convert_without_refinement() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.docx"));
    let config = ConverterConfig::builder()
        .docling_url(
            std::env::var("DOCLING_SERVER_URL").unwrap_or_else(|_| "http://localhost:5001".into()),
        )
        .refine(false)
        .build()
        .unwrap();

    let inputs = [path.to_string_lossy().to_string()];
    let output = convert_files(&inputs, &config).await.unwrap();
    let doc = &output.report.documents[0];
    assert_eq!(doc.stage(), Stage::Ready, "failed: {:?}", doc.error());
    assert!(doc.warnings.is_empty());
}

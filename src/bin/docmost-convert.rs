//! CLI binary for docmost-convert.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConverterConfig`, runs one batch and writes the ZIP.

use anyhow::{Context, Result};
use clap::Parser;
use docmost_convert::pipeline::input::load_documents;
use docmost_convert::{
    check_services, write_archive, BatchProgressCallback, BatchStats, CancellationToken, Converter,
    ConverterConfig, ProgressCallback, RefinementFallback, ReportSummary, SkippedDocuments, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch plus a log line per
/// finished document.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the document currently in flight.
    started: Mutex<Option<Instant>>,
    warned: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} documents  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(SPINNER),
        );
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(None),
            warned: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self) -> String {
        let secs = self
            .started
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total} document(s)…"))
        ));
    }

    fn on_document_start(&self, _index: usize, _total: usize, filename: &str) {
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(filename.to_string());
    }

    fn on_stage(&self, _index: usize, filename: &str, stage: Stage) {
        if matches!(stage, Stage::Extracting | Stage::Refining | Stage::Relinking) {
            self.bar.set_message(format!("{filename}: {stage}"));
        }
    }

    fn on_document_ready(&self, index: usize, total: usize, filename: &str, warnings: usize) {
        let mark = if warnings > 0 {
            self.warned.fetch_add(1, Ordering::SeqCst);
            cyan("⚠")
        } else {
            green("✓")
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {}  {}",
            mark,
            index + 1,
            total,
            filename,
            self.elapsed()
        ));
        self.bar.inc(1);
    }

    fn on_document_failed(&self, index: usize, total: usize, _filename: &str, error: &str) {
        let msg: String = if error.chars().count() > 100 {
            format!("{}\u{2026}", error.chars().take(99).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            self.elapsed()
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, ready: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(ready);
        let warned = self.warned.load(Ordering::SeqCst);
        eprintln!(
            "{} {}/{} documents ready  ({} with warnings, {} skipped)",
            if failed == 0 && warned == 0 {
                green("✔")
            } else if ready == 0 && total > 0 {
                red("✘")
            } else {
                cyan("⚠")
            },
            bold(&ready.to_string()),
            total,
            warned,
            failed,
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a few files into Import.zip
  docmost-convert report.pdf sheet.xlsx manual.docx

  # Choose the archive name and model
  docmost-convert -o wiki.zip --model mistral *.pdf

  # Skip the LLM pass entirely
  docmost-convert --no-refine scans/*.pdf

  # Fail documents whose refinement fails instead of keeping raw Markdown
  docmost-convert --on-refine-error fail --list-skipped *.docx

  # Check that Docling and Ollama are reachable
  docmost-convert --check

  # Machine-readable report
  docmost-convert --json *.pdf > report.json

ENVIRONMENT VARIABLES:
  DOCLING_SERVER_URL   Docling base URL (default http://docling-server:5001)
  OLLAMA_SERVER_URL    Ollama base URL (default http://ollama:11434)
  OLLAMA_MODEL         Model used for refinement (default llama3)
  RUST_LOG             Log filter, e.g. docmost_convert=debug
"#;

/// Convert PDF, DOCX and XLSX files into a Docmost import ZIP.
#[derive(Parser, Debug)]
#[command(
    name = "docmost-convert",
    version,
    about = "Convert PDF, DOCX and XLSX files into a Docmost-importable Markdown ZIP",
    long_about = "Extract each document with Docling, refine the Markdown with an Ollama model, \
bundle the extracted images and write one ZIP with an index page that Docmost can import.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local files or HTTP/HTTPS URLs (.pdf, .docx, .xlsx), in archive order.
    #[arg(required_unless_present = "check")]
    inputs: Vec<String>,

    /// Where to write the ZIP.
    #[arg(short, long, env = "DOCMOST_CONVERT_OUTPUT", default_value = "Import.zip")]
    output: PathBuf,

    /// Docling base URL.
    #[arg(long, env = "DOCLING_SERVER_URL", default_value = "http://docling-server:5001")]
    docling_url: String,

    /// Ollama base URL.
    #[arg(long, env = "OLLAMA_SERVER_URL", default_value = "http://ollama:11434")]
    ollama_url: String,

    /// Ollama model used for refinement.
    #[arg(long, env = "OLLAMA_MODEL", default_value = "llama3")]
    model: String,

    /// Skip the refinement pass and archive Docling's Markdown as-is.
    #[arg(long, env = "DOCMOST_CONVERT_NO_REFINE")]
    no_refine: bool,

    /// What to do when refinement fails: keep raw Markdown or fail the document.
    #[arg(long, env = "DOCMOST_CONVERT_ON_REFINE_ERROR", value_enum, default_value = "raw")]
    on_refine_error: FallbackArg,

    /// List failed documents in a "Skipped" section of the index page.
    #[arg(long, env = "DOCMOST_CONVERT_LIST_SKIPPED")]
    list_skipped: bool,

    /// Title of the index page and name of the folder holding the pages.
    #[arg(long, env = "DOCMOST_CONVERT_INDEX_TITLE", default_value = "Import")]
    index_title: String,

    /// Path to a text file containing a custom refinement instruction.
    #[arg(long, env = "DOCMOST_CONVERT_PROMPT")]
    prompt: Option<PathBuf>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOCMOST_CONVERT_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Model context window in tokens.
    #[arg(long, env = "DOCMOST_CONVERT_NUM_CTX", default_value_t = 8192)]
    num_ctx: u32,

    /// Disable OCR in Docling.
    #[arg(long)]
    no_ocr: bool,

    /// Docling OCR engine.
    #[arg(long, env = "DOCMOST_CONVERT_OCR_ENGINE", default_value = "easyocr")]
    ocr_engine: String,

    /// Disable the deterministic Markdown cleanup passes.
    #[arg(long)]
    no_cleanup: bool,

    /// Retries per service call on transient failure.
    #[arg(long, env = "DOCMOST_CONVERT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Base backoff between retries, doubled on each attempt.
    #[arg(long, env = "DOCMOST_CONVERT_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Docling request timeout in seconds.
    #[arg(long, env = "DOCMOST_CONVERT_EXTRACT_TIMEOUT", default_value_t = 300)]
    extract_timeout: u64,

    /// Ollama request timeout in seconds.
    #[arg(long, env = "DOCMOST_CONVERT_REFINE_TIMEOUT", default_value_t = 120)]
    refine_timeout: u64,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, env = "DOCMOST_CONVERT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Probe Docling and Ollama, then exit.
    #[arg(long)]
    check: bool,

    /// Print the batch report as JSON on stdout.
    #[arg(long, env = "DOCMOST_CONVERT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCMOST_CONVERT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCMOST_CONVERT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCMOST_CONVERT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FallbackArg {
    /// Keep the unrefined Markdown and record a warning.
    Raw,
    /// Mark the document as failed.
    Fail,
}

impl From<FallbackArg> for RefinementFallback {
    fn from(v: FallbackArg) -> Self {
        match v {
            FallbackArg::Raw => RefinementFallback::UseRaw,
            FallbackArg::Fail => RefinementFallback::FailDocument,
        }
    }
}

/// Shape of `--json` output.
#[derive(Serialize)]
struct JsonReport<'a> {
    archive: String,
    files: &'a [String],
    stats: &'a BatchStats,
    #[serde(flatten)]
    report: ReportSummary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.check;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Service check mode ───────────────────────────────────────────────
    if cli.check {
        let health = check_services(&config)
            .await
            .context("Failed to set up service clients")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&health).context("Failed to serialise health")?
            );
        } else {
            let mark = |up: bool| if up { green("up") } else { red("down") };
            println!("Docling  {}  {}", mark(health.docling), dim(&config.docling_url));
            println!("Ollama   {}  {}", mark(health.ollama), dim(&config.ollama_url));
        }
        if !health.ready_for(&config) {
            anyhow::bail!("Required services are not reachable");
        }
        return Ok(());
    }

    // ── Load inputs ──────────────────────────────────────────────────────
    let documents = load_documents(&cli.inputs, config.download_timeout_secs)
        .await
        .context("Failed to load input")?;

    // ── Run batch ────────────────────────────────────────────────────────
    // Ctrl-C stops the batch after the document in flight; the archive is
    // still written with whatever finished.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Cancelling after the current document…", cyan("⚠"));
            on_signal.cancel();
        }
    });

    let converter = Converter::new(config).context("Failed to set up service clients")?;
    let output = converter
        .run_with_cancel(documents, &cancel)
        .await
        .context("Conversion failed")?;

    write_archive(&output.archive, &cli.output).context("Failed to write archive")?;

    if cli.json {
        let json = JsonReport {
            archive: cli.output.display().to_string(),
            files: output.archive.files(),
            stats: &output.stats,
            report: output.report.summary(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        if !show_progress {
            for doc in &output.report.documents {
                match doc.error() {
                    None => eprintln!("  {} {}", green("✓"), doc.filename),
                    Some(e) => eprintln!("  {} {}", red("✗"), e),
                }
                for warning in &doc.warnings {
                    eprintln!("      {}", dim(warning));
                }
            }
        }
        eprintln!(
            "{}  {}/{} documents  {} images  {}ms  →  {}",
            if output.stats.failed_documents == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            output.stats.ready_documents,
            output.stats.total_documents,
            output.stats.total_images,
            output.stats.total_duration_ms,
            bold(&cli.output.display().to_string()),
        );
    }

    if output.stats.total_documents > 0 && output.stats.ready_documents == 0 {
        anyhow::bail!("No document could be converted");
    }

    Ok(())
}

/// Map CLI args to `ConverterConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConverterConfig> {
    let mut builder = ConverterConfig::builder()
        .docling_url(&cli.docling_url)
        .ollama_url(&cli.ollama_url)
        .model(&cli.model)
        .refine(!cli.no_refine)
        .refinement_fallback(cli.on_refine_error.clone().into())
        .skipped_documents(if cli.list_skipped {
            SkippedDocuments::List
        } else {
            SkippedDocuments::Omit
        })
        .index_title(&cli.index_title)
        .temperature(cli.temperature)
        .context_window(cli.num_ctx)
        .do_ocr(!cli.no_ocr)
        .ocr_engine(&cli.ocr_engine)
        .clean_markdown(!cli.no_cleanup)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .extraction_timeout_secs(cli.extract_timeout)
        .refinement_timeout_secs(cli.refine_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

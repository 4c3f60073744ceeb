//! CLI binary for paperless-ocr.
//!
//! A thin shim over the library crate that maps CLI flags (with environment
//! fallbacks) to `PipelineConfig` and `RunOptions`, shows progress and
//! prints the run summary.

mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paperless_ocr::{
    BackendKind, DocumentId, Pipeline, PipelineConfig, ProgressCallback, RunOptions,
    RunProgressCallback, RunSummary, Selection, StatusSnapshot, TagId,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar with one log line per finished document.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Discovering");
        bar.set_message("Contacting Paperless…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn update(&self, status: StatusSnapshot) {
        self.bar.set_position(status.completed);
        self.bar.set_message(if status.failed == 0 {
            String::new()
        } else {
            red(&format!("{} failed", status.failed))
        });
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total: u64) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} documents  {msg}  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total);
        self.bar.set_style(style);
        self.bar.set_prefix("OCR");
        self.bar.set_message("");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total} documents to process"))
        ));
    }

    fn on_document_skipped(&self, id: DocumentId, status: StatusSnapshot) {
        self.bar
            .println(format!("  {} {:>6}  {}", dim("-"), id, dim("already done")));
        self.update(status);
    }

    fn on_document_complete(&self, id: DocumentId, title: &str, status: StatusSnapshot) {
        self.bar
            .println(format!("  {} {:>6}  {}", green("✓"), id, title));
        self.update(status);
    }

    fn on_document_error(&self, id: DocumentId, title: &str, error: &str, status: StatusSnapshot) {
        let msg: String = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:>6}  {}  {}", red("✗"), id, title, red(&msg)));
        self.update(status);
    }

    fn on_run_complete(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process every document not yet tagged DONE
  paperless-ocr --paperless-url http://paperless:8000 --paperless-token $TOKEN

  # One document, even if it was processed before
  paperless-ocr --document-id 1234 --force

  # Only documents carrying tag 42, with two workers
  paperless-ocr --subgroup-tag 42 --workers 2

  # Retry everything listed in the dead-letter log
  paperless-ocr --retry-failed

  # Whole-document conversion via docling-serve
  paperless-ocr --backend conversion --backend-url http://localhost:5001

ENVIRONMENT VARIABLES:
  Every option can be set through the variable shown in --help.
  RUST_LOG                Override the terminal log filter
  PDFIUM_LIB_PATH         Path to libpdfium instead of the system library

FILES:
  ./ocr_cache/<id>/       page images kept until a document succeeds
  ./failed_documents.txt  ids of failed documents, one per line
"#;

/// Re-OCR documents in a Paperless-ngx instance.
#[derive(Parser, Debug)]
#[command(
    name = "paperless-ocr",
    version,
    about = "Re-OCR documents in a Paperless-ngx instance with a vision model or docling",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    // ── Selection ──────────────────────────────────────────────────────────
    /// Process only this document.
    #[arg(long, conflicts_with_all = ["subgroup_tag", "retry_failed"])]
    document_id: Option<DocumentId>,

    /// Process only documents carrying this tag.
    #[arg(long, conflicts_with = "retry_failed")]
    subgroup_tag: Option<TagId>,

    /// Retry the documents listed in the dead-letter log.
    #[arg(long)]
    retry_failed: bool,

    /// Reprocess documents already tagged DONE.
    #[arg(long)]
    force: bool,

    // ── Document store ─────────────────────────────────────────────────────
    /// Paperless base URL.
    #[arg(long, env = "PAPERLESS_URL")]
    paperless_url: String,

    /// Paperless API token.
    #[arg(long, env = "PAPERLESS_TOKEN", hide_env_values = true)]
    paperless_token: String,

    /// Paperless request timeout in seconds.
    #[arg(long, env = "PAPERLESS_TIMEOUT", default_value_t = 120)]
    paperless_timeout: u64,

    /// Tag id marking processed documents.
    #[arg(long, env = "PAPERLESS_DONE_TAG", default_value_t = 1065)]
    done_tag: TagId,

    /// Tag id marking failed documents.
    #[arg(long, env = "PAPERLESS_FAILED_TAG", default_value_t = 1066)]
    failed_tag: TagId,

    // ── OCR backend ────────────────────────────────────────────────────────
    /// OCR backend: vision (per page) or conversion (per document).
    #[arg(long, env = "OCR_BACKEND", value_enum, default_value = "vision")]
    backend: BackendArg,

    /// Backend endpoint. Default: Ollama generate URL, or http://localhost:5001
    /// for the conversion backend.
    #[arg(long, env = "OCR_BACKEND_URL")]
    backend_url: Option<String>,

    /// Vision model.
    #[arg(long, env = "OCR_MODEL", default_value = "minicpm-v:latest")]
    model: String,

    /// Prompt sent with each page image.
    #[arg(long, env = "OCR_PROMPT")]
    prompt: Option<String>,

    /// Read the prompt from this file.
    #[arg(long, env = "OCR_PROMPT_FILE", conflicts_with = "prompt")]
    prompt_file: Option<PathBuf>,

    /// OCR engine requested from the conversion service.
    #[arg(long, env = "OCR_ENGINE", default_value = "easyocr")]
    ocr_engine: String,

    /// OCR languages for the conversion service, comma separated.
    #[arg(long, env = "OCR_LANGUAGES", value_delimiter = ',', default_value = "de,en")]
    languages: Vec<String>,

    /// Per-call backend timeout in seconds.
    #[arg(long, env = "OCR_TIMEOUT", default_value_t = 300)]
    backend_timeout: u64,

    /// Retries after a timeout or connection failure.
    #[arg(long, env = "OCR_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Base retry delay in milliseconds; the n-th retry waits n times this.
    #[arg(long, env = "OCR_RETRY_BACKOFF_MS", default_value_t = 2000)]
    retry_backoff_ms: u64,

    // ── Pipeline ───────────────────────────────────────────────────────────
    /// Concurrent workers.
    #[arg(short, long, env = "OCR_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Documents buffered between discovery and the workers.
    #[arg(long, env = "OCR_BUFFER_SIZE", default_value_t = 5)]
    buffer_size: usize,

    /// Pages rasterised per document.
    #[arg(long, env = "OCR_PAGE_LIMIT", default_value_t = 3)]
    page_limit: usize,

    /// Path to libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    // ── Local state ────────────────────────────────────────────────────────
    /// Page cache directory.
    #[arg(long, env = "OCR_CACHE_DIR", default_value = "./ocr_cache")]
    cache_dir: PathBuf,

    /// Dead-letter log of failed document ids.
    #[arg(long, env = "OCR_FAILED_LOG", default_value = "./failed_documents.txt")]
    failed_log: PathBuf,

    /// Also log to this file, rotated by size.
    #[arg(long, env = "OCR_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Rotate the log file at this size in bytes.
    #[arg(long, env = "OCR_LOG_MAX_BYTES", default_value_t = 5 * 1024 * 1024)]
    log_max_bytes: u64,

    /// Rotated log files to keep.
    #[arg(long, env = "OCR_LOG_BACKUPS", default_value_t = 3)]
    log_backups: usize,

    // ── Output ─────────────────────────────────────────────────────────────
    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "OCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCR_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Vision,
    Conversion,
}

impl From<BackendArg> for BackendKind {
    fn from(v: BackendArg) -> Self {
        match v {
            BackendArg::Vision => BackendKind::Vision,
            BackendArg::Conversion => BackendKind::Conversion,
        }
    }
}

const DEFAULT_CONVERSION_URL: &str = "http://localhost:5001";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli).await?;
    let options = run_options(&cli)?;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO lines on the terminal; the log file
    // still gets them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let stderr_level = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let file_level = if cli.verbose { "debug" } else { "info" };
    let log_file = logging::LogFileSettings::from_config(&config);
    logging::init(stderr_level, file_level, log_file.as_ref())
        .context("Failed to open log file")?;

    let mut pipeline = Pipeline::from_config(config).context("Failed to set up pipeline")?;
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        pipeline = pipeline.with_progress(cb);
    }

    let summary = pipeline.run(options).await.context("OCR run failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        print_summary(&summary, &cli.failed_log);
    }

    Ok(())
}

fn print_summary(summary: &RunSummary, failed_log: &std::path::Path) {
    let status = summary.status;
    if status.failed == 0 {
        eprintln!(
            "{} {}/{} documents processed  {}",
            green("✔"),
            bold(&status.completed.to_string()),
            status.total_to_process,
            dim(&format!("{}ms", summary.duration_ms)),
        );
    } else {
        eprintln!(
            "{} {}/{} documents processed  ({} failed, see {})  {}",
            if status.failed == status.completed {
                red("✘")
            } else {
                cyan("⚠")
            },
            bold(&status.completed.to_string()),
            status.total_to_process,
            red(&status.failed.to_string()),
            failed_log.display(),
            dim(&format!("{}ms", summary.duration_ms)),
        );
    }
}

/// Map the selection flags to `RunOptions`.
fn run_options(cli: &Cli) -> Result<RunOptions> {
    let selection = match (cli.document_id, cli.subgroup_tag, cli.retry_failed) {
        (Some(id), None, false) => Selection::Single(id),
        (None, Some(tag), false) => Selection::Subgroup(tag),
        (None, None, true) => Selection::Retry,
        (None, None, false) => Selection::Bulk,
        _ => bail!("--document-id, --subgroup-tag and --retry-failed are mutually exclusive"),
    };
    Ok(RunOptions {
        selection,
        force: cli.force,
    })
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let prompt = match (&cli.prompt, &cli.prompt_file) {
        (Some(prompt), _) => Some(prompt.clone()),
        (None, Some(path)) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?,
        ),
        (None, None) => None,
    };

    let backend: BackendKind = cli.backend.into();
    let backend_url = match (&cli.backend_url, backend) {
        (Some(url), _) => url.clone(),
        (None, BackendKind::Conversion) => DEFAULT_CONVERSION_URL.to_string(),
        (None, BackendKind::Vision) => PipelineConfig::default().backend_url,
    };

    let mut builder = PipelineConfig::builder()
        .store_url(&cli.paperless_url)
        .store_token(&cli.paperless_token)
        .store_timeout_secs(cli.paperless_timeout)
        .backend(backend)
        .backend_url(backend_url)
        .model(&cli.model)
        .ocr_engine(&cli.ocr_engine)
        .languages(cli.languages.iter().map(|l| l.trim().to_string()))
        .backend_timeout_secs(cli.backend_timeout)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .done_tag(cli.done_tag)
        .failed_tag(cli.failed_tag)
        .buffer_size(cli.buffer_size)
        .page_limit(cli.page_limit)
        .workers(cli.workers)
        .cache_dir(&cli.cache_dir)
        .dead_letter_path(&cli.failed_log)
        .log_max_bytes(cli.log_max_bytes)
        .log_backups(cli.log_backups);

    if let Some(prompt) = prompt {
        builder = builder.prompt(prompt);
    }
    if let Some(path) = &cli.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }
    if let Some(path) = &cli.log_file {
        builder = builder.log_file(path);
    }

    builder.build().context("Invalid configuration")
}

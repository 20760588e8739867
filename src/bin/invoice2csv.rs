//! CLI binary for edgequake-invoice.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, optionally wraps the batch in credit accounting, and
//! prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_invoice::accounting::{release_credits, reserve_credits, settle_credits};
use edgequake_invoice::{
    process_paths_to_file, AcquisitionPolicy, BatchProgressCallback, DateOrder, FailurePolicy,
    FileLedger, InvoiceError, MissingFieldPolicy, OcrBackend, PipelineConfig, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per document. Documents may finish
/// out of order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    ocr_docs: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} invoices  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Normalizing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            ocr_docs: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Normalizing {total} invoices…"))
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, file_name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(file_name.to_string());
    }

    fn on_ocr_fallback(&self, _index: usize, file_name: &str) {
        self.ocr_docs.fetch_add(1, Ordering::SeqCst);
        self.bar.set_message(format!("{file_name} (OCR)"));
    }

    fn on_document_complete(&self, index: usize, total: usize, file_name: &str) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            index + 1,
            total,
            file_name,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, file_name: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            red("✗"),
            index + 1,
            total,
            file_name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total: usize, _succeeded: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Normalize a folder of invoices
  invoice2csv invoices/*.pdf

  # Custom output path, US-style dates
  invoice2csv --date-order mdy -o q3.csv invoices/*.pdf

  # Excel workbook instead of CSV
  invoice2csv -o outputs/invoice_normalized.xlsx invoices/*.pdf

  # Keep a blank row for every invoice that failed
  invoice2csv --on-failure placeholder invoices/*.pdf

  # Scans without tesseract: let a vision model read the pages
  invoice2csv --ocr vision --model gpt-4.1 scans/*.pdf

  # Charge one credit per invoice, refund failures
  invoice2csv --ledger credits.json --user ana invoices/*.pdf

  # Machine-readable report
  invoice2csv --json invoices/*.pdf > report.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Log filter, e.g. edgequake_invoice=debug

SETUP:
  1. Install pdfium (https://github.com/bblanchon/pdfium-binaries) and
     tesseract with the languages you need (default: eng+spa).
  2. export OPENAI_API_KEY=sk-...
  3. invoice2csv invoices/*.pdf
"#;

/// Normalize invoice PDFs into a Supplier/Date/Total/VAT table.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2csv",
    version,
    about = "Normalize invoice PDFs into a Supplier/Date/Total/VAT table",
    long_about = "Read digital or scanned invoice PDFs, recover Supplier, Date, Total and VAT \
with OCR, pattern matching and a language model, and write one row per invoice (CSV or .xlsx).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Invoice PDF files, in the order rows should appear.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output table path; a `.xlsx` extension writes an Excel workbook, anything else CSV.
    #[arg(
        short,
        long,
        env = "INVOICE2CSV_OUTPUT",
        default_value = "outputs/invoice_normalized.csv"
    )]
    output: PathBuf,

    /// LLM model ID (default: gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// OpenAI API key (overrides OPENAI_API_KEY).
    #[arg(long, env = "INVOICE2CSV_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Number of invoices processed at once.
    #[arg(short, long, env = "INVOICE2CSV_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Rendering DPI for OCR (72–600).
    #[arg(long, env = "INVOICE2CSV_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// OCR engine for pages without a text layer.
    #[arg(long, env = "INVOICE2CSV_OCR", value_enum, default_value = "tesseract")]
    ocr: OcrArg,

    /// Path to the tesseract binary.
    #[arg(long, env = "INVOICE2CSV_TESSERACT", default_value = "tesseract")]
    tesseract_path: String,

    /// Tesseract language packs, e.g. eng or eng+spa.
    #[arg(long, env = "INVOICE2CSV_OCR_LANG", default_value = "eng+spa")]
    ocr_lang: String,

    /// What to do with an invoice that fails.
    #[arg(long, env = "INVOICE2CSV_ON_FAILURE", value_enum, default_value = "skip")]
    on_failure: FailureArg,

    /// What to do when the model omits a field.
    #[arg(long, env = "INVOICE2CSV_MISSING_FIELDS", value_enum, default_value = "substitute")]
    missing_fields: MissingArg,

    /// How to read ambiguous numeric dates like 03/04/2024.
    #[arg(long, env = "INVOICE2CSV_DATE_ORDER", value_enum, default_value = "dmy")]
    date_order: DateOrderArg,

    /// Fail an invoice on any text-acquisition error instead of continuing with partial text.
    #[arg(long, env = "INVOICE2CSV_STRICT_ACQUISITION")]
    strict_acquisition: bool,

    /// Retries per invoice on transient LLM failure (0–10).
    #[arg(long, env = "INVOICE2CSV_MAX_RETRIES", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(0..=10))]
    max_retries: u32,

    /// Per-request LLM timeout in seconds.
    #[arg(long, env = "INVOICE2CSV_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Per-page OCR timeout in seconds.
    #[arg(long, env = "INVOICE2CSV_OCR_TIMEOUT", default_value_t = 90)]
    ocr_timeout: u64,

    /// JSON credit ledger; requires --user.
    #[arg(long, env = "INVOICE2CSV_LEDGER", requires = "user")]
    ledger: Option<PathBuf>,

    /// User to charge in the credit ledger.
    #[arg(long, env = "INVOICE2CSV_USER", requires = "ledger")]
    user: Option<String>,

    /// Print the batch report as JSON on stdout.
    #[arg(long, env = "INVOICE2CSV_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "INVOICE2CSV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INVOICE2CSV_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OcrArg {
    Tesseract,
    Vision,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FailureArg {
    Skip,
    Placeholder,
    Abort,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MissingArg {
    Substitute,
    Reject,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DateOrderArg {
    Dmy,
    Mdy,
}

impl From<OcrArg> for OcrBackend {
    fn from(v: OcrArg) -> Self {
        match v {
            OcrArg::Tesseract => OcrBackend::Tesseract,
            OcrArg::Vision => OcrBackend::Vision,
        }
    }
}

impl From<FailureArg> for FailurePolicy {
    fn from(v: FailureArg) -> Self {
        match v {
            FailureArg::Skip => FailurePolicy::Skip,
            FailureArg::Placeholder => FailurePolicy::Placeholder,
            FailureArg::Abort => FailurePolicy::Abort,
        }
    }
}

impl From<MissingArg> for MissingFieldPolicy {
    fn from(v: MissingArg) -> Self {
        match v {
            MissingArg::Substitute => MissingFieldPolicy::Substitute,
            MissingArg::Reject => MissingFieldPolicy::Reject,
        }
    }
}

impl From<DateOrderArg> for DateOrder {
    fn from(v: DateOrderArg) -> Self {
        match v {
            DateOrderArg::Dmy => DateOrder::DayFirst,
            DateOrderArg::Mdy => DateOrder::MonthFirst,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Reserve credits ──────────────────────────────────────────────────
    let ledger = cli.ledger.as_ref().map(FileLedger::open);
    let user = cli.user.as_deref().unwrap_or_default();
    let reservation = match ledger {
        Some(ref l) => Some(
            reserve_credits(l, user, cli.inputs.len())
                .with_context(|| format!("Cannot reserve credits for '{user}'"))?,
        ),
        None => None,
    };

    // ── Run batch ────────────────────────────────────────────────────────
    let outcome = process_paths_to_file(cli.inputs.as_slice(), &cli.output, &config).await;

    // ── Settle credits ───────────────────────────────────────────────────
    let settlement = match (&ledger, reservation, &outcome) {
        (Some(l), Some(r), Ok(artifact)) => Some(
            settle_credits(l, user, r, &artifact.stats).context("Failed to settle credits")?,
        ),
        (Some(l), Some(r), Err(_)) => {
            release_credits(l, user, r).context("Failed to release reserved credits")?;
            None
        }
        _ => None,
    };

    if cli.json {
        if let Err(InvoiceError::AllDocumentsFailed { total, failures }) = &outcome {
            let report = serde_json::json!({
                "error": "all_documents_failed",
                "total_documents": total,
                "failures": failures,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        }
    }

    let artifact = outcome.context("Normalization failed")?;

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&artifact).context("Failed to serialise report")?
        );
        return Ok(());
    }

    if !cli.quiet {
        let stats = &artifact.stats;
        eprintln!(
            "{}  {}/{} invoices  {}ms  →  {}",
            if stats.failed == 0 { green("✔") } else { yellow("⚠") },
            stats.succeeded,
            stats.total_documents,
            stats.total_duration_ms,
            bold(&artifact.path.display().to_string()),
        );
        eprintln!(
            "   {} via OCR  /  {} tokens in  /  {} tokens out",
            dim(&stats.ocr_documents.to_string()),
            dim(&stats.total_input_tokens.to_string()),
            dim(&stats.total_output_tokens.to_string()),
        );
        for failure in &artifact.failures {
            eprintln!(
                "   {} {}  {}",
                red("✗"),
                failure.file_name,
                dim(&failure.error.to_string())
            );
        }
        if let Some(s) = settlement {
            eprintln!(
                "   credits: {} charged, {} refunded, {} left",
                s.charged, s.refunded, s.balance
            );
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .ocr_backend(cli.ocr.into())
        .ocr_timeout_secs(cli.ocr_timeout)
        .failure_policy(cli.on_failure.into())
        .missing_field_policy(cli.missing_fields.into())
        .date_order(cli.date_order.into())
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout);

    if cli.strict_acquisition {
        builder = builder.acquisition_policy(AcquisitionPolicy::Strict);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;
    config.ocr.tesseract_path = cli.tesseract_path.clone();
    config.ocr.language = cli.ocr_lang.clone();

    tracing::debug!("{:?}", config);
    Ok(config)
}

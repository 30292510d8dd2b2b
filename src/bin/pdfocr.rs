//! CLI binary for pdfocr-stream.
//!
//! `pdfocr process` runs the pipeline on a local file with a terminal
//! progress bar; `pdfocr serve` starts the HTTP service.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdfocr_stream::pipeline::input::validate_local_pdf;
use pdfocr_stream::progress::MemoryStage;
use pdfocr_stream::{
    CancelFlag, Language, NoopProgress, PageFailurePolicy, Pipeline, PipelineConfig,
    PipelineError, ProcessJob, ProgressEvent, ProgressSink, ServerConfig,
};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── Terminal progress sink ───────────────────────────────────────────────────

/// Renders pipeline events as a progress bar plus one log line per page.
struct BarProgress {
    bar: ProgressBar,
    page_started: Mutex<Option<Instant>>,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self {
            bar,
            page_started: Mutex::new(None),
        }
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
    }

    fn page_elapsed(&self) -> f64 {
        self.page_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ProgressSink for BarProgress {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::PageCount { pages } => {
                self.activate_bar(pages);
                self.bar.println(format!(
                    "{} {}",
                    cyan("◆"),
                    bold(&format!("Processing {pages} page(s)…"))
                ));
            }
            ProgressEvent::FontFallback { reason } => {
                let note = dim(&format!("Courier fallback: {reason}"));
                self.bar.println(format!("  {} {note}", cyan("⚠")));
            }
            ProgressEvent::PageStarted { page } => {
                if let Ok(mut t) = self.page_started.lock() {
                    *t = Some(Instant::now());
                }
                self.bar.set_message(format!("page {page}"));
            }
            ProgressEvent::PageExtracted { page, chars } => {
                self.bar.println(format!(
                    "  {} Page {:>3}  {:<8}  {}",
                    green("✓"),
                    page,
                    dim(&format!("{chars:>5} chars")),
                    dim(&format!("{:.1}s", self.page_elapsed())),
                ));
            }
            ProgressEvent::PageFailed { page, error } => {
                let msg = if error.chars().count() > 80 {
                    format!("{}\u{2026}", error.chars().take(79).collect::<String>())
                } else {
                    error
                };
                self.bar.println(format!(
                    "  {} Page {:>3}  {}  {}",
                    red("✗"),
                    page,
                    red(&msg),
                    dim(&format!("{:.1}s", self.page_elapsed())),
                ));
            }
            ProgressEvent::GlyphsMissing { page, count } => {
                self.bar.println(format!(
                    "  {} Page {:>3}  {}",
                    cyan("⚠"),
                    page,
                    dim(&format!("{count} char(s) without glyphs, written as '?'")),
                ));
            }
            ProgressEvent::PageSaved { .. } => self.bar.inc(1),
            ProgressEvent::Merging => {
                self.bar.set_prefix("Merging");
                self.bar.set_message("combining pages…");
            }
            ProgressEvent::Memory {
                stage: MemoryStage::Final,
                ..
            } => {
                self.bar.println(format!("  {}", dim(&event.to_string())));
            }
            ProgressEvent::Done | ProgressEvent::Failed { .. } | ProgressEvent::Cancelled => {
                self.bar.finish_and_clear();
            }
            _ => {}
        }
    }
}

/// Prints every event as its wire message, one per line.
struct LineProgress;

impl ProgressSink for LineProgress {
    fn emit(&self, event: ProgressEvent) {
        eprintln!("{}", pdfocr_stream::stream::wire_message(&event));
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR an English scan with the local engine
  pdfocr process scan.pdf -o scan_text.pdf

  # Hindi / Sanskrit go through the cloud Vision service
  GOOGLE_VISION_API_KEY=... pdfocr process granth.pdf --lang sanskrit -o granth_text.pdf

  # Keep going when a page fails
  pdfocr process scan.pdf --on-page-error skip-page

  # Start the web service on port 8080
  pdfocr serve --bind 0.0.0.0:8080

ENVIRONMENT VARIABLES:
  GOOGLE_VISION_API_KEY   Key for the cloud OCR backend (Hindi, Sanskrit)
  PDFIUM_LIB_PATH         Directory containing libpdfium
  PDFOCR_MODEL_DIR        Directory with the ocrs detection/recognition models
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Page-wise OCR of scanned PDFs into a text PDF.
#[derive(Parser, Debug)]
#[command(
    name = "pdfocr",
    version,
    about = "Page-wise OCR of scanned PDFs into a text PDF",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFOCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFOCR_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// OCR a local PDF into a combined text PDF.
    Process(ProcessArgs),
    /// Run the HTTP service.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Rendering DPI (72–400).
    #[arg(long, env = "PDFOCR_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// URL of the TTF font used for English page text.
    #[arg(long, env = "PDFOCR_FONT_URL")]
    font_url: Option<String>,

    /// Where the fetched English font is cached.
    #[arg(long, env = "PDFOCR_FONT_PATH")]
    font_path: Option<PathBuf>,

    /// URL of the TTF font used for Hindi and Sanskrit page text.
    #[arg(long, env = "PDFOCR_DEVANAGARI_FONT_URL")]
    devanagari_font_url: Option<String>,

    /// Where the fetched Devanagari font is cached.
    #[arg(long, env = "PDFOCR_DEVANAGARI_FONT_PATH")]
    devanagari_font_path: Option<PathBuf>,

    /// What to do when a single page fails: fail-fast or skip-page.
    #[arg(long, env = "PDFOCR_ON_PAGE_ERROR", default_value = "fail-fast")]
    on_page_error: String,

    /// API key of the cloud OCR service.
    #[arg(long, env = "GOOGLE_VISION_API_KEY", hide_env_values = true)]
    vision_api_key: Option<String>,

    /// Override the cloud OCR endpoint.
    #[arg(long, env = "PDFOCR_VISION_ENDPOINT")]
    vision_endpoint: Option<String>,

    /// Per-request timeout of the cloud OCR service, in seconds.
    #[arg(long, env = "PDFOCR_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Retries per page on transient cloud OCR failures.
    #[arg(long, env = "PDFOCR_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Directory holding the ocrs model files.
    #[arg(long, env = "PDFOCR_MODEL_DIR")]
    model_dir: Option<PathBuf>,
}

impl PipelineArgs {
    fn to_config(&self) -> Result<PipelineConfig> {
        let policy: PageFailurePolicy = self.on_page_error.parse()?;
        let mut builder = PipelineConfig::builder()
            .dpi(self.dpi)
            .page_failure_policy(policy)
            .api_timeout_secs(self.api_timeout)
            .max_retries(self.max_retries);

        if let Some(ref url) = self.font_url {
            builder = builder.font_url(url);
        }
        if let Some(ref path) = self.font_path {
            builder = builder.font_path(path);
        }
        if let Some(ref url) = self.devanagari_font_url {
            builder = builder.devanagari_font_url(url);
        }
        if let Some(ref path) = self.devanagari_font_path {
            builder = builder.devanagari_font_path(path);
        }
        if let Some(ref key) = self.vision_api_key {
            builder = builder.vision_api_key(key);
        }
        if let Some(ref endpoint) = self.vision_endpoint {
            builder = builder.vision_endpoint(endpoint);
        }
        if let Some(ref dir) = self.model_dir {
            builder = builder.ocr_model_dir(dir);
        }
        builder.build().context("Invalid configuration")
    }
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// The scanned PDF.
    input: PathBuf,

    /// Language of the document: english, hindi or sanskrit.
    #[arg(short, long, env = "PDFOCR_LANG", default_value = "english")]
    lang: String,

    /// Where to write the combined text PDF.
    #[arg(short, long, env = "PDFOCR_OUTPUT", default_value = "combined_text.pdf")]
    output: PathBuf,

    /// Print each progress message on its own line instead of a progress bar.
    #[arg(long, env = "PDFOCR_NO_PROGRESS")]
    no_progress: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Socket address to listen on.
    #[arg(long, env = "PDFOCR_BIND", default_value = "0.0.0.0:3000")]
    bind: String,

    /// Directory for uploaded documents.
    #[arg(long, env = "PDFOCR_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Directory for page PDFs, the font and combined output.
    #[arg(long, env = "PDFOCR_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Maximum size of one uploaded file, in MiB.
    #[arg(long, env = "PDFOCR_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// Idle time before a session and its files are removed, in seconds.
    #[arg(long, env = "PDFOCR_SESSION_TTL", default_value_t = 3600)]
    session_ttl: u64,

    /// Restrict CORS to this origin (default: any origin).
    #[arg(long, env = "PDFOCR_CORS_ORIGIN")]
    cors_origin: Option<String>,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The progress bar carries the feedback during `process`, so library
    // INFO logs are only shown in verbose mode or without the bar.
    let bar_active = matches!(&cli.command, Command::Process(a) if !a.no_progress && !a.json);
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || bar_active {
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

    match cli.command {
        Command::Process(args) => run_process(args, cli.quiet).await,
        Command::Serve(args) => run_serve(args).await,
    }
}

async fn run_process(args: ProcessArgs, quiet: bool) -> Result<()> {
    let language: Language = args.lang.parse()?;
    validate_local_pdf(&args.input)?;
    let config = args.pipeline.to_config()?;
    let pipeline = Pipeline::new(config).context("Failed to set up the pipeline")?;

    // Page PDFs go to a scratch directory next to the output so the final
    // rename stays on one filesystem.
    let out_dir = match args.output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let scratch = tempfile::Builder::new()
        .prefix(".pdfocr-")
        .tempdir_in(&out_dir)
        .context("Failed to create a scratch directory")?;

    let job = ProcessJob {
        source: args.input.clone(),
        language,
        work_dir: scratch.path().to_path_buf(),
        output_path: args.output.clone(),
    };

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let sink: Box<dyn ProgressSink> = if quiet || args.json {
        Box::new(NoopProgress)
    } else if args.no_progress {
        Box::new(LineProgress)
    } else {
        Box::new(BarProgress::new())
    };

    let outcome = match pipeline.run(&job, sink.as_ref(), &cancel).await {
        Ok(outcome) => outcome,
        Err(PipelineError::Cancelled) => anyhow::bail!("Cancelled"),
        Err(e) => return Err(e).context("Processing failed"),
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialise summary")?
        );
    } else if !quiet {
        let failed = outcome.failed_pages().count();
        eprintln!(
            "{}  {}/{} pages  {}  {}ms  →  {}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            outcome.page_count - failed,
            outcome.page_count,
            dim(&format!("{} OCR", outcome.backend)),
            outcome.total_duration_ms,
            bold(&outcome.combined_path.display().to_string()),
        );
        if outcome.used_fallback_font {
            eprintln!("   {}", dim("pages written in Courier (Unicode font unavailable)"));
        }
        let missing: usize = outcome.pages.iter().map(|p| p.missing_glyphs).sum();
        if missing > 0 {
            eprintln!("   {}", dim(&format!("{missing} char(s) had no glyph in the font")));
        }
    }
    Ok(())
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = ServerConfig {
        bind: args.bind,
        upload_dir: args.upload_dir,
        output_dir: args.output_dir,
        max_upload_bytes: args.max_upload_mb.max(1) * 1024 * 1024,
        session_ttl_secs: args.session_ttl,
        cors_origin: args.cors_origin,
        pipeline: args.pipeline.to_config()?,
        ..ServerConfig::default()
    };
    pdfocr_stream::serve(config).await.context("Server failed")
}

//! CLI binary for payshield.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AuditConfig`, builds the storage and service clients from the
//! environment, and writes the audit artifacts to disk.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use payshield::prompts::DEFAULT_AUDIT_INSTRUCTION;
use payshield::{
    audit_files, export_artifacts, write_artifacts, AuditConfig, AuditProgressCallback,
    AuditResult, AzureBlobStore, ChatCompletionsClient, ProgressCallback, Role,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
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

/// Spinner with one log line per finished stage. Pages of both documents
/// are staged concurrently, so counters are atomic.
struct CliProgressCallback {
    bar: ProgressBar,
    staged: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading documents…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            staged: AtomicUsize::new(0),
        })
    }
}

impl AuditProgressCallback for CliProgressCallback {
    fn on_audit_start(&self) {
        self.bar.set_prefix("Rasterising");
    }

    fn on_document_rasterised(&self, role: Role, pages: usize) {
        self.bar.println(format!(
            "  {} {:<8} {}",
            green("✓"),
            role_label(role),
            dim(&format!("{pages} page(s)"))
        ));
        self.bar.set_prefix("Staging");
    }

    fn on_page_staged(&self, role: Role, page: usize, total: usize) {
        let n = self.staged.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar
            .set_message(format!("{n} uploaded (last: {} page {page}/{total})", role_label(role)));
    }

    fn on_service_call_start(&self, images: usize) {
        self.bar.println(format!(
            "  {} Staged {} image(s)",
            green("✓"),
            bold(&images.to_string())
        ));
        self.bar.set_prefix("Auditing");
        self.bar.set_message("Waiting for the model…");
    }

    fn on_audit_complete(&self, table_found: bool) {
        self.bar.finish_and_clear();
        if table_found {
            eprintln!("{} Audit complete", green("✔"));
        } else {
            eprintln!(
                "{} Audit complete {}",
                yellow("⚠"),
                dim("(no structured table found for CSV export)")
            );
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Po => "PO",
        Role::Invoice => "Invoice",
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Audit a PDF purchase order against a scanned invoice
  payshield audit po.pdf invoice.jpg -o audits/acme-0423

  # Remote inputs, custom instruction, machine-readable output
  payshield audit https://example.com/po.pdf invoice.png --instruction rules.txt --json

  # Rebuild the PDF and CSV from a saved answer (no model call)
  payshield export audits/acme-0423/PayShield_Audit.md -o audits/acme-0423

  # Print the default audit instruction as a starting point for edits
  payshield prompt > rules.txt

ENVIRONMENT VARIABLES:
  AZURE_STORAGE_ACCOUNT     Storage account that stages page images
  AZURE_STORAGE_KEY         Base64 account key (used to sign read-only URLs)
  AZURE_STORAGE_CONTAINER   Blob container (default: documents)
  AZURE_STORAGE_ENDPOINT    Blob endpoint override
  AZURE_OPENAI_API_KEY      Azure OpenAI key (with AZURE_OPENAI_ENDPOINT)
  AZURE_OPENAI_ENDPOINT     Azure OpenAI resource endpoint
  AZURE_OPENAI_API_VERSION  REST API version (default: 2024-12-01-preview)
  OPENAI_API_KEY            OpenAI key, used when Azure OpenAI is not configured
  OPENAI_BASE_URL           OpenAI-compatible base URL
  PDFIUM_LIB_PATH           Path to libpdfium (file or directory)
"#;

/// Audit labor invoices against purchase orders with a vision model.
#[derive(Parser, Debug)]
#[command(
    name = "payshield",
    version,
    about = "Audit labor invoices against purchase orders with a vision model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAYSHIELD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAYSHIELD_QUIET")]
    quiet: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "PAYSHIELD_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an audit and write the report, CSV and raw answer.
    Audit(AuditArgs),
    /// Regenerate the report and CSV from a saved answer.
    Export(ExportArgs),
    /// Print the default audit instruction.
    Prompt,
}

#[derive(Args, Debug)]
struct AuditArgs {
    /// Purchase order / labor agreement: PDF, JPEG or PNG path or URL.
    po: String,

    /// Invoice / timesheet: PDF, JPEG or PNG path or URL.
    invoice: String,

    /// Directory for the audit artifacts.
    #[arg(short, long, env = "PAYSHIELD_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Text file with a replacement audit instruction.
    #[arg(long, env = "PAYSHIELD_INSTRUCTION")]
    instruction: Option<PathBuf>,

    /// Model (OpenAI) or deployment (Azure) name.
    #[arg(long, env = "PAYSHIELD_MODEL", default_value = payshield::config::DEFAULT_MODEL)]
    model: String,

    /// Rendering DPI for PDF pages (72–400).
    #[arg(long, env = "PAYSHIELD_DPI", default_value_t = payshield::config::DEFAULT_DPI,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Lifetime of staged image URLs in seconds.
    #[arg(long, env = "PAYSHIELD_URL_TTL", default_value_t = payshield::config::DEFAULT_URL_TTL_SECS)]
    url_ttl: u64,

    /// Concurrent page uploads per document.
    #[arg(long, env = "PAYSHIELD_UPLOAD_CONCURRENCY", default_value_t = 4)]
    upload_concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PAYSHIELD_PASSWORD")]
    password: Option<String>,

    /// Max completion tokens.
    #[arg(long, env = "PAYSHIELD_MAX_TOKENS")]
    max_tokens: Option<u32>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PAYSHIELD_TEMPERATURE")]
    temperature: Option<f32>,

    /// HTTP download timeout for URL inputs, in seconds.
    #[arg(long, env = "PAYSHIELD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Upper bound on the model call, in seconds.
    #[arg(long, env = "PAYSHIELD_API_TIMEOUT", default_value_t = 180)]
    api_timeout: u64,

    /// Print the outcome as JSON on stdout.
    #[arg(long, env = "PAYSHIELD_JSON")]
    json: bool,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Saved raw answer (e.g. PayShield_Audit.md).
    result_file: PathBuf,

    /// Directory for the regenerated artifacts.
    #[arg(short, long, env = "PAYSHIELD_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are suppressed while the spinner is active.
    let json = matches!(&cli.command, Command::Audit(a) if a.json);
    let show_progress = !cli.quiet && !cli.no_progress && !json;
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

    match &cli.command {
        Command::Audit(args) => run_audit_command(&cli, args, show_progress).await,
        Command::Export(args) => run_export_command(&cli, args).await,
        Command::Prompt => {
            print!("{DEFAULT_AUDIT_INSTRUCTION}");
            Ok(())
        }
    }
}

async fn run_audit_command(cli: &Cli, args: &AuditArgs, show_progress: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AuditProgressCallback>)
    } else {
        None
    };
    let config = build_config(args, progress).await?;

    let store = AzureBlobStore::from_env().context("Object storage is not configured")?;
    let service = ChatCompletionsClient::from_env(&config)
        .context("Audit service is not configured")?
        .with_timeout(Duration::from_secs(args.api_timeout))
        .context("Failed to build the audit service client")?;

    let outcome = match audit_files(&args.po, &args.invoice, &config, &store, &service).await {
        Ok(o) => o,
        Err(e) => {
            if e.is_retryable() && !cli.quiet {
                eprintln!(
                    "{} The audit service is temporarily unavailable; retrying later may succeed.",
                    yellow("⚠")
                );
            }
            return Err(anyhow::Error::new(e).context("Audit failed"));
        }
    };

    let exported = payshield::ExportedArtifacts {
        report_pdf: outcome.report_pdf.clone(),
        table: outcome.table.clone(),
        csv: outcome.csv.clone(),
    };
    let written = write_artifacts(&args.output_dir, &outcome.result, &exported)
        .await
        .context("Failed to write audit artifacts")?;

    if args.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?;
        println!("{json}");
    } else {
        println!("{}", outcome.result.as_str().trim_end());
    }

    if !cli.quiet {
        let s = &outcome.stats;
        eprintln!(
            "{}  PO {} page(s), invoice {} page(s), {} table row(s)  {}",
            cyan("◆"),
            s.po_pages,
            s.invoice_pages,
            s.table_rows,
            dim(&format!(
                "rasterise {}ms · stage {}ms · model {}ms · total {}ms",
                s.rasterise_duration_ms,
                s.stage_duration_ms,
                s.service_duration_ms,
                s.total_duration_ms
            )),
        );
        print_written(&written);
    }
    Ok(())
}

async fn run_export_command(cli: &Cli, args: &ExportArgs) -> Result<()> {
    let text = tokio::fs::read_to_string(&args.result_file)
        .await
        .with_context(|| format!("Failed to read saved answer from {:?}", args.result_file))?;
    let result = AuditResult::new(text);

    let exported = export_artifacts(&result).context("Failed to render artifacts")?;
    if exported.csv.is_none() && !cli.quiet {
        eprintln!(
            "{} No structured table found for CSV export.",
            yellow("⚠")
        );
    }
    let written = write_artifacts(&args.output_dir, &result, &exported)
        .await
        .context("Failed to write artifacts")?;
    if !cli.quiet {
        print_written(&written);
    }
    Ok(())
}

fn print_written(paths: &[PathBuf]) {
    for path in paths {
        eprintln!("   {} {}", green("→"), bold(&path.display().to_string()));
    }
}

/// Map CLI args to `AuditConfig`.
async fn build_config(args: &AuditArgs, progress: Option<ProgressCallback>) -> Result<AuditConfig> {
    let mut builder = AuditConfig::builder()
        .dpi(args.dpi)
        .model(&args.model)
        .url_ttl_secs(args.url_ttl)
        .upload_concurrency(args.upload_concurrency)
        .download_timeout_secs(args.download_timeout);

    if let Some(path) = &args.instruction {
        builder = builder.instruction(read_instruction(path).await?);
    }
    if let Some(n) = args.max_tokens {
        builder = builder.max_tokens(n);
    }
    if let Some(t) = args.temperature {
        builder = builder.temperature(t);
    }
    if let Some(pwd) = &args.password {
        builder = builder.password(pwd);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_instruction(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read instruction from {:?}", path))
}

//! CLI binary for markup-gateway.
//!
//! A thin shim over the library crate: maps flags to `JournalConfig`, runs one
//! operation against a markup server and prints the result.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use markup_gateway::pipeline::extract::{extract_blocking, DEFAULT_ALLOW_LIST};
use markup_gateway::store::MemoryStore;
use markup_gateway::{
    client_for, fire_and_forget, ArticleId, ArticleRecord, FileLayout, GalleyFormat, JobId,
    JobOrchestrator, JobProgressCallback, JobRequest, JobState, JobStatus, JournalConfig,
    JournalId, JournalRecord, ProgressCallback, ServerApi,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that follows one job through its states and polls.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl JobProgressCallback for CliProgress {
    fn on_state_change(&self, _article: ArticleId, _from: JobState, to: JobState) {
        self.bar.set_prefix(to.to_string());
    }

    fn on_poll(
        &self,
        _article: ArticleId,
        job: &JobId,
        attempt: u32,
        max_attempts: u32,
        status: JobStatus,
    ) {
        self.bar.set_message(format!(
            "job {job}  poll {attempt}/{max_attempts}  {status:?}"
        ));
    }

    fn on_notify(&self, _article: ArticleId, message: &str, success: bool) {
        let mark = if success { green("✓") } else { red("✗") };
        self.bar.println(format!("  {mark} {message}"));
    }

    fn on_complete(&self, _article: ArticleId, _state: JobState) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a manuscript and create HTML/PDF/XML galleys
  markupctl convert manuscript.docx --files-dir ./files --galleys

  # One status check for a running job
  markupctl status a1b2c3d4

  # Unpack a result archive the way the gateway does
  markupctl extract document.zip -o ./markup

  # Kick a host's refresh endpoint without waiting for it
  markupctl trigger https://journal.example.org/index.php/j/gateway/plugin/markup/12/refresh

ENVIRONMENT VARIABLES:
  MARKUP_HOST_URL     Markup server base URL
  MARKUP_USER         Account e-mail on the markup server
  MARKUP_PASS         Account password
  MARKUP_API          rest (default) or legacy
"#;

/// Drive Document Markup Server conversions from the command line.
#[derive(Parser, Debug)]
#[command(
    name = "markupctl",
    version,
    about = "Drive Document Markup Server conversions from the command line",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MARKUP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MARKUP_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a document, wait for the job and ingest the result.
    Convert(ConvertArgs),
    /// Ask the server for the status of a job once.
    Status {
        job: String,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Extract a result archive into a directory.
    Extract {
        archive: PathBuf,
        /// Destination directory.
        #[arg(short, long, default_value = "markup")]
        output: PathBuf,
        /// Print the extraction result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Fire a request at a URL and return without waiting for the response.
    Trigger {
        url: String,
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Markup server base URL.
    #[arg(long, env = "MARKUP_HOST_URL", default_value = markup_gateway::config::DEFAULT_SERVER_URL)]
    host_url: String,

    #[arg(long, env = "MARKUP_USER", default_value = "")]
    user: String,

    #[arg(long, env = "MARKUP_PASS", default_value = "", hide_env_values = true)]
    pass: String,

    #[arg(long, env = "MARKUP_API", value_enum, default_value = "rest")]
    api: ApiArg,

    /// Request timeout in seconds.
    #[arg(long, env = "MARKUP_TIMEOUT", default_value_t = 120)]
    timeout: u64,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Source document (docx, odt, pdf, ...).
    input: PathBuf,

    #[command(flatten)]
    server: ServerArgs,

    /// Host files directory the archive and extracted files live under.
    #[arg(long, env = "MARKUP_FILES_DIR", default_value = "files")]
    files_dir: PathBuf,

    /// Directory of bundled stylesheets.
    #[arg(long, env = "MARKUP_CSS_DIR", default_value = "css")]
    css_dir: PathBuf,

    #[arg(long, default_value_t = 1)]
    article: u64,

    #[arg(long, default_value_t = 1)]
    journal: u64,

    /// Article title sent with the submission.
    #[arg(long, default_value = "Untitled")]
    title: String,

    /// Extract the result and create galleys.
    #[arg(long)]
    galleys: bool,

    /// Galley formats to create (html, pdf, xml, epub).
    #[arg(long, value_delimiter = ',', default_value = "html,pdf,xml")]
    formats: Vec<String>,

    /// Also request the reviewer PDF.
    #[arg(long)]
    review_version: bool,

    /// Seconds between status checks.
    #[arg(long, env = "MARKUP_POLL_INTERVAL", default_value_t = 5)]
    poll_interval: u64,

    /// Status checks before giving up.
    #[arg(long, env = "MARKUP_MAX_POLLS", default_value_t = 60)]
    max_polls: u32,

    /// Print the job report as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the spinner.
    #[arg(long)]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ApiArg {
    Rest,
    Legacy,
}

impl From<ApiArg> for ServerApi {
    fn from(v: ApiArg) -> Self {
        match v {
            ApiArg::Rest => ServerApi::Rest,
            ApiArg::Legacy => ServerApi::Legacy,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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
        Command::Convert(args) => convert(args, cli.quiet).await,
        Command::Status { job, server } => status(&job, &server).await,
        Command::Extract {
            archive,
            output,
            json,
        } => extract(archive, output, json, cli.quiet).await,
        Command::Trigger { url, timeout_ms } => {
            fire_and_forget(&url, Duration::from_millis(timeout_ms))
                .await
                .with_context(|| format!("Failed to trigger {url}"))?;
            if !cli.quiet {
                eprintln!("{} triggered {}", green("✔"), dim(&url));
            }
            Ok(())
        }
    }
}

/// Map server flags onto a config builder.
fn server_config(server: &ServerArgs) -> markup_gateway::JournalConfigBuilder {
    JournalConfig::builder()
        .host_url(&server.host_url)
        .credentials(&server.user, &server.pass)
        .api(server.api.into())
        .request_timeout_secs(server.timeout)
}

async fn convert(args: ConvertArgs, quiet: bool) -> Result<()> {
    let formats = args
        .formats
        .iter()
        .map(|f| {
            GalleyFormat::from_label(f.trim())
                .with_context(|| format!("Unknown galley format '{f}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    let config = server_config(&args.server)
        .review_version(args.review_version)
        .wanted_formats(formats)
        .poll_interval_ms(args.poll_interval.saturating_mul(1000))
        .max_polls(args.max_polls)
        .build()
        .context("Invalid configuration")?;

    let article = ArticleId(args.article);
    let journal = JournalId(args.journal);
    let layout = FileLayout::new(&args.files_dir, &args.css_dir);
    let store = Arc::new(MemoryStore::new(layout.clone()));
    store
        .upload_source(article, &args.input)
        .await
        .with_context(|| format!("Failed to stage {}", args.input.display()))?;

    let client = client_for(&config).context("Failed to build markup client")?;
    let mut orchestrator = JobOrchestrator::new(client, store.clone(), store, config, layout);
    if !quiet && !args.no_progress && !args.json {
        orchestrator = orchestrator.with_observer(CliProgress::new() as ProgressCallback);
    }

    let report = orchestrator
        .run(JobRequest {
            article: ArticleRecord::new(article, journal, args.title),
            journal: JournalRecord {
                id: journal,
                ..JournalRecord::default()
            },
            issue: None,
            want_galley: args.galleys,
        })
        .await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !quiet {
        let mark = if report.succeeded() { green("✔") } else { red("✘") };
        eprintln!("{mark} {}", report.message);
        for (format, id) in &report.galleys {
            eprintln!("   {} galley {}", bold(format.label()), dim(&id.to_string()));
        }
        for path in &report.deleted {
            eprintln!("   {} {}", dim("removed"), path.display());
        }
        for warning in &report.warnings {
            eprintln!("   {} {warning}", red("!"));
        }
    }

    if !report.succeeded() {
        bail!("Conversion ended in state '{}'", report.state);
    }
    Ok(())
}

async fn status(job: &str, server: &ServerArgs) -> Result<()> {
    let config = server_config(server)
        .build()
        .context("Invalid configuration")?;
    let job = JobId::parse(job).context("Invalid job id")?;
    let client = client_for(&config).context("Failed to build markup client")?;
    let status = client
        .poll_status(&job)
        .await
        .with_context(|| format!("Status check for job {job} failed"))?;
    println!("{job}\t{status:?}");
    Ok(())
}

async fn extract(archive: PathBuf, output: PathBuf, json: bool, quiet: bool) -> Result<()> {
    let allow_list = DEFAULT_ALLOW_LIST.iter().map(|s| s.to_string()).collect();
    let extraction = extract_blocking(archive.clone(), output.clone(), allow_list)
        .await
        .with_context(|| format!("Failed to extract {}", archive.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&extraction).context("Failed to serialise result")?
        );
    } else if !quiet {
        for file in &extraction.files {
            println!("{}", file.display());
        }
        for warning in &extraction.warnings {
            eprintln!("{} {warning}", red("!"));
        }
        eprintln!(
            "{} {} files into {}",
            green("✔"),
            extraction.files.len(),
            bold(&output.display().to_string())
        );
    }
    Ok(())
}

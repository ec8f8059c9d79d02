//! CLI binary for sharemap.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig` and prints per-page results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sharemap::{
    analyze, analyze_to_file, extract_text, inspect, AnalysisConfig, AnalysisProgressCallback,
    PageSelection, ProgressCallback, VisionEndpoint,
};
use std::collections::HashMap;
use std::io::{self, Write};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-page log
/// lines using [indicatif]. Works correctly when pages complete out of
/// order (concurrent mode).
struct CliProgressCallback {
    /// The single progress bar anchored at the bottom of the terminal.
    bar: ProgressBar,
    /// Per-page wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Count of pages actually dispatched. With a `--pages` selection this
    /// is smaller than the document's page count, and it is the right
    /// denominator for the final summary.
    started: AtomicUsize,
}

impl CliProgressCallback {
    /// Create a callback whose progress-bar length is set dynamically by
    /// `on_run_start` (called before any pages are processed).
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start

        // Initial style: spinner only (no counter until we know the total).
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            started: AtomicUsize::new(0),
        })
    }

    /// Switch to the full progress-bar style once we know `total`.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Analysing");
        self.bar.reset_eta();
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize, selected_pages: usize) {
        // Switch from spinner-only style to full progress bar. The bar is
        // sized to the pages actually scheduled so it can reach 100% even
        // under a `--pages` selection.
        self.activate_bar(selected_pages);
        let headline = if selected_pages == total_pages {
            format!("Starting analysis of {total_pages} pages…")
        } else {
            format!("Starting analysis of {selected_pages} of {total_pages} pages…")
        };
        self.bar
            .println(format!("{} {}", cyan("◆"), bold(&headline)));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.start_times
            .lock()
            .unwrap()
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, entity_count: usize) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{entity_count:>3} entities")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _total_pages: usize, success_count: usize) {
        // Summarise against the pages that were actually attempted, not the
        // document's total: under a `--pages` selection the unselected pages
        // are neither successes nor failures.
        let attempted = self.started.load(Ordering::SeqCst);
        let failed = attempted.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages analysed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages analysed  ({} failed)",
                if failed == attempted { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                attempted,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a PDF (per-page JSON to stdout)
  sharemap structure.pdf

  # Write the full output (results + stats) to a file
  sharemap structure.pdf -o structure.json

  # Slide deck or spreadsheet (needs LibreOffice on PATH)
  sharemap group-chart.pptx
  sharemap register.xlsx --soffice /usr/bin/soffice

  # A single page with a custom prompt
  sharemap --pages 3 --prompt "List only the ultimate parent entities." annual-report.pdf

  # From a URL
  sharemap https://example.com/filings/holding-structure.pdf

  # Inspect metadata without calling the endpoint (no API key needed)
  sharemap --inspect-only structure.pdf

  # Embedded text layer only, no vision calls
  sharemap --text-only structure.pdf

ENVIRONMENT VARIABLES:
  SHAREMAP_ENDPOINT       Base URL of the Azure OpenAI resource
  SHAREMAP_API_KEY        API key (api-key header)
  SHAREMAP_DEPLOYMENT     Model deployment name, e.g. gpt-4o
  SHAREMAP_API_VERSION    API version (default: 2024-02-15-preview)

SETUP:
  1. export SHAREMAP_ENDPOINT=https://myresource.openai.azure.com
  2. export SHAREMAP_API_KEY=...
  3. export SHAREMAP_DEPLOYMENT=gpt-4o
  4. sharemap structure.pdf

  PPTX/XLSX inputs additionally need LibreOffice (soffice) installed.
"#;

/// Extract corporate shareholding structures from documents.
#[derive(Parser, Debug)]
#[command(
    name = "sharemap",
    version,
    about = "Extract corporate shareholding structures from documents using a vision LLM",
    long_about = "Analyse PDF, PPTX, XLSX, and image documents (local files or URLs) with a \
vision language model. Each page is rasterised, sent to an Azure-OpenAI-style chat-completions \
endpoint, and the returned JSON (entities, relationships, share percentages) is collected per \
page with a running entity total.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file path (.pdf, .pptx, .xlsx, .png, .jpg, .jpeg) or HTTP/HTTPS URL.
    input: String,

    /// Write the full JSON output (results + stats) to this file.
    #[arg(short, long, env = "SHAREMAP_OUTPUT")]
    output: Option<PathBuf>,

    /// Base URL of the inference endpoint.
    #[arg(long, env = "SHAREMAP_ENDPOINT")]
    endpoint: Option<String>,

    /// API key sent in the api-key header.
    #[arg(long, env = "SHAREMAP_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model deployment name (e.g. gpt-4o).
    #[arg(long, env = "SHAREMAP_DEPLOYMENT")]
    deployment: Option<String>,

    /// API version query parameter.
    #[arg(long, env = "SHAREMAP_API_VERSION")]
    api_version: Option<String>,

    /// Analysis prompt sent with each page image (replaces the default).
    #[arg(long, env = "SHAREMAP_PROMPT", conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Path to a text file containing the analysis prompt.
    #[arg(long, env = "SHAREMAP_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "SHAREMAP_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "SHAREMAP_PAGES", default_value = "all")]
    pages: String,

    /// Number of concurrent vision API calls.
    #[arg(short, long, env = "SHAREMAP_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Max model output tokens per page.
    #[arg(long, env = "SHAREMAP_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "SHAREMAP_TEMPERATURE", default_value_t = 0.2)]
    temperature: f64,

    /// Nucleus sampling parameter (0.0–1.0).
    #[arg(long, env = "SHAREMAP_TOP_P", default_value_t = 0.95)]
    top_p: f64,

    /// Retries per page on transient API failure.
    #[arg(long, env = "SHAREMAP_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Maximum rendered page dimension in pixels.
    #[arg(long, env = "SHAREMAP_MAX_PIXELS", default_value_t = 2000,
          value_parser = clap::value_parser!(u32).range(100..=10_000))]
    max_pixels: u32,

    /// Path to the LibreOffice binary for PPTX/XLSX conversion.
    #[arg(long, env = "SHAREMAP_SOFFICE", default_value = "soffice")]
    soffice: String,

    /// Output the full structured JSON (AnalysisOutput) instead of per-page results.
    #[arg(long, env = "SHAREMAP_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SHAREMAP_NO_PROGRESS")]
    no_progress: bool,

    /// Print document metadata only, no analysis.
    #[arg(long)]
    inspect_only: bool,

    /// Print the document's embedded text layer only, no analysis.
    #[arg(long, conflicts_with = "inspect_only")]
    text_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SHAREMAP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SHAREMAP_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "SHAREMAP_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-page vision call timeout in seconds.
    #[arg(long, env = "SHAREMAP_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Office-to-PDF conversion timeout in seconds.
    #[arg(long, env = "SHAREMAP_CONVERT_TIMEOUT", default_value_t = 120)]
    convert_timeout: u64,
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

    // ── Modes that never touch the endpoint ──────────────────────────────
    if cli.inspect_only || cli.text_only {
        let config = build_config(&cli, None).await?;

        if cli.text_only {
            let text = extract_text(&cli.input, &config)
                .await
                .context("Failed to extract text")?;
            println!("{text}");
            return Ok(());
        }

        let meta = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect document")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
            );
        } else {
            println!("File:    {}", cli.input);
            if let Some(ref t) = meta.title {
                println!("Title:   {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:  {}", a);
            }
            println!("Pages:   {}", meta.page_count);
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    // The progress bar starts as a spinner (no page count yet);
    // `on_run_start` resizes it to the correct total once the document has
    // been opened.
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run analysis ─────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let output = analyze_to_file(&cli.input, output_path, &config)
            .await
            .context("Analysis failed")?;

        // Summary line (callback already printed the per-page log).
        if !cli.quiet {
            eprintln!(
                "{}  {}/{} pages  {} entities  {}ms  →  {}",
                if output.stats.failed_pages == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                output.stats.processed_pages,
                output.stats.total_pages,
                output.stats.total_entities,
                output.stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        let output = analyze(&cli.input, &config)
            .await
            .context("Analysis failed")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            // Per-page results as a JSON object keyed by page number; page
            // failures appear under "errors" so nothing is silently lost.
            let mut results = serde_json::Map::new();
            let mut errors = serde_json::Map::new();
            for page in &output.pages {
                match (&page.result, &page.error) {
                    (Some(r), _) => {
                        results.insert(
                            page.page_num.to_string(),
                            serde_json::Value::Object(r.clone()),
                        );
                    }
                    (None, Some(e)) => {
                        errors.insert(
                            page.page_num.to_string(),
                            serde_json::Value::String(e.to_string()),
                        );
                    }
                    (None, None) => {}
                }
            }
            let mut doc = serde_json::Map::new();
            doc.insert("results".into(), serde_json::Value::Object(results));
            if !errors.is_empty() {
                doc.insert("errors".into(), serde_json::Value::Object(errors));
            }

            let rendered = serde_json::to_string_pretty(&serde_json::Value::Object(doc))
                .context("Failed to serialise results")?;
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
            handle.write_all(b"\n").ok();
        }

        // Summary (the callback already printed the final green/red tick).
        if !cli.quiet && !show_progress && !cli.json {
            eprintln!(
                "Analysed {}/{} pages, {} entities, {}ms",
                output.stats.processed_pages,
                output.stats.total_pages,
                output.stats.total_entities,
                output.stats.total_duration_ms
            );
            if output.stats.failed_pages > 0 {
                eprintln!("  {} pages failed", output.stats.failed_pages);
            }
        }
    }

    Ok(())
}

/// Map CLI args to `AnalysisConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let user_prompt = if let Some(ref path) = cli.prompt_file {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?,
        )
    } else {
        cli.prompt.clone()
    };

    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let pages = parse_pages(&cli.pages)?;

    let mut builder = AnalysisConfig::builder()
        .pages(pages)
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .top_p(cli.top_p)
        .max_retries(cli.max_retries)
        .max_rendered_pixels(cli.max_pixels)
        .soffice_path(&cli.soffice)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .convert_timeout_secs(cli.convert_timeout);

    // Endpoint flags override the environment; partial flags fall back to
    // VisionEndpoint::from_env at run time.
    if let (Some(base_url), Some(api_key), Some(deployment)) =
        (&cli.endpoint, &cli.api_key, &cli.deployment)
    {
        let mut endpoint = VisionEndpoint::new(base_url, api_key, deployment);
        if let Some(ref v) = cli.api_version {
            endpoint.api_version = v.clone();
        }
        builder = builder.endpoint(endpoint);
    }

    if let Some(prompt) = user_prompt {
        builder = builder.user_prompt(prompt);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .context(format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        for &p in &pages {
            if p < 1 {
                anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
            }
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

//! CLI binary for edgequake-md2thread.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ThreadConfig` and prints the resulting thread.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_md2thread::pipeline::input::{read_input, InputSource};
use edgequake_md2thread::pipeline::run::active_post;
use edgequake_md2thread::{
    convert, write_assets, PipelineProgressCallback, ProgressCallback, ThreadConfig, ThreadSnapshot,
    DEFAULT_BREAK_MARKER,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar over the blocks being rasterised. Blocks finish out of
/// order, so the bar only counts.
struct CliProgressCallback {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Lexing…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, _generation: u64, total_blocks: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} blocks  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_blocks as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Rendering");
    }

    fn on_block_rendered(&self, _generation: u64, block: usize, _total_blocks: usize) {
        self.bar.set_message(format!("block {block}"));
        self.bar.inc(1);
    }

    fn on_block_failed(&self, _generation: u64, block: usize, error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} Block {:>3}  {}", red("✗"), block, red(&msg)));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _generation: u64, post_count: usize, failed_blocks: usize) {
        self.bar.finish_and_clear();
        if failed_blocks == 0 {
            eprintln!("{} {} posts", green("✔"), bold(&post_count.to_string()));
        } else {
            eprintln!(
                "{} {} posts  ({} blocks left as text)",
                cyan("⚠"),
                bold(&post_count.to_string()),
                red(&failed_blocks.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Split an article into posts (stdout)
  md2thread article.md

  # Read from stdin, 280-character posts
  cat article.md | md2thread --max-chars 280 -

  # Save code and table images next to the thread
  md2thread article.md --assets-dir ./images

  # Which post is the character at offset 1200 in?
  md2thread article.md --cursor 1200

  # Machine-readable output
  md2thread --json article.md > thread.json

BREAKS:
  A line containing only the break marker (default §§§) always ends a post.
  Markers inside fenced code are ignored.

ENVIRONMENT VARIABLES:
  MD2THREAD_MAX_CHARS      Maximum characters per post
  MD2THREAD_BREAK_MARKER   Manual break marker
  MD2THREAD_ASSETS_DIR     Directory for rendered images
  RUST_LOG                 Override the log filter (e.g. edgequake_md2thread=debug)
"#;

/// Turn long-form Markdown into a thread of short posts.
#[derive(Parser, Debug)]
#[command(
    name = "md2thread",
    version,
    about = "Turn long-form Markdown into a thread of short posts",
    long_about = "Split a Markdown document into plain-text posts of bounded length. Fenced code \
blocks and tables are rendered as images and referenced from the posts by placeholders.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown file path, or `-` for stdin.
    input: String,

    /// Maximum characters per post.
    #[arg(long, env = "MD2THREAD_MAX_CHARS", default_value_t = 500)]
    max_chars: usize,

    /// Line that forces a post boundary.
    #[arg(long, env = "MD2THREAD_BREAK_MARKER", default_value = DEFAULT_BREAK_MARKER)]
    break_marker: String,

    /// Keep fenced code blocks as text instead of rendering images.
    #[arg(long, env = "MD2THREAD_NO_CODE_IMAGES")]
    no_code_images: bool,

    /// Keep tables as text instead of rendering images.
    #[arg(long, env = "MD2THREAD_NO_TABLE_IMAGES")]
    no_table_images: bool,

    /// Per-block rendering timeout in milliseconds.
    #[arg(long, env = "MD2THREAD_RASTER_TIMEOUT", default_value_t = 10_000)]
    raster_timeout: u64,

    /// Write rendered images into this directory as `<id>.png`.
    #[arg(long, env = "MD2THREAD_ASSETS_DIR")]
    assets_dir: Option<PathBuf>,

    /// Report the post containing this character offset of the input.
    #[arg(long)]
    cursor: Option<usize>,

    /// Print posts without image placeholders.
    #[arg(long, env = "MD2THREAD_PLAIN")]
    plain: bool,

    /// Output the full snapshot as JSON.
    #[arg(long, env = "MD2THREAD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "MD2THREAD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MD2THREAD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MD2THREAD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Read input ───────────────────────────────────────────────────────
    let source = InputSource::parse(&cli.input);
    let markdown = read_input(&source).with_context(|| format!("Failed to read {}", source.label()))?;

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Convert ──────────────────────────────────────────────────────────
    let snapshot = convert(&markdown, &config).await;

    if let Some(ref dir) = cli.assets_dir {
        let written = write_assets(&snapshot, dir)
            .await
            .context("Failed to write images")?;
        if !cli.quiet && !cli.json {
            eprintln!(
                "{} {} images → {}",
                green("✔"),
                written.len(),
                bold(&dir.display().to_string())
            );
        }
    }

    if cli.json {
        println!("{}", snapshot.to_json().context("Failed to serialise snapshot")?);
    } else {
        print_thread(&snapshot, cli.plain).context("Failed to write to stdout")?;
    }

    if let Some(cursor) = cli.cursor {
        match active_post(&snapshot, &markdown, cursor, &config) {
            Some(i) => eprintln!("Cursor {} is in post {}/{}", cursor, i + 1, snapshot.posts.len()),
            None => eprintln!("Cursor {} is not in any post", cursor),
        }
    }

    if !cli.quiet && !show_progress && !cli.json {
        eprintln!(
            "{} posts from {} chars in {}ms",
            snapshot.stats.post_count, snapshot.stats.source_chars, snapshot.stats.elapsed_ms
        );
    }
    for failure in &snapshot.failures {
        tracing::warn!("{}", failure);
    }

    Ok(())
}

/// Map CLI args to `ThreadConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ThreadConfig> {
    let mut builder = ThreadConfig::builder()
        .max_post_chars(cli.max_chars)
        .break_marker(cli.break_marker.clone())
        .rasterize_code(!cli.no_code_images)
        .rasterize_tables(!cli.no_table_images)
        .raster_timeout_ms(cli.raster_timeout);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn print_thread(snapshot: &ThreadSnapshot, plain: bool) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let total = snapshot.posts.len();
    for post in &snapshot.posts {
        let body = if plain { post.plain_text() } else { post.text.clone() };
        writeln!(
            out,
            "{}",
            dim(&format!("── {}/{} · {} chars ──", post.index + 1, total, post.char_count))
        )?;
        writeln!(out, "{body}")?;
        for id in &post.assets {
            if let Some(asset) = snapshot.asset(id) {
                writeln!(
                    out,
                    "{}",
                    dim(&format!(
                        "   ↳ {} image {} ({}×{})",
                        asset.kind, id, asset.image.width, asset.image.height
                    ))
                )?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

//! pmem-badblocks - find and clear bad blocks on persistent memory.
//!
//! Lists the ranges of a file or device that overlap media errors and
//! repairs them so the range becomes usable again.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pmem_badblocks::{
    BadBlockRange, BadBlocksConfig, BadBlocksList, Backend, ClearReport, ClearStatus,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Shape of the diagnostics written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

/// Install the global subscriber. Logs go to stderr so `--json` output on
/// stdout stays parseable; `RUST_LOG` picks the level, `info` otherwise.
fn init_logging(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Human => builder.with_target(false).compact().try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    installed.map_err(|err| anyhow::anyhow!("cannot install {:?} logger: {}", format, err))
}

#[derive(Parser)]
#[command(name = "pmem-badblocks")]
#[command(author, version)]
#[command(
    about = "Find and clear bad blocks on persistent memory",
    long_about = "Reports the ranges of files, block devices and dax devices that overlap media errors, and clears them."
)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log output format; the flag wins over the environment variable
    #[arg(
        long,
        value_enum,
        global = true,
        env = "PMEM_BADBLOCKS_LOG_FORMAT",
        default_value = "human",
        ignore_case = true
    )]
    log_format: LogFormat,

    /// JSON backend configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the number of bad ranges
    Count {
        /// File, block device or dax device
        path: PathBuf,
    },

    /// List the bad ranges
    List {
        /// File, block device or dax device
        path: PathBuf,
    },

    /// Clear the given ranges
    Clear {
        /// File, block device or dax device
        path: PathBuf,

        /// Range to clear as OFFSET:LENGTH (decimal or 0x hex), repeatable
        #[arg(long = "range", value_parser = parse_range, required_unless_present = "ranges_file")]
        range: Vec<BadBlockRange>,

        /// JSON file with a bad block list, as printed by `list --json`
        #[arg(long = "ranges", conflicts_with = "range")]
        ranges_file: Option<PathBuf>,
    },

    /// Clear every bad range currently reported
    ClearAll {
        /// File, block device or dax device
        path: PathBuf,
    },

    /// Clear every bad range of a dax device, failing unless all are cleared
    DevdaxClearAll {
        /// Dax device, e.g. /dev/dax0.0
        path: PathBuf,
    },

    /// Show the extents of a file
    Extents {
        /// Regular file
        path: PathBuf,
    },

    /// Report bad ranges of every file under a directory
    Scan {
        /// Directory to walk
        dir: PathBuf,

        /// Follow symbolic links
        #[arg(long)]
        follow_links: bool,
    },
}

/// The backend a command runs against.
enum Selected {
    Platform(&'static Backend),
    Configured(Backend),
}

impl Selected {
    fn get(&self) -> &Backend {
        match self {
            Selected::Platform(backend) => *backend,
            Selected::Configured(backend) => backend,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_format) {
        eprintln!("Error: {:#}", e);
        std::process::exit(2);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let selected = select_backend(cli.config.as_deref())?;
    let backend = selected.get();
    let json = cli.json;

    match cli.command {
        Commands::Count { path } => cmd_count(backend, &path, json),

        Commands::List { path } => cmd_list(backend, &path, json),

        Commands::Clear {
            path,
            range,
            ranges_file,
        } => {
            let list = match ranges_file {
                Some(file) => read_ranges(&file)?,
                None => BadBlocksList::from_ranges(range),
            };
            cmd_clear(backend, &path, &list, json)
        }

        Commands::ClearAll { path } => cmd_clear_all(backend, &path, json),

        Commands::DevdaxClearAll { path } => cmd_devdax_clear_all(backend, &path),

        Commands::Extents { path } => cmd_extents(backend, &path, json),

        Commands::Scan { dir, follow_links } => cmd_scan(backend, &dir, follow_links, json),
    }
}

fn select_backend(config: Option<&Path>) -> Result<Selected> {
    let Some(path) = config else {
        return Ok(Selected::Platform(Backend::platform()));
    };
    let config = BadBlocksConfig::load(path)
        .with_context(|| format!("failed to load configuration {}", path.display()))?;
    configured_backend(config)
}

#[cfg(target_os = "linux")]
fn configured_backend(config: BadBlocksConfig) -> Result<Selected> {
    Ok(Selected::Configured(pmem_badblocks::backend::linux::backend(
        config,
    )?))
}

#[cfg(not(target_os = "linux"))]
fn configured_backend(_config: BadBlocksConfig) -> Result<Selected> {
    tracing::warn!("configuration ignored, no bad block support on this platform");
    Ok(Selected::Platform(Backend::platform()))
}

/// Parse `OFFSET:LENGTH`.
fn parse_range(raw: &str) -> std::result::Result<BadBlockRange, String> {
    let (offset, length) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected OFFSET:LENGTH, got {:?}", raw))?;
    let offset = parse_number(offset)?;
    let length = parse_number(length)?;
    if length == 0 {
        return Err("range length must be greater than 0".to_string());
    }
    if offset.checked_add(length).is_none() {
        return Err(format!("range {:?} overflows", raw));
    }
    Ok(BadBlockRange::new(offset, length))
}

fn parse_number(raw: &str) -> std::result::Result<u64, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", raw, e))
}

fn read_ranges(path: &Path) -> Result<BadBlocksList> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let list: BadBlocksList = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a bad block list", path.display()))?;
    // Re-normalize in case the file was written by hand.
    Ok(BadBlocksList::from_ranges(list.into_iter().collect()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_count(backend: &Backend, path: &Path, json: bool) -> Result<()> {
    let count = backend
        .badblocks_count(path)
        .with_context(|| format!("cannot count bad blocks of {}", path.display()))?;

    if json {
        print_json(&serde_json::json!({ "path": path, "count": count }))
    } else {
        println!("{}", count);
        Ok(())
    }
}

fn cmd_list(backend: &Backend, path: &Path, json: bool) -> Result<()> {
    let list = backend
        .badblocks_get(path)
        .with_context(|| format!("cannot list bad blocks of {}", path.display()))?;

    if json {
        return print_json(&list);
    }

    if list.is_empty() {
        println!("No bad blocks in {}", path.display());
        return Ok(());
    }
    println!(
        "{}: {} bad range(s), {} bytes",
        path.display(),
        list.len(),
        list.total_bytes()
    );
    for range in &list {
        println!("  {:>#18x} {:>12} bytes", range.offset, range.length);
    }
    Ok(())
}

fn cmd_clear(backend: &Backend, path: &Path, list: &BadBlocksList, json: bool) -> Result<()> {
    let report = backend
        .badblocks_clear(path, list)
        .with_context(|| format!("cannot clear bad blocks of {}", path.display()))?;
    print_report(path, &report, json)?;
    report.ensure_complete()?;
    Ok(())
}

fn cmd_clear_all(backend: &Backend, path: &Path, json: bool) -> Result<()> {
    let report = backend
        .badblocks_clear_all(path)
        .with_context(|| format!("cannot clear bad blocks of {}", path.display()))?;
    print_report(path, &report, json)?;
    report.ensure_complete()?;
    Ok(())
}

fn cmd_devdax_clear_all(backend: &Backend, path: &Path) -> Result<()> {
    backend
        .badblocks_devdax_clear_all(path)
        .with_context(|| format!("cannot clear bad blocks of {}", path.display()))?;
    println!("All bad blocks of {} cleared", path.display());
    Ok(())
}

fn print_report(path: &Path, report: &ClearReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }

    if report.is_empty() {
        println!("Nothing to clear in {}", path.display());
        return Ok(());
    }

    println!("Clear Report: {}", path.display());
    for outcome in report.outcomes() {
        let range = &outcome.range;
        match &outcome.status {
            ClearStatus::Cleared => println!("  {}  cleared", range),
            ClearStatus::Partial {
                bytes_cleared,
                cause,
            } => println!(
                "  {}  partial, {} of {} bytes ({})",
                range, bytes_cleared, range.length, cause
            ),
            ClearStatus::Failed { cause } => println!("  {}  failed ({})", range, cause),
            ClearStatus::Skipped => println!("  {}  skipped", range),
        }
    }
    println!();
    println!("  Cleared:        {}", report.cleared());
    println!("  Partial:        {}", report.partial());
    println!("  Failed:         {}", report.failed());
    println!("  Skipped:        {}", report.skipped());
    println!("  Bytes cleared:  {}", report.bytes_cleared());
    Ok(())
}

fn cmd_extents(backend: &Backend, path: &Path, json: bool) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let extents = backend
        .extents_get(&file)
        .with_context(|| format!("cannot read extents of {}", path.display()))?;

    if json {
        return print_json(&extents);
    }

    println!(
        "{}: {} extent(s), block size {}",
        path.display(),
        extents.extents.len(),
        extents.block_size
    );
    println!("  {:>18} {:>18} {:>12}", "file offset", "physical", "length");
    for extent in &extents.extents {
        println!(
            "  {:>#18x} {:>#18x} {:>12}",
            extent.file_offset, extent.physical_offset, extent.length
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct ScanEntry {
    path: PathBuf,
    #[serde(flatten)]
    list: BadBlocksList,
}

fn cmd_scan(backend: &Backend, dir: &Path, follow_links: bool, json: bool) -> Result<()> {
    let mut affected = Vec::new();
    let mut scanned = 0usize;
    let mut errors = 0usize;

    for entry in WalkDir::new(dir).follow_links(follow_links) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        scanned += 1;
        match backend.badblocks_get(entry.path()) {
            Ok(list) if list.is_empty() => {}
            Ok(list) => affected.push(ScanEntry {
                path: entry.into_path(),
                list,
            }),
            // Without platform support no other file will do better.
            Err(e @ pmem_badblocks::Error::Unsupported(_)) => return Err(e.into()),
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "scan failed");
                errors += 1;
            }
        }
    }

    if json {
        return print_json(&serde_json::json!({
            "scanned": scanned,
            "errors": errors,
            "affected": affected,
        }));
    }

    for entry in &affected {
        println!(
            "{}: {} bad range(s), {} bytes",
            entry.path.display(),
            entry.list.len(),
            entry.list.total_bytes()
        );
    }
    println!(
        "Scanned {} file(s): {} with bad blocks, {} error(s)",
        scanned,
        affected.len(),
        errors
    );
    Ok(())
}

//! tieredio CLI: read, copy, and inspect sources through the tiered I/O layer.

mod logging;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tieredio::{
    copy, decide, fs, read, Context, Error, IoConfig, IoManager, OutKind, Output, Source,
    StorageType,
};

#[derive(Parser)]
#[command(name = "tieredio")]
#[command(about = "Move bytes from files or URLs through memory, spill files, or memory maps", long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Configuration layers, lowest priority first: defaults, `TIEREDIO_*`
/// environment, `--config` file, then the flags below.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// JSON file with any subset of the configuration fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory spill files are created under (default: system temp)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Medium for mid-sized payloads: memory or file
    #[arg(long, global = true)]
    storage: Option<String>,

    /// Payloads at or below this many bytes stay in memory
    #[arg(long, global = true)]
    threshold: Option<u64>,

    /// Payloads above this many bytes always spill
    #[arg(long, global = true, conflicts_with = "no_spill_threshold")]
    spill_threshold: Option<u64>,

    /// Remove the size ceiling; only `--storage` decides past the threshold
    #[arg(long, global = true)]
    no_spill_threshold: bool,

    /// Upper bound on bytes reserved up front
    #[arg(long, global = true)]
    max_preallocate: Option<u64>,

    /// Memory-map spilled files on read-back
    #[arg(long, global = true)]
    mmap: bool,

    /// Cap on bytes held in memory at once
    #[arg(long, global = true)]
    memory_limit: Option<u64>,

    /// Give up after this many milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a source to stdout without materializing it
    Read {
        /// File path or http(s) URL
        source: String,
    },

    /// Materialize a source and report where it ended up
    Copy {
        /// File path or http(s) URL
        source: String,

        /// Result representation: bytes, text, or path
        #[arg(long, default_value = "bytes")]
        out: String,

        /// Write the result here instead of stdout (required for `--out path`)
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Show the size hint and the placement the policy would choose
    Stat {
        /// File path or http(s) URL
        source: String,
    },
}

/// On-disk form of [`Overrides`]; unset fields keep the lower layer's value.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    base_dir: Option<PathBuf>,
    storage: Option<StorageType>,
    threshold: Option<u64>,
    spill_threshold: Option<u64>,
    max_preallocate: Option<u64>,
    mmap_enabled: Option<bool>,
    mmap_min_size: Option<u64>,
    memory_limit: Option<u64>,
    chunk_size: Option<usize>,
    checksum: Option<bool>,
}

fn main() {
    logging::set_up_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&cli.overrides)?;
    let timeout = cli.overrides.timeout_ms.map(Duration::from_millis);

    match cli.command {
        Commands::Read { source } => read_source(config, &parse_source(&source), timeout),
        Commands::Copy { source, out, dest } => {
            let kind: OutKind = out.parse()?;
            copy_source(config, &parse_source(&source), kind, dest.as_deref(), timeout)
        }
        Commands::Stat { source } => stat_source(&config, &parse_source(&source)),
    }
}

fn build_config(o: &Overrides) -> Result<IoConfig, Box<dyn std::error::Error>> {
    let mut config = IoConfig::from_env();
    if let Some(path) = &o.config {
        let text = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&text)?;
        apply_config_file(&mut config, &file);
    }
    apply_overrides(&mut config, o)?;
    config.validate()?;
    Ok(config)
}

fn apply_config_file(cfg: &mut IoConfig, doc: &ConfigFile) {
    if let Some(dir) = &doc.base_dir {
        cfg.base_dir = Some(dir.clone());
    }
    if let Some(storage) = doc.storage {
        cfg.storage = storage;
    }
    if let Some(v) = doc.threshold {
        cfg.threshold = v;
    }
    if let Some(v) = doc.spill_threshold {
        cfg.spill_threshold = Some(v);
    }
    if let Some(v) = doc.max_preallocate {
        cfg.max_preallocate = v;
    }
    if let Some(v) = doc.mmap_enabled {
        cfg.mmap_enabled = v;
    }
    if let Some(v) = doc.mmap_min_size {
        cfg.mmap_min_size = v;
    }
    if let Some(v) = doc.memory_limit {
        cfg.memory_limit = Some(v);
    }
    if let Some(v) = doc.chunk_size {
        cfg.chunk_size = v;
    }
    if let Some(v) = doc.checksum {
        cfg.checksum = v;
    }
}

fn apply_overrides(cfg: &mut IoConfig, o: &Overrides) -> Result<(), Error> {
    if let Some(dir) = &o.base_dir {
        cfg.base_dir = Some(dir.clone());
    }
    if let Some(s) = &o.storage {
        cfg.storage = s.parse()?;
    }
    if let Some(v) = o.threshold {
        cfg.threshold = v;
    }
    if let Some(v) = o.spill_threshold {
        cfg.spill_threshold = Some(v);
    }
    if o.no_spill_threshold {
        cfg.spill_threshold = None;
    }
    if let Some(v) = o.max_preallocate {
        cfg.max_preallocate = v;
    }
    if o.mmap {
        cfg.mmap_enabled = true;
    }
    if let Some(v) = o.memory_limit {
        cfg.memory_limit = Some(v);
    }
    Ok(())
}

fn parse_source(s: &str) -> Source {
    let lower = s.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Source::url(s)
    } else {
        Source::path(s)
    }
}

fn with_timeout(ctx: &Context, timeout: Option<Duration>) -> Context {
    match timeout {
        Some(t) => ctx.with_timeout(t),
        None => ctx.clone(),
    }
}

fn read_source(
    config: IoConfig,
    source: &Source,
    timeout: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mgr = IoManager::new(config)?;
    let n = mgr.with_session(|ctx| {
        let ctx = with_timeout(ctx, timeout);
        read(&ctx, source, |r| {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            let n = std::io::copy(r, &mut lock).map_err(Error::from_io_boxed)?;
            lock.flush()?;
            Ok::<_, Error>(n)
        })
    })?;
    mgr.cleanup()?;
    tracing::info!(bytes = n, source = %source, "read complete");
    Ok(())
}

fn copy_source(
    config: IoConfig,
    source: &Source,
    kind: OutKind,
    dest: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    if kind == OutKind::Path && dest.is_none() {
        return Err("--dest is required with --out path (session files are removed on exit)".into());
    }

    let mgr = IoManager::new(config)?;
    let session = mgr.new_session()?;
    let ctx = with_timeout(&Context::background(), timeout).with_session(session.clone());

    let result = copy(&ctx, source, kind).and_then(|output| emit(&output, dest));
    let stats = session.stats();
    session.cleanup()?;
    mgr.cleanup()?;
    let bytes = result?;

    let placement = if stats.spilled > 0 { "spilled to file" } else { "in memory" };
    eprintln!("✓ Copied {} bytes ({})", bytes, placement);
    Ok(())
}

/// Write `output` to `dest` or stdout. Returns the byte count.
fn emit(output: &Output, dest: Option<&Path>) -> Result<u64, Error> {
    match output {
        Output::Bytes(b) => {
            write_out(b, dest)?;
            Ok(b.len() as u64)
        }
        Output::Text(s) => {
            write_out(s.as_bytes(), dest)?;
            Ok(s.len() as u64)
        }
        Output::Path(p) => {
            let Some(dest) = dest else {
                return Err(Error::OutputConversionFailed("no destination".into()));
            };
            fs::copy_file(dest, p)
        }
        Output::Buffer(b) => match dest {
            Some(dest) => b.persist_to(dest),
            None => {
                let bytes = b.bytes()?;
                write_out(&bytes, None)?;
                Ok(bytes.len() as u64)
            }
        },
        _ => Err(Error::OutputConversionFailed("unsupported output".into())),
    }
}

fn write_out(data: &[u8], dest: Option<&Path>) -> Result<(), Error> {
    match dest {
        Some(path) => fs::safe_write(path, data),
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(data)?;
            lock.flush()?;
            Ok(())
        }
    }
}

fn stat_source(config: &IoConfig, source: &Source) -> Result<(), Box<dyn std::error::Error>> {
    let hint = source.size_hint()?;
    let placement = decide(hint, config);

    println!("Source: {} ({})", source, source.kind().as_str());
    match hint {
        Some(n) => println!("  Size: {} bytes ({:.2} MB)", n, n as f64 / 1_048_576.0),
        None => println!("  Size: unknown until read"),
    }
    println!("  Placement: {}", serde_json::to_string(&placement)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_overrides_env_defaults() {
        let mut config = IoConfig::default();
        let doc: ConfigFile = serde_json::from_str(
            r#"{ "storage": "file", "threshold": 10, "spill_threshold": 20, "mmap_enabled": true }"#,
        )
        .unwrap();
        apply_config_file(&mut config, &doc);
        assert_eq!(config.storage, StorageType::File);
        assert_eq!(config.threshold, 10);
        assert_eq!(config.spill_threshold, Some(20));
        assert!(config.mmap_enabled);
        assert_eq!(config.chunk_size, IoConfig::default().chunk_size);
    }

    #[test]
    fn config_file_rejects_unknown_fields() {
        assert!(serde_json::from_str::<ConfigFile>(r#"{ "spill_dir": "/tmp" }"#).is_err());
    }

    #[test]
    fn flags_take_priority_over_config_file() {
        let mut config = IoConfig::default();
        apply_config_file(
            &mut config,
            &ConfigFile {
                threshold: Some(10),
                ..Default::default()
            },
        );
        let flags = Overrides {
            threshold: Some(99),
            storage: Some("disk".into()),
            ..Default::default()
        };
        apply_overrides(&mut config, &flags).unwrap();
        assert_eq!(config.threshold, 99);
        assert_eq!(config.storage, StorageType::File);
    }

    #[test]
    fn no_spill_threshold_flag_clears_ceiling() {
        let mut config = IoConfig::default().with_spill_threshold(4096);
        let cli = Cli::try_parse_from(["tieredio", "--no-spill-threshold", "stat", "x"]).unwrap();
        apply_overrides(&mut config, &cli.overrides).unwrap();
        assert_eq!(config.spill_threshold, None);

        let both = Cli::try_parse_from([
            "tieredio",
            "--spill-threshold",
            "10",
            "--no-spill-threshold",
            "stat",
            "x",
        ]);
        assert!(both.is_err());
    }

    #[test]
    fn urls_and_paths_are_told_apart() {
        assert_eq!(parse_source("HTTPS://x/y").kind().as_str(), "url");
        assert_eq!(parse_source("./data.bin").kind().as_str(), "path");
    }

    #[test]
    fn copy_to_dest_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let dest = dir.path().join("out.txt");
        std::fs::write(&input, b"payload").unwrap();

        let config = IoConfig::new(dir.path().join("spill"), StorageType::File).with_threshold(2);
        copy_source(config, &Source::path(&input), OutKind::Path, Some(&dest), None).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        assert_eq!(std::fs::read_dir(dir.path().join("spill")).unwrap().count(), 0);
    }

    #[test]
    fn path_output_requires_dest() {
        let dir = tempfile::tempdir().unwrap();
        let config = IoConfig::new(dir.path(), StorageType::Memory);
        let err = copy_source(config, &Source::from_static(b"x"), OutKind::Path, None, None)
            .unwrap_err();
        assert!(err.to_string().contains("--dest"));
    }
}

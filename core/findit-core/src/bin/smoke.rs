use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use findit_core::{
    get_stats, index_path, list_system_mounts, register_mount_point, search, CrawlOutcome,
    FileTypeFilter, SearchQuery, SearchTarget, Session, SessionSettings,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_STORE: &str = "/tmp/findit-smoke/fileindex.db";
const DEFAULT_LIMIT: usize = 50;
const BENCH_RUNS: usize = 5;

#[derive(Debug)]
struct Args {
    store: PathBuf,
    roots: Vec<PathBuf>,
    queries: Vec<String>,
    regex: bool,
    match_case: bool,
    search_path: bool,
    file_type: FileTypeFilter,
    limit: usize,
    batch_size: usize,
    reindex: bool,
    list_mounts: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            store: PathBuf::from(DEFAULT_STORE),
            roots: Vec::new(),
            queries: Vec::new(),
            regex: false,
            match_case: false,
            search_path: false,
            file_type: FileTypeFilter::All,
            limit: DEFAULT_LIMIT,
            batch_size: SessionSettings::default().batch_size,
            reindex: false,
            list_mounts: false,
        }
    }
}

impl Args {
    fn parse() -> Result<Self, String> {
        let mut args = env::args_os();
        let _program = args.next();
        let mut config = Args::default();

        while let Some(arg) = args.next() {
            let arg_str = arg.to_string_lossy();
            match arg_str.as_ref() {
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                "--store" => {
                    let value = next_value(&mut args, "--store")?;
                    config.store = PathBuf::from(value);
                }
                "--root" => {
                    let value = next_value(&mut args, "--root")?;
                    config.roots.push(PathBuf::from(value));
                }
                "--q" => {
                    let value = next_value(&mut args, "--q")?;
                    config.queries.push(value.to_string_lossy().to_string());
                }
                "--regex" => config.regex = true,
                "--case" => config.match_case = true,
                "--path" => config.search_path = true,
                "--type" => {
                    let value = next_value(&mut args, "--type")?;
                    config.file_type = parse_file_type(&value.to_string_lossy())?;
                }
                "--limit" => {
                    let value = next_value(&mut args, "--limit")?;
                    config.limit = parse_usize(&value, "--limit")?;
                }
                "--batch" => {
                    let value = next_value(&mut args, "--batch")?;
                    config.batch_size = parse_usize(&value, "--batch")?;
                }
                "--reindex" => config.reindex = true,
                "--mounts" => config.list_mounts = true,
                unknown => {
                    return Err(format!("unknown argument: {}", unknown));
                }
            }
        }

        if config.roots.is_empty() && config.queries.is_empty() && !config.list_mounts {
            return Err("provide at least one of --root, --q or --mounts".into());
        }

        if config.batch_size == 0 {
            return Err("--batch must be greater than 0".into());
        }

        Ok(config)
    }
}

fn next_value(args: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<OsString, String> {
    args.next()
        .ok_or_else(|| format!("missing value for {}", flag))
}

fn parse_usize(value: &OsString, flag: &str) -> Result<usize, String> {
    value
        .to_string_lossy()
        .parse::<usize>()
        .map_err(|_| format!("{} expects an integer", flag))
}

fn parse_file_type(value: &str) -> Result<FileTypeFilter, String> {
    match value.to_lowercase().as_str() {
        "all" => Ok(FileTypeFilter::All),
        "files" => Ok(FileTypeFilter::Files),
        "folders" => Ok(FileTypeFilter::Folders),
        other => Err(format!("invalid type: {}", other)),
    }
}

fn print_usage() {
    eprintln!("findit-core smoke test");
    eprintln!("\nUsage:");
    eprintln!("  cargo run -p findit-core --bin smoke -- --root <path> [options]\n");
    eprintln!("Options:");
    eprintln!("  --store <path>            Store file (default: /tmp/findit-smoke/fileindex.db)");
    eprintln!("  --root <path>             Root folder to index (repeatable)");
    eprintln!("  --q <query>               Query to benchmark (repeatable)");
    eprintln!("  --regex                   Treat queries as regular expressions");
    eprintln!("  --case                    Match case");
    eprintln!("  --path                    Match against full paths instead of filenames");
    eprintln!("  --type <all|files|folders>  Restrict result kind (default all)");
    eprintln!("  --limit <N>               Max hits per query (default 50)");
    eprintln!("  --batch <N>               Entries per crawl batch (default 10000)");
    eprintln!("  --reindex                 Remove the store before indexing");
    eprintln!("  --mounts                  List disk mounts available for indexing");
    eprintln!("  --help                    Show this message");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse().unwrap_or_else(|err| {
        eprintln!("error: {err}");
        eprintln!("Use --help to see available options.");
        std::process::exit(1);
    });

    run(args)
}

fn run(args: Args) -> Result<()> {
    if args.list_mounts {
        for mount in list_system_mounts() {
            println!("[MOUNT] {} on {} ({})", mount.device, mount.path, mount.filesystem);
        }
    }

    if args.reindex && args.store.exists() {
        println!("[INFO] removing existing store {}", args.store.display());
        for suffix in ["", "-wal", "-shm"] {
            let mut file = args.store.clone().into_os_string();
            file.push(suffix);
            let file = PathBuf::from(file);
            if file.exists() {
                fs::remove_file(&file)
                    .with_context(|| format!("failed to remove {}", file.display()))?;
            }
        }
    }

    let settings = SessionSettings {
        batch_size: args.batch_size,
        ..SessionSettings::default()
    };
    let session = Session::create_with_settings(&args.store, settings)
        .with_context(|| format!("failed to open store {}", args.store.display()))?;

    println!(
        "[CONFIG] store={} batch={} limit={} regex={} case={} path={} type={:?}",
        args.store.display(),
        args.batch_size,
        args.limit,
        args.regex,
        args.match_case,
        args.search_path,
        args.file_type
    );

    for root in &args.roots {
        let root_str = root.to_string_lossy();
        register_mount_point(&session, &root_str, "")?;

        let crawl_start = Instant::now();
        let outcome = index_path(&session, root, |count, path| {
            println!("[PROGRESS] {count} files ... {path}");
        });
        let elapsed = crawl_start.elapsed();

        match outcome {
            CrawlOutcome::Completed { indexed } => println!(
                "[INFO] indexed {} files from {} ({} s)",
                indexed,
                root.display(),
                format_seconds(elapsed)
            ),
            CrawlOutcome::Cancelled { indexed } => println!(
                "[WARN] indexing of {} cancelled after {} files",
                root.display(),
                indexed
            ),
            CrawlOutcome::Failed { error } => {
                bail!("indexing {} failed: {error}", root.display())
            }
        }
    }

    let stats = get_stats(&session)?;
    println!(
        "[INFO] files={} directories={} total_size={}KB",
        stats.file_count,
        stats.dir_count,
        stats.total_size_bytes / 1024
    );

    if args.queries.is_empty() {
        return session.close().context("failed to close store");
    }

    println!("[INFO] running query benchmarks (limit {})", args.limit);
    for term in &args.queries {
        let query = SearchQuery {
            term: term.clone(),
            match_case: args.match_case,
            regex: args.regex,
            target: if args.search_path {
                SearchTarget::Path
            } else {
                SearchTarget::Name
            },
            file_type: args.file_type,
            limit: args.limit,
        };

        let mut durations = Vec::with_capacity(BENCH_RUNS);
        let mut last_results = Vec::new();

        for _ in 0..BENCH_RUNS {
            let query_start = Instant::now();
            let results = search(&session, &query)
                .with_context(|| format!("query \"{}\" failed", term))?;
            durations.push(query_start.elapsed());
            last_results = results;
        }

        let p50 = percentile(&durations, 0.50);
        let p95 = percentile(&durations, 0.95);

        println!(
            "query=\"{}\" hits={} p50={}ms p95={}ms",
            term,
            last_results.len(),
            p50,
            p95
        );

        for hit in last_results.iter().take(5) {
            let marker = if hit.is_directory { "/" } else { "" };
            println!("  • {}{} — {}", hit.filename, marker, hit.path);
        }
    }

    session.close().context("failed to close store")
}

fn percentile(durations: &[Duration], percentile: f64) -> u128 {
    if durations.is_empty() {
        return 0;
    }
    let mut samples: Vec<u128> = durations.iter().map(|d| d.as_micros()).collect();
    samples.sort_unstable();
    let rank = percentile.clamp(0.0, 1.0) * (samples.len() as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return samples[lower] / 1000;
    }
    let weight = rank - lower as f64;
    let interpolated = samples[lower] as f64 * (1.0 - weight) + samples[upper] as f64 * weight;
    (interpolated / 1000.0) as u128
}

fn format_seconds(duration: Duration) -> String {
    format!("{:.2}", duration.as_secs_f64())
}

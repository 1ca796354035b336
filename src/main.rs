// ─────────────────────────────────────────────────────────────────────────────
//  anvil  —  incremental build driver for Arduino-framework sketches
//
//  USAGE
//  ─────
//    anvil compile --fqbn arduino:avr:uno --sketch Blink.ino --sdk ~/.arduino15 --build-dir build/.cache
//    anvil clean    --build-dir build/.cache
//    anvil cache stats --cache-root ~/.cache/anvil
//    anvil cache clear --cache-root ~/.cache/anvil --max-age-days 30
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use anvil_core::cache::ObjectCache;
use anvil_core::config_file::ProjectConfig;
use anvil_core::driver::{compile, CompileRequest};
use anvil_core::error::{BuilderError, Result};

#[derive(Parser)]
#[command(
    name = "anvil",
    version = env!("CARGO_PKG_VERSION"),
    about = "Incremental build driver for Arduino-framework sketches",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Raise log verbosity to debug
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Append logs to this file in addition to stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Compile a sketch to firmware
    Compile(CompileArgs),
    /// Remove a build directory's generated artifacts
    Clean(CleanArgs),
    /// Inspect or maintain the object cache
    Cache(CacheArgs),
}

#[derive(Args)]
struct CompileArgs {
    /// Fully-qualified board name, e.g. arduino:avr:uno
    #[arg(long)]
    board: Option<String>,

    /// Path to the sketch's .ino file
    sketch: Option<PathBuf>,

    /// Root of the installed board SDK (core + variants + platform.txt)
    #[arg(long)]
    sdk_path: Option<PathBuf>,

    /// Root directory holding installed tool versions
    #[arg(long)]
    tools_path: Option<PathBuf>,

    /// Directory for intermediate and final build artifacts
    #[arg(long)]
    build_path: Option<PathBuf>,

    /// Extra library search directories
    #[arg(long, value_delimiter = ',')]
    libraries_path: Vec<PathBuf>,

    /// Build property overrides, "key=value" (repeatable)
    #[arg(long = "build-property", value_parser = parse_key_value)]
    build_property: Vec<(String, String)>,

    /// Board menu option overrides, "key=value" (repeatable)
    #[arg(long = "board-options", value_parser = parse_key_value)]
    board_options: Vec<(String, String)>,

    /// Tool version pins, "tool=version" (repeatable)
    #[arg(long = "tool-versions", value_parser = parse_key_value)]
    tool_versions: Vec<(String, String)>,

    /// Object cache root; omit to disable caching
    #[arg(long)]
    cache_root: Option<PathBuf>,

    /// Parallel compile jobs (0 = autodetect)
    #[arg(long, default_value_t = 0)]
    jobs: usize,

    /// Path to the ninja-compatible build executor
    #[arg(long, default_value = "ninja")]
    executor: PathBuf,
}

#[derive(Args)]
struct CleanArgs {
    /// Directory to remove
    build_dir: PathBuf,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCmd,

    /// Object cache root
    #[arg(long, global = true)]
    cache_root: PathBuf,
}

#[derive(Subcommand)]
enum CacheCmd {
    /// Print cache entry count, total size, and hit-path breakdown
    Stats,
    /// Sweep entries older than `older_than` days, restricted to keys
    /// containing `pattern`; `--all` ignores age and sweeps everything
    Clear {
        #[arg(long)]
        all: bool,
        #[arg(long)]
        older_than: Option<u64>,
        #[arg(long)]
        pattern: Option<String>,
    },
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    init_logging(cli.verbose, cli.log_file.as_deref());

    let result = match cli.command {
        Cmd::Compile(args) => cmd_compile(args),
        Cmd::Clean(args) => cmd_clean(args),
        Cmd::Cache(args) => cmd_cache(args),
    };

    if let Err(e) = result {
        render_builder_error(&e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, log_file: Option<&std::path::Path>) {
    let level = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    if let Some(path) = log_file {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
    }
    builder.init();
}

fn cmd_compile(args: CompileArgs) -> Result<()> {
    let project_dir = args
        .sketch
        .as_ref()
        .and_then(|s| s.parent())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let project = ProjectConfig::load(&project_dir)?;

    let fqbn = args
        .board
        .or(project.fqbn)
        .ok_or_else(|| BuilderError::Other("--board is required (or set it in builder.toml)".to_string()))?;
    let sketch_path = args
        .sketch
        .ok_or_else(|| BuilderError::Other("a sketch path is required".to_string()))?;
    let sdk_path = args
        .sdk_path
        .or(project.sdk_path)
        .ok_or_else(|| BuilderError::Other("--sdk-path is required (or set it in builder.toml)".to_string()))?;
    let build_path = args.build_path.or(project.build_path).unwrap_or_else(|| PathBuf::from("build"));
    let tools_path = args.tools_path;

    let mut libraries_path = args.libraries_path;
    libraries_path.extend(project.libraries);

    let mut overrides = args.build_property;
    overrides.extend(project.overrides_as_pairs());

    let mut board_options = args.board_options;
    board_options.extend(project.board_options_as_pairs());

    let tool_versions: std::collections::BTreeMap<String, String> = args.tool_versions.into_iter().collect();

    let cache_root = args.cache_root.or(project.cache_root);
    let jobs = if args.jobs != 0 { args.jobs } else { project.jobs.unwrap_or(0) };
    let executor_path = if args.executor != PathBuf::from("ninja") {
        args.executor
    } else {
        project.executor_path.unwrap_or(args.executor)
    };

    println!(
        "{} {} {}",
        "Compiling".cyan().bold(),
        format!("[board: {fqbn}]").dimmed(),
        format!("[{}]", sketch_path.display()).dimmed(),
    );
    println!("{}", "─".repeat(60).dimmed());

    let req = CompileRequest {
        fqbn,
        sdk_path,
        sketch_path,
        build_path,
        libraries_path,
        overrides,
        board_options,
        tool_versions,
        tools_path,
        cache_root,
        jobs,
        executor_path,
    };

    let t0 = Instant::now();
    let result = compile(&req)?;
    let elapsed = t0.elapsed();

    println!("{} compiled in {:.2}s", "✓".green().bold(), elapsed.as_secs_f64());
    if let Some(out) = &result.out_file_path {
        println!("  {} {}", "output:".dimmed(), out.display());
    }
    if let Some(size) = &result.size {
        println!(
            "  {} program {} bytes, data {} bytes",
            "size:".dimmed(),
            size.program_bytes,
            size.data_bytes
        );
    }
    for w in &result.warnings {
        println!("  {} {}", "warning:".yellow(), w);
    }

    Ok(())
}

fn cmd_clean(args: CleanArgs) -> Result<()> {
    if args.build_dir.exists() {
        std::fs::remove_dir_all(&args.build_dir)?;
        println!("{} removed {}", "✓".green().bold(), args.build_dir.display());
    } else {
        println!("{} nothing to clean at {}", "!".yellow(), args.build_dir.display());
    }
    Ok(())
}

fn cmd_cache(args: CacheArgs) -> Result<()> {
    let cache = ObjectCache::new(args.cache_root.clone());
    match args.command {
        CacheCmd::Stats => {
            let stats = cache.stats();
            println!("{:<12} {}", "entries:", stats.count);
            println!("{:<12} {:.2} MiB", "size:", stats.bytes as f64 / (1024.0 * 1024.0));
            println!("{:<12} {}", "hardlinks:", stats.hard_links);
            println!("{:<12} {}", "copies:", stats.copies);
        }
        CacheCmd::Clear { all, older_than, pattern } => {
            let max_age_days = if all { None } else { older_than };
            let removed = cache.sweep(max_age_days, pattern.as_deref())?;
            println!("{} removed {removed} cache entries", "✓".green().bold());
        }
    }
    Ok(())
}

fn render_builder_error(e: &BuilderError) {
    eprintln!("\n{} {}", "BuildError".red().bold(), "build failed");
    eprintln!("{}", "─".repeat(60).dimmed());

    match e {
        BuilderError::Build { output, .. } | BuilderError::Hook { output, .. } => {
            for line in output.lines() {
                if line.to_lowercase().contains("error") {
                    eprintln!("  {}", line.red());
                } else if line.to_lowercase().contains("warning") {
                    eprintln!("  {}", line.yellow());
                } else if !line.trim().is_empty() {
                    eprintln!("  {}", line.dimmed());
                }
            }
        }
        BuilderError::DescriptorMissing { what, sdk_path } => {
            eprintln!("  {} could not find '{}' under SDK path", "✗".red(), what);
            eprintln!("  expected at: {}", sdk_path.yellow());
        }
        BuilderError::UnknownBoard(id) => {
            eprintln!("  {} unknown board '{}': no matching entry in boards.txt", "✗".red(), id);
        }
        _ => eprintln!("  {e}"),
    }

    eprintln!("{}", "─".repeat(60).dimmed());
}

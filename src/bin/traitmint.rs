use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use traitmint::{
    Catalog, DirSink, DirSource, GenerateConfig, Generator, LayerStore,
    MissingAssetPolicy, ResizeFilter, SelectionMode, UniquenessPolicy,
};

#[derive(Parser, Debug)]
#[command(name = "traitmint", version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate images and metadata from a trait catalog.
    Generate(GenerateArgs),
    /// Print how many distinct trait combinations a catalog yields.
    Capacity(CapacityArgs),
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Trait catalog JSON.
    #[arg(long)]
    catalog: PathBuf,

    /// Root directory that layer references are resolved against.
    /// Defaults to the catalog's directory.
    #[arg(long)]
    traits: Option<PathBuf>,

    /// Output directory for `<id>.png` and `<id>.json`.
    #[arg(long)]
    out: PathBuf,

    /// Optional run config JSON; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of outputs.
    #[arg(long)]
    count: Option<u64>,

    /// Canvas width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Canvas height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// RNG seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// How draws are chosen.
    #[arg(long, value_enum)]
    mode: Option<ModeChoice>,

    /// Allow the same trait combination more than once.
    #[arg(long, default_value_t = false)]
    allow_duplicates: bool,

    /// Skip tokens whose layers are missing instead of aborting.
    #[arg(long, default_value_t = false)]
    skip_missing: bool,

    /// Resampling filter used to fit layers to the canvas.
    #[arg(long, value_enum)]
    filter: Option<FilterChoice>,

    /// Record name prefix ("<prefix> #<id>").
    #[arg(long)]
    name_prefix: Option<String>,

    /// Composite outputs in parallel.
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Override rayon worker threads (parallel mode only).
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Parser, Debug)]
struct CapacityArgs {
    /// Trait catalog JSON.
    #[arg(long)]
    catalog: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeChoice {
    Weighted,
    Exhaustive,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FilterChoice {
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Command::Generate(args) => cmd_generate(args),
        Command::Capacity(args) => cmd_capacity(args),
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn build_config(args: &GenerateArgs) -> anyhow::Result<GenerateConfig> {
    let mut cfg = match &args.config {
        Some(path) => GenerateConfig::from_path(path)?,
        None => GenerateConfig::default(),
    };

    if let Some(count) = args.count {
        cfg.count = count;
    }
    if let Some(width) = args.width {
        cfg.canvas.width = width;
    }
    if let Some(height) = args.height {
        cfg.canvas.height = height;
    }
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }
    if let Some(mode) = args.mode {
        cfg.selection = match mode {
            ModeChoice::Weighted => SelectionMode::WeightedRandom,
            ModeChoice::Exhaustive => SelectionMode::Exhaustive,
        };
    }
    if args.allow_duplicates {
        cfg.uniqueness = UniquenessPolicy::None;
    }
    if args.skip_missing {
        cfg.on_missing_asset = MissingAssetPolicy::Skip;
    }
    if let Some(filter) = args.filter {
        cfg.resize_filter = match filter {
            FilterChoice::Nearest => ResizeFilter::Nearest,
            FilterChoice::Triangle => ResizeFilter::Triangle,
            FilterChoice::CatmullRom => ResizeFilter::CatmullRom,
            FilterChoice::Gaussian => ResizeFilter::Gaussian,
            FilterChoice::Lanczos3 => ResizeFilter::Lanczos3,
        };
    }
    if args.name_prefix.is_some() {
        cfg.name_prefix = args.name_prefix.clone();
    }
    if args.parallel {
        cfg.parallel = true;
    }
    if args.threads.is_some() {
        cfg.threads = args.threads;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn cmd_generate(args: GenerateArgs) -> anyhow::Result<()> {
    let catalog = Catalog::from_path(&args.catalog)
        .with_context(|| format!("load catalog '{}'", args.catalog.display()))?;
    let cfg = build_config(&args)?;

    let traits_root = match &args.traits {
        Some(root) => root.clone(),
        None => args
            .catalog
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf(),
    };
    let store = LayerStore::new(DirSource::new(traits_root), cfg.canvas, cfg.resize_filter);

    let generator = Generator::new(catalog, cfg)?;
    let mut sink = DirSink::new(&args.out);
    let report = generator.run(&store, &mut sink)?;

    eprintln!(
        "generated {} outputs into {} ({} draws, {} duplicates rejected)",
        report.produced,
        args.out.display(),
        report.attempts,
        report.duplicates_rejected
    );
    for skipped in &report.skipped {
        eprintln!(
            "  skipped token #{}: {}/{}: {}",
            skipped.token, skipped.category, skipped.option, skipped.reason
        );
    }
    Ok(())
}

fn cmd_capacity(args: CapacityArgs) -> anyhow::Result<()> {
    let catalog = Catalog::from_path(&args.catalog)
        .with_context(|| format!("load catalog '{}'", args.catalog.display()))?;
    println!("{}", catalog.capacity());
    Ok(())
}

//! 树状结构追踪命令行程序.
//!
//! ```text
//! ant-tracer trace <IMAGE> <SEEDS> [COST] [SOMA] [--candidates FILE] [--config FILE] [--pad N]
//! ant-tracer batch <MANIFEST> [--config FILE] [--threads N]
//! ```
//!
//! 输出目录默认为图像所在目录, 可由环境变量 `$ANT_OUTPUT_DIR` 覆盖.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use simple_logger::SimpleLogger;

use trace_berry::tracer::{trace_batch, TraceJob};
use trace_berry::TraceConfig;
use utils::loader;

/// Minimum-cost front propagation tracer for 3D fluorescence volumes.
#[derive(Parser, Debug)]
#[command(name = "ant-tracer", version)]
struct Cli {
    /// Print per-node debug logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trace one volume.
    Trace(TraceArgs),
    /// Trace every volume listed in a manifest, in parallel.
    Batch(BatchArgs),
}

/// Options shared by both subcommands.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON file with tracing parameters.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of replicated slices padded on each z end.
    #[arg(long)]
    pad: Option<usize>,

    /// Scale new branch costs by their turning angle.
    #[arg(long)]
    turn_penalty: bool,
}

impl ConfigArgs {
    fn load(&self) -> Result<TraceConfig> {
        let mut config = match &self.config {
            Some(path) => TraceConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => TraceConfig::default(),
        };
        if let Some(pad) = self.pad {
            config = config.with_pad(pad);
        }
        if self.turn_penalty {
            config = config.with_turn_penalty(true);
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct TraceArgs {
    /// Input volume (.npy, .nii, .nii.gz).
    image: PathBuf,

    /// Start points, one `x y z` per line.
    seeds: PathBuf,

    /// Growth stops once the popped cost exceeds this value.
    cost: Option<f32>,

    /// Soma mask with the same shape as the input volume.
    soma: Option<PathBuf>,

    /// Candidate points `x y z [saliency]`; detected on the volume when absent.
    #[arg(long)]
    candidates: Option<PathBuf>,

    /// Output file stem; defaults to `<dir>/<image>_ANT`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Manifest, one `image seeds [soma]` per line.
    manifest: PathBuf,

    /// Worker threads; defaults to all available cores.
    #[arg(long)]
    threads: Option<usize>,

    #[command(flatten)]
    config: ConfigArgs,
}

fn trace(args: TraceArgs) -> Result<()> {
    let mut config = args.config.load()?;
    if let Some(cost) = args.cost {
        config = config.with_cost_threshold(cost);
    }
    let job = TraceJob {
        output_stem: args
            .output
            .unwrap_or_else(|| loader::output_stem(&args.image)),
        seeds: args.seeds,
        candidates: args.candidates,
        soma: args.soma,
        config,
        image: args.image,
    };
    let files = job
        .run()
        .with_context(|| format!("tracing {}", job.image.display()))?;
    for f in files {
        println!("{}", f.display());
    }
    Ok(())
}

fn batch(args: BatchArgs) -> Result<bool> {
    let config = args.config.load()?;
    let jobs = loader::read_manifest(&args.manifest, &config)
        .with_context(|| format!("reading manifest {}", args.manifest.display()))?;
    let threads = args.threads.unwrap_or_else(utils::cpus).max(1);
    log::info!("{} job(s) on {} thread(s)", jobs.len(), threads);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("building thread pool")?;
    let results = pool.install(|| trace_batch(&jobs));

    utils::sep();
    let mut ok = true;
    for (job, res) in jobs.iter().zip(results) {
        match res {
            Ok(files) => println!("{}: {} file(s)", job.image.display(), files.len()),
            Err(e) => {
                ok = false;
                println!("{}: FAILED ({e})", job.image.display());
            }
        }
    }
    utils::sep();
    Ok(ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("failed to initialise logger: {e}");
    }

    let res = match cli.command {
        Command::Trace(args) => trace(args).map(|_| true),
        Command::Batch(args) => batch(args),
    };
    match res {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

//! `bwtest`: copy bandwidth benchmark between memory pools.

use anyhow::{Context, Result};
use bwtest_cli::{Report, ReportFormat, TransactionBuilder, TransactionRequest, write_topology};
use bwtest_common::exit::{EXIT_CONFIG_FAIL, EXIT_GENERIC_FAIL, EXIT_SUCCESS};
use bwtest_common::{BenchConfig, ConfigError};
use bwtest_core::{BenchmarkDriver, Progress};
use bwtest_hsa::{AccessMode, PoolId, SimRuntime, Topology, TopologyError};
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "bwtest")]
#[command(about = "Measure copy bandwidth between memory pools of a heterogeneous system")]
#[command(version)]
struct Cli {
    /// Source pools for unidirectional copies
    #[arg(short = 's', long = "src", value_delimiter = ',', value_name = "POOLS")]
    src: Vec<PoolId>,

    /// Destination pools for unidirectional copies
    #[arg(short = 'd', long = "dst", value_delimiter = ',', value_name = "POOLS")]
    dst: Vec<PoolId>,

    /// Pools copied pairwise in both directions at once
    #[arg(short = 'b', long = "bidir", value_delimiter = ',', value_name = "POOLS")]
    bidir: Vec<PoolId>,

    /// Unidirectional copies between every reachable pool pair
    #[arg(short = 'a', long)]
    all_unidir: bool,

    /// Bidirectional copies between every reachable pool pair
    #[arg(short = 'A', long)]
    all_bidir: bool,

    /// Pools read into host memory
    #[arg(short = 'r', long, value_delimiter = ',', value_name = "POOLS")]
    read: Vec<PoolId>,

    /// Pools written from host memory
    #[arg(short = 'w', long, value_delimiter = ',', value_name = "POOLS")]
    write: Vec<PoolId>,

    /// Check copied data against the seed (single iteration per size)
    #[arg(short = 'v', long)]
    validate: bool,

    /// Report wall-clock time only
    #[arg(short = 'c', long)]
    cpu_time_only: bool,

    /// Base iteration count per size
    #[arg(short = 'i', long, value_name = "N")]
    iterations: Option<u32>,

    /// Custom size sweep in bytes, ascending
    #[arg(long, value_delimiter = ',', value_name = "BYTES")]
    sizes: Option<Vec<usize>>,

    /// Block on copy completion instead of spinning
    #[arg(long)]
    blocking: bool,

    /// Skip fine-grained memory pools
    #[arg(long)]
    skip_fine_grained: bool,

    /// Topology description (TOML)
    #[arg(short = 't', long, value_name = "PATH", conflicts_with = "preset")]
    topology: Option<PathBuf>,

    /// Built-in topology to simulate
    #[arg(long, value_enum, default_value_t = Preset::SingleGpu)]
    preset: Preset,

    /// Benchmark configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    /// Suppress per-iteration progress tokens
    #[arg(long)]
    no_progress: bool,

    /// Print the topology and exit
    #[arg(long)]
    list: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Preset {
    SingleGpu,
    DualGpu,
    DualGpuIndirect,
}

impl Preset {
    fn topology(self) -> Topology {
        match self {
            Self::SingleGpu => Topology::single_gpu(),
            Self::DualGpu => Topology::dual_gpu(AccessMode::Direct),
            Self::DualGpuIndirect => Topology::dual_gpu(AccessMode::IndirectViaHost),
        }
    }
}

impl Cli {
    fn request(&self) -> TransactionRequest {
        TransactionRequest {
            unidir_src: self.src.clone(),
            unidir_dst: self.dst.clone(),
            bidir: self.bidir.clone(),
            all_unidir: self.all_unidir,
            all_bidir: self.all_bidir,
            read: self.read.clone(),
            write: self.write.clone(),
        }
    }

    /// File or environment configuration with command-line flags on top.
    fn bench_config(&self) -> Result<BenchConfig> {
        let mut cfg = match &self.config {
            Some(path) => BenchConfig::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => BenchConfig::from_env().context("Invalid environment configuration")?,
        };
        cfg.validate |= self.validate;
        cfg.blocking_wait |= self.blocking;
        cfg.skip_fine_grained |= self.skip_fine_grained;
        if self.cpu_time_only {
            cfg.report_device_time = false;
        }
        if let Some(n) = self.iterations {
            cfg.iterations = n;
        }
        if let Some(sizes) = &self.sizes {
            cfg.sizes = Some(sizes.clone());
        }
        if self.no_progress || self.format != ReportFormat::Text {
            cfg.progress = false;
        }
        cfg.validate_fields().context("Invalid benchmark configuration")?;
        Ok(cfg)
    }

    fn topology(&self) -> Result<Topology> {
        match &self.topology {
            Some(path) => Topology::load(path)
                .with_context(|| format!("Failed to load topology: {}", path.display())),
            None => Ok(self.preset.topology()),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            let mut source = e.source();
            while let Some(err) = source {
                error!("  Caused by: {}", err);
                source = err.source();
            }
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn setup_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Configuration, topology and selection problems exit with the config code.
fn exit_code_for(e: &anyhow::Error) -> i32 {
    let config_problem = e.chain().any(|c| {
        c.is::<ConfigError>() || c.is::<TopologyError>() || c.is::<bwtest_cli::BuildError>()
    });
    if config_problem { EXIT_CONFIG_FAIL } else { EXIT_GENERIC_FAIL }
}

fn run(cli: &Cli) -> Result<i32> {
    let topology = cli.topology()?;

    if cli.list {
        write_topology(&topology, &mut std::io::stdout().lock())?;
        return Ok(EXIT_SUCCESS);
    }

    let config = cli.bench_config()?;
    debug!(?config, "benchmark configuration");

    let mut transactions = TransactionBuilder::new(&topology, config.skip_fine_grained)
        .build(&cli.request().or_default_run(config.default_run))
        .context("Invalid transaction selection")?;
    info!(transactions = transactions.len(), "starting benchmark");

    let progress = if config.progress { Progress::stdout() } else { Progress::disabled() };
    let runtime = SimRuntime::new(topology).context("Failed to start runtime")?;
    let mut driver = BenchmarkDriver::new(&runtime, config, progress);
    let summary = driver.run(&mut transactions).context("Benchmark failed")?;

    let mut stdout = std::io::stdout().lock();
    Report::new(summary, &transactions).write(cli.format, &mut stdout)?;
    stdout.flush()?;
    Ok(summary.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn pool_lists_are_comma_delimited() {
        let cli = Cli::parse_from(["bwtest", "-s", "0,2", "-d", "2", "-v"]);
        let req = cli.request();
        assert_eq!(req.unidir_src, vec![0, 2]);
        assert_eq!(req.unidir_dst, vec![2]);
        assert!(cli.validate);
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "bwtest",
            "-a",
            "-c",
            "-i",
            "3",
            "--sizes",
            "1024,4096",
            "--format",
            "json",
        ]);
        let cfg = cli.bench_config().unwrap();
        assert!(!cfg.report_device_time);
        assert_eq!(cfg.iterations, 3);
        assert_eq!(cfg.sizes, Some(vec![1024, 4096]));
        assert!(!cfg.progress);
    }

    #[test]
    fn unsorted_sizes_are_a_config_failure() {
        let cli = Cli::parse_from(["bwtest", "-a", "--sizes", "4096,1024"]);
        let err = cli.bench_config().unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_FAIL);
    }

    #[test]
    fn unreachable_selection_is_a_config_failure() {
        let cli = Cli::parse_from(["bwtest", "--preset", "dual-gpu", "-s", "2", "-d", "3"]);
        let topology = cli.topology().unwrap();
        let err = TransactionBuilder::new(&topology, false)
            .build(&cli.request())
            .context("Invalid transaction selection")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_FAIL);
    }

    #[test]
    fn topology_and_preset_conflict() {
        assert!(Cli::try_parse_from(["bwtest", "-t", "x.toml", "--preset", "dual-gpu"]).is_err());
    }
}

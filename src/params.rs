use crate::distance::DistanceMetric;
use crate::error::{PipelineError, Result};
use crate::kmer::{ShortSeqPolicy, MAX_K};
use crate::mcl::MclConfig;
use crate::output::OutputLayout;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

/// Name of the run directory created below `--output`.
pub const RUN_DIR_NAME: &str = "vegeta";

/// Edges weaker than this are dropped before clustering.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.5;

#[derive(Parser)]
#[command(
    name = "vegeta",
    version,
    about = "Cluster viral genomes into clades and pick one centroid per clade"
)]
pub struct Cli {
    /// Print debug messages (RUST_LOG overrides)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cluster sequences and extract per-cluster centroids
    Cluster {
        /// Input sequences (FASTA/FASTQ, optionally gzipped)
        input: PathBuf,

        /// Single-record file with a genome of interest to pin in the clustering
        genome_of_interest: Option<PathBuf>,

        /// Output directory; results go to <DIR>/vegeta
        #[arg(short = 'o', long = "output", default_value = ".")]
        output: PathBuf,

        /// K-mer length (1-32)
        #[arg(short = 'k', long = "kmer", default_value = "8")]
        k: usize,

        /// Number of threads
        #[arg(short = 't', long = "threads", default_value = "1")]
        threads: usize,

        /// Distance between k-mer profiles
        #[arg(long = "metric", value_enum, default_value = "cosine")]
        metric: DistanceMetric,

        /// Drop graph edges with similarity below this value
        #[arg(long = "min-similarity", default_value_t = DEFAULT_MIN_SIMILARITY)]
        min_similarity: f64,

        /// MCL inflation
        #[arg(short = 'I', long = "inflation", default_value = "2.0")]
        inflation: f64,

        /// MCL expansion power
        #[arg(long = "expansion", default_value = "2")]
        expansion: u32,

        /// MCL iteration cap
        #[arg(long = "max-iterations", default_value = "100")]
        max_iterations: usize,

        /// What to do with sequences that yield no k-mer
        #[arg(long = "short-seqs", value_enum, default_value = "skip")]
        short_seqs: ShortSeqPolicy,

        /// Run the external `mcl` binary instead of the built-in solver
        #[arg(long = "external-mcl")]
        external_mcl: bool,

        /// Also write the pairwise distance matrix
        #[arg(long = "write-distances")]
        write_distances: bool,

        /// Reuse a distance matrix written by --write-distances instead of profiling
        #[arg(long = "distances")]
        distances: Option<PathBuf>,
    },
}

/// Resolved run parameters.
#[derive(Clone, Debug)]
pub struct Params {
    pub input: PathBuf,
    pub genome_of_interest: Option<PathBuf>,
    pub k: usize,
    pub threads: usize,
    pub output: OutputLayout,
    pub metric: DistanceMetric,
    pub min_similarity: f64,
    pub mcl: MclConfig,
    pub short_seqs: ShortSeqPolicy,
    pub external_mcl: bool,
    pub write_distances: bool,
    /// Saved distance matrix replacing profiling and distance computation.
    pub distances: Option<PathBuf>,
}

impl Params {
    /// Validate the configuration and prepare the run directory `<output>/vegeta`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_cluster_args(
        input: PathBuf,
        genome_of_interest: Option<PathBuf>,
        output: PathBuf,
        k: usize,
        threads: usize,
        metric: DistanceMetric,
        min_similarity: f64,
        mcl: MclConfig,
        short_seqs: ShortSeqPolicy,
        external_mcl: bool,
        write_distances: bool,
        distances: Option<PathBuf>,
    ) -> Result<Self> {
        let params = Params {
            input,
            genome_of_interest,
            k,
            threads,
            output: OutputLayout::new(output.join(RUN_DIR_NAME)),
            metric,
            min_similarity,
            mcl,
            short_seqs,
            external_mcl,
            write_distances,
            distances,
        };
        params.validate()?;
        params.create_output_dir()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.input.is_file() {
            return Err(PipelineError::Input(format!(
                "couldn't find input sequences at {}",
                self.input.display()
            )));
        }
        if let Some(goi) = &self.genome_of_interest {
            if !goi.is_file() {
                return Err(PipelineError::Input(format!(
                    "couldn't find genome of interest at {}",
                    goi.display()
                )));
            }
        }
        if let Some(path) = &self.distances {
            if !path.is_file() {
                return Err(PipelineError::Input(format!(
                    "couldn't find distance matrix at {}",
                    path.display()
                )));
            }
        }
        if !(1..=MAX_K).contains(&self.k) {
            return Err(PipelineError::Input(format!(
                "k-mer length must be in [1, {}], got {}",
                MAX_K, self.k
            )));
        }
        if self.threads == 0 {
            return Err(PipelineError::Input("threads must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(PipelineError::Input(format!(
                "minimum similarity must be in [0, 1], got {}",
                self.min_similarity
            )));
        }
        self.mcl.validate()
    }

    /// Create the run directory; an existing one is reused with a warning.
    pub fn create_output_dir(&self) -> Result<()> {
        let root = &self.output.root;
        if root.is_dir() {
            warn!(
                "The output directory {} exists. Files will be overwritten.",
                root.display()
            );
        } else {
            std::fs::create_dir_all(root).map_err(|e| PipelineError::output(root, e))?;
            info!("Creating output directory: {}", root.display());
        }
        Ok(())
    }
}

/// Logging settings for one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogConfig {
    pub level: tracing::Level,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: tracing::Level::INFO,
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn from_verbosity(verbose: bool) -> Self {
        LogConfig {
            level: if verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            },
            ..Self::default()
        }
    }

    /// Subscriber to install with `tracing::subscriber::with_default` for the run.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(self.level.into()),
            )
            .with_ansi(self.ansi)
            .with_writer(std::io::stderr)
            .finish()
    }
}

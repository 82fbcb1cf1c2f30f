pub mod distance;
pub mod dna;
pub mod error;
pub mod extract;
pub mod graph;
pub mod kmer;
pub mod mcl;
pub mod output;
pub mod params;
pub mod pipeline;
pub mod store;

use std::path::PathBuf;

use crate::distance::DistanceMetric;
use crate::kmer::ShortSeqPolicy;
use crate::mcl::MclConfig;
use crate::params::{LogConfig, Params, DEFAULT_MIN_SIMILARITY};
use crate::pipeline::{run_pipeline, AbortFlag, PipelineOutput};

pub use crate::error::PipelineError;

/// Result of a successful `cluster_genomes` invocation.
#[derive(Debug)]
pub struct ClusterRunResult {
    /// Run directory (`<output>/vegeta`).
    pub output_dir: PathBuf,
    /// FASTA file with one centroid per cluster, in cluster order.
    pub representatives_file: PathBuf,
    /// Path to the JSON summary.
    pub json_file: PathBuf,
    /// `(cluster index, centroid id, centroid FASTA)` for every cluster.
    pub centroids: Vec<(usize, String, PathBuf)>,
    /// Member identifiers of every cluster, by cluster index.
    pub clusters: Vec<Vec<String>>,
    /// Number of input sequences (including the genome of interest).
    pub sequence_count: usize,
    /// Input sequences dropped because they yield no k-mer (name, length).
    pub short_seqs: Vec<(String, usize)>,
    /// Whether Markov clustering converged before its iteration cap.
    pub converged: bool,
}

/// Cluster genomes into clades and extract one centroid per clade.
///
/// Uses a scoped rayon thread pool internally, so it is safe to call from
/// a program that already has its own rayon global pool.
///
/// # Required parameters
/// - `input`: FASTA/FASTQ file with the genome collection
/// - `output_dir`: directory receiving the `vegeta` run directory
///
/// # Optional parameters (with defaults)
/// - `genome_of_interest`: single-record file pinned into the clustering
/// - `k`: k-mer length in \[1, 32\] (default: 8)
/// - `threads`: number of worker threads (default: 1)
/// - `metric`: profile distance (default: cosine)
/// - `min_similarity`: edge pruning threshold (default: 0.5)
/// - `mcl`: Markov clustering settings (default: inflation 2.0, 100 iterations)
/// - `short_seqs`: policy for sequences without k-mers (default: skip)
/// - `external_mcl`: run the `mcl` binary instead of the built-in solver (default: false)
/// - `write_distances`: persist the distance matrix (default: false)
/// - `distances`: reuse a matrix written by an earlier run instead of profiling
/// - `abort`: flag checked between stages
/// - `log`: logging settings scoped to this run (default: the caller's subscriber)
#[bon::builder]
pub fn cluster_genomes(
    input: PathBuf,
    output_dir: PathBuf,
    genome_of_interest: Option<PathBuf>,
    #[builder(default = 8)] k: usize,
    #[builder(default = 1)] threads: usize,
    #[builder(default)] metric: DistanceMetric,
    #[builder(default = DEFAULT_MIN_SIMILARITY)] min_similarity: f64,
    #[builder(default)] mcl: MclConfig,
    #[builder(default)] short_seqs: ShortSeqPolicy,
    #[builder(default = false)] external_mcl: bool,
    #[builder(default = false)] write_distances: bool,
    distances: Option<PathBuf>,
    #[builder(default)] abort: AbortFlag,
    log: Option<LogConfig>,
) -> anyhow::Result<ClusterRunResult> {
    let params = Params::from_cluster_args(
        input,
        genome_of_interest,
        output_dir,
        k,
        threads,
        metric,
        min_similarity,
        mcl,
        short_seqs,
        external_mcl,
        write_distances,
        distances,
    )?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()?;

    let output = pool.install(|| match log {
        Some(config) => {
            tracing::subscriber::with_default(config.subscriber(), || run_pipeline(&params, &abort))
        }
        None => run_pipeline(&params, &abort),
    })?;
    Ok(build_result(&params, output))
}

/// Map pipeline outputs to `ClusterRunResult`.
fn build_result(params: &Params, output: PipelineOutput) -> ClusterRunResult {
    let layout = &params.output;
    ClusterRunResult {
        output_dir: layout.root.clone(),
        representatives_file: layout.representatives_path(),
        json_file: layout.json_file_path(),
        centroids: output
            .report
            .clusters
            .iter()
            .map(|c| (c.index, c.centroid.clone(), layout.centroid_file_path(c.index)))
            .collect(),
        clusters: output
            .report
            .clusters
            .into_iter()
            .map(|c| c.members)
            .collect(),
        sequence_count: output.num_sequences,
        short_seqs: output.short_seqs,
        converged: output.converged,
    }
}

use clap::Parser;
use tracing::info;
use vegeta_rs::mcl::MclConfig;
use vegeta_rs::params::{Cli, Commands, LogConfig, Params};
use vegeta_rs::pipeline::{run_pipeline, AbortFlag};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_config = LogConfig::from_verbosity(cli.verbose);

    tracing::subscriber::with_default(log_config.subscriber(), || run(cli.command))
}

fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Cluster {
            input,
            genome_of_interest,
            output,
            k,
            threads,
            metric,
            min_similarity,
            inflation,
            expansion,
            max_iterations,
            short_seqs,
            external_mcl,
            write_distances,
            distances,
        } => {
            let mcl = MclConfig {
                inflation,
                expansion,
                max_iterations,
                ..MclConfig::default()
            };
            let params = Params::from_cluster_args(
                input,
                genome_of_interest,
                output,
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

            info!(
                "Clustering {} with k={}, threads={}, metric={}",
                params.input.display(),
                params.k,
                params.threads,
                params.metric.name()
            );

            // Set up rayon thread pool.
            rayon::ThreadPoolBuilder::new()
                .num_threads(params.threads)
                .build_global()
                .ok();

            let result = run_pipeline(&params, &AbortFlag::new())?;
            info!(
                "Done. {} clusters; representatives in {}",
                result.report.clusters.len(),
                params.output.representatives_path().display()
            );
        }
    }

    Ok(())
}

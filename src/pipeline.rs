use crate::distance::DistanceMatrix;
use crate::error::{PipelineError, Result};
use crate::extract::{extract_clusters, ExtractionReport};
use crate::graph::SimilarityGraph;
use crate::kmer::profile_sequences;
use crate::mcl::{ExternalMcl, GraphClusterer, MarkovClusterer};
use crate::output::write_json;
use crate::params::Params;
use crate::store::{SequenceRecord, SequenceStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared flag that stops a run at the next stage boundary.
#[derive(Clone, Debug, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with `Aborted(stage)` if the flag is raised.
    pub fn check(&self, stage: &'static str) -> Result<()> {
        if self.is_aborted() {
            return Err(PipelineError::Aborted(stage));
        }
        Ok(())
    }
}

/// What one pipeline run produced.
#[derive(Debug)]
pub struct PipelineOutput {
    pub num_sequences: usize,
    pub num_clustered: usize,
    pub short_seqs: Vec<(String, usize)>,
    pub report: ExtractionReport,
    pub iterations: usize,
    pub converged: bool,
    pub genome_of_interest: Option<String>,
}

pub fn run_pipeline(params: &Params, abort: &AbortFlag) -> Result<PipelineOutput> {
    // Phase 1: Load sequences.
    info!("Phase 1: Loading sequences...");
    let mut store = SequenceStore::from_fasta(&params.input)?;
    let genome_of_interest = match &params.genome_of_interest {
        Some(path) => Some(store.add_genome_of_interest(path)?.id.clone()),
        None => None,
    };

    // Phases 2 and 3: Profiles and pairwise distances, or a saved matrix.
    let (records, matrix, short_seqs) = match &params.distances {
        Some(path) => {
            abort.check("distance")?;
            info!(
                "Phases 2-3: Reusing pairwise distances from {}",
                path.display()
            );
            let matrix = DistanceMatrix::read_tsv(path)?;
            let records = records_for_matrix(&store, &matrix)?;
            (records, matrix, Vec::new())
        }
        None => {
            abort.check("profile")?;
            info!("Phase 2: Building k-mer profiles (k={})...", params.k);
            let profiles = profile_sequences(&store, params.k, params.short_seqs)?;
            let records: Vec<&SequenceRecord> = profiles
                .seq_indices
                .iter()
                .map(|&i| &store.records()[i])
                .collect();

            abort.check("distance")?;
            info!(
                "Phase 3: Calculating all pairwise {}-mer distances. This may take a while.",
                profiles.k
            );
            let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
            let matrix = DistanceMatrix::compute(ids, &profiles.profiles, params.metric)?;
            (records, matrix, profiles.short_seqs)
        }
    };
    if params.write_distances {
        matrix.write_tsv(&params.output.distance_matrix_path())?;
    }

    // Phase 4: Similarity graph.
    abort.check("graph")?;
    info!("Phase 4: Building similarity graph...");
    let graph = SimilarityGraph::from_distances(&matrix, params.min_similarity);

    // Phase 5: Clustering.
    abort.check("cluster")?;
    let clusterer: Box<dyn GraphClusterer> = if params.external_mcl {
        Box::new(ExternalMcl::new(&params.output, params.mcl.inflation))
    } else {
        Box::new(MarkovClusterer::new(params.mcl.clone()))
    };
    info!("Phase 5: Clustering with {}...", clusterer.name());
    let outcome = clusterer.cluster(&graph)?;

    // Phase 6: Extract clusters and centroids.
    abort.check("extract")?;
    info!("Phase 6: Extracting clusters and centroids...");
    let report = extract_clusters(&params.output, &records, &matrix, &outcome.partition)?;

    if let Some(goi) = &genome_of_interest {
        let node = records.iter().position(|r| r.pinned);
        match node.and_then(|n| outcome.partition.cluster_of(n)) {
            Some(c) => info!(
                "Genome of interest '{}' is in cluster {} (centroid '{}')",
                goi, c, report.clusters[c].centroid
            ),
            None => info!("Genome of interest '{}' was not clustered", goi),
        }
    }

    let output = PipelineOutput {
        num_sequences: store.len(),
        num_clustered: records.len(),
        short_seqs,
        report,
        iterations: outcome.iterations,
        converged: outcome.converged,
        genome_of_interest,
    };
    write_summary(params, &output)?;

    info!("Pipeline complete.");
    Ok(output)
}

/// Line up store records with the rows of a saved distance matrix.
/// The matrix must cover exactly the loaded sequences.
fn records_for_matrix<'a>(
    store: &'a SequenceStore,
    matrix: &DistanceMatrix,
) -> Result<Vec<&'a SequenceRecord>> {
    if matrix.len() != store.len() {
        return Err(PipelineError::Input(format!(
            "distance matrix has {} rows for {} input sequences",
            matrix.len(),
            store.len()
        )));
    }
    let records = matrix
        .ids()
        .iter()
        .map(|id| {
            store.get(id).ok_or_else(|| {
                PipelineError::Input(format!(
                    "distance matrix names '{}', which is not among the input sequences",
                    id
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    if let Some(missing) = store
        .records()
        .iter()
        .find(|r| !matrix.ids().contains(&r.id))
    {
        return Err(PipelineError::Input(format!(
            "sequence '{}' is missing from the distance matrix",
            missing.id
        )));
    }
    Ok(records)
}

/// Write `summary.json` describing the run.
fn write_summary(params: &Params, output: &PipelineOutput) -> Result<()> {
    let clusters: Vec<serde_json::Value> = output
        .report
        .clusters
        .iter()
        .map(|c| {
            serde_json::json!({
                "index": c.index,
                "size": c.members.len(),
                "centroid": c.centroid,
                "summed distance": c.summed_distance,
                "members": c.members,
                "centroid file": params.output.centroid_file_path(c.index).display().to_string(),
            })
        })
        .collect();

    let mut json = serde_json::json!({
        "parameters info": {
            "input": params.input.display().to_string(),
            "k": params.k,
            "metric": params.metric.name(),
            "min similarity": params.min_similarity,
            "inflation": params.mcl.inflation,
            "expansion": params.mcl.expansion,
            "max iterations": params.mcl.max_iterations,
            "distances from": params.distances.as_ref().map(|p| p.display().to_string()),
            "solver": if params.external_mcl { "external mcl" } else { "native" },
            "output directory": params.output.root.display().to_string(),
        },
        "basic info": {
            "sequence count": output.num_sequences,
            "clustered sequence count": output.num_clustered,
            "cluster count": output.report.clusters.len(),
            "mcl iterations": output.iterations,
            "mcl converged": output.converged,
        },
        "clusters": clusters,
    });

    if let Some(goi) = &output.genome_of_interest {
        json["genome of interest"] = serde_json::json!(goi);
    }

    if !output.short_seqs.is_empty() {
        let short_seqs_json: Vec<serde_json::Value> = output
            .short_seqs
            .iter()
            .map(|(name, len)| serde_json::json!([name, len]))
            .collect();
        json["short seqs"] = serde_json::Value::Array(short_seqs_json);
    }

    write_json(&params.output.json_file_path(), &json)
}

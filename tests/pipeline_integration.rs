//! Integration tests for the clustering pipeline
//!
//! These tests run the full pipeline from a FASTA file to the per-cluster
//! output files. `tests/data/clades.fasta` holds two clades of three closely
//! related 240 bp genomes plus one unrelated genome.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use vegeta_rs::distance::DistanceMatrix;
use vegeta_rs::extract::select_centroid;
use vegeta_rs::kmer::ShortSeqPolicy;
use vegeta_rs::{cluster_genomes, ClusterRunResult, PipelineError};

fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

fn run(input: &Path, out: &Path) -> ClusterRunResult {
    cluster_genomes()
        .input(input.to_path_buf())
        .output_dir(out.to_path_buf())
        .k(6)
        .threads(2)
        .min_similarity(0.5)
        .write_distances(true)
        .call()
        .unwrap()
}

fn ids(members: &[&str]) -> Vec<String> {
    members.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_two_clades_and_an_outlier() {
    let dir = tempfile::tempdir().unwrap();
    let result = run(&data("clades.fasta"), dir.path());

    assert_eq!(result.sequence_count, 7);
    assert!(result.converged);
    assert_eq!(
        result.clusters,
        vec![
            ids(&["cladeA_1", "cladeA_2", "cladeA_3"]),
            ids(&["cladeB_1", "cladeB_2", "cladeB_3"]),
            ids(&["outlier"]),
        ]
    );
    let centroids: Vec<&str> = result.centroids.iter().map(|(_, c, _)| c.as_str()).collect();
    assert_eq!(centroids, vec!["cladeA_1", "cladeB_1", "outlier"]);

    // One centroid record per file, header preserved, sequence as read.
    let centroid_b = std::fs::read_to_string(&result.centroids[1].2).unwrap();
    assert!(centroid_b.starts_with(">cladeB_1 clade B reference\n"));
    assert_eq!(centroid_b.matches('>').count(), 1);

    let reps = std::fs::read_to_string(&result.representatives_file).unwrap();
    assert_eq!(reps.matches('>').count(), 3);

    // Lower-case input is written back unchanged.
    let cluster_a = std::fs::read_to_string(result.output_dir.join("clusters/cluster_0.fasta")).unwrap();
    assert!(cluster_a.contains(">cladeA_2\ngctaaagac"));
}

#[test]
fn test_default_settings_keep_the_outlier_alone() {
    let dir = tempfile::tempdir().unwrap();
    let result = cluster_genomes()
        .input(data("clades.fasta"))
        .output_dir(dir.path().to_path_buf())
        .call()
        .unwrap();

    assert_eq!(
        result.clusters,
        vec![
            ids(&["cladeA_1", "cladeA_2", "cladeA_3"]),
            ids(&["cladeB_1", "cladeB_2", "cladeB_3"]),
            ids(&["outlier"]),
        ]
    );
}

fn fasta_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_rerun_replaces_cluster_files() {
    let dir = tempfile::tempdir().unwrap();
    let first = cluster_genomes()
        .input(data("clades.fasta"))
        .output_dir(dir.path().to_path_buf())
        .k(6)
        .min_similarity(0.99)
        .call()
        .unwrap();
    assert_eq!(first.clusters.len(), 7);
    assert_eq!(fasta_files(&first.output_dir.join("centroids")).len(), 7);

    let second = run(&data("clades.fasta"), dir.path());
    assert_eq!(second.clusters.len(), 3);
    let expected = vec![
        "cluster_0.fasta".to_string(),
        "cluster_1.fasta".to_string(),
        "cluster_2.fasta".to_string(),
    ];
    assert_eq!(fasta_files(&second.output_dir.join("centroids")), expected);
    assert_eq!(fasta_files(&second.output_dir.join("clusters")), expected);
}

#[test]
fn test_saved_distances_reproduce_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let first = run(&data("clades.fasta"), &dir.path().join("first"));
    let saved = first.output_dir.join("distance_matrix.tsv");

    let second = cluster_genomes()
        .input(data("clades.fasta"))
        .output_dir(dir.path().join("second"))
        .distances(saved.clone())
        .call()
        .unwrap();
    assert_eq!(second.clusters, first.clusters);
    assert_eq!(
        std::fs::read(second.output_dir.join("centroids.tsv")).unwrap(),
        std::fs::read(first.output_dir.join("centroids.tsv")).unwrap()
    );

    // The matrix does not cover the extra genome of interest.
    let err = cluster_genomes()
        .input(data("clades.fasta"))
        .genome_of_interest(data("goi.fasta"))
        .output_dir(dir.path().join("third"))
        .distances(saved)
        .call()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Input(_))
    ));
}

#[test]
fn test_partition_is_complete_and_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    let result = run(&data("clades.fasta"), dir.path());

    let table = std::fs::read_to_string(result.output_dir.join("clusters.tsv")).unwrap();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        *seen.entry(fields[1].to_string()).or_insert(0) += 1;
    }
    let expected: BTreeSet<String> = [
        "cladeA_1", "cladeA_2", "cladeA_3", "cladeB_1", "cladeB_2", "cladeB_3", "outlier",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(seen.keys().cloned().collect::<BTreeSet<_>>(), expected);
    assert!(seen.values().all(|&n| n == 1));
}

#[test]
fn test_centroids_minimize_summed_distance() {
    let dir = tempfile::tempdir().unwrap();
    let result = run(&data("clades.fasta"), dir.path());
    let matrix = DistanceMatrix::read_tsv(&result.output_dir.join("distance_matrix.tsv")).unwrap();
    let index: HashMap<&str, usize> = matrix
        .ids()
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    for (i, members) in result.clusters.iter().enumerate() {
        let nodes: Vec<usize> = members.iter().map(|m| index[m.as_str()]).collect();
        let centroid = index[result.centroids[i].1.as_str()];
        assert!(nodes.contains(&centroid));
        let sum = |n: usize| nodes.iter().map(|&o| matrix.get(n, o)).sum::<f64>();
        for &n in &nodes {
            assert!(sum(centroid) <= sum(n) + 1e-12);
        }
        assert_eq!(select_centroid(&nodes, &matrix).unwrap().node, centroid);
    }

    for i in 0..matrix.len() {
        assert_eq!(matrix.get(i, i), 0.0);
        for j in 0..matrix.len() {
            assert_eq!(matrix.get(i, j), matrix.get(j, i));
        }
    }
}

#[test]
fn test_runs_are_deterministic() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let a = run(&data("clades.fasta"), first.path());
    let b = run(&data("clades.fasta"), second.path());

    assert_eq!(a.clusters, b.clusters);
    assert_eq!(
        a.centroids.iter().map(|c| &c.1).collect::<Vec<_>>(),
        b.centroids.iter().map(|c| &c.1).collect::<Vec<_>>()
    );
    for name in ["clusters.tsv", "centroids.tsv", "representatives.fasta", "distance_matrix.tsv"] {
        assert_eq!(
            std::fs::read(a.output_dir.join(name)).unwrap(),
            std::fs::read(b.output_dir.join(name)).unwrap(),
            "{} differs between runs",
            name
        );
    }
}

#[test]
fn test_single_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("one.fa");
    std::fs::write(&input, ">only\nACGTTGCAACGTAGCTAGCT\n").unwrap();

    let result = run(&input, dir.path());
    assert_eq!(result.clusters, vec![ids(&["only"])]);
    assert_eq!(result.centroids[0].1, "only");
}

#[test]
fn test_identical_sequences_share_a_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("twins.fa");
    std::fs::write(
        &input,
        ">twin_b\nACGTTGCAACGTAGCTAGCTTTGACCA\n>other\nGGGGCCCCAAAATTTTGGGGCCCCAAAA\n>twin_a\nACGTTGCAACGTAGCTAGCTTTGACCA\n",
    )
    .unwrap();

    let result = cluster_genomes()
        .input(input)
        .output_dir(dir.path().to_path_buf())
        .k(4)
        .call()
        .unwrap();

    let twins = result
        .clusters
        .iter()
        .position(|c| c.contains(&"twin_a".to_string()))
        .unwrap();
    assert!(result.clusters[twins].contains(&"twin_b".to_string()));
    assert_eq!(result.centroids[twins].1, "twin_a");
}

#[test]
fn test_genome_of_interest_is_pinned() {
    let dir = tempfile::tempdir().unwrap();
    let result = cluster_genomes()
        .input(data("clades.fasta"))
        .genome_of_interest(data("goi.fasta"))
        .output_dir(dir.path().to_path_buf())
        .k(6)
        .min_similarity(0.5)
        .call()
        .unwrap();

    assert_eq!(result.sequence_count, 8);
    assert_eq!(
        result.clusters[0],
        ids(&["cladeB_1", "cladeB_2", "cladeB_3", "goi_variant"])
    );
    // goi_variant is identical to cladeB_1; the tie goes to the lower identifier.
    assert_eq!(result.centroids[0].1, "cladeB_1");

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&result.json_file).unwrap()).unwrap();
    assert_eq!(summary["genome of interest"], "goi_variant");
    assert_eq!(summary["basic info"]["cluster count"], 3);

    let table = std::fs::read_to_string(result.output_dir.join("clusters.tsv")).unwrap();
    assert!(table.contains("0\tgoi_variant\tfalse\ttrue\n"));
}

#[test]
fn test_short_sequence_policy() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("short.fa");
    std::fs::write(&input, ">long1\nACGTTGCAACGTAGCT\n>tiny\nACG\n>long2\nACGTTGCAACGTAGCA\n").unwrap();

    let result = cluster_genomes()
        .input(input.clone())
        .output_dir(dir.path().join("skip"))
        .k(5)
        .call()
        .unwrap();
    assert_eq!(result.short_seqs, vec![("tiny".to_string(), 3)]);
    let clustered: usize = result.clusters.iter().map(Vec::len).sum();
    assert_eq!(clustered, 2);
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&result.json_file).unwrap()).unwrap();
    assert_eq!(summary["short seqs"][0][0], "tiny");

    let err = cluster_genomes()
        .input(input)
        .output_dir(dir.path().join("abort"))
        .k(5)
        .short_seqs(ShortSeqPolicy::Abort)
        .call()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Profile(_))
    ));
}

#[test]
fn test_input_errors() {
    let dir = tempfile::tempdir().unwrap();
    let dup = dir.path().join("dup.fa");
    std::fs::write(&dup, ">a\nACGTACGT\n>a\nACGTACGA\n").unwrap();
    let err = cluster_genomes()
        .input(dup)
        .output_dir(dir.path().to_path_buf())
        .call()
        .unwrap_err();
    assert!(err.to_string().contains("duplicate sequence identifier 'a'"));

    let bad = dir.path().join("bad.fa");
    std::fs::write(&bad, ">a\nACGTJACGT\n").unwrap();
    let err = cluster_genomes()
        .input(bad)
        .output_dir(dir.path().to_path_buf())
        .call()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Input(_))
    ));
}

#[test]
fn test_abort_between_stages() {
    let dir = tempfile::tempdir().unwrap();
    let abort = vegeta_rs::pipeline::AbortFlag::new();
    abort.abort();
    let err = cluster_genomes()
        .input(data("clades.fasta"))
        .output_dir(dir.path().to_path_buf())
        .abort(abort)
        .call()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Aborted("profile"))
    ));
}

#[test]
fn test_three_genome_distances_to_centroids() {
    use vegeta_rs::graph::SimilarityGraph;
    use vegeta_rs::mcl::{GraphClusterer, MarkovClusterer};

    let matrix = DistanceMatrix::from_pairs(
        ids(&["A", "B", "C"]),
        &[(0, 1, 0.1), (0, 2, 0.9), (1, 2, 0.85)],
    );

    // Pruned at 0.5, C loses both edges and stays alone; A and B tie, A wins by name.
    let graph = SimilarityGraph::from_distances(&matrix, 0.5);
    let outcome = MarkovClusterer::default().cluster(&graph).unwrap();
    assert_eq!(outcome.partition.clusters(), &[vec![0, 1], vec![2]]);
    assert_eq!(select_centroid(&outcome.partition.clusters()[0], &matrix).unwrap().node, 0);
    assert_eq!(select_centroid(&outcome.partition.clusters()[1], &matrix).unwrap().node, 2);

    // Unpruned, the weak edges pull C in and B becomes the centroid.
    let graph = SimilarityGraph::from_distances(&matrix, 0.0);
    let outcome = MarkovClusterer::default().cluster(&graph).unwrap();
    assert_eq!(outcome.partition.clusters(), &[vec![0, 1, 2]]);
    assert_eq!(select_centroid(&outcome.partition.clusters()[0], &matrix).unwrap().node, 1);
}

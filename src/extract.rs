use crate::distance::DistanceMatrix;
use crate::error::{PipelineError, Result};
use crate::mcl::Partition;
use crate::output::{write_fasta, write_tsv, OutputLayout};
use crate::store::SequenceRecord;
use tracing::info;

/// Relative tolerance under which two summed distances count as tied.
const TIE_EPSILON: f64 = 1e-12;

/// Centroid of one cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct Centroid {
    /// Matrix index of the chosen member.
    pub node: usize,
    /// Sum of its distances to all other members.
    pub summed_distance: f64,
}

/// Pick the member with minimal summed distance to the rest of the cluster.
/// Ties go to the lexicographically lowest identifier.
pub fn select_centroid(members: &[usize], matrix: &DistanceMatrix) -> Result<Centroid> {
    let ids = matrix.ids();
    if let Some(&m) = members.iter().find(|&&m| m >= ids.len()) {
        return Err(PipelineError::Cluster(format!(
            "cluster member {} out of range ({} sequences)",
            m,
            ids.len()
        )));
    }
    let mut best: Option<Centroid> = None;
    for &m in members {
        let sum: f64 = members.iter().map(|&o| matrix.get(m, o)).sum();
        let better = match &best {
            None => true,
            Some(b) => {
                let tol = TIE_EPSILON * b.summed_distance.abs().max(1.0);
                if (sum - b.summed_distance).abs() <= tol {
                    ids[m] < ids[b.node]
                } else {
                    sum < b.summed_distance
                }
            }
        };
        if better {
            best = Some(Centroid {
                node: m,
                summed_distance: sum,
            });
        }
    }
    best.ok_or_else(|| PipelineError::Cluster("cluster without members".to_string()))
}

/// One extracted cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSummary {
    pub index: usize,
    pub members: Vec<String>,
    pub centroid: String,
    pub summed_distance: f64,
    /// The genome of interest is in this cluster.
    pub pinned: bool,
}

/// Everything the extractor produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractionReport {
    pub clusters: Vec<ClusterSummary>,
}

impl ExtractionReport {
    /// Cluster index → centroid identifier.
    pub fn centroids(&self) -> Vec<(usize, &str)> {
        self.clusters
            .iter()
            .map(|c| (c.index, c.centroid.as_str()))
            .collect()
    }
}

/// Write per-cluster member and centroid files plus the summary tables.
///
/// `records[i]` is the sequence behind matrix node `i`.
pub fn extract_clusters(
    layout: &OutputLayout,
    records: &[&SequenceRecord],
    matrix: &DistanceMatrix,
    partition: &Partition,
) -> Result<ExtractionReport> {
    if records.len() != matrix.len() {
        return Err(PipelineError::Cluster(format!(
            "{} sequences for a {}x{} distance matrix",
            records.len(),
            matrix.len(),
            matrix.len()
        )));
    }
    layout.create_dirs()?;

    let mut report = ExtractionReport::default();
    let mut membership_rows = Vec::new();
    let mut centroid_rows = Vec::new();
    let mut representatives = Vec::with_capacity(partition.len());

    for (index, members) in partition.clusters().iter().enumerate() {
        let centroid = select_centroid(members, matrix)?;
        let centroid_record = records[centroid.node];

        write_fasta(
            &layout.cluster_file_path(index),
            members.iter().map(|&m| records[m]),
        )?;
        write_fasta(&layout.centroid_file_path(index), [centroid_record])?;
        representatives.push(centroid_record);

        for &m in members {
            membership_rows.push(vec![
                index.to_string(),
                records[m].id.clone(),
                (m == centroid.node).to_string(),
                records[m].pinned.to_string(),
            ]);
        }
        centroid_rows.push(vec![
            index.to_string(),
            members.len().to_string(),
            centroid_record.id.clone(),
            format!("{:.6}", centroid.summed_distance),
        ]);

        report.clusters.push(ClusterSummary {
            index,
            members: members.iter().map(|&m| records[m].id.clone()).collect(),
            centroid: centroid_record.id.clone(),
            summed_distance: centroid.summed_distance,
            pinned: members.iter().any(|&m| records[m].pinned),
        });
    }

    write_fasta(&layout.representatives_path(), representatives)?;
    write_tsv(
        &layout.membership_path(),
        &["cluster", "id", "is_centroid", "pinned"],
        &membership_rows,
    )?;
    write_tsv(
        &layout.centroid_table_path(),
        &["cluster", "size", "centroid", "summed_distance"],
        &centroid_rows,
    )?;

    info!(
        "Extracted {} clusters into {}",
        report.clusters.len(),
        layout.root.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc_matrix() -> DistanceMatrix {
        DistanceMatrix::from_pairs(
            vec!["A".into(), "B".into(), "C".into()],
            &[(0, 1, 0.1), (0, 2, 0.9), (1, 2, 0.85)],
        )
    }

    #[test]
    fn test_tie_broken_by_identifier() {
        let m = abc_matrix();
        let c = select_centroid(&[0, 1], &m).unwrap();
        assert_eq!(c.node, 0);
        assert!((c.summed_distance - 0.1).abs() < 1e-12);

        let m = DistanceMatrix::from_pairs(vec!["z".into(), "b".into()], &[(0, 1, 0.3)]);
        assert_eq!(select_centroid(&[0, 1], &m).unwrap().node, 1);
    }

    #[test]
    fn test_minimal_sum_wins() {
        // B is closest to everyone.
        let m = abc_matrix();
        let c = select_centroid(&[0, 1, 2], &m).unwrap();
        assert_eq!(c.node, 1);
        assert!((c.summed_distance - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_singleton() {
        let c = select_centroid(&[2], &abc_matrix()).unwrap();
        assert_eq!(c, Centroid { node: 2, summed_distance: 0.0 });
    }

    #[test]
    fn test_invalid_members_are_errors() {
        let m = abc_matrix();
        assert!(matches!(select_centroid(&[], &m), Err(PipelineError::Cluster(_))));
        assert!(matches!(select_centroid(&[0, 7], &m), Err(PipelineError::Cluster(_))));
    }

    #[test]
    fn test_extract_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path().join("run"));
        let recs = vec![
            SequenceRecord::new(b"A", b"ACGTACGT".to_vec()).unwrap(),
            SequenceRecord::new(b"B", b"ACGTACGA".to_vec()).unwrap(),
            {
                let mut r = SequenceRecord::new(b"C", b"TTTTGGGG".to_vec()).unwrap();
                r.pinned = true;
                r
            },
        ];
        let refs: Vec<&SequenceRecord> = recs.iter().collect();
        let partition = Partition::new(vec![vec![2], vec![0, 1]], 3).unwrap();

        let report = extract_clusters(&layout, &refs, &abc_matrix(), &partition).unwrap();
        assert_eq!(report.centroids(), vec![(0, "A"), (1, "C")]);
        assert!(report.clusters[1].pinned);
        assert!(!report.clusters[0].pinned);

        let cluster0 = std::fs::read_to_string(layout.cluster_file_path(0)).unwrap();
        assert_eq!(cluster0, ">A\nACGTACGT\n>B\nACGTACGA\n");
        let centroid1 = std::fs::read_to_string(layout.centroid_file_path(1)).unwrap();
        assert_eq!(centroid1, ">C\nTTTTGGGG\n");
        let reps = std::fs::read_to_string(layout.representatives_path()).unwrap();
        assert_eq!(reps, ">A\nACGTACGT\n>C\nTTTTGGGG\n");
        let table = std::fs::read_to_string(layout.membership_path()).unwrap();
        assert!(table.contains("0\tA\ttrue\tfalse\n"));
        assert!(table.contains("1\tC\ttrue\ttrue\n"));

        let err = extract_clusters(&layout, &refs[..2], &abc_matrix(), &partition).unwrap_err();
        assert!(matches!(err, PipelineError::Cluster(_)));
    }
}

use crate::error::{PipelineError, Result};
use crate::store::SequenceRecord;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Residues per FASTA line.
const FASTA_LINE_WIDTH: usize = 60;

/// On-disk layout of one run below the output directory.
///
/// ```text
/// <root>/clusters/cluster_<i>.fasta    all members of cluster i
/// <root>/centroids/cluster_<i>.fasta   centroid of cluster i
/// <root>/representatives.fasta         all centroids, in cluster order
/// <root>/clusters.tsv                  cluster, id, is_centroid, pinned
/// <root>/centroids.tsv                 cluster, size, centroid, summed_distance
/// <root>/distance_matrix.tsv           optional
/// <root>/graph.abc, <root>/graph.mcl     external mcl input and output
/// <root>/summary.json
/// ```
///
/// `clusters/` and `centroids/` hold exactly one file per cluster of the
/// latest run, so downstream stages can list them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    pub root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        OutputLayout { root: root.into() }
    }

    pub fn cluster_dir(&self) -> PathBuf {
        self.root.join("clusters")
    }

    pub fn centroid_dir(&self) -> PathBuf {
        self.root.join("centroids")
    }

    pub fn cluster_file_path(&self, cluster: usize) -> PathBuf {
        self.cluster_dir().join(format!("cluster_{}.fasta", cluster))
    }

    pub fn centroid_file_path(&self, cluster: usize) -> PathBuf {
        self.centroid_dir().join(format!("cluster_{}.fasta", cluster))
    }

    pub fn representatives_path(&self) -> PathBuf {
        self.root.join("representatives.fasta")
    }

    pub fn membership_path(&self) -> PathBuf {
        self.root.join("clusters.tsv")
    }

    pub fn centroid_table_path(&self) -> PathBuf {
        self.root.join("centroids.tsv")
    }

    pub fn distance_matrix_path(&self) -> PathBuf {
        self.root.join("distance_matrix.tsv")
    }

    pub fn json_file_path(&self) -> PathBuf {
        self.root.join("summary.json")
    }

    pub fn abc_graph_path(&self) -> PathBuf {
        self.root.join("graph.abc")
    }

    pub fn mcl_output_path(&self) -> PathBuf {
        self.root.join("graph.mcl")
    }

    /// Create the run directories and remove per-cluster files left by an
    /// earlier run. Other files in those directories are not touched.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.cluster_dir(), self.centroid_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| PipelineError::output(&dir, e))?;
        }
        let mut removed = 0;
        for dir in [self.cluster_dir(), self.centroid_dir()] {
            removed += remove_cluster_files(&dir)?;
        }
        if removed > 0 {
            warn!(
                "Removed {} cluster files of a previous run from {}",
                removed,
                self.root.display()
            );
        }
        Ok(())
    }
}

/// Delete every `cluster_<i>.fasta` directly inside `dir`.
fn remove_cluster_files(dir: &Path) -> Result<usize> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::output(dir, e))?;
    let mut removed = 0;
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::output(dir, e))?.path();
        if path.is_file() && is_cluster_file(&path) {
            std::fs::remove_file(&path).map_err(|e| PipelineError::output(&path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn is_cluster_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("cluster_"))
        .and_then(|n| n.strip_suffix(".fasta"))
        .is_some_and(|idx| !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()))
}

/// Append one FASTA record to `buf`, wrapping the sequence.
pub fn push_fasta_record(buf: &mut Vec<u8>, record: &SequenceRecord) {
    buf.push(b'>');
    buf.extend_from_slice(record.header().as_bytes());
    buf.push(b'\n');
    for line in record.raw.chunks(FASTA_LINE_WIDTH) {
        buf.extend_from_slice(line);
        buf.push(b'\n');
    }
}

/// Write records to a FASTA file.
pub fn write_fasta<'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a SequenceRecord>,
) -> Result<()> {
    let mut buf = Vec::new();
    for record in records {
        push_fasta_record(&mut buf, record);
    }
    write_bytes(path, &buf)
}

/// Write a tab-separated table with a header row.
pub fn write_tsv(path: &Path, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut buf = Vec::new();
    buf.extend_from_slice(header.join("\t").as_bytes());
    buf.push(b'\n');
    for row in rows {
        buf.extend_from_slice(row.join("\t").as_bytes());
        buf.push(b'\n');
    }
    write_bytes(path, &buf)
}

/// Write a pretty-printed JSON document.
pub fn write_json(path: &Path, json: &serde_json::Value) -> Result<()> {
    let json_str = serde_json::to_string_pretty(json)
        .map_err(|e| PipelineError::output(path, std::io::Error::other(e)))?;
    write_bytes(path, json_str.as_bytes())?;
    info!("Wrote JSON output to {}", path.display());
    Ok(())
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let write = || -> std::io::Result<()> {
        let mut w = BufWriter::new(std::fs::File::create(path)?);
        w.write_all(bytes)?;
        w.flush()
    };
    write().map_err(|e| PipelineError::output(path, e))
}

use crate::error::{PipelineError, Result};
use crate::kmer::KmerProfile;
use rayon::prelude::*;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Dissimilarity between two k-mer profiles, in [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DistanceMetric {
    /// 1 - cosine similarity of the k-mer count vectors.
    #[default]
    Cosine,
    /// 1 - Jaccard index of the k-mer presence sets.
    Jaccard,
}

impl DistanceMetric {
    pub fn distance(self, a: &KmerProfile, b: &KmerProfile) -> f64 {
        if a.counts() == b.counts() {
            return 0.0;
        }
        match self {
            DistanceMetric::Cosine => {
                let denom = a.norm() * b.norm();
                if denom == 0.0 {
                    return 1.0;
                }
                (1.0 - dot(a, b) / denom).clamp(0.0, 1.0)
            }
            DistanceMetric::Jaccard => {
                let shared = shared_kmers(a, b);
                let union = a.distinct() + b.distinct() - shared;
                if union == 0 {
                    return 1.0;
                }
                1.0 - shared as f64 / union as f64
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Jaccard => "jaccard",
        }
    }
}

/// Walk two sorted count vectors in lockstep, calling `f` on shared k-mers.
#[inline]
fn for_each_shared(a: &KmerProfile, b: &KmerProfile, mut f: impl FnMut(u32, u32)) {
    let (xs, ys) = (a.counts(), b.counts());
    let (mut i, mut j) = (0, 0);
    while i < xs.len() && j < ys.len() {
        match xs[i].0.cmp(&ys[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                f(xs[i].1, ys[j].1);
                i += 1;
                j += 1;
            }
        }
    }
}

fn dot(a: &KmerProfile, b: &KmerProfile) -> f64 {
    let mut sum = 0.0;
    for_each_shared(a, b, |x, y| sum += x as f64 * y as f64);
    sum
}

fn shared_kmers(a: &KmerProfile, b: &KmerProfile) -> usize {
    let mut n = 0;
    for_each_shared(a, b, |_, _| n += 1);
    n
}

/// Symmetric pairwise distance matrix stored as a condensed upper triangle.
///
/// Both `get(i, j)` and `get(j, i)` read the same cell, and the diagonal is
/// not stored at all, so symmetry and zero self-distance hold by construction.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceMatrix {
    ids: Vec<String>,
    cells: Vec<f64>,
}

impl DistanceMatrix {
    /// Compute all pairwise distances. Each rayon task owns one row of the
    /// triangle; rows are concatenated in index order.
    pub fn compute(
        ids: Vec<String>,
        profiles: &[KmerProfile],
        metric: DistanceMetric,
    ) -> Result<Self> {
        if ids.len() != profiles.len() {
            return Err(PipelineError::Input(format!(
                "{} identifiers for {} k-mer profiles",
                ids.len(),
                profiles.len()
            )));
        }
        let n = profiles.len();
        info!(
            "Computing {} pairwise {} distances between {} sequences",
            n * n.saturating_sub(1) / 2,
            metric.name(),
            n
        );

        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (i + 1..n)
                    .map(|j| metric.distance(&profiles[i], &profiles[j]))
                    .collect()
            })
            .collect();

        Ok(DistanceMatrix {
            ids,
            cells: rows.concat(),
        })
    }

    /// Build from an explicit list of `(i, j, distance)` entries; missing pairs default to 1.
    pub fn from_pairs(ids: Vec<String>, pairs: &[(usize, usize, f64)]) -> Self {
        let n = ids.len();
        let mut m = DistanceMatrix {
            ids,
            cells: vec![1.0; n * n.saturating_sub(1) / 2],
        };
        for &(i, j, d) in pairs {
            if i != j {
                let idx = m.cell(i, j);
                m.cells[idx] = d;
            }
        }
        m
    }

    #[inline]
    fn cell(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        let n = self.ids.len();
        i * n - i * (i + 1) / 2 + (j - i - 1)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            0.0
        } else {
            self.cells[self.cell(i, j)]
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Persist as a labelled square matrix (tab-separated).
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let write = || -> std::io::Result<()> {
            let mut w = BufWriter::new(std::fs::File::create(path)?);
            for id in &self.ids {
                write!(w, "\t{}", id)?;
            }
            writeln!(w)?;
            for i in 0..self.len() {
                write!(w, "{}", self.ids[i])?;
                for j in 0..self.len() {
                    write!(w, "\t{}", self.get(i, j))?;
                }
                writeln!(w)?;
            }
            w.flush()
        };
        write().map_err(|e| PipelineError::output(path, e))?;
        info!("Wrote distance matrix to {}", path.display());
        Ok(())
    }

    /// Reload a matrix written by `write_tsv`.
    pub fn read_tsv(path: &Path) -> Result<Self> {
        let bad = |msg: String| PipelineError::Input(format!("{}: {}", path.display(), msg));
        let file = std::fs::File::open(path).map_err(|e| bad(e.to_string()))?;
        let mut lines = BufReader::new(file).lines();

        let header = match lines.next() {
            Some(line) => line.map_err(|e| bad(e.to_string()))?,
            None => return Err(bad("empty distance matrix".to_string())),
        };
        let ids: Vec<String> = header.split('\t').skip(1).map(str::to_string).collect();
        let n = ids.len();

        let mut square = Vec::with_capacity(n);
        for line in lines {
            let line = line.map_err(|e| bad(e.to_string()))?;
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let row_id = fields.next().unwrap_or_default();
            if square.len() >= n || row_id != ids[square.len()] {
                return Err(bad(format!("unexpected row '{}'", row_id)));
            }
            let row = fields
                .map(|f| f.parse::<f64>())
                .collect::<std::result::Result<Vec<f64>, _>>()
                .map_err(|e| bad(format!("row '{}': {}", row_id, e)))?;
            if row.len() != n {
                return Err(bad(format!("row '{}' has {} columns, expected {}", row_id, row.len(), n)));
            }
            square.push(row);
        }
        if square.len() != n {
            return Err(bad(format!("{} rows for {} columns", square.len(), n)));
        }

        let mut cells = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            if square[i][i] != 0.0 {
                return Err(bad(format!("non-zero self-distance for '{}'", ids[i])));
            }
            for j in i + 1..n {
                let d = square[i][j];
                if d != square[j][i] || d < 0.0 || !d.is_finite() {
                    return Err(bad(format!(
                        "invalid distance between '{}' and '{}'",
                        ids[i], ids[j]
                    )));
                }
                cells.push(d);
            }
        }
        Ok(DistanceMatrix { ids, cells })
    }
}

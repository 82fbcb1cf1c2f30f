use crate::distance::DistanceMatrix;
use crate::error::{PipelineError, Result};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Undirected weighted graph over the profiled sequences.
///
/// Edge weight is the similarity `1 - distance`. Adjacency lists are sorted
/// by neighbor index and never contain the node itself.
#[derive(Clone, Debug, PartialEq)]
pub struct SimilarityGraph {
    ids: Vec<String>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl SimilarityGraph {
    /// Keep every pair whose similarity is positive and at least `min_similarity`.
    pub fn from_distances(matrix: &DistanceMatrix, min_similarity: f64) -> Self {
        let n = matrix.len();
        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for i in 0..n {
            for j in i + 1..n {
                let similarity = 1.0 - matrix.get(i, j);
                if similarity > 0.0 && similarity >= min_similarity {
                    adjacency[i].push((j, similarity));
                    adjacency[j].push((i, similarity));
                }
            }
        }

        let graph = SimilarityGraph {
            ids: matrix.ids().to_vec(),
            adjacency,
        };
        info!(
            "Similarity graph: {} nodes, {} edges, {} isolated (min similarity {})",
            graph.num_nodes(),
            graph.num_edges(),
            graph.isolated_nodes().len(),
            min_similarity
        );
        graph
    }

    /// Build directly from `(i, j, weight)` edges.
    pub fn from_edges(ids: Vec<String>, edges: &[(usize, usize, f64)]) -> Self {
        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); ids.len()];
        for &(i, j, w) in edges {
            if i != j && w > 0.0 {
                adjacency[i].push((j, w));
                adjacency[j].push((i, w));
            }
        }
        for list in &mut adjacency {
            list.sort_by_key(|&(j, _)| j);
            list.dedup_by_key(|(j, _)| *j);
        }
        SimilarityGraph { ids, adjacency }
    }

    pub fn num_nodes(&self) -> usize {
        self.ids.len()
    }

    pub fn num_edges(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn neighbors(&self, node: usize) -> &[(usize, f64)] {
        &self.adjacency[node]
    }

    pub fn isolated_nodes(&self) -> Vec<usize> {
        (0..self.num_nodes())
            .filter(|&i| self.adjacency[i].is_empty())
            .collect()
    }

    /// Write the graph in mcl's label format (`a<TAB>b<TAB>weight`).
    /// Isolated nodes are written as self-edges so that they survive.
    pub fn write_abc(&self, path: &Path) -> Result<()> {
        let write = || -> std::io::Result<()> {
            let mut w = BufWriter::new(std::fs::File::create(path)?);
            for (i, list) in self.adjacency.iter().enumerate() {
                if list.is_empty() {
                    writeln!(w, "{}\t{}\t1", self.ids[i], self.ids[i])?;
                }
                for &(j, weight) in list.iter().filter(|&&(j, _)| j > i) {
                    writeln!(w, "{}\t{}\t{}", self.ids[i], self.ids[j], weight)?;
                }
            }
            w.flush()
        };
        write().map_err(|e| PipelineError::output(path, e))
    }
}

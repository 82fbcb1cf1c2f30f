//! Markov clustering of the similarity graph.
//!
//! The native solver simulates random-walk flow on a sparse column-stochastic
//! matrix: expansion spreads flow along paths, inflation strengthens strong
//! currents and weakens weak ones, and pruning keeps the matrix sparse. Once
//! the matrix stops changing, or the iteration cap is hit, the connected
//! components of its nonzero pattern are the clusters.

use crate::error::{PipelineError, Result};
use crate::graph::SimilarityGraph;
use crate::output::OutputLayout;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Disjoint clusters covering every node of a graph.
///
/// Clusters are sorted by size (largest first), then by their smallest
/// member; members are sorted ascending. The position of a cluster in this
/// order is its cluster index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    clusters: Vec<Vec<usize>>,
}

impl Partition {
    /// Validate that `clusters` is a complete partition of `0..num_nodes`
    /// and bring it into canonical order.
    pub fn new(mut clusters: Vec<Vec<usize>>, num_nodes: usize) -> Result<Self> {
        let mut seen = vec![false; num_nodes];
        for cluster in &mut clusters {
            if cluster.is_empty() {
                return Err(PipelineError::Cluster("empty cluster in partition".to_string()));
            }
            cluster.sort_unstable();
            for &node in cluster.iter() {
                if node >= num_nodes {
                    return Err(PipelineError::Cluster(format!(
                        "cluster member {} out of range ({} nodes)",
                        node, num_nodes
                    )));
                }
                if std::mem::replace(&mut seen[node], true) {
                    return Err(PipelineError::Cluster(format!(
                        "node {} assigned to more than one cluster",
                        node
                    )));
                }
            }
        }
        if let Some(missing) = seen.iter().position(|&s| !s) {
            return Err(PipelineError::Cluster(format!(
                "node {} is not assigned to any cluster",
                missing
            )));
        }
        clusters.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
        Ok(Partition { clusters })
    }

    pub fn clusters(&self) -> &[Vec<usize>] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Index of the cluster holding `node`.
    pub fn cluster_of(&self, node: usize) -> Option<usize> {
        self.clusters.iter().position(|c| c.binary_search(&node).is_ok())
    }
}

/// Result of one clustering run.
#[derive(Clone, Debug)]
pub struct ClusterOutcome {
    pub partition: Partition,
    pub iterations: usize,
    pub converged: bool,
}

/// Anything that turns a similarity graph into a partition.
pub trait GraphClusterer {
    fn cluster(&self, graph: &SimilarityGraph) -> Result<ClusterOutcome>;

    fn name(&self) -> &'static str;
}

/// Parameters of the flow simulation.
#[derive(Clone, Debug, PartialEq)]
pub struct MclConfig {
    /// Element-wise power applied to the transition matrix (> 1).
    pub inflation: f64,
    /// Matrix power used for expansion (>= 2).
    pub expansion: u32,
    /// Hard iteration cap.
    pub max_iterations: usize,
    /// Entries below this value are removed after inflation.
    pub prune_threshold: f64,
    /// Stop when no entry changes by more than this.
    pub convergence_threshold: f64,
}

impl Default for MclConfig {
    fn default() -> Self {
        MclConfig {
            inflation: 2.0,
            expansion: 2,
            max_iterations: 100,
            prune_threshold: 1e-5,
            convergence_threshold: 1e-9,
        }
    }
}

impl MclConfig {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(PipelineError::Input(format!("invalid clustering settings: {}", msg)));
        if !(self.inflation > 1.0 && self.inflation.is_finite()) {
            return bad(format!("inflation must be > 1, got {}", self.inflation));
        }
        if self.expansion < 2 {
            return bad(format!("expansion must be >= 2, got {}", self.expansion));
        }
        if self.max_iterations == 0 {
            return bad("max iterations must be at least 1".to_string());
        }
        if !(0.0..1.0).contains(&self.prune_threshold) {
            return bad(format!("prune threshold must be in [0, 1), got {}", self.prune_threshold));
        }
        if !(self.convergence_threshold >= 0.0) {
            return bad(format!(
                "convergence threshold must be >= 0, got {}",
                self.convergence_threshold
            ));
        }
        Ok(())
    }
}

/// Sparse matrix stored column by column, rows sorted ascending.
#[derive(Clone, Debug, PartialEq)]
struct SparseColumns {
    cols: Vec<Vec<(usize, f64)>>,
}

impl SparseColumns {
    /// Column-stochastic transition matrix with self-loops weighted by the
    /// heaviest edge of each node (1 for isolated nodes).
    fn transition(graph: &SimilarityGraph) -> Self {
        let cols = (0..graph.num_nodes())
            .map(|j| {
                let neighbors = graph.neighbors(j);
                let loop_weight = if neighbors.is_empty() {
                    1.0
                } else {
                    neighbors.iter().map(|&(_, w)| w).fold(0.0, f64::max)
                };
                let mut col: Vec<(usize, f64)> = neighbors.to_vec();
                let pos = col.partition_point(|&(i, _)| i < j);
                col.insert(pos, (j, loop_weight));
                normalize(&mut col);
                col
            })
            .collect();
        SparseColumns { cols }
    }

    /// `self * other`, accumulating each column in a dense scratch buffer.
    fn multiply(&self, other: &SparseColumns) -> SparseColumns {
        let n = self.cols.len();
        let mut acc = vec![0.0f64; n];
        let mut touched: Vec<usize> = Vec::new();
        let cols = other
            .cols
            .iter()
            .map(|col| {
                for &(k, b) in col {
                    for &(i, a) in &self.cols[k] {
                        if acc[i] == 0.0 {
                            touched.push(i);
                        }
                        acc[i] += a * b;
                    }
                }
                touched.sort_unstable();
                touched.dedup();
                let out: Vec<(usize, f64)> = touched
                    .iter()
                    .map(|&i| (i, std::mem::take(&mut acc[i])))
                    .filter(|&(_, v)| v > 0.0)
                    .collect();
                touched.clear();
                out
            })
            .collect();
        SparseColumns { cols }
    }

    fn inflate(&mut self, power: f64, prune_threshold: f64) {
        for col in &mut self.cols {
            for entry in col.iter_mut() {
                entry.1 = entry.1.powf(power);
            }
            normalize(col);
            prune(col, prune_threshold);
        }
    }

    /// Largest absolute entry-wise difference.
    fn max_change(&self, other: &SparseColumns) -> f64 {
        let mut max = 0.0f64;
        for (a, b) in self.cols.iter().zip(&other.cols) {
            let (mut i, mut j) = (0, 0);
            while i < a.len() || j < b.len() {
                let diff = match (a.get(i), b.get(j)) {
                    (Some(&(ra, va)), Some(&(rb, vb))) if ra == rb => {
                        i += 1;
                        j += 1;
                        va - vb
                    }
                    (Some(&(ra, va)), Some(&(rb, _))) if ra < rb => {
                        i += 1;
                        va
                    }
                    (Some(&(_, va)), None) => {
                        i += 1;
                        va
                    }
                    (_, Some(&(_, vb))) => {
                        j += 1;
                        vb
                    }
                    (None, None) => unreachable!(),
                };
                max = max.max(diff.abs());
            }
        }
        max
    }

    fn nnz(&self) -> usize {
        self.cols.iter().map(Vec::len).sum()
    }
}

fn normalize(col: &mut [(usize, f64)]) {
    let sum: f64 = col.iter().map(|&(_, v)| v).sum();
    if sum > 0.0 {
        for entry in col.iter_mut() {
            entry.1 /= sum;
        }
    }
}

/// Drop entries below `threshold`, always keeping the strongest one.
fn prune(col: &mut Vec<(usize, f64)>, threshold: f64) {
    if threshold <= 0.0 || col.is_empty() {
        return;
    }
    let strongest = col
        .iter()
        .enumerate()
        .fold(0, |best, (i, e)| if e.1 > col[best].1 { i } else { best });
    let keep_row = col[strongest].0;
    col.retain(|&(row, v)| v >= threshold || row == keep_row);
    normalize(col);
}

/// Native Markov clustering.
#[derive(Clone, Debug, Default)]
pub struct MarkovClusterer {
    pub config: MclConfig,
}

impl MarkovClusterer {
    pub fn new(config: MclConfig) -> Self {
        MarkovClusterer { config }
    }
}

impl GraphClusterer for MarkovClusterer {
    fn cluster(&self, graph: &SimilarityGraph) -> Result<ClusterOutcome> {
        let n = graph.num_nodes();
        if n == 0 {
            return Err(PipelineError::Cluster("cannot cluster an empty graph".to_string()));
        }
        self.config.validate()?;
        let cfg = &self.config;

        let mut matrix = SparseColumns::transition(graph);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < cfg.max_iterations {
            iterations += 1;
            let mut next = matrix.multiply(&matrix);
            for _ in 2..cfg.expansion {
                next = next.multiply(&matrix);
            }
            next.inflate(cfg.inflation, cfg.prune_threshold);

            let change = next.max_change(&matrix);
            debug!(
                "MCL iteration {}: {} nonzero entries, max change {:.3e}",
                iterations,
                next.nnz(),
                change
            );
            matrix = next;
            if change <= cfg.convergence_threshold {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "Markov clustering did not converge within {} iterations; using the partition at the cap",
                cfg.max_iterations
            );
        }

        let partition = Partition::new(components(&matrix), n)?;
        info!(
            "Markov clustering found {} clusters in {} iterations (inflation {})",
            partition.len(),
            iterations,
            cfg.inflation
        );
        Ok(ClusterOutcome {
            partition,
            iterations,
            converged,
        })
    }

    fn name(&self) -> &'static str {
        "native-mcl"
    }
}

/// Connected components of the nonzero pattern, each listed by node index.
fn components(matrix: &SparseColumns) -> Vec<Vec<usize>> {
    let n = matrix.cols.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for (j, col) in matrix.cols.iter().enumerate() {
        for &(i, _) in col {
            let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
            if ri != rj {
                parent[ri.max(rj)] = ri.min(rj);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot: HashMap<usize, usize> = HashMap::new();
    for node in 0..n {
        let root = find(&mut parent, node);
        let idx = *slot.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[idx].push(node);
    }
    groups
}

/// Lines of mcl's stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 5;

/// Delegates clustering to the `mcl` executable via its label ("abc") input.
#[derive(Clone, Debug)]
pub struct ExternalMcl {
    pub binary: PathBuf,
    pub inflation: f64,
    /// Graph written for mcl.
    pub abc_path: PathBuf,
    /// Clusters written by mcl.
    pub output_path: PathBuf,
}

impl ExternalMcl {
    pub fn new(layout: &OutputLayout, inflation: f64) -> Self {
        ExternalMcl {
            binary: PathBuf::from("mcl"),
            inflation,
            abc_path: layout.abc_graph_path(),
            output_path: layout.mcl_output_path(),
        }
    }
}

impl GraphClusterer for ExternalMcl {
    fn cluster(&self, graph: &SimilarityGraph) -> Result<ClusterOutcome> {
        if graph.num_nodes() == 0 {
            return Err(PipelineError::Cluster("cannot cluster an empty graph".to_string()));
        }
        let (abc, out) = (&self.abc_path, &self.output_path);
        graph.write_abc(abc)?;

        info!("Running {} on {}", self.binary.display(), abc.display());
        let output = std::process::Command::new(&self.binary)
            .arg(abc)
            .arg("--abc")
            .arg("-I")
            .arg(self.inflation.to_string())
            .arg("-o")
            .arg(out)
            .output()
            .map_err(|e| {
                PipelineError::Cluster(format!("failed to run {}: {}", self.binary.display(), e))
            })?;
        if !output.status.success() {
            return Err(PipelineError::Cluster(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let file = std::fs::File::open(out).map_err(|e| {
            PipelineError::Cluster(format!("cannot read mcl output {}: {}", out.display(), e))
        })?;
        let lines = std::io::BufReader::new(file)
            .lines()
            .collect::<std::io::Result<Vec<String>>>()
            .map_err(|e| PipelineError::Cluster(format!("cannot read mcl output: {}", e)))?;
        let partition = parse_mcl_output(&lines, graph.ids())?;
        info!("mcl found {} clusters", partition.len());
        Ok(ClusterOutcome {
            partition,
            iterations: 0,
            converged: true,
        })
    }

    fn name(&self) -> &'static str {
        "external-mcl"
    }
}

/// Last few non-empty lines of a process's stderr, joined with " | ".
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return "no diagnostics on stderr".to_string();
    }
    lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join(" | ")
}

/// Turn mcl's one-cluster-per-line label output into a partition.
/// Nodes absent from the output become singletons.
pub fn parse_mcl_output(lines: &[String], ids: &[String]) -> Result<Partition> {
    let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut assigned = vec![false; ids.len()];
    for line in lines.iter().filter(|l| !l.trim().is_empty()) {
        let mut cluster = Vec::new();
        for label in line.split('\t').map(str::trim).filter(|l| !l.is_empty()) {
            let &node = index.get(label).ok_or_else(|| {
                PipelineError::Cluster(format!("mcl reported unknown node '{}'", label))
            })?;
            assigned[node] = true;
            cluster.push(node);
        }
        clusters.push(cluster);
    }
    for node in 0..ids.len() {
        if !assigned[node] {
            clusters.push(vec![node]);
        }
    }
    Partition::new(clusters, ids.len())
}

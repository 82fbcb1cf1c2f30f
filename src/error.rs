use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the clustering pipeline stages.
///
/// Each message names the stage that failed, so a user can fix the input or
/// configuration without reading the code.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing, malformed or duplicate input (sequence store, configuration).
    #[error("input error: {0}")]
    Input(String),
    /// A sequence cannot be profiled with the configured k.
    #[error("k-mer profiling error: {0}")]
    Profile(String),
    /// The graph cannot be turned into a valid partition.
    #[error("clustering error: {0}")]
    Cluster(String),
    /// An output artifact could not be written.
    #[error("output error: cannot write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The abort flag was raised between two stages.
    #[error("run aborted before stage '{0}'")]
    Aborted(&'static str),
}

impl PipelineError {
    pub fn output(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Output {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

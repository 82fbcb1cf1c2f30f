use crate::dna::{normalize, Symbol};
use crate::error::{PipelineError, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// One input genome, immutable once loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceRecord {
    /// First whitespace-delimited token of the header.
    pub id: String,
    /// Remainder of the header, if any.
    pub description: Option<String>,
    /// Symbols exactly as read (line breaks removed).
    pub raw: Vec<u8>,
    /// Upper-cased, U→T, ambiguity codes as N, gaps removed.
    pub normalized: Vec<u8>,
    /// Set for the genome of interest.
    pub pinned: bool,
}

impl SequenceRecord {
    /// Build a record from a FASTA header and its symbols, validating the alphabet.
    pub fn new(header: &[u8], raw: Vec<u8>) -> Result<Self> {
        let header = String::from_utf8_lossy(header);
        let header = header.trim();
        let (id, description) = match header.split_once(char::is_whitespace) {
            Some((id, rest)) => (id.to_string(), Some(rest.trim().to_string())),
            None => (header.to_string(), None),
        };
        if id.is_empty() {
            return Err(PipelineError::Input(
                "found a record with an empty identifier".to_string(),
            ));
        }

        let mut normalized = Vec::with_capacity(raw.len());
        for (pos, &b) in raw.iter().enumerate() {
            match normalize(b) {
                Symbol::Keep(c) => normalized.push(c),
                Symbol::Gap => {}
                Symbol::Invalid => {
                    return Err(PipelineError::Input(format!(
                        "sequence '{}' contains symbol {:?} at position {}, which is not a nucleotide code",
                        id,
                        b as char,
                        pos + 1
                    )));
                }
            }
        }
        if normalized.is_empty() {
            return Err(PipelineError::Input(format!(
                "sequence '{}' is empty",
                id
            )));
        }

        Ok(SequenceRecord {
            id,
            description,
            raw,
            normalized,
            pinned: false,
        })
    }

    /// Header line as written back to FASTA outputs (without '>').
    pub fn header(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => format!("{} {}", self.id, d),
            _ => self.id.clone(),
        }
    }
}

/// Ordered, identifier-indexed collection of input genomes.
#[derive(Debug, Default)]
pub struct SequenceStore {
    records: Vec<SequenceRecord>,
    index: HashMap<String, usize>,
}

impl SequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every record of a FASTA/FASTQ file (optionally gzipped).
    pub fn from_fasta(path: &Path) -> Result<Self> {
        let mut store = SequenceStore::new();
        for record in read_records(path)? {
            store.insert(record)?;
        }
        info!(
            "Loaded {} sequences from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    /// Append the single-record genome of interest and mark it pinned.
    pub fn add_genome_of_interest(&mut self, path: &Path) -> Result<&SequenceRecord> {
        let mut records = read_records(path)?;
        if records.len() != 1 {
            return Err(PipelineError::Input(format!(
                "genome of interest file {} must contain exactly one record, found {}",
                path.display(),
                records.len()
            )));
        }
        let mut record = records.remove(0);
        record.pinned = true;
        info!("Pinned genome of interest '{}'", record.id);
        let idx = self.insert(record)?;
        Ok(&self.records[idx])
    }

    /// Insert a record, rejecting duplicate identifiers.
    pub fn insert(&mut self, record: SequenceRecord) -> Result<usize> {
        if self.index.contains_key(&record.id) {
            return Err(PipelineError::Input(format!(
                "duplicate sequence identifier '{}'",
                record.id
            )));
        }
        let idx = self.records.len();
        debug!("Record {}: '{}' ({} bp)", idx, record.id, record.raw.len());
        self.index.insert(record.id.clone(), idx);
        self.records.push(record);
        Ok(idx)
    }

    pub fn get(&self, id: &str) -> Option<&SequenceRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[SequenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn read_records(path: &Path) -> Result<Vec<SequenceRecord>> {
    if !path.is_file() {
        return Err(PipelineError::Input(format!(
            "couldn't find sequence file {}",
            path.display()
        )));
    }
    let mut reader = needletail::parse_fastx_file(path).map_err(|e| {
        PipelineError::Input(format!("cannot read {}: {}", path.display(), e))
    })?;

    let mut records = Vec::new();
    while let Some(result) = reader.next() {
        let record = result.map_err(|e| {
            PipelineError::Input(format!("malformed record in {}: {}", path.display(), e))
        })?;
        records.push(SequenceRecord::new(record.id(), record.seq().into_owned())?);
    }

    if records.is_empty() {
        return Err(PipelineError::Input(format!(
            "{} contains no sequence records",
            path.display()
        )));
    }
    Ok(records)
}

use crate::dna::{is_placeholder, Base};
use crate::error::{PipelineError, Result};
use crate::store::SequenceStore;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Largest k that fits a 2-bit packed k-mer in one u64.
pub const MAX_K: usize = 32;

/// Stride-1 iterator over the packed codes of all valid k-mers in a sequence.
/// Windows containing a placeholder (N) are skipped.
pub struct KmerWindows<'a> {
    seq: &'a [u8],
    k: usize,
    mask: u64,
    pos: usize,
    code: u64,
    valid_len: usize,
}

impl<'a> KmerWindows<'a> {
    pub fn new(seq: &'a [u8], k: usize) -> Self {
        assert!((1..=MAX_K).contains(&k), "k must be in [1, {}]", MAX_K);
        let mask = if k == MAX_K {
            u64::MAX
        } else {
            (1u64 << (2 * k)) - 1
        };
        KmerWindows {
            seq,
            k,
            mask,
            pos: 0,
            code: 0,
            valid_len: 0,
        }
    }
}

impl Iterator for KmerWindows<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        while self.pos < self.seq.len() {
            let b = self.seq[self.pos];
            self.pos += 1;
            if is_placeholder(b) {
                self.valid_len = 0;
                self.code = 0;
                continue;
            }
            self.code = ((self.code << 2) | Base::map_base(b).code()) & self.mask;
            self.valid_len += 1;
            if self.valid_len >= self.k {
                return Some(self.code);
            }
        }
        None
    }
}

/// Sparse k-mer count vector of one sequence, sorted by packed k-mer code.
#[derive(Clone, Debug, PartialEq)]
pub struct KmerProfile {
    counts: Vec<(u64, u32)>,
    total: u64,
    norm: f64,
}

impl KmerProfile {
    /// Count every valid window of length k. `seq` must already be normalized.
    pub fn from_sequence(seq: &[u8], k: usize) -> Self {
        let mut map: HashMap<u64, u32> = HashMap::new();
        for code in KmerWindows::new(seq, k) {
            *map.entry(code).or_insert(0) += 1;
        }
        let mut counts: Vec<(u64, u32)> = map.into_iter().collect();
        counts.sort_unstable_by_key(|&(code, _)| code);
        Self::from_sorted_counts(counts)
    }

    fn from_sorted_counts(counts: Vec<(u64, u32)>) -> Self {
        let total = counts.iter().map(|&(_, c)| c as u64).sum();
        let norm = counts
            .iter()
            .map(|&(_, c)| (c as f64) * (c as f64))
            .sum::<f64>()
            .sqrt();
        KmerProfile {
            counts,
            total,
            norm,
        }
    }

    pub fn counts(&self) -> &[(u64, u32)] {
        &self.counts
    }

    /// Number of distinct k-mers.
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    /// Number of counted windows.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Euclidean norm of the count vector.
    pub fn norm(&self) -> f64 {
        self.norm
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// What to do with a sequence that yields no k-mer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ShortSeqPolicy {
    /// Drop it with a warning and report it in the run summary.
    #[default]
    Skip,
    /// Fail the whole run.
    Abort,
}

/// Profiles of all sequences that take part in clustering.
#[derive(Debug)]
pub struct ProfileSet {
    pub k: usize,
    /// Store index of each profiled sequence, in store order.
    pub seq_indices: Vec<usize>,
    pub profiles: Vec<KmerProfile>,
    /// Dropped sequences (name, normalized length).
    pub short_seqs: Vec<(String, usize)>,
}

impl ProfileSet {
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Profile every sequence of the store in parallel.
pub fn profile_sequences(
    store: &SequenceStore,
    k: usize,
    policy: ShortSeqPolicy,
) -> Result<ProfileSet> {
    if !(1..=MAX_K).contains(&k) {
        return Err(PipelineError::Profile(format!(
            "k-mer length must be in [1, {}], got {}",
            MAX_K, k
        )));
    }

    let profiles: Vec<KmerProfile> = store
        .records()
        .par_iter()
        .map(|r| KmerProfile::from_sequence(&r.normalized, k))
        .collect();

    let mut set = ProfileSet {
        k,
        seq_indices: Vec::with_capacity(profiles.len()),
        profiles: Vec::with_capacity(profiles.len()),
        short_seqs: Vec::new(),
    };

    for (idx, (record, profile)) in store.records().iter().zip(profiles).enumerate() {
        if !profile.is_empty() {
            debug!(
                "Profile of '{}': {} k-mers, {} distinct",
                record.id,
                profile.total(),
                profile.distinct()
            );
            set.seq_indices.push(idx);
            set.profiles.push(profile);
            continue;
        }
        let len = record.normalized.len();
        let reason = if len < k {
            format!("is {} bp long, shorter than k={}", len, k)
        } else {
            format!("has no window of {} unambiguous bases", k)
        };
        match policy {
            ShortSeqPolicy::Abort => {
                return Err(PipelineError::Profile(format!(
                    "sequence '{}' {}",
                    record.id, reason
                )));
            }
            ShortSeqPolicy::Skip => {
                warn!("Skipping sequence '{}': it {}", record.id, reason);
                set.short_seqs.push((record.id.clone(), len));
            }
        }
    }

    if set.is_empty() {
        return Err(PipelineError::Profile(format!(
            "no sequence yields a k-mer for k={}",
            k
        )));
    }

    info!(
        "Profiled {} sequences with k={} ({} skipped)",
        set.len(),
        k,
        set.short_seqs.len()
    );
    Ok(set)
}

//! Maps raw uploaded filenames to sequencer records and derives the canonical
//! destination name.
//!
//! A raw upload like `M00123-S7-V4_R1_001.fastq.gz` belongs to whichever
//! sequencer record's external identifier prefixes the name once the
//! recognized suffix is stripped. Matching is deterministic and never
//! guesses: zero or multiple candidate records are reported back to the
//! caller for manual resolution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw filename suffixes the portal accepts.
pub const FASTQ_SUFFIXES: [&str; 2] = [".fastq.gz", ".fq.gz"];

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Registry lookup failed: {0}")]
    Lookup(String),
}

pub type Result<T> = std::result::Result<T, MatchError>;

/// One physical sample+region sequencing run. Owned by the metadata
/// subsystem; this crate only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerRecord {
    pub id: i64,
    pub sample_id: i64,
    /// External identifier assigned by the sequencing machine.
    pub sequencer_id: String,
    /// Amplicon region tag, e.g. "V3 V4".
    pub region: String,
}

/// Read-only lookup of the sequencer records belonging to one process.
///
/// A trait seam rather than a concrete persistence dependency, so the portal
/// can back it with whatever the metadata subsystem provides.
#[async_trait]
pub trait SequencerRegistry: std::fmt::Debug + Send + Sync {
    async fn records_for_process(&self, process_id: &str) -> Result<Vec<SequencerRecord>>;
}

/// Outcome of matching one raw filename against a record set.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Exactly one record's identifier prefixes the filename.
    Matched {
        record: SequencerRecord,
        new_name: String,
    },
    /// Unrecognized suffix, or no record identifier prefixes the name.
    NoMatch,
    /// More than one record identifier prefixes the name; left for an
    /// operator to resolve.
    Ambiguous { sequencer_ids: Vec<String> },
}

/// Matches `raw_filename` against `records` and derives the canonical name.
///
/// The canonical name is `{sample_id}_{region}_{remainder}{suffix}` where
/// `remainder` is what is left of the stripped filename after removing the
/// matching sequencer identifier, and spaces in the region become
/// underscores.
pub fn match_filename(raw_filename: &str, records: &[SequencerRecord]) -> MatchOutcome {
    let Some(suffix) = FASTQ_SUFFIXES.iter().find(|s| raw_filename.ends_with(*s)) else {
        return MatchOutcome::NoMatch;
    };
    let stem = &raw_filename[..raw_filename.len() - suffix.len()];

    let candidates: Vec<&SequencerRecord> = records
        .iter()
        .filter(|r| !r.sequencer_id.is_empty() && stem.starts_with(&r.sequencer_id))
        .collect();

    match candidates.as_slice() {
        [] => MatchOutcome::NoMatch,
        [record] => {
            let remainder = &stem[record.sequencer_id.len()..];
            let region = record.region.replace(' ', "_");
            MatchOutcome::Matched {
                record: (*record).clone(),
                new_name: format!("{}_{}_{}{}", record.sample_id, region, remainder, suffix),
            }
        },
        many => MatchOutcome::Ambiguous {
            sequencer_ids: many.iter().map(|r| r.sequencer_id.clone()).collect(),
        },
    }
}

/// The canonical names of one sequencer record's uploads in read order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedReads {
    pub forward: String,
    pub reverse: Option<String>,
}

/// Orders the canonical filenames sharing one sequencer record.
///
/// Convention: the lexicographically first canonical name is the forward
/// read, the second the reverse read. Primer detection downstream relies on
/// this ordering.
pub fn paired_reads(mut new_names: Vec<String>) -> Option<PairedReads> {
    new_names.sort_unstable();
    let mut names = new_names.into_iter();
    Some(PairedReads {
        forward: names.next()?,
        reverse: names.next(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, sample_id: i64, sequencer_id: &str, region: &str) -> SequencerRecord {
        SequencerRecord {
            id,
            sample_id,
            sequencer_id: sequencer_id.to_string(),
            region: region.to_string(),
        }
    }

    #[test]
    fn test_single_prefix_match_renames() {
        let records = vec![record(1, 55, "M00123-S7", "V4"), record(2, 56, "M00999-S1", "V4")];

        let outcome = match_filename("M00123-S7_R1_001.fastq.gz", &records);
        let MatchOutcome::Matched { record, new_name } = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(record.id, 1);
        assert_eq!(new_name, "55_V4__R1_001.fastq.gz");
    }

    #[test]
    fn test_region_spaces_become_underscores() {
        let records = vec![record(1, 7, "RUN42", "V3 V4")];
        let MatchOutcome::Matched { new_name, .. } = match_filename("RUN42-R2.fq.gz", &records) else {
            panic!("expected a match");
        };
        assert_eq!(new_name, "7_V3_V4_-R2.fq.gz");
    }

    #[test]
    fn test_unrecognized_suffix_is_no_match() {
        let records = vec![record(1, 7, "RUN42", "V4")];
        assert_eq!(match_filename("RUN42-R1.fastq", &records), MatchOutcome::NoMatch);
        assert_eq!(match_filename("RUN42-R1.txt", &records), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_no_prefix_match() {
        let records = vec![record(1, 7, "RUN42", "V4")];
        assert_eq!(match_filename("OTHER-R1.fastq.gz", &records), MatchOutcome::NoMatch);
        assert_eq!(match_filename("x.fastq.gz", &[]), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_multiple_prefix_matches_are_ambiguous() {
        let records = vec![record(1, 7, "RUN4", "V4"), record(2, 8, "RUN42", "V4")];
        let outcome = match_filename("RUN42-R1.fastq.gz", &records);
        let MatchOutcome::Ambiguous { sequencer_ids } = outcome else {
            panic!("expected ambiguity, got {outcome:?}");
        };
        assert_eq!(sequencer_ids, vec!["RUN4".to_string(), "RUN42".to_string()]);
    }

    #[test]
    fn test_empty_sequencer_id_never_matches() {
        let records = vec![record(1, 7, "", "V4")];
        assert_eq!(match_filename("anything.fastq.gz", &records), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_matching_is_deterministic() {
        let records = vec![record(1, 7, "RUN42", "V4"), record(2, 8, "OTHER", "V4")];
        let first = match_filename("RUN42-R1.fastq.gz", &records);
        for _ in 0..10 {
            assert_eq!(match_filename("RUN42-R1.fastq.gz", &records), first);
        }
    }

    #[test]
    fn test_paired_reads_lexicographic_order() {
        let pair = paired_reads(vec!["7_V4_-R2.fastq.gz".to_string(), "7_V4_-R1.fastq.gz".to_string()]).unwrap();
        assert_eq!(pair.forward, "7_V4_-R1.fastq.gz");
        assert_eq!(pair.reverse.as_deref(), Some("7_V4_-R2.fastq.gz"));

        let single = paired_reads(vec!["7_V4_-R1.fastq.gz".to_string()]).unwrap();
        assert_eq!(single.reverse, None);

        assert_eq!(paired_reads(vec![]), None);
    }
}

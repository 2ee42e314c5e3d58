//! Nucleotide alignments and their compression into weighted site patterns.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bio::io::fasta::Reader as FastaReader;
use flate2::read::MultiGzDecoder;
use tracing::debug;

use crate::error::{ChainError, Result};

/// State code for gaps and ambiguity characters.
pub const UNKNOWN_STATE: u8 = 4;
pub const NUCLEOTIDE_STATES: usize = 4;

#[derive(Debug, Clone)]
pub struct Alignment {
    pub taxa: Vec<String>,
    /// One row of state codes per taxon.
    pub sequences: Vec<Vec<u8>>,
}

/// Unique alignment columns with their multiplicities.
#[derive(Debug, Clone)]
pub struct SitePatterns {
    pub taxa: Vec<String>,
    /// `patterns[p][t]` is the state of taxon `t` in pattern `p`.
    pub patterns: Vec<Vec<u8>>,
    pub weights: Vec<f64>,
}

pub fn encode_nucleotide(c: u8) -> u8 {
    match c.to_ascii_uppercase() {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' | b'U' => 3,
        _ => UNKNOWN_STATE,
    }
}

impl Alignment {
    pub fn from_sequences(records: &[(String, String)]) -> Result<Self> {
        let mut taxa = Vec::with_capacity(records.len());
        let mut sequences = Vec::with_capacity(records.len());
        for (name, seq) in records {
            taxa.push(name.clone());
            sequences.push(seq.bytes().map(encode_nucleotide).collect());
        }
        let alignment = Self { taxa, sequences };
        alignment.check()?;
        Ok(alignment)
    }

    /// Reads FASTA, gunzipping when the path ends in `.gz`.
    pub fn from_fasta(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader: Box<dyn Read> = if path.extension().map_or(false, |e| e == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let fasta = FastaReader::new(BufReader::new(reader));
        let mut taxa = Vec::new();
        let mut sequences = Vec::new();
        for record in fasta.records() {
            let record = record?;
            taxa.push(record.id().to_string());
            sequences.push(record.seq().iter().map(|&c| encode_nucleotide(c)).collect());
        }
        let alignment = Self { taxa, sequences };
        alignment.check()?;
        debug!(
            "read {} sequences of length {} from {}",
            alignment.taxa.len(),
            alignment.site_count(),
            path.display()
        );
        Ok(alignment)
    }

    pub fn site_count(&self) -> usize {
        self.sequences.first().map_or(0, |s| s.len())
    }

    fn check(&self) -> Result<()> {
        if self.taxa.is_empty() {
            return Err(ChainError::Parse("alignment has no sequences".into()));
        }
        let len = self.site_count();
        if len == 0 {
            return Err(ChainError::Parse("alignment has no sites".into()));
        }
        for (name, seq) in self.taxa.iter().zip(self.sequences.iter()) {
            if seq.len() != len {
                return Err(ChainError::Parse(format!(
                    "sequence {} has length {}, expected {}",
                    name,
                    seq.len(),
                    len
                )));
            }
        }
        Ok(())
    }

    /// Collapses identical columns; patterns keep first-occurrence order.
    pub fn patterns(&self) -> SitePatterns {
        let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut patterns: Vec<Vec<u8>> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        for site in 0..self.site_count() {
            let column: Vec<u8> = self.sequences.iter().map(|s| s[site]).collect();
            match index.get(&column) {
                Some(&p) => weights[p] += 1.0,
                None => {
                    index.insert(column.clone(), patterns.len());
                    patterns.push(column);
                    weights.push(1.0);
                }
            }
        }
        SitePatterns {
            taxa: self.taxa.clone(),
            patterns,
            weights,
        }
    }

    /// Base frequencies counted over unambiguous characters.
    pub fn empirical_frequencies(&self) -> [f64; NUCLEOTIDE_STATES] {
        let mut counts = [0.0; NUCLEOTIDE_STATES];
        for seq in &self.sequences {
            for &s in seq {
                if (s as usize) < NUCLEOTIDE_STATES {
                    counts[s as usize] += 1.0;
                }
            }
        }
        let total: f64 = counts.iter().sum();
        if total == 0.0 {
            return [0.25; NUCLEOTIDE_STATES];
        }
        counts.map(|c| c / total)
    }
}

impl SitePatterns {
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn taxon_position(&self, taxon: &str) -> Option<usize> {
        self.taxa.iter().position(|t| t == taxon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn records() -> Vec<(String, String)> {
        vec![
            ("a".to_string(), "ACGTA".to_string()),
            ("b".to_string(), "ACGTA".to_string()),
            ("c".to_string(), "AC-TN".to_string()),
        ]
    }

    #[test]
    fn compresses_columns() {
        let aln = Alignment::from_sequences(&records()).unwrap();
        let patterns = aln.patterns();
        assert_eq!(patterns.pattern_count(), 4);
        assert_eq!(patterns.weights, vec![2.0, 1.0, 1.0, 1.0]);
        assert_eq!(patterns.patterns[2], vec![2, 2, UNKNOWN_STATE]);
        assert_eq!(patterns.weights.iter().sum::<f64>(), 5.0);
    }

    #[test]
    fn ragged_alignment_is_rejected() {
        let bad = vec![
            ("a".to_string(), "ACGT".to_string()),
            ("b".to_string(), "ACG".to_string()),
        ];
        assert!(matches!(
            Alignment::from_sequences(&bad),
            Err(ChainError::Parse(_))
        ));
    }

    #[test]
    fn reads_gzipped_fasta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aln.fasta.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b">x\nACGT\n>y\nACGA\n").unwrap();
        enc.finish().unwrap();
        let aln = Alignment::from_fasta(&path).unwrap();
        assert_eq!(aln.taxa, vec!["x", "y"]);
        assert_eq!(aln.sequences[1], vec![0, 1, 2, 0]);
        let freqs = aln.empirical_frequencies();
        assert!((freqs[0] - 3.0 / 8.0).abs() < 1e-12);
    }
}

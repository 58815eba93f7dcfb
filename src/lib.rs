// ngsrep: Repeat element coverage pipeline for NGS samples.
//
// Copyright 2025 Tommi Mäklin [tommi@maklin.fi].
//
// Copyrights in this project are retained by contributors. No copyright assignment
// is required to contribute to this project.
//
// Except as otherwise noted (below and/or in individual files), this
// project is licensed under the Apache License, Version 2.0
// <LICENSE-APACHE> or <http://www.apache.org/licenses/LICENSE-2.0> or
// the MIT license, <LICENSE-MIT> or <http://opensource.org/licenses/MIT>,
// at your option.
//

//! ngsrep is a library and a command-line client for processing the reads of
//! a single sequencing sample into repeat element coverage profiles.
//!
//! The pipeline runs the following stages in order:
//!   - Input validation and staging of the reads into gzipped fastq files.
//!   - Quality reports with [FastQC](https://www.bioinformatics.babraham.ac.uk/projects/fastqc/).
//!   - Adapter trimming with [Trimmomatic](http://www.usadellab.org/cms/?page=trimmomatic)
//!     for the C&T, C&R and ATAC protocols.
//!   - Genome alignment with [STAR](https://github.com/alexdobin/STAR).
//!   - Duplicate removal with [Picard](https://broadinstitute.github.io/picard/),
//!     filtering to uniquely mapped reads and a bigwig track from deepTools.
//!   - Coverage over the IAP consensus with [bedtools](https://bedtools.readthedocs.io/).
//!   - Per repeat feature read counts with [featureCounts](https://subread.sourceforge.net/).
//!
//! All computationally heavy work is delegated to the external tools. ngsrep
//! builds their command lines, skips stages whose outputs already exist,
//! extracts metrics from the tool reports and folds the per-base repeat
//! coverage into a single normalized profile.
//!
//! ## Usage
//!
//! ### Command line
//!
//! The ngsrep CLI supports the following subcommands:
//!   - `ngsrep run` run the full pipeline for one sample.
//!   - `ngsrep fold` fold strand-specific bedtools coverage into a profile.
//!
//! ### Rust API
//!
//! The stages are available in [stages] and take a [Context](stages::Context)
//! that carries the [Sample], the [PipelineConfig](config::PipelineConfig)
//! and the [PipelineManager](manager::PipelineManager). The manager decides
//! whether a [Stage](manager::Stage) needs to run and persists the metrics.
//!
//! The tool report parsers in [parser] operate on anything implementing
//! [Read](std::io::Read) and can be used on their own.
//!
//! ## Outputs
//!
//! Everything is written under `<output-parent>/<sample-name>`:
//!   - `stats.tsv` and `objects.tsv` metric and report records.
//!   - `aligned_<genome>/` alignments, indexes and the bigwig track.
//!   - `IAP_coverage/<sample>.IAP.norm.coverage.txt` the coverage profile.
//!   - `feature_counts/<sample>.fc.txt` feature id, length and read count.
//!

use std::path::PathBuf;

pub mod command;
pub mod config;
pub mod input;
pub mod manager;
pub mod parser;
pub mod stages;

pub use stages::run_pipeline;

/// Length of the IAP consensus sequence the coverage is folded over.
pub const IAP_CONSENSUS_LEN: usize = 15413;

/// Supported sequencing protocols.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    ChIP,
    CutAndTag,
    CutAndRun,
    RNA,
    ATAC,
}

impl Protocol {
    /// Protocols whose libraries carry adapters that need trimming.
    pub fn trims_adapters(&self) -> bool {
        matches!(self, Protocol::ATAC | Protocol::CutAndRun | Protocol::CutAndTag)
    }

    /// Protocols aligned against the annotated transcriptome index.
    pub fn uses_annotation(&self) -> bool {
        matches!(self, Protocol::RNA)
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ChIP" => Ok(Protocol::ChIP),
            "C&T" => Ok(Protocol::CutAndTag),
            "C&R" => Ok(Protocol::CutAndRun),
            "RNA" => Ok(Protocol::RNA),
            "ATAC" => Ok(Protocol::ATAC),
            _ => Err(format!("'{}' is not a valid Protocol (ChIP, C&T, C&R, RNA, ATAC)", s)),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Protocol::ChIP => "ChIP",
            Protocol::CutAndTag => "C&T",
            Protocol::CutAndRun => "C&R",
            Protocol::RNA => "RNA",
            Protocol::ATAC => "ATAC",
        };
        write!(f, "{}", name)
    }
}

/// Single or paired-end reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadType {
    #[default]
    Single,
    Paired,
}

impl std::str::FromStr for ReadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(ReadType::Single),
            "paired" => Ok(ReadType::Paired),
            _ => Err(format!("'{}' is not a valid ReadType (single, paired)", s)),
        }
    }
}

impl std::fmt::Display for ReadType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ReadType::Single => write!(f, "single"),
            ReadType::Paired => write!(f, "paired"),
        }
    }
}

/// A sequencing sample processed by one pipeline run.
///
/// `input` and `input2` hold the read 1 and read 2 files. Both may list
/// several files (one per sequencing lane), these are merged before
/// alignment.
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    /// Name used for the output folder and file names.
    pub name: String,
    /// Read 1 files.
    pub input: Vec<PathBuf>,
    /// Read 2 files, empty for single-end data.
    pub input2: Vec<PathBuf>,
    pub read_type: ReadType,
    pub protocol: Option<Protocol>,
    /// Genome assembly name, eg. `mm10`.
    pub genome: String,
}

impl Sample {
    pub fn is_paired(&self) -> bool {
        self.read_type == ReadType::Paired
    }

    /// True if the protocol calls for adapter trimming.
    pub fn trims_adapters(&self) -> bool {
        self.protocol.is_some_and(|p| p.trims_adapters())
    }
}

/// Rounds `x` to two decimals.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn protocol_from_str_accepts_all_protocols() {
        use super::Protocol;

        let got: Vec<Protocol> = ["ChIP", "C&T", "C&R", "RNA", "ATAC"]
            .iter()
            .map(|x| x.parse::<Protocol>().unwrap())
            .collect();
        let expected = vec![Protocol::ChIP, Protocol::CutAndTag, Protocol::CutAndRun, Protocol::RNA, Protocol::ATAC];

        assert_eq!(got, expected);
    }

    #[test]
    fn protocol_from_str_rejects_unknown() {
        use super::Protocol;

        assert!("chip".parse::<Protocol>().is_err());
        assert!("WGS".parse::<Protocol>().is_err());
        assert!("".parse::<Protocol>().is_err());
    }

    #[test]
    fn protocol_display_round_trips() {
        use super::Protocol;

        for p in [Protocol::ChIP, Protocol::CutAndTag, Protocol::CutAndRun, Protocol::RNA, Protocol::ATAC] {
            assert_eq!(p.to_string().parse::<Protocol>().unwrap(), p);
        }
    }

    #[test]
    fn only_adapter_protocols_trim() {
        use super::Protocol;

        assert!(Protocol::ATAC.trims_adapters());
        assert!(Protocol::CutAndRun.trims_adapters());
        assert!(Protocol::CutAndTag.trims_adapters());
        assert!(!Protocol::ChIP.trims_adapters());
        assert!(!Protocol::RNA.trims_adapters());
    }

    #[test]
    fn sample_without_protocol_does_not_trim() {
        use super::Sample;

        let sample = Sample { name: "s1".to_string(), ..Default::default() };
        assert!(!sample.trims_adapters());
    }

    #[test]
    fn read_type_is_case_insensitive() {
        use super::ReadType;

        assert_eq!("Paired".parse::<ReadType>().unwrap(), ReadType::Paired);
        assert_eq!("SINGLE".parse::<ReadType>().unwrap(), ReadType::Single);
        assert!("mate".parse::<ReadType>().is_err());
    }

    #[test]
    fn round2_rounds_half_away() {
        use super::round2;

        assert_eq!(round2(5.0), 5.0);
        assert_eq!(round2(33.33333), 33.33);
        assert_eq!(round2(66.666666), 66.67);
    }
}

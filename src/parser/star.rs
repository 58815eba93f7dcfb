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
use std::io::Read;

use crate::parser::parse_field;
use crate::round2;

type E = Box<dyn std::error::Error>;

const REPORT: &str = "STAR Log.final.out";

// Line numbers of the counts in Log.final.out
const INPUT_READS: usize = 6;
const UNIQUE_READS: usize = 9;
const MULTIMAPPED_READS: usize = 24;
const MULTIMAPPED_TOO_MANY: usize = 26;
const UNMAPPED_MISMATCHES: usize = 29;
const UNMAPPED_TOO_SHORT: usize = 31;
const UNMAPPED_OTHER: usize = 33;

#[derive(Debug, Clone)]
pub struct NoInputReads;

impl std::fmt::Display for NoInputReads {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "STAR reported 0 input reads, cannot compute mapping rates")
    }
}

impl std::error::Error for NoInputReads {}

/// Read counts from a STAR alignment summary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlignmentStats {
    pub input_reads: u64,
    pub unique_reads: u64,
    /// Reads mapped to multiple loci.
    pub multimapped_reads: u64,
    /// Reads mapped to more loci than allowed.
    pub multimapped_too_many: u64,
    /// Sum of the three unmapped categories.
    pub unmapped_reads: u64,
}

impl AlignmentStats {
    pub fn mapped_reads(&self) -> u64 {
        self.unique_reads + self.multimapped_reads + self.multimapped_too_many
    }

    fn percent_of_input(
        &self,
        count: u64,
    ) -> Result<f64, E> {
        if self.input_reads == 0 {
            return Err(Box::new(NoInputReads))
        }
        Ok(round2(count as f64 * 100.0 / self.input_reads as f64))
    }

    pub fn mapping_rate(&self) -> Result<f64, E> {
        self.percent_of_input(self.mapped_reads())
    }

    pub fn unique_mapping_rate(&self) -> Result<f64, E> {
        self.percent_of_input(self.unique_reads)
    }

    pub fn multi_mapping_rate(&self) -> Result<f64, E> {
        self.percent_of_input(self.multimapped_reads + self.multimapped_too_many)
    }
}

/// Parse a STAR `Log.final.out` summary.
///
/// Reads the second `|` separated field of the lines holding the input,
/// uniquely mapped, multimapped and unmapped read counts.
///
pub fn read_star_log<R: Read>(
    conn: &mut R,
) -> Result<AlignmentStats, E> {
    let mut contents: Vec<u8> = Vec::new();
    conn.read_to_end(&mut contents)?;

    let count = |line: usize| -> Result<u64, E> { parse_field::<u64>(REPORT, &contents, line, b'|', 2) };

    let unmapped_reads = count(UNMAPPED_MISMATCHES)? + count(UNMAPPED_TOO_SHORT)? + count(UNMAPPED_OTHER)?;
    Ok(AlignmentStats {
        input_reads: count(INPUT_READS)?,
        unique_reads: count(UNIQUE_READS)?,
        multimapped_reads: count(MULTIMAPPED_READS)?,
        multimapped_too_many: count(MULTIMAPPED_TOO_MANY)?,
        unmapped_reads,
    })
}

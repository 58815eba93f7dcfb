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

use bstr::ByteSlice;

use crate::parser::nth_field;
use crate::parser::nth_line;
use crate::parser::parse_field;

type E = Box<dyn std::error::Error>;

const REPORT: &str = "Picard MarkDuplicates metrics";

// The metrics row of the first library
const METRICS_LINE: usize = 8;
const READ_PAIR_DUPLICATES: usize = 7;
const READ_PAIR_OPTICAL_DUPLICATES: usize = 8;
const PERCENT_DUPLICATION: usize = 9;
const ESTIMATED_LIBRARY_SIZE: usize = 10;

/// Duplication metrics from Picard MarkDuplicates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DuplicationMetrics {
    pub read_pair_duplicates: u64,
    pub read_pair_optical_duplicates: u64,
    /// Fraction of duplicated reads, between 0 and 1.
    pub percent_duplication: f64,
    /// Not estimated for single-end data.
    pub estimated_library_size: Option<u64>,
}

/// Parse a Picard `MarkDuplicates -M` metrics file.
///
/// Reads columns 7 to 10 of line 8, the first row of the tab separated
/// DuplicationMetrics table.
///
pub fn read_duplication_metrics<R: Read>(
    conn: &mut R,
) -> Result<DuplicationMetrics, E> {
    let mut contents: Vec<u8> = Vec::new();
    conn.read_to_end(&mut contents)?;

    let library_size = nth_line(&contents, METRICS_LINE)
        .and_then(|line| nth_field(line, b'\t', ESTIMATED_LIBRARY_SIZE))
        .unwrap_or_default();
    let estimated_library_size = if library_size.trim().is_empty() {
        None
    } else {
        Some(parse_field::<u64>(REPORT, &contents, METRICS_LINE, b'\t', ESTIMATED_LIBRARY_SIZE)?)
    };

    Ok(DuplicationMetrics {
        read_pair_duplicates: parse_field(REPORT, &contents, METRICS_LINE, b'\t', READ_PAIR_DUPLICATES)?,
        read_pair_optical_duplicates: parse_field(REPORT, &contents, METRICS_LINE, b'\t', READ_PAIR_OPTICAL_DUPLICATES)?,
        percent_duplication: parse_field(REPORT, &contents, METRICS_LINE, b'\t', PERCENT_DUPLICATION)?,
        estimated_library_size,
    })
}

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
use std::io::BufRead;

use bstr::ByteSlice;

use crate::parser::ReportParseError;

type E = Box<dyn std::error::Error>;

/// Parse the per-base depths from `bedtools coverage -d` output.
///
/// Every line is an interval from the annotation followed by the 1-based
/// position inside the interval and the depth at that position. The depth
/// is the last column regardless of how many columns the annotation has.
///
pub fn read_depths<R: BufRead>(
    conn: &mut R,
) -> Result<Vec<u64>, E> {
    let mut depths: Vec<u64> = Vec::new();
    let mut line: Vec<u8> = Vec::new();
    let mut line_nr = 0;

    loop {
        line.clear();
        if conn.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_nr += 1;
        let record = line.trim();
        if record.is_empty() {
            continue;
        }
        let depth = record
            .fields()
            .last()
            .and_then(|x| x.to_str().ok())
            .and_then(|x| x.parse::<u64>().ok())
            .ok_or_else(|| ReportParseError {
                report: "bedtools coverage",
                line: line_nr,
                message: format!("no depth in '{}'", record.to_str_lossy()),
            })?;
        depths.push(depth);
    }

    Ok(depths)
}

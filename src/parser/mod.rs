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

//! Parsers for the plain text reports written by the external tools.
//!
//! The STAR and Picard reports are read by fixed line and column offsets,
//! which is how these tools lay out their output. A report that does not
//! follow the layout produces a [ReportParseError] naming the report, the
//! line and the field that could not be read.
//!

// Format specific implementations
pub mod bedtools;
pub mod featurecounts;
pub mod picard;
pub mod star;

use bstr::ByteSlice;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct ReportParseError {
    pub report: &'static str,
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ReportParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "malformed {} report at line {}: {}", self.report, self.line, self.message)
    }
}

impl std::error::Error for ReportParseError {}

/// Returns line `n` (1-based) of `contents` without the line terminator.
pub fn nth_line(
    contents: &[u8],
    n: usize,
) -> Option<&[u8]> {
    if n == 0 {
        return None
    }
    contents.lines().nth(n - 1)
}

/// Returns field `n` (1-based) of `line` split on `separator`, trimmed.
pub fn nth_field(
    line: &[u8],
    separator: u8,
    n: usize,
) -> Option<&[u8]> {
    if n == 0 {
        return None
    }
    line.split_str(&[separator]).nth(n - 1).map(|x| x.trim())
}

/// Parses field `column` of line `line` as `T`.
pub(crate) fn parse_field<T: std::str::FromStr>(
    report: &'static str,
    contents: &[u8],
    line: usize,
    separator: u8,
    column: usize,
) -> Result<T, E> {
    let err = |message: String| -> E {
        Box::new(ReportParseError { report, line, message })
    };
    let text = nth_line(contents, line).ok_or_else(|| err("line is missing".to_string()))?;
    let field = nth_field(text, separator, column).ok_or_else(|| err(format!("field {} is missing", column)))?;
    let field = field.to_str().map_err(|_| err(format!("field {} is not valid UTF-8", column)))?;
    field.parse::<T>().map_err(|_| err(format!("could not parse '{}' in field {}", field, column)))
}

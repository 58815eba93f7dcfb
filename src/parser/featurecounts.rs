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
use std::io::Write;

use bstr::ByteSlice;

type E = Box<dyn std::error::Error>;

// 1-based columns of the featureCounts table that are kept
const FEATURE_ID: usize = 1;
const LENGTH: usize = 6;
const COUNT: usize = 7;

fn pick<'a>(
    fields: &[&'a [u8]],
    n: usize,
) -> &'a [u8] {
    fields.get(n - 1).copied().unwrap_or_default()
}

/// Keep the feature id, length and count columns of a featureCounts row.
///
/// Columns are separated by any whitespace. Missing columns are left empty,
/// the output always has three space separated fields.
///
pub fn reformat_row(
    line: &[u8],
) -> Vec<u8> {
    let fields: Vec<&[u8]> = line.fields().collect();
    let mut row: Vec<u8> = Vec::new();
    row.extend_from_slice(pick(&fields, FEATURE_ID));
    row.push(b' ');
    row.extend_from_slice(pick(&fields, LENGTH));
    row.push(b' ');
    row.extend_from_slice(pick(&fields, COUNT));
    row
}

/// Reformat a featureCounts table from `conn_in` into `conn_out`.
///
/// The `#` program comment line is dropped, the column header and the
/// feature rows are reformatted with [reformat_row].
///
pub fn reformat_feature_counts<R: BufRead, W: Write>(
    conn_in: &mut R,
    conn_out: &mut W,
) -> Result<usize, E> {
    let mut n_rows = 0;
    let mut line: Vec<u8> = Vec::new();
    loop {
        line.clear();
        if conn_in.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let record = line.trim();
        if record.is_empty() || record.starts_with(b"#") {
            continue;
        }
        conn_out.write_all(&reformat_row(record))?;
        conn_out.write_all(b"\n")?;
        n_rows += 1;
    }
    conn_out.flush()?;
    Ok(n_rows)
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn reformat_row_keeps_columns_1_6_7() {
        use super::reformat_row;

        let got = reformat_row(b"gene_x 10 123 456 0.9 37 12");
        assert_eq!(got, b"gene_x 37 12".to_vec());
    }

    #[test]
    fn reformat_row_tab_separated() {
        use super::reformat_row;

        let got = reformat_row(b"IAPEz-int\tchr1;chr1\t100;900\t200;1100\t+;-\t302\t17.5");
        assert_eq!(got, b"IAPEz-int 302 17.5".to_vec());
    }

    #[test]
    fn reformat_row_short_line() {
        use super::reformat_row;

        let got = reformat_row(b"a b c");
        assert_eq!(got, b"a  ".to_vec());
    }

    #[test]
    fn reformat_table() {
        use super::reformat_feature_counts;
        use std::io::Cursor;

        let mut data: Vec<u8> = b"# Program:featureCounts v2.0.1; Command:\"featureCounts\" \"-M\"\n".to_vec();
        data.append(&mut b"Geneid\tChr\tStart\tEnd\tStrand\tLength\taligned_mm10/s1.bam\n".to_vec());
        data.append(&mut b"IAPEz-int\tchr1\t100\t200\t+\t101\t42\n".to_vec());
        data.append(&mut b"L1Md_T\tchr2\t5\t10\t-\t6\t0\n".to_vec());

        let mut input = Cursor::new(data);
        let mut output: Vec<u8> = Vec::new();
        let n_rows = reformat_feature_counts(&mut input, &mut output).unwrap();

        let expected = b"Geneid Length aligned_mm10/s1.bam\nIAPEz-int 101 42\nL1Md_T 6 0\n".to_vec();
        assert_eq!(n_rows, 3);
        assert_eq!(output, expected);
    }
}

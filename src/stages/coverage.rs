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

//! Coverage over the IAP consensus sequence.
//!
//! `bedtools coverage -d` reports the depth at every position of every IAP
//! copy in the annotation, separately for copies on the plus and minus
//! strands. The per-position depths are folded onto the consensus by
//! position modulo the consensus length, with the minus strand reversed
//! so that both strands run in the orientation of the consensus.
//!
//! The folded profile is normalized to depth per million mapped reads.
//!
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use log::info;

use crate::command::CommandBuilder;
use crate::manager::Stage;
use crate::parser::bedtools::read_depths;
use crate::stages::Context;
use crate::IAP_CONSENSUS_LEN;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub enum NormalizationError {
    MissingMappedReads,
    ZeroMappedReads,
    InvalidMappedReads(f64),
}

impl std::fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NormalizationError::MissingMappedReads => write!(f, "Mapped_reads has not been reported, cannot normalize coverage"),
            NormalizationError::ZeroMappedReads => write!(f, "Mapped_reads is 0, cannot normalize coverage"),
            NormalizationError::InvalidMappedReads(x) => write!(f, "Mapped_reads must be a positive finite number, got {}", x),
        }
    }
}

impl std::error::Error for NormalizationError {}

/// Mapped reads in millions.
pub fn normalization_factor(
    mapped_reads: Option<f64>,
) -> Result<f64, E> {
    match mapped_reads {
        None => Err(Box::new(NormalizationError::MissingMappedReads)),
        Some(x) if x == 0.0 => Err(Box::new(NormalizationError::ZeroMappedReads)),
        Some(x) if !x.is_finite() || x < 0.0 => Err(Box::new(NormalizationError::InvalidMappedReads(x))),
        Some(x) => Ok(x / 1_000_000.0),
    }
}

/// Folds strand depths onto a profile of `consensus_len` positions.
///
/// The depth stream is the minus strand depths in reverse followed by the
/// plus strand depths. Stream position `j` adds to profile position
/// `j % consensus_len`. Each position is divided by `norm_factor`.
///
/// # Examples
/// ```rust
/// use ngsrep::stages::coverage::fold_coverage;
///
/// let plus = vec![1, 2, 3];
/// let minus = vec![10, 20, 30];
/// // stream: 30 20 10 1 2 3
/// let profile = fold_coverage(&plus, &minus, 3, 1.0);
/// assert_eq!(profile, vec![31.0, 22.0, 13.0]);
/// ```
///
pub fn fold_coverage(
    plus: &[u64],
    minus: &[u64],
    consensus_len: usize,
    norm_factor: f64,
) -> Vec<f64> {
    if consensus_len == 0 {
        return Vec::new()
    }
    let mut sums: Vec<u64> = vec![0; consensus_len];
    minus.iter().rev().chain(plus.iter()).enumerate().for_each(|(j, depth)| {
        sums[j % consensus_len] += depth;
    });
    sums.iter().map(|x| *x as f64 / norm_factor).collect()
}

/// Writes one value per line.
pub fn write_profile<W: Write>(
    profile: &[f64],
    conn: &mut W,
) -> Result<(), E> {
    for value in profile {
        writeln!(conn, "{}", value)?;
    }
    conn.flush()?;
    Ok(())
}

/// Folds the `bedtools coverage -d` outputs `plus` and `minus` into `out`.
pub fn fold_coverage_files(
    plus: &Path,
    minus: &Path,
    out: &Path,
    consensus_len: usize,
    norm_factor: f64,
) -> Result<(), E> {
    let plus_depths = read_depths(&mut BufReader::new(File::open(plus)?))?;
    let minus_depths = read_depths(&mut BufReader::new(File::open(minus)?))?;
    info!("Folding {} plus and {} minus strand positions", plus_depths.len(), minus_depths.len());

    let profile = fold_coverage(&plus_depths, &minus_depths, consensus_len, norm_factor);
    let mut conn = BufWriter::new(File::create(out)?);
    write_profile(&profile, &mut conn)
}

pub fn bedtools_coverage_command(
    bedtools: &str,
    annotation: &Path,
    bam: &Path,
    out: &Path,
) -> String {
    CommandBuilder::new(bedtools)
        .args(["coverage", "-d"])
        .arg("-a").path(annotation)
        .arg("-b").path(bam)
        .stdout_to(out)
        .build()
}

/// Computes the normalized IAP coverage profile of `bam`.
///
/// Needs `Mapped_reads` from the alignment stage.
pub fn run_repeat_coverage(
    ctx: &mut Context,
    bam: &Path,
) -> Result<PathBuf, E> {
    std::fs::create_dir_all(&ctx.layout.coverage)?;

    let plus = ctx.layout.coverage_file("IAP.plus.txt");
    let minus = ctx.layout.coverage_file("IAP.minus.txt");
    let profile = ctx.layout.coverage_file("IAP.norm.coverage.txt");
    let bedtools = &ctx.config.tools.bedtools;

    let cmd = bedtools_coverage_command(bedtools, ctx.config.resources.gag_plus()?, bam, &plus);
    ctx.pm.run(Stage::new(&[&plus]).done_if(&[&profile]).shell(cmd))?;
    let cmd = bedtools_coverage_command(bedtools, ctx.config.resources.gag_minus()?, bam, &minus);
    ctx.pm.run(Stage::new(&[&minus]).done_if(&[&profile]).shell(cmd))?;

    // checked when the task runs so skipped and dry runs do not need it
    let mapped_reads = ctx.pm.get_stat_as::<f64>("Mapped_reads");
    let (plus_in, minus_in, out) = (plus.clone(), minus.clone(), profile.clone());
    ctx.pm.run(Stage::new(&[&profile])
               .native("fold strand coverage onto the IAP consensus", move || {
                   let norm_factor = normalization_factor(mapped_reads)?;
                   fold_coverage_files(&plus_in, &minus_in, &out, IAP_CONSENSUS_LEN, norm_factor)
               }))?;

    ctx.pm.clean_add(plus.to_string_lossy(), false);
    ctx.pm.clean_add(minus.to_string_lossy(), false);

    Ok(profile)
}

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
use std::path::Path;
use std::path::PathBuf;

use log::info;
use log::warn;

use crate::command::CommandBuilder;
use crate::manager::PipelineManager;
use crate::manager::Stage;
use crate::stages::Reads;

type E = Box<dyn std::error::Error>;

// FastQC strips these from the input name
const COMPRESSION_SUFFIXES: [&str; 2] = [".gz", ".bz2"];
const READ_SUFFIXES: [&str; 4] = [".fastq", ".fq", ".bam", ".sam"];

fn strip_any<'a>(
    name: &'a str,
    suffixes: &[&str],
) -> &'a str {
    suffixes.iter().find_map(|x| name.strip_suffix(x)).unwrap_or(name)
}

/// Path of the html report FastQC writes for `reads`.
pub fn fastqc_report(
    fastqc_folder: &Path,
    reads: &Path,
) -> PathBuf {
    let name = reads.file_name().map(|x| x.to_string_lossy().to_string()).unwrap_or_default();
    let stem = strip_any(strip_any(&name, &COMPRESSION_SUFFIXES), &READ_SUFFIXES);
    fastqc_folder.join(format!("{}_fastqc.html", stem))
}

/// Runs FastQC on each read file.
///
/// Quality reports are optional: a missing `fastqc` executable or a failed
/// run is logged and the pipeline carries on.
///
pub fn run_fastqc(
    pm: &mut PipelineManager,
    fastqc: &str,
    fastqc_folder: &Path,
    reads: &Reads,
) -> Result<(), E> {
    if !pm.check_command(fastqc) {
        warn!("{} is not available, skipping quality reports", fastqc);
        return Ok(())
    }
    std::fs::create_dir_all(fastqc_folder)?;

    for (idx, path) in reads.iter().enumerate() {
        let report = fastqc_report(fastqc_folder, path);
        let cmd = CommandBuilder::new(fastqc)
            .arg("--noextract")
            .arg("--outdir")
            .path(fastqc_folder)
            .path(path)
            .build();

        info!("Quality report for {}", path.display());
        pm.run(Stage::new(&[&report]).shell(cmd).nofail())?;
        pm.report_object(&format!("FastQC report r{}", idx + 1), &report)?;
    }

    Ok(())
}

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
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::path::Path;
use std::path::PathBuf;

use log::info;

use crate::command::CommandBuilder;
use crate::manager::Stage;
use crate::parser::featurecounts::reformat_feature_counts;
use crate::stages::Context;

type E = Box<dyn std::error::Error>;

/// Counts multimapping fragments per repeat feature, unstranded.
pub fn featurecounts_command(
    featurecounts: &str,
    saf: &Path,
    out: &Path,
    bam: &Path,
) -> String {
    CommandBuilder::new(featurecounts)
        .args(["-M", "-F", "SAF", "-T", "1", "-s", "0", "-p"])
        .arg("-a").path(saf)
        .arg("-o").path(out)
        .path(bam)
        .build()
}

/// Reformats the featureCounts table `input` into `output`.
pub fn reformat_file(
    input: &Path,
    output: &Path,
) -> Result<(), E> {
    let mut conn_in = BufReader::new(File::open(input)?);
    let mut conn_out = BufWriter::new(File::create(output)?);
    let n_rows = reformat_feature_counts(&mut conn_in, &mut conn_out)?;
    info!("Wrote {} feature count row(s) to {}", n_rows, output.display());
    Ok(())
}

/// Counts reads of `bam` per repeat feature.
pub fn run_feature_counts(
    ctx: &mut Context,
    bam: &Path,
) -> Result<PathBuf, E> {
    std::fs::create_dir_all(&ctx.layout.feature_counts)?;

    let tmp = ctx.layout.feature_counts_file("fc.tmp.txt");
    let result = ctx.layout.feature_counts_file("fc.txt");
    let cmd = featurecounts_command(&ctx.config.tools.featurecounts, ctx.config.resources.repeats_saf()?, &tmp, bam);

    let (tmp_in, result_out) = (tmp.clone(), result.clone());
    ctx.pm.run(Stage::new(&[&result])
               .shell(cmd)
               .native("keep feature id, length and count columns", move || reformat_file(&tmp_in, &result_out)))?;

    ctx.pm.clean_add(tmp.to_string_lossy(), false);
    ctx.pm.clean_add(format!("{}.summary", tmp.display()), false);

    Ok(result)
}

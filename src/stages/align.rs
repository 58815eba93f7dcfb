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
use std::path::Path;
use std::path::PathBuf;

use log::info;

use crate::command::CommandBuilder;
use crate::manager::PipelineManager;
use crate::manager::Stage;
use crate::parser::star::read_star_log;
use crate::parser::star::AlignmentStats;
use crate::stages::Context;
use crate::stages::Layout;
use crate::stages::Reads;
use crate::Protocol;

type E = Box<dyn std::error::Error>;

// Multimappers are kept and one random alignment is reported for each
const MULTIMAPPING_ARGS: [&str; 17] = [
    "--outSAMtype", "BAM", "SortedByCoordinate",
    "--runMode", "alignReads",
    "--outFilterMultimapNmax", "5000",
    "--outSAMmultNmax", "1",
    "--outFilterMismatchNmax", "3",
    "--outMultimapperOrder", "Random",
    "--winAnchorMultimapNmax", "5000",
    "--alignEndsType", "EndToEnd",
];

const SEED_ARGS: [&str; 14] = [
    "--seedSearchStartLmax", "30",
    "--alignTranscriptsPerReadNmax", "30000",
    "--alignWindowsPerReadNmax", "30000",
    "--alignTranscriptsPerWindowNmax", "300",
    "--seedPerReadNmax", "3000",
    "--seedPerWindowNmax", "300",
    "--seedNoneLociPerWindow", "1000",
];

const ANNOTATED_ARGS: [&str; 3] = ["--quantMode", "TranscriptomeSAM", "GeneCounts"];

// No splicing
const GENERIC_ARGS: [&str; 4] = ["--alignIntronMax", "1", "--alignMatesGapMax", "350"];

/// STAR parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentProfile {
    /// Spliced alignment against the annotated index with gene counts.
    Annotated,
    /// Unspliced alignment against the plain genome index.
    Generic,
}

impl AlignmentProfile {
    pub fn for_protocol(
        protocol: Option<Protocol>,
    ) -> Self {
        match protocol {
            Some(p) if p.uses_annotation() => AlignmentProfile::Annotated,
            _ => AlignmentProfile::Generic,
        }
    }

    pub fn star_args(&self) -> Vec<&'static str> {
        let mut args: Vec<&'static str> = Vec::new();
        match self {
            AlignmentProfile::Annotated => {
                args.extend(ANNOTATED_ARGS);
                args.extend(MULTIMAPPING_ARGS);
            },
            AlignmentProfile::Generic => {
                args.extend(MULTIMAPPING_ARGS);
                args.extend(GENERIC_ARGS);
            },
        }
        args.extend(SEED_ARGS);
        args
    }
}

impl std::fmt::Display for AlignmentProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AlignmentProfile::Annotated => write!(f, "annotated"),
            AlignmentProfile::Generic => write!(f, "generic"),
        }
    }
}

/// Files written by the alignment stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlignmentOutputs {
    pub prefix: String,
    /// Sorted bam as written by STAR.
    pub star_bam: PathBuf,
    pub log: PathBuf,
    /// Sorted bam renamed to `<prefix>bam`.
    pub bam: PathBuf,
}

impl AlignmentOutputs {
    pub fn new(
        layout: &Layout,
    ) -> Self {
        Self {
            prefix: layout.aligned_prefix(),
            star_bam: layout.aligned_file("Aligned.sortedByCoord.out.bam"),
            log: layout.aligned_file("Log.final.out"),
            bam: layout.aligned_file("bam"),
        }
    }
}

pub fn star_command(
    star: &str,
    cores: usize,
    profile: AlignmentProfile,
    genome_dir: &Path,
    reads: &Reads,
    prefix: &str,
) -> String {
    CommandBuilder::new(star)
        .arg("--runThreadN")
        .arg(cores.to_string())
        .args(profile.star_args())
        .arg("--genomeDir")
        .path(genome_dir)
        .args(["--readFilesCommand", "zcat"])
        .arg("--readFilesIn")
        .path(&reads.r1)
        .opt_path(reads.r2.as_ref())
        .arg("--outFileNamePrefix")
        .path(prefix)
        .build()
}

/// Reports the counts and mapping rates of a STAR run.
pub fn report_alignment(
    pm: &mut PipelineManager,
    stats: &AlignmentStats,
) -> Result<(), E> {
    let mapping_rate = stats.mapping_rate()?;
    let unique_mapping_rate = stats.unique_mapping_rate()?;
    let multi_mapping_rate = stats.multi_mapping_rate()?;

    pm.report_result("Input_reads", stats.input_reads)?;
    pm.report_result("Unique_reads", stats.unique_reads)?;
    pm.report_result("Multimapped_reads", stats.multimapped_reads)?;
    pm.report_result("Multimapped_too_many_loci_reads", stats.multimapped_too_many)?;
    pm.report_result("Mapped_reads", stats.mapped_reads())?;
    pm.report_result("Unmapped_reads", stats.unmapped_reads)?;
    pm.report_result("Mapping_rate", format!("{:.2}", mapping_rate))?;
    pm.report_result("Unique_Mapping_rate", format!("{:.2}", unique_mapping_rate))?;
    pm.report_result("Multi_Mapping_rate", format!("{:.2}", multi_mapping_rate))?;
    Ok(())
}

/// Aligns `reads` with STAR and returns the sorted bam.
pub fn run_alignment(
    ctx: &mut Context,
    reads: &Reads,
) -> Result<PathBuf, E> {
    std::fs::create_dir_all(&ctx.layout.aligned)?;

    let profile = AlignmentProfile::for_protocol(ctx.sample.protocol);
    let genome_dir = ctx.config.resources.star_index(profile == AlignmentProfile::Annotated)?;
    info!("Aligning with the {} profile against {}", profile, genome_dir.display());

    let out = AlignmentOutputs::new(&ctx.layout);
    let star = star_command(&ctx.config.tools.star, ctx.pm.cores(), profile, genome_dir, reads, &out.prefix);
    let rename = CommandBuilder::new("mv").path(&out.star_bam).path(&out.bam).build();

    let log = out.log.clone();
    ctx.pm.run(Stage::new(&[&out.bam])
               .shell(star)
               .shell(rename)
               .follow(move |pm| {
                   let stats = read_star_log(&mut File::open(&log)?)?;
                   report_alignment(pm, &stats)
               }))?;

    Ok(out.bam)
}

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
use crate::config::Parameters;
use crate::config::Tools;
use crate::input::count_reads;
use crate::manager::PipelineManager;
use crate::manager::Stage;
use crate::stages::qc;
use crate::stages::Context;
use crate::stages::Reads;

type E = Box<dyn std::error::Error>;

// seed mismatches:palindrome clip threshold:simple clip threshold
const ILLUMINACLIP_SETTINGS: &str = "2:30:10";

/// Output files of Trimmomatic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrimmedReads {
    pub r1: PathBuf,
    pub r1_unpaired: Option<PathBuf>,
    pub r2: Option<PathBuf>,
    pub r2_unpaired: Option<PathBuf>,
}

impl TrimmedReads {
    pub fn new(
        fastq_folder: &Path,
        sample_name: &str,
        paired: bool,
    ) -> Self {
        let prefix = fastq_folder.join(sample_name).display().to_string();
        let file = |suffix: &str| PathBuf::from(format!("{}{}", prefix, suffix));
        Self {
            r1: file("_R1_trim.fastq.gz"),
            r1_unpaired: paired.then(|| file("_R1_unpaired.fq")),
            r2: paired.then(|| file("_R2_trim.fastq.gz")),
            r2_unpaired: paired.then(|| file("_R2_unpaired.fq")),
        }
    }

    /// The trimmed reads that continue to alignment.
    pub fn reads(&self) -> Reads {
        Reads { r1: self.r1.clone(), r2: self.r2.clone() }
    }
}

/// JVM options from the config, or a heap limit of `mem`.
pub fn java_settings(
    parameters: &Parameters,
    mem: &str,
) -> String {
    match &parameters.java_settings {
        Some(settings) if !settings.trim().is_empty() => settings.clone(),
        _ => format!("-Xmx{}", mem),
    }
}

pub fn trimmomatic_command(
    tools: &Tools,
    java_settings: &str,
    cores: usize,
    input: &Reads,
    output: &TrimmedReads,
    adapters: &Path,
) -> String {
    CommandBuilder::new(&tools.java)
        .arg(java_settings)
        .arg("-jar")
        .path(&tools.trimmomatic)
        .arg(if input.is_paired() { "PE" } else { "SE" })
        .arg("-threads")
        .arg(cores.to_string())
        .path(&input.r1)
        .opt_path(input.r2.as_ref())
        .path(&output.r1)
        .opt_path(output.r1_unpaired.as_ref())
        .opt_path(output.r2.as_ref())
        .opt_path(output.r2_unpaired.as_ref())
        .arg(format!("ILLUMINACLIP:{}:{}", crate::command::shell_quote(&adapters.to_string_lossy()), ILLUMINACLIP_SETTINGS))
        .build()
}

/// Percentage of raw reads removed by trimming.
pub fn trim_loss_rate(
    raw_reads: u64,
    trimmed_reads: u64,
) -> Option<f64> {
    if raw_reads == 0 {
        return None
    }
    Some(crate::round2((raw_reads as f64 - trimmed_reads as f64) * 100.0 / raw_reads as f64))
}

/// Reports `Trimmed_reads` and `Trim_loss_rate`.
pub fn report_trimming(
    pm: &mut PipelineManager,
    trimmed_r1: &Path,
) -> Result<(), E> {
    info!("Evaluating read trimming");
    let trimmed_reads = count_reads(trimmed_r1)?;
    pm.report_result("Trimmed_reads", trimmed_reads)?;

    match pm.get_stat_as::<u64>("Raw_reads").and_then(|raw| trim_loss_rate(raw, trimmed_reads)) {
        Some(rate) => pm.report_result("Trim_loss_rate", format!("{:.2}", rate))?,
        None => warn!("Can't calculate trim loss rate without raw read result."),
    }
    Ok(())
}

/// Trims adapters with Trimmomatic when the protocol calls for it.
///
/// Returns the reads that continue to alignment, either the trimmed
/// reads or `reads` unchanged.
///
pub fn run_trimming(
    ctx: &mut Context,
    reads: Reads,
) -> Result<Reads, E> {
    if !ctx.sample.trims_adapters() {
        info!("Skipping adapter trimming");
        return Ok(reads)
    }
    ctx.pm.timestamp("### Adapter trimming");

    let output = TrimmedReads::new(&ctx.layout.fastq, &ctx.sample.name, reads.is_paired());
    let adapters = ctx.config.resources.adapters()?;
    let settings = java_settings(&ctx.config.parameters, ctx.pm.mem());
    let cmd = trimmomatic_command(&ctx.config.tools, &settings, ctx.pm.cores(), &reads, &output, adapters);

    let trimmed = output.reads();
    let for_follow = trimmed.clone();
    let fastqc = ctx.config.tools.fastqc.clone();
    let fastqc_folder = ctx.layout.fastqc.clone();
    ctx.pm.run(Stage::new(&[&output.r1])
               .shell(cmd)
               .follow(move |pm| {
                   report_trimming(pm, &for_follow.r1)?;
                   qc::run_fastqc(pm, &fastqc, &fastqc_folder, &for_follow)
               }))?;

    let fastq = ctx.layout.fastq.display().to_string();
    ctx.pm.clean_add(format!("{}/*.fastq", fastq), true);
    ctx.pm.clean_add(format!("{}/*.fq", fastq), true);
    ctx.pm.clean_add(format!("{}/*.log", fastq), true);

    Ok(trimmed)
}

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

//! The stages of the pipeline.
//!
//! Each stage takes the [Context] of the run, builds the commands for the
//! external tools and hands them to the [PipelineManager] which decides
//! whether they need to run.
//!
//! Stages must run in the order of [run_pipeline] because the later stages
//! consume metrics reported by the earlier ones, eg. the coverage
//! normalization uses the `Mapped_reads` count from the alignment.
//!

// Stage implementations
pub mod align;
pub mod counts;
pub mod coverage;
pub mod dedup;
pub mod qc;
pub mod trim;

use std::path::Path;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::input;
use crate::manager::PipelineManager;
use crate::Sample;

type E = Box<dyn std::error::Error>;

/// Everything a stage needs to know about the run.
pub struct Context<'a> {
    pub sample: &'a Sample,
    pub config: &'a PipelineConfig,
    pub layout: Layout,
    pub pm: &'a mut PipelineManager,
}

/// Folder structure of the sample output folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub outfolder: PathBuf,
    pub raw: PathBuf,
    pub fastq: PathBuf,
    pub fastqc: PathBuf,
    pub aligned: PathBuf,
    pub coverage: PathBuf,
    pub feature_counts: PathBuf,
    sample_name: String,
}

impl Layout {
    pub fn new(
        outfolder: &Path,
        sample: &Sample,
    ) -> Self {
        Self {
            outfolder: outfolder.to_path_buf(),
            raw: outfolder.join("raw"),
            fastq: outfolder.join("fastq"),
            fastqc: outfolder.join("fastqc"),
            aligned: outfolder.join(format!("aligned_{}", sample.genome)),
            coverage: outfolder.join("IAP_coverage"),
            feature_counts: outfolder.join("feature_counts"),
            sample_name: sample.name.clone(),
        }
    }

    /// `aligned_<genome>/<sample>.`, the prefix STAR writes its outputs to.
    pub fn aligned_prefix(&self) -> String {
        format!("{}.", self.aligned.join(&self.sample_name).display())
    }

    /// `aligned_<genome>/<sample>.<suffix>`
    pub fn aligned_file(
        &self,
        suffix: &str,
    ) -> PathBuf {
        PathBuf::from(format!("{}{}", self.aligned_prefix(), suffix))
    }

    /// `IAP_coverage/<sample>.<suffix>`
    pub fn coverage_file(
        &self,
        suffix: &str,
    ) -> PathBuf {
        self.coverage.join(format!("{}.{}", self.sample_name, suffix))
    }

    /// `feature_counts/<sample>.<suffix>`
    pub fn feature_counts_file(
        &self,
        suffix: &str,
    ) -> PathBuf {
        self.feature_counts.join(format!("{}.{}", self.sample_name, suffix))
    }
}

/// Read 1 and optional read 2 files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reads {
    pub r1: PathBuf,
    pub r2: Option<PathBuf>,
}

impl Reads {
    pub fn single<P: Into<PathBuf>>(
        r1: P,
    ) -> Self {
        Self { r1: r1.into(), r2: None }
    }

    pub fn paired<P: Into<PathBuf>>(
        r1: P,
        r2: P,
    ) -> Self {
        Self { r1: r1.into(), r2: Some(r2.into()) }
    }

    /// Builds from the staged files, the second one is read 2 if present.
    pub fn from_staged(
        paths: &[PathBuf],
    ) -> Option<Self> {
        let r1 = paths.first()?.clone();
        Some(Self { r1, r2: paths.get(1).cloned() })
    }

    pub fn is_paired(&self) -> bool {
        self.r2.is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.r1).chain(self.r2.iter())
    }
}

#[derive(Debug, Clone)]
struct NothingStaged;

impl std::fmt::Display for NothingStaged {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "no fastq files were staged")
    }
}

impl std::error::Error for NothingStaged {}

fn run_stages(
    ctx: &mut Context,
) -> Result<(), E> {
    input::validate_inputs(ctx.sample)?;

    let all_inputs: Vec<PathBuf> = ctx.sample.input.iter().chain(ctx.sample.input2.iter()).cloned().collect();
    ctx.pm.report_result("File_mb", input::file_size_mb(&all_inputs)?)?;
    ctx.pm.report_result("Read_type", ctx.sample.read_type)?;
    ctx.pm.report_result("Genome", &ctx.sample.genome)?;
    if let Some(protocol) = ctx.sample.protocol {
        ctx.pm.report_result("Protocol", protocol)?;
    }

    ctx.pm.timestamp("### Merge/link and fastq conversion");
    let staged = input::stage_inputs(ctx.pm, ctx.sample, &ctx.layout.raw, &ctx.layout.fastq, &ctx.config.tools.samtools)?;
    let reads = Reads::from_staged(&staged).ok_or_else(|| Box::new(NothingStaged) as E)?;
    qc::run_fastqc(ctx.pm, &ctx.config.tools.fastqc, &ctx.layout.fastqc, &reads)?;

    let reads = trim::run_trimming(ctx, reads)?;

    ctx.pm.timestamp("### Genome alignment");
    let bam = align::run_alignment(ctx, &reads)?;
    dedup::run_deduplication(ctx, &bam)?;

    ctx.pm.timestamp("### IAP coverage");
    coverage::run_repeat_coverage(ctx, &bam)?;

    ctx.pm.timestamp("### Feature counts");
    counts::run_feature_counts(ctx, &bam)?;

    Ok(())
}

/// Runs every stage for `sample` and stops the pipeline.
///
/// ## Errors
///
/// Returns the first error from any stage after marking the run as failed.
///
pub fn run_pipeline(
    sample: &Sample,
    config: &PipelineConfig,
    pm: &mut PipelineManager,
) -> Result<(), E> {
    let layout = Layout::new(pm.outfolder(), sample);
    let mut ctx = Context { sample, config, layout, pm };
    match run_stages(&mut ctx) {
        Ok(()) => ctx.pm.stop_pipeline(),
        Err(e) => Err(ctx.pm.fail_pipeline(e)),
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn layout_paths() {
        use super::Layout;
        use crate::Sample;
        use std::path::{Path, PathBuf};

        let sample = Sample { name: "s1".to_string(), genome: "mm10".to_string(), ..Default::default() };
        let layout = Layout::new(Path::new("/out/s1"), &sample);

        assert_eq!(layout.aligned, PathBuf::from("/out/s1/aligned_mm10"));
        assert_eq!(layout.aligned_prefix(), "/out/s1/aligned_mm10/s1.");
        assert_eq!(layout.aligned_file("dedup.unique.bam"), PathBuf::from("/out/s1/aligned_mm10/s1.dedup.unique.bam"));
        assert_eq!(layout.coverage_file("IAP.plus.txt"), PathBuf::from("/out/s1/IAP_coverage/s1.IAP.plus.txt"));
        assert_eq!(layout.feature_counts_file("fc.txt"), PathBuf::from("/out/s1/feature_counts/s1.fc.txt"));
    }

    #[test]
    fn reads_from_staged() {
        use super::Reads;
        use std::path::PathBuf;

        let single = Reads::from_staged(&[PathBuf::from("s_R1.fastq.gz")]).unwrap();
        assert!(!single.is_paired());
        assert_eq!(single.iter().count(), 1);

        let paired = Reads::from_staged(&[PathBuf::from("s_R1.fastq.gz"), PathBuf::from("s_R2.fastq.gz")]).unwrap();
        assert_eq!(paired, Reads::paired("s_R1.fastq.gz", "s_R2.fastq.gz"));
        assert_eq!(paired.iter().count(), 2);

        assert!(Reads::from_staged(&[]).is_none());
    }

    #[test]
    fn missing_input_fails_before_any_command() {
        use super::run_pipeline;
        use crate::config::PipelineConfig;
        use crate::manager::runner::RecordingRunner;
        use crate::manager::{PipelineManager, RunOptions};
        use crate::Sample;

        let dir = tempfile::tempdir().unwrap();
        let sample = Sample { name: "s1".to_string(), input: vec![dir.path().join("missing.fastq.gz")], genome: "mm10".to_string(), ..Default::default() };
        let runner = RecordingRunner::default();
        let out = dir.path().join("s1");
        let mut pm = PipelineManager::new("ngsrep", &out, 1, "4000M", RunOptions::default(), Box::new(runner.clone())).unwrap();

        let err = run_pipeline(&sample, &PipelineConfig::default(), &mut pm).unwrap_err();

        assert!(err.to_string().starts_with("Could not find"));
        assert!(runner.commands.borrow().is_empty());
        assert!(out.join("ngsrep_failed.flag").exists());
    }

    #[test]
    fn rerun_of_completed_sample_invokes_nothing() {
        use super::{run_pipeline, Layout};
        use crate::config::PipelineConfig;
        use crate::manager::runner::RecordingRunner;
        use crate::manager::{PipelineManager, RunOptions};
        use crate::stages::qc::fastqc_report;
        use crate::Sample;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fastq.gz");
        std::fs::write(&input, "reads").unwrap();
        let sample = Sample { name: "s1".to_string(), input: vec![input], genome: "mm10".to_string(), ..Default::default() };
        let config = PipelineConfig::parse("resources:\n  star_index: /res/star\n  gag_plus: /res/gag.plus.bed\n  gag_minus: /res/gag.minus.bed\n  repeats_saf: /res/repeats.saf\n").unwrap();
        let out = dir.path().join("s1");

        // the outputs a completed run leaves after cleanup
        let layout = Layout::new(&out, &sample);
        for folder in [&layout.fastq, &layout.fastqc, &layout.aligned, &layout.coverage, &layout.feature_counts] {
            std::fs::create_dir_all(folder).unwrap();
        }
        let staged = layout.fastq.join("s1_R1.fastq.gz");
        std::fs::write(&staged, "fastq").unwrap();
        std::fs::write(fastqc_report(&layout.fastqc, &staged), "html").unwrap();
        for ext in ["bam", "bam.bai", "dedup.metrics.txt", "dedup.unique.bam", "dedup.unique.bam.bai", "dedup.unique.bw"] {
            std::fs::write(layout.aligned_file(ext), "x").unwrap();
        }
        std::fs::write(layout.coverage_file("IAP.norm.coverage.txt"), "0.5\n").unwrap();
        std::fs::write(layout.feature_counts_file("fc.txt"), "Geneid Length s1.bam\n").unwrap();

        let runner = RecordingRunner::default();
        for _ in 0..2 {
            let mut pm = PipelineManager::new("ngsrep", &out, 1, "4000M", RunOptions::default(), Box::new(runner.clone())).unwrap();
            run_pipeline(&sample, &config, &mut pm).unwrap();
        }

        assert!(runner.commands.borrow().is_empty());
        assert!(out.join("ngsrep_completed.flag").exists());
        assert!(layout.aligned_file("dedup.unique.bam").exists());
        assert!(layout.coverage_file("IAP.norm.coverage.txt").exists());
    }
}

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

use log::warn;

use crate::command::CommandBuilder;
use crate::config::Tools;
use crate::manager::PipelineManager;
use crate::manager::Stage;
use crate::parser::picard::read_duplication_metrics;
use crate::parser::picard::DuplicationMetrics;
use crate::stages::Context;
use crate::stages::Layout;

type E = Box<dyn std::error::Error>;

/// STAR assigns MAPQ 255 to uniquely mapped reads.
pub const UNIQUE_MAPQ: u8 = 255;

/// Files written by the deduplication stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DedupOutputs {
    pub dedup: PathBuf,
    pub metrics: PathBuf,
    pub unique: PathBuf,
    pub unique_index: PathBuf,
    pub bigwig: PathBuf,
}

impl DedupOutputs {
    pub fn new(
        layout: &Layout,
    ) -> Self {
        Self {
            dedup: layout.aligned_file("dedup.bam"),
            metrics: layout.aligned_file("dedup.metrics.txt"),
            unique: layout.aligned_file("dedup.unique.bam"),
            unique_index: layout.aligned_file("dedup.unique.bam.bai"),
            bigwig: layout.aligned_file("dedup.unique.bw"),
        }
    }
}

fn bam_index(
    bam: &Path,
) -> PathBuf {
    PathBuf::from(format!("{}.bai", bam.display()))
}

pub fn samtools_index_command(
    samtools: &str,
    bam: &Path,
) -> String {
    CommandBuilder::new(samtools).arg("index").path(bam).build()
}

pub fn markduplicates_command(
    tools: &Tools,
    bam: &Path,
    out: &DedupOutputs,
) -> String {
    CommandBuilder::new(&tools.java)
        .arg("-jar")
        .path(&tools.picard)
        .arg("MarkDuplicates")
        .arg("-I").path(bam)
        .arg("-O").path(&out.dedup)
        .arg("-M").path(&out.metrics)
        .args(["--REMOVE_DUPLICATES", "true"])
        .build()
}

pub fn unique_filter_command(
    samtools: &str,
    dedup: &Path,
    unique: &Path,
) -> String {
    CommandBuilder::new(samtools)
        .args(["view", "-b", "-q"])
        .arg(UNIQUE_MAPQ.to_string())
        .path(dedup)
        .stdout_to(unique)
        .build()
}

pub fn bamcoverage_command(
    bamcoverage: &str,
    bam: &Path,
    bigwig: &Path,
) -> String {
    CommandBuilder::new(bamcoverage)
        .arg("--bam").path(bam)
        .arg("-o").path(bigwig)
        .args(["--binSize", "10", "--normalizeUsing", "RPKM"])
        .build()
}

/// Reports the Picard duplication metrics.
pub fn report_duplication(
    pm: &mut PipelineManager,
    metrics: &DuplicationMetrics,
) -> Result<(), E> {
    pm.report_result("Read_pair_duplicates", metrics.read_pair_duplicates)?;
    pm.report_result("Read_pair_optical_duplicates", metrics.read_pair_optical_duplicates)?;
    pm.report_result("Percent_duplication", metrics.percent_duplication)?;
    match metrics.estimated_library_size {
        Some(size) => pm.report_result("Estimated_library_size", size)?,
        None => warn!("Picard did not estimate the library size, Estimated_library_size is not reported"),
    }
    Ok(())
}

/// Indexes `bam`, removes duplicates, keeps unique alignments and writes a
/// normalized bigwig track.
///
/// Returns the deduplicated bam of unique alignments.
///
pub fn run_deduplication(
    ctx: &mut Context,
    bam: &Path,
) -> Result<PathBuf, E> {
    let samtools = ctx.config.tools.samtools.clone();
    let out = DedupOutputs::new(&ctx.layout);

    ctx.pm.run(Stage::new(&[bam_index(bam)]).shell(samtools_index_command(&samtools, bam)))?;

    let metrics = out.metrics.clone();
    ctx.pm.run(Stage::new(&[&out.dedup])
               .done_if(&[&out.unique])
               .shell(markduplicates_command(&ctx.config.tools, bam, &out))
               .follow(move |pm| {
                   let parsed = read_duplication_metrics(&mut File::open(&metrics)?)?;
                   report_duplication(pm, &parsed)
               }))?;

    ctx.pm.run(Stage::new(&[&out.unique]).shell(unique_filter_command(&samtools, &out.dedup, &out.unique)))?;
    ctx.pm.run(Stage::new(&[&out.unique_index]).shell(samtools_index_command(&samtools, &out.unique)))?;
    ctx.pm.run(Stage::new(&[&out.bigwig]).shell(bamcoverage_command(&ctx.config.tools.bamcoverage, &out.unique, &out.bigwig)))?;

    ctx.pm.clean_add(out.dedup.to_string_lossy(), false);

    Ok(out.unique)
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn picard_and_samtools_commands() {
        use super::{markduplicates_command, unique_filter_command, DedupOutputs};
        use crate::config::Tools;
        use crate::stages::Layout;
        use crate::Sample;
        use std::path::Path;

        let sample = Sample { name: "s1".to_string(), genome: "mm10".to_string(), ..Default::default() };
        let out = DedupOutputs::new(&Layout::new(Path::new("out"), &sample));

        let got = markduplicates_command(&Tools::default(), Path::new("out/aligned_mm10/s1.bam"), &out);
        let expected = "java -jar picard.jar MarkDuplicates -I out/aligned_mm10/s1.bam -O out/aligned_mm10/s1.dedup.bam -M out/aligned_mm10/s1.dedup.metrics.txt --REMOVE_DUPLICATES true";
        assert_eq!(got, expected);

        let got = unique_filter_command("samtools", &out.dedup, &out.unique);
        assert_eq!(got, "samtools view -b -q 255 out/aligned_mm10/s1.dedup.bam > out/aligned_mm10/s1.dedup.unique.bam");
    }

    #[test]
    fn bamcoverage_rpkm_track() {
        use super::bamcoverage_command;
        use std::path::Path;

        let got = bamcoverage_command("bamCoverage", Path::new("s1.dedup.unique.bam"), Path::new("s1.dedup.unique.bw"));
        assert_eq!(got, "bamCoverage --bam s1.dedup.unique.bam -o s1.dedup.unique.bw --binSize 10 --normalizeUsing RPKM");
    }

    #[test]
    fn missing_library_size_is_not_reported() {
        use super::report_duplication;
        use crate::manager::runner::RecordingRunner;
        use crate::manager::{PipelineManager, RunOptions};
        use crate::parser::picard::DuplicationMetrics;

        let dir = tempfile::tempdir().unwrap();
        let mut pm = PipelineManager::new("ngsrep", dir.path(), 1, "4000M", RunOptions::default(), Box::new(RecordingRunner::default())).unwrap();
        let metrics = DuplicationMetrics { read_pair_duplicates: 0, read_pair_optical_duplicates: 0, percent_duplication: 0.05, estimated_library_size: None };

        report_duplication(&mut pm, &metrics).unwrap();

        assert_eq!(pm.get_stat("Percent_duplication"), Some("0.05"));
        assert_eq!(pm.get_stat("Estimated_library_size"), None);
    }

    #[test]
    fn deduplication_runs_five_steps() {
        use super::run_deduplication;
        use crate::config::PipelineConfig;
        use crate::manager::runner::RecordingRunner;
        use crate::manager::{PipelineManager, RunOptions};
        use crate::parser::picard::tests::PAIRED_METRICS;
        use crate::stages::{Context, Layout};
        use crate::Sample;

        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::default();
        let mut pm = PipelineManager::new("ngsrep", dir.path(), 1, "4000M", RunOptions::default(), Box::new(runner.clone())).unwrap();
        let sample = Sample { name: "s1".to_string(), genome: "mm10".to_string(), ..Default::default() };
        let config = PipelineConfig::default();
        let layout = Layout::new(dir.path(), &sample);
        std::fs::create_dir_all(&layout.aligned).unwrap();
        std::fs::write(layout.aligned_file("dedup.metrics.txt"), PAIRED_METRICS).unwrap();
        let bam = layout.aligned_file("bam");
        let mut ctx = Context { sample: &sample, config: &config, layout, pm: &mut pm };

        let unique = run_deduplication(&mut ctx, &bam).unwrap();

        assert!(unique.ends_with("s1.dedup.unique.bam"));
        let commands = runner.commands.borrow();
        assert_eq!(commands.len(), 5);
        assert!(commands[0].starts_with("samtools index"));
        assert!(commands[1].contains("MarkDuplicates"));
        assert!(commands[2].starts_with("samtools view -b -q 255"));
        assert!(commands[3].ends_with("s1.dedup.unique.bam"));
        assert!(commands[4].starts_with("bamCoverage"));
        assert_eq!(pm.get_stat_as::<u64>("Estimated_library_size"), Some(4867123));
    }

    #[test]
    fn cleaned_dedup_bam_is_not_remade() {
        use super::run_deduplication;
        use crate::config::PipelineConfig;
        use crate::manager::runner::RecordingRunner;
        use crate::manager::{PipelineManager, RunOptions};
        use crate::stages::{Context, Layout};
        use crate::Sample;

        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::default();
        let mut pm = PipelineManager::new("ngsrep", dir.path(), 1, "4000M", RunOptions::default(), Box::new(runner.clone())).unwrap();
        let sample = Sample { name: "s1".to_string(), genome: "mm10".to_string(), ..Default::default() };
        let config = PipelineConfig::default();
        let layout = Layout::new(dir.path(), &sample);
        std::fs::create_dir_all(&layout.aligned).unwrap();
        for ext in ["bam", "bam.bai", "dedup.metrics.txt", "dedup.unique.bam", "dedup.unique.bam.bai", "dedup.unique.bw"] {
            std::fs::write(layout.aligned_file(ext), "x").unwrap();
        }
        let bam = layout.aligned_file("bam");
        let mut ctx = Context { sample: &sample, config: &config, layout, pm: &mut pm };

        run_deduplication(&mut ctx, &bam).unwrap();

        assert!(runner.commands.borrow().is_empty());
    }
}

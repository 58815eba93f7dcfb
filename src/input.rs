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

//! Validating and staging the raw reads.
//!
//! Raw inputs are first linked (or, for several lanes, merged) into the
//! `raw/` folder under uniform names and then converted to gzipped fastq
//! files in `fastq/`, which is the format STAR reads.
//!

use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;

use crate::command::CommandBuilder;
use crate::manager::PipelineManager;
use crate::manager::Stage;
use crate::manager::Task;
use crate::Sample;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputProblem {
    Missing,
    Empty,
    UnsupportedFormat,
    MixedFormats,
    MissingRead2,
    UnpairedReads { r1: u64, r2: u64 },
}

#[derive(Debug, Clone)]
pub struct InputError {
    pub path: PathBuf,
    pub problem: InputProblem,
}

impl std::fmt::Display for InputError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let path = self.path.display();
        match &self.problem {
            InputProblem::Missing => write!(f, "Could not find: {}", path),
            InputProblem::Empty => write!(f, "File exists but is empty: {}", path),
            InputProblem::UnsupportedFormat => write!(f, "Unsupported input format (expected .fastq, .fastq.gz or .bam): {}", path),
            InputProblem::MixedFormats => write!(f, "Lanes of one read have different formats: {}", path),
            InputProblem::MissingRead2 => write!(f, "Paired-end reads need --input2 unless the input is a bam file: {}", path),
            InputProblem::UnpairedReads { r1, r2 } => write!(f, "Fastq files are not paired, {} has {} reads but read 1 has {}", path, r2, r1),
        }
    }
}

impl std::error::Error for InputError {}

fn input_error(
    path: &Path,
    problem: InputProblem,
) -> E {
    Box::new(InputError { path: path.to_path_buf(), problem })
}

/// Raw read formats accepted as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Fastq,
    FastqGz,
    Bam,
}

impl InputFormat {
    /// Guesses the format from the file extension.
    pub fn from_path(
        path: &Path,
    ) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".fastq.gz") || name.ends_with(".fq.gz") {
            Some(InputFormat::FastqGz)
        } else if name.ends_with(".fastq") || name.ends_with(".fq") {
            Some(InputFormat::Fastq)
        } else if name.ends_with(".bam") {
            Some(InputFormat::Bam)
        } else {
            None
        }
    }

    /// Extension used for files staged in the raw folder.
    pub fn extension(&self) -> &'static str {
        match self {
            InputFormat::Fastq => "fastq",
            InputFormat::FastqGz => "fastq.gz",
            InputFormat::Bam => "bam",
        }
    }
}

/// Fails if `path` does not exist or is empty.
pub fn check_input_file(
    path: &Path,
) -> Result<(), E> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {
            info!("Local input file: {}", path.display());
            Ok(())
        },
        Ok(meta) if meta.is_file() => Err(input_error(path, InputProblem::Empty)),
        _ => Err(input_error(path, InputProblem::Missing)),
    }
}

/// Checks every input file of `sample` and that the read layout is usable.
pub fn validate_inputs(
    sample: &Sample,
) -> Result<(), E> {
    if sample.input.is_empty() {
        return Err(input_error(Path::new(""), InputProblem::Missing))
    }
    for path in sample.input.iter().chain(sample.input2.iter()) {
        check_input_file(path)?;
    }
    for lanes in [&sample.input, &sample.input2] {
        lane_format(lanes)?;
    }
    if sample.is_paired() && sample.input2.is_empty() && lane_format(&sample.input)? != Some(InputFormat::Bam) {
        return Err(input_error(&sample.input[0], InputProblem::MissingRead2))
    }
    Ok(())
}

/// Common format of the lanes of one read.
fn lane_format(
    lanes: &[PathBuf],
) -> Result<Option<InputFormat>, E> {
    let mut format: Option<InputFormat> = None;
    for path in lanes {
        let this = InputFormat::from_path(path).ok_or_else(|| input_error(path, InputProblem::UnsupportedFormat))?;
        match format {
            Some(seen) if seen != this => return Err(input_error(path, InputProblem::MixedFormats)),
            _ => format = Some(this),
        }
    }
    Ok(format)
}

/// Total size of `paths` in megabytes, rounded to two decimals.
pub fn file_size_mb(
    paths: &[PathBuf],
) -> Result<f64, E> {
    let mut bytes: u64 = 0;
    for path in paths {
        bytes += std::fs::metadata(path)?.len();
    }
    Ok(crate::round2(bytes as f64 / (1024.0 * 1024.0)))
}

/// Number of records in a (possibly gzipped) fastq file.
pub fn count_reads(
    path: &Path,
) -> Result<u64, E> {
    let mut reader = needletail::parse_fastx_file(path)?;
    let mut count: u64 = 0;
    while let Some(record) = reader.next() {
        record?;
        count += 1;
    }
    Ok(count)
}

/// Gzip compresses `input` into `output`.
pub fn gzip_file(
    input: &Path,
    output: &Path,
) -> Result<(), E> {
    let mut conn_in = BufReader::new(File::open(input)?);
    let mut conn_out = GzEncoder::new(BufWriter::new(File::create(output)?), Compression::default());
    std::io::copy(&mut conn_in, &mut conn_out)?;
    conn_out.finish()?.flush()?;
    Ok(())
}

/// Symlinks `target` to `link`, replacing an existing link.
pub fn force_symlink(
    target: &Path,
    link: &Path,
) -> Result<(), E> {
    let target = std::fs::canonicalize(target)?;
    if link.is_symlink() || link.exists() {
        std::fs::remove_file(link)?;
    }
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

/// Removes repeated paths keeping the first occurrence.
pub fn dedup_paths(
    paths: Vec<PathBuf>,
) -> Vec<PathBuf> {
    let mut seen: Vec<PathBuf> = Vec::new();
    for path in paths {
        if !seen.contains(&path) {
            seen.push(path);
        }
    }
    seen
}

/// Links or merges the lanes of each read into `raw_folder`.
///
/// A single file is symlinked as `<sample>[_R1|_R2].<ext>`. Several lanes
/// are concatenated (fastq) or merged with `samtools merge` (bam) into
/// `<sample>[_R1|_R2].merged.<ext>`. Returns the local paths in read order
/// with duplicates removed.
///
pub fn merge_or_link(
    pm: &mut PipelineManager,
    reads: &[&[PathBuf]],
    raw_folder: &Path,
    sample_name: &str,
    samtools: &str,
) -> Result<Vec<PathBuf>, E> {
    std::fs::create_dir_all(raw_folder)?;
    let n_reads = reads.iter().filter(|x| !x.is_empty()).count();

    let mut local: Vec<PathBuf> = Vec::new();
    for (idx, lanes) in reads.iter().enumerate() {
        let format = match lane_format(lanes)? {
            Some(format) => format,
            None => continue,
        };
        // repeated lanes are merged once
        let lanes = dedup_paths(lanes.to_vec());
        let suffix = if n_reads > 1 { format!("_R{}", idx + 1) } else { String::new() };

        if lanes.len() == 1 {
            let link = raw_folder.join(format!("{}{}.{}", sample_name, suffix, format.extension()));
            let source = lanes[0].clone();
            let link_out = link.clone();
            pm.run(Stage::new(&[&link])
                   .native(&format!("link {} to {}", source.display(), link.display()), move || force_symlink(&source, &link_out)))?;
            local.push(link);
        } else {
            let merged = raw_folder.join(format!("{}{}.merged.{}", sample_name, suffix, format.extension()));
            let cmd = match format {
                InputFormat::Bam => CommandBuilder::new(samtools).args(["merge", "-f"]).path(&merged).args(lanes.iter().map(|x| crate::command::shell_quote(&x.to_string_lossy()))).build(),
                _ => CommandBuilder::new("cat").args(lanes.iter().map(|x| crate::command::shell_quote(&x.to_string_lossy()))).stdout_to(&merged).build(),
            };
            pm.run(Stage::new(&[&merged]).shell(cmd))?;
            local.push(merged);
        }
    }

    Ok(dedup_paths(local))
}

/// Conversion of the staged raw inputs into gzipped fastq.
pub struct FastqConversion<'a> {
    pub tasks: Vec<Task<'a>>,
    /// Common prefix of the fastq files, `<fastq_folder>/<sample>`.
    pub prefix: PathBuf,
    /// `<prefix>_R1.fastq.gz` and, for paired data, `<prefix>_R2.fastq.gz`.
    pub outputs: Vec<PathBuf>,
}

/// Builds the tasks converting `local_inputs` into gzipped fastq files.
///
/// Gzipped fastq inputs are linked, plain fastq inputs are compressed and
/// bam inputs are converted with `samtools fastq`.
///
pub fn input_to_fastq<'a>(
    local_inputs: &[PathBuf],
    sample_name: &str,
    paired: bool,
    fastq_folder: &Path,
    samtools: &str,
) -> Result<FastqConversion<'a>, E> {
    std::fs::create_dir_all(fastq_folder)?;
    let prefix = fastq_folder.join(sample_name);
    let mut outputs = vec![PathBuf::from(format!("{}_R1.fastq.gz", prefix.display()))];
    if paired {
        outputs.push(PathBuf::from(format!("{}_R2.fastq.gz", prefix.display())));
    }

    let first = local_inputs.first().ok_or_else(|| input_error(fastq_folder, InputProblem::Missing))?;
    let format = InputFormat::from_path(first).ok_or_else(|| input_error(first, InputProblem::UnsupportedFormat))?;

    let mut tasks: Vec<Task<'a>> = Vec::new();
    if format == InputFormat::Bam {
        let cmd = if paired {
            CommandBuilder::new(samtools)
                .args(["fastq", "-n"])
                .arg("-1").path(&outputs[0])
                .arg("-2").path(&outputs[1])
                .args(["-0", "/dev/null", "-s", "/dev/null"])
                .path(first)
                .build()
        } else {
            CommandBuilder::new(samtools)
                .args(["fastq", "-n"])
                .arg("-0").path(&outputs[0])
                .path(first)
                .build()
        };
        tasks.push(Task::shell(cmd));
    } else {
        if local_inputs.len() < outputs.len() {
            return Err(input_error(first, InputProblem::MissingRead2))
        }
        for (input, output) in local_inputs.iter().zip(outputs.iter()) {
            let input = input.clone();
            let output = output.clone();
            let task = match InputFormat::from_path(&input) {
                Some(InputFormat::FastqGz) => Task::native(&format!("link {} to {}", input.display(), output.display()), move || force_symlink(&input, &output)),
                Some(InputFormat::Fastq) => Task::native(&format!("gzip {} to {}", input.display(), output.display()), move || gzip_file(&input, &output)),
                _ => return Err(input_error(&input, InputProblem::MixedFormats)),
            };
            tasks.push(task);
        }
    }

    Ok(FastqConversion { tasks, prefix, outputs })
}

/// Counts the reads of the staged fastq files and reports them.
///
/// Reports `Raw_reads`, counted from the raw read 1 input when it is fastq,
/// and `Fastq_reads`, counted from the staged read 1 file. For paired data
/// the read 2 file must hold the same number of reads.
///
pub fn check_fastq(
    pm: &mut PipelineManager,
    local_inputs: &[PathBuf],
    outputs: &[PathBuf],
    paired: bool,
) -> Result<(), E> {
    let fastq_reads = count_reads(&outputs[0])?;
    let raw_reads = match local_inputs.first() {
        Some(raw) if InputFormat::from_path(raw) != Some(InputFormat::Bam) => count_reads(raw)?,
        _ => fastq_reads,
    };
    pm.report_result("Raw_reads", raw_reads)?;
    pm.report_result("Fastq_reads", fastq_reads)?;

    if paired {
        let r2_reads = count_reads(&outputs[1])?;
        if r2_reads != fastq_reads {
            return Err(input_error(&outputs[1], InputProblem::UnpairedReads { r1: fastq_reads, r2: r2_reads }))
        }
    }
    Ok(())
}

/// Validates, merges and converts the reads of `sample`.
///
/// Returns the staged read 1 and read 2 fastq files.
pub fn stage_inputs(
    pm: &mut PipelineManager,
    sample: &Sample,
    raw_folder: &Path,
    fastq_folder: &Path,
    samtools: &str,
) -> Result<Vec<PathBuf>, E> {
    let local_inputs = merge_or_link(pm, &[&sample.input, &sample.input2], raw_folder, &sample.name, samtools)?;
    let conversion = input_to_fastq(&local_inputs, &sample.name, sample.is_paired(), fastq_folder, samtools)?;

    let outputs = conversion.outputs.clone();
    let paired = sample.is_paired();
    let inputs_for_check = local_inputs.clone();
    let outputs_for_check = outputs.clone();
    pm.run(Stage::new(&outputs)
           .tasks(conversion.tasks)
           .follow(move |pm| check_fastq(pm, &inputs_for_check, &outputs_for_check, paired)))?;
    pm.clean_add(format!("{}*.fastq", conversion.prefix.display()), true);

    Ok(outputs)
}

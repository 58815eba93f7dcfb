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
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use clap::CommandFactory;
use clap::Parser;
use log::error;
use log::info;
use log::warn;

use ngsrep::config::PipelineConfig;
use ngsrep::manager::runner::ProcessRunner;
use ngsrep::manager::PipelineManager;
use ngsrep::manager::RunOptions;
use ngsrep::parser::bedtools::read_depths;
use ngsrep::stages::coverage;
use ngsrep::Sample;

mod cli;

type E = Box<dyn std::error::Error>;

const PIPELINE_NAME: &str = "ngsrep";

/// Initializes the logger with verbosity given in `log_max_level`.
fn init_log(log_max_level: usize) {
    stderrlog::new()
    .module(module_path!())
    .quiet(false)
    .verbosity(log_max_level)
    .timestamp(stderrlog::Timestamp::Second)
    .init()
    .unwrap();
}

fn run(
    sample: &Sample,
    output_parent: &Path,
    config: Option<&PathBuf>,
    cores: usize,
    mem: &str,
    opts: RunOptions,
) -> Result<(), E> {
    let config = match config {
        Some(path) => {
            info!("Reading pipeline configuration from {}", path.display());
            PipelineConfig::from_path(path)?
        },
        None => {
            warn!("No pipeline configuration given, using the default tool names");
            PipelineConfig::default()
        },
    };

    let outfolder = std::path::absolute(output_parent.join(&sample.name))?;
    let mut pm = PipelineManager::new(PIPELINE_NAME, &outfolder, cores, mem, opts, Box::new(ProcessRunner))?;
    ngsrep::run_pipeline(sample, &config, &mut pm)
}

fn fold(
    plus: &Path,
    minus: &Path,
    mapped_reads: f64,
    out_file: Option<&PathBuf>,
) -> Result<(), E> {
    let norm_factor = coverage::normalization_factor(Some(mapped_reads))?;
    let plus_depths = read_depths(&mut BufReader::new(File::open(plus)?))?;
    let minus_depths = read_depths(&mut BufReader::new(File::open(minus)?))?;
    let profile = coverage::fold_coverage(&plus_depths, &minus_depths, ngsrep::IAP_CONSENSUS_LEN, norm_factor);

    let mut conn_out: Box<dyn Write> = match out_file {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };
    coverage::write_profile(&profile, &mut conn_out)
}

fn main() {
    let cli = cli::Cli::parse();

    // Subcommands:
    match &cli.command {
        // Run
        Some(cli::Commands::Run {
            sample_name,
            input,
            input2,
            genome,
            output_parent,
            read_type,
            protocol,
            cores,
            mem,
            config,
            dry_run,
            recover,
            new_start,
            dirty,
            force_follow,
            verbose,
        }) => {
            init_log(if *verbose { 3 } else { 2 });

            let sample = Sample {
                name: sample_name.clone(),
                input: input.clone(),
                input2: input2.clone(),
                read_type: *read_type,
                protocol: *protocol,
                genome: genome.clone(),
            };
            let opts = RunOptions {
                dry_run: *dry_run,
                recover: *recover,
                new_start: *new_start,
                dirty: *dirty,
                force_follow: *force_follow,
            };

            if let Err(e) = run(&sample, output_parent, config.as_ref(), *cores, mem, opts) {
                error!("{}", e);
                std::process::exit(1);
            }
        },

        // Fold
        Some(cli::Commands::Fold {
            plus,
            minus,
            mapped_reads,
            out_file,
            verbose,
        }) => {
            init_log(if *verbose { 3 } else { 2 });

            if let Err(e) = fold(plus, minus, *mapped_reads, out_file.as_ref()) {
                error!("{}", e);
                std::process::exit(1);
            }
        },

        None => {
            let _ = cli::Cli::command().print_help();
        },
    }
}

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
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ngsrep::Protocol;
use ngsrep::ReadType;

#[derive(Parser)]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    // Run the repeat analysis pipeline for one sample
    Run {
        // Sample name, also the name of the output folder
        #[arg(short = 'S', long = "sample-name", required = true)]
        sample_name: String,

        // Read 1 file(s), one per lane
        #[arg(short = 'I', long = "input", required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        // Read 2 file(s) for paired-end data
        #[arg(long = "input2", required = false, num_args = 1..)]
        input2: Vec<PathBuf>,

        // Genome assembly
        #[arg(short = 'G', long = "genome", required = true)]
        genome: String,

        // Parent of the sample output folder
        #[arg(short = 'O', long = "output-parent", required = true)]
        output_parent: PathBuf,

        // single or paired
        #[arg(short = 'Q', long = "single-or-paired", default_value = "single")]
        read_type: ReadType,

        // Library protocol
        #[arg(long = "protocol", required = false, help = "Protocol (ChIP, C&T, C&R, RNA, ATAC)")]
        protocol: Option<Protocol>,

        // Threads passed to the tools
        #[arg(short = 'P', long = "cores", default_value_t = 1)]
        cores: usize,

        // Memory limit passed to the tools
        #[arg(short = 'M', long = "mem", default_value = "4000M")]
        mem: String,

        // Pipeline configuration
        #[arg(short = 'C', long = "config", required = false, help = "Pipeline configuration (YAML)")]
        config: Option<PathBuf>,

        // Only print the commands
        #[arg(long = "dry-run", default_value_t = false)]
        dry_run: bool,

        // Overwrite locks left by an interrupted run
        #[arg(short = 'R', long = "recover", default_value_t = false)]
        recover: bool,

        // Rerun every stage
        #[arg(short = 'N', long = "new-start", default_value_t = false)]
        new_start: bool,

        // Keep intermediate files
        #[arg(short = 'D', long = "dirty", default_value_t = false)]
        dirty: bool,

        // Run follow-ups of skipped stages
        #[arg(short = 'F', long = "force-follow", default_value_t = false)]
        force_follow: bool,

        // Verbosity
        #[arg(long = "verbose", default_value_t = false)]
        verbose: bool,
    },

    // Fold strand coverage from bedtools onto the IAP consensus
    Fold {
        // bedtools coverage -d output for the plus strand copies
        #[arg(long = "plus", required = true)]
        plus: PathBuf,

        // bedtools coverage -d output for the minus strand copies
        #[arg(long = "minus", required = true)]
        minus: PathBuf,

        // Number of mapped reads used for normalization
        #[arg(long = "mapped-reads", required = true)]
        mapped_reads: f64,

        // Output file path
        #[arg(short = 'o', long = "output", required = false)]
        out_file: Option<PathBuf>,

        // Verbosity
        #[arg(long = "verbose", default_value_t = false)]
        verbose: bool,
    },
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn parse_paired_run() {
        use super::{Cli, Commands};
        use clap::Parser;
        use ngsrep::{Protocol, ReadType};

        let cli = Cli::try_parse_from([
            "ngsrep", "run", "-S", "s1", "-I", "l1_R1.fq.gz", "l2_R1.fq.gz", "--input2", "l1_R2.fq.gz", "l2_R2.fq.gz",
            "-G", "mm10", "-O", "out", "-Q", "paired", "--protocol", "C&T", "-P", "8",
        ]).unwrap();

        match cli.command {
            Some(Commands::Run { input, input2, read_type, protocol, cores, mem, .. }) => {
                assert_eq!(input.len(), 2);
                assert_eq!(input2.len(), 2);
                assert_eq!(read_type, ReadType::Paired);
                assert_eq!(protocol, Some(Protocol::CutAndTag));
                assert_eq!(cores, 8);
                assert_eq!(mem, "4000M");
            },
            _ => panic!("expected the run subcommand"),
        }
    }

    #[test]
    fn invalid_protocol_is_rejected() {
        use super::Cli;
        use clap::Parser;

        let got = Cli::try_parse_from(["ngsrep", "run", "-S", "s1", "-I", "r.fq.gz", "-G", "mm10", "-O", "out", "--protocol", "DNase"]);
        assert!(got.is_err());
    }

    #[test]
    fn parse_fold() {
        use super::{Cli, Commands};
        use clap::Parser;

        let cli = Cli::try_parse_from(["ngsrep", "fold", "--plus", "p.txt", "--minus", "m.txt", "--mapped-reads", "2500000"]).unwrap();
        match cli.command {
            Some(Commands::Fold { mapped_reads, out_file, .. }) => {
                assert_eq!(mapped_reads, 2500000.0);
                assert!(out_file.is_none());
            },
            _ => panic!("expected the fold subcommand"),
        }
    }
}

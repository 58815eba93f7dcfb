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

//! Pipeline configuration.
//!
//! The configuration is a YAML file with three sections:
//!
//! ```yaml
//! tools:
//!   trimmomatic: /opt/trimmomatic/trimmomatic-0.39.jar
//!   picard: /opt/picard/picard.jar
//! resources:
//!   adapters: ${ADAPTERS}/NexteraPE-PE.fa
//!   star_index: /genomes/mm10/star_index
//!   star_index_annotated: /genomes/mm10/STAR
//!   gag_plus: /annotations/IAP.gag.plus.bed
//!   gag_minus: /annotations/IAP.gag.minus.bed
//!   repeats_saf: /annotations/mm10.repeats.saf
//! parameters:
//!   java_settings: -Xmx8g
//! ```
//!
//! Every tool defaults to its usual executable name. `${VAR}` references are
//! replaced with the value of the environment variable before parsing.
//!

use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

type E = Box<dyn std::error::Error>;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

#[derive(Debug, Clone)]
pub struct MissingResource {
    pub name: String,
}

impl std::fmt::Display for MissingResource {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "resource '{}' is not set in the pipeline configuration", self.name)
    }
}

impl std::error::Error for MissingResource {}

#[derive(Debug, Clone)]
pub struct MissingEnvVars {
    pub names: Vec<String>,
}

impl std::fmt::Display for MissingEnvVars {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "missing environment variable(s): {}", self.names.join(", "))
    }
}

impl std::error::Error for MissingEnvVars {}

/// Executables or jar files of the external tools.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tools {
    pub java: String,
    pub fastqc: String,
    /// Path to the Trimmomatic jar.
    pub trimmomatic: String,
    pub samtools: String,
    /// Path to the Picard jar.
    pub picard: String,
    #[serde(alias = "STAR")]
    pub star: String,
    #[serde(alias = "bamCoverage")]
    pub bamcoverage: String,
    pub bedtools: String,
    #[serde(alias = "featureCounts")]
    pub featurecounts: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            java: "java".to_string(),
            fastqc: "fastqc".to_string(),
            trimmomatic: "trimmomatic.jar".to_string(),
            samtools: "samtools".to_string(),
            picard: "picard.jar".to_string(),
            star: "STAR".to_string(),
            bamcoverage: "bamCoverage".to_string(),
            bedtools: "bedtools".to_string(),
            featurecounts: "featureCounts".to_string(),
        }
    }
}

/// Reference files. None of these have sensible defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Resources {
    /// Adapter fasta passed to ILLUMINACLIP.
    pub adapters: Option<PathBuf>,
    /// STAR index of the plain genome.
    pub star_index: Option<PathBuf>,
    /// STAR index built with a transcript annotation, used for RNA-seq.
    pub star_index_annotated: Option<PathBuf>,
    /// IAP consensus intervals on the plus strand.
    pub gag_plus: Option<PathBuf>,
    /// IAP consensus intervals on the minus strand.
    pub gag_minus: Option<PathBuf>,
    /// Repeat annotation in SAF format.
    #[serde(alias = "repeats_SAF")]
    pub repeats_saf: Option<PathBuf>,
}

fn require<'a>(
    value: &'a Option<PathBuf>,
    name: &str,
) -> Result<&'a Path, E> {
    value.as_deref().ok_or_else(|| Box::new(MissingResource { name: name.to_string() }) as E)
}

impl Resources {
    pub fn adapters(&self) -> Result<&Path, E> {
        require(&self.adapters, "adapters")
    }

    /// STAR index for the alignment profile.
    ///
    /// The annotated index falls back to the plain index if it is not set.
    pub fn star_index(
        &self,
        annotated: bool,
    ) -> Result<&Path, E> {
        if annotated && self.star_index_annotated.is_some() {
            return require(&self.star_index_annotated, "star_index_annotated")
        }
        require(&self.star_index, "star_index")
    }

    pub fn gag_plus(&self) -> Result<&Path, E> {
        require(&self.gag_plus, "gag_plus")
    }

    pub fn gag_minus(&self) -> Result<&Path, E> {
        require(&self.gag_minus, "gag_minus")
    }

    pub fn repeats_saf(&self) -> Result<&Path, E> {
        require(&self.repeats_saf, "repeats_saf")
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Parameters {
    /// JVM options for Trimmomatic. Defaults to `-Xmx<mem>`.
    pub java_settings: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub tools: Tools,
    pub resources: Resources,
    pub parameters: Parameters,
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
pub fn substitute_env_vars(
    input: &str,
) -> Result<String, E> {
    let mut result = input.to_string();
    let mut missing: Vec<String> = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => result = result.replace(&cap[0], &val),
            Err(_) => missing.push(var_name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(Box::new(MissingEnvVars { names: missing }))
    }
    Ok(result)
}

impl PipelineConfig {
    /// Parses a configuration from a YAML string.
    ///
    /// An empty document gives the default configuration.
    pub fn parse(
        yaml: &str,
    ) -> Result<Self, E> {
        let substituted = substitute_env_vars(yaml)?;
        if substituted.trim().is_empty() {
            return Ok(Self::default())
        }
        let config: PipelineConfig = serde_yaml::from_str(&substituted)?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(
        path: P,
    ) -> Result<Self, E> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&contents)
    }
}

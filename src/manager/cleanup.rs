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
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use log::{debug, info, warn};

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CleanupEntry {
    pattern: String,
    conditional: bool,
}

/// Intermediate files to delete once the pipeline completes.
///
/// Entries are glob patterns. Conditional entries are kept when the pipeline
/// runs with `--dirty` and are instead listed in a cleanup script.
///
#[derive(Debug, Clone, Default)]
pub struct CleanupRegistry {
    entries: Vec<CleanupEntry>,
}

fn expand(
    pattern: &str,
) -> Result<Vec<PathBuf>, E> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in glob::glob(pattern)? {
        paths.push(entry?);
    }
    Ok(paths)
}

impl CleanupRegistry {
    pub fn add(
        &mut self,
        pattern: &str,
        conditional: bool,
    ) {
        let entry = CleanupEntry { pattern: pattern.to_string(), conditional };
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deletes the registered files.
    ///
    /// With `dirty` set the conditional entries are written as `rm` commands
    /// to `script` instead. Returns the deleted paths.
    pub fn run(
        &mut self,
        dirty: bool,
        script: &Path,
    ) -> Result<Vec<PathBuf>, E> {
        let mut removed: Vec<PathBuf> = Vec::new();
        let mut kept: Vec<PathBuf> = Vec::new();

        for entry in self.entries.drain(..) {
            let paths = expand(&entry.pattern)?;
            if paths.is_empty() {
                debug!("Nothing to clean for {}", entry.pattern);
            }
            for path in paths {
                if entry.conditional && dirty {
                    kept.push(path);
                } else if path.is_file() || path.is_symlink() {
                    match std::fs::remove_file(&path) {
                        Ok(()) => removed.push(path),
                        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
                    }
                }
            }
        }

        if !kept.is_empty() {
            info!("Dirty run, leaving {} intermediate file(s), see {}", kept.len(), script.display());
            let mut conn = BufWriter::new(File::create(script)?);
            for path in kept {
                writeln!(conn, "rm {}", crate::command::shell_quote(&path.to_string_lossy()))?;
            }
            conn.flush()?;
        }

        Ok(removed)
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn run_removes_matching_files() {
        use super::CleanupRegistry;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s_R1.fastq"), "@r\nA\n+\nI\n").unwrap();
        std::fs::write(dir.path().join("s_R2.fastq"), "@r\nA\n+\nI\n").unwrap();
        std::fs::write(dir.path().join("s_R1.fastq.gz"), "keep").unwrap();

        let mut registry = CleanupRegistry::default();
        registry.add(&dir.path().join("*.fastq").to_string_lossy(), true);

        let removed = registry.run(false, &dir.path().join("cleanup.sh")).unwrap();

        assert_eq!(removed.len(), 2);
        assert!(!dir.path().join("s_R1.fastq").exists());
        assert!(dir.path().join("s_R1.fastq.gz").exists());
        assert!(registry.is_empty());
    }

    #[test]
    fn dirty_run_keeps_conditional_files() {
        use super::CleanupRegistry;

        let dir = tempfile::tempdir().unwrap();
        let conditional = dir.path().join("s.fc.tmp.txt");
        let manual = dir.path().join("s.dedup.bam");
        std::fs::write(&conditional, "x").unwrap();
        std::fs::write(&manual, "x").unwrap();

        let mut registry = CleanupRegistry::default();
        registry.add(&conditional.to_string_lossy(), true);
        registry.add(&manual.to_string_lossy(), false);

        let script = dir.path().join("cleanup.sh");
        let removed = registry.run(true, &script).unwrap();

        assert_eq!(removed, vec![manual.clone()]);
        assert!(conditional.exists());
        let contents = std::fs::read_to_string(&script).unwrap();
        assert_eq!(contents, format!("rm {}\n", conditional.display()));
    }

    #[test]
    fn add_ignores_duplicates() {
        use super::CleanupRegistry;

        let mut registry = CleanupRegistry::default();
        registry.add("a/*.log", true);
        registry.add("a/*.log", true);
        registry.add("a/*.log", false);

        assert_eq!(registry.len(), 2);
    }
}

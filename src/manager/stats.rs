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
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;

type E = Box<dyn std::error::Error>;

/// Append-only tab separated record file.
///
/// Each line is `name\tvalue\tannotation`. When an existing file is opened
/// the last record for each name wins, so a resumed run sees the values
/// reported by earlier runs.
///
#[derive(Debug, Clone)]
pub struct MetricStore {
    path: PathBuf,
    annotation: String,
    records: IndexMap<String, String>,
}

impl MetricStore {
    /// Opens the store at `path`, loading any records already there.
    pub fn open<P: AsRef<Path>>(
        path: P,
        annotation: &str,
    ) -> Result<Self, E> {
        let path = path.as_ref().to_path_buf();
        let mut records: IndexMap<String, String> = IndexMap::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                let mut fields = line.split('\t');
                let name = fields.next().unwrap_or_default();
                if name.is_empty() {
                    continue;
                }
                let value = fields.next().unwrap_or_default();
                records.insert(name.to_string(), value.to_string());
            }
        }

        Ok(Self { path, annotation: annotation.to_string(), records })
    }

    /// Persists `value` under `name`, replacing any earlier value.
    pub fn report(
        &mut self,
        name: &str,
        value: &str,
    ) -> Result<(), E> {
        let mut conn = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(conn, "{}\t{}\t{}", name, value, self.annotation)?;
        self.records.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.records.get(name).map(|x| x.as_str())
    }

    /// Records in the order they were first reported.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

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

//! Shell command line construction.
//!
//! Commands are assembled from a list of optional tokens. Absent tokens are
//! dropped and the rest are joined with single spaces in their original
//! order, so that the paired-end and single-end variants of a command can be
//! written as one list.
//!
//! ## Usage
//!
//! ```rust
//! use ngsrep::command::CommandBuilder;
//!
//! let paired = false;
//! let cmd = CommandBuilder::new("trimmomatic")
//!     .arg(if paired { "PE" } else { "SE" })
//!     .arg("r1.fastq.gz")
//!     .opt_arg(paired.then_some("r2.fastq.gz"))
//!     .arg("ILLUMINACLIP:adapters.fa:2:30:10")
//!     .build();
//!
//! assert_eq!(cmd, "trimmomatic SE r1.fastq.gz ILLUMINACLIP:adapters.fa:2:30:10");
//! ```
//!

use std::path::Path;

/// Joins the present, non-empty tokens of `chunks` with single spaces.
pub fn build_command<I, S>(
    chunks: I,
) -> String
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    let mut cmd = String::new();
    chunks.into_iter().flatten().for_each(|chunk| {
        let chunk = chunk.as_ref().trim();
        if !chunk.is_empty() {
            if !cmd.is_empty() {
                cmd.push(' ');
            }
            cmd.push_str(chunk);
        }
    });
    cmd
}

/// Quotes `token` for the shell if it contains anything besides plain path
/// characters.
pub fn shell_quote(
    token: &str,
) -> String {
    let plain = !token.is_empty() && token.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '=' | ',' | '@' | '%')
    });
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

/// Builder over [build_command].
#[derive(Clone, Debug, Default)]
pub struct CommandBuilder {
    chunks: Vec<Option<String>>,
}

impl CommandBuilder {
    pub fn new<S: AsRef<str>>(
        program: S,
    ) -> Self {
        Self { chunks: vec![Some(program.as_ref().to_string())] }
    }

    /// Appends a token as is. Tokens may contain several arguments.
    pub fn arg<S: AsRef<str>>(
        mut self,
        token: S,
    ) -> Self {
        self.chunks.push(Some(token.as_ref().to_string()));
        self
    }

    /// Appends several tokens as is.
    pub fn args<I, S>(
        mut self,
        tokens: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tokens.into_iter().for_each(|token| self.chunks.push(Some(token.as_ref().to_string())));
        self
    }

    /// Appends `token` if it is present.
    pub fn opt_arg<S: AsRef<str>>(
        mut self,
        token: Option<S>,
    ) -> Self {
        self.chunks.push(token.map(|x| x.as_ref().to_string()));
        self
    }

    /// Appends a shell quoted path.
    pub fn path<P: AsRef<Path>>(
        mut self,
        path: P,
    ) -> Self {
        self.chunks.push(Some(shell_quote(&path.as_ref().to_string_lossy())));
        self
    }

    /// Appends a shell quoted path if it is present.
    pub fn opt_path<P: AsRef<Path>>(
        mut self,
        path: Option<P>,
    ) -> Self {
        self.chunks.push(path.map(|x| shell_quote(&x.as_ref().to_string_lossy())));
        self
    }

    /// Redirects stdout to `path`.
    pub fn stdout_to<P: AsRef<Path>>(
        self,
        path: P,
    ) -> Self {
        self.arg(">").path(path)
    }

    pub fn build(
        self,
    ) -> String {
        build_command(self.chunks)
    }
}

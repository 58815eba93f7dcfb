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
use std::process::Command;
use std::process::Stdio;

type E = Box<dyn std::error::Error>;

/// Executes the external commands of a pipeline.
pub trait Runner {
    /// Runs `cmd` through the shell, blocking until it exits.
    ///
    /// Returns the exit code, or -1 if the process was killed by a signal.
    fn run_shell(&mut self, cmd: &str) -> Result<i32, E>;

    /// True if `tool` resolves to an executable.
    fn check_command(&mut self, tool: &str) -> bool;
}

/// Runs commands with `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl Runner for ProcessRunner {
    fn run_shell(
        &mut self,
        cmd: &str,
    ) -> Result<i32, E> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .status()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn check_command(
        &mut self,
        tool: &str,
    ) -> bool {
        let program = match tool.split_whitespace().next() {
            Some(program) => program,
            None => return false,
        };
        Command::new("sh")
            .arg("-c")
            .arg(format!("command -v {}", crate::command::shell_quote(program)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Records commands instead of running them.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingRunner {
    pub commands: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
    pub exit_code: i32,
    pub missing_tools: Vec<String>,
    pub spawn_fails: bool,
}

#[cfg(test)]
impl Runner for RecordingRunner {
    fn run_shell(
        &mut self,
        cmd: &str,
    ) -> Result<i32, E> {
        if self.spawn_fails {
            return Err(Box::new(std::io::Error::new(std::io::ErrorKind::NotFound, "sh: not found")))
        }
        self.commands.borrow_mut().push(cmd.to_string());
        Ok(self.exit_code)
    }

    fn check_command(
        &mut self,
        tool: &str,
    ) -> bool {
        !self.missing_tools.iter().any(|x| x == tool)
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn process_runner_reports_exit_codes() {
        use super::{ProcessRunner, Runner};

        let mut runner = ProcessRunner;
        assert_eq!(runner.run_shell("true").unwrap(), 0);
        assert_eq!(runner.run_shell("exit 3").unwrap(), 3);
    }

    #[test]
    fn process_runner_runs_pipes_and_redirects() {
        use super::{ProcessRunner, Runner};

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let cmd = format!("printf 'b\\na\\n' | sort > {}", out.display());

        let mut runner = ProcessRunner;
        assert_eq!(runner.run_shell(&cmd).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(out).unwrap(), "a\nb\n");
    }

    #[test]
    fn process_runner_checks_commands() {
        use super::{ProcessRunner, Runner};

        let mut runner = ProcessRunner;
        assert!(runner.check_command("sh"));
        assert!(!runner.check_command("ngsrep-surely-not-an-installed-tool"));
        assert!(!runner.check_command(""));
    }
}

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

//! Pipeline bookkeeping.
//!
//! [PipelineManager] executes [Stage]s, each of which consists of the
//! targets it produces and the tasks that produce them. A stage whose targets
//! all exist and are non-empty is skipped, which makes re-running the
//! pipeline on a partially completed output folder resume where the previous
//! run stopped.
//!
//! The manager also persists reported metrics to `stats.tsv`, tracks
//! intermediate files for cleanup and writes status flags to the output
//! folder.
//!
//! ## Usage
//!
//! ```rust
//! use ngsrep::manager::{PipelineManager, RunOptions, Stage};
//! use ngsrep::manager::runner::ProcessRunner;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut pm = PipelineManager::new("ngsrep", dir.path(), 1, "4000M", RunOptions::default(), Box::new(ProcessRunner)).unwrap();
//!
//! let target = dir.path().join("hello.txt");
//! let cmd = format!("echo hello > {}", target.display());
//!
//! // Runs the command and the follow-up
//! let ran = pm.run(Stage::new(&[&target]).shell(&cmd).follow(|pm| pm.report_result("Greetings", 1))).unwrap();
//! assert!(ran);
//! assert_eq!(pm.get_stat("Greetings"), Some("1"));
//!
//! // The target exists now, so this is skipped
//! let ran = pm.run(Stage::new(&[&target]).shell(&cmd)).unwrap();
//! assert!(!ran);
//!
//! pm.stop_pipeline().unwrap();
//! ```
//!

pub mod cleanup;
pub mod runner;
pub mod stats;

use cleanup::CleanupRegistry;
use runner::Runner;
use stats::MetricStore;

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use log::{error, info, warn};

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct CommandFailed {
    pub cmd: String,
    pub code: i32,
}

impl std::fmt::Display for CommandFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "command exited with status {}: {}", self.code, self.cmd)
    }
}

impl std::error::Error for CommandFailed {}

#[derive(Debug, Clone)]
pub struct LockedTarget {
    pub lock: PathBuf,
}

impl std::fmt::Display for LockedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "lock file {} exists, another run may be writing this target (use --recover to override)", self.lock.display())
    }
}

impl std::error::Error for LockedTarget {}

/// Flags controlling how [PipelineManager::run] treats existing outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Log the commands without running anything.
    pub dry_run: bool,
    /// Overwrite targets locked by an interrupted run.
    pub recover: bool,
    /// Rerun stages even if their targets exist.
    pub new_start: bool,
    /// Keep conditional intermediate files.
    pub dirty: bool,
    /// Run follow-ups of skipped stages.
    pub force_follow: bool,
}

/// A unit of work inside a [Stage].
pub enum Task<'a> {
    /// Command line run through the shell.
    Shell(String),
    /// Work done in-process.
    Native {
        label: String,
        func: Box<dyn FnOnce() -> Result<(), E> + 'a>,
    },
}

impl<'a> Task<'a> {
    pub fn shell<S: Into<String>>(
        cmd: S,
    ) -> Self {
        Task::Shell(cmd.into())
    }

    pub fn native<F>(
        label: &str,
        func: F,
    ) -> Self
    where
        F: FnOnce() -> Result<(), E> + 'a,
    {
        Task::Native { label: label.to_string(), func: Box::new(func) }
    }
}

type Follow<'a> = Box<dyn FnOnce(&mut PipelineManager) -> Result<(), E> + 'a>;

/// Tasks that produce a set of targets.
///
/// The follow-up runs after the tasks succeed and typically reports metrics
/// parsed from the outputs.
pub struct Stage<'a> {
    targets: Vec<PathBuf>,
    downstream: Vec<PathBuf>,
    tasks: Vec<Task<'a>>,
    follow: Option<Follow<'a>>,
    nofail: bool,
}

impl<'a> Stage<'a> {
    pub fn new<P: AsRef<Path>>(
        targets: &[P],
    ) -> Self {
        Self {
            targets: targets.iter().map(|x| x.as_ref().to_path_buf()).collect(),
            downstream: Vec::new(),
            tasks: Vec::new(),
            follow: None,
            nofail: false,
        }
    }

    pub fn task(
        mut self,
        task: Task<'a>,
    ) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks<I: IntoIterator<Item = Task<'a>>>(
        mut self,
        tasks: I,
    ) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn shell<S: Into<String>>(
        self,
        cmd: S,
    ) -> Self {
        self.task(Task::shell(cmd))
    }

    pub fn native<F>(
        self,
        label: &str,
        func: F,
    ) -> Self
    where
        F: FnOnce() -> Result<(), E> + 'a,
    {
        self.task(Task::native(label, func))
    }

    pub fn follow<F>(
        mut self,
        func: F,
    ) -> Self
    where
        F: FnOnce(&mut PipelineManager) -> Result<(), E> + 'a,
    {
        self.follow = Some(Box::new(func));
        self
    }

    /// Also treat the stage as done when all of `products` exist.
    ///
    /// For stages whose targets are intermediates removed at cleanup and
    /// consumed by a later stage producing `products`.
    pub fn done_if<P: AsRef<Path>>(
        mut self,
        products: &[P],
    ) -> Self {
        self.downstream.extend(products.iter().map(|x| x.as_ref().to_path_buf()));
        self
    }

    /// Log failures of the tasks instead of failing the pipeline.
    pub fn nofail(
        mut self,
    ) -> Self {
        self.nofail = true;
        self
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }
}

/// True if `path` exists and is not an empty file.
pub fn target_exists(
    path: &Path,
) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_dir() || meta.len() > 0,
        Err(_) => false,
    }
}

fn format_duration(
    elapsed: Duration,
) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Runs the stages of one pipeline invocation.
pub struct PipelineManager {
    name: String,
    outfolder: PathBuf,
    cores: usize,
    mem: String,
    opts: RunOptions,
    runner: Box<dyn Runner>,
    stats: MetricStore,
    objects: MetricStore,
    cleanup: CleanupRegistry,
    start: Instant,
    last_timestamp: Instant,
    failed: bool,
}

impl PipelineManager {
    /// Creates `outfolder`, loads earlier metrics and marks the run as running.
    pub fn new<P: AsRef<Path>>(
        name: &str,
        outfolder: P,
        cores: usize,
        mem: &str,
        opts: RunOptions,
        runner: Box<dyn Runner>,
    ) -> Result<Self, E> {
        let outfolder = outfolder.as_ref().to_path_buf();
        std::fs::create_dir_all(&outfolder)?;

        let stats = MetricStore::open(outfolder.join("stats.tsv"), name)?;
        let objects = MetricStore::open(outfolder.join("objects.tsv"), name)?;
        if !stats.is_empty() {
            info!("Loaded {} metric(s) from an earlier run", stats.len());
        }

        let now = Instant::now();
        let mut pm = Self {
            name: name.to_string(),
            outfolder,
            cores,
            mem: mem.to_string(),
            opts,
            runner,
            stats,
            objects,
            cleanup: CleanupRegistry::default(),
            start: now,
            last_timestamp: now,
            failed: false,
        };

        info!("### Pipeline run: {}", pm.name);
        info!("Output folder: {}", pm.outfolder.display());
        info!("Cores: {}, memory: {}", pm.cores, pm.mem);
        pm.set_status("running")?;
        Ok(pm)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outfolder(&self) -> &Path {
        &self.outfolder
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    pub fn mem(&self) -> &str {
        &self.mem
    }

    pub fn options(&self) -> &RunOptions {
        &self.opts
    }

    fn flag_path(
        &self,
        status: &str,
    ) -> PathBuf {
        self.outfolder.join(format!("{}_{}.flag", self.name, status))
    }

    fn set_status(
        &mut self,
        status: &str,
    ) -> Result<(), E> {
        for old in ["running", "completed", "failed"] {
            let path = self.flag_path(old);
            if old != status && path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        let mut conn = File::create(self.flag_path(status))?;
        writeln!(conn, "{}", status)?;
        Ok(())
    }

    fn lock_path(
        &self,
        target: &Path,
    ) -> PathBuf {
        let relative = target.strip_prefix(&self.outfolder).unwrap_or(target);
        let name = relative.to_string_lossy().trim_start_matches('/').replace('/', "__");
        self.outfolder.join(format!("lock.{}", name))
    }

    fn record_command(
        &self,
        cmd: &str,
    ) -> Result<(), E> {
        let path = self.outfolder.join(format!("{}_commands.sh", self.name));
        let mut conn = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(conn, "{}", cmd)?;
        Ok(())
    }

    fn release_locks(
        locks: &[PathBuf],
    ) {
        for lock in locks {
            if let Err(e) = std::fs::remove_file(lock) {
                warn!("Could not remove lock file {}: {}", lock.display(), e);
            }
        }
    }

    /// Runs `stage` unless all of its targets exist.
    ///
    /// A stage with a lock file left behind is never done, its targets may
    /// be partial. Returns true if the tasks ran and succeeded.
    ///
    /// ## Errors
    ///
    /// Fails the pipeline if a target is locked by another run, if a task
    /// fails and the stage is not `nofail`, or if the follow-up fails.
    pub fn run(
        &mut self,
        stage: Stage,
    ) -> Result<bool, E> {
        let Stage { targets, downstream, tasks, follow, nofail } = stage;

        let locks: Vec<PathBuf> = targets.iter().map(|x| self.lock_path(x)).collect();
        let mut locked = false;
        for lock in &locks {
            if lock.exists() {
                if self.opts.recover {
                    warn!("Found lock file {}, recovering", lock.display());
                    std::fs::remove_file(lock)?;
                    locked = true;
                } else {
                    return Err(self.fail_pipeline(Box::new(LockedTarget { lock: lock.clone() })))
                }
            }
        }

        let all_exist = |paths: &[PathBuf]| !paths.is_empty() && paths.iter().all(|x| target_exists(x));
        let done = all_exist(&targets) || all_exist(&downstream);
        if done && !locked && !self.opts.new_start {
            let names: Vec<String> = targets.iter().map(|x| x.display().to_string()).collect();
            info!("Target exists: `{}`", names.join(" "));
            if self.opts.force_follow {
                if let Some(follow) = follow {
                    if let Err(e) = follow(self) {
                        return Err(self.fail_pipeline(e))
                    }
                }
            }
            return Ok(false)
        }

        if self.opts.dry_run {
            for task in &tasks {
                match task {
                    Task::Shell(cmd) => info!("Dry run: `{}`", cmd),
                    Task::Native { label, .. } => info!("Dry run: {}", label),
                }
            }
            return Ok(false)
        }

        for lock in &locks {
            File::create(lock)?;
        }

        for task in tasks {
            let res: Result<(), E> = match task {
                Task::Shell(cmd) => {
                    info!("> `{}`", cmd);
                    let started = Instant::now();
                    match self.record_command(&cmd).and_then(|_| self.runner.run_shell(&cmd)) {
                        Ok(0) => {
                            info!("Command completed. Elapsed time: {}", format_duration(started.elapsed()));
                            Ok(())
                        },
                        Ok(code) => Err(Box::new(CommandFailed { cmd, code })),
                        Err(e) => Err(e),
                    }
                },
                Task::Native { label, func } => {
                    info!("> {}", label);
                    self.record_command(&format!("# {}", label)).and_then(|_| func())
                },
            };

            if let Err(e) = res {
                Self::release_locks(&locks);
                if nofail {
                    warn!("{} (continuing)", e);
                    return Ok(false)
                }
                return Err(self.fail_pipeline(e))
            }
        }

        Self::release_locks(&locks);

        if let Some(follow) = follow {
            if let Err(e) = follow(self) {
                return Err(self.fail_pipeline(e))
            }
        }
        Ok(true)
    }

    /// True if `tool` can be executed.
    pub fn check_command(
        &mut self,
        tool: &str,
    ) -> bool {
        self.runner.check_command(tool)
    }

    /// Persists a metric.
    pub fn report_result<V: std::fmt::Display>(
        &mut self,
        name: &str,
        value: V,
    ) -> Result<(), E> {
        let value = value.to_string();
        info!("> `{}`\t{}\t_RES_", name, value);
        self.stats.report(name, &value)
    }

    /// Persists the path of a report file.
    pub fn report_object<P: AsRef<Path>>(
        &mut self,
        name: &str,
        path: P,
    ) -> Result<(), E> {
        let path = path.as_ref().to_string_lossy().to_string();
        info!("> `{}`\t{}\t_OBJ_", name, path);
        self.objects.report(name, &path)
    }

    /// Value of a metric reported by this or an earlier run.
    pub fn get_stat(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.stats.get(name)
    }

    /// Value of a metric parsed as `T`, None if absent or unparseable.
    pub fn get_stat_as<T: std::str::FromStr>(
        &self,
        name: &str,
    ) -> Option<T> {
        self.stats.get(name).and_then(|x| x.trim().parse::<T>().ok())
    }

    /// Registers files matching `pattern` for deletion when the pipeline stops.
    pub fn clean_add<S: AsRef<str>>(
        &mut self,
        pattern: S,
        conditional: bool,
    ) {
        self.cleanup.add(pattern.as_ref(), conditional);
    }

    /// Logs a progress message with the time since the previous one.
    pub fn timestamp(
        &mut self,
        label: &str,
    ) {
        let now = Instant::now();
        info!("{} (elapsed: {}, total: {})", label, format_duration(now - self.last_timestamp), format_duration(now - self.start));
        self.last_timestamp = now;
    }

    /// Marks the run as failed and hands `err` back for propagation.
    pub fn fail_pipeline(
        &mut self,
        err: E,
    ) -> E {
        if !self.failed {
            self.failed = true;
            error!("Pipeline failed: {}", err);
            if let Err(e) = self.set_status("failed") {
                error!("Could not write the failed flag: {}", e);
            }
        }
        err
    }

    /// Cleans up intermediate files and marks the run as completed.
    ///
    /// A dry run is not marked as completed.
    pub fn stop_pipeline(
        &mut self,
    ) -> Result<(), E> {
        if self.opts.dry_run {
            info!("Dry run finished, nothing was cleaned up");
        } else {
            let script = self.outfolder.join(format!("{}_cleanup.sh", self.name));
            let removed = self.cleanup.run(self.opts.dirty, &script)?;
            info!("Cleaned up {} intermediate file(s)", removed.len());
            self.set_status("completed")?;
        }
        self.timestamp("### Pipeline completed");
        info!("Total time: {}", format_duration(self.start.elapsed()));
        Ok(())
    }
}

// Tests
#[cfg(test)]
mod tests {
    use super::runner::RecordingRunner;
    use super::{PipelineManager, RunOptions};

    fn manager(dir: &std::path::Path, opts: RunOptions, runner: &RecordingRunner) -> PipelineManager {
        PipelineManager::new("ngsrep", dir, 2, "4000M", opts, Box::new(runner.clone())).unwrap()
    }

    #[test]
    fn run_skips_existing_targets() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("s.bam");
        std::fs::write(&target, "bam").unwrap();

        let runner = RecordingRunner::default();
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);

        let ran = pm.run(Stage::new(&[&target]).shell("samtools index s.bam")).unwrap();

        assert!(!ran);
        assert!(runner.commands.borrow().is_empty());
    }

    #[test]
    fn run_reruns_empty_targets() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("s.bam");
        std::fs::write(&target, "").unwrap();

        let runner = RecordingRunner::default();
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);

        let ran = pm.run(Stage::new(&[&target]).shell("cmd")).unwrap();

        assert!(ran);
        assert_eq!(*runner.commands.borrow(), vec!["cmd".to_string()]);
    }

    #[test]
    fn second_run_invokes_nothing() {
        use super::Stage;
        use std::cell::Cell;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let calls = Cell::new(0);

        let runner = RecordingRunner::default();
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);

        for _ in 0..2 {
            pm.run(Stage::new(&[&target])
                   .shell("produce out.txt")
                   .native("write out.txt", || {
                       calls.set(calls.get() + 1);
                       std::fs::write(&target, "done")?;
                       Ok(())
                   })).unwrap();
        }

        assert_eq!(calls.get(), 1);
        assert_eq!(runner.commands.borrow().len(), 1);
    }

    #[test]
    fn follow_runs_only_when_stage_runs() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");

        let runner = RecordingRunner::default();
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);

        pm.run(Stage::new(&[&target])
               .native("write", || { std::fs::write(&target, "x")?; Ok(()) })
               .follow(|pm| pm.report_result("Runs", 1))).unwrap();
        pm.run(Stage::new(&[&target])
               .follow(|pm| pm.report_result("Runs", 2))).unwrap();

        assert_eq!(pm.get_stat("Runs"), Some("1"));
    }

    #[test]
    fn force_follow_runs_follow_of_skipped_stage() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        std::fs::write(&target, "x").unwrap();

        let runner = RecordingRunner::default();
        let opts = RunOptions { force_follow: true, ..Default::default() };
        let mut pm = manager(dir.path(), opts, &runner);

        let ran = pm.run(Stage::new(&[&target]).shell("cmd").follow(|pm| pm.report_result("Followed", "yes"))).unwrap();

        assert!(!ran);
        assert!(runner.commands.borrow().is_empty());
        assert_eq!(pm.get_stat("Followed"), Some("yes"));
    }

    #[test]
    fn new_start_ignores_existing_targets() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        std::fs::write(&target, "x").unwrap();

        let runner = RecordingRunner::default();
        let opts = RunOptions { new_start: true, ..Default::default() };
        let mut pm = manager(dir.path(), opts, &runner);

        assert!(pm.run(Stage::new(&[&target]).shell("cmd")).unwrap());
        assert_eq!(runner.commands.borrow().len(), 1);
    }

    #[test]
    fn dry_run_executes_nothing() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");

        let runner = RecordingRunner::default();
        let opts = RunOptions { dry_run: true, ..Default::default() };
        let mut pm = manager(dir.path(), opts, &runner);

        let ran = pm.run(Stage::new(&[&target])
                         .shell("cmd")
                         .native("native", || panic!("must not run"))
                         .follow(|pm| pm.report_result("Followed", 1))).unwrap();

        assert!(!ran);
        assert!(runner.commands.borrow().is_empty());
        assert!(pm.get_stat("Followed").is_none());
    }

    #[test]
    fn failed_command_fails_pipeline() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");

        let runner = RecordingRunner { exit_code: 1, ..Default::default() };
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);

        let err = pm.run(Stage::new(&[&target]).shell("false")).unwrap_err();

        assert!(err.to_string().contains("status 1"));
        assert!(dir.path().join("ngsrep_failed.flag").exists());
        assert!(!dir.path().join("ngsrep_running.flag").exists());
        assert!(!dir.path().join("lock.out.txt").exists());
    }

    #[test]
    fn nofail_command_continues() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("report.html");

        let runner = RecordingRunner { exit_code: 2, ..Default::default() };
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);

        let ran = pm.run(Stage::new(&[&target]).shell("fastqc x").nofail()).unwrap();

        assert!(!ran);
        assert!(!dir.path().join("ngsrep_failed.flag").exists());
    }

    #[test]
    fn lock_file_blocks_without_recover() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("aligned").join("s.bam");
        std::fs::write(dir.path().join("lock.aligned__s.bam"), "").unwrap();

        let runner = RecordingRunner::default();
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);
        assert!(pm.run(Stage::new(&[&target]).shell("cmd")).is_err());
        assert!(runner.commands.borrow().is_empty());

        let runner = RecordingRunner::default();
        let opts = RunOptions { recover: true, ..Default::default() };
        let mut pm = manager(dir.path(), opts, &runner);
        assert!(pm.run(Stage::new(&[&target]).shell("cmd")).unwrap());
        assert!(!dir.path().join("lock.aligned__s.bam").exists());
    }

    #[test]
    fn locked_partial_target_is_not_done() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("s.plus.txt");
        std::fs::write(&target, "partial").unwrap();
        std::fs::write(dir.path().join("lock.s.plus.txt"), "").unwrap();

        let runner = RecordingRunner::default();
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);
        let err = pm.run(Stage::new(&[&target]).shell("bedtools coverage")).unwrap_err();
        assert!(err.to_string().contains("lock.s.plus.txt"));
        assert!(runner.commands.borrow().is_empty());

        let runner = RecordingRunner::default();
        let opts = RunOptions { recover: true, ..Default::default() };
        let mut pm = manager(dir.path(), opts, &runner);
        assert!(pm.run(Stage::new(&[&target]).shell("bedtools coverage")).unwrap());
        assert_eq!(*runner.commands.borrow(), vec!["bedtools coverage".to_string()]);
        assert!(!dir.path().join("lock.s.plus.txt").exists());
    }

    #[test]
    fn spawn_failure_releases_locks() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");

        let runner = RecordingRunner { spawn_fails: true, ..Default::default() };
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);

        assert!(pm.run(Stage::new(&[&target]).shell("cmd")).is_err());
        assert!(!dir.path().join("lock.out.txt").exists());
        assert!(dir.path().join("ngsrep_failed.flag").exists());

        // the next run is not blocked
        let runner = RecordingRunner::default();
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);
        assert!(pm.run(Stage::new(&[&target]).shell("cmd")).unwrap());
    }

    #[test]
    fn downstream_products_mark_stage_done() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let intermediate = dir.path().join("s.dedup.bam");
        let product = dir.path().join("s.dedup.unique.bam");

        let runner = RecordingRunner::default();
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);
        assert!(pm.run(Stage::new(&[&intermediate]).done_if(&[&product]).shell("dedup")).unwrap());

        std::fs::write(&product, "bam").unwrap();
        assert!(!pm.run(Stage::new(&[&intermediate]).done_if(&[&product]).shell("dedup")).unwrap());
        assert_eq!(runner.commands.borrow().len(), 1);
    }

    #[test]
    fn dry_run_is_not_marked_completed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::default();
        let opts = RunOptions { dry_run: true, ..Default::default() };
        let mut pm = manager(dir.path(), opts, &runner);

        pm.stop_pipeline().unwrap();

        assert!(!dir.path().join("ngsrep_completed.flag").exists());
    }

    #[test]
    fn commands_are_logged_to_script() {
        use super::Stage;

        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::default();
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);

        pm.run(Stage::new(&[dir.path().join("a")]).shell("first")).unwrap();
        pm.run(Stage::new(&[dir.path().join("b")]).shell("second")).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("ngsrep_commands.sh")).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn metrics_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::default();
        {
            let mut pm = manager(dir.path(), RunOptions::default(), &runner);
            pm.report_result("Mapped_reads", 90).unwrap();
        }
        let pm = manager(dir.path(), RunOptions::default(), &runner);

        assert_eq!(pm.get_stat_as::<u64>("Mapped_reads"), Some(90));
        assert_eq!(pm.get_stat_as::<f64>("Mapped_reads"), Some(90.0));
        assert_eq!(pm.get_stat_as::<u64>("Raw_reads"), None);
    }

    #[test]
    fn stop_pipeline_cleans_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("s.fc.tmp.txt");
        std::fs::write(&tmp, "x").unwrap();

        let runner = RecordingRunner::default();
        let mut pm = manager(dir.path(), RunOptions::default(), &runner);
        pm.clean_add(tmp.to_string_lossy(), false);
        pm.stop_pipeline().unwrap();

        assert!(!tmp.exists());
        assert!(dir.path().join("ngsrep_completed.flag").exists());
        assert!(!dir.path().join("ngsrep_running.flag").exists());
    }

    #[test]
    fn target_exists_requires_content() {
        use super::target_exists;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        assert!(!target_exists(&path));
        std::fs::write(&path, "").unwrap();
        assert!(!target_exists(&path));
        std::fs::write(&path, "1").unwrap();
        assert!(target_exists(&path));
    }
}

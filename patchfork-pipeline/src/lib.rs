use std::{
    fmt,
    path::{Path, PathBuf},
};

use patchfork_config::{Config, ForkSpec, Source, UploadTarget};
use patchfork_jobs::{Job, Runner};
use walkdir::WalkDir;

pub use workspace::Workspace;

mod workspace;

/// The directory, relative to a workspace, that `setup.py` writes
/// distributions into.
pub const ARTIFACTS_DIR: &str = "dist";

/// Errors that abort the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("'{0}' can't be used as a workspace directory name")]
    InvalidForkName(String),
    #[error("failed to prepare workspace '{}'", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fork '{fork}': couldn't run {stage} command")]
    Run {
        fork: String,
        stage: Stage,
        #[source]
        source: patchfork_jobs::Error,
    },
    #[error("fork '{fork}': {stage} command `{command}` {}{}", describe_exit(.exit_code), describe_output(.stdout, .stderr))]
    CommandFailed {
        fork: String,
        stage: Stage,
        command: String,
        exit_code: Option<i32>,
        /// Empty when the runner streamed output instead of capturing it.
        stdout: String,
        stderr: String,
    },
    #[error("fork '{fork}': unsupported {what} '{kind}'")]
    Unsupported {
        fork: String,
        what: &'static str,
        kind: String,
    },
    #[error("fork '{fork}': no build artifacts found in '{}'", .dir.display())]
    NoArtifacts { fork: String, dir: PathBuf },
    #[error("path '{}' is not valid UTF-8", .0.display())]
    NonUtf8Path(PathBuf),
    #[error("failed to collect build artifacts")]
    Artifacts(#[source] walkdir::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

/// Captured output of a failed command, stdout first.
fn describe_output(stdout: &str, stderr: &str) -> String {
    let streams = [stdout.trim_end(), stderr.trim_end()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    if streams.is_empty() {
        String::new()
    } else {
        format!(":\n{}", streams.join("\n"))
    }
}

fn path_str(path: &Path) -> Result<&str, Error> {
    path.to_str()
        .ok_or_else(|| Error::NonUtf8Path(path.to_path_buf()))
}

/// The steps of a fork job, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Patch,
    PreBuild,
    Build,
    Upload,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Patch => "patch",
            Stage::PreBuild => "pre-build",
            Stage::Build => "build",
            Stage::Upload => "upload",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs that apply to every fork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Interpreter used to run `setup.py`.
    pub python: String,
    /// Delete a job's workspace when one of its stages fails.
    pub cleanup_on_failure: bool,
    /// Fail on source kinds and upload targets without a handler.
    pub strict: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            python: "python".to_string(),
            cleanup_on_failure: false,
            strict: false,
        }
    }
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Settings {
            cleanup_on_failure: config.cleanup_on_failure,
            strict: config.strict,
            ..Default::default()
        }
    }
}

/// The forks that were released by a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub completed: Vec<String>,
}

/// Drives each fork through fetch, patch, build and upload.
///
/// Workspaces and patch files live under `root`. The process working
/// directory is never changed; every command is started in its workspace.
#[derive(Debug)]
pub struct Pipeline<R> {
    runner: R,
    root: PathBuf,
    settings: Settings,
}

impl<R: Runner> Pipeline<R> {
    pub fn new(runner: R, root: impl Into<PathBuf>, settings: Settings) -> Self {
        Pipeline {
            runner,
            root: root.into(),
            settings,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// The patch file applied to fork `name`.
    pub fn patch_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.patch"))
    }

    /// Runs every fork in configuration order, stopping at the first failure.
    pub fn run_all(&mut self, config: &Config) -> Result<Report, Error> {
        let mut report = Report::default();
        for (name, spec) in config.forks.iter() {
            self.run_fork(name, spec)?;
            report.completed.push(name.to_string());
        }
        Ok(report)
    }

    /// Runs a single fork job in a fresh workspace.
    pub fn run_fork(&mut self, name: &str, spec: &ForkSpec) -> Result<(), Error> {
        log::info!(fork = name, source = spec.source.kind(), upload:% = spec.upload_index; "starting fork");
        let workspace = Workspace::reset(&self.root, name)?;
        match self.run_stages(name, spec, workspace.path()) {
            Ok(()) => {
                workspace.remove()?;
                log::info!(fork = name; "fork released");
                Ok(())
            }
            Err(err) if self.settings.cleanup_on_failure => {
                log::warn!(fork = name; "removing workspace of failed fork");
                if let Err(cleanup_err) = workspace.remove() {
                    log::error!(fork = name; "{cleanup_err}");
                }
                Err(err)
            }
            Err(err) => {
                log::warn!(fork = name, path:% = workspace.path().display(); "leaving workspace of failed fork in place");
                Err(err)
            }
        }
    }

    fn run_stages(&mut self, name: &str, spec: &ForkSpec, dir: &Path) -> Result<(), Error> {
        self.fetch(name, &spec.source, dir)?;
        self.patch(name, dir)?;
        self.build(name, spec, dir)?;
        self.upload(name, &spec.upload_index, dir)
    }

    fn fetch(&mut self, name: &str, source: &Source, dir: &Path) -> Result<(), Error> {
        match source {
            Source::Git(url) => {
                let job = Job::new(Stage::Fetch.as_str(), ["git", "clone", url.as_str(), "."], dir);
                self.exec(name, Stage::Fetch, &job)
            }
            Source::Other { kind, .. } => self.unsupported(name, "source", kind),
        }
    }

    fn patch(&mut self, name: &str, dir: &Path) -> Result<(), Error> {
        let patch_file = self.patch_path(name);
        let job = Job::new(
            Stage::Patch.as_str(),
            ["patch", "-p0", "-i", path_str(&patch_file)?],
            dir,
        );
        self.exec(name, Stage::Patch, &job)
    }

    fn build(&mut self, name: &str, spec: &ForkSpec, dir: &Path) -> Result<(), Error> {
        let pre_build = Job::shell(Stage::PreBuild.as_str(), &spec.before_build_script, dir);
        self.exec(name, Stage::PreBuild, &pre_build)?;

        let mut args = vec![self.settings.python.clone(), "setup.py".to_string()];
        args.extend(spec.distributions.iter().cloned());
        let build = Job::new(Stage::Build.as_str(), args, dir);
        self.exec(name, Stage::Build, &build)
    }

    fn upload(&mut self, name: &str, target: &UploadTarget, dir: &Path) -> Result<(), Error> {
        match target {
            UploadTarget::PyPI => {
                let mut args = vec!["twine".to_string(), "upload".to_string()];
                args.extend(collect_artifacts(name, dir)?);
                let job = Job::new(Stage::Upload.as_str(), args, dir);
                self.exec(name, Stage::Upload, &job)
            }
            UploadTarget::Other(kind) => self.unsupported(name, "upload target", kind),
        }
    }

    fn unsupported(&self, name: &str, what: &'static str, kind: &str) -> Result<(), Error> {
        if self.settings.strict {
            return Err(Error::Unsupported {
                fork: name.to_string(),
                what,
                kind: kind.to_string(),
            });
        }
        log::warn!(fork = name; "skipping unsupported {what} '{kind}'");
        Ok(())
    }

    fn exec(&mut self, name: &str, stage: Stage, job: &Job) -> Result<(), Error> {
        let command = job.command_line();
        log::info!(fork = name, stage = stage.as_str(); "{command}");
        let outcome = self.runner.run(job).map_err(|source| Error::Run {
            fork: name.to_string(),
            stage,
            source,
        })?;
        if outcome.success {
            return Ok(());
        }
        Err(Error::CommandFailed {
            fork: name.to_string(),
            stage,
            command,
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        })
    }
}

/// Lists every file under the workspace's artifact directory, relative to the
/// workspace, in depth-first order with each directory's entries sorted by
/// file name.
fn collect_artifacts(name: &str, dir: &Path) -> Result<Vec<String>, Error> {
    let artifacts_dir = dir.join(ARTIFACTS_DIR);
    if !artifacts_dir.is_dir() {
        return Err(Error::NoArtifacts {
            fork: name.to_string(),
            dir: artifacts_dir,
        });
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&artifacts_dir).sort_by_file_name() {
        let entry = entry.map_err(Error::Artifacts)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        files.push(path_str(relative)?.to_string());
    }
    if files.is_empty() {
        return Err(Error::NoArtifacts {
            fork: name.to_string(),
            dir: artifacts_dir,
        });
    }
    Ok(files)
}

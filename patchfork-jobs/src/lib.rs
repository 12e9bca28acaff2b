use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Errors starting an external command.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("job '{0}' has no command to run")]
    Empty(String),
    #[error("failed to start '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// An external command and the directory it runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Short label for logs, e.g. `fetch`.
    pub name: String,
    /// The program followed by its arguments.
    pub args: Vec<String>,
    /// The working directory of the spawned process.
    pub dir: PathBuf,
}

impl Job {
    pub fn new<I, S>(name: impl Into<String>, args: I, dir: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Job {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// A job that hands `script` to `sh -c`.
    pub fn shell(name: impl Into<String>, script: &str, dir: impl AsRef<Path>) -> Self {
        Job::new(name, ["sh", "-c", script], dir)
    }

    /// The arguments joined with spaces, for display only.
    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }
}

/// What an external command reported back.
///
/// `stdout` and `stderr` are empty unless the runner captured them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Outcome {
    pub fn ok() -> Self {
        Outcome {
            success: true,
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Outcome {
            success: false,
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }
}

/// Runs external commands and reports whether they succeeded.
pub trait Runner {
    fn run(&mut self, job: &Job) -> Result<Outcome, Error>;
}

/// Where a child's stdout and stderr go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Straight to this process's terminal, as the command writes it.
    #[default]
    Inherit,
    /// Collected into the [`Outcome`].
    Capture,
}

/// Runs jobs as child processes of this one.
///
/// The child always shares this process's stdin so that credential prompts
/// from `git` or `twine` can be answered.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    output: OutputMode,
}

impl SystemRunner {
    /// A runner that streams command output to the terminal.
    pub fn inherit() -> Self {
        SystemRunner {
            output: OutputMode::Inherit,
        }
    }

    /// A runner that collects command output into each [`Outcome`].
    pub fn capturing() -> Self {
        SystemRunner {
            output: OutputMode::Capture,
        }
    }
}

impl Runner for SystemRunner {
    fn run(&mut self, job: &Job) -> Result<Outcome, Error> {
        let (program, args) = job
            .args
            .split_first()
            .ok_or_else(|| Error::Empty(job.name.clone()))?;
        log::debug!(job = job.name.as_str(), dir:% = job.dir.display(); "spawning {}", job.command_line());
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&job.dir).stdin(Stdio::inherit());
        let spawn_err = |source| Error::Spawn {
            program: program.clone(),
            source,
        };
        let outcome = match self.output {
            OutputMode::Inherit => {
                let status = cmd
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()
                    .map_err(spawn_err)?;
                Outcome {
                    success: status.success(),
                    exit_code: status.code(),
                    ..Default::default()
                }
            }
            OutputMode::Capture => {
                let output = cmd
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .map_err(spawn_err)?;
                Outcome {
                    success: output.status.success(),
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                }
            }
        };
        Ok(outcome)
    }
}

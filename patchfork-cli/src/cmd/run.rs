use anyhow::{Context, Error};
use std::path::{Path, PathBuf};

use clap::Args;
use patchfork_config::Config;
use patchfork_jobs::SystemRunner;
use patchfork_pipeline::{Pipeline, Settings};

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// The path to the config file (default is '$PWD/patchfork.yml').
    #[arg(
        short = 'f',
        long = "config-file",
        value_name = "PATH",
        required = false
    )]
    pub config_file: Option<PathBuf>,
    /// Delete the workspace of a fork whose pipeline failed.
    #[arg(long)]
    pub cleanup_on_failure: bool,
    /// Fail on source kinds and upload targets that have no handler.
    #[arg(long)]
    pub strict: bool,
    /// The Python interpreter used to run `setup.py`.
    #[arg(long, value_name = "PATH")]
    pub python: Option<String>,
}

impl RunArgs {
    /// Command line flags can only switch the config's policies on.
    fn settings(&self, config: &Config) -> Settings {
        let mut settings = Settings::from_config(config);
        settings.cleanup_on_failure |= self.cleanup_on_failure;
        settings.strict |= self.strict;
        if let Some(python) = &self.python {
            settings.python = python.clone();
        }
        settings
    }
}

/// Release every fork in the config file.
///
/// Workspaces are created in, and patch files read from, the directory
/// patchfork was started in.
pub fn run(args: &RunArgs) -> Result<(), Error> {
    let root = std::env::current_dir().context("failed to read the current directory")?;
    release(args, &root)
}

fn release(args: &RunArgs, root: &Path) -> Result<(), Error> {
    let config = Config::load(args.config_file.as_ref()).context("failed to load config file")?;
    log::debug!(forks = config.forks.len(); "loaded config");
    let mut pipeline = Pipeline::new(SystemRunner::inherit(), root, args.settings(&config));
    let report = pipeline.run_all(&config).context("release pipeline aborted")?;
    log::info!(released = report.completed.len(); "all forks released");
    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use tempfile::TempDir;

    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            config_file: None,
            cleanup_on_failure: false,
            strict: false,
            python: None,
        }
    }

    #[test]
    fn flags_override_config() {
        let config = Config::from_yaml("forks: {}").unwrap();
        let args = RunArgs {
            cleanup_on_failure: true,
            python: Some("python3".to_string()),
            ..args()
        };
        let settings = args.settings(&config);
        assert!(settings.cleanup_on_failure);
        assert!(!settings.strict);
        assert_eq!(settings.python, "python3");
    }

    #[test]
    fn config_policies_survive_absent_flags() {
        let config = Config::from_yaml("strict: true\nforks: {}").unwrap();
        let settings = args().settings(&config);
        assert!(settings.strict);
        assert_eq!(settings.python, "python");
    }

    #[cfg(unix)]
    #[test]
    fn failing_pre_build_aborts_and_keeps_workspace() {
        let root = TempDir::new().unwrap();
        let config_file = root.path().join("patchfork.yml");
        std::fs::write(
            &config_file,
            indoc! {"
                forks:
                  foo:
                    source: {sdist: foo==1.0}
                    before_build_script: 'false'
                    distributions: [sdist]
                    upload_index: S3
            "},
        )
        .unwrap();
        std::fs::write(root.path().join("foo.patch"), "").unwrap();
        let args = RunArgs {
            config_file: Some(config_file),
            ..args()
        };
        let err = release(&args, root.path()).unwrap_err();
        assert_eq!(err.to_string(), "release pipeline aborted");
        assert!(root.path().join("foo").is_dir());
    }

    #[test]
    fn missing_config_is_reported() {
        let root = TempDir::new().unwrap();
        let args = RunArgs {
            config_file: Some(root.path().join("patchfork.yml")),
            ..args()
        };
        let err = release(&args, root.path()).unwrap_err();
        assert_eq!(err.to_string(), "failed to load config file");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}

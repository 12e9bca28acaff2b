use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use serde::{
    Deserialize, Deserializer,
    de::{MapAccess, Visitor},
};

/// The default name of the config file.
pub const CONFIG_FILENAME: &str = "patchfork.yml";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("couldn't load config file at '{}': {}", .0.display(), .1)]
    MissingConfig(PathBuf, std::io::Error),
    #[error(transparent)]
    Parse(#[from] serde_yaml::Error),
    #[error("fork '{fork}' has an invalid distribution kind '{distribution}'")]
    InvalidDistribution { fork: String, distribution: String },
}

/// The configuration for patchfork.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The fork jobs to run, in the order they appear in the file.
    pub forks: Forks,
    /// Whether to delete a job's workspace when one of its stages fails.
    #[serde(default)]
    pub cleanup_on_failure: bool,
    /// Whether unknown source kinds and upload targets abort the run instead
    /// of being skipped.
    #[serde(default)]
    pub strict: bool,
}

/// One fork job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ForkSpec {
    /// Where the upstream source comes from.
    pub source: Source,
    /// Shell command run inside the fetched tree before building.
    pub before_build_script: String,
    /// Distribution kinds handed to `setup.py`, e.g. `sdist`, `bdist_wheel`.
    pub distributions: Vec<String>,
    /// Where the built artifacts are published.
    pub upload_index: UploadTarget,
}

/// The fetch mechanism of a fork, written as a mapping with a single key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>")]
pub enum Source {
    /// A git repository URL, cloned into the workspace.
    Git(String),
    /// Any source kind without a fetch handler.
    Other { kind: String, value: String },
}

impl Source {
    /// The tag this source was declared with.
    pub fn kind(&self) -> &str {
        match self {
            Source::Git(_) => "git",
            Source::Other { kind, .. } => kind,
        }
    }
}

impl TryFrom<BTreeMap<String, String>> for Source {
    type Error = String;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!(
                "source must have exactly one key, found {}",
                map.len()
            ));
        }
        let (kind, value) = map.into_iter().next().ok_or("empty source")?;
        let source = match kind.as_str() {
            "git" => Source::Git(value),
            _ => Source::Other { kind, value },
        };
        Ok(source)
    }
}

/// The destination that artifacts are uploaded to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum UploadTarget {
    PyPI,
    Other(String),
}

impl From<String> for UploadTarget {
    fn from(name: String) -> Self {
        if name == "PyPI" {
            UploadTarget::PyPI
        } else {
            UploadTarget::Other(name)
        }
    }
}

impl fmt::Display for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadTarget::PyPI => write!(f, "PyPI"),
            UploadTarget::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Fork jobs keyed by name, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forks(Vec<(String, ForkSpec)>);

impl Forks {
    /// Iterates over `(name, spec)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ForkSpec)> {
        self.0.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    #[cfg(test)]
    fn get(&self, name: &str) -> Option<&ForkSpec> {
        self.iter().find(|(n, _)| *n == name).map(|(_, spec)| spec)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Forks {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ForksVisitor;

        impl<'de> Visitor<'de> for ForksVisitor {
            type Value = Forks;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of fork name to fork configuration")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Forks, A::Error> {
                let mut forks: Vec<(String, ForkSpec)> = Vec::new();
                while let Some((name, spec)) = access.next_entry::<String, ForkSpec>()? {
                    if forks.iter().any(|(existing, _)| *existing == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate fork name '{name}'"
                        )));
                    }
                    forks.push((name, spec));
                }
                Ok(Forks(forks))
            }
        }

        deserializer.deserialize_map(ForksVisitor)
    }
}

impl Config {
    /// Parse a config from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Distribution kinds are joined into a single command line, so they
    /// can't carry whitespace.
    fn validate(&self) -> Result<(), Error> {
        for (name, spec) in self.forks.iter() {
            if let Some(bad) = spec
                .distributions
                .iter()
                .find(|d| d.is_empty() || d.chars().any(char::is_whitespace))
            {
                return Err(Error::InvalidDistribution {
                    fork: name.to_string(),
                    distribution: bad.clone(),
                });
            }
        }
        Ok(())
    }

    /// Load the config file from disk given an absolute or relative path.
    fn load_inner(path: impl AsRef<Path>) -> Result<Self, Error> {
        let full_path = std::path::absolute(path).map_err(Error::IO)?;
        let contents = std::fs::read_to_string(&full_path)
            .map_err(|err| Error::MissingConfig(full_path, err))?;
        Self::from_yaml(&contents)
    }

    /// Compute the path of the config file with an optional override for its
    /// location.
    fn get_path(maybe_override: Option<&PathBuf>) -> Result<PathBuf, Error> {
        if let Some(relpath) = maybe_override {
            std::path::absolute(relpath).map_err(Error::IO)
        } else {
            std::env::current_dir()
                .map_err(Error::IO)
                .map(|p| p.join(CONFIG_FILENAME))
        }
    }

    /// Load the config file from disk from either the default location or a
    /// user-supplied override location.
    pub fn load(path_override: Option<&PathBuf>) -> Result<Self, Error> {
        let path = Self::get_path(path_override)?;
        Self::load_inner(path)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use tempfile::TempDir;

    use super::*;

    const FOO: &str = indoc! {"
        forks:
          foo:
            source:
              git: https://example/repo.git
            before_build_script: \"true\"
            distributions: [sdist, bdist_wheel]
            upload_index: PyPI
    "};

    #[test]
    fn parses_single_fork() {
        let config = Config::from_yaml(FOO).unwrap();
        assert_eq!(config.forks.len(), 1);
        assert!(!config.cleanup_on_failure);
        assert!(!config.strict);
        let foo = config.forks.get("foo").unwrap();
        assert_eq!(foo.source, Source::Git("https://example/repo.git".to_string()));
        assert_eq!(foo.before_build_script, "true");
        assert_eq!(foo.distributions, vec!["sdist", "bdist_wheel"]);
        assert_eq!(foo.upload_index, UploadTarget::PyPI);
    }

    #[test]
    fn preserves_fork_order() {
        let input = indoc! {"
            forks:
              zeta:
                source: {git: z}
                before_build_script: 'true'
                distributions: [sdist]
                upload_index: PyPI
              alpha:
                source: {git: a}
                before_build_script: 'true'
                distributions: [sdist]
                upload_index: PyPI
              mid:
                source: {git: m}
                before_build_script: 'true'
                distributions: [sdist]
                upload_index: PyPI
        "};
        let config = Config::from_yaml(input).unwrap();
        let names = config.forks.iter().map(|(n, _)| n).collect::<Vec<_>>();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn parses_unknown_variants() {
        let input = indoc! {"
            strict: true
            cleanup_on_failure: true
            forks:
              bar:
                source:
                  sdist: bar==1.0
                before_build_script: 'true'
                distributions: [sdist]
                upload_index: S3
        "};
        let config = Config::from_yaml(input).unwrap();
        assert!(config.strict);
        assert!(config.cleanup_on_failure);
        let bar = config.forks.get("bar").unwrap();
        assert_eq!(
            bar.source,
            Source::Other {
                kind: "sdist".to_string(),
                value: "bar==1.0".to_string()
            }
        );
        assert_eq!(bar.source.kind(), "sdist");
        assert_eq!(bar.upload_index, UploadTarget::Other("S3".to_string()));
    }

    #[test]
    fn rejects_source_with_two_keys() {
        let input = indoc! {"
            forks:
              foo:
                source: {git: a, sdist: b}
                before_build_script: 'true'
                distributions: [sdist]
                upload_index: PyPI
        "};
        assert!(matches!(Config::from_yaml(input), Err(Error::Parse(_))));
    }

    #[test]
    fn rejects_duplicate_fork_names() {
        let input = indoc! {"
            forks:
              foo:
                source: {git: a}
                before_build_script: 'true'
                distributions: [sdist]
                upload_index: PyPI
              foo:
                source: {git: b}
                before_build_script: 'true'
                distributions: [sdist]
                upload_index: PyPI
        "};
        assert!(Config::from_yaml(input).is_err());
    }

    #[test]
    fn rejects_distribution_with_whitespace() {
        let input = indoc! {"
            forks:
              foo:
                source: {git: a}
                before_build_script: 'true'
                distributions: ['sdist --formats=zip']
                upload_index: PyPI
        "};
        let err = Config::from_yaml(input).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidDistribution { ref fork, .. } if fork == "foo"
        ));
    }

    #[test]
    fn loads_from_override_path() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("custom.yml");
        std::fs::write(&path, FOO).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.forks.len(), 1);
    }

    #[test]
    fn reports_missing_file() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join(CONFIG_FILENAME);
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::MissingConfig(p, _) if p == path));
    }
}

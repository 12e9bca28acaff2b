use std::{
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use crate::Error;

/// The scratch directory a single fork is fetched, patched and built in.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Creates an empty `<root>/<name>` directory, deleting whatever was
    /// there before.
    pub fn reset(root: &Path, name: &str) -> Result<Self, Error> {
        let mut components = Path::new(name).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !single_normal {
            return Err(Error::InvalidForkName(name.to_string()));
        }
        let path = root.join(name);
        remove_path(&path)?;
        fs::create_dir(&path).map_err(|source| Error::Workspace {
            path: path.clone(),
            source,
        })?;
        Ok(Workspace { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the workspace and everything in it.
    pub fn remove(self) -> Result<(), Error> {
        remove_path(&self.path)
    }
}

fn remove_path(path: &Path) -> Result<(), Error> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            log::debug!(path:% = path.display(); "removing directory");
            fs::remove_dir_all(path)
        }
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    };
    result.map_err(|source| Error::Workspace {
        path: path.to_path_buf(),
        source,
    })
}

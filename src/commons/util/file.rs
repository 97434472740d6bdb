use std::{
    fmt, fs,
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::trace;
use serde::{de::DeserializeOwned, Serialize};

//------------ IoError -------------------------------------------------------

/// An io error with the context of what we tried to do.
#[derive(Debug)]
pub struct IoError {
    context: String,
    cause: io::Error,
}

impl IoError {
    pub fn new(context: String, cause: io::Error) -> Self {
        IoError { context, cause }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.cause.kind()
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}, cause: {}", self.context, self.cause)
    }
}

impl std::error::Error for IoError {}

//------------ Functions -----------------------------------------------------

/// Creates a sub dir if needed, return full path to it
pub fn sub_dir(base: &Path, name: &str) -> Result<PathBuf, IoError> {
    let mut full_path = base.to_path_buf();
    full_path.push(name);
    create_dir(&full_path)?;
    Ok(full_path)
}

pub fn create_dir(dir: &Path) -> Result<(), IoError> {
    if !dir.is_dir() {
        fs::create_dir_all(dir)
            .map_err(|e| IoError::new(format!("could not create dir: {}", dir.to_string_lossy()), e))?;
    }
    Ok(())
}

/// Derive the path for this file.
pub fn file_path(base_path: &Path, file_name: &str) -> PathBuf {
    let mut path = base_path.to_path_buf();
    path.push(file_name);
    path
}

/// Saves a file through a temporary sibling that is then renamed into place,
/// so that readers never see a partially written file.
pub fn save(content: &[u8], full_path: &Path) -> Result<(), IoError> {
    let tmp_path = stage(content, full_path)?;
    commit(&tmp_path, full_path)?;

    trace!("Saved file: {}", full_path.to_string_lossy());
    Ok(())
}

/// Writes the content for `full_path` to a temporary sibling and returns
/// the path of that sibling. Nothing is visible at `full_path` until the
/// sibling is committed.
pub fn stage(content: &[u8], full_path: &Path) -> Result<PathBuf, IoError> {
    if let Some(parent) = full_path.parent() {
        create_dir(parent)?;
    }

    let mut tmp_path = full_path.to_path_buf();
    tmp_path.set_extension("tmp");

    let mut f = File::create(&tmp_path)
        .map_err(|e| IoError::new(format!("Could not create file: {}", tmp_path.to_string_lossy()), e))?;
    f.write_all(content)
        .map_err(|e| IoError::new(format!("Could not write to: {}", tmp_path.to_string_lossy()), e))?;
    f.sync_all()
        .map_err(|e| IoError::new(format!("Could not sync: {}", tmp_path.to_string_lossy()), e))?;

    Ok(tmp_path)
}

/// Renames a staged file into place.
pub fn commit(tmp_path: &Path, full_path: &Path) -> Result<(), IoError> {
    fs::rename(tmp_path, full_path).map_err(|e| {
        IoError::new(
            format!(
                "Could not rename {} to {}",
                tmp_path.to_string_lossy(),
                full_path.to_string_lossy()
            ),
            e,
        )
    })
}

/// Saves an object as pretty printed json.
pub fn save_json<O: Serialize>(object: &O, full_path: &Path) -> Result<(), IoError> {
    let json = serde_json::to_vec_pretty(object).map_err(|e| {
        IoError::new(
            format!("Could not serialize json for: {}", full_path.to_string_lossy()),
            io::Error::other(e),
        )
    })?;
    save(&json, full_path)
}

/// Loads a files and deserializes as json for the expected type. Maps json errors to IoError
pub fn load_json<O: DeserializeOwned>(full_path: &Path) -> Result<O, IoError> {
    let bytes = read(full_path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        IoError::new(
            format!("Could not load json for file: {}", full_path.to_string_lossy()),
            io::Error::other(format!("could not deserialize json: {}", e)),
        )
    })
}

pub fn read(path: &Path) -> Result<Vec<u8>, IoError> {
    fs::read(path).map_err(|e| IoError::new(format!("Could not read: {}", path.to_string_lossy()), e))
}

pub fn delete_file(full_path: &Path) -> Result<(), IoError> {
    trace!("Removing file: {}", full_path.to_string_lossy());
    fs::remove_file(full_path)
        .map_err(|e| IoError::new(format!("Could not remove file: {}", full_path.to_string_lossy()), e))
}

//------------ Tests ---------------------------------------------------------

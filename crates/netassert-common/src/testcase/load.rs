//! Reading test cases from YAML documents
//!
//! A document is a YAML list of tests. Tests from several files are merged
//! into one run, so set-level validation (unique names) runs again each time
//! a file is added.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{validate_tests, Test};
use crate::{Error, Result};

/// Path that makes [`load_from_file`] read standard input
pub const STDIN_PATH: &str = "-";

const YAML_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Parse, default and validate tests from a YAML string
pub fn load_from_str(doc: &str) -> Result<Vec<Test>> {
    if doc.trim().is_empty() {
        return Ok(Vec::new());
    }

    let tests: Option<Vec<Test>> = serde_yaml::from_str(doc)
        .map_err(|e| Error::serialization(format!("failed to unmarshal tests: {}", e)))?;
    let mut tests = tests.unwrap_or_default();

    for test in &mut tests {
        test.apply_defaults();
        test.reset_outcome();
    }

    validate_tests(&tests)?;
    Ok(tests)
}

/// Parse, default and validate tests from any reader
pub fn load_from_reader<R: Read>(mut reader: R) -> Result<Vec<Test>> {
    let mut doc = String::new();
    reader
        .read_to_string(&mut doc)
        .map_err(|e| Error::io(Path::new("<reader>"), format!("cannot read from reader: {}", e)))?;
    load_from_str(&doc)
}

/// Read tests from a file, or from stdin when `path` is `-`
pub fn load_from_file(path: &Path) -> Result<Vec<Test>> {
    if path.as_os_str().is_empty() {
        return Err(Error::validation("input file path can not be empty"));
    }

    if path == Path::new(STDIN_PATH) {
        return load_from_reader(std::io::stdin().lock());
    }

    let doc = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let tests = load_from_str(&doc).map_err(|e| with_file_context(e, path))?;
    debug!(file = %path.display(), count = tests.len(), "Loaded tests from file");
    Ok(tests)
}

/// Read tests from every `.yaml`/`.yml` file directly inside `dir`
///
/// The directory is not walked recursively. Files are read in name order so
/// the resulting test order (and TAP numbering) is stable between runs.
pub fn load_from_dir(dir: &Path) -> Result<Vec<Test>> {
    if dir.as_os_str().is_empty() {
        return Err(Error::validation("input dir path can not be empty"));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_yaml_extension(path))
        .collect();
    files.sort();

    let mut tests = Vec::new();
    for file in files {
        tests.extend(load_from_file(&file)?);

        validate_tests(&tests).map_err(|e| {
            Error::validation_for(
                file.display().to_string(),
                format!("validation of tests from file failed: {}", e),
            )
        })?;
    }

    Ok(tests)
}

fn has_yaml_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| YAML_EXTENSIONS.contains(&ext))
}

fn with_file_context(err: Error, path: &Path) -> Error {
    match err {
        Error::Serialization { message } => {
            Error::serialization(format!("{}: {}", path.display(), message))
        }
        Error::Validation { test, message } => {
            Error::validation_for(test, format!("{} (in {})", message, path.display()))
        }
        other => other,
    }
}

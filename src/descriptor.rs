//! Declarative descriptions of the resources a session provisions.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while loading a descriptor spec from disk.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DescriptorError {
    /// Raised when the spec file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the spec file is not valid JSON.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
}

/// Desired name and opaque configuration of one remote resource.
///
/// A descriptor without a spec is inactive: the session skips resolving it
/// and every step depending on it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceDescriptor {
    /// Name the resource is looked up and created under.
    pub name: Option<String>,
    /// Configuration forwarded to the service on creation.
    pub spec: Option<Value>,
}

impl ResourceDescriptor {
    /// Creates an active descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, spec: Value) -> Self {
        Self {
            name: Some(name.into().trim().to_owned()),
            spec: Some(spec),
        }
    }

    /// Creates an inactive descriptor.
    #[must_use]
    pub const fn inactive() -> Self {
        Self {
            name: None,
            spec: None,
        }
    }

    /// Reads the spec from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the file cannot be read or parsed.
    pub fn from_json_file(
        name: impl Into<String>,
        path: &Utf8Path,
    ) -> Result<Self, DescriptorError> {
        let contents = read_file(path)?;
        let spec = serde_json::from_str::<Value>(&contents).map_err(|err| {
            DescriptorError::Parse {
                path: path.to_owned(),
                message: err.to_string(),
            }
        })?;
        Ok(Self::new(name, spec))
    }

    /// Returns `true` when the descriptor carries a spec.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.spec.is_some()
    }
}

fn read_file(path: &Utf8Path) -> Result<String, DescriptorError> {
    let io_error = |message: String| DescriptorError::Io {
        path: path.to_owned(),
        message,
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| io_error(String::from("path has no file name")))?;
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));

    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| io_error(err.to_string()))?;
    dir.read_to_string(file_name)
        .map_err(|err| io_error(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn utf8_dir(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp dir is not UTF-8: {}", path.display()))
    }

    #[test]
    fn from_json_file_reads_spec() {
        let dir = TempDir::new().expect("temp dir");
        let path = utf8_dir(&dir).join("env.json");
        fs::write(&path, r#"{"base_image": "py311", "pip": ["numpy"]}"#).expect("write spec");

        let descriptor =
            ResourceDescriptor::from_json_file(" release-env ", &path).expect("spec should load");

        assert_eq!(descriptor.name.as_deref(), Some("release-env"));
        assert_eq!(
            descriptor.spec,
            Some(json!({"base_image": "py311", "pip": ["numpy"]}))
        );
        assert!(descriptor.is_active());
    }

    #[test]
    fn from_json_file_reports_parse_errors() {
        let dir = TempDir::new().expect("temp dir");
        let path = utf8_dir(&dir).join("broken.json");
        fs::write(&path, "{not json").expect("write spec");

        let err = ResourceDescriptor::from_json_file("env", &path).expect_err("parse must fail");
        assert!(
            matches!(err, DescriptorError::Parse { path: ref failed, .. } if failed.as_str().ends_with("broken.json")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn from_json_file_reports_missing_files() {
        let dir = TempDir::new().expect("temp dir");
        let path = utf8_dir(&dir).join("absent.json");

        let err = ResourceDescriptor::from_json_file("env", &path).expect_err("read must fail");
        assert!(matches!(err, DescriptorError::Io { .. }), "unexpected error: {err}");
    }

    #[test]
    fn inactive_descriptor_has_no_spec() {
        assert!(!ResourceDescriptor::inactive().is_active());
    }
}

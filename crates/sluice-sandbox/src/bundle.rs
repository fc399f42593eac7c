//! Installable backend bundle

use crate::error::{SandboxError, SandboxResult};
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};

/// One file of a backend bundle
#[derive(Debug, Clone)]
pub struct BundleFile {
    /// Path relative to the backend directory
    pub path: String,
    /// File contents
    pub contents: Bytes,
}

impl BundleFile {
    /// Create a bundle file
    pub fn new(path: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }

    /// Resolve the target path below `root`
    ///
    /// Rejects absolute paths and any `..` component so a bundle can never
    /// write outside the backend directory.
    pub fn resolve_under(&self, root: &Path) -> SandboxResult<PathBuf> {
        let relative = Path::new(&self.path);
        let mut resolved = root.to_path_buf();
        let mut depth = 0usize;

        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::InvalidBundlePath {
                        path: self.path.clone(),
                    });
                }
            }
        }

        if depth == 0 {
            return Err(SandboxError::InvalidBundlePath {
                path: self.path.clone(),
            });
        }

        Ok(resolved)
    }
}

/// A backend code bundle ready to be installed
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    /// Files to write into the backend directory
    pub files: Vec<BundleFile>,
    /// Command line that runs one execution, if the bundle defines it
    pub entrypoint: Option<Vec<String>>,
}

impl Bundle {
    /// Create an empty bundle
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file
    pub fn with_file(mut self, file: BundleFile) -> Self {
        self.files.push(file);
        self
    }

    /// Set the entrypoint
    pub fn with_entrypoint(mut self, argv: Vec<String>) -> Self {
        self.entrypoint = Some(argv);
        self
    }

    /// Total size of all file contents in bytes
    pub fn size_bytes(&self) -> usize {
        self.files.iter().map(|f| f.contents.len()).sum()
    }
}

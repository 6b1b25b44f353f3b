use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::gcov::get_gcov;

const WORKSPACE_FOLDER: &str = "${workspaceFolder}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to open config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Number of batches processed in parallel.
    pub workers: usize,
    /// Maximum number of data files passed to one gcov invocation.
    pub chunk_size: usize,
    /// Directories searched for data files. `${workspaceFolder}` is replaced by
    /// each workspace root.
    pub build_directories: Vec<String>,
    /// Directory relative source paths are resolved against when gcov doesn't
    /// report one.
    pub base_dir: Option<PathBuf>,
    pub gcov: PathBuf,
    /// Extension of the coverage data files, without the dot.
    pub extension: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 1.max(num_cpus::get()),
            chunk_size: 30,
            build_directories: Vec::new(),
            base_dir: None,
            gcov: get_gcov(),
            extension: "gcda".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The directories to scan for the given workspace roots. Without configured
    /// build directories the workspace roots themselves are scanned.
    pub fn resolve_build_directories(&self, workspace_roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for dir in &self.build_directories {
            if dir.contains(WORKSPACE_FOLDER) {
                for root in workspace_roots {
                    let dir = PathBuf::from(dir.replace(WORKSPACE_FOLDER, &root.to_string_lossy()));
                    if !dirs.contains(&dir) {
                        dirs.push(dir);
                    }
                }
            } else {
                let dir = PathBuf::from(dir);
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        if dirs.is_empty() {
            dirs.extend(workspace_roots.iter().cloned());
        }
        dirs
    }

    /// Whether the file name ends in `.{extension}`. A bare `.gcda` counts.
    pub fn is_data_file(&self, path: &Path) -> bool {
        let suffix = format!(".{}", self.extension);
        path.file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(suffix.as_str()))
    }
}

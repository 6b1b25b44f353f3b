use log::{debug, warn};
use rustc_hash::FxHashMap;
use semver::Version;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

use crate::canonical::demangle;
use crate::defs::*;

#[derive(Debug, Error)]
pub enum GcovError {
    #[error("Failed to execute gcov process: {0}")]
    ProcessFailure(#[source] std::io::Error),
    #[error("gcov execution failed on {paths}\ngcov stdout: {stdout}\ngcov stderr: {stderr}")]
    Failure {
        paths: String,
        stdout: String,
        stderr: String,
    },
    #[error("Failed to parse gcov output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Something able to turn coverage data files into raw per-file records.
pub trait CoverageTool: Sync {
    /// Whether the tool supports everything `invoke` relies on.
    fn is_compatible(&self) -> bool;

    /// Processes `paths` in a single invocation. The result holds one entry per
    /// source file mentioned by any of the inputs.
    fn invoke(&self, paths: &[PathBuf]) -> Result<Vec<FileRecordSet>, GcovError>;
}

impl<T: CoverageTool + ?Sized> CoverageTool for &T {
    fn is_compatible(&self) -> bool {
        (**self).is_compatible()
    }

    fn invoke(&self, paths: &[PathBuf]) -> Result<Vec<FileRecordSet>, GcovError> {
        (**self).invoke(paths)
    }
}

#[derive(Debug, Deserialize)]
struct GcovDocument {
    #[serde(default)]
    current_working_directory: Option<PathBuf>,
    #[serde(default)]
    data_file: Option<String>,
    #[serde(default)]
    files: Vec<GcovFile>,
}

#[derive(Debug, Deserialize)]
struct GcovFile {
    file: String,
    #[serde(default)]
    functions: Vec<GcovFunction>,
    #[serde(default)]
    lines: Vec<GcovLine>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct GcovFunction {
    name: String,
    #[serde(default)]
    demangled_name: Option<String>,
    start_line: u32,
    end_line: u32,
    #[serde(default)]
    start_column: u32,
    #[serde(default)]
    end_column: u32,
    #[serde(default)]
    blocks: u32,
    #[serde(default)]
    blocks_executed: u32,
    execution_count: u64,
}

#[derive(Debug, Deserialize)]
struct GcovLine {
    line_number: u32,
    #[serde(default)]
    function_name: Option<String>,
    count: u64,
    #[serde(default)]
    unexecuted_block: bool,
}

impl From<GcovFunction> for FunctionRecord {
    fn from(function: GcovFunction) -> Self {
        let demangled_name = match function.demangled_name {
            Some(demangled_name) => demangled_name,
            None => demangle(&function.name),
        };
        FunctionRecord {
            name: function.name,
            demangled_name,
            start_line: function.start_line,
            end_line: function.end_line,
            execution_count: function.execution_count,
        }
    }
}

impl From<GcovLine> for LineRecord {
    fn from(line: GcovLine) -> Self {
        LineRecord {
            line_number: line.line_number,
            function_name: line.function_name.unwrap_or_default(),
            count: line.count,
            unexecuted_block: line.unexecuted_block,
        }
    }
}

/// Parses the output of `gcov --stdout --json-format`, one JSON document per line,
/// and groups the records by source file across all documents.
pub fn parse_json_output(output: &str) -> Result<Vec<FileRecordSet>, GcovError> {
    let mut results: Vec<FileRecordSet> = Vec::new();
    let mut positions: FxHashMap<(Option<PathBuf>, String), usize> = FxHashMap::default();

    for document in output.lines().filter(|l| !l.trim().is_empty()) {
        let document: GcovDocument = serde_json::from_str(document)?;
        if let Some(ref data_file) = document.data_file {
            debug!("Parsed gcov output for {}", data_file);
        }

        for file in document.files {
            let key = (document.current_working_directory.clone(), file.file);
            let position = match positions.get(&key) {
                Some(&position) => position,
                None => {
                    let mut records = FileRecordSet::new(key.1.clone());
                    records.base_dir = key.0.clone();
                    results.push(records);
                    positions.insert(key, results.len() - 1);
                    results.len() - 1
                }
            };
            let records = &mut results[position];
            records
                .functions
                .extend(file.functions.into_iter().map(FunctionRecord::from));
            records.lines.extend(file.lines.into_iter().map(LineRecord::from));
        }
    }

    Ok(results)
}

/// The gcov binary named by the `GCOV` environment variable, else `gcov`.
pub(crate) fn get_gcov() -> PathBuf {
    if let Ok(s) = env::var("GCOV") {
        PathBuf::from(s)
    } else {
        PathBuf::from("gcov")
    }
}

/// Runs the `gcov` binary in JSON mode.
#[derive(Debug, Clone)]
pub struct Gcov {
    program: PathBuf,
}

impl Gcov {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.program)
    }
}

impl CoverageTool for Gcov {
    fn is_compatible(&self) -> bool {
        let output = match self.command().arg("--version").output() {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to execute `{}`: {}", self.program.display(), e);
                return false;
            }
        };
        if !output.status.success() {
            warn!("`{} --version` failed", self.program.display());
            return false;
        }

        let version = String::from_utf8_lossy(&output.stdout);
        let compatible = supports_json_output(version.lines().next().unwrap_or_default());
        if !compatible {
            warn!(
                "{} is too old, version 9 or newer is required for JSON output",
                self.program.display()
            );
        }
        compatible
    }

    fn invoke(&self, paths: &[PathBuf]) -> Result<Vec<FileRecordSet>, GcovError> {
        let output = self
            .command()
            .arg("--stdout")
            .arg("--json-format")
            .arg("--demangled-names")
            .args(paths)
            .output()
            .map_err(GcovError::ProcessFailure)?;

        if !output.status.success() {
            return Err(GcovError::Failure {
                paths: paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        parse_json_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// JSON intermediate output on stdout appeared in gcov 9.
fn supports_json_output(version_line: &str) -> bool {
    let min_ver = Version::new(9, 0, 0);
    let versions: Vec<Version> = version_line
        .split(' ')
        .filter_map(|value| Version::parse(value).ok())
        .collect();

    !versions.is_empty() && versions.iter().all(|ver| *ver >= min_ver)
}

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A single line entry as reported by gcov. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord {
    pub line_number: u32,
    pub function_name: String,
    pub count: u64,
    pub unexecuted_block: bool,
}

/// A single function entry as reported by gcov. Both lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRecord {
    pub name: String,
    pub demangled_name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub execution_count: u64,
}

/// Everything gcov reported for one source file in one invocation.
///
/// `path` is the file identifier exactly as the tool printed it, it may be
/// relative to `base_dir`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileRecordSet {
    pub path: String,
    pub base_dir: Option<PathBuf>,
    pub lines: Vec<LineRecord>,
    pub functions: Vec<FunctionRecord>,
}

impl FileRecordSet {
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineCoverage {
    /// 0-based line index.
    pub line: u32,
    pub raw: Vec<LineRecord>,
    pub execution_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCoverage {
    /// 0-based, inclusive.
    pub start_line: u32,
    /// 0-based, inclusive.
    pub end_line: u32,
    pub raw: Vec<FunctionRecord>,
    pub base_name: String,
    pub execution_count: u64,
    pub total_lines: usize,
    pub called_lines: usize,
}

/// Derived view over the raw records of one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileAnalysis {
    pub lines: BTreeMap<u32, LineCoverage>,
    pub functions: BTreeMap<u32, FunctionCoverage>,
    pub max_line: Option<u32>,
    pub total_lines: usize,
    pub called_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    /// Share of the whole reload covered by this event, in percent.
    pub increment: f64,
    pub message: String,
}

impl ProgressEvent {
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self {
            completed: 0,
            total: 0,
            increment: 0.0,
            message: message.into(),
        }
    }
}

use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::analysis::FileCoverage;
use crate::cache::CoverageCache;
use crate::defs::FunctionCoverage;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSummary {
    pub name: String,
    pub total: usize,
    pub called: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub total: usize,
    pub called: usize,
    pub functions: Vec<FunctionSummary>,
}

/// Per-line view of one file, as an editor would annotate it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineSummary {
    /// 0-based line index.
    pub line: u32,
    pub execution_count: u64,
    pub called: bool,
    /// `"{count}x"`, followed by the coverage of the function starting on this line.
    pub label: String,
    /// One `"{count}x in `{name}`"` entry per function executing this line, most
    /// executed first.
    pub callers: Vec<String>,
}

/// Line and function totals for every file in the cache, in load order.
pub fn file_summaries(cache: &CoverageCache) -> Vec<FileSummary> {
    cache
        .files()
        .iter()
        .map(|file| {
            let analysis = file.ensure_analyzed();
            FileSummary {
                path: file.path().to_string(),
                total: analysis.total_lines,
                called: analysis.called_lines,
                functions: analysis
                    .functions
                    .values()
                    .map(|function| FunctionSummary {
                        name: function.base_name.clone(),
                        total: function.total_lines,
                        called: function.called_lines,
                    })
                    .collect(),
            }
        })
        .collect()
}

/// The functions of `file`, most executed first.
pub fn functions_by_call_count(file: &FileCoverage) -> Vec<FunctionCoverage> {
    let analysis = file.ensure_analyzed();
    let mut functions: Vec<FunctionCoverage> = analysis.functions.values().cloned().collect();
    functions.sort_by_key(|function| Reverse(function.execution_count));
    functions
}

pub fn function_label(function: &FunctionCoverage) -> String {
    format!("{}x {}", function.execution_count, function.base_name)
}

/// A one line coverage summary for `file`. A file without any line counts as covered.
pub fn status_line(file: &FileCoverage) -> String {
    let analysis = file.ensure_analyzed();
    let percentage = if analysis.total_lines == 0 {
        100.0
    } else {
        analysis.called_lines as f64 / analysis.total_lines as f64 * 100.0
    };
    format!(
        "Coverage: {}/{} [{:.1}%]",
        analysis.called_lines, analysis.total_lines, percentage
    )
}

fn function_percentage(function: &FunctionCoverage) -> Option<f64> {
    if function.total_lines == 0 {
        None
    } else {
        Some(function.called_lines as f64 / function.total_lines as f64 * 100.0)
    }
}

/// Every line of `file` with coverage data up to its last one. Names of the
/// functions executing a line are demangled through `cache`.
pub fn line_summaries(cache: &CoverageCache, file: &FileCoverage) -> Vec<LineSummary> {
    let analysis = file.ensure_analyzed();
    let max_line = match analysis.max_line {
        Some(max_line) => max_line,
        None => return Vec::new(),
    };

    (0..=max_line)
        .filter_map(|line| analysis.lines.get(&line))
        .map(|coverage| {
            if coverage.execution_count == 0 {
                return LineSummary {
                    line: coverage.line,
                    execution_count: 0,
                    called: false,
                    label: "0x".to_string(),
                    callers: Vec::new(),
                };
            }

            let mut label = format!("{}x", coverage.execution_count);
            if let Some(percentage) = analysis
                .functions
                .get(&coverage.line)
                .and_then(function_percentage)
            {
                label.push_str(&format!("[{:.1}%]", percentage));
            }

            let mut by_function: BTreeMap<&str, u64> = BTreeMap::new();
            for raw in &coverage.raw {
                *by_function.entry(raw.function_name.as_str()).or_default() += raw.count;
            }
            let mut callers: Vec<(&str, u64)> = by_function
                .into_iter()
                .filter(|&(_, count)| count > 0)
                .collect();
            callers.sort_by_key(|&(_, count)| Reverse(count));

            LineSummary {
                line: coverage.line,
                execution_count: coverage.execution_count,
                called: true,
                label,
                callers: callers
                    .into_iter()
                    .map(|(name, count)| {
                        let name = cache
                            .demangled_name(name)
                            .unwrap_or_else(|| name.to_string());
                        format!("{}x in `{}`", count, name)
                    })
                    .collect(),
            }
        })
        .collect()
}

pub fn sorted_paths(cache: &CoverageCache) -> Vec<String> {
    let mut paths = cache.all_known_paths();
    paths.sort();
    paths
}

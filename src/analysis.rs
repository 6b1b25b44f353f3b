use log::debug;
use std::collections::{btree_map, BTreeMap};
use std::sync::{Arc, Mutex};

use crate::canonical::canonicalize_function_name;
use crate::defs::*;

/// gcov counts lines from 1, every derived structure counts from 0. Line 0
/// doesn't exist.
#[inline]
fn line_to_index(line_number: u32) -> Option<u32> {
    line_number.checked_sub(1)
}

#[derive(Debug, Clone)]
enum Analysis {
    Unanalyzed,
    Analyzed(Arc<FileAnalysis>),
}

#[derive(Debug)]
struct FileState {
    lines: Vec<LineRecord>,
    functions: Vec<FunctionRecord>,
    analysis: Analysis,
}

/// The raw records gathered for one source file, plus the lazily derived analysis.
#[derive(Debug)]
pub struct FileCoverage {
    path: String,
    state: Mutex<FileState>,
}

impl FileCoverage {
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(FileState {
                lines: Vec::new(),
                functions: Vec::new(),
                analysis: Analysis::Unanalyzed,
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Appends more raw records. A previously computed analysis is dropped.
    pub fn append(&self, lines: Vec<LineRecord>, functions: Vec<FunctionRecord>) {
        let mut state = self.state.lock().unwrap();
        state.lines.extend(lines);
        state.functions.extend(functions);
        state.analysis = Analysis::Unanalyzed;
    }

    pub fn raw_line_count(&self) -> usize {
        self.state.lock().unwrap().lines.len()
    }

    pub fn raw_function_count(&self) -> usize {
        self.state.lock().unwrap().functions.len()
    }

    pub fn is_analyzed(&self) -> bool {
        matches!(self.state.lock().unwrap().analysis, Analysis::Analyzed(_))
    }

    /// Returns the analysis of this file, computing it on first use.
    pub fn ensure_analyzed(&self) -> Arc<FileAnalysis> {
        let mut state = self.state.lock().unwrap();
        if let Analysis::Analyzed(ref analysis) = state.analysis {
            return Arc::clone(analysis);
        }
        let analysis = Arc::new(analyze(&state.lines, &state.functions));
        state.analysis = Analysis::Analyzed(Arc::clone(&analysis));
        analysis
    }
}

fn aggregate_lines(lines: &[LineRecord]) -> (BTreeMap<u32, LineCoverage>, Option<u32>) {
    let mut by_line: BTreeMap<u32, LineCoverage> = BTreeMap::new();
    let mut max_line = None;

    for raw in lines {
        let line = match line_to_index(raw.line_number) {
            Some(line) => line,
            None => {
                debug!("Skipping line record without a line number in {}", raw.function_name);
                continue;
            }
        };
        let coverage = by_line.entry(line).or_insert_with(|| LineCoverage {
            line,
            raw: Vec::new(),
            execution_count: 0,
        });
        coverage.raw.push(raw.clone());
        coverage.execution_count += raw.count;
        max_line = max_line.max(Some(line));
    }

    (by_line, max_line)
}

fn aggregate_functions(
    functions: &[FunctionRecord],
    lines: &BTreeMap<u32, LineCoverage>,
) -> BTreeMap<u32, FunctionCoverage> {
    let mut by_start: BTreeMap<u32, FunctionCoverage> = BTreeMap::new();

    for raw in functions {
        let (start_line, end_line) =
            match (line_to_index(raw.start_line), line_to_index(raw.end_line)) {
                (Some(start_line), Some(end_line)) => (start_line, end_line),
                _ => {
                    debug!("Skipping function record without line numbers: {}", raw.name);
                    continue;
                }
            };
        let coverage = match by_start.entry(start_line) {
            btree_map::Entry::Occupied(o) => o.into_mut(),
            btree_map::Entry::Vacant(v) => v.insert(FunctionCoverage {
                start_line,
                end_line,
                raw: Vec::new(),
                base_name: canonicalize_function_name(&raw.demangled_name),
                execution_count: 0,
                total_lines: 0,
                called_lines: 0,
            }),
        };
        coverage.execution_count += raw.execution_count;
        coverage.raw.push(raw.clone());
    }

    for function in by_start.values_mut() {
        if function.end_line < function.start_line {
            continue;
        }
        for line in lines.range(function.start_line..=function.end_line).map(|(_, l)| l) {
            function.total_lines += 1;
            if line.execution_count > 0 {
                function.called_lines += 1;
            }
        }
    }

    by_start
}

/// Derives line, function and file level coverage from raw gcov records.
pub fn analyze(lines: &[LineRecord], functions: &[FunctionRecord]) -> FileAnalysis {
    let (lines, max_line) = aggregate_lines(lines);
    let functions = aggregate_functions(functions, &lines);
    let called_lines = lines.values().filter(|l| l.execution_count > 0).count();

    FileAnalysis {
        total_lines: lines.len(),
        called_lines,
        max_line,
        lines,
        functions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn line(line_number: u32, count: u64) -> LineRecord {
        LineRecord {
            line_number,
            function_name: "_Z3foov".to_string(),
            count,
            unexecuted_block: count == 0,
        }
    }

    fn function(demangled_name: &str, start_line: u32, end_line: u32, execution_count: u64) -> FunctionRecord {
        FunctionRecord {
            name: format!("_Z{}", demangled_name.len()),
            demangled_name: demangled_name.to_string(),
            start_line,
            end_line,
            execution_count,
        }
    }

    #[test]
    fn test_lines_are_summed() {
        let file = FileCoverage::new("a.cc");
        file.append(vec![line(5, 3)], Vec::new());
        file.append(vec![line(5, 4)], Vec::new());

        let analysis = file.ensure_analyzed();
        let coverage = &analysis.lines[&4];
        assert_eq!(coverage.execution_count, 7);
        assert_eq!(coverage.raw.len(), 2);
        assert_eq!(analysis.total_lines, 1);
        assert_eq!(analysis.called_lines, 1);
    }

    #[test]
    fn test_lines_are_zero_based() {
        let analysis = analyze(&[line(1, 1)], &[]);
        assert!(analysis.lines.contains_key(&0));
        assert_eq!(analysis.lines[&0].line, 0);
        assert_eq!(analysis.max_line, Some(0));
    }

    #[test]
    fn test_function_totals() {
        let analysis = analyze(
            &[line(10, 5), line(11, 0), line(20, 1)],
            &[function("void foo()", 10, 12, 2)],
        );

        let foo = &analysis.functions[&9];
        assert_eq!(foo.start_line, 9);
        assert_eq!(foo.end_line, 11);
        assert_eq!(foo.base_name, "foo");
        assert_eq!(foo.total_lines, 2);
        assert_eq!(foo.called_lines, 1);
        assert_eq!(analysis.total_lines, 3);
        assert_eq!(analysis.called_lines, 2);
        assert_eq!(analysis.max_line, Some(19));
    }

    #[test]
    fn test_functions_sharing_start_line_accumulate() {
        let analysis = analyze(
            &[line(3, 1), line(4, 1)],
            &[
                function("int max<int>(int, int)", 3, 4, 2),
                function("long max<long>(long, long)", 3, 4, 5),
            ],
        );

        assert_eq!(analysis.functions.len(), 1);
        let max = &analysis.functions[&2];
        assert_eq!(max.execution_count, 7);
        assert_eq!(max.raw.len(), 2);
        assert_eq!(max.base_name, "max<...>");
        assert_eq!(max.total_lines, 2);
        assert_eq!(max.called_lines, 2);
    }

    #[test]
    fn test_line_zero_is_skipped() {
        let analysis = analyze(
            &[line(0, 9), line(1, 2)],
            &[function("void bad()", 0, 3, 4), function("void good()", 1, 1, 1)],
        );

        assert_eq!(analysis.lines.len(), 1);
        assert_eq!(analysis.lines[&0].execution_count, 2);
        assert_eq!(analysis.lines[&0].raw.len(), 1);
        assert_eq!(analysis.functions.len(), 1);
        assert_eq!(analysis.functions[&0].base_name, "good");
        assert_eq!(analysis.functions[&0].execution_count, 1);
    }

    #[test]
    fn test_empty_file() {
        let file = FileCoverage::new("empty.cc");
        let analysis = file.ensure_analyzed();
        assert_eq!(*analysis, FileAnalysis::default());
        assert_eq!(analysis.total_lines, 0);
        assert_eq!(analysis.called_lines, 0);
    }

    #[test]
    fn test_analysis_is_memoized() {
        let file = FileCoverage::new("a.cc");
        file.append(vec![line(1, 1), line(2, 0)], vec![function("void a()", 1, 2, 1)]);
        assert!(!file.is_analyzed());

        let first = file.ensure_analyzed();
        let second = file.ensure_analyzed();
        assert!(file.is_analyzed());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_append_discards_analysis() {
        let file = FileCoverage::new("a.cc");
        file.append(vec![line(1, 0)], Vec::new());
        let before = file.ensure_analyzed();
        assert_eq!(before.called_lines, 0);

        file.append(vec![line(1, 2)], Vec::new());
        assert!(!file.is_analyzed());
        let after = file.ensure_analyzed();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.called_lines, 1);
        assert_eq!(file.raw_line_count(), 2);
    }
}

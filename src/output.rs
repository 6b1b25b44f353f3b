use serde_json::json;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::analysis::FileCoverage;
use crate::cache::CoverageCache;
use crate::summary::*;

pub fn get_target_output_writable(output_file: Option<&Path>) -> io::Result<Box<dyn Write>> {
    let write_target: Box<dyn Write> = match output_file {
        Some(output) => Box::new(File::create(output)?),
        None => Box::new(io::stdout()),
    };
    Ok(write_target)
}

/// Writes the per-file summaries as a JSON array.
pub fn output_summary(cache: &CoverageCache, output_file: Option<&Path>) -> io::Result<()> {
    let mut writer = BufWriter::new(get_target_output_writable(output_file)?);
    serde_json::to_writer(&mut writer, &file_summaries(cache))?;
    writeln!(writer)?;
    writer.flush()
}

/// Writes every known source path, one per line.
pub fn output_files(cache: &CoverageCache, output_file: Option<&Path>) -> io::Result<()> {
    let mut writer = BufWriter::new(get_target_output_writable(output_file)?);
    for path in sorted_paths(cache) {
        writeln!(writer, "{}", path)?;
    }
    writer.flush()
}

/// Writes the functions of `file` by descending execution count, as JSON lines.
pub fn output_functions(file: &FileCoverage, output_file: Option<&Path>) -> io::Result<()> {
    let mut writer = BufWriter::new(get_target_output_writable(output_file)?);
    for function in functions_by_call_count(file) {
        writeln!(
            writer,
            "{}",
            json!({
                "label": function_label(&function),
                "name": function.base_name,
                "start_line": function.start_line,
                "end_line": function.end_line,
                "execution_count": function.execution_count,
                "total": function.total_lines,
                "called": function.called_lines,
            })
        )?;
    }
    writer.flush()
}

/// Writes the per-line view of `file`, one JSON object per line with coverage data.
pub fn output_lines(
    cache: &CoverageCache,
    file: &FileCoverage,
    output_file: Option<&Path>,
) -> io::Result<()> {
    let mut writer = BufWriter::new(get_target_output_writable(output_file)?);
    for line in line_summaries(cache, file) {
        serde_json::to_writer(&mut writer, &line)?;
        writeln!(writer)?;
    }
    writer.flush()
}

pub fn output_status(file: &FileCoverage, output_file: Option<&Path>) -> io::Result<()> {
    let mut writer = BufWriter::new(get_target_output_writable(output_file)?);
    writeln!(writer, "{}", status_line(file))?;
    writer.flush()
}

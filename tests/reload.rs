use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use gcovcache::*;

struct ListSource {
    paths: Vec<PathBuf>,
    scanned: AtomicBool,
}

impl ListSource {
    fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            scanned: AtomicBool::new(false),
        }
    }
}

impl CandidateSource for ListSource {
    fn scan(&self, _roots: &[PathBuf], _cancel: &CancellationToken, on_file: &(dyn Fn(&Path) + Sync)) {
        self.scanned.store(true, Ordering::SeqCst);
        for path in &self.paths {
            on_file(path);
        }
    }
}

/// Reports one source file per data file, with line 1 executed once.
#[derive(Default)]
struct FakeTool {
    incompatible: bool,
    failing: Option<PathBuf>,
    cancel_after_first: Option<CancellationToken>,
    calls: AtomicUsize,
    seen: Mutex<Vec<PathBuf>>,
}

impl CoverageTool for FakeTool {
    fn is_compatible(&self) -> bool {
        !self.incompatible
    }

    fn invoke(&self, paths: &[PathBuf]) -> Result<Vec<FileRecordSet>, GcovError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().extend_from_slice(paths);
        if let Some(ref cancel) = self.cancel_after_first {
            cancel.cancel();
        }
        if self.failing.as_ref().map_or(false, |failing| paths.contains(failing)) {
            return Err(GcovError::Failure {
                paths: format!("{:?}", paths),
                stdout: String::new(),
                stderr: "cannot open data file".to_string(),
            });
        }
        Ok(paths
            .iter()
            .map(|path| FileRecordSet {
                path: path.with_extension("cc").to_string_lossy().into_owned(),
                base_dir: None,
                lines: vec![LineRecord {
                    line_number: 1,
                    function_name: "_Z3foov".to_string(),
                    count: 1,
                    unexecuted_block: false,
                }],
                functions: vec![FunctionRecord {
                    name: "_Z3foov".to_string(),
                    demangled_name: "foo()".to_string(),
                    start_line: 1,
                    end_line: 2,
                    execution_count: 1,
                }],
            })
            .collect())
    }
}

fn data_files(n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| PathBuf::from(format!("/build/obj{}.gcda", i)))
        .collect()
}

fn config(workers: usize, chunk_size: usize) -> Config {
    Config {
        workers,
        chunk_size,
        ..Default::default()
    }
}

#[test]
fn test_cancellation_keeps_partial_results() {
    let cancel = CancellationToken::new();
    let tool = FakeTool {
        cancel_after_first: Some(cancel.clone()),
        ..Default::default()
    };
    let coordinator = Coordinator::new(&tool, ListSource::new(data_files(3)), config(1, 1));
    let handle = CacheHandle::default();

    let report = coordinator.reload(&handle, &[], &cancel, &mut |_| {}).unwrap();

    assert_eq!(report.state, ReloadState::Cancelled);
    assert_eq!(report.requested, 3);
    assert_eq!(report.absorbed, 1);

    let cache = handle.current();
    assert!(cache.has_data());
    assert_eq!(cache.absorbed_count(), 1);
    assert_eq!(cache.all_known_paths().len(), 1);

    assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.absorbed(), *tool.seen.lock().unwrap());
}

#[test]
fn test_no_candidates_never_invokes_tool() {
    let source = ListSource::new(vec![
        PathBuf::from("/build/obj.gcno"),
        PathBuf::from("/build/CMakeCache.txt"),
    ]);
    let tool = FakeTool::default();
    let coordinator = Coordinator::new(&tool, source, config(4, 30));
    let handle = CacheHandle::default();

    let result = coordinator.reload(&handle, &[], &CancellationToken::new(), &mut |_| {});

    assert!(matches!(result, Err(ReloadError::NoCandidates)));
    assert_eq!(coordinator.state(), ReloadState::Failed);
    assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    assert!(!handle.current().has_data());
}

#[test]
fn test_incompatible_tool_aborts_before_scanning() {
    let tool = FakeTool {
        incompatible: true,
        ..Default::default()
    };
    let source = ListSource::new(data_files(2));
    let coordinator = Coordinator::new(&tool, &source, config(1, 1));
    let handle = CacheHandle::default();

    let result = coordinator.reload(&handle, &[], &CancellationToken::new(), &mut |_| {});

    assert!(matches!(result, Err(ReloadError::ToolIncompatible)));
    assert_eq!(coordinator.state(), ReloadState::Failed);
    assert!(!source.scanned.load(Ordering::SeqCst));
    assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    assert!(!handle.current().has_data());
}

#[test]
fn test_failed_chunk_is_isolated() {
    let tool = FakeTool {
        failing: Some(PathBuf::from("/build/obj2.gcda")),
        ..Default::default()
    };
    let coordinator = Coordinator::new(tool, ListSource::new(data_files(6)), config(2, 1));
    let handle = CacheHandle::default();
    let mut messages = Vec::new();

    let report = coordinator
        .reload(&handle, &[], &CancellationToken::new(), &mut |event| {
            messages.push(event.message)
        })
        .unwrap();

    assert_eq!(report.state, ReloadState::Completed);
    assert_eq!(report.requested, 6);
    assert_eq!(report.absorbed, 5);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].paths, vec![PathBuf::from("/build/obj2.gcda")]);
    assert!(matches!(report.failures[0].error, GcovError::Failure { .. }));
    assert!(messages.iter().any(|m| m.contains("Failed to process 1 files")));

    let cache = handle.current();
    assert_eq!(cache.absorbed_count(), 5);
    assert!(cache.lookup("/build/obj2.cc").is_none());
    assert!(cache.lookup("/build/obj5.cc").is_some());
}

#[test]
fn test_failed_chunk_does_not_stop_its_batch() {
    let tool = FakeTool {
        failing: Some(PathBuf::from("/build/obj0.gcda")),
        ..Default::default()
    };
    let coordinator = Coordinator::new(tool, ListSource::new(data_files(4)), config(1, 2));
    let handle = CacheHandle::default();

    let report = coordinator
        .reload(&handle, &[], &CancellationToken::new(), &mut |_| {})
        .unwrap();

    // A single batch of two chunks, the one holding obj0 fails as a whole.
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].paths.len(), 2);
    assert_eq!(report.absorbed, 2);
    assert_eq!(handle.current().absorbed_count(), 2);
}

#[test]
fn test_every_file_is_dispatched_once() {
    let coordinator = Coordinator::new(FakeTool::default(), ListSource::new(data_files(37)), config(4, 3));
    let handle = CacheHandle::default();

    let report = coordinator
        .reload(&handle, &[], &CancellationToken::new(), &mut |_| {})
        .unwrap();

    assert_eq!(report.absorbed, 37);
    let mut absorbed = handle.current().absorbed();
    absorbed.sort();
    let mut expected = data_files(37);
    expected.sort();
    assert_eq!(absorbed, expected);
}

#[test]
fn test_reload_from_directory() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let build = tmp_dir.path().join("build");
    fs::create_dir_all(build.join("src")).unwrap();
    fs::write(build.join("main.gcda"), b"").unwrap();
    fs::write(build.join("main.gcno"), b"").unwrap();
    fs::write(build.join("src/util.gcda"), b"").unwrap();

    let config = Config {
        build_directories: vec!["${workspaceFolder}/build".to_string()],
        ..config(2, 30)
    };
    let roots = config.resolve_build_directories(&[tmp_dir.path().to_path_buf()]);
    let coordinator = Coordinator::new(FakeTool::default(), DirectoryScanner::new(), config);
    let handle = CacheHandle::default();

    let report = coordinator
        .reload(&handle, &roots, &CancellationToken::new(), &mut |_| {})
        .unwrap();
    assert_eq!(report.requested, 2);
    assert_eq!(report.absorbed, 2);

    let cache = handle.current();
    let main = cache
        .lookup(&build.join("main.cc").to_string_lossy())
        .unwrap();
    let analysis = main.ensure_analyzed();
    assert_eq!(analysis.total_lines, 1);
    assert_eq!(analysis.called_lines, 1);
    assert_eq!(analysis.functions[&0].base_name, "foo");
    assert_eq!(analysis.functions[&0].total_lines, 1);
    assert_eq!(cache.demangled_name("_Z3foov"), Some("foo()".to_string()));
}

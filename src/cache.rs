use log::debug;
use rustc_hash::FxHashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::analysis::FileCoverage;
use crate::defs::*;

#[derive(Debug, Default)]
struct CacheState {
    // Insertion order is kept so that lookups falling back to suffix matching
    // always pick the same entry.
    files: Vec<Arc<FileCoverage>>,
    index: FxHashMap<String, usize>,
    demangled_names: FxHashMap<String, String>,
    absorbed: Vec<PathBuf>,
}

/// All coverage data loaded during one reload, keyed by source file path.
///
/// Records are only ever appended. Starting over means building a new cache
/// and swapping it in through a [`CacheHandle`].
#[derive(Debug, Default)]
pub struct CoverageCache {
    base_dir: Option<PathBuf>,
    state: RwLock<CacheState>,
}

impl CoverageCache {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            state: RwLock::new(CacheState::default()),
        }
    }

    fn resolve_path(&self, records: &FileRecordSet) -> String {
        let path = Path::new(&records.path);
        if path.is_absolute() {
            return records.path.clone();
        }
        match records.base_dir.as_ref().or(self.base_dir.as_ref()) {
            Some(base_dir) => clean_path(&base_dir.join(path))
                .to_string_lossy()
                .into_owned(),
            None => records.path.clone(),
        }
    }

    fn merge_locked(&self, state: &mut CacheState, records: FileRecordSet) {
        let path = self.resolve_path(&records);

        for function in &records.functions {
            state
                .demangled_names
                .insert(function.name.clone(), function.demangled_name.clone());
        }

        let file = match state.index.get(&path) {
            Some(&i) => Arc::clone(&state.files[i]),
            None => {
                let file = Arc::new(FileCoverage::new(path.clone()));
                state.index.insert(path, state.files.len());
                state.files.push(Arc::clone(&file));
                file
            }
        };
        file.append(records.lines, records.functions);
    }

    /// Adds the records of one source file, appending to any data already present for it.
    pub fn merge(&self, records: FileRecordSet) {
        let mut state = self.state.write().unwrap();
        self.merge_locked(&mut state, records);
    }

    /// Merges everything one tool invocation returned and marks its input files as loaded.
    pub fn absorb(&self, data_files: &[PathBuf], results: Vec<FileRecordSet>) {
        let mut state = self.state.write().unwrap();
        for records in results {
            self.merge_locked(&mut state, records);
        }
        state.absorbed.extend_from_slice(data_files);
    }

    pub fn has_data(&self) -> bool {
        !self.state.read().unwrap().absorbed.is_empty()
    }

    pub fn absorbed_count(&self) -> usize {
        self.state.read().unwrap().absorbed.len()
    }

    pub fn absorbed(&self) -> Vec<PathBuf> {
        self.state.read().unwrap().absorbed.clone()
    }

    pub fn demangled_name(&self, mangled_name: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .demangled_names
            .get(mangled_name)
            .cloned()
    }

    pub fn all_known_paths(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .files
            .iter()
            .map(|file| file.path().to_string())
            .collect()
    }

    pub fn files(&self) -> Vec<Arc<FileCoverage>> {
        self.state.read().unwrap().files.clone()
    }

    /// Finds the data for a file an editor asks about.
    ///
    /// Tries an exact match, then (on Windows) a case and separator insensitive
    /// match, and finally any stored path the queried path ends with.
    pub fn lookup(&self, absolute_path: &str) -> Option<Arc<FileCoverage>> {
        self.lookup_with(absolute_path, cfg!(windows))
    }

    fn lookup_with(&self, absolute_path: &str, case_insensitive: bool) -> Option<Arc<FileCoverage>> {
        let state = self.state.read().unwrap();

        if let Some(&i) = state.index.get(absolute_path) {
            return Some(Arc::clone(&state.files[i]));
        }

        if case_insensitive {
            let normalized = normalize_path(absolute_path);
            if let Some(file) = state
                .files
                .iter()
                .find(|file| normalize_path(file.path()) == normalized)
            {
                return Some(Arc::clone(file));
            }
        }

        // With several candidates the first one loaded wins, even though a longer
        // suffix might be the better match.
        let file = state
            .files
            .iter()
            .find(|file| absolute_path.ends_with(file.path()))?;
        debug!("Matched {} to stored path {}", absolute_path, file.path());
        Some(Arc::clone(file))
    }
}

/// Folds `.` and `..` components without touching the filesystem, so symlinks
/// are left unresolved.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                // `/..` is `/`.
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => cleaned.push(component),
            },
            _ => cleaned.push(component),
        }
    }
    cleaned
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

/// Shared access to the current cache. Readers keep the `Arc` they got, so a
/// reload swapping in a new cache never hands them a mix of old and new data.
#[derive(Debug, Default)]
pub struct CacheHandle {
    current: RwLock<Arc<CoverageCache>>,
}

impl CacheHandle {
    pub fn new(cache: CoverageCache) -> Self {
        Self {
            current: RwLock::new(Arc::new(cache)),
        }
    }

    pub fn current(&self) -> Arc<CoverageCache> {
        Arc::clone(&self.current.read().unwrap())
    }

    /// Swaps in `cache` and returns the one it replaced.
    pub fn replace(&self, cache: CoverageCache) -> Arc<CoverageCache> {
        let cache = Arc::new(cache);
        let mut current = self.current.write().unwrap();
        std::mem::replace(&mut *current, cache)
    }
}

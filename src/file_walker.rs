use log::debug;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::coordinator::{CancellationToken, CandidateSource};

/// Returns true if the canonicalized `symlink_target` matches any canonicalized ancestor in `ancestor_stack`.
#[inline]
fn is_symlink_loop(symlink_target: &Path, ancestor_stack: &[PathBuf]) -> bool {
    if let Ok(target_canon) = symlink_target.canonicalize() {
        ancestor_stack
            .iter()
            .any(|ancestor| ancestor.canonicalize().is_ok_and(|a| a == target_canon))
    } else {
        false
    }
}

/// A Rayon based parallel directory scanner.
///
/// Unreadable directories and entries are skipped, every regular file found is
/// handed to the callback.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    follow_links: bool,
    max_depth: Option<usize>,
    threads: usize,
}

impl Default for DirectoryScanner {
    fn default() -> Self {
        Self {
            follow_links: true,
            max_depth: None,
            threads: 0,
        }
    }
}

impl DirectoryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable following symbolic links
    pub fn follow_links(mut self, enable: bool) -> Self {
        self.follow_links = enable;
        self
    }

    /// Set maximum directory depth to traverse
    pub fn max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Number of scanning threads, 0 lets Rayon decide.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    fn walk_dir(
        &self,
        path: &Path,
        depth: usize,
        cancel: &CancellationToken,
        on_file: &(dyn Fn(&Path) + Sync),
        symlink_ancestor_stack: Option<Vec<PathBuf>>,
    ) {
        if self.max_depth.is_some_and(|max_depth| depth > max_depth) || cancel.is_cancelled() {
            return;
        }

        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Error reading directory {path:?}: {e}");
                return;
            }
        };

        entries.par_bridge().for_each(|entry_result| {
            if cancel.is_cancelled() {
                return;
            }
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Error reading entry {path:?}: {e}");
                    return;
                }
            };
            let entry_path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    debug!("Error reading file type of {entry_path:?}: {e}");
                    return;
                }
            };

            let (is_dir, is_file) = if file_type.is_symlink() {
                match symlink_ancestor_stack {
                    Some(ref stack) => match entry_path.metadata() {
                        Ok(metadata) => (
                            metadata.is_dir() && !is_symlink_loop(&entry_path, stack),
                            metadata.is_file(),
                        ),
                        Err(e) => {
                            debug!("Error following symlink {entry_path:?}: {e}");
                            (false, false)
                        }
                    },
                    None => (false, false),
                }
            } else {
                (file_type.is_dir(), file_type.is_file())
            };

            if is_dir {
                let stack = symlink_ancestor_stack.as_ref().map(|stack| {
                    let mut new_stack = stack.clone();
                    new_stack.push(entry_path.clone());
                    new_stack
                });
                self.walk_dir(&entry_path, depth + 1, cancel, on_file, stack);
            } else if is_file {
                on_file(&entry_path);
            }
        });
    }
}

impl CandidateSource for DirectoryScanner {
    fn scan(&self, roots: &[PathBuf], cancel: &CancellationToken, on_file: &(dyn Fn(&Path) + Sync)) {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                debug!("Failed to build the scanning thread pool: {e}");
                return;
            }
        };

        pool.install(|| {
            roots.par_iter().for_each(|root| {
                let stack = self.follow_links.then(|| vec![root.clone()]);
                self.walk_dir(root, 0, cancel, on_file, stack);
            })
        });
    }
}

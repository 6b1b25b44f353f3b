use crossbeam_channel::{unbounded, Sender};
use log::{debug, error, info, warn};
use rand::thread_rng;
use rustc_hash::FxHashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use thiserror::Error;

use crate::cache::{CacheHandle, CoverageCache};
use crate::config::Config;
use crate::defs::ProgressEvent;
use crate::gcov::{CoverageTool, GcovError};
use crate::partition::{partition_by_size, partition_into, shuffle};

/// Cooperative cancellation shared by everything taking part in one reload.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Finds the files a reload may pick coverage data from.
pub trait CandidateSource: Sync {
    /// Calls `on_file` for every file below `roots`. Stops early once `cancel` is raised.
    fn scan(&self, roots: &[PathBuf], cancel: &CancellationToken, on_file: &(dyn Fn(&Path) + Sync));
}

impl<S: CandidateSource + ?Sized> CandidateSource for &S {
    fn scan(&self, roots: &[PathBuf], cancel: &CancellationToken, on_file: &(dyn Fn(&Path) + Sync)) {
        (**self).scan(roots, cancel, on_file)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadState {
    Idle,
    Scanning,
    Dispatching,
    Merging,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for ReloadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ReloadState::Idle => "idle",
            ReloadState::Scanning => "scanning",
            ReloadState::Dispatching => "dispatching",
            ReloadState::Merging => "merging",
            ReloadState::Completed => "completed",
            ReloadState::Cancelled => "cancelled",
            ReloadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("The coverage tool is missing or too old")]
    ToolIncompatible,
    #[error(
        "Cannot find any coverage data files. Possible problems:\n\
         1) The program was not built with --coverage.\n\
         2) The build directory is located somewhere else and has to be configured.\n\
         3) The program has not been run yet."
    )]
    NoCandidates,
}

/// A sub-chunk whose tool invocation failed. Its records are missing from the cache.
#[derive(Debug)]
pub struct ChunkFailure {
    pub paths: Vec<PathBuf>,
    pub error: GcovError,
}

#[derive(Debug)]
pub struct ReloadReport {
    pub state: ReloadState,
    /// Number of data files found by the scan.
    pub requested: usize,
    /// Number of data files whose records made it into the cache.
    pub absorbed: usize,
    pub failures: Vec<ChunkFailure>,
}

enum BatchEvent {
    Absorbed(usize),
    Failed(ChunkFailure),
}

/// Drives a full reload: scan for data files, run the coverage tool over them in
/// parallel batches and collect the results in a fresh cache.
pub struct Coordinator<T, S> {
    tool: T,
    source: S,
    config: Config,
    state: Mutex<ReloadState>,
}

impl<T: CoverageTool, S: CandidateSource> Coordinator<T, S> {
    pub fn new(tool: T, source: S, config: Config) -> Self {
        Self {
            tool,
            source,
            config,
            state: Mutex::new(ReloadState::Idle),
        }
    }

    pub fn state(&self) -> ReloadState {
        *self.state.lock().unwrap()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn set_state(&self, state: ReloadState) {
        info!("Reload {}", state);
        *self.state.lock().unwrap() = state;
    }

    /// Replaces the cache behind `handle` and fills it with the data files found
    /// below `roots`.
    ///
    /// Records merged before a cancellation or a failed invocation stay in the
    /// cache. `on_progress` is always called on the calling thread.
    pub fn reload(
        &self,
        handle: &CacheHandle,
        roots: &[PathBuf],
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<ReloadReport, ReloadError> {
        if !self.tool.is_compatible() {
            self.set_state(ReloadState::Failed);
            return Err(ReloadError::ToolIncompatible);
        }

        handle.replace(CoverageCache::new(self.config.base_dir.clone()));
        let cache = handle.current();
        on_progress(ProgressEvent::message("Searching coverage data files"));

        self.set_state(ReloadState::Scanning);
        let mut candidates = self.scan(roots, cancel, on_progress);
        let requested = candidates.len();

        if cancel.is_cancelled() {
            self.set_state(ReloadState::Cancelled);
            return Ok(ReloadReport {
                state: ReloadState::Cancelled,
                requested,
                absorbed: 0,
                failures: Vec::new(),
            });
        }
        if candidates.is_empty() {
            self.set_state(ReloadState::Failed);
            return Err(ReloadError::NoCandidates);
        }

        shuffle(&mut candidates, &mut thread_rng());

        self.set_state(ReloadState::Dispatching);
        let (absorbed, failures) = self.dispatch(&cache, candidates, cancel, on_progress);

        let state = if cancel.is_cancelled() {
            ReloadState::Cancelled
        } else {
            ReloadState::Completed
        };
        self.set_state(state);
        info!(
            "Loaded {}/{} coverage data files ({} failed invocations)",
            absorbed,
            requested,
            failures.len()
        );

        Ok(ReloadReport {
            state,
            requested,
            absorbed,
            failures,
        })
    }

    fn scan(
        &self,
        roots: &[PathBuf],
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(ProgressEvent),
    ) -> Vec<PathBuf> {
        let (sender, receiver) = unbounded::<PathBuf>();
        let mut candidates = Vec::new();
        let mut seen = FxHashSet::default();

        thread::scope(|s| {
            s.spawn(move || {
                self.source.scan(roots, cancel, &|path: &Path| {
                    let _ = sender.send(path.to_path_buf());
                });
            });

            for (observed, path) in receiver.iter().enumerate() {
                if self.config.is_data_file(&path) && seen.insert(path.clone()) {
                    candidates.push(path.clone());
                }
                on_progress(ProgressEvent::message(format!(
                    "[{}] Scanning (found {}): {}",
                    observed + 1,
                    candidates.len(),
                    path.display()
                )));
            }
        });

        candidates
    }

    fn dispatch(
        &self,
        cache: &CoverageCache,
        candidates: Vec<PathBuf>,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(ProgressEvent),
    ) -> (usize, Vec<ChunkFailure>) {
        let total = candidates.len();
        let batches = partition_into(&candidates, self.config.workers);
        let (sender, receiver) = unbounded();
        let mut absorbed = 0;
        let mut failures = Vec::new();

        thread::scope(|s| {
            for (i, batch) in batches.into_iter().enumerate() {
                if batch.is_empty() {
                    continue;
                }
                let spawned = {
                    let batch = batch.clone();
                    let sender = sender.clone();
                    thread::Builder::new()
                        .name(format!("Batch {}", i))
                        .spawn_scoped(s, move || self.run_batch(cache, batch, cancel, &sender))
                };
                if let Err(e) = spawned {
                    // The channel is unbounded, so this can't block on the receiver below.
                    warn!("Unable to spawn batch {}, running it inline: {}", i, e);
                    self.run_batch(cache, batch, cancel, &sender);
                }
            }
            drop(sender);

            self.set_state(ReloadState::Merging);
            for event in receiver.iter() {
                match event {
                    BatchEvent::Absorbed(count) => {
                        absorbed += count;
                        on_progress(ProgressEvent {
                            completed: absorbed,
                            total,
                            increment: 100.0 * count as f64 / total as f64,
                            message: format!("[{}/{}] Parsing", absorbed, total),
                        });
                    }
                    BatchEvent::Failed(failure) => {
                        error!("{}", failure.error);
                        on_progress(ProgressEvent {
                            completed: absorbed,
                            total,
                            increment: 0.0,
                            message: format!(
                                "[{}/{}] Failed to process {} files",
                                absorbed,
                                total,
                                failure.paths.len()
                            ),
                        });
                        failures.push(failure);
                    }
                }
            }
        });

        (absorbed, failures)
    }

    fn run_batch(
        &self,
        cache: &CoverageCache,
        batch: Vec<PathBuf>,
        cancel: &CancellationToken,
        sender: &Sender<BatchEvent>,
    ) {
        for chunk in partition_by_size(&batch, self.config.chunk_size) {
            if cancel.is_cancelled() {
                debug!("Cancelled, skipping {} files", chunk.len());
                return;
            }

            let event = match self.tool.invoke(&chunk) {
                Ok(results) => {
                    cache.absorb(&chunk, results);
                    BatchEvent::Absorbed(chunk.len())
                }
                Err(error) => BatchEvent::Failed(ChunkFailure {
                    paths: chunk,
                    error,
                }),
            };
            if sender.send(event).is_err() {
                return;
            }
        }
    }
}

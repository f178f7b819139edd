//! Typed result storage over a [`KvStore`].
//!
//! Results are stored as JSON blobs under `<stage-prefix>:<job-key>`. Keys
//! starting with [`META_PREFIX`] hold bookkeeping values instead of results
//! and are skipped by the result-level queries.

use crate::best::{BestCache, BestEntry};
use crate::store::{KvStore, MemoryStore};
use dse_types::{DatabaseError, DseResult, EvalMode, EvalResult, RetCode};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix of every non-result key.
pub const META_PREFIX: &str = "meta-";

/// Key of the best-cache snapshot written by [`ResultDatabase::commit_best`].
pub const BEST_CACHE_KEY: &str = "meta-best-cache";

pub struct ResultDatabase {
    name: String,
    path: Option<PathBuf>,
    store: Box<dyn KvStore>,
    best: Mutex<BestCache>,
}

impl std::fmt::Debug for ResultDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultDatabase")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("entries", &self.store.len())
            .finish()
    }
}

impl ResultDatabase {
    /// A database that lives only in memory. `persist` is a no-op.
    pub fn in_memory(name: impl Into<String>, capacity: usize) -> Self {
        Self::with_store(name, None, Box::new(MemoryStore::new()), capacity)
    }

    pub fn with_store(
        name: impl Into<String>,
        path: Option<PathBuf>,
        store: Box<dyn KvStore>,
        capacity: usize,
    ) -> Self {
        Self {
            name: name.into(),
            path,
            store,
            best: Mutex::new(BestCache::new(capacity)),
        }
    }

    /// Opens a database backed by `path`, loading it when the file exists.
    pub fn open(name: impl Into<String>, path: impl Into<PathBuf>, capacity: usize) -> DseResult<Self> {
        let db = Self::with_store(name, Some(path.into()), Box::new(MemoryStore::new()), capacity);
        db.load()?;
        Ok(db)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ---- Results ----

    /// Stores a result, replacing any previous one under the same key.
    pub fn commit(&self, key: &str, result: &EvalResult) -> DseResult<()> {
        let blob = serde_json::to_string(result)?;
        if self.store.set(key, blob).is_some() {
            debug!(db = %self.name, key, "Overwrote existing result");
        }
        if result.is_rankable() {
            self.update_best(key, result.clone());
        } else if self.best.lock().remove(key) {
            debug!(db = %self.name, key, "Dropped stale best entry");
        }
        Ok(())
    }

    pub fn batch_commit<'a, I>(&self, pairs: I) -> DseResult<()>
    where
        I: IntoIterator<Item = (&'a str, &'a EvalResult)>,
    {
        for (key, result) in pairs {
            self.commit(key, result)?;
        }
        Ok(())
    }

    pub fn query(&self, key: &str) -> DseResult<Option<EvalResult>> {
        match self.store.get(key) {
            Some(blob) => decode(key, &blob).map(Some),
            None => Ok(None),
        }
    }

    /// One slot per input key, in input order.
    pub fn batch_query<S: AsRef<str>>(&self, keys: &[S]) -> DseResult<Vec<Option<EvalResult>>> {
        keys.iter().map(|key| self.query(key.as_ref())).collect()
    }

    /// Every stored result, ordered by key.
    pub fn query_all(&self) -> DseResult<Vec<(String, EvalResult)>> {
        self.store
            .snapshot()
            .into_iter()
            .filter(|(key, _)| !key.starts_with(META_PREFIX))
            .map(|(key, blob)| {
                let result = decode(&key, &blob)?;
                Ok((key, result))
            })
            .collect()
    }

    /// Number of stored keys, metadata included.
    pub fn count(&self) -> usize {
        self.store.len()
    }

    pub fn count_by_status(&self, status: RetCode) -> DseResult<usize> {
        Ok(self
            .query_all()?
            .iter()
            .filter(|(_, result)| result.ret_code == status)
            .count())
    }

    /// Pipeline outcome of a job key under `mode`: the first stage result
    /// that did not pass, otherwise the final stage result. `None` when a
    /// stage on the way has no committed result.
    pub fn query_outcome(&self, job_key: &str, mode: EvalMode) -> DseResult<Option<EvalResult>> {
        let mut outcome = None;
        for stage in mode.stages() {
            match self.query(&stage.result_key(job_key))? {
                None => return Ok(None),
                Some(result) if !result.ret_code.is_pass() => return Ok(Some(result)),
                Some(result) => outcome = Some(result),
            }
        }
        Ok(outcome)
    }

    pub fn batch_query_outcome<S: AsRef<str>>(
        &self,
        job_keys: &[S],
        mode: EvalMode,
    ) -> DseResult<Vec<Option<EvalResult>>> {
        job_keys
            .iter()
            .map(|key| self.query_outcome(key.as_ref(), mode))
            .collect()
    }

    // ---- Metadata ----

    pub fn commit_meta<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> DseResult<()> {
        let blob = serde_json::to_string(value)?;
        self.store.set(key, blob);
        Ok(())
    }

    pub fn query_meta<T: DeserializeOwned>(&self, key: &str) -> DseResult<Option<T>> {
        match self.store.get(key) {
            Some(blob) => serde_json::from_str(&blob)
                .map(Some)
                .map_err(|e| corrupted(key, e)),
            None => Ok(None),
        }
    }

    // ---- Best cache ----

    /// Pushes a candidate into the best cache, replacing the entry of the same
    /// key. Capacity is enforced by
    /// [`trim_best`](Self::trim_best).
    pub fn update_best(&self, key: &str, result: EvalResult) {
        self.best.lock().push(key.to_string(), result);
    }

    pub fn trim_best(&self) -> usize {
        self.best.lock().trim()
    }

    /// Cached results with their keys, best first.
    pub fn best_results(&self) -> Vec<(String, EvalResult)> {
        self.best
            .lock()
            .entries()
            .into_iter()
            .map(|entry| (entry.key, entry.result))
            .collect()
    }

    pub fn best_result(&self) -> Option<(String, EvalResult)> {
        self.best.lock().top().map(|entry| (entry.key, entry.result))
    }

    /// Empties the best cache, returning its results best first.
    pub fn take_best(&self) -> Vec<(String, EvalResult)> {
        self.best
            .lock()
            .drain()
            .into_iter()
            .map(|entry| (entry.key, entry.result))
            .collect()
    }

    pub fn best_len(&self) -> usize {
        self.best.lock().len()
    }

    pub fn best_capacity(&self) -> usize {
        self.best.lock().capacity()
    }

    /// Quality of the worst cached result.
    pub fn best_cache_min(&self) -> Option<f64> {
        self.best.lock().min_quality()
    }

    pub fn commit_best(&self) -> DseResult<()> {
        let entries = self.best.lock().entries();
        self.commit_meta(BEST_CACHE_KEY, &entries)
    }

    // ---- Persistence ----

    /// Merges the backing file into the store (when it exists) and rebuilds
    /// the best cache, from its snapshot if one was committed.
    pub fn load(&self) -> DseResult<()> {
        if let Some(path) = &self.path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                let entries: BTreeMap<String, String> = serde_json::from_str(&text)
                    .map_err(|e| corrupted(&path.display().to_string(), e))?;
                let loaded = entries.len();
                for (key, blob) in entries {
                    self.store.set(&key, blob);
                }
                info!(db = %self.name, path = %path.display(), loaded, "Loaded database");
            }
        }

        match self.query_meta::<Vec<BestEntry>>(BEST_CACHE_KEY) {
            Ok(Some(entries)) => {
                info!(db = %self.name, cached = entries.len(), "Restored best cache");
                self.best.lock().restore(entries);
            }
            Ok(None) => {
                if !self.store.is_empty() {
                    warn!(db = %self.name, "Best cache snapshot missing, rebuilding from results");
                }
                self.rebuild_best();
            }
            Err(e) => {
                warn!(db = %self.name, error = %e, "Best cache snapshot unreadable, rebuilding from results");
                self.rebuild_best();
            }
        }
        Ok(())
    }

    fn rebuild_best(&self) {
        let mut best = self.best.lock();
        best.clear();
        for (key, blob) in self.store.snapshot() {
            if key.starts_with(META_PREFIX) {
                continue;
            }
            match decode(&key, &blob) {
                Ok(result) if result.is_rankable() => best.push(key, result),
                Ok(_) => {}
                Err(e) => warn!(db = %self.name, error = %e, "Skipping unreadable result"),
            }
        }
    }

    /// Writes every entry to the backing file, replacing it atomically.
    pub fn persist(&self) -> DseResult<()> {
        let Some(path) = &self.path else {
            debug!(db = %self.name, "In-memory database, nothing to persist");
            return Ok(());
        };

        let entries = self.store.snapshot();
        let text = serde_json::to_string(&entries)?;
        let staging = path.with_extension("tmp");
        std::fs::write(&staging, text)
            .and_then(|_| std::fs::rename(&staging, path))
            .map_err(|e| DatabaseError::PersistFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        info!(db = %self.name, path = %path.display(), entries = entries.len(), "Persisted database");
        Ok(())
    }
}

fn decode(key: &str, blob: &str) -> DseResult<EvalResult> {
    serde_json::from_str(blob).map_err(|e| corrupted(key, e))
}

fn corrupted(key: &str, error: serde_json::Error) -> dse_types::DseError {
    DatabaseError::Corrupted {
        key: key.to_string(),
        message: error.to_string(),
    }
    .into()
}

//! Pattern store: injectable repository for learned false-alarm patterns.
//!
//! The store is the only shared mutable state in the detection core. Writes
//! go through a single lock per store so concurrent `upsert` calls cannot
//! lose occurrence increments; reads work on snapshots, since a stale read
//! only costs a missed discount.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use leakwatch_core::LeakError;

use crate::signature::PatternSignature;

/// A learned false-alarm pattern. Append-only; repeat occurrences bump the
/// count instead of duplicating the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub signature: PatternSignature,
    pub occurrence_count: u32,
    pub last_seen: DateTime<Utc>,
}

/// Repository interface for learned patterns.
///
/// Implementations must be safe to share across property-scoring threads.
pub trait PatternStore: Send + Sync {
    /// Exact lookup by signature key.
    fn get(&self, signature: &PatternSignature) -> Result<Option<LearnedPattern>, LeakError>;

    /// Insert the signature or increment its occurrence count. Returns the
    /// count after the update.
    fn upsert(
        &self,
        signature: &PatternSignature,
        now: DateTime<Utc>,
    ) -> Result<u32, LeakError>;

    /// Snapshot of all stored patterns, for near-match scans.
    fn all(&self) -> Result<Vec<LearnedPattern>, LeakError>;
}

impl<S: PatternStore + ?Sized> PatternStore for Box<S> {
    fn get(&self, signature: &PatternSignature) -> Result<Option<LearnedPattern>, LeakError> {
        (**self).get(signature)
    }

    fn upsert(
        &self,
        signature: &PatternSignature,
        now: DateTime<Utc>,
    ) -> Result<u32, LeakError> {
        (**self).upsert(signature, now)
    }

    fn all(&self) -> Result<Vec<LearnedPattern>, LeakError> {
        (**self).all()
    }
}

// ── In-memory store ─────────────────────────────────────────────────

/// Volatile store for tests and single-run replays.
#[derive(Debug, Default)]
pub struct MemoryPatternStore {
    patterns: RwLock<HashMap<String, LearnedPattern>>,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatternStore for MemoryPatternStore {
    fn get(&self, signature: &PatternSignature) -> Result<Option<LearnedPattern>, LeakError> {
        let patterns = self
            .patterns
            .read()
            .map_err(|_| LeakError::PatternStore("lock poisoned".to_owned()))?;
        Ok(patterns.get(&signature.key()).cloned())
    }

    fn upsert(
        &self,
        signature: &PatternSignature,
        now: DateTime<Utc>,
    ) -> Result<u32, LeakError> {
        let mut patterns = self
            .patterns
            .write()
            .map_err(|_| LeakError::PatternStore("lock poisoned".to_owned()))?;
        let entry = patterns
            .entry(signature.key())
            .and_modify(|p| {
                p.occurrence_count += 1;
                p.last_seen = now;
            })
            .or_insert_with(|| LearnedPattern {
                signature: signature.clone(),
                occurrence_count: 1,
                last_seen: now,
            });
        Ok(entry.occurrence_count)
    }

    fn all(&self) -> Result<Vec<LearnedPattern>, LeakError> {
        let patterns = self
            .patterns
            .read()
            .map_err(|_| LeakError::PatternStore("lock poisoned".to_owned()))?;
        Ok(patterns.values().cloned().collect())
    }
}

// ── File-backed store ───────────────────────────────────────────────

/// Append-only JSONL store. Each upsert appends the full updated record;
/// on open the log is replayed and the last record per key wins.
///
/// A line that fails to parse is skipped with a warning; a corrupted entry
/// must never break a matching pass.
pub struct FilePatternStore {
    path: PathBuf,
    inner: RwLock<FileStoreInner>,
}

struct FileStoreInner {
    index: HashMap<String, LearnedPattern>,
    log: File,
}

impl FilePatternStore {
    /// Open (or create) the store at `path`, replaying the existing log.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LeakError> {
        let path = path.as_ref().to_path_buf();
        let mut index = HashMap::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let mut skipped = 0usize;
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LearnedPattern>(&line) {
                    Ok(pattern) => {
                        // Last write wins; keep the higher count if an older
                        // line somehow reappears after a newer one.
                        index
                            .entry(pattern.signature.key())
                            .and_modify(|existing: &mut LearnedPattern| {
                                if pattern.occurrence_count >= existing.occurrence_count {
                                    *existing = pattern.clone();
                                }
                            })
                            .or_insert(pattern);
                    }
                    Err(e) => {
                        skipped += 1;
                        warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "skipping corrupted pattern entry"
                        );
                    }
                }
            }
            debug!(
                path = %path.display(),
                patterns = index.len(),
                skipped,
                "pattern store loaded"
            );
        }

        let log = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(FileStoreInner { index, log }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PatternStore for FilePatternStore {
    fn get(&self, signature: &PatternSignature) -> Result<Option<LearnedPattern>, LeakError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| LeakError::PatternStore("lock poisoned".to_owned()))?;
        Ok(inner.index.get(&signature.key()).cloned())
    }

    fn upsert(
        &self,
        signature: &PatternSignature,
        now: DateTime<Utc>,
    ) -> Result<u32, LeakError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| LeakError::PatternStore("lock poisoned".to_owned()))?;

        let updated = match inner.index.get(&signature.key()) {
            Some(existing) => LearnedPattern {
                signature: signature.clone(),
                occurrence_count: existing.occurrence_count + 1,
                last_seen: now,
            },
            None => LearnedPattern {
                signature: signature.clone(),
                occurrence_count: 1,
                last_seen: now,
            },
        };

        let line = serde_json::to_string(&updated)
            .map_err(|e| LeakError::PatternStore(e.to_string()))?;
        writeln!(inner.log, "{line}")?;

        let count = updated.occurrence_count;
        inner.index.insert(signature.key(), updated);
        Ok(count)
    }

    fn all(&self) -> Result<Vec<LearnedPattern>, LeakError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| LeakError::PatternStore("lock poisoned".to_owned()))?;
        Ok(inner.index.values().cloned().collect())
    }
}

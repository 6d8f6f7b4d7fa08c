//! Mutant registry
//!
//! Registration happens single-threaded while mutants are generated. Afterwards the
//! registry is shared by reference with the worker pool: each entry carries its own
//! atomic status word and its own execution record lock, so workers finishing
//! different mutants never contend.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{MutationError, Result};
use crate::mutant::{Fingerprint, Mutant, MutantId, MutantStatus, MutatorKind, SourceSpan};
use crate::runner::TestId;

/// Where a mutant lives and what it changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutantLocation {
    pub file: PathBuf,
    pub span: SourceSpan,
    pub original: String,
    pub replacement: String,
    pub site_index: usize,
}

/// What happened while a mutant was classified
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Tests executed against the mutant, in execution order
    pub tests_run: Vec<TestId>,
    /// Tests that failed (detected the mutant)
    pub killing_tests: Vec<TestId>,
    pub duration: Duration,
    /// Human-readable detail for ignored, compile error and timeout outcomes
    pub reason: Option<String>,
    /// Status was copied from a stored baseline instead of executed
    pub from_baseline: bool,
}

struct Entry {
    mutant: Mutant,
    status: AtomicU8,
    record: Mutex<ExecutionRecord>,
}

/// Immutable copy of one mutant's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutantSnapshot {
    pub mutant: Mutant,
    pub status: MutantStatus,
    pub record: ExecutionRecord,
}

#[derive(Default)]
pub struct MutantRegistry {
    entries: Vec<Entry>,
}

impl MutantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutant and return its run-local id
    pub fn register(
        &mut self,
        fingerprint: Fingerprint,
        location: MutantLocation,
        kind: MutatorKind,
    ) -> MutantId {
        let id = self.entries.len();
        self.entries.push(Entry {
            mutant: Mutant {
                id,
                fingerprint,
                file: location.file,
                kind,
                span: location.span,
                original: location.original,
                replacement: location.replacement,
                site_index: location.site_index,
            },
            status: AtomicU8::new(MutantStatus::Pending.to_u8()),
            record: Mutex::new(ExecutionRecord::default()),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: MutantId) -> Option<&Mutant> {
        self.entries.get(id).map(|e| &e.mutant)
    }

    pub fn mutants(&self) -> impl Iterator<Item = &Mutant> {
        self.entries.iter().map(|e| &e.mutant)
    }

    pub fn status(&self, id: MutantId) -> Result<MutantStatus> {
        let entry = self.entry(id)?;
        Ok(MutantStatus::from_u8(entry.status.load(Ordering::Acquire)))
    }

    /// Move a mutant to `status`.
    ///
    /// Fails with [`MutationError::InvalidTransition`] once a terminal status has been
    /// recorded, or when asked to go back to `Pending`.
    pub fn set_status(&self, id: MutantId, status: MutantStatus) -> Result<()> {
        let entry = self.entry(id)?;
        let mut current = entry.status.load(Ordering::Acquire);
        loop {
            let from = MutantStatus::from_u8(current);
            if from.is_terminal() || (status == MutantStatus::Pending && from != MutantStatus::Pending)
            {
                return Err(MutationError::InvalidTransition {
                    mutant: id,
                    from,
                    to: status,
                });
            }
            match entry.status.compare_exchange(
                current,
                status.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Record a terminal status together with its execution details
    pub fn complete(&self, id: MutantId, status: MutantStatus, record: ExecutionRecord) -> Result<()> {
        self.set_status(id, status)?;
        let entry = self.entry(id)?;
        *entry.record.lock().unwrap_or_else(|e| e.into_inner()) = record;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<MutantSnapshot> {
        self.entries
            .iter()
            .map(|entry| MutantSnapshot {
                mutant: entry.mutant.clone(),
                status: MutantStatus::from_u8(entry.status.load(Ordering::Acquire)),
                record: entry
                    .record
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone(),
            })
            .collect()
    }

    fn entry(&self, id: MutantId) -> Result<&Entry> {
        self.entries
            .get(id)
            .ok_or(MutationError::UnknownMutant { mutant: id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn location(line: usize) -> MutantLocation {
        MutantLocation {
            file: PathBuf::from("src/lib.rs"),
            span: SourceSpan {
                start_line: line,
                start_column: 1,
                end_line: line,
                end_column: 6,
            },
            original: "a + b".to_string(),
            replacement: "a - b".to_string(),
            site_index: 0,
        }
    }

    fn registry_with(n: usize) -> MutantRegistry {
        let mut registry = MutantRegistry::new();
        for line in 0..n {
            let loc = location(line + 1);
            let fp = Fingerprint::compute(
                Path::new("src/lib.rs"),
                MutatorKind::Arithmetic,
                &loc.span,
                &loc.original,
                &loc.replacement,
            );
            registry.register(fp, loc, MutatorKind::Arithmetic);
        }
        registry
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let registry = registry_with(3);
        let ids: Vec<_> = registry.mutants().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(registry.status(1).unwrap(), MutantStatus::Pending);
    }

    #[test]
    fn test_terminal_status_is_written_once() {
        let registry = registry_with(1);
        registry.set_status(0, MutantStatus::NotRun).unwrap();
        registry.set_status(0, MutantStatus::Killed).unwrap();

        let err = registry.set_status(0, MutantStatus::Survived).unwrap_err();
        assert!(matches!(
            err,
            MutationError::InvalidTransition {
                from: MutantStatus::Killed,
                to: MutantStatus::Survived,
                ..
            }
        ));
        assert_eq!(registry.status(0).unwrap(), MutantStatus::Killed);
    }

    #[test]
    fn test_cannot_revert_to_pending() {
        let registry = registry_with(1);
        registry.set_status(0, MutantStatus::NotRun).unwrap();
        assert!(registry.set_status(0, MutantStatus::Pending).is_err());
    }

    #[test]
    fn test_unknown_id() {
        let registry = registry_with(1);
        assert!(matches!(
            registry.set_status(7, MutantStatus::Killed),
            Err(MutationError::UnknownMutant { mutant: 7 })
        ));
    }

    #[test]
    fn test_concurrent_writers_record_one_terminal_status() {
        let registry = registry_with(64);
        let successes = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let registry = &registry;
                let successes = &successes;
                scope.spawn(move || {
                    let status = if worker % 2 == 0 {
                        MutantStatus::Killed
                    } else {
                        MutantStatus::Survived
                    };
                    for id in 0..64 {
                        if registry.set_status(id, status).is_ok() {
                            successes.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::SeqCst), 64);
        assert!(registry.snapshot().iter().all(|m| m.status.is_terminal()));
    }

    #[test]
    fn test_snapshot_carries_record() {
        let registry = registry_with(1);
        registry
            .complete(
                0,
                MutantStatus::Killed,
                ExecutionRecord {
                    tests_run: vec![2],
                    killing_tests: vec![2],
                    ..ExecutionRecord::default()
                },
            )
            .unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].status, MutantStatus::Killed);
        assert_eq!(snapshot[0].record.killing_tests, vec![2]);
    }
}

//! Guarantees at most one in-flight ceremony of every kind

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::conversation::CeremonyKind;
use crate::error::Error;

/// Process-wide registry of running ceremonies
///
/// Cloning the registry gives another handle to the same state.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    running: Arc<[AtomicBool; 3]>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks ceremony of given kind as running
    ///
    /// Returns [`Error::Busy`] if a ceremony of the same kind is already running. The ceremony is
    /// marked as finished once the returned guard is dropped.
    pub fn try_acquire(&self, kind: CeremonyKind) -> Result<SessionGuard, Error> {
        self.running[slot(kind)]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy(kind))?;
        tracing::trace!(%kind, "session acquired");
        Ok(SessionGuard {
            running: self.running.clone(),
            kind,
        })
    }

    pub fn is_running(&self, kind: CeremonyKind) -> bool {
        self.running[slot(kind)].load(Ordering::Acquire)
    }
}

/// Running ceremony. Released on drop
#[derive(Debug)]
#[must_use = "ceremony is released as soon as the guard is dropped"]
pub struct SessionGuard {
    running: Arc<[AtomicBool; 3]>,
    kind: CeremonyKind,
}

impl SessionGuard {
    pub fn kind(&self) -> CeremonyKind {
        self.kind
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.running[slot(self.kind)].store(false, Ordering::Release);
        tracing::trace!(kind = %self.kind, "session released");
    }
}

fn slot(kind: CeremonyKind) -> usize {
    match kind {
        CeremonyKind::Keygen => 0,
        CeremonyKind::Sign => 1,
        CeremonyKind::Backup => 2,
    }
}

//! In-process mutual exclusion per resume.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Keyed async mutex: at most one holder per resume id within this
/// process.
///
/// The queue's claim filter already keeps two running jobs for one resume
/// apart. This covers the window where the watchdog has reaped an attempt
/// that is still executing here and its retry gets claimed.
#[derive(Default)]
pub struct ResumeLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Held while a job runs; releases the resume on drop.
pub struct ResumeGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ResumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `resume_id`.
    pub async fn lock(&self, resume_id: Uuid) -> ResumeGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only the map still references are idle.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(resume_id).or_default().clone()
        };
        ResumeGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Whether some task currently holds `resume_id`.
    pub async fn is_locked(&self, resume_id: Uuid) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(&resume_id)
            .is_some_and(|l| l.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_resume_is_serialized() {
        let locks = Arc::new(ResumeLocks::new());
        let resume_id = Uuid::new_v4();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let (locks, active, peak) = (locks.clone(), active.clone(), peak.clone());
            tasks.spawn(async move {
                let _guard = locks.lock(resume_id).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(!locks.is_locked(resume_id).await);
    }

    #[tokio::test]
    async fn test_different_resumes_do_not_block() {
        let locks = ResumeLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let _ga = locks.lock(a).await;
        let gb = tokio::time::timeout(Duration::from_secs(1), locks.lock(b)).await;
        assert!(gb.is_ok());
        assert!(locks.is_locked(a).await);
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = ResumeLocks::new();
        for _ in 0..10 {
            let _guard = locks.lock(Uuid::new_v4()).await;
        }
        let _last = locks.lock(Uuid::new_v4()).await;
        assert_eq!(locks.locks.lock().await.len(), 1);
    }
}

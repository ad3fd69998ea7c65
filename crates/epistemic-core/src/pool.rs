//! Bounded worker pool for per-image scoring.
//!
//! Workers are scoped threads pulling the next item index from a shared
//! cursor, so at most `size` jobs run at once and no item runs twice. Every
//! submitted item runs to completion even when an earlier one failed or
//! panicked; callers inspect the outcomes afterwards, in submission order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use log::warn;

/// Outcome of one job: its return value, or the payload it panicked with.
pub type JobOutcome<R> = thread::Result<R>;

/// Thread name prefix used when none is given.
pub const DEFAULT_POOL_NAME: &str = "score-infer";

#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: usize,
    name: String,
}

impl WorkerPool {
    /// Pool running at most `size` jobs concurrently (at least one).
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            name: DEFAULT_POOL_NAME.to_string(),
        }
    }

    /// Set the thread name prefix (`<name>-<index>`).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `job` over every item and wait for all of them.
    ///
    /// Outcomes come back in the order of `items`. A panicking job does not
    /// take its worker down; the panic payload is returned in its slot.
    pub fn run_all<T, R, F>(&self, items: &[T], job: F) -> Vec<JobOutcome<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let cursor = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<JobOutcome<R>>>> =
            items.iter().map(|_| Mutex::new(None)).collect();

        let drain = || {
            loop {
                let idx = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(idx) else {
                    break;
                };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(item)));
                *slots[idx].lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
            }
        };

        let workers = self.size.min(items.len());
        thread::scope(|s| {
            let mut spawned = 0;
            for i in 0..workers {
                let builder = thread::Builder::new().name(format!("{}-{i}", self.name));
                match builder.spawn_scoped(s, &drain) {
                    Ok(_) => spawned += 1,
                    Err(e) => warn!("worker pool {}: failed to spawn worker {i}: {e}", self.name),
                }
            }
            // Could not get a single thread: do the work here.
            if spawned == 0 {
                drain();
            }
        });

        slots
            .into_iter()
            .map(|slot| {
                slot.into_inner()
                    .unwrap_or_else(PoisonError::into_inner)
                    .unwrap_or_else(|| Err(Box::new("job was never run")))
            })
            .collect()
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    #[test]
    fn runs_every_item_once_in_order() {
        let pool = WorkerPool::new(3);
        let items: Vec<usize> = (0..20).collect();
        let out = pool.run_all(&items, |&i| i * 10);
        let values: Vec<usize> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..20).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn never_exceeds_pool_size() {
        let pool = WorkerPool::new(2);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<u32> = (0..8).collect();
        pool.run_all(&items, |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            active.fetch_sub(1, Ordering::SeqCst);
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn uses_named_threads() {
        let pool = WorkerPool::new(2).with_name("score-test");
        let items = vec![(); 4];
        let names: HashSet<String> = pool
            .run_all(&items, |_| thread::current().name().unwrap_or_default().to_string())
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert!(names.iter().all(|n| n.starts_with("score-test-")));
    }

    #[test]
    fn panics_are_contained_and_siblings_finish() {
        let pool = WorkerPool::new(2);
        let done = AtomicUsize::new(0);
        let items: Vec<usize> = (0..6).collect();
        let out = pool.run_all(&items, |&i| {
            if i == 1 {
                panic!("boom on {i}");
            }
            done.fetch_add(1, Ordering::SeqCst);
            i
        });
        assert_eq!(done.load(Ordering::SeqCst), 5);
        let err = out[1].as_ref().unwrap_err();
        assert_eq!(panic_message(&**err), "boom on 1");
        assert!(out.iter().enumerate().all(|(i, r)| (i == 1) != r.is_ok()));
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let pool = WorkerPool::new(4);
        let out: Vec<JobOutcome<()>> = pool.run_all(&Vec::<u8>::new(), |_| ());
        assert!(out.is_empty());
    }
}

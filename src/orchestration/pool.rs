//! Bounded concurrency for collaborator stages.
//!
//! A `StagePool` caps how many invocations of one stage (for example one
//! image optimizer) are in flight at once. Work beyond the cap waits for a
//! permit. The pool also tracks the current and peak in-flight counts so the
//! bound can be observed.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct StagePool {
    name: String,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl StagePool {
    /// Create a pool allowing `max_concurrent` simultaneous invocations.
    /// A limit of zero is raised to one.
    pub fn new(name: &str, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            name: name.to_string(),
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of invocations currently holding a permit.
    pub fn active_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest `active_count` observed so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Run `work` once a permit is available.
    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| Error::Validation(format!("stage '{}' closed: {}", self.name, e)))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = work.await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

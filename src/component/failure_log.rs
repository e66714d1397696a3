// src/component/failure_log.rs
//! Bounded failure log for a component
//!
//! Asynchronous requests and scheduled tasks have no caller to report to, so
//! their failures land here. The log is a lock-free ring: when full, the
//! oldest failure is evicted.

use crate::utils::errors::CvmError;
use chrono::{DateTime, Utc};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Where a failure originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    AsyncRequest,
    ScheduledTask,
}

/// A recorded failure
#[derive(Debug, Clone)]
pub struct ComponentFailure {
    /// URI of the component the failure happened in
    pub component: String,
    /// What was running when it failed
    pub origin: FailureOrigin,
    pub error: CvmError,
    /// When the failure was recorded
    pub at: DateTime<Utc>,
}

/// Lock-free failure ring
pub struct FailureLog {
    component: String,
    queue: ArrayQueue<ComponentFailure>,
    total: AtomicU64,
    evicted: AtomicU64,
}

impl FailureLog {
    /// Create a log retaining at most `capacity` failures
    pub fn new(component: impl Into<String>, capacity: usize) -> Self {
        Self {
            component: component.into(),
            queue: ArrayQueue::new(capacity.max(1)),
            total: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Record a failure
    pub fn record(&self, origin: FailureOrigin, error: CvmError) {
        error!(
            component = %self.component,
            ?origin,
            "Task failed: {}",
            error
        );
        metrics::counter!("cvm_task_failures_total").increment(1);

        self.total.fetch_add(1, Ordering::Relaxed);
        let failure = ComponentFailure {
            component: self.component.clone(),
            origin,
            error,
            at: Utc::now(),
        };

        if self.queue.force_push(failure).is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove and return retained failures, oldest first
    pub fn drain(&self) -> Vec<ComponentFailure> {
        let mut failures = Vec::with_capacity(self.queue.len());
        while let Some(failure) = self.queue.pop() {
            failures.push(failure);
        }
        failures
    }

    /// Failures recorded since creation
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Failures dropped because the log was full
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

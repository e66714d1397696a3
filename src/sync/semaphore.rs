// src/sync/semaphore.rs
//! Counting semaphore
//!
//! Waiters are served strictly in arrival order: a large request at the
//! head blocks smaller ones behind it, and `try_acquire` never barges past
//! a waiting caller. Timed attempts park like `acquire` and are expired by
//! a task scheduled on the tool's own executor.

use crate::component::executor::{ComponentExecutor, ScheduledTask};
use crate::port::reply::{park, Continuation, Reply};
use crate::sync::contracts::{SemaphoreContract, SemaphoreRequest, SemaphoreResponse, ToolKind};
use crate::sync::group::GroupId;
use crate::sync::tool::{terminated, ToolComponent, ToolService};
use crate::utils::errors::{CvmError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub type SemaphoreTool = ToolComponent<SemaphoreService>;

struct Waiter {
    id: u64,
    permits: u32,
    /// Response sent once the permits are granted
    granted: SemaphoreResponse,
    continuation: Continuation<SemaphoreResponse>,
    expiry: Option<ScheduledTask>,
}

impl Waiter {
    fn cancel_expiry(&self) {
        if let Some(expiry) = &self.expiry {
            expiry.cancel();
        }
    }
}

struct SemaphoreState {
    permits: u32,
    waiters: VecDeque<Waiter>,
    next_id: u64,
    closed: bool,
}

impl SemaphoreState {
    /// Drop waiters whose caller stopped waiting
    fn prune(&mut self) {
        self.waiters.retain(|w| {
            let live = !w.continuation.is_abandoned();
            if !live {
                w.cancel_expiry();
            }
            live
        });
    }

    fn take_now(&mut self, permits: u32) -> bool {
        self.prune();
        if self.waiters.is_empty() && self.permits >= permits {
            self.permits -= permits;
            true
        } else {
            false
        }
    }

    /// Grant permits to waiters from the head of the queue
    fn grant_waiters(&mut self) {
        while let Some(head) = self.waiters.front() {
            if !head.continuation.is_abandoned() && head.permits > self.permits {
                break;
            }
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            waiter.cancel_expiry();

            if waiter.continuation.is_abandoned() {
                continue;
            }

            self.permits -= waiter.permits;
            if waiter.continuation.resume(waiter.granted).is_err() {
                // Caller left between the check and the hand-over
                self.permits += waiter.permits;
            }
        }
    }

    fn enqueue(&mut self, permits: u32, granted: SemaphoreResponse) -> (u64, Reply<SemaphoreResponse>) {
        let id = self.next_id;
        self.next_id += 1;

        let (continuation, parked) = park();
        self.waiters.push_back(Waiter {
            id,
            permits,
            granted,
            continuation,
            expiry: None,
        });
        (id, Reply::Parked(parked))
    }

    fn expire(&mut self, id: u64) {
        if let Some(position) = self.waiters.iter().position(|w| w.id == id) {
            if let Some(waiter) = self.waiters.remove(position) {
                let _ = waiter
                    .continuation
                    .resume(SemaphoreResponse::Acquired { acquired: false });
            }
            // The head may have changed
            self.grant_waiters();
        }
    }
}

pub struct SemaphoreService {
    state: Arc<Mutex<SemaphoreState>>,
    executor: ComponentExecutor,
}

impl SemaphoreService {
    fn schedule_expiry(&self, id: u64, timeout: Duration) -> Result<ScheduledTask> {
        let state = Arc::clone(&self.state);
        self.executor.schedule_task(
            move || async move {
                state.lock().expire(id);
                Ok(())
            },
            timeout,
        )
    }

    /// Permits not held by anyone
    pub fn available_permits(&self) -> u32 {
        self.state.lock().permits
    }

    /// Callers still waiting for permits
    pub fn queue_length(&self) -> usize {
        let mut state = self.state.lock();
        state.prune();
        state.waiters.len()
    }
}

impl ToolService for SemaphoreService {
    type Contract = SemaphoreContract;

    const KIND: ToolKind = ToolKind::Semaphore;

    fn new(group: &GroupId, executor: &ComponentExecutor) -> Result<Self> {
        Ok(Self {
            state: Arc::new(Mutex::new(SemaphoreState {
                permits: group.parameter(),
                waiters: VecDeque::new(),
                next_id: 0,
                closed: false,
            })),
            executor: executor.clone(),
        })
    }

    fn serve(&self, request: SemaphoreRequest) -> Result<Reply<SemaphoreResponse>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(terminated(Self::KIND));
        }

        let reply = match request {
            SemaphoreRequest::Acquire { permits } => {
                if permits == 0 || state.take_now(permits) {
                    Reply::Ready(SemaphoreResponse::Done)
                } else {
                    debug!("Acquire of {} parked ({} available)", permits, state.permits);
                    state.enqueue(permits, SemaphoreResponse::Done).1
                }
            }
            SemaphoreRequest::Release { permits } => {
                state.permits = state.permits.checked_add(permits).ok_or_else(|| {
                    CvmError::ToolProtocol("Semaphore permit count overflow".to_string())
                })?;
                state.grant_waiters();
                Reply::Ready(SemaphoreResponse::Done)
            }
            SemaphoreRequest::TryAcquire { permits } => Reply::Ready(SemaphoreResponse::Acquired {
                acquired: permits == 0 || state.take_now(permits),
            }),
            SemaphoreRequest::TryAcquireTimeout {
                permits,
                timeout_ms,
            } => {
                if permits == 0 || state.take_now(permits) {
                    Reply::Ready(SemaphoreResponse::Acquired { acquired: true })
                } else if timeout_ms == 0 {
                    Reply::Ready(SemaphoreResponse::Acquired { acquired: false })
                } else {
                    let (id, reply) =
                        state.enqueue(permits, SemaphoreResponse::Acquired { acquired: true });
                    let expiry = match self.schedule_expiry(id, Duration::from_millis(timeout_ms)) {
                        Ok(expiry) => expiry,
                        Err(e) => {
                            state.waiters.retain(|w| w.id != id);
                            return Err(e);
                        }
                    };
                    if let Some(waiter) = state.waiters.iter_mut().find(|w| w.id == id) {
                        waiter.expiry = Some(expiry);
                    }
                    reply
                }
            }
            SemaphoreRequest::AvailablePermits => Reply::Ready(SemaphoreResponse::Count {
                value: state.permits,
            }),
            SemaphoreRequest::QueueLength => {
                state.prune();
                Reply::Ready(SemaphoreResponse::Count {
                    value: state.waiters.len() as u32,
                })
            }
            SemaphoreRequest::DrainPermits => {
                let drained = std::mem::take(&mut state.permits);
                Reply::Ready(SemaphoreResponse::Count { value: drained })
            }
        };

        Ok(reply)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for waiter in state.waiters.drain(..) {
            waiter.cancel_expiry();
            waiter.continuation.fail(terminated(Self::KIND));
        }
    }
}

// src/sync/queue.rs
//! Bounded blocking queue of JSON values
//!
//! Buffered items leave in insertion order. Blocked producers and consumers
//! are woken in arrival order; a `put` that finds a waiting consumer hands
//! its item over directly.

use crate::component::executor::ComponentExecutor;
use crate::port::reply::{park, Continuation, Reply};
use crate::sync::contracts::{ArrayBlockingQueueContract, QueueRequest, QueueResponse, ToolKind};
use crate::sync::group::GroupId;
use crate::sync::tool::{terminated, ToolComponent, ToolService};
use crate::utils::errors::{CvmError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

pub type ArrayBlockingQueueTool = ToolComponent<ArrayBlockingQueueService>;

struct BlockedProducer {
    item: Value,
    continuation: Continuation<QueueResponse>,
}

struct QueueState {
    capacity: usize,
    items: VecDeque<Value>,
    consumers: VecDeque<Continuation<QueueResponse>>,
    producers: VecDeque<BlockedProducer>,
    closed: bool,
}

impl QueueState {
    /// Give `item` to the longest-waiting live consumer; returns it if none
    fn hand_off(&mut self, item: Value) -> Option<Value> {
        while let Some(consumer) = self.consumers.pop_front() {
            if consumer.is_abandoned() {
                continue;
            }
            if consumer.resume(QueueResponse::Item { item: item.clone() }).is_ok() {
                return None;
            }
        }
        Some(item)
    }

    /// Move the longest-blocked live producer's item into the buffer
    fn admit_producer(&mut self) {
        while self.items.len() < self.capacity {
            let Some(producer) = self.producers.pop_front() else {
                return;
            };
            if producer.continuation.is_abandoned() {
                continue;
            }

            self.items.push_back(producer.item);
            if producer.continuation.resume(QueueResponse::Done).is_err() {
                // Producer left after the check; its put never happened
                self.items.pop_back();
            }
        }
    }

    fn dequeue(&mut self) -> Option<Value> {
        let item = self.items.pop_front()?;
        self.admit_producer();
        Some(item)
    }

    fn has_room(&self) -> bool {
        self.items.len() < self.capacity
    }
}

pub struct ArrayBlockingQueueService {
    state: Mutex<QueueState>,
}

impl ArrayBlockingQueueService {
    /// Items currently buffered
    pub fn size(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }
}

impl ToolService for ArrayBlockingQueueService {
    type Contract = ArrayBlockingQueueContract;

    const KIND: ToolKind = ToolKind::ArrayBlockingQueue;

    fn new(group: &GroupId, _executor: &ComponentExecutor) -> Result<Self> {
        if group.parameter() == 0 {
            return Err(CvmError::Construction(format!(
                "Queue {} needs a capacity of at least 1",
                group
            )));
        }

        Ok(Self {
            state: Mutex::new(QueueState {
                capacity: group.parameter() as usize,
                items: VecDeque::new(),
                consumers: VecDeque::new(),
                producers: VecDeque::new(),
                closed: false,
            }),
        })
    }

    fn serve(&self, request: QueueRequest) -> Result<Reply<QueueResponse>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(terminated(Self::KIND));
        }

        let reply = match request {
            QueueRequest::Put { item } => match state.hand_off(item) {
                None => Reply::Ready(QueueResponse::Done),
                Some(item) if state.has_room() && state.producers.is_empty() => {
                    state.items.push_back(item);
                    Reply::Ready(QueueResponse::Done)
                }
                Some(item) => {
                    let (continuation, parked) = park();
                    state.producers.push_back(BlockedProducer { item, continuation });
                    Reply::Parked(parked)
                }
            },
            QueueRequest::Take => match state.dequeue() {
                Some(item) => Reply::Ready(QueueResponse::Item { item }),
                None => {
                    let (continuation, parked) = park();
                    state.consumers.push_back(continuation);
                    Reply::Parked(parked)
                }
            },
            QueueRequest::Offer { item } => match state.hand_off(item) {
                None => Reply::Ready(QueueResponse::Offered { accepted: true }),
                Some(item) if state.has_room() && state.producers.is_empty() => {
                    state.items.push_back(item);
                    Reply::Ready(QueueResponse::Offered { accepted: true })
                }
                Some(_) => Reply::Ready(QueueResponse::Offered { accepted: false }),
            },
            QueueRequest::Poll => Reply::Ready(QueueResponse::Polled {
                item: state.dequeue(),
            }),
            QueueRequest::Size => Reply::Ready(QueueResponse::Count {
                value: state.items.len() as u32,
            }),
            QueueRequest::RemainingCapacity => Reply::Ready(QueueResponse::Count {
                value: (state.capacity - state.items.len()) as u32,
            }),
        };

        Ok(reply)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for consumer in state.consumers.drain(..) {
            consumer.fail(terminated(Self::KIND));
        }
        for producer in state.producers.drain(..) {
            producer.continuation.fail(terminated(Self::KIND));
        }
    }
}

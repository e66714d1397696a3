// src/sync/latch.rs
//! Count-down latch. Opens once, never resets.

use crate::component::executor::ComponentExecutor;
use crate::port::reply::{park, Continuation, Reply};
use crate::sync::contracts::{CountDownLatchContract, CountDownLatchRequest, CountDownLatchResponse, ToolKind};
use crate::sync::group::GroupId;
use crate::sync::tool::{terminated, ToolComponent, ToolService};
use crate::utils::errors::Result;
use parking_lot::Mutex;
use tracing::debug;

pub type CountDownLatchTool = ToolComponent<CountDownLatchService>;

struct LatchState {
    count: u32,
    waiters: Vec<Continuation<CountDownLatchResponse>>,
    closed: bool,
}

pub struct CountDownLatchService {
    state: Mutex<LatchState>,
}

impl CountDownLatchService {
    /// Remaining count
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }
}

impl ToolService for CountDownLatchService {
    type Contract = CountDownLatchContract;

    const KIND: ToolKind = ToolKind::CountDownLatch;

    fn new(group: &GroupId, _executor: &ComponentExecutor) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(LatchState {
                count: group.parameter(),
                waiters: Vec::new(),
                closed: false,
            }),
        })
    }

    fn serve(&self, request: CountDownLatchRequest) -> Result<Reply<CountDownLatchResponse>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(terminated(Self::KIND));
        }

        let reply = match request {
            CountDownLatchRequest::Await => {
                if state.count == 0 {
                    Reply::Ready(CountDownLatchResponse::Done)
                } else {
                    let (continuation, parked) = park();
                    state.waiters.push(continuation);
                    Reply::Parked(parked)
                }
            }
            CountDownLatchRequest::CountDown => {
                if state.count > 0 {
                    state.count -= 1;
                    if state.count == 0 {
                        debug!("Latch open, releasing {} waiters", state.waiters.len());
                        for continuation in state.waiters.drain(..) {
                            let _ = continuation.resume(CountDownLatchResponse::Done);
                        }
                    }
                }
                Reply::Ready(CountDownLatchResponse::Done)
            }
            CountDownLatchRequest::GetCount => {
                Reply::Ready(CountDownLatchResponse::Count { value: state.count })
            }
        };

        Ok(reply)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for continuation in state.waiters.drain(..) {
            continuation.fail(terminated(Self::KIND));
        }
    }
}

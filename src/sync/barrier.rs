// src/sync/barrier.rs
//! Cyclic barrier
//!
//! Callers that stop waiting before the barrier trips no longer count as
//! arrived. `reset` breaks the current generation: its waiters fail with
//! a broken-barrier error and the generation advances.

use crate::component::executor::ComponentExecutor;
use crate::port::reply::{park, Continuation, Reply};
use crate::sync::contracts::{CyclicBarrierContract, CyclicBarrierRequest, CyclicBarrierResponse, ToolKind};
use crate::sync::group::GroupId;
use crate::sync::tool::{terminated, ToolComponent, ToolService};
use crate::utils::errors::{CvmError, Result};
use parking_lot::Mutex;
use tracing::debug;

pub type CyclicBarrierTool = ToolComponent<CyclicBarrierService>;

struct BarrierState {
    parties: u32,
    /// Continuations of the current generation, in arrival order
    waiting: Vec<Continuation<CyclicBarrierResponse>>,
    generation: u64,
    closed: bool,
}

impl BarrierState {
    fn prune(&mut self) {
        self.waiting.retain(|c| !c.is_abandoned());
    }

    fn trip(&mut self) {
        for (position, continuation) in self.waiting.drain(..).enumerate() {
            let index = self.parties - 1 - position as u32;
            let _ = continuation.resume(CyclicBarrierResponse::Arrived { index });
        }
        self.generation += 1;
        debug!("Barrier tripped, generation {}", self.generation);
    }
}

pub struct CyclicBarrierService {
    state: Mutex<BarrierState>,
}

impl CyclicBarrierService {
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Live parties parked in the current generation
    pub fn number_waiting(&self) -> u32 {
        let mut state = self.state.lock();
        state.prune();
        state.waiting.len() as u32
    }
}

impl ToolService for CyclicBarrierService {
    type Contract = CyclicBarrierContract;

    const KIND: ToolKind = ToolKind::CyclicBarrier;

    fn new(group: &GroupId, _executor: &ComponentExecutor) -> Result<Self> {
        if group.parameter() == 0 {
            return Err(CvmError::Construction(format!(
                "Barrier {} needs at least one party",
                group
            )));
        }

        Ok(Self {
            state: Mutex::new(BarrierState {
                parties: group.parameter(),
                waiting: Vec::new(),
                generation: 0,
                closed: false,
            }),
        })
    }

    fn serve(&self, request: CyclicBarrierRequest) -> Result<Reply<CyclicBarrierResponse>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(terminated(Self::KIND));
        }

        let reply = match request {
            CyclicBarrierRequest::Await => {
                state.prune();
                if state.waiting.len() as u32 + 1 == state.parties {
                    state.trip();
                    Reply::Ready(CyclicBarrierResponse::Arrived { index: 0 })
                } else {
                    let (continuation, parked) = park();
                    state.waiting.push(continuation);
                    Reply::Parked(parked)
                }
            }
            CyclicBarrierRequest::NumberWaiting => {
                state.prune();
                Reply::Ready(CyclicBarrierResponse::Count {
                    value: state.waiting.len() as u32,
                })
            }
            CyclicBarrierRequest::NumberToWait => {
                state.prune();
                Reply::Ready(CyclicBarrierResponse::Count {
                    value: state.parties - state.waiting.len() as u32,
                })
            }
            CyclicBarrierRequest::Parties => Reply::Ready(CyclicBarrierResponse::Count {
                value: state.parties,
            }),
            CyclicBarrierRequest::Generation => Reply::Ready(CyclicBarrierResponse::Generation {
                value: state.generation,
            }),
            CyclicBarrierRequest::Reset => {
                let generation = state.generation;
                for continuation in state.waiting.drain(..) {
                    continuation.fail(CvmError::BrokenBarrier(format!(
                        "Barrier reset during generation {}",
                        generation
                    )));
                }
                state.generation += 1;
                Reply::Ready(CyclicBarrierResponse::Done)
            }
        };

        Ok(reply)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for continuation in state.waiting.drain(..) {
            continuation.fail(terminated(Self::KIND));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tool::testing::{parked, ready, service};
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_last_arrival_releases_all() {
        let barrier: CyclicBarrierService = service(3);

        let first = parked(barrier.serve(CyclicBarrierRequest::Await).unwrap());
        let second = parked(barrier.serve(CyclicBarrierRequest::Await).unwrap());
        assert_eq!(barrier.number_waiting(), 2);
        assert_eq!(
            ready(barrier.serve(CyclicBarrierRequest::NumberToWait).unwrap()),
            CyclicBarrierResponse::Count { value: 1 }
        );

        let last = ready(barrier.serve(CyclicBarrierRequest::Await).unwrap());

        let mut indices = HashSet::new();
        for response in [first.wait().await.unwrap(), second.wait().await.unwrap(), last] {
            match response {
                CyclicBarrierResponse::Arrived { index } => assert!(indices.insert(index)),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(indices, HashSet::from([0, 1, 2]));
        assert_eq!(barrier.generation(), 1);
        assert_eq!(barrier.number_waiting(), 0);
    }

    #[tokio::test]
    async fn test_barrier_is_cyclic() {
        let barrier: CyclicBarrierService = service(2);

        for generation in 1..=3 {
            let first = parked(barrier.serve(CyclicBarrierRequest::Await).unwrap());
            ready(barrier.serve(CyclicBarrierRequest::Await).unwrap());
            assert_eq!(
                first.wait().await.unwrap(),
                CyclicBarrierResponse::Arrived { index: 1 }
            );
            assert_eq!(barrier.generation(), generation);
        }
    }

    #[tokio::test]
    async fn test_reset_breaks_waiters() {
        let barrier: CyclicBarrierService = service(2);
        let waiting = parked(barrier.serve(CyclicBarrierRequest::Await).unwrap());

        ready(barrier.serve(CyclicBarrierRequest::Reset).unwrap());

        assert!(matches!(waiting.wait().await, Err(CvmError::BrokenBarrier(_))));
        assert_eq!(barrier.generation(), 1);
        assert_eq!(barrier.number_waiting(), 0);
    }

    #[tokio::test]
    async fn test_departed_caller_does_not_count() {
        let barrier: CyclicBarrierService = service(2);

        drop(parked(barrier.serve(CyclicBarrierRequest::Await).unwrap()));
        let waiting = parked(barrier.serve(CyclicBarrierRequest::Await).unwrap());
        assert_eq!(barrier.generation(), 0);

        ready(barrier.serve(CyclicBarrierRequest::Await).unwrap());
        assert!(waiting.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_parties_rejected() {
        let executor = crate::sync::tool::testing::executor();
        let group = GroupId::new("g", 0).unwrap();
        assert!(CyclicBarrierService::new(&group, &executor).is_err());
    }
}

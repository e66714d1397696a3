// src/port/reply.rs
//! Replies and parked continuations
//!
//! A service handler either answers immediately or parks the caller. Parking
//! hands back a [`Parked`] receiver that the inbound port awaits *outside*
//! the owner's executor, while the handler keeps the matching
//! [`Continuation`] in its own state and resumes it from a later operation.
//! The executor slot is released as soon as the handler returns.

use crate::utils::errors::{CvmError, Result};
use tokio::sync::oneshot;

/// Outcome of a service handler
#[derive(Debug)]
pub enum Reply<T> {
    /// Result available now
    Ready(T),
    /// Caller waits until the continuation is resumed or failed
    Parked(Parked<T>),
}

impl<T> Reply<T> {
    /// Wait for the final result
    pub async fn resolve(self) -> Result<T> {
        match self {
            Reply::Ready(value) => Ok(value),
            Reply::Parked(parked) => parked.wait().await,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Reply::Ready(_))
    }
}

/// Waiting side of a parked call
#[derive(Debug)]
pub struct Parked<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> Parked<T> {
    /// Wait until the service resumes or fails the call
    pub async fn wait(self) -> Result<T> {
        self.receiver.await.map_err(|_| {
            CvmError::ComponentTerminated("Parked call abandoned by its service".to_string())
        })?
    }
}

/// Resuming side of a parked call
#[derive(Debug)]
pub struct Continuation<T> {
    sender: oneshot::Sender<Result<T>>,
}

impl<T> Continuation<T> {
    /// Complete the parked call with `value`
    ///
    /// Returns the value back if the caller is gone, so the service can
    /// undo whatever it reserved for it.
    pub fn resume(self, value: T) -> std::result::Result<(), T> {
        match self.sender.send(Ok(value)) {
            Ok(()) => Ok(()),
            Err(Ok(value)) => Err(value),
            Err(Err(_)) => Ok(()),
        }
    }

    /// Complete the parked call with an error
    pub fn fail(self, error: CvmError) {
        let _ = self.sender.send(Err(error));
    }

    /// Whether the caller stopped waiting
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Create a linked continuation/parked pair
pub fn park<T>() -> (Continuation<T>, Parked<T>) {
    let (sender, receiver) = oneshot::channel();
    (Continuation { sender }, Parked { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_resolves_immediately() {
        let reply = Reply::Ready(7);
        assert!(reply.is_ready());
        assert_eq!(reply.resolve().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_parked_resumed_later() {
        let (continuation, parked) = park::<u32>();
        let waiter = tokio::spawn(Reply::Parked(parked).resolve());

        tokio::task::yield_now().await;
        assert!(!continuation.is_abandoned());
        continuation.resume(3).unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_resume_after_caller_left_returns_value() {
        let (continuation, parked) = park::<String>();
        drop(parked);

        assert!(continuation.is_abandoned());
        assert_eq!(continuation.resume("item".to_string()).unwrap_err(), "item");
    }

    #[tokio::test]
    async fn test_failed_and_dropped_continuations() {
        let (continuation, parked) = park::<u32>();
        continuation.fail(CvmError::BrokenBarrier("reset".into()));
        assert_eq!(
            parked.wait().await.unwrap_err(),
            CvmError::BrokenBarrier("reset".into())
        );

        let (continuation, parked) = park::<u32>();
        drop(continuation);
        assert!(matches!(
            parked.wait().await,
            Err(CvmError::ComponentTerminated(_))
        ));
    }
}
